//! Bounded dispatch of queued jobs to the encoder.
//!
//! Jobs wait in an `mpsc` queue of fixed capacity; a dispatcher task hands
//! each one to its own task once a semaphore permit is free, so at most
//! `max_concurrent` ffmpeg processes run at a time.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::error::SubflixError;
use crate::ffmpeg::{EmbedRequest, EncodeReport, Encoder};
use crate::job::{JobManager, PROGRESS_SPAWNING};
use crate::model::ProcessingJob;

/// Failure message for queued jobs refused at shutdown
pub const SHUTDOWN_MESSAGE: &str = "daemon shutting down before the job started";

pub struct WorkerPool {
    sender: mpsc::Sender<ProcessingJob>,
    capacity: usize,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn the dispatcher on the current runtime
    pub fn start(
        manager: Arc<JobManager>,
        encoder: Arc<dyn Encoder>,
        max_concurrent: usize,
        queue_capacity: usize,
    ) -> Self {
        let capacity = queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));

        let dispatcher = tokio::spawn(dispatch(receiver, manager, encoder, permits, shutdown_rx));
        info!(
            "Worker pool started: {} concurrent job(s), queue capacity {}",
            max_concurrent.max(1),
            capacity
        );

        WorkerPool {
            sender,
            capacity,
            shutdown_tx,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Enqueue without waiting. The job is handed back to the caller's
    /// error path untouched; failing it is the caller's job.
    pub fn submit(&self, job: ProcessingJob) -> Result<(), SubflixError> {
        if *self.shutdown_tx.borrow() {
            return Err(SubflixError::PoolClosed);
        }
        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!("Job {}: dispatch queue full", job.id);
                Err(SubflixError::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SubflixError::PoolClosed),
        }
    }

    /// Refuse queued jobs, then wait for running ones to finish
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.dispatcher.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Worker dispatcher panicked: {}", e);
            }
            info!("Worker pool stopped");
        }
    }
}

async fn dispatch(
    mut receiver: mpsc::Receiver<ProcessingJob>,
    manager: Arc<JobManager>,
    encoder: Arc<dyn Encoder>,
    permits: Arc<Semaphore>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            Some(finished) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = finished {
                    error!("Job task panicked: {}", e);
                }
            }
            next = receiver.recv() => {
                let Some(job) = next else { break };
                let permit = tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        refuse(&manager, &job).await;
                        break;
                    }
                    permit = Arc::clone(&permits).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                debug!("Job {}: dispatched", job.id);
                let manager = Arc::clone(&manager);
                let encoder = Arc::clone(&encoder);
                running.spawn(async move {
                    run_job(&manager, encoder.as_ref(), &job).await;
                    drop(permit);
                });
            }
        }
    }

    receiver.close();
    while let Ok(job) = receiver.try_recv() {
        refuse(&manager, &job).await;
    }
    while let Some(finished) = running.join_next().await {
        if let Err(e) = finished {
            error!("Job task panicked: {}", e);
        }
    }
}

async fn refuse(manager: &JobManager, job: &ProcessingJob) {
    info!("Job {}: refused at shutdown", job.id);
    if let Err(e) = manager.fail(&job.id, SHUTDOWN_MESSAGE).await {
        error!("Job {}: could not be marked failed: {}", job.id, e);
    }
}

/// Drive one job to a terminal state. Errors end up on the job record.
pub async fn run_job(manager: &JobManager, encoder: &dyn Encoder, job: &ProcessingJob) {
    match execute(manager, encoder, job).await {
        Ok(report) => debug!(
            "Job {}: ffmpeg finished in {:.1}s",
            job.id,
            report.elapsed.as_secs_f64()
        ),
        Err(e) => {
            error!("Job {}: {}", job.id, e);
            if let Err(fail_err) = manager.fail(&job.id, &e.to_string()).await {
                error!("Job {}: could not be marked failed: {}", job.id, fail_err);
            }
        }
    }
}

async fn execute(
    manager: &JobManager,
    encoder: &dyn Encoder,
    job: &ProcessingJob,
) -> Result<EncodeReport, SubflixError> {
    manager.mark_processing(&job.id).await?;

    if let Some(parent) = job.output_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| SubflixError::Io {
                context: format!("failed to create output directory {}", parent.display()),
                source,
            })?;
    }

    manager.record_progress(&job.id, PROGRESS_SPAWNING).await?;
    let report = encoder.embed(&EmbedRequest::for_job(job)).await?;
    manager.complete(&job.id).await?;
    Ok(report)
}
