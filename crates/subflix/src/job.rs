//! Processing job lifecycle.
//!
//! Every status change goes through [`JobManager`], which enforces the
//! `queued -> processing -> {completed, failed}` machine (plus
//! `queued -> failed`) and keeps the owning video's status in step.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use tokio::sync::Mutex;

use crate::error::SubflixError;
use crate::model::{JobStatus, ProcessingJob, Settings, VideoFile, VideoStatus};
use crate::store::{Collection, Filter, Patch, RecordStore, Sort};

/// Progress once a worker has picked the job up
pub const PROGRESS_DISPATCHED: u8 = 10;
/// Progress recorded just before ffmpeg is spawned
pub const PROGRESS_SPAWNING: u8 = 30;
pub const PROGRESS_DONE: u8 = 100;

/// Failure message for jobs found active at startup
pub const INTERRUPTED_MESSAGE: &str = "interrupted: daemon stopped before the job finished";

/// `{stem}.{language}{.ext}` inside `output_dir`
pub fn derive_output_path(video: &Path, language: &str, output_dir: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match video.extension() {
        Some(ext) => format!("{}.{}.{}", stem, language, ext.to_string_lossy()),
        None => format!("{}.{}", stem, language),
    };
    output_dir.join(name)
}

/// What startup recovery changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub failed_jobs: usize,
    pub reset_videos: usize,
}

pub struct JobManager {
    jobs: Collection<ProcessingJob>,
    videos: Collection<VideoFile>,
    // Serializes check-then-write sequences (active guard, transitions)
    lock: Mutex<()>,
}

fn active_filter() -> Filter {
    Filter::all().any_of("status", JobStatus::ACTIVE.iter().map(JobStatus::as_str))
}

impl JobManager {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        JobManager {
            jobs: Collection::new(Arc::clone(&store)),
            videos: Collection::new(store),
            lock: Mutex::new(()),
        }
    }

    /// Validate a video and insert a `queued` job for it.
    ///
    /// At most one active job may exist per video and per output path.
    pub async fn create_job(
        &self,
        video_file_id: &str,
        settings: &Settings,
    ) -> Result<ProcessingJob, SubflixError> {
        let video = self
            .videos
            .get(video_file_id)
            .await?
            .ok_or_else(|| SubflixError::not_found("video file", video_file_id))?;

        let (subtitle, language) = video
            .subtitle()
            .ok_or_else(|| SubflixError::NoSubtitleAvailable(video.id.clone()))?;

        let output_dir = settings.output_dir(video.content_type).ok_or_else(|| {
            SubflixError::NotConfigured(format!("{} output directory", video.content_type))
        })?;
        let output_path = derive_output_path(&video.file_path, language, Path::new(output_dir));

        let _guard = self.lock.lock().await;

        if let Some(active) = self.active_job_for(&video.id).await? {
            return Err(SubflixError::JobAlreadyActive {
                video_file_id: video.id.clone(),
                job_id: active.id,
            });
        }
        let same_output = active_filter().eq("output_path", output_path.to_string_lossy().into_owned());
        if let Some(active) = self.jobs.find_one(&same_output, None).await? {
            return Err(SubflixError::JobAlreadyActive {
                video_file_id: active.video_file_id,
                job_id: active.id,
            });
        }

        let job = ProcessingJob::new(
            video.id.clone(),
            video.file_path.clone(),
            subtitle.to_path_buf(),
            output_path,
        );
        self.jobs.insert(&job).await?;
        self.set_video_status(&video.id, VideoStatus::Processing).await?;

        info!(
            "Job {}: queued {} -> {}",
            job.id,
            job.input_video_path.display(),
            job.output_path.display()
        );
        Ok(job)
    }

    /// `queued -> processing` at [`PROGRESS_DISPATCHED`]
    pub async fn mark_processing(&self, job_id: &str) -> Result<ProcessingJob, SubflixError> {
        let patch = Patch::new()
            .set_time("started_at", Utc::now())
            .set("progress", PROGRESS_DISPATCHED);
        self.transition(job_id, JobStatus::Processing, patch, None).await
    }

    /// Record progress on a running job; never moves backwards
    pub async fn record_progress(&self, job_id: &str, progress: u8) -> Result<ProcessingJob, SubflixError> {
        let _guard = self.lock.lock().await;
        let mut job = self.get_job(job_id).await?;
        if job.status != JobStatus::Processing {
            return Err(SubflixError::InvalidTransition {
                job_id: job.id,
                from: job.status.to_string(),
                to: format!("{} ({}%)", JobStatus::Processing, progress),
            });
        }
        let progress = progress.min(PROGRESS_DONE).max(job.progress);
        self.jobs.update(job_id, Patch::new().set("progress", progress)).await?;
        job.progress = progress;
        Ok(job)
    }

    /// `processing -> completed`; the video becomes `completed`
    pub async fn complete(&self, job_id: &str) -> Result<ProcessingJob, SubflixError> {
        let patch = Patch::new()
            .set("progress", PROGRESS_DONE)
            .set_time("completed_at", Utc::now());
        let job = self
            .transition(job_id, JobStatus::Completed, patch, Some(VideoStatus::Completed))
            .await?;
        info!("Job {}: completed", job.id);
        Ok(job)
    }

    /// Move an active job to `failed`; the video becomes `failed`
    pub async fn fail(&self, job_id: &str, message: &str) -> Result<ProcessingJob, SubflixError> {
        let patch = Patch::new()
            .set("error_message", message)
            .set_time("completed_at", Utc::now());
        let job = self
            .transition(job_id, JobStatus::Failed, patch, Some(VideoStatus::Failed))
            .await?;
        warn!("Job {}: failed: {}", job.id, message);
        Ok(job)
    }

    /// Apply one edge of the state machine. The video status, when given,
    /// is written under the same lock so a newer job for the video cannot
    /// be created in between.
    async fn transition(
        &self,
        job_id: &str,
        next: JobStatus,
        patch: Patch,
        video_status: Option<VideoStatus>,
    ) -> Result<ProcessingJob, SubflixError> {
        let _guard = self.lock.lock().await;
        let job = self.get_job(job_id).await?;
        if !job.status.can_transition_to(next) {
            return Err(SubflixError::InvalidTransition {
                job_id: job.id,
                from: job.status.to_string(),
                to: next.to_string(),
            });
        }
        self.jobs.update(job_id, patch.set("status", next.as_str())).await?;
        if let Some(status) = video_status {
            self.set_video_status(&job.video_file_id, status).await?;
        }
        self.get_job(job_id).await
    }

    async fn set_video_status(&self, video_file_id: &str, status: VideoStatus) -> Result<(), SubflixError> {
        let found = self
            .videos
            .update(video_file_id, Patch::new().set("status", status.as_str()))
            .await?;
        if !found {
            warn!("Video {} vanished before it could be marked {}", video_file_id, status.as_str());
        }
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<ProcessingJob, SubflixError> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| SubflixError::not_found("job", job_id))
    }

    /// Jobs, newest first
    pub async fn list_jobs(&self, limit: Option<usize>) -> Result<Vec<ProcessingJob>, SubflixError> {
        Ok(self
            .jobs
            .find_many(&Filter::all(), Some(&Sort::desc("created_at")), limit)
            .await?)
    }

    /// The queued or processing job for a video, if any
    pub async fn active_job_for(&self, video_file_id: &str) -> Result<Option<ProcessingJob>, SubflixError> {
        let filter = active_filter().eq("video_file_id", video_file_id);
        Ok(self.jobs.find_one(&filter, None).await?)
    }

    /// Fail jobs a previous run left active and release videos stuck in
    /// `processing` with no job behind them
    pub async fn recover_interrupted(&self) -> Result<RecoveryReport, SubflixError> {
        let mut report = RecoveryReport::default();

        let stuck = self
            .jobs
            .find_many(&active_filter(), Some(&Sort::asc("created_at")), None)
            .await?;
        for job in stuck {
            info!("Job {}: recovering from status {}", job.id, job.status);
            self.fail(&job.id, INTERRUPTED_MESSAGE).await?;
            report.failed_jobs += 1;
        }

        let _guard = self.lock.lock().await;
        let processing = Filter::all().eq("status", VideoStatus::Processing.as_str());
        for video in self.videos.find_many(&processing, None, None).await? {
            if self.active_job_for(&video.id).await?.is_none() {
                self.set_video_status(&video.id, VideoStatus::Pending).await?;
                report.reset_videos += 1;
            }
        }

        if report.failed_jobs > 0 || report.reset_videos > 0 {
            info!(
                "Recovered {} interrupted job(s), reset {} video(s) to pending",
                report.failed_jobs, report.reset_videos
            );
        }
        Ok(report)
    }

    /// Delete terminal jobs; active ones are kept
    pub async fn clear_finished(&self) -> Result<u64, SubflixError> {
        let _guard = self.lock.lock().await;
        let terminal = Filter::all().any_of("status", JobStatus::TERMINAL.iter().map(JobStatus::as_str));
        let removed = self.jobs.delete_many(&terminal).await?;
        info!("Cleared {} finished job(s)", removed);
        Ok(removed)
    }
}
