//! Operations exposed to the request layer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::SubflixConfig;
use crate::error::SubflixError;
use crate::ffmpeg::Encoder;
use crate::job::{JobManager, RecoveryReport};
use crate::matcher::{find_subtitle_for_video, SubtitleMatch};
use crate::model::{ContentCategory, ProcessingJob, Settings, SettingsUpdate, VideoFile};
use crate::scan::{find_video_files, ScannedFile};
use crate::store::{to_document, Collection, Filter, Patch, RecordStore, Sort};
use crate::worker::WorkerPool;

/// Most videos a listing returns
pub const VIDEO_LIST_LIMIT: usize = 1000;
/// Most jobs a listing returns
pub const JOB_LIST_LIMIT: usize = 1000;

/// Fields a rescan may overwrite on an existing video
const DISCOVERY_FIELDS: [&str; 6] = [
    "file_path",
    "file_name",
    "file_size",
    "subtitle_path",
    "subtitle_language",
    "content_type",
];

/// Result of scanning one library root
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub scanned_files: usize,
    pub new_files: usize,
    pub updated_files: usize,
    pub files: Vec<VideoFile>,
}

pub struct SubflixService {
    config: SubflixConfig,
    settings: Collection<Settings>,
    videos: Collection<VideoFile>,
    jobs: Arc<JobManager>,
    pool: WorkerPool,
    settings_lock: Mutex<()>,
    scan_lock: Mutex<()>,
}

impl SubflixService {
    /// Wire the core together and start the worker pool. Must run inside a
    /// tokio runtime.
    pub fn new(store: Arc<dyn RecordStore>, config: SubflixConfig, encoder: Arc<dyn Encoder>) -> Self {
        let jobs = Arc::new(JobManager::new(Arc::clone(&store)));
        let pool = WorkerPool::start(
            Arc::clone(&jobs),
            encoder,
            config.max_concurrent_jobs,
            config.queue_capacity,
        );
        SubflixService {
            settings: Collection::new(Arc::clone(&store)),
            videos: Collection::new(store),
            jobs,
            pool,
            config,
            settings_lock: Mutex::new(()),
            scan_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SubflixConfig {
        &self.config
    }

    /// Repair state left by an unclean stop
    pub async fn recover(&self) -> Result<RecoveryReport, SubflixError> {
        self.jobs.recover_interrupted().await
    }

    /// Current settings; the first read stores the configured defaults
    pub async fn settings(&self) -> Result<Settings, SubflixError> {
        let _guard = self.settings_lock.lock().await;
        self.current_settings().await
    }

    async fn current_settings(&self) -> Result<Settings, SubflixError> {
        let newest = Sort::desc("created_at");
        if let Some(settings) = self.settings.find_one(&Filter::all(), Some(&newest)).await? {
            return Ok(settings);
        }
        let settings = self.config.library.to_settings();
        self.settings.insert(&settings).await?;
        info!("Created default settings {}", settings.id);
        Ok(settings)
    }

    /// Apply a partial update and return the result
    pub async fn update_settings(&self, update: &SettingsUpdate) -> Result<Settings, SubflixError> {
        let _guard = self.settings_lock.lock().await;
        let mut settings = self.current_settings().await?;
        settings.apply(update);

        let patch = Patch::new()
            .set("movies_source_path", settings.movies_source_path.as_str())
            .set("movies_output_path", settings.movies_output_path.as_str())
            .set("tvshows_source_path", settings.tvshows_source_path.as_str())
            .set("tvshows_output_path", settings.tvshows_output_path.as_str());
        self.settings.update(&settings.id, patch).await?;
        info!("Settings {} updated", settings.id);
        Ok(settings)
    }

    /// Walk a category's source root, match subtitles and upsert by path
    pub async fn scan(&self, category: ContentCategory) -> Result<ScanSummary, SubflixError> {
        let settings = self.settings().await?;
        let root = settings
            .source_dir(category)
            .map(PathBuf::from)
            .ok_or_else(|| SubflixError::NotConfigured(format!("{} source directory", category)))?;

        let _guard = self.scan_lock.lock().await;
        let video_exts = self.config.video_extensions.clone();
        let subtitle_exts = self.config.subtitle_extensions.clone();
        let found = tokio::task::spawn_blocking(move || discover(&root, &video_exts, &subtitle_exts))
            .await
            .map_err(|e| SubflixError::Io {
                context: "scan task failed".to_string(),
                source: std::io::Error::other(e.to_string()),
            })?;

        let mut summary = ScanSummary {
            scanned_files: found.len(),
            new_files: 0,
            updated_files: 0,
            files: Vec::with_capacity(found.len()),
        };

        let mut known: HashMap<PathBuf, VideoFile> = self
            .videos
            .find_many(&Filter::all(), None, None)
            .await?
            .into_iter()
            .map(|video| (video.file_path.clone(), video))
            .collect();

        for (scanned, subtitle) in found {
            match known.remove(&scanned.path) {
                Some(mut existing) => {
                    existing.refresh_discovery(&scanned, subtitle, category);
                    let doc = to_document(&existing)?;
                    let patch = DISCOVERY_FIELDS.iter().fold(Patch::new(), |patch, field| match doc.get(*field) {
                        Some(value) => patch.set(field, value.clone()),
                        None => patch,
                    });
                    self.videos.update(&existing.id, patch).await?;
                    summary.updated_files += 1;
                    summary.files.push(existing);
                }
                None => {
                    let video = VideoFile::discovered(&scanned, subtitle, category);
                    self.videos.insert(&video).await?;
                    summary.new_files += 1;
                    summary.files.push(video);
                }
            }
        }

        info!(
            "Scan of {}: {} file(s), {} new, {} updated",
            category, summary.scanned_files, summary.new_files, summary.updated_files
        );
        Ok(summary)
    }

    /// Videos, newest first, optionally limited to one category
    pub async fn list_videos(&self, category: Option<ContentCategory>) -> Result<Vec<VideoFile>, SubflixError> {
        let filter = match category {
            Some(category) => Filter::all().eq("content_type", category.as_str()),
            None => Filter::all(),
        };
        Ok(self
            .videos
            .find_many(&filter, Some(&Sort::desc("created_at")), Some(VIDEO_LIST_LIMIT))
            .await?)
    }

    pub async fn clear_videos(&self) -> Result<u64, SubflixError> {
        let removed = self.videos.delete_many(&Filter::all()).await?;
        info!("Cleared {} video record(s)", removed);
        Ok(removed)
    }

    /// Create a job for a video and hand it to the worker pool
    pub async fn process_video(&self, video_file_id: &str) -> Result<ProcessingJob, SubflixError> {
        let settings = self.settings().await?;
        let job = self.jobs.create_job(video_file_id, &settings).await?;

        if let Err(e) = self.pool.submit(job.clone()) {
            warn!("Job {}: not dispatched: {}", job.id, e);
            if let Err(fail_err) = self.jobs.fail(&job.id, &e.to_string()).await {
                warn!("Job {}: could not be marked failed: {}", job.id, fail_err);
            }
            return Err(e);
        }
        Ok(job)
    }

    /// Jobs, newest first, capped at [`JOB_LIST_LIMIT`]
    pub async fn list_jobs(&self) -> Result<Vec<ProcessingJob>, SubflixError> {
        self.jobs.list_jobs(Some(JOB_LIST_LIMIT)).await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<ProcessingJob, SubflixError> {
        self.jobs.get_job(job_id).await
    }

    /// Remove finished jobs
    pub async fn clear_jobs(&self) -> Result<u64, SubflixError> {
        self.jobs.clear_finished().await
    }

    /// Stop accepting work and wait for running jobs
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

fn discover(
    root: &std::path::Path,
    video_exts: &[String],
    subtitle_exts: &[String],
) -> Vec<(ScannedFile, Option<SubtitleMatch>)> {
    find_video_files(root, video_exts)
        .into_iter()
        .map(|scanned| {
            let subtitle = find_subtitle_for_video(&scanned.path, subtitle_exts);
            (scanned, subtitle)
        })
        .collect()
}
