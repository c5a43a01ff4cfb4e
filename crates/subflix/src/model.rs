use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SubflixError;
use crate::matcher::SubtitleMatch;
use crate::scan::ScannedFile;
use crate::store::Record;

/// Content category a library root belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentCategory {
    Movie,
    TvShow,
}

impl ContentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::Movie => "movie",
            ContentCategory::TvShow => "tvshow",
        }
    }

    /// Plural form used by the request layer ("movies" / "tvshows")
    pub fn plural(&self) -> &'static str {
        match self {
            ContentCategory::Movie => "movies",
            ContentCategory::TvShow => "tvshows",
        }
    }
}

impl fmt::Display for ContentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

impl FromStr for ContentCategory {
    type Err = SubflixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movies" | "movie" => Ok(ContentCategory::Movie),
            "tvshows" | "tvshow" => Ok(ContentCategory::TvShow),
            other => Err(SubflixError::InvalidCategory(other.to_string())),
        }
    }
}

/// Lifecycle status of a discovered video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "pending",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }
}

/// Lifecycle status of a processing job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ACTIVE: [JobStatus; 2] = [JobStatus::Queued, JobStatus::Processing];
    pub const TERMINAL: [JobStatus; 2] = [JobStatus::Completed, JobStatus::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Allowed edges of the job state machine. Terminal states have none.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discovered media file and its matched subtitle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFile {
    pub id: String,
    pub file_path: PathBuf,
    pub file_name: String,
    pub file_size: u64,
    /// Set if and only if `subtitle_language` is set
    pub subtitle_path: Option<PathBuf>,
    pub subtitle_language: Option<String>,
    pub content_type: ContentCategory,
    pub status: VideoStatus,
    pub created_at: DateTime<Utc>,
}

impl VideoFile {
    /// Build a fresh `pending` record from a scan hit
    pub fn discovered(
        scanned: &ScannedFile,
        subtitle: Option<SubtitleMatch>,
        content_type: ContentCategory,
    ) -> Self {
        let (subtitle_path, subtitle_language) = split_subtitle(subtitle);
        VideoFile {
            id: Uuid::new_v4().to_string(),
            file_path: scanned.path.clone(),
            file_name: scanned.name.clone(),
            file_size: scanned.size,
            subtitle_path,
            subtitle_language,
            content_type,
            status: VideoStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Refresh the scanner-owned fields, leaving id, status and created_at alone
    pub fn refresh_discovery(
        &mut self,
        scanned: &ScannedFile,
        subtitle: Option<SubtitleMatch>,
        content_type: ContentCategory,
    ) {
        let (subtitle_path, subtitle_language) = split_subtitle(subtitle);
        self.file_path = scanned.path.clone();
        self.file_name = scanned.name.clone();
        self.file_size = scanned.size;
        self.subtitle_path = subtitle_path;
        self.subtitle_language = subtitle_language;
        self.content_type = content_type;
    }

    /// Subtitle path and language, present only together
    pub fn subtitle(&self) -> Option<(&Path, &str)> {
        match (&self.subtitle_path, &self.subtitle_language) {
            (Some(path), Some(lang)) if !path.as_os_str().is_empty() => {
                Some((path.as_path(), lang.as_str()))
            }
            _ => None,
        }
    }
}

fn split_subtitle(subtitle: Option<SubtitleMatch>) -> (Option<PathBuf>, Option<String>) {
    match subtitle {
        Some(m) => (Some(m.path), Some(m.language)),
        None => (None, None),
    }
}

impl Record for VideoFile {
    const COLLECTION: &'static str = "video_files";

    fn id(&self) -> &str {
        &self.id
    }
}

/// One attempt to embed a subtitle into a video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: String,
    pub video_file_id: String,
    pub input_video_path: PathBuf,
    pub input_subtitle_path: PathBuf,
    pub output_path: PathBuf,
    pub status: JobStatus,
    pub progress: u8,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ProcessingJob {
    pub fn new(
        video_file_id: String,
        input_video_path: PathBuf,
        input_subtitle_path: PathBuf,
        output_path: PathBuf,
    ) -> Self {
        ProcessingJob {
            id: Uuid::new_v4().to_string(),
            video_file_id,
            input_video_path,
            input_subtitle_path,
            output_path,
            status: JobStatus::Queued,
            progress: 0,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}

impl Record for ProcessingJob {
    const COLLECTION: &'static str = "processing_jobs";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Operator-editable directory settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub id: String,
    #[serde(default)]
    pub movies_source_path: String,
    #[serde(default)]
    pub movies_output_path: String,
    #[serde(default)]
    pub tvshows_source_path: String,
    #[serde(default)]
    pub tvshows_output_path: String,
    pub created_at: DateTime<Utc>,
}

impl Settings {
    pub fn new() -> Self {
        Settings {
            id: Uuid::new_v4().to_string(),
            movies_source_path: String::new(),
            movies_output_path: String::new(),
            tvshows_source_path: String::new(),
            tvshows_output_path: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Configured source root, `None` when empty
    pub fn source_dir(&self, category: ContentCategory) -> Option<&str> {
        let path = match category {
            ContentCategory::Movie => &self.movies_source_path,
            ContentCategory::TvShow => &self.tvshows_source_path,
        };
        non_empty(path)
    }

    /// Configured output root, `None` when empty
    pub fn output_dir(&self, category: ContentCategory) -> Option<&str> {
        let path = match category {
            ContentCategory::Movie => &self.movies_output_path,
            ContentCategory::TvShow => &self.tvshows_output_path,
        };
        non_empty(path)
    }

    /// Apply the fields present in `update`
    pub fn apply(&mut self, update: &SettingsUpdate) {
        if let Some(v) = &update.movies_source_path {
            self.movies_source_path = v.clone();
        }
        if let Some(v) = &update.movies_output_path {
            self.movies_output_path = v.clone();
        }
        if let Some(v) = &update.tvshows_source_path {
            self.tvshows_source_path = v.clone();
        }
        if let Some(v) = &update.tvshows_output_path {
            self.tvshows_output_path = v.clone();
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

impl Record for Settings {
    const COLLECTION: &'static str = "settings";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Partial settings update; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub movies_source_path: Option<String>,
    pub movies_output_path: Option<String>,
    pub tvshows_source_path: Option<String>,
    pub tvshows_output_path: Option<String>,
}
