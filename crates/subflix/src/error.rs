use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures raised by a [`crate::store::RecordStore`] backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record has no string `id` field")]
    MissingId,

    #[error("duplicate id {id} in collection {collection}")]
    Duplicate { collection: String, id: String },

    #[error("failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record file {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("store I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Error taxonomy surfaced by every core operation.
///
/// Configuration and validation variants are returned synchronously to the
/// caller. Encoder variants are only ever observed through a job's
/// `error_message`.
#[derive(Debug, Error)]
pub enum SubflixError {
    #[error("{0} not configured")]
    NotConfigured(String),

    #[error("invalid content type: {0:?} (expected movies or tvshows)")]
    InvalidCategory(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("no subtitle file found for video {0}")]
    NoSubtitleAvailable(String),

    #[error("video {video_file_id} already has active job {job_id}")]
    JobAlreadyActive {
        video_file_id: String,
        job_id: String,
    },

    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    #[error("dispatch queue is full ({capacity} jobs waiting)")]
    QueueFull { capacity: usize },

    #[error("worker pool is shut down")]
    PoolClosed,

    #[error("ffmpeg exited with status {}: {diagnostics}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    EncoderFailure {
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error("failed to start ffmpeg at {}: {reason}", bin.display())]
    EncoderUnavailable { bin: PathBuf, reason: String },

    #[error("ffmpeg timed out after {limit:?}, process group killed")]
    EncoderTimeout { limit: Duration },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl SubflixError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        SubflixError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Stable reason code for the request layer
    pub fn code(&self) -> &'static str {
        match self {
            SubflixError::NotConfigured(_) => "not_configured",
            SubflixError::InvalidCategory(_) => "invalid_category",
            SubflixError::NotFound { .. } => "not_found",
            SubflixError::NoSubtitleAvailable(_) => "no_subtitle",
            SubflixError::JobAlreadyActive { .. } => "job_already_active",
            SubflixError::InvalidTransition { .. } => "invalid_transition",
            SubflixError::QueueFull { .. } => "queue_full",
            SubflixError::PoolClosed => "pool_closed",
            SubflixError::EncoderFailure { .. } => "encoder_failure",
            SubflixError::EncoderUnavailable { .. } => "encoder_unavailable",
            SubflixError::EncoderTimeout { .. } => "encoder_timeout",
            SubflixError::Store(_) => "store_error",
            SubflixError::Io { .. } => "io_error",
        }
    }
}
