pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod job;
pub mod matcher;
pub mod model;
pub mod scan;
pub mod service;
pub mod store;
pub mod worker;

pub use config::SubflixConfig;
pub use error::{StoreError, SubflixError};
pub use ffmpeg::{Encoder, FfmpegEncoder};
pub use job::JobManager;
pub use model::{ContentCategory, JobStatus, ProcessingJob, Settings, SettingsUpdate, VideoFile, VideoStatus};
pub use service::{ScanSummary, SubflixService};
pub use store::{JsonFileStore, MemoryStore, RecordStore};
