use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::matcher::DEFAULT_SUBTITLE_EXTENSIONS;
use crate::model::Settings;
use crate::scan::DEFAULT_VIDEO_EXTENSIONS;

/// Library directories used to seed the stored settings on first start
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryDefaults {
    pub movies_source_path: String,
    pub movies_output_path: String,
    pub tvshows_source_path: String,
    pub tvshows_output_path: String,
}

impl LibraryDefaults {
    /// Fresh settings record carrying these directories
    pub fn to_settings(&self) -> Settings {
        Settings {
            movies_source_path: self.movies_source_path.clone(),
            movies_output_path: self.movies_output_path.clone(),
            tvshows_source_path: self.tvshows_source_path.clone(),
            tvshows_output_path: self.tvshows_output_path.clone(),
            ..Settings::new()
        }
    }
}

/// Configuration for the subtitle embedding daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubflixConfig {
    /// Directory holding the JSON record store
    pub state_dir: PathBuf,
    /// HTTP listen address
    pub bind_addr: SocketAddr,
    /// ffmpeg binary, resolved through PATH when relative
    pub ffmpeg_bin: PathBuf,
    /// Upper bound on concurrent ffmpeg processes
    pub max_concurrent_jobs: usize,
    /// Jobs allowed to wait for a free slot
    pub queue_capacity: usize,
    /// Wall-clock limit per ffmpeg run, 0 disables it
    pub encoder_timeout_secs: u64,
    pub video_extensions: Vec<String>,
    pub subtitle_extensions: Vec<String>,
    /// Allowed CORS origins, "*" for any
    pub cors_origins: Vec<String>,
    pub library: LibraryDefaults,
}

impl Default for SubflixConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/subflix"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8001)),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            max_concurrent_jobs: 2,
            queue_capacity: 64,
            encoder_timeout_secs: 6 * 60 * 60,
            video_extensions: to_strings(DEFAULT_VIDEO_EXTENSIONS),
            subtitle_extensions: to_strings(DEFAULT_SUBTITLE_EXTENSIONS),
            cors_origins: vec!["*".to_string()],
            library: LibraryDefaults::default(),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl SubflixConfig {
    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            anyhow::bail!("max_concurrent_jobs must be at least 1");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be at least 1");
        }
        Ok(())
    }

    pub fn encoder_timeout(&self) -> Duration {
        Duration::from_secs(self.encoder_timeout_secs)
    }
}
