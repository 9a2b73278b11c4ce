//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::services::collaborators::ExtractSource;
use crate::services::logging::LogFormat;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Working copies of downloaded files
    pub downloads_path: PathBuf,

    /// Tagged copies
    pub metadata_path: PathBuf,

    /// Where the local transport publishes to
    pub outbox_path: PathBuf,

    pub ffmpeg_path: String,

    pub ffprobe_path: String,

    /// Repeat events for the same file inside this window are dropped
    pub dedup_window: Duration,

    /// Minimum time between two progress updates
    pub progress_interval: Duration,

    /// Upper bound for one ffmpeg tagging run
    pub tag_timeout: Duration,

    /// Upper bound for one ffprobe duration probe
    pub probe_timeout: Duration,

    /// Scratch files older than this are removed at start-up
    pub scratch_max_age: Duration,

    /// Default rename template
    pub rename_template: Option<String>,

    /// Default caption template
    pub caption_template: Option<String>,

    pub extract_source: ExtractSource,

    /// Tag text; tagging is enabled when set
    pub metadata_text: Option<String>,

    pub log_format: LogFormat,
}

fn secs_var(name: &str, default: u64) -> Result<Duration> {
    let secs: u64 = env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", name))?;
    Ok(Duration::from_secs(secs))
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let extract_source = match env::var("EXTRACT_SOURCE") {
            Ok(value) => ExtractSource::from_arg(&value)
                .with_context(|| format!("Invalid EXTRACT_SOURCE: {}", value))?,
            Err(_) => ExtractSource::default(),
        };

        let log_format = match env::var("LOG_FORMAT") {
            Ok(value) => {
                LogFormat::from_arg(&value).with_context(|| format!("Invalid LOG_FORMAT: {}", value))?
            }
            Err(_) => LogFormat::default(),
        };

        Ok(Self {
            downloads_path: env::var("DOWNLOADS_PATH")
                .unwrap_or_else(|_| "downloads".to_string())
                .into(),

            metadata_path: env::var("METADATA_PATH")
                .unwrap_or_else(|_| "Metadata".to_string())
                .into(),

            outbox_path: env::var("OUTBOX_PATH")
                .unwrap_or_else(|_| "./data/outbox".to_string())
                .into(),

            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),

            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),

            dedup_window: secs_var("DEDUP_WINDOW_SECS", 10)?,

            progress_interval: secs_var("PROGRESS_INTERVAL_SECS", 10)?,

            tag_timeout: secs_var("TAG_TIMEOUT_SECS", 600)?,

            probe_timeout: secs_var("PROBE_TIMEOUT_SECS", 30)?,

            scratch_max_age: secs_var("SCRATCH_MAX_AGE_SECS", 3600)?,

            rename_template: optional_var("RENAME_TEMPLATE"),

            caption_template: optional_var("CAPTION_TEMPLATE"),

            extract_source,

            metadata_text: optional_var("METADATA_TEXT"),

            log_format,
        })
    }
}
