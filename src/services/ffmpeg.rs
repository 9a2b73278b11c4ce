//! FFmpeg-based metadata tagging and duration probing
//!
//! Tagging re-muxes the container with `ffmpeg` (stream copy, no re-encode) and
//! embeds the user's tag text as title/author attributes on the container and on
//! every stream. Probing uses `ffprobe`'s JSON output, which is stable and
//! well-documented.
//!
//! Both tools are run as child processes with captured output, each bounded by its
//! own timeout; a timed-out child is killed.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default upper bound for one tagging run
pub const DEFAULT_TAG_TIMEOUT: Duration = Duration::from_secs(600);

/// Default upper bound for one ffprobe run
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a tagging run produced no trusted output
#[derive(Debug, Error)]
pub enum TagError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("exit code {code}: {stderr}")]
    Exit { code: String, stderr: String },

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("exited successfully but wrote no output")]
    MissingOutput,
}

/// External transform that embeds metadata into a media container
#[async_trait]
pub trait MetadataTransform: Send + Sync {
    /// Write a tagged copy of `input` to `output`. On error nothing at `output`
    /// is to be trusted.
    async fn tag(&self, input: &Path, output: &Path, text: &str) -> Result<(), TagError>;

    /// Duration of a media file in seconds, if it can be determined
    async fn probe_duration(&self, _path: &Path) -> Option<f64> {
        None
    }
}

mod ffprobe {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
    }
}

/// FFmpeg command-line wrapper
#[derive(Debug, Clone)]
pub struct FfmpegService {
    ffmpeg_path: String,
    ffprobe_path: String,
    tag_timeout: Duration,
    probe_timeout: Duration,
}

impl FfmpegService {
    pub fn new() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            tag_timeout: DEFAULT_TAG_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Create with custom tool paths and timeout
    pub fn with_paths(ffmpeg_path: String, ffprobe_path: String, tag_timeout: Duration) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
            tag_timeout,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Check if ffmpeg is available
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Arguments for one tagging run
    pub fn tag_args(input: &Path, output: &Path, text: &str) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-y", "-i"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(input.to_string_lossy().into_owned());
        for arg in ["-map", "0", "-c:s", "copy", "-c:a", "copy", "-c:v", "copy"] {
            args.push(arg.to_string());
        }
        for (flag, key) in [
            ("-metadata", "title"),
            ("-metadata", "author"),
            ("-metadata:s:s", "title"),
            ("-metadata:s:a", "title"),
            ("-metadata:s:v", "title"),
        ] {
            args.push(flag.to_string());
            args.push(format!("{}={}", key, text));
        }
        args.push(output.to_string_lossy().into_owned());
        args
    }

    /// Run a command to completion with captured output, killing it on timeout
    async fn run_captured(
        mut command: Command,
        program: &str,
        timeout: Duration,
    ) -> Result<std::process::Output, TagError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|source| TagError::Spawn {
            program: program.to_string(),
            source,
        })?;

        // Dropping the wait future on timeout drops the child, which kills it
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(source)) => Err(TagError::Spawn {
                program: program.to_string(),
                source,
            }),
            Err(_) => Err(TagError::TimedOut(timeout)),
        }
    }
}

impl Default for FfmpegService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataTransform for FfmpegService {
    async fn tag(&self, input: &Path, output: &Path, text: &str) -> Result<(), TagError> {
        debug!(
            input = %input.display(),
            output = %output.display(),
            "Tagging media file with ffmpeg"
        );

        let mut command = Command::new(&self.ffmpeg_path);
        command.args(Self::tag_args(input, output, text));

        let result = Self::run_captured(command, &self.ffmpeg_path, self.tag_timeout).await?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            let code = result
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            warn!(
                input = %input.display(),
                exit_code = %code,
                "ffmpeg tagging failed"
            );
            return Err(TagError::Exit {
                code,
                stderr: if stderr.is_empty() {
                    "no error output".to_string()
                } else {
                    stderr
                },
            });
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(TagError::MissingOutput);
        }

        info!(output = %output.display(), "Metadata tagging complete");
        Ok(())
    }

    async fn probe_duration(&self, path: &Path) -> Option<f64> {
        let mut command = Command::new(&self.ffprobe_path);
        command
            .args(["-v", "error"])
            .args(["-print_format", "json"])
            .arg("-show_format")
            .arg(path);

        let output = match Self::run_captured(command, &self.ffprobe_path, self.probe_timeout).await {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                debug!(
                    path = %path.display(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "ffprobe failed"
                );
                return None;
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "ffprobe did not finish");
                return None;
            }
        };

        parse_duration(&output.stdout)
    }
}

/// Pull `format.duration` out of ffprobe JSON output
fn parse_duration(stdout: &[u8]) -> Option<f64> {
    let probe: ffprobe::FfprobeOutput = serde_json::from_slice(stdout).ok()?;
    probe
        .format?
        .duration?
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
}
