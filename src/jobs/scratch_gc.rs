//! Scratch directory garbage collection
//!
//! The pipeline removes its own artifacts, but a killed process leaves working
//! copies, tagged copies and thumbnails behind. This sweep deletes scratch files
//! older than a threshold; it runs once at start-up, before any file is admitted.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Summary of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub removed: usize,
    pub bytes: u64,
    pub failed: usize,
}

fn is_stale(entry: &walkdir::DirEntry, cutoff: SystemTime) -> bool {
    entry
        .metadata()
        .ok()
        .and_then(|m| m.modified().ok())
        .map(|modified| modified <= cutoff)
        .unwrap_or(false)
}

fn sweep_dir(dir: &Path, cutoff: SystemTime, stats: &mut SweepStats) {
    if !dir.exists() {
        return;
    }

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() || !is_stale(&entry, cutoff) {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "Removed stale scratch file");
                stats.removed += 1;
                stats.bytes += size;
            }
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to remove stale scratch file");
                stats.failed += 1;
            }
        }
    }
}

/// Delete files older than `max_age` under each scratch directory
pub async fn sweep_scratch(dirs: Vec<PathBuf>, max_age: Duration) -> Result<SweepStats> {
    let stats = tokio::task::spawn_blocking(move || {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut stats = SweepStats::default();
        for dir in &dirs {
            sweep_dir(dir, cutoff, &mut stats);
        }
        stats
    })
    .await?;

    info!(
        removed = stats.removed,
        bytes = stats.bytes,
        failed = stats.failed,
        "Scratch cleanup completed"
    );
    Ok(stats)
}
