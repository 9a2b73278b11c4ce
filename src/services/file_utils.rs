//! Shared file utility functions
//!
//! Extension checks, filename sanitisation and human-readable formatting used by
//! the parser, the renderers and the progress reporter.

use std::path::Path;

/// Video file extensions (lowercase, without dot)
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "mov", "wmv", "flv", "webm", "m4v", "ts", "m2ts", "mpg", "mpeg",
];

/// Audio file extensions (lowercase, without dot)
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "m4a", "m4b", "aac", "ogg", "opus", "wav", "wma", "aiff", "alac",
];

/// Subtitle and archive extensions that also show up as uploads
pub const OTHER_EXTENSIONS: &[&str] = &[
    "srt", "ass", "ssa", "sub", "vtt", "zip", "rar", "7z", "pdf", "epub", "apk",
];

/// Check whether `ext` (with or without leading dot) is one we treat as a file extension
pub fn is_known_extension(ext: &str) -> bool {
    let lower = ext.trim_start_matches('.').to_lowercase();
    VIDEO_EXTENSIONS.contains(&lower.as_str())
        || AUDIO_EXTENSIONS.contains(&lower.as_str())
        || OTHER_EXTENSIONS.contains(&lower.as_str())
}

/// Get the extension of a filename, including the leading dot, if it is a known one
///
/// # Example
/// ```
/// use autorename::services::file_utils::known_extension;
/// assert_eq!(known_extension("Show.S01E01.mkv"), Some(".mkv".to_string()));
/// assert_eq!(known_extension("Show.S01E01.x264"), None);
/// ```
pub fn known_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| is_known_extension(e))
        .map(|e| format!(".{}", e))
}

/// Sanitize a string for use as a filename
///
/// Uses the `sanitize_filename` crate which handles:
/// - Invalid characters for the current OS (including path separators)
/// - Reserved filenames (CON, PRN, etc. on Windows)
pub fn sanitize_for_filename(name: &str) -> String {
    sanitize_filename::sanitize(name)
}

/// Format bytes into a human-readable string
///
/// # Example
/// ```
/// use autorename::services::file_utils::format_bytes;
/// assert_eq!(format_bytes(1024), "1.0 KB");
/// assert_eq!(format_bytes(1073741824), "1.0 GB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a number of seconds as `H:MM:SS`, wrapping at 24 hours
pub fn format_clock(seconds: u64) -> String {
    let seconds = seconds % (24 * 3600);
    format!(
        "{}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
