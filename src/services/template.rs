//! Rename and caption templates
//!
//! Templates are plain text with fixed placeholder tokens. Substitution is literal
//! string replacement, not a templating language: unknown `{tokens}` pass through
//! untouched and there is no escaping. A value that itself contains placeholder
//! text (a title of `{season}`, say) is not protected from later replacements.
//!
//! Rename template variables:
//! - `{title}` - Title left over after extraction
//! - `{season}` - Season number (raw, leading zeros dropped)
//! - `{episode}` - Episode number, zero-padded to 2 digits when numeric
//! - `{resolution}` - Resolution token (`1080P`, `4K`, ...)
//! - `{audio}` - `sub`, `dub`, `dual`, or empty
//!
//! Caption template variables:
//! - `{filename}` - Final rendered filename
//! - `{filesize}` - Human-readable size of the inbound file
//! - `{duration}` - Media duration as `H:MM:SS`

use crate::services::file_utils::{format_bytes, format_clock, sanitize_for_filename};
use crate::services::filename_parser::{AudioType, FileInfo};

/// Placeholders recognised in rename templates
pub const RENAME_PLACEHOLDERS: &[&str] =
    &["{title}", "{season}", "{episode}", "{resolution}", "{audio}"];

/// Placeholders recognised in caption templates
pub const CAPTION_PLACEHOLDERS: &[&str] = &["{filename}", "{filesize}", "{duration}"];

/// Render a rename template with extracted file info
pub fn render(template: &str, info: &FileInfo) -> String {
    let audio = match info.audio {
        AudioType::None => "",
        other => other.as_str(),
    };

    template
        .replace("{title}", &info.title)
        .replace("{season}", &info.season)
        .replace("{episode}", &pad_episode(&info.episode))
        .replace("{resolution}", &info.resolution)
        .replace("{audio}", audio)
}

/// Render the final filename: template output plus the source extension, sanitised
/// so the result is a single path component.
pub fn render_filename(template: &str, info: &FileInfo, extension: Option<&str>) -> String {
    let rendered = render(template, info);
    let name = format!("{}{}", rendered.trim(), extension.unwrap_or_default());
    sanitize_for_filename(&name)
}

/// Render a caption. Falls back to the bold filename when no template is set.
pub fn render_caption(
    template: Option<&str>,
    filename: &str,
    filesize: u64,
    duration_secs: u64,
) -> String {
    match template {
        Some(template) if !template.trim().is_empty() => template
            .replace("{filename}", filename)
            .replace("{filesize}", &format_bytes(filesize))
            .replace("{duration}", &format_clock(duration_secs)),
        _ => format!("**{}**", filename),
    }
}

/// "5" -> "05"; non-numeric values are kept verbatim
fn pad_episode(episode: &str) -> String {
    match episode.parse::<u32>() {
        Ok(n) => format!("{:02}", n),
        Err(_) => episode.to_string(),
    }
}
