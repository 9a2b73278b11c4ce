//! Contracts for the services the pipeline talks to but does not own
//!
//! The messaging transport (download, upload, status messages) and the per-user
//! preference storage live outside this crate. The pipeline only sees these traits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::services::file_utils::known_extension;

/// How a file is published (and how it arrived)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Document,
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Document => "document",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    pub fn from_arg(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "document" => Some(MediaKind::Document),
            "video" => Some(MediaKind::Video),
            "audio" => Some(MediaKind::Audio),
            _ => None,
        }
    }

    /// Extension assumed when a file of this kind arrives without one
    fn fallback_extension(&self) -> Option<&'static str> {
        match self {
            MediaKind::Document => None,
            MediaKind::Video => Some(".mp4"),
            MediaKind::Audio => Some(".mp3"),
        }
    }
}

/// Where file info is extracted from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractSource {
    #[default]
    Filename,
    Caption,
}

impl ExtractSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractSource::Filename => "filename",
            ExtractSource::Caption => "caption",
        }
    }

    pub fn from_arg(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "filename" => Some(ExtractSource::Filename),
            "caption" => Some(ExtractSource::Caption),
            _ => None,
        }
    }
}

/// Per-user metadata tagging preference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPreference {
    pub enabled: bool,
    pub tag_text: Option<String>,
}

impl MetadataPreference {
    /// Tag text to embed, if tagging is on and there is something to embed
    pub fn effective_text(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.tag_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

/// An inbound file event as delivered by the messaging transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundFile {
    /// Transport-unique identifier, also the dedup key
    pub file_id: String,
    pub user_id: i64,
    pub chat_id: i64,
    pub kind: MediaKind,
    pub file_name: Option<String>,
    pub caption: Option<String>,
    pub file_size: u64,
    /// Reference to the thumbnail embedded in a video upload
    pub video_thumb: Option<String>,
}

impl InboundFile {
    /// Filename used for extraction and for the output extension. Video and audio
    /// files without a media extension get `.mp4`/`.mp3`.
    pub fn source_name(&self) -> String {
        let name = self
            .file_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.file_id);

        match self.kind.fallback_extension() {
            Some(ext) if known_extension(name).is_none() => format!("{}{}", name, ext),
            _ => name.to_string(),
        }
    }

    /// Text to extract file info from. Caption extraction falls back to the
    /// filename when there is no caption.
    pub fn extraction_text(&self, source: ExtractSource) -> String {
        match source {
            ExtractSource::Caption => self
                .caption
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| self.source_name()),
            ExtractSource::Filename => self.source_name(),
        }
    }
}

/// Handle of a status message that can be edited in place
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusHandle {
    pub chat_id: i64,
    pub message_id: String,
}

/// Progress callback: `(current_bytes, total_bytes)`
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// What to publish
#[derive(Debug, Clone)]
pub struct PublishRequest<'a> {
    pub chat_id: i64,
    pub kind: MediaKind,
    pub path: &'a Path,
    pub caption: &'a str,
    pub thumbnail: Option<&'a Path>,
    pub duration_secs: u64,
}

/// Transport acknowledgement of a published file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAck {
    pub message_id: String,
}

/// The messaging transport
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Download the bytes behind `reference` to `dest`. Returns the path actually
    /// written, which may differ from `dest`.
    async fn acquire_bytes(
        &self,
        reference: &str,
        dest: &Path,
        on_progress: ProgressCallback,
    ) -> Result<PathBuf>;

    /// Upload a file
    async fn publish(
        &self,
        request: PublishRequest<'_>,
        on_progress: ProgressCallback,
    ) -> Result<PublishAck>;

    /// Post a new status message in reply to the inbound file
    async fn reply(&self, chat_id: i64, text: &str) -> Result<StatusHandle>;

    /// Replace the text of a status message
    async fn edit(&self, handle: &StatusHandle, text: &str) -> Result<()>;
}

/// Per-user and per-chat preference storage
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn template(&self, user_id: i64) -> Result<Option<String>>;

    async fn extract_source(&self, user_id: i64) -> Result<ExtractSource>;

    async fn metadata_preference(&self, user_id: i64) -> Result<MetadataPreference>;

    /// Publish kind override; `None` publishes as the inbound kind
    async fn media_preference(&self, user_id: i64) -> Result<Option<MediaKind>>;

    async fn caption_template(&self, chat_id: i64) -> Result<Option<String>>;

    async fn thumbnail(&self, chat_id: i64) -> Result<Option<String>>;
}
