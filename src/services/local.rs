//! Local filesystem collaborators
//!
//! Lets the pipeline run without a messaging service: file references are local
//! paths, "publishing" copies into an outbox directory and status messages go to
//! the log. Preferences live in memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::services::collaborators::{
    ExtractSource, InboundFile, MediaKind, MessagingClient, MetadataPreference, PreferenceStore,
    ProgressCallback, PublishAck, PublishRequest, StatusHandle,
};
use crate::services::commands::PreferenceWriter;
use crate::services::file_utils::{AUDIO_EXTENSIONS, VIDEO_EXTENSIONS};

const COPY_CHUNK_SIZE: usize = 256 * 1024;

/// Copy `src` to `dest` in chunks, reporting `(copied, total)` after each chunk
async fn copy_with_progress(src: &Path, dest: &Path, on_progress: &ProgressCallback) -> Result<u64> {
    let mut reader = tokio::fs::File::open(src)
        .await
        .with_context(|| format!("Failed to open {}", src.display()))?;
    let total = reader.metadata().await?.len();

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut writer = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut copied = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
        on_progress(copied, total);
    }
    if total == 0 {
        on_progress(0, 0);
    }
    writer.flush().await?;

    Ok(copied)
}

/// Messaging transport backed by the local filesystem
pub struct LocalMessagingClient {
    outbox: PathBuf,
    next_message_id: AtomicU64,
}

impl LocalMessagingClient {
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
            next_message_id: AtomicU64::new(1),
        }
    }

    pub fn outbox(&self) -> &Path {
        &self.outbox
    }

    fn next_id(&self) -> String {
        self.next_message_id.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

#[async_trait]
impl MessagingClient for LocalMessagingClient {
    async fn acquire_bytes(
        &self,
        reference: &str,
        dest: &Path,
        on_progress: ProgressCallback,
    ) -> Result<PathBuf> {
        let bytes = copy_with_progress(Path::new(reference), dest, &on_progress).await?;
        debug!(source = reference, dest = %dest.display(), bytes = bytes, "Acquired file");
        Ok(dest.to_path_buf())
    }

    async fn publish(
        &self,
        request: PublishRequest<'_>,
        on_progress: ProgressCallback,
    ) -> Result<PublishAck> {
        let name = request
            .path
            .file_name()
            .context("Publish path has no file name")?;
        let dest = self.outbox.join(name);
        copy_with_progress(request.path, &dest, &on_progress).await?;

        if let Some(thumbnail) = request.thumbnail {
            let mut thumb_name = name.to_os_string();
            thumb_name.push(".jpg");
            tokio::fs::copy(thumbnail, self.outbox.join(thumb_name))
                .await
                .context("Failed to copy thumbnail")?;
        }

        let message_id = self.next_id();
        info!(
            chat_id = request.chat_id,
            kind = request.kind.as_str(),
            path = %dest.display(),
            duration_secs = request.duration_secs,
            caption = %request.caption,
            message_id = %message_id,
            "Published file"
        );
        Ok(PublishAck { message_id })
    }

    async fn reply(&self, chat_id: i64, text: &str) -> Result<StatusHandle> {
        let message_id = self.next_id();
        info!(chat_id = chat_id, message_id = %message_id, "{}", text);
        Ok(StatusHandle { chat_id, message_id })
    }

    async fn edit(&self, handle: &StatusHandle, text: &str) -> Result<()> {
        info!(chat_id = handle.chat_id, message_id = %handle.message_id, "{}", text);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct UserSettings {
    template: Option<String>,
    extract_source: ExtractSource,
    metadata: MetadataPreference,
    media_kind: Option<MediaKind>,
}

#[derive(Debug, Clone, Default)]
struct ChatSettings {
    caption_template: Option<String>,
    thumbnail: Option<String>,
}

/// In-memory preference store
#[derive(Default)]
pub struct LocalPreferences {
    users: RwLock<HashMap<i64, UserSettings>>,
    chats: RwLock<HashMap<i64, ChatSettings>>,
}

impl LocalPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    fn user(&self, user_id: i64) -> UserSettings {
        self.users.read().get(&user_id).cloned().unwrap_or_default()
    }

    fn chat(&self, chat_id: i64) -> ChatSettings {
        self.chats.read().get(&chat_id).cloned().unwrap_or_default()
    }

    pub fn set_metadata(&self, user_id: i64, metadata: MetadataPreference) {
        self.users.write().entry(user_id).or_default().metadata = metadata;
    }

    pub fn set_media_preference(&self, user_id: i64, kind: Option<MediaKind>) {
        self.users.write().entry(user_id).or_default().media_kind = kind;
    }

    pub fn set_caption_template(&self, chat_id: i64, template: Option<String>) {
        self.chats.write().entry(chat_id).or_default().caption_template = template;
    }

    pub fn set_thumbnail(&self, chat_id: i64, reference: Option<String>) {
        self.chats.write().entry(chat_id).or_default().thumbnail = reference;
    }
}

#[async_trait]
impl PreferenceStore for LocalPreferences {
    async fn template(&self, user_id: i64) -> Result<Option<String>> {
        Ok(self.user(user_id).template)
    }

    async fn extract_source(&self, user_id: i64) -> Result<ExtractSource> {
        Ok(self.user(user_id).extract_source)
    }

    async fn metadata_preference(&self, user_id: i64) -> Result<MetadataPreference> {
        Ok(self.user(user_id).metadata)
    }

    async fn media_preference(&self, user_id: i64) -> Result<Option<MediaKind>> {
        Ok(self.user(user_id).media_kind)
    }

    async fn caption_template(&self, chat_id: i64) -> Result<Option<String>> {
        Ok(self.chat(chat_id).caption_template)
    }

    async fn thumbnail(&self, chat_id: i64) -> Result<Option<String>> {
        Ok(self.chat(chat_id).thumbnail)
    }
}

#[async_trait]
impl PreferenceWriter for LocalPreferences {
    async fn set_template(&self, user_id: i64, template: String) -> Result<()> {
        self.users.write().entry(user_id).or_default().template = Some(template);
        Ok(())
    }

    async fn set_extract_source(&self, user_id: i64, source: ExtractSource) -> Result<()> {
        self.users.write().entry(user_id).or_default().extract_source = source;
        Ok(())
    }

    async fn current_extract_source(&self, user_id: i64) -> Result<ExtractSource> {
        Ok(self.user(user_id).extract_source)
    }
}

/// Guess the media kind from a file extension
pub fn media_kind_for(path: &Path) -> MediaKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Video
    } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Audio
    } else {
        MediaKind::Document
    }
}

/// Build an inbound file event for a local path
pub async fn inbound_from_path(
    path: &Path,
    user_id: i64,
    chat_id: i64,
    caption: Option<String>,
) -> Result<InboundFile> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Cannot read {}", path.display()))?;
    if !metadata.is_file() {
        anyhow::bail!("{} is not a file", path.display());
    }
    let absolute = tokio::fs::canonicalize(path).await?;

    Ok(InboundFile {
        file_id: absolute.to_string_lossy().into_owned(),
        user_id,
        chat_id,
        kind: media_kind_for(path),
        file_name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
        caption,
        file_size: metadata.len(),
        video_thumb: None,
    })
}
