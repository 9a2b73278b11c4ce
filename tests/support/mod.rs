//! In-memory collaborators with failure injection

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Barrier;

use autorename::services::collaborators::{
    ExtractSource, InboundFile, MediaKind, MessagingClient, MetadataPreference, PreferenceStore,
    ProgressCallback, PublishAck, PublishRequest, StatusHandle,
};
use autorename::services::ffmpeg::{MetadataTransform, TagError};
use autorename::services::{ConcurrencyGuard, PipelineConfig, PipelineOrchestrator};

pub const MEDIA_BYTES: &[u8] = b"not really a matroska file";

/// Which transport call should fail
#[derive(Debug, Default, Clone, Copy)]
pub struct Failures {
    pub acquire: bool,
    /// Report a downloaded path that does not exist
    pub lose_download: bool,
    pub thumbnail: bool,
    pub publish: bool,
    pub status: bool,
}

#[derive(Debug, Clone)]
pub struct Published {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub caption: String,
    pub thumbnail: Option<PathBuf>,
    pub duration_secs: u64,
    pub bytes: Vec<u8>,
}

/// Messaging transport that writes fixed bytes and records every call
#[derive(Default)]
pub struct FakeMessaging {
    pub failures: Failures,
    pub publish_gate: Option<Arc<Barrier>>,
    /// Stall every media download this long
    pub acquire_delay: Option<Duration>,
    pub published: Mutex<Vec<Published>>,
    pub status_texts: Mutex<Vec<String>>,
    pub acquire_calls: AtomicUsize,
}

impl FakeMessaging {
    pub fn new(failures: Failures) -> Self {
        Self {
            failures,
            ..Default::default()
        }
    }

    pub fn statuses(&self) -> Vec<String> {
        self.status_texts.lock().clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl MessagingClient for FakeMessaging {
    async fn acquire_bytes(
        &self,
        reference: &str,
        dest: &Path,
        on_progress: ProgressCallback,
    ) -> Result<PathBuf> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        let is_thumb = reference.starts_with("thumb:");

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if !is_thumb && let Some(delay) = self.acquire_delay {
            tokio::time::sleep(delay).await;
        }

        if (is_thumb && self.failures.thumbnail) || (!is_thumb && self.failures.acquire) {
            // leave a partial file behind, like an interrupted transfer
            tokio::fs::write(dest, &MEDIA_BYTES[..4]).await?;
            bail!("connection reset while fetching {}", reference);
        }

        tokio::fs::write(dest, MEDIA_BYTES).await?;
        let total = MEDIA_BYTES.len() as u64;
        on_progress(total / 2, total);
        on_progress(total, total);
        if !is_thumb && self.failures.lose_download {
            return Ok(dest.with_extension("moved"));
        }
        Ok(dest.to_path_buf())
    }

    async fn publish(
        &self,
        request: PublishRequest<'_>,
        on_progress: ProgressCallback,
    ) -> Result<PublishAck> {
        if let Some(gate) = &self.publish_gate {
            gate.wait().await;
        }

        let bytes = tokio::fs::read(request.path).await?;
        on_progress(bytes.len() as u64, bytes.len() as u64);
        if let Some(thumb) = request.thumbnail {
            assert!(thumb.exists(), "thumbnail missing at publish time");
        }

        if self.failures.publish {
            bail!("upload rejected: file too large");
        }

        let mut published = self.published.lock();
        published.push(Published {
            path: request.path.to_path_buf(),
            kind: request.kind,
            caption: request.caption.to_string(),
            thumbnail: request.thumbnail.map(Path::to_path_buf),
            duration_secs: request.duration_secs,
            bytes,
        });
        Ok(PublishAck {
            message_id: format!("msg-{}", published.len()),
        })
    }

    async fn reply(&self, chat_id: i64, text: &str) -> Result<StatusHandle> {
        if self.failures.status {
            bail!("chat unavailable");
        }
        self.status_texts.lock().push(text.to_string());
        Ok(StatusHandle {
            chat_id,
            message_id: "status-1".to_string(),
        })
    }

    async fn edit(&self, _handle: &StatusHandle, text: &str) -> Result<()> {
        self.status_texts.lock().push(text.to_string());
        Ok(())
    }
}

/// Preference store with fixed answers
#[derive(Debug, Clone, Default)]
pub struct FakePreferences {
    pub template: Option<String>,
    pub extract_source: ExtractSource,
    pub metadata: MetadataPreference,
    pub media_kind: Option<MediaKind>,
    pub caption_template: Option<String>,
    pub thumbnail: Option<String>,
    pub unavailable: bool,
}

impl FakePreferences {
    pub fn with_template(template: &str) -> Self {
        Self {
            template: Some(template.to_string()),
            ..Default::default()
        }
    }

    pub fn tagging(mut self, text: &str) -> Self {
        self.metadata = MetadataPreference {
            enabled: true,
            tag_text: Some(text.to_string()),
        };
        self
    }

    fn check(&self) -> Result<()> {
        if self.unavailable {
            bail!("preference database unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for FakePreferences {
    async fn template(&self, _user_id: i64) -> Result<Option<String>> {
        self.check()?;
        Ok(self.template.clone())
    }

    async fn extract_source(&self, _user_id: i64) -> Result<ExtractSource> {
        self.check()?;
        Ok(self.extract_source)
    }

    async fn metadata_preference(&self, _user_id: i64) -> Result<MetadataPreference> {
        self.check()?;
        Ok(self.metadata.clone())
    }

    async fn media_preference(&self, _user_id: i64) -> Result<Option<MediaKind>> {
        self.check()?;
        Ok(self.media_kind)
    }

    async fn caption_template(&self, _chat_id: i64) -> Result<Option<String>> {
        self.check()?;
        Ok(self.caption_template.clone())
    }

    async fn thumbnail(&self, _chat_id: i64) -> Result<Option<String>> {
        self.check()?;
        Ok(self.thumbnail.clone())
    }
}

/// Tagger that copies input to output, optionally failing after writing
#[derive(Default)]
pub struct FakeTagger {
    pub fail: bool,
    pub duration: Option<f64>,
    pub calls: AtomicUsize,
}

impl FakeTagger {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl MetadataTransform for FakeTagger {
    async fn tag(&self, input: &Path, output: &Path, _text: &str) -> Result<(), TagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::copy(input, output)
            .await
            .map_err(|source| TagError::Spawn {
                program: "fake-ffmpeg".to_string(),
                source,
            })?;
        if self.fail {
            return Err(TagError::Exit {
                code: "1".to_string(),
                stderr: "Invalid data found when processing input".to_string(),
            });
        }
        Ok(())
    }

    async fn probe_duration(&self, _path: &Path) -> Option<f64> {
        self.duration
    }
}

/// Orchestrator wired to fakes over a fresh scratch directory
pub struct Harness {
    pub dir: TempDir,
    pub messaging: Arc<FakeMessaging>,
    pub tagger: Arc<FakeTagger>,
    pub guard: Arc<ConcurrencyGuard>,
    pub orchestrator: Arc<PipelineOrchestrator>,
}

impl Harness {
    pub fn new(messaging: FakeMessaging, preferences: FakePreferences, tagger: FakeTagger) -> Self {
        Self::with_window(messaging, preferences, tagger, Duration::from_secs(10))
    }

    pub fn with_window(
        messaging: FakeMessaging,
        preferences: FakePreferences,
        tagger: FakeTagger,
        window: Duration,
    ) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let messaging = Arc::new(messaging);
        let tagger = Arc::new(tagger);
        let guard = Arc::new(ConcurrencyGuard::new(window));

        let orchestrator = Arc::new(PipelineOrchestrator::new(
            PipelineConfig {
                downloads_dir: dir.path().join("downloads"),
                metadata_dir: dir.path().join("Metadata"),
                progress_interval: Duration::from_secs(10),
            },
            messaging.clone(),
            Arc::new(preferences),
            tagger.clone(),
            guard.clone(),
        ));

        Self {
            dir,
            messaging,
            tagger,
            guard,
            orchestrator,
        }
    }

    /// Every file left under the scratch roots
    pub fn scratch_files(&self) -> Vec<PathBuf> {
        walkdir::WalkDir::new(self.dir.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    }
}

pub fn inbound(file_id: &str, name: &str) -> InboundFile {
    InboundFile {
        file_id: file_id.to_string(),
        user_id: 42,
        chat_id: 7,
        kind: MediaKind::Video,
        file_name: Some(name.to_string()),
        caption: None,
        file_size: MEDIA_BYTES.len() as u64,
        video_thumb: None,
    }
}
