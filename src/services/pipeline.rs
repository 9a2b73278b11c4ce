//! Per-file processing pipeline
//!
//! Drives one inbound file through
//! `Admitted -> Downloading -> Renamed -> [Tagging] -> Publishing -> CleaningUp -> Done`,
//! with any stage failure short-circuiting to `CleaningUp -> Failed`.
//!
//! Every stage returns a typed [`PipelineError`]; nothing unwinds across stage
//! boundaries. Whatever the outcome, the operation ends in exactly one cleanup
//! pass that attempts to remove every scratch artifact it registered, then releases
//! its dedup entry and its reserved target name. A failing file never takes the
//! orchestrator down with it.
//!
//! A file identifier with a live operation is never admitted again, however long
//! that operation runs past the dedup window.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::collaborators::{
    ExtractSource, InboundFile, MediaKind, MessagingClient, MetadataPreference, PreferenceStore,
    ProgressCallback, PublishAck, PublishRequest, StatusHandle,
};
use crate::services::commands::MISSING_TEMPLATE_MESSAGE;
use crate::services::ffmpeg::MetadataTransform;
use crate::services::file_utils::known_extension;
use crate::services::filename_parser::{FileInfo, extract};
use crate::services::guard::{Admission, ConcurrencyGuard};
use crate::services::progress::{
    DEFAULT_SAMPLE_INTERVAL, ProgressReporter, ProgressSink, StatusMessageSink, TransferPhase,
};
use crate::services::template::{render_caption, render_filename};

/// Terminal failure of one operation. The `Display` text is what the user sees.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Preference Error: {message}")]
    Preferences { message: String },

    #[error("Download Error: {message}")]
    Acquire { message: String },

    #[error("Rename Error: {source}")]
    Rename {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Metadata Error:\n{diagnostic}")]
    MetadataTag { diagnostic: String },

    #[error("Upload Error: {message}")]
    Publish { message: String },
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Preferences { .. } => "preferences",
            PipelineError::Acquire { .. } => "acquire",
            PipelineError::Rename { .. } => "rename",
            PipelineError::MetadataTag { .. } => "metadata_tag",
            PipelineError::Publish { .. } => "publish",
        }
    }
}

/// Where an operation is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Admitted,
    Downloading,
    Renamed,
    Tagging,
    Publishing,
    CleaningUp,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Admitted => "admitted",
            PipelineState::Downloading => "downloading",
            PipelineState::Renamed => "renamed",
            PipelineState::Tagging => "tagging",
            PipelineState::Publishing => "publishing",
            PipelineState::CleaningUp => "cleaning_up",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    /// Whether `next` may follow `self`
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Admitted, Downloading) => true,
            (Downloading, Renamed) => true,
            (Renamed, Tagging) | (Renamed, Publishing) => true,
            (Tagging, Publishing) => true,
            // every non-terminal state can bail out into cleanup
            (Admitted | Downloading | Renamed | Tagging | Publishing, CleaningUp) => true,
            (CleaningUp, Done) | (CleaningUp, Failed) => true,
            _ => false,
        }
    }
}

/// Live operation, one per admitted file identifier
#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    pub id: Uuid,
    pub file_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub admitted_at: OffsetDateTime,
    pub state: PipelineState,
}

/// Result of a finished operation
#[derive(Debug)]
pub struct OperationReport {
    pub operation_id: Uuid,
    pub file_id: String,
    pub target_name: String,
    pub info: FileInfo,
    /// Every state the operation passed through, in order
    pub history: Vec<PipelineState>,
    pub result: Result<PublishAck, PipelineError>,
}

impl OperationReport {
    pub fn state(&self) -> PipelineState {
        self.history
            .last()
            .copied()
            .unwrap_or(PipelineState::Admitted)
    }
}

/// What happened to one inbound file event
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Same file identifier was admitted within the dedup window
    Duplicate,
    /// The user has no rename template; a usage reply was sent
    MissingTemplate,
    /// Preferences could not be loaded; nothing was admitted
    Rejected(PipelineError),
    Finished(OperationReport),
}

impl ProcessOutcome {
    pub fn report(&self) -> Option<&OperationReport> {
        match self {
            ProcessOutcome::Finished(report) => Some(report),
            _ => None,
        }
    }
}

/// Scratch locations and timing for the pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Working copies
    pub downloads_dir: PathBuf,
    /// Tagged copies
    pub metadata_dir: PathBuf,
    pub progress_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("downloads"),
            metadata_dir: PathBuf::from("Metadata"),
            progress_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

/// Preferences snapshot taken before admission
#[derive(Debug, Clone)]
struct UserPreferences {
    template: Option<String>,
    extract_source: ExtractSource,
    metadata: MetadataPreference,
    media_kind: Option<MediaKind>,
    caption_template: Option<String>,
    thumbnail: Option<String>,
}

/// Mutable per-operation bookkeeping
struct OperationContext {
    id: Uuid,
    file_id: String,
    admission: Admission,
    /// Rendered name before any ` (n)` suffix
    requested_name: String,
    target_name: String,
    history: Vec<PipelineState>,
    artifacts: Vec<PathBuf>,
    status: Option<StatusHandle>,
    reporter: Arc<ProgressReporter>,
}

impl OperationContext {
    fn state(&self) -> PipelineState {
        self.history
            .last()
            .copied()
            .unwrap_or(PipelineState::Admitted)
    }

    /// Remember a scratch path for the final cleanup pass
    fn register(&mut self, path: &Path) {
        if !self.artifacts.iter().any(|p| p == path) {
            self.artifacts.push(path.to_path_buf());
        }
    }
}

/// Drives inbound files through the pipeline
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    messaging: Arc<dyn MessagingClient>,
    preferences: Arc<dyn PreferenceStore>,
    transform: Arc<dyn MetadataTransform>,
    guard: Arc<ConcurrencyGuard>,
    operations: Mutex<HashMap<String, Operation>>,
    targets: Mutex<HashSet<String>>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        messaging: Arc<dyn MessagingClient>,
        preferences: Arc<dyn PreferenceStore>,
        transform: Arc<dyn MetadataTransform>,
        guard: Arc<ConcurrencyGuard>,
    ) -> Self {
        Self {
            config,
            messaging,
            preferences,
            transform,
            guard,
            operations: Mutex::new(HashMap::new()),
            targets: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Snapshot of live operations
    pub fn operations(&self) -> Vec<Operation> {
        self.operations.lock().values().cloned().collect()
    }

    /// Process a file on its own task
    pub fn spawn(self: &Arc<Self>, file: InboundFile) -> JoinHandle<ProcessOutcome> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.process(file).await })
    }

    /// Process one inbound file event end to end
    pub async fn process(&self, file: InboundFile) -> ProcessOutcome {
        let prefs = match self.load_preferences(&file).await {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!(file_id = %file.file_id, error = %e, "Failed to load preferences");
                return ProcessOutcome::Rejected(e);
            }
        };

        let Some(template) = prefs.template.clone() else {
            if let Err(e) = self.messaging.reply(file.chat_id, MISSING_TEMPLATE_MESSAGE).await {
                debug!(file_id = %file.file_id, error = %e, "Failed to send usage reply");
            }
            return ProcessOutcome::MissingTemplate;
        };

        let Some((id, admission)) = self.admit(&file.file_id) else {
            return ProcessOutcome::Duplicate;
        };

        let info = extract(&file.extraction_text(prefs.extract_source));
        let requested_name = self.target_name(&file, &template, &info);
        let target_name = self.reserve_target(&requested_name, &HashSet::new());

        info!(
            operation_id = %id,
            file_id = %file.file_id,
            target = %target_name,
            "Operation admitted"
        );

        let mut ctx = OperationContext {
            id,
            file_id: file.file_id.clone(),
            admission,
            requested_name,
            target_name,
            history: vec![PipelineState::Admitted],
            artifacts: Vec::new(),
            status: None,
            reporter: Arc::new(ProgressReporter::new(self.config.progress_interval)),
        };

        let result = self.run_stages(&file, &prefs, &mut ctx).await;
        self.finish(&mut ctx, &result).await;

        ProcessOutcome::Finished(OperationReport {
            operation_id: ctx.id,
            file_id: ctx.file_id,
            target_name: ctx.target_name,
            info,
            history: ctx.history,
            result,
        })
    }

    /// Check the operation table and the guard under one lock, so a file whose
    /// operation is still running stays a duplicate after its window expires
    fn admit(&self, file_id: &str) -> Option<(Uuid, Admission)> {
        let mut operations = self.operations.lock();
        if operations.contains_key(file_id) {
            debug!(file_id = file_id, "Operation still running, dropping file event");
            return None;
        }

        let admission = self.guard.try_admit(file_id)?;
        let id = Uuid::new_v4();
        operations.insert(
            file_id.to_string(),
            Operation {
                id,
                file_id: file_id.to_string(),
                admitted_at: OffsetDateTime::now_utc(),
                state: PipelineState::Admitted,
            },
        );
        Some((id, admission))
    }

    async fn load_preferences(&self, file: &InboundFile) -> Result<UserPreferences, PipelineError> {
        let store = &self.preferences;
        let wrap = |e: anyhow::Error| PipelineError::Preferences {
            message: format!("{:#}", e),
        };

        Ok(UserPreferences {
            template: store
                .template(file.user_id)
                .await
                .map_err(wrap)?
                .filter(|t| !t.trim().is_empty()),
            extract_source: store.extract_source(file.user_id).await.map_err(wrap)?,
            metadata: store.metadata_preference(file.user_id).await.map_err(wrap)?,
            media_kind: store.media_preference(file.user_id).await.map_err(wrap)?,
            caption_template: store.caption_template(file.chat_id).await.map_err(wrap)?,
            thumbnail: store.thumbnail(file.chat_id).await.map_err(wrap)?,
        })
    }

    /// Rendered filename, falling back to the file identifier when the template
    /// renders to nothing
    fn target_name(&self, file: &InboundFile, template: &str, info: &FileInfo) -> String {
        let extension = known_extension(&file.source_name());
        let name = render_filename(template, info, extension.as_deref());
        let stem_empty = match &extension {
            Some(ext) => name.len() <= ext.len(),
            None => name.is_empty(),
        };
        if stem_empty {
            format!("{}{}", file.file_id, extension.unwrap_or_default())
        } else {
            name
        }
    }

    /// Claim a target name for this operation, suffixing ` (2)`, ` (3)`, ... when
    /// a live operation already holds it or it is in `skip`
    fn reserve_target(&self, name: &str, skip: &HashSet<String>) -> String {
        let mut targets = self.targets.lock();
        if !skip.contains(name) && targets.insert(name.to_string()) {
            return name.to_string();
        }

        let extension = known_extension(name).unwrap_or_default();
        let stem = &name[..name.len() - extension.len()];
        let mut n = 2;
        loop {
            let candidate = format!("{} ({}){}", stem, n, extension);
            if !skip.contains(&candidate) && targets.insert(candidate.clone()) {
                debug!(requested = name, reserved = %candidate, "Target name in use, disambiguated");
                return candidate;
            }
            n += 1;
        }
    }

    /// Whether a file already sits at the target name in either scratch directory
    async fn target_on_disk(&self, name: &str) -> bool {
        for dir in [&self.config.downloads_dir, &self.config.metadata_dir] {
            if tokio::fs::try_exists(dir.join(name)).await.unwrap_or(false) {
                return true;
            }
        }
        false
    }

    /// Move the reservation off names that exist on disk but belong to no live
    /// operation, so the rename never replaces a file this operation does not own
    async fn claim_free_target(&self, ctx: &mut OperationContext) {
        let mut on_disk = HashSet::new();
        while self.target_on_disk(&ctx.target_name).await {
            on_disk.insert(ctx.target_name.clone());
            let next = self.reserve_target(&ctx.requested_name, &on_disk);
            warn!(
                operation_id = %ctx.id,
                existing = %ctx.target_name,
                reserved = %next,
                "Target already exists on disk, disambiguated"
            );
            self.targets.lock().remove(&ctx.target_name);
            ctx.target_name = next;
        }
    }

    fn transition(&self, ctx: &mut OperationContext, next: PipelineState) {
        let current = ctx.state();
        if !current.can_transition_to(next) {
            warn!(
                operation_id = %ctx.id,
                from = current.as_str(),
                to = next.as_str(),
                "Unexpected pipeline transition"
            );
        }
        ctx.history.push(next);
        if let Some(op) = self.operations.lock().get_mut(&ctx.file_id)
            && op.id == ctx.id
        {
            op.state = next;
        }
        debug!(operation_id = %ctx.id, state = next.as_str(), "Pipeline state changed");
    }

    /// Best-effort status message edit
    async fn set_status(&self, ctx: &OperationContext, text: &str) {
        let Some(handle) = &ctx.status else {
            return;
        };
        if let Err(e) = self.messaging.edit(handle, text).await {
            debug!(operation_id = %ctx.id, error = %e, "Failed to update status message");
        }
    }

    fn progress_callback(&self, ctx: &OperationContext, phase: TransferPhase) -> ProgressCallback {
        ctx.reporter.start_phase(phase);
        match &ctx.status {
            Some(handle) => {
                let sink: Arc<dyn ProgressSink> = Arc::new(StatusMessageSink::new(
                    Arc::clone(&self.messaging),
                    handle.clone(),
                ));
                ctx.reporter.callback(phase, sink)
            }
            None => Arc::new(|_, _| {}),
        }
    }

    async fn run_stages(
        &self,
        file: &InboundFile,
        prefs: &UserPreferences,
        ctx: &mut OperationContext,
    ) -> Result<PublishAck, PipelineError> {
        let working = self.acquire(file, ctx).await?;
        let source = self.tag(&working, prefs, ctx).await?;
        self.publish(file, prefs, &source, ctx).await
    }

    /// Downloading -> Renamed
    async fn acquire(&self, file: &InboundFile, ctx: &mut OperationContext) -> Result<PathBuf, PipelineError> {
        self.transition(ctx, PipelineState::Downloading);

        match self.messaging.reply(file.chat_id, "Downloading the file...").await {
            Ok(handle) => ctx.status = Some(handle),
            Err(e) => debug!(operation_id = %ctx.id, error = %e, "Failed to send status message"),
        }

        for dir in [&self.config.downloads_dir, &self.config.metadata_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| PipelineError::Acquire {
                    message: format!("failed to create {}: {}", dir.display(), e),
                })?;
        }

        // Download under an operation-unique name so a partial file never sits at
        // the final path
        let partial = self.config.downloads_dir.join(format!(".{}.part", ctx.id));
        ctx.register(&partial);

        let on_progress = self.progress_callback(ctx, TransferPhase::Download);
        let acquired = self
            .messaging
            .acquire_bytes(&file.file_id, &partial, on_progress)
            .await
            .map_err(|e| PipelineError::Acquire {
                message: format!("{:#}", e),
            })?;
        ctx.register(&acquired);

        self.set_status(ctx, "Renaming and Adding Metadata...").await;

        self.claim_free_target(ctx).await;
        let working = self.config.downloads_dir.join(&ctx.target_name);
        ctx.register(&working);
        tokio::fs::rename(&acquired, &working)
            .await
            .map_err(|source| PipelineError::Rename {
                path: working.clone(),
                source,
            })?;

        self.transition(ctx, PipelineState::Renamed);
        Ok(working)
    }

    /// Renamed -> Tagging, when the user has tagging on. Returns the publish source.
    async fn tag(
        &self,
        working: &Path,
        prefs: &UserPreferences,
        ctx: &mut OperationContext,
    ) -> Result<PathBuf, PipelineError> {
        let Some(text) = prefs.metadata.effective_text() else {
            return Ok(working.to_path_buf());
        };

        self.transition(ctx, PipelineState::Tagging);
        let tagged = self.config.metadata_dir.join(&ctx.target_name);
        ctx.register(&tagged);

        self.transform
            .tag(working, &tagged, text)
            .await
            .map_err(|e| PipelineError::MetadataTag {
                diagnostic: e.to_string(),
            })?;

        Ok(tagged)
    }

    /// -> Publishing
    async fn publish(
        &self,
        file: &InboundFile,
        prefs: &UserPreferences,
        source: &Path,
        ctx: &mut OperationContext,
    ) -> Result<PublishAck, PipelineError> {
        self.transition(ctx, PipelineState::Publishing);
        self.set_status(ctx, "Uploading the file...").await;

        let kind = prefs.media_kind.unwrap_or(file.kind);
        let thumbnail = self.fetch_thumbnail(file, prefs, ctx).await;

        let duration_secs = match kind {
            MediaKind::Video | MediaKind::Audio => self
                .transform
                .probe_duration(source)
                .await
                .map(|d| d.round() as u64)
                .unwrap_or(0),
            MediaKind::Document => 0,
        };
        let caption = render_caption(
            prefs.caption_template.as_deref(),
            &ctx.target_name,
            file.file_size,
            duration_secs,
        );

        let on_progress = self.progress_callback(ctx, TransferPhase::Upload);
        let request = PublishRequest {
            chat_id: file.chat_id,
            kind,
            path: source,
            caption: &caption,
            thumbnail: thumbnail.as_deref(),
            duration_secs,
        };

        self.messaging
            .publish(request, on_progress)
            .await
            .map_err(|e| PipelineError::Publish {
                message: format!("{:#}", e),
            })
    }

    /// Chat thumbnail, else the video's own thumbnail. Failure publishes without one.
    async fn fetch_thumbnail(
        &self,
        file: &InboundFile,
        prefs: &UserPreferences,
        ctx: &mut OperationContext,
    ) -> Option<PathBuf> {
        let reference = prefs.thumbnail.clone().or_else(|| match file.kind {
            MediaKind::Video => file.video_thumb.clone(),
            _ => None,
        })?;

        let dest = self.config.downloads_dir.join(format!(".{}.thumb.jpg", ctx.id));
        ctx.register(&dest);

        match self
            .messaging
            .acquire_bytes(&reference, &dest, Arc::new(|_, _| {}))
            .await
        {
            Ok(path) => {
                ctx.register(&path);
                Some(path)
            }
            Err(e) => {
                warn!(operation_id = %ctx.id, error = %e, "Failed to fetch thumbnail, publishing without one");
                None
            }
        }
    }

    /// The single exit of every operation
    async fn finish(&self, ctx: &mut OperationContext, result: &Result<PublishAck, PipelineError>) {
        // no progress edit may land after the final status text
        ctx.reporter.close().await;

        if let Err(e) = result {
            self.set_status(ctx, &e.to_string()).await;
        }

        self.transition(ctx, PipelineState::CleaningUp);
        for path in &ctx.artifacts {
            remove_artifact(path).await;
        }

        match result {
            Ok(_) => {
                self.transition(ctx, PipelineState::Done);
                info!(operation_id = %ctx.id, file = %ctx.target_name, "Operation done");
            }
            Err(e) => {
                self.transition(ctx, PipelineState::Failed);
                warn!(
                    operation_id = %ctx.id,
                    file_id = %ctx.file_id,
                    kind = e.kind(),
                    error = %e,
                    "Operation failed"
                );
            }
        }

        self.targets.lock().remove(&ctx.target_name);
        {
            let mut operations = self.operations.lock();
            if operations.get(&ctx.file_id).is_some_and(|op| op.id == ctx.id) {
                operations.remove(&ctx.file_id);
            }
        }
        self.guard.release(&ctx.file_id, ctx.admission);
    }
}

/// Remove one scratch file. Errors are logged, never returned.
async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed scratch file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove scratch file"),
    }
}
