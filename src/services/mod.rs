//! Pipeline services and their collaborators

pub mod collaborators;
pub mod commands;
pub mod ffmpeg;
pub mod file_utils;
pub mod filename_parser;
pub mod guard;
pub mod local;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod template;

pub use collaborators::{
    ExtractSource, InboundFile, MediaKind, MessagingClient, MetadataPreference, PreferenceStore,
    ProgressCallback, PublishAck, PublishRequest, StatusHandle,
};
pub use commands::{BotCommand, CommandError, PreferenceWriter};
pub use ffmpeg::{FfmpegService, MetadataTransform, TagError};
pub use filename_parser::{AudioType, FileInfo};
pub use guard::{Admission, ConcurrencyGuard};
pub use local::{LocalMessagingClient, LocalPreferences};
pub use logging::{LogFormat, init_tracing};
pub use pipeline::{
    Operation, OperationReport, PipelineConfig, PipelineError, PipelineOrchestrator,
    PipelineState, ProcessOutcome,
};
pub use progress::{ProgressReporter, ProgressSink, TransferPhase};
