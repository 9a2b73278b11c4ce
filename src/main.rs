//! autorename - rename, tag and republish media files
//!
//! Runs the pipeline over local files: each FILE is treated as an inbound file
//! event from user 0 in chat 0, and published into the outbox directory.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{error, info, warn};

use autorename::cli::{CliOptions, USAGE};
use autorename::config::Config;
use autorename::jobs::sweep_scratch;
use autorename::services::commands::{self, BotCommand};
use autorename::services::local::inbound_from_path;
use autorename::services::{
    ConcurrencyGuard, FfmpegService, LocalMessagingClient, LocalPreferences, MetadataPreference,
    PipelineConfig, PipelineOrchestrator, ProcessOutcome, init_tracing,
};

const LOCAL_USER: i64 = 0;
const LOCAL_CHAT: i64 = 0;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let options = CliOptions::from_args()?;

    if options.help {
        println!("{}", USAGE);
        return Ok(());
    }
    if options.files.is_empty() {
        eprintln!("{}", USAGE);
        bail!("No input files");
    }

    init_tracing(config.log_format)?;
    info!("Starting autorename");

    if let Err(e) = sweep_scratch(
        vec![config.downloads_path.clone(), config.metadata_path.clone()],
        config.scratch_max_age,
    )
    .await
    {
        warn!(error = %e, "Scratch cleanup failed");
    }

    let preferences = Arc::new(LocalPreferences::new());
    apply_preferences(&config, &options, &preferences).await?;

    let ffmpeg = FfmpegService::with_paths(
        config.ffmpeg_path.clone(),
        config.ffprobe_path.clone(),
        config.tag_timeout,
    )
    .with_probe_timeout(config.probe_timeout);
    if !ffmpeg.is_available().await {
        warn!(ffmpeg = %config.ffmpeg_path, "ffmpeg not found, metadata tagging will fail");
    }

    let outbox = options.outbox.clone().unwrap_or_else(|| config.outbox_path.clone());
    tokio::fs::create_dir_all(&outbox)
        .await
        .with_context(|| format!("Failed to create outbox {}", outbox.display()))?;

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        PipelineConfig {
            downloads_dir: config.downloads_path.clone(),
            metadata_dir: config.metadata_path.clone(),
            progress_interval: config.progress_interval,
        },
        Arc::new(LocalMessagingClient::new(outbox)),
        preferences,
        Arc::new(ffmpeg),
        Arc::new(ConcurrencyGuard::new(config.dedup_window)),
    ));

    let mut handles = Vec::new();
    for path in &options.files {
        match inbound_from_path(path, LOCAL_USER, LOCAL_CHAT, options.caption.clone()).await {
            Ok(file) => handles.push(orchestrator.spawn(file)),
            Err(e) => error!(path = %path.display(), error = %e, "Skipping input"),
        }
    }

    let total = options.files.len();
    let mut done = 0;
    for handle in handles {
        match handle.await {
            Ok(ProcessOutcome::Finished(report)) => match &report.result {
                Ok(_) => done += 1,
                Err(e) => error!(file_id = %report.file_id, error = %e, "File failed"),
            },
            Ok(ProcessOutcome::Duplicate) => done += 1,
            Ok(ProcessOutcome::MissingTemplate) => {
                error!("No rename template set, use --template or RENAME_TEMPLATE");
            }
            Ok(ProcessOutcome::Rejected(e)) => error!(error = %e, "File rejected"),
            Err(e) => error!(error = %e, "Pipeline task panicked"),
        }
    }

    info!(done = done, total = total, "Finished");
    if done < total {
        bail!("{} of {} files failed", total - done, total);
    }
    Ok(())
}

/// Seed the in-memory store from the environment, with CLI flags taking precedence
async fn apply_preferences(
    config: &Config,
    options: &CliOptions,
    preferences: &LocalPreferences,
) -> Result<()> {
    if let Some(template) = options.template.clone().or_else(|| config.rename_template.clone()) {
        let reply = commands::execute(BotCommand::AutoRename(template), LOCAL_USER, preferences).await?;
        info!("{}", reply);
    }

    let source = options.source.unwrap_or(config.extract_source);
    commands::execute(BotCommand::Source(Some(source)), LOCAL_USER, preferences).await?;

    if let Some(text) = options.metadata.clone().or_else(|| config.metadata_text.clone()) {
        preferences.set_metadata(
            LOCAL_USER,
            MetadataPreference {
                enabled: true,
                tag_text: Some(text),
            },
        );
    }

    preferences.set_media_preference(LOCAL_USER, options.kind);
    preferences.set_caption_template(
        LOCAL_CHAT,
        options
            .caption_template
            .clone()
            .or_else(|| config.caption_template.clone()),
    );
    preferences.set_thumbnail(
        LOCAL_CHAT,
        options
            .thumbnail
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
    );

    Ok(())
}
