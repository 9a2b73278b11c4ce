//! User preference commands
//!
//! `/autorename <template>` stores the rename template and `/source [caption|filename]`
//! picks where file info is extracted from. Commands are parsed into
//! [`BotCommand`] and applied through a [`PreferenceWriter`].

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::services::collaborators::ExtractSource;
use crate::services::template::RENAME_PLACEHOLDERS;

/// Reply sent when a file arrives before the user has set a template
pub const MISSING_TEMPLATE_MESSAGE: &str = "Please set an auto rename format using /autorename";

/// A parsed preference command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// Store a rename template
    AutoRename(String),
    /// Show the current extract source, or set a new one
    Source(Option<ExtractSource>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("{0}")]
    Usage(String),

    #[error("unknown source '{0}', expected 'caption' or 'filename'")]
    InvalidSource(String),
}

/// Write side of the preference store
#[async_trait]
pub trait PreferenceWriter: Send + Sync {
    async fn set_template(&self, user_id: i64, template: String) -> Result<()>;

    async fn set_extract_source(&self, user_id: i64, source: ExtractSource) -> Result<()>;

    async fn current_extract_source(&self, user_id: i64) -> Result<ExtractSource>;
}

/// Help text for `/autorename`
pub fn autorename_usage() -> String {
    let mut text = String::from("Usage: /autorename <template>\n\nAvailable placeholders:\n");
    for placeholder in RENAME_PLACEHOLDERS {
        text.push_str("  ");
        text.push_str(placeholder);
        text.push('\n');
    }
    text.push_str("\nExample: /autorename S{season}E{episode} {title} [{audio}] {resolution}");
    text
}

fn source_label(source: ExtractSource) -> &'static str {
    match source {
        ExtractSource::Caption => "Extract from Caption",
        ExtractSource::Filename => "Extract from Filename",
    }
}

/// Text describing the extract source choice
pub fn source_menu(current: ExtractSource) -> String {
    format!(
        "Select Source for Information Extraction\n\n\
         Caption: Uses file caption for extraction\n\
         Filename: Uses filename for extraction\n\n\
         Current Source: {}",
        source_label(current)
    )
}

/// Parse a command message
pub fn parse_command(text: &str) -> Result<BotCommand, CommandError> {
    let text = text.trim();
    let (name, rest) = match text.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (text, ""),
    };
    // `/cmd@botname` addresses a specific bot
    let name = name.split('@').next().unwrap_or(name);

    match name {
        "/autorename" => {
            if rest.is_empty() {
                Err(CommandError::Usage(autorename_usage()))
            } else {
                Ok(BotCommand::AutoRename(rest.to_string()))
            }
        }
        "/source" => {
            if rest.is_empty() {
                Ok(BotCommand::Source(None))
            } else {
                ExtractSource::from_arg(rest)
                    .map(|source| BotCommand::Source(Some(source)))
                    .ok_or_else(|| CommandError::InvalidSource(rest.to_string()))
            }
        }
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

/// Apply a command and return the reply text
pub async fn execute(
    command: BotCommand,
    user_id: i64,
    writer: &dyn PreferenceWriter,
) -> Result<String> {
    match command {
        BotCommand::AutoRename(template) => {
            info!(user_id = user_id, template = %template, "Rename template set");
            let reply = format!("Your auto rename format has been set to:\n{}", template);
            writer.set_template(user_id, template).await?;
            Ok(reply)
        }
        BotCommand::Source(Some(source)) => {
            writer.set_extract_source(user_id, source).await?;
            info!(user_id = user_id, source = source.as_str(), "Extract source set");
            Ok(format!("Source changed to: {}", source_label(source)))
        }
        BotCommand::Source(None) => {
            let current = writer.current_extract_source(user_id).await?;
            Ok(source_menu(current))
        }
    }
}
