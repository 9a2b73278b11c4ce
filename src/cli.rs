//! Minimal CLI parsing

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use crate::services::collaborators::{ExtractSource, MediaKind};

pub const USAGE: &str = "\
Usage: autorename [OPTIONS] FILE...

Options:
  --template <TEMPLATE>          Rename template, e.g. \"S{season}E{episode} {title} {resolution}\"
  --caption-template <TEMPLATE>  Caption template using {filename}, {filesize}, {duration}
  --source <caption|filename>    Where to extract file info from
  --caption <TEXT>               Caption attached to every input file
  --metadata <TEXT>              Embed TEXT as title/author metadata
  --kind <document|video|audio>  Publish every file as this kind
  --thumbnail <PATH>             Thumbnail to publish with every file
  --outbox <DIR>                 Directory files are published to
  -h, --help                     Print this help";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub template: Option<String>,
    pub caption_template: Option<String>,
    pub source: Option<ExtractSource>,
    pub caption: Option<String>,
    pub metadata: Option<String>,
    pub kind: Option<MediaKind>,
    pub thumbnail: Option<PathBuf>,
    pub outbox: Option<PathBuf>,
    pub help: bool,
    pub files: Vec<PathBuf>,
}

impl CliOptions {
    pub fn from_args() -> Result<Self> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = CliOptions::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            if arg == "-h" || arg == "--help" {
                options.help = true;
                continue;
            }
            if arg == "--" {
                options.files.extend(args.by_ref().map(PathBuf::from));
                break;
            }
            if !arg.starts_with("--") {
                options.files.push(PathBuf::from(arg));
                continue;
            }

            let (flag, value) = match arg.split_once('=') {
                Some((flag, value)) => (flag.to_string(), value.to_string()),
                None => {
                    let value = args
                        .next()
                        .with_context(|| format!("Missing value for {}", arg))?;
                    (arg, value)
                }
            };

            match flag.as_str() {
                "--template" => options.template = Some(value),
                "--caption-template" => options.caption_template = Some(value),
                "--source" => {
                    options.source = Some(
                        ExtractSource::from_arg(&value)
                            .with_context(|| format!("Invalid --source: {}", value))?,
                    )
                }
                "--caption" => options.caption = Some(value),
                "--metadata" => options.metadata = Some(value),
                "--kind" => {
                    options.kind = Some(
                        MediaKind::from_arg(&value)
                            .with_context(|| format!("Invalid --kind: {}", value))?,
                    )
                }
                "--thumbnail" => options.thumbnail = Some(PathBuf::from(value)),
                "--outbox" => options.outbox = Some(PathBuf::from(value)),
                other => bail!("Unknown option: {}", other),
            }
        }

        Ok(options)
    }
}
