//! Filename parser for release-style upload names
//!
//! Parses filenames and captions like:
//! - "Show.Name.S02E05.1080p.DUAL.mkv"
//! - "[Group] Show Name - EP07 [720p] [SUB].mp4"
//! - "Show Name S1 - EP12 4K Dual Audio"
//!
//! Extraction runs as an ordered list of steps over one working copy of the input.
//! Every step that matches cuts its span out of the working text before the next
//! step runs, so season/episode digits can never be re-read as a resolution or
//! end up in the title. Whatever is left after the last matcher is the title.

use std::fmt;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::services::file_utils::is_known_extension;

/// Audio track layout advertised in a filename
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioType {
    #[default]
    None,
    Sub,
    Dub,
    Dual,
}

impl AudioType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioType::None => "none",
            AudioType::Sub => "sub",
            AudioType::Dub => "dub",
            AudioType::Dual => "dual",
        }
    }

    /// Classify a matched audio span. DUAL wins over everything else, and a span
    /// advertising both SUB and DUB is a dual-audio release too.
    fn classify(span: &str) -> Self {
        let upper = span.to_uppercase();
        let has_sub = upper.contains("SUB");
        let has_dub = upper.contains("DUB");
        if upper.contains("DUAL") || (has_sub && has_dub) {
            AudioType::Dual
        } else if has_dub {
            AudioType::Dub
        } else if has_sub {
            AudioType::Sub
        } else {
            AudioType::None
        }
    }
}

impl fmt::Display for AudioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata extracted from one filename or caption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub title: String,
    pub season: String,
    pub episode: String,
    pub resolution: String,
    pub audio: AudioType,
}

impl Default for FileInfo {
    fn default() -> Self {
        Self {
            title: String::new(),
            season: "1".to_string(),
            episode: "1".to_string(),
            resolution: String::new(),
            audio: AudioType::None,
        }
    }
}

/// Field produced by one extraction step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionField {
    Extension,
    SeasonEpisode,
    /// Episode-only fallback, skipped when `SeasonEpisode` matched
    Episode,
    Resolution,
    Audio,
    Title,
}

/// What a step does to the working text once it has matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Cut the matched span out
    MatchedSpan,
    /// Consume everything that is left
    Remainder,
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractionStep {
    pub field: ExtractionField,
    pub removal: Removal,
}

/// The extraction order. Later steps only ever see text earlier steps left behind.
pub const EXTRACTION_STEPS: &[ExtractionStep] = &[
    ExtractionStep {
        field: ExtractionField::Extension,
        removal: Removal::MatchedSpan,
    },
    ExtractionStep {
        field: ExtractionField::SeasonEpisode,
        removal: Removal::MatchedSpan,
    },
    ExtractionStep {
        field: ExtractionField::Episode,
        removal: Removal::MatchedSpan,
    },
    ExtractionStep {
        field: ExtractionField::Resolution,
        removal: Removal::MatchedSpan,
    },
    ExtractionStep {
        field: ExtractionField::Audio,
        removal: Removal::MatchedSpan,
    },
    ExtractionStep {
        field: ExtractionField::Title,
        removal: Removal::Remainder,
    },
];

static EXTENSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.([A-Za-z0-9]{2,4})\s*$").expect("extension regex"));

// Token boundaries are spelled out instead of `\b` because `_` is a word
// character and underscores are a common separator in upload names.

// S02E05, s2ep5, S01 - EP12, S01.E03
static SEASON_EPISODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9])S(\d{1,3})\s*[._-]?\s*(?:EP|E)\s*[._-]?\s*(\d{1,4})")
        .expect("season/episode regex")
});

// E05, EP 12. A bare number ("Show - 2") is left to the title.
static EPISODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9])(?:EP|E)\s*[._-]?\s*(\d{1,4})(?:[^a-z0-9]|$)")
        .expect("episode regex")
});

static RESOLUTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9])(2160p|1080p|720p|480p|4k)(?:[^a-z0-9]|$)")
        .expect("resolution regex")
});

// DUAL, DUAL AUDIO, SUB, DUB and runs of them ("Sub & Dub", "DUAL-AUDIO.SUB")
static AUDIO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:^|[^a-z0-9])((?:dual[\s._-]*audio|dual|sub|dub)(?:[\s._&+/-]+(?:dual[\s._-]*audio|dual|sub|dub))*)(?:[^a-z0-9]|$)",
    )
    .expect("audio regex")
});

static EMPTY_BRACKETS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\[\(\{<]\s*[\]\)\}>]").expect("bracket regex"));

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Extract a [`FileInfo`] from a raw filename or caption. Never fails: a field
/// with no match keeps its default.
pub fn extract(raw: &str) -> FileInfo {
    let mut info = FileInfo::default();
    let mut working = raw.trim().to_string();
    let mut season_matched = false;

    for step in EXTRACTION_STEPS {
        match step.field {
            ExtractionField::Extension => {
                let span = EXTENSION_RE
                    .captures(&working)
                    .filter(|caps| is_known_extension(&caps[1]))
                    .and_then(|caps| caps.get(0))
                    .map(|m| m.range());
                if let Some(range) = span {
                    working.replace_range(range, "");
                }
            }
            ExtractionField::SeasonEpisode => {
                season_matched = apply_step(&SEASON_EPISODE_RE, step, &mut working, |caps| {
                    info.season = normalize_season(&caps[1]);
                    info.episode = caps[2].to_string();
                });
            }
            ExtractionField::Episode => {
                if season_matched {
                    continue;
                }
                apply_step(&EPISODE_RE, step, &mut working, |caps| {
                    info.episode = caps[1].to_string();
                });
            }
            ExtractionField::Resolution => {
                apply_step(&RESOLUTION_RE, step, &mut working, |caps| {
                    info.resolution = normalize_resolution(&caps[1]);
                });
            }
            ExtractionField::Audio => {
                apply_step(&AUDIO_RE, step, &mut working, |caps| {
                    info.audio = AudioType::classify(&caps[1]);
                });
            }
            ExtractionField::Title => {
                info.title = clean_title(&working);
                working.clear();
            }
        }
    }

    debug!(
        raw = raw,
        title = %info.title,
        season = %info.season,
        episode = %info.episode,
        resolution = %info.resolution,
        audio = %info.audio,
        "Extracted file info"
    );

    info
}

/// Run one matcher against the working text. Returns whether it matched.
fn apply_step<F>(re: &Regex, step: &ExtractionStep, working: &mut String, on_match: F) -> bool
where
    F: FnOnce(&Captures<'_>),
{
    let Some(caps) = re.captures(working.as_str()) else {
        return false;
    };
    on_match(&caps);
    let Some(whole) = caps.get(0) else {
        return true;
    };
    let range = whole.range();
    drop(caps);

    match step.removal {
        // A space keeps the neighbours from fusing into one word
        Removal::MatchedSpan => working.replace_range(range, " "),
        Removal::Remainder => working.clear(),
    }
    true
}

/// "02" -> "2"; anything unparseable is kept verbatim
fn normalize_season(raw: &str) -> String {
    raw.parse::<u32>()
        .map(|n| n.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn normalize_resolution(raw: &str) -> String {
    if raw.eq_ignore_ascii_case("4k") {
        "4K".to_string()
    } else {
        raw.to_uppercase()
    }
}

/// Turn what is left of the working text into a display title
fn clean_title(remaining: &str) -> String {
    let spaced = remaining.replace(['.', '_'], " ");
    let unbracketed = EMPTY_BRACKETS_RE.replace_all(&spaced, " ");
    let collapsed = WHITESPACE_RE.replace_all(&unbracketed, " ");
    collapsed
        .trim()
        .trim_matches(|c: char| c == '-' || c.is_whitespace())
        .to_string()
}
