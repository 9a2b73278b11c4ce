//! Automatic media renamer
//!
//! Extracts title, season, episode, resolution and audio type from an incoming
//! media file's name, renders a user template into a new filename, optionally
//! embeds metadata with ffmpeg and republishes the file, cleaning up every scratch
//! file along the way.

pub mod cli;
pub mod config;
pub mod jobs;
pub mod services;
