//! musicbot - multi-platform music bot
//!
//! Per-chat playback queues with loop and speed control, yt-dlp track
//! resolution, FFmpeg streaming into live streams, and the Telegram surface
//! that drives them.
//!
//! # Module Structure
//!
//! - `core`: Configuration, errors, logging, metrics, rate limiting
//! - `storage`: SQLite database and migrations
//! - `player`: Queue manager, loop/speed state and the driver/resolver seams
//! - `download`: yt-dlp resolver and `/song` downloads
//! - `telegram`: Telegram bot integration and handlers

#![allow(clippy::too_many_arguments)]

pub mod cli;
pub mod core;
pub mod download;
pub mod player;
pub mod storage;
pub mod telegram;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult};
pub use player::{ChatKey, LoopMode, Platform, QueueManager, Speed, Track};
pub use storage::{create_pool, get_connection, DbConnection, DbPool};
