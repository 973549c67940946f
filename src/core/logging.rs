//! Logging initialization and startup diagnostics
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - A dump of the effective configuration at startup

use anyhow::Result;
use simplelog::*;
use std::fs::OpenOptions;
use std::path::Path;

use crate::core::config;

/// Initialize logger for both console and file output
///
/// The log file is appended to, so restarts keep earlier history.
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)
        .map_err(|e| anyhow::anyhow!("Failed to open log file {}: {}", log_file_path, e))?;

    let log_config = ConfigBuilder::new()
        .add_filter_ignore_str("hyper")
        .add_filter_ignore_str("reqwest")
        .build();

    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            log_config.clone(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, log_config, log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

fn binary_status(bin: &str) -> &'static str {
    let path = Path::new(bin);
    if path.is_absolute() {
        return if path.exists() { "found" } else { "NOT FOUND" };
    }
    let on_path = std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(bin).is_file()))
        .unwrap_or(false);
    if on_path {
        "found on PATH"
    } else {
        "NOT FOUND on PATH"
    }
}

/// Logs the effective configuration at application startup
pub fn log_startup_configuration() {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("🎵 musicbot v{}", env!("CARGO_PKG_VERSION"));
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if config::BOT_TOKEN.is_empty() {
        log::error!("❌ BOT_TOKEN: not set");
    } else {
        log::info!("✅ BOT_TOKEN: set");
    }

    let ytdl = binary_status(&config::YTDL_BIN);
    let ffmpeg = binary_status(&config::FFMPEG_BIN);
    log::info!("yt-dlp: {} ({})", config::YTDL_BIN.as_str(), ytdl);
    log::info!("ffmpeg: {} ({})", config::FFMPEG_BIN.as_str(), ffmpeg);
    if ytdl.contains("NOT") || ffmpeg.contains("NOT") {
        log::warn!("⚠️  Playback will fail until both binaries are installed");
    }

    log::info!("Database: {}", config::DATABASE_PATH.as_str());
    log::info!("Downloads: {}", config::DOWNLOAD_DIR.as_str());
    log::info!(
        "Limits: queue {} tracks, {}s per track, {} commands/min ({})",
        *config::playback::MAX_QUEUE_SIZE,
        *config::playback::MAX_SONG_DURATION,
        *config::rate_limit::MAX_COMMANDS_PER_MINUTE,
        if *config::rate_limit::ENABLED { "enabled" } else { "disabled" }
    );
    log::info!(
        "Features: video {}, channel play {}",
        *config::playback::ENABLE_VIDEO_CALLS,
        *config::playback::ENABLE_CHANNEL_PLAY
    );
    log::info!("Sudoers: {:?}", *config::admin::SUDOERS);
    if *config::MAINTENANCE_MODE {
        log::warn!("🔧 Starting in maintenance mode");
    }
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_status_absolute_missing() {
        assert_eq!(binary_status("/nonexistent/ffmpeg"), "NOT FOUND");
    }

    #[cfg(unix)]
    #[test]
    fn test_binary_status_on_path() {
        assert_eq!(binary_status("sh"), "found on PATH");
    }
}
