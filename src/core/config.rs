use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: musicbot.sqlite
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "musicbot.sqlite".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: musicbot.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "musicbot.log".to_string()));

/// Cached yt-dlp binary path
/// Read once at startup from YTDL_BIN environment variable or defaults to "yt-dlp"
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

/// ffmpeg binary used by the stream driver
pub static FFMPEG_BIN: Lazy<String> = Lazy::new(|| env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()));

/// Folder for `/song` downloads
/// Read from DOWNLOAD_DIR environment variable, supports tilde (~) expansion
pub static DOWNLOAD_DIR: Lazy<String> = Lazy::new(|| {
    let raw = env::var("DOWNLOAD_DIR").unwrap_or_else(|_| "./downloads".to_string());
    shellexpand::tilde(&raw).into_owned()
});

/// Link shown in /start
pub static SUPPORT_CHANNEL: Lazy<String> =
    Lazy::new(|| env::var("SUPPORT_CHANNEL").unwrap_or_else(|_| "https://t.me/musicbot_support".to_string()));

/// Playback limits
pub mod playback {
    use super::{env_bool, env_parse, Lazy};

    /// Per-chat queue cap, enforced before enqueue
    /// Read from MAX_QUEUE_SIZE environment variable
    /// Default: 100
    pub static MAX_QUEUE_SIZE: Lazy<usize> = Lazy::new(|| env_parse("MAX_QUEUE_SIZE", 100));

    /// Longest accepted track in seconds
    /// Read from MAX_SONG_DURATION environment variable
    /// Default: 3600 (1 hour)
    pub static MAX_SONG_DURATION: Lazy<u64> = Lazy::new(|| env_parse("MAX_SONG_DURATION", 3600));

    /// Allow /vplay
    pub static ENABLE_VIDEO_CALLS: Lazy<bool> = Lazy::new(|| env_bool("ENABLE_VIDEO_CALLS", true));

    /// Allow /channelplay
    pub static ENABLE_CHANNEL_PLAY: Lazy<bool> = Lazy::new(|| env_bool("ENABLE_CHANNEL_PLAY", true));
}

/// Rate limiting configuration
pub mod rate_limit {
    use super::{env_bool, env_parse, Duration, Lazy};

    /// Read from RATE_LIMIT_ENABLED environment variable
    /// Default: true
    pub static ENABLED: Lazy<bool> = Lazy::new(|| env_bool("RATE_LIMIT_ENABLED", true));

    /// Commands a user may send inside one window
    /// Read from MAX_COMMANDS_PER_MINUTE environment variable
    /// Default: 30
    pub static MAX_COMMANDS_PER_MINUTE: Lazy<usize> = Lazy::new(|| env_parse("MAX_COMMANDS_PER_MINUTE", 30));

    pub const WINDOW_SECS: u64 = 60;

    /// Sliding window duration
    pub fn window() -> Duration {
        Duration::from_secs(WINDOW_SECS)
    }
}

/// Download configuration
pub mod download {
    use super::Duration;

    /// Timeout for yt-dlp metadata and stream URL lookups (in seconds)
    pub const YTDLP_TIMEOUT_SECS: u64 = 60;

    /// Timeout for a full `/song` download (in seconds)
    pub const SONG_TIMEOUT_SECS: u64 = 600; // 10 minutes

    /// Downloaded files older than this are removed by the cleanup task
    pub const MAX_FILE_AGE_SECS: u64 = 3600;

    /// Interval between cleanup runs
    pub const CLEANUP_INTERVAL_SECS: u64 = 1800;

    /// yt-dlp command timeout duration
    pub fn ytdlp_timeout() -> Duration {
        Duration::from_secs(YTDLP_TIMEOUT_SECS)
    }

    pub fn song_timeout() -> Duration {
        Duration::from_secs(SONG_TIMEOUT_SECS)
    }

    pub fn max_file_age() -> Duration {
        Duration::from_secs(MAX_FILE_AGE_SECS)
    }

    pub fn cleanup_interval() -> Duration {
        Duration::from_secs(CLEANUP_INTERVAL_SECS)
    }
}

/// Retry configuration
pub mod retry {
    use super::Duration;

    /// Maximum number of retries for dispatcher reconnection
    pub const MAX_DISPATCHER_RETRIES: u32 = 5;

    /// Delay between dispatcher retry attempts (in seconds)
    pub const DISPATCHER_RETRY_DELAY_SECS: u64 = 5;

    /// Dispatcher retry delay duration
    pub fn dispatcher_delay() -> Duration {
        Duration::from_secs(DISPATCHER_RETRY_DELAY_SECS)
    }
}

/// Owner and sudoer configuration
pub mod admin {
    use once_cell::sync::Lazy;
    use std::env;

    pub(crate) fn parse_ids(raw: &str) -> Vec<i64> {
        raw.split([',', ' ', '\n', '\t'])
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .collect()
    }

    /// Bot owner, always a sudoer
    /// Read from OWNER_ID environment variable
    /// Defaults to 0 (no owner)
    pub static OWNER_ID: Lazy<i64> = Lazy::new(|| {
        env::var("OWNER_ID")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    });

    /// Extra sudoer ids (comma-separated)
    /// Read from SUDOERS environment variable
    pub static SUDOERS: Lazy<Vec<i64>> = Lazy::new(|| {
        let mut ids = env::var("SUDOERS").ok().map(|raw| parse_ids(&raw)).unwrap_or_default();
        if *OWNER_ID != 0 && !ids.contains(&OWNER_ID) {
            ids.push(*OWNER_ID);
        }
        ids
    });

    pub fn is_sudoer(user_id: i64) -> bool {
        user_id != 0 && SUDOERS.contains(&user_id)
    }
}

/// Keep-alive and metrics HTTP server
pub mod server {
    use super::{env_parse, Lazy};

    /// Read from KEEP_ALIVE_PORT environment variable
    /// Default: 8080, 0 disables the server
    pub static KEEP_ALIVE_PORT: Lazy<u16> = Lazy::new(|| env_parse("KEEP_ALIVE_PORT", 8080));

    pub fn enabled() -> bool {
        *KEEP_ALIVE_PORT != 0
    }
}

/// Maintenance flag at startup. Sudoers can flip it at runtime with /maintenance.
pub static MAINTENANCE_MODE: Lazy<bool> = Lazy::new(|| env_bool("MAINTENANCE_MODE", false));

/// Checks the settings `run` cannot start without.
pub fn validate() -> Result<(), String> {
    if BOT_TOKEN.trim().is_empty() {
        return Err("BOT_TOKEN (or TELOXIDE_TOKEN) is not set".to_string());
    }
    if *playback::MAX_QUEUE_SIZE < 1 {
        return Err("MAX_QUEUE_SIZE must be at least 1".to_string());
    }
    if *admin::OWNER_ID == 0 {
        log::warn!("OWNER_ID is not set: sudo commands are only available to SUDOERS");
    }
    Ok(())
}

/// `.env` template printed by `musicbot env-template`.
pub fn env_template() -> &'static str {
    "# Telegram
BOT_TOKEN=
OWNER_ID=0
SUDOERS=

# Storage and logs
DATABASE_PATH=musicbot.sqlite
LOG_FILE_PATH=musicbot.log
DOWNLOAD_DIR=./downloads

# External tools
YTDL_BIN=yt-dlp
FFMPEG_BIN=ffmpeg

# Playback
MAX_QUEUE_SIZE=100
MAX_SONG_DURATION=3600
ENABLE_VIDEO_CALLS=true
ENABLE_CHANNEL_PLAY=true

# Limits
MAINTENANCE_MODE=false
RATE_LIMIT_ENABLED=true
MAX_COMMANDS_PER_MINUTE=30

# Keep-alive server (0 disables)
KEEP_ALIVE_PORT=8080
SUPPORT_CHANNEL=https://t.me/musicbot_support
"
}
