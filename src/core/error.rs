use thiserror::Error;

use crate::player::PlayerError;

/// Centralized error types for the application
///
/// Errors from every layer are converted to this enum at the edges (command
/// handlers, CLI, background tasks). Per-chat playback errors keep their own
/// [`PlayerError`] type and are wrapped here only when they cross a layer.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database connection pool errors
    #[error("Database pool error: {0}")]
    DatabasePool(#[from] r2d2::Error),

    /// Schema migration errors
    #[error("Migration error: {0}")]
    Migration(#[from] refinery::Error),

    /// Telegram API errors
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// Queue, resolver or driver errors
    #[error("Player error: {0}")]
    Player(#[from] PlayerError),

    /// Download/yt-dlp errors
    #[error("Download error: {0}")]
    Download(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors (yt-dlp output, /stats payloads)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Download(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Download(err.to_string())
    }
}

impl AppError {
    /// Message safe to show in a chat
    pub fn user_message(&self) -> String {
        match self {
            AppError::Player(err) => err.to_string(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Download(_) => "Download failed, try again later.".to_string(),
            _ => "Something went wrong, try again later.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::ChatKey;

    #[test]
    fn test_player_error_converts() {
        let err: AppError = PlayerError::NoOutput(ChatKey::telegram(5)).into();
        assert!(matches!(err, AppError::Player(_)));
        assert_eq!(err.user_message(), "no output connection for telegram:5");
    }

    #[test]
    fn test_string_is_download_error() {
        let err: AppError = "yt-dlp exited with 1".into();
        assert_eq!(err.to_string(), "Download error: yt-dlp exited with 1");
        assert_eq!(err.user_message(), "Download failed, try again later.");
    }
}
