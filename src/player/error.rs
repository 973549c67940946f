use thiserror::Error;

use super::track::ChatKey;

/// Failure reported by a playback driver when a stream cannot be started.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// The media process could not be spawned
    #[error("failed to spawn player process: {0}")]
    Spawn(String),
    /// Direct media URL could not be extracted for the track
    #[error("failed to resolve stream source: {0}")]
    Source(String),
    /// The output connection refused the stream
    #[error("output rejected stream: {0}")]
    Output(String),
}

/// Errors produced by the queue manager.
///
/// Every variant is scoped to a single chat; none of them is fatal to the process.
#[derive(Debug, Clone, Error)]
pub enum PlayerError {
    /// Resolver found nothing for the query
    #[error("nothing found for \"{0}\"")]
    NotFound(String),

    /// The resolver itself failed (process error, timeout, bad output)
    #[error("resolver failed: {0}")]
    Resolver(String),

    /// Playback failed to start (after the single retry)
    #[error("playback failed to start: {0}")]
    Driver(#[from] DriverError),

    /// Loop mode or speed outside the accepted bounds
    #[error("{what} must be between {min} and {max}, got {value}")]
    InvalidRange {
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Completion event for a track that is no longer current
    #[error("stale completion for {0}")]
    StaleCompletion(ChatKey),

    /// The chat has no voice/stream connection attached
    #[error("no output connection for {0}")]
    NoOutput(ChatKey),

    /// Nothing is playing in the chat
    #[error("nothing is playing in {0}")]
    NothingPlaying(ChatKey),
}

impl PlayerError {
    /// Returns a short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PlayerError::NotFound(_) => "not_found",
            PlayerError::Resolver(_) => "resolver",
            PlayerError::Driver(_) => "driver",
            PlayerError::InvalidRange { .. } => "invalid_range",
            PlayerError::StaleCompletion(_) => "stale_completion",
            PlayerError::NoOutput(_) => "no_output",
            PlayerError::NothingPlaying(_) => "nothing_playing",
        }
    }
}

pub type PlayerResult<T> = Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_range_display() {
        let err = PlayerError::InvalidRange {
            what: "speed",
            value: 3.0,
            min: 0.5,
            max: 2.0,
        };
        assert_eq!(err.to_string(), "speed must be between 0.5 and 2, got 3");
        assert_eq!(err.kind(), "invalid_range");
    }

    #[test]
    fn test_driver_error_converts() {
        let err: PlayerError = DriverError::Spawn("ffmpeg: not found".into()).into();
        assert!(matches!(err, PlayerError::Driver(DriverError::Spawn(_))));
    }
}
