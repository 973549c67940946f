//! Per-chat playback state and the loop/speed value types.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::driver::{OutputHandle, PlaybackId};
use super::error::{PlayerError, PlayerResult};
use super::track::Track;

/// Highest accepted loop code (`/loop 10`)
pub const MAX_LOOP_CODE: u8 = 10;

/// What happens to the current track when it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "mode", content = "remaining", rename_all = "snake_case")]
pub enum LoopMode {
    /// Advance to the next queued track (code 0)
    #[default]
    Off,
    /// Replay the current track indefinitely (code 1)
    Track,
    /// Append every finished track to the tail of the queue (code 2)
    Queue,
    /// Replay the current track `remaining` more times (codes 3..=10)
    Repeat { remaining: u8 },
}

impl LoopMode {
    /// Parses a user-facing loop code, rejecting anything outside `0..=10`.
    pub fn from_code(code: i64) -> PlayerResult<Self> {
        match code {
            0 => Ok(LoopMode::Off),
            1 => Ok(LoopMode::Track),
            2 => Ok(LoopMode::Queue),
            3..=10 => Ok(LoopMode::Repeat {
                remaining: code as u8,
            }),
            _ => Err(PlayerError::InvalidRange {
                what: "loop mode",
                value: code as f64,
                min: 0.0,
                max: f64::from(MAX_LOOP_CODE),
            }),
        }
    }

    /// `/loop` without an argument flips between off and queue loop.
    pub fn toggled(self) -> Self {
        match self {
            LoopMode::Off => LoopMode::Queue,
            _ => LoopMode::Off,
        }
    }

    pub fn is_off(&self) -> bool {
        matches!(self, LoopMode::Off)
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopMode::Off => f.write_str("disabled"),
            LoopMode::Track => f.write_str("current song"),
            LoopMode::Queue => f.write_str("queue"),
            LoopMode::Repeat { remaining } => write!(f, "repeat {} times", remaining),
        }
    }
}

/// Playback rate accepted by the FFmpeg `atempo` filter without chaining.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct Speed(f64);

impl Speed {
    pub const MIN: f64 = 0.5;
    pub const MAX: f64 = 2.0;
    pub const NORMAL: Speed = Speed(1.0);

    pub fn new(value: f64) -> PlayerResult<Self> {
        // NaN fails both comparisons, so check the accepted range positively
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Speed(value))
        } else {
            Err(PlayerError::InvalidRange {
                what: "speed",
                value,
                min: Self::MIN,
                max: Self::MAX,
            })
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn is_normal(self) -> bool {
        (self.0 - 1.0).abs() < f64::EPSILON
    }
}

impl Default for Speed {
    fn default() -> Self {
        Speed::NORMAL
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

/// The track currently streaming, tagged with the id of the driver run.
#[derive(Debug, Clone, Serialize)]
pub struct NowPlaying {
    pub track: Track,
    #[serde(skip)]
    pub playback_id: PlaybackId,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Idle,
    Playing,
}

/// Everything the bot tracks for one chat.
#[derive(Debug, Default)]
pub struct PlaybackState {
    pub queue: VecDeque<Track>,
    pub current: Option<NowPlaying>,
    pub loop_mode: LoopMode,
    pub speed: Speed,
    pub output: Option<OutputHandle>,
    pub paused: bool,
    /// Set by a speed change: the next advance starts this track again
    /// before anything queued, and loop policy is skipped for that completion.
    pub(crate) restart: Option<Track>,
}

impl PlaybackState {
    pub fn status(&self) -> PlaybackStatus {
        if self.current.is_some() {
            PlaybackStatus::Playing
        } else {
            PlaybackStatus::Idle
        }
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    /// Empties the queue and the current slot. Speed survives a stop.
    pub(crate) fn clear(&mut self) {
        self.queue.clear();
        self.current = None;
        self.loop_mode = LoopMode::Off;
        self.paused = false;
        self.restart = None;
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            status: self.status(),
            current: self.current.as_ref().map(|now| now.track.clone()),
            queue: self.queue.iter().cloned().collect(),
            loop_mode: self.loop_mode,
            speed: self.speed,
            paused: self.paused,
            restarting: self.restart.is_some(),
            connected: self.output.is_some(),
        }
    }
}

/// Read-only copy of a chat's state for `/queue` and tests.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub status: PlaybackStatus,
    pub current: Option<Track>,
    pub queue: Vec<Track>,
    pub loop_mode: LoopMode,
    pub speed: Speed,
    pub paused: bool,
    /// The current track restarts at the new speed once its stream stops
    pub restarting: bool,
    pub connected: bool,
}

impl QueueSnapshot {
    pub fn idle() -> Self {
        PlaybackState::default().snapshot()
    }

    /// Total runtime of the queued tracks, current excluded.
    pub fn queued_duration_seconds(&self) -> u64 {
        self.queue.iter().map(|t| t.duration_seconds).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_mode_codes() {
        assert_eq!(LoopMode::from_code(0).unwrap(), LoopMode::Off);
        assert_eq!(LoopMode::from_code(1).unwrap(), LoopMode::Track);
        assert_eq!(LoopMode::from_code(2).unwrap(), LoopMode::Queue);
        assert_eq!(LoopMode::from_code(7).unwrap(), LoopMode::Repeat { remaining: 7 });
        assert!(LoopMode::from_code(11).is_err());
        assert!(LoopMode::from_code(-1).is_err());
    }

    #[test]
    fn test_loop_mode_toggle() {
        assert_eq!(LoopMode::Off.toggled(), LoopMode::Queue);
        assert_eq!(LoopMode::Queue.toggled(), LoopMode::Off);
        assert_eq!(LoopMode::Repeat { remaining: 4 }.toggled(), LoopMode::Off);
    }

    #[test]
    fn test_loop_mode_display() {
        assert_eq!(LoopMode::Track.to_string(), "current song");
        assert_eq!(LoopMode::Repeat { remaining: 5 }.to_string(), "repeat 5 times");
    }

    #[test]
    fn test_speed_bounds() {
        assert!(Speed::new(0.5).is_ok());
        assert!(Speed::new(2.0).is_ok());
        assert!(Speed::new(0.49).is_err());
        assert!(Speed::new(3.0).is_err());
        assert!(Speed::new(f64::NAN).is_err());
        assert!(Speed::default().is_normal());
        assert_eq!(Speed::new(1.25).unwrap().to_string(), "1.25x");
    }

    #[test]
    fn test_clear_keeps_speed_and_output() {
        let mut state = PlaybackState {
            speed: Speed::new(1.5).unwrap(),
            loop_mode: LoopMode::Queue,
            output: Some(OutputHandle::new("rtmp://example/live/key")),
            ..Default::default()
        };
        state.clear();
        assert_eq!(state.speed.value(), 1.5);
        assert!(state.loop_mode.is_off());
        assert!(state.output.is_some());
        assert_eq!(state.status(), PlaybackStatus::Idle);
    }

    #[test]
    fn test_restart_stays_out_of_queue() {
        let track = Track::new("A", "https://media.example/a", 60, false, 1, crate::player::Platform::Telegram);
        let mut state = PlaybackState {
            restart: Some(track),
            ..Default::default()
        };

        let snapshot = state.snapshot();
        assert!(snapshot.restarting);
        assert!(snapshot.queue.is_empty());

        state.clear();
        assert!(!state.snapshot().restarting);
    }
}
