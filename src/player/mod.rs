//! Per-chat playback queues and the seams to media resolution and streaming.
//!
//! - `manager`: the [`QueueManager`] state machine
//! - `driver` / `ffmpeg`: how a resolved stream reaches a chat
//! - `resolver`: how a query becomes a playable track

pub mod driver;
pub mod error;
pub mod ffmpeg;
pub mod manager;
pub mod resolver;
pub mod state;
pub mod track;

pub use driver::{completion_channel, EndReason, OutputHandle, PlaybackDriver, PlaybackId, StartRequest, TrackEnded};
pub use error::{DriverError, PlayerError, PlayerResult};
pub use ffmpeg::FfmpegDriver;
pub use manager::{Advance, EnqueueOutcome, PlayerNotice, QueueManager, SkipOutcome};
pub use resolver::{ResolvedTrack, TrackResolver};
pub use state::{LoopMode, PlaybackStatus, QueueSnapshot, Speed};
pub use track::{ChatKey, Platform, Track};
