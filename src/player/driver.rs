//! Playback driver contract and the completion event channel.
//!
//! A driver turns a resolved media URL into sound in a chat. The queue manager
//! never talks to a platform SDK directly: it hands the driver a
//! [`StartRequest`] and later receives exactly one [`TrackEnded`] event per
//! successful start, whether the track ran to the end or was stopped early.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::DriverError;
use super::state::Speed;
use super::track::ChatKey;

/// Identifies one driver run. A completion carrying an id that no longer
/// matches the chat's current track is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PlaybackId(pub u64);

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque reference to a chat's live audio/video connection.
///
/// Provisioning and releasing the underlying connection is the dispatcher's
/// job; the queue manager only stores and forwards it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OutputHandle(Arc<str>);

impl OutputHandle {
    pub fn new(target: impl AsRef<str>) -> Self {
        Self(Arc::from(target.as_ref()))
    }

    pub fn target(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputHandle({})", mask_stream_key(&self.0))
    }
}

/// Hides the last path segment (the stream key) of an ingest URL for logs.
pub fn mask_stream_key(target: &str) -> String {
    match target.rfind('/') {
        Some(pos) if pos + 1 < target.len() && target[..pos].contains("://") => {
            format!("{}/***", &target[..pos])
        }
        _ => target.to_string(),
    }
}

/// Everything a driver needs to start one track.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub chat: ChatKey,
    pub playback_id: PlaybackId,
    pub output: OutputHandle,
    /// Direct media URL produced by the resolver
    pub source: String,
    pub speed: Speed,
    pub is_video: bool,
}

/// Why a driver run finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Finished,
    Stopped,
    Failed(String),
}

impl EndReason {
    pub fn label(&self) -> &'static str {
        match self {
            EndReason::Finished => "finished",
            EndReason::Stopped => "stopped",
            EndReason::Failed(_) => "failed",
        }
    }
}

/// Completion notification sent by a driver.
#[derive(Debug, Clone)]
pub struct TrackEnded {
    pub chat: ChatKey,
    pub playback_id: PlaybackId,
    pub reason: EndReason,
}

pub type CompletionSender = mpsc::UnboundedSender<TrackEnded>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<TrackEnded>;

/// Creates the channel drivers use to report finished tracks.
pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    mpsc::unbounded_channel()
}

#[async_trait]
pub trait PlaybackDriver: Send + Sync {
    /// Starts streaming. On `Ok`, the driver owes exactly one [`TrackEnded`]
    /// for `request.playback_id`.
    async fn start(&self, request: StartRequest) -> Result<(), DriverError>;

    /// Stops the active stream on `output`. Idempotent.
    async fn stop(&self, output: &OutputHandle);

    async fn pause(&self, output: &OutputHandle) -> bool;

    async fn resume(&self, output: &OutputHandle) -> bool;

    /// Best-effort seek. Drivers that cannot seek return `false`.
    async fn seek(&self, _output: &OutputHandle, _position: Duration) -> bool {
        false
    }

    /// Drops any resources bound to `output` after a stop.
    async fn release(&self, _output: &OutputHandle) {}
}
