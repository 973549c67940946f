//! Mock playback driver and resolver
//!
//! `MockResolver::stream_source` returns the track title as the "stream URL",
//! so `MockDriver::started()` reads as the list of titles that were played.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use musicbot::player::driver::CompletionSender;
use musicbot::player::{
    DriverError, EndReason, OutputHandle, PlaybackDriver, PlaybackId, PlayerError, ResolvedTrack, StartRequest, Track,
    TrackEnded, TrackResolver,
};

#[derive(Default)]
pub struct MockDriver {
    starts: Mutex<Vec<StartRequest>>,
    stops: Mutex<Vec<OutputHandle>>,
    releases: Mutex<Vec<OutputHandle>>,
    seeks: Mutex<Vec<Duration>>,
    fail_next_starts: AtomicUsize,
    pause_supported: AtomicBool,
    seek_supported: AtomicBool,
    completions: Option<CompletionSender>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver that can report completions through `complete_last`.
    pub fn with_completions(completions: CompletionSender) -> Self {
        Self {
            completions: Some(completions),
            ..Self::default()
        }
    }

    /// The next `n` calls to `start` fail.
    pub fn fail_next_starts(&self, n: usize) {
        self.fail_next_starts.store(n, Ordering::SeqCst);
    }

    pub fn support_pause(&self, supported: bool) {
        self.pause_supported.store(supported, Ordering::SeqCst);
    }

    pub fn support_seek(&self, supported: bool) {
        self.seek_supported.store(supported, Ordering::SeqCst);
    }

    /// Sources of every successful start, in order.
    pub fn started(&self) -> Vec<String> {
        self.starts.lock().unwrap().iter().map(|r| r.source.clone()).collect()
    }

    pub fn start_count(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    pub fn last_start(&self) -> Option<StartRequest> {
        self.starts.lock().unwrap().last().cloned()
    }

    pub fn last_playback_id(&self) -> PlaybackId {
        self.last_start().map(|r| r.playback_id).unwrap_or_default()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.lock().unwrap().len()
    }

    pub fn release_count(&self) -> usize {
        self.releases.lock().unwrap().len()
    }

    pub fn seeks(&self) -> Vec<Duration> {
        self.seeks.lock().unwrap().clone()
    }

    /// Reports the last started track as ended through the completion channel.
    pub fn complete_last(&self, reason: EndReason) {
        let Some(request) = self.last_start() else {
            return;
        };
        if let Some(tx) = &self.completions {
            let _ = tx.send(TrackEnded {
                chat: request.chat,
                playback_id: request.playback_id,
                reason,
            });
        }
    }
}

#[async_trait]
impl PlaybackDriver for MockDriver {
    async fn start(&self, request: StartRequest) -> Result<(), DriverError> {
        let remaining = self.fail_next_starts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_starts.store(remaining - 1, Ordering::SeqCst);
            return Err(DriverError::Spawn(format!("scripted failure for {}", request.source)));
        }
        self.starts.lock().unwrap().push(request);
        Ok(())
    }

    async fn stop(&self, output: &OutputHandle) {
        self.stops.lock().unwrap().push(output.clone());
    }

    async fn pause(&self, _output: &OutputHandle) -> bool {
        self.pause_supported.load(Ordering::SeqCst)
    }

    async fn resume(&self, _output: &OutputHandle) -> bool {
        self.pause_supported.load(Ordering::SeqCst)
    }

    async fn seek(&self, _output: &OutputHandle, position: Duration) -> bool {
        if !self.seek_supported.load(Ordering::SeqCst) {
            return false;
        }
        self.seeks.lock().unwrap().push(position);
        true
    }

    async fn release(&self, output: &OutputHandle) {
        self.releases.lock().unwrap().push(output.clone());
    }
}

/// Parks one `stream_source` call until the test lets it go.
#[derive(Default)]
pub struct SourceGate {
    entered: Notify,
    release: Notify,
}

impl SourceGate {
    /// Waits until the held call is parked inside `stream_source`.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Default)]
pub struct MockResolver {
    known: HashMap<String, ResolvedTrack>,
    broken_sources: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<SourceGate>>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `query` resolve to a track titled `title`.
    pub fn with_track(mut self, query: &str, title: &str, duration_seconds: u64) -> Self {
        self.known.insert(
            query.to_string(),
            ResolvedTrack {
                id: title.to_lowercase(),
                title: title.to_string(),
                url: format!("https://media.example/{}", title.to_lowercase()),
                duration_seconds,
                thumbnail: None,
                uploader: Some("Mock Artist".to_string()),
                view_count: None,
            },
        );
        self
    }

    /// `stream_source` fails for tracks with this title.
    pub fn break_source(&self, title: &str) {
        self.broken_sources.lock().unwrap().insert(title.to_string());
    }

    /// The next `stream_source` call for `title` blocks until released.
    pub fn hold_source(&self, title: &str) -> Arc<SourceGate> {
        let gate = Arc::new(SourceGate::default());
        self.gates.lock().unwrap().insert(title.to_string(), Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl TrackResolver for MockResolver {
    async fn resolve(&self, query: &str) -> Result<ResolvedTrack, PlayerError> {
        self.known
            .get(query)
            .cloned()
            .ok_or_else(|| PlayerError::NotFound(query.to_string()))
    }

    async fn stream_source(&self, track: &Track) -> Result<String, PlayerError> {
        let gate = self.gates.lock().unwrap().remove(&track.title);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.broken_sources.lock().unwrap().contains(&track.title) {
            return Err(DriverError::Source(format!("{} is unavailable", track.title)).into());
        }
        Ok(track.title.clone())
    }
}
