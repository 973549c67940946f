//! Per-chat queue manager.
//!
//! Owns one [`PlaybackState`] per chat and is the only code that mutates it.
//! Every operation locks the chat's state for its whole duration, including
//! the awaits on the resolver and the driver, so at most one "what plays
//! next" decision is in flight per chat. Different chats never contend: the
//! map only hands out `Arc`s and is never held across an await.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rand::{rng, seq::SliceRandom};
use tokio::sync::{mpsc, Mutex};

use super::driver::{
    CompletionReceiver, EndReason, OutputHandle, PlaybackDriver, PlaybackId, StartRequest, TrackEnded,
};
use super::error::{PlayerError, PlayerResult};
use super::resolver::{ResolvedTrack, TrackResolver};
use super::state::{LoopMode, NowPlaying, PlaybackState, QueueSnapshot, Speed};
use super::track::{ChatKey, Track};
use crate::core::metrics;

/// Extra attempts `advance` makes against the next queued track after a
/// start failure before giving up.
pub const MAX_START_RETRIES: usize = 1;

/// Result of moving a chat to its next track.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    Started(Track),
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// The chat was idle and this (or the queue head) started right away
    Started(Track),
    /// Appended behind other tracks; 1-based position in the queue
    Queued { position: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipOutcome {
    /// The running stream was stopped; its completion picks the next track
    Stopping(Track),
    /// Nothing was playing, so the queue head was started directly
    Started(Track),
    NothingToSkip,
}

/// Things the chat should hear about that happen outside a command.
#[derive(Debug, Clone)]
pub enum PlayerNotice {
    NowPlaying { chat: ChatKey, track: Track },
    QueueFinished { chat: ChatKey },
    PlaybackFailed { chat: ChatKey, error: PlayerError },
}

type ChatState = Arc<Mutex<PlaybackState>>;

pub struct QueueManager {
    chats: DashMap<ChatKey, ChatState>,
    driver: Arc<dyn PlaybackDriver>,
    resolver: Arc<dyn TrackResolver>,
    next_playback_id: AtomicU64,
    notices: Option<mpsc::UnboundedSender<PlayerNotice>>,
}

impl QueueManager {
    pub fn new(driver: Arc<dyn PlaybackDriver>, resolver: Arc<dyn TrackResolver>) -> Self {
        Self {
            chats: DashMap::new(),
            driver,
            resolver,
            next_playback_id: AtomicU64::new(1),
            notices: None,
        }
    }

    /// Enables [`PlayerNotice`] delivery and returns the receiving end.
    pub fn with_notices(mut self) -> (Self, mpsc::UnboundedReceiver<PlayerNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notices = Some(tx);
        (self, rx)
    }

    /// Returns the chat's state, creating an idle record on first use.
    fn state(&self, chat: ChatKey) -> ChatState {
        let entry = self.chats.entry(chat).or_insert_with(|| {
            log::debug!("Creating playback state for {}", chat);
            Arc::new(Mutex::new(PlaybackState::default()))
        });
        let state = Arc::clone(entry.value());
        drop(entry);
        metrics::ACTIVE_CHATS.set(self.chats.len() as f64);
        state
    }

    fn existing(&self, chat: ChatKey) -> Option<ChatState> {
        self.chats.get(&chat).map(|entry| Arc::clone(entry.value()))
    }

    fn next_id(&self) -> PlaybackId {
        PlaybackId(self.next_playback_id.fetch_add(1, Ordering::Relaxed))
    }

    fn notify(&self, notice: PlayerNotice) {
        if let Some(tx) = &self.notices {
            // Receiver gone means the bot is shutting down
            let _ = tx.send(notice);
        }
    }

    /// Number of chats with a state record.
    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }

    /// Looks up a query through the resolver. Never touches any queue.
    pub async fn resolve(&self, query: &str) -> PlayerResult<ResolvedTrack> {
        self.resolver.resolve(query).await
    }

    /// Stores the chat's voice/stream connection.
    pub async fn attach_output(&self, chat: ChatKey, output: OutputHandle) {
        let state = self.state(chat);
        let mut state = state.lock().await;
        if let Some(previous) = state.output.replace(output.clone()) {
            if previous != output {
                log::info!("Replacing output for {}: {:?} -> {:?}", chat, previous, output);
            }
        } else {
            log::info!("Attached output {:?} to {}", output, chat);
        }
    }

    pub async fn output(&self, chat: ChatKey) -> Option<OutputHandle> {
        let state = self.existing(chat)?;
        let state = state.lock().await;
        state.output.clone()
    }

    /// Appends `track` and starts playback if the chat is idle.
    ///
    /// Queue size limits are the caller's business. A chat without an output
    /// connection rejects the track before touching the queue.
    pub async fn enqueue(&self, chat: ChatKey, track: Track) -> PlayerResult<EnqueueOutcome> {
        let state = self.state(chat);
        let mut state = state.lock().await;

        if state.output.is_none() {
            return Err(PlayerError::NoOutput(chat));
        }

        log::info!("Enqueue {} in {}: {}", track.source, chat, track.title);
        state.queue.push_back(track);

        if state.current.is_some() {
            return Ok(EnqueueOutcome::Queued {
                position: state.queue.len(),
            });
        }

        match self.advance_locked(chat, &mut state).await? {
            Advance::Started(track) => Ok(EnqueueOutcome::Started(track)),
            // Only reachable when every queued track failed to start
            Advance::Idle => Ok(EnqueueOutcome::Queued { position: 0 }),
        }
    }

    /// Starts the queue head, or leaves the chat idle when the queue is empty.
    pub async fn advance(&self, chat: ChatKey) -> PlayerResult<Advance> {
        let state = self.state(chat);
        let mut state = state.lock().await;
        self.advance_locked(chat, &mut state).await
    }

    async fn advance_locked(&self, chat: ChatKey, state: &mut PlaybackState) -> PlayerResult<Advance> {
        state.paused = false;

        let Some(output) = state.output.clone() else {
            state.current = None;
            state.restart = None;
            if state.queue.is_empty() {
                return Ok(Advance::Idle);
            }
            return Err(PlayerError::NoOutput(chat));
        };

        let mut failures = 0;
        let mut last_error = None;

        loop {
            // A speed restart goes before anything queued
            let Some(track) = state.restart.take().or_else(|| state.queue.pop_front()) else {
                state.current = None;
                return match last_error {
                    Some(err) => Err(err),
                    None => {
                        log::info!("Queue finished in {}, going idle", chat);
                        self.notify(PlayerNotice::QueueFinished { chat });
                        Ok(Advance::Idle)
                    }
                };
            };

            let playback_id = self.next_id();
            match self.start_track(chat, playback_id, &output, &track, state.speed).await {
                Ok(()) => {
                    log::info!("▶️ {} now playing {} ({}) at {}", chat, track.title, playback_id, state.speed);
                    metrics::TRACKS_STARTED_TOTAL
                        .with_label_values(&[track.platform.as_str()])
                        .inc();
                    state.current = Some(NowPlaying {
                        track: track.clone(),
                        playback_id,
                        started_at: Utc::now(),
                    });
                    self.notify(PlayerNotice::NowPlaying {
                        chat,
                        track: track.clone(),
                    });
                    return Ok(Advance::Started(track));
                }
                Err(err) => {
                    log::warn!("Failed to start {} in {}: {}", track.title, chat, err);
                    metrics::START_FAILURES_TOTAL.with_label_values(&[err.kind()]).inc();
                    state.current = None;
                    failures += 1;
                    if failures > MAX_START_RETRIES {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
            }
        }
    }

    async fn start_track(
        &self,
        chat: ChatKey,
        playback_id: PlaybackId,
        output: &OutputHandle,
        track: &Track,
        speed: Speed,
    ) -> PlayerResult<()> {
        let source = self.resolver.stream_source(track).await?;
        let request = StartRequest {
            chat,
            playback_id,
            output: output.clone(),
            source,
            speed,
            is_video: track.is_video,
        };
        self.driver.start(request).await?;
        Ok(())
    }

    /// Applies loop policy after the driver reports the current track ended.
    ///
    /// Events for a track that is no longer current (after a stop, teardown or
    /// a newer start) return [`PlayerError::StaleCompletion`] and change nothing.
    pub async fn on_track_end(&self, event: TrackEnded) -> PlayerResult<Advance> {
        let chat = event.chat;
        let Some(state) = self.existing(chat) else {
            return Err(PlayerError::StaleCompletion(chat));
        };
        let mut state = state.lock().await;

        let is_current = state
            .current
            .as_ref()
            .is_some_and(|now| now.playback_id == event.playback_id);
        if !is_current {
            return Err(PlayerError::StaleCompletion(chat));
        }
        let Some(finished) = state.current.take().map(|now| now.track) else {
            return Err(PlayerError::StaleCompletion(chat));
        };

        metrics::TRACK_END_TOTAL
            .with_label_values(&[event.reason.label()])
            .inc();
        log::debug!("{} finished {} ({})", chat, finished.title, event.reason.label());

        if state.restart.is_some() {
            // Stopped for a speed change: start it again, no loop bookkeeping
            return self.advance_locked(chat, &mut state).await;
        }

        if let EndReason::Failed(reason) = &event.reason {
            // Replaying a stream that just died would loop forever
            log::warn!("Stream for {} in {} failed: {}", finished.title, chat, reason);
            return self.advance_locked(chat, &mut state).await;
        }

        match state.loop_mode {
            LoopMode::Off => {}
            LoopMode::Track => state.queue.push_front(finished),
            LoopMode::Queue => state.queue.push_back(finished),
            LoopMode::Repeat { remaining } => {
                let left = remaining.saturating_sub(1);
                state.loop_mode = if left == 0 {
                    LoopMode::Off
                } else {
                    LoopMode::Repeat { remaining: left }
                };
                state.queue.push_front(finished);
            }
        }

        self.advance_locked(chat, &mut state).await
    }

    /// Randomly reorders the pending queue. Returns `false` if it is empty.
    pub async fn shuffle(&self, chat: ChatKey) -> bool {
        let Some(state) = self.existing(chat) else {
            return false;
        };
        let mut state = state.lock().await;
        if state.queue.is_empty() {
            return false;
        }
        state.queue.make_contiguous().shuffle(&mut rng());
        true
    }

    /// Stops the current track so its completion advances the queue under the
    /// usual loop policy. An idle chat starts its queue head instead.
    pub async fn skip(&self, chat: ChatKey) -> PlayerResult<SkipOutcome> {
        let Some(state) = self.existing(chat) else {
            return Ok(SkipOutcome::NothingToSkip);
        };
        let mut state = state.lock().await;

        if let Some(now) = &state.current {
            let track = now.track.clone();
            if state.restart.take().is_some() {
                log::debug!("Skip in {} cancels the pending speed restart", chat);
            }
            if let Some(output) = &state.output {
                self.driver.stop(output).await;
            }
            return Ok(SkipOutcome::Stopping(track));
        }

        if state.queue.is_empty() {
            return Ok(SkipOutcome::NothingToSkip);
        }

        match self.advance_locked(chat, &mut state).await? {
            Advance::Started(track) => Ok(SkipOutcome::Started(track)),
            Advance::Idle => Ok(SkipOutcome::NothingToSkip),
        }
    }

    /// Clears the queue, the current track and loop mode, and releases the
    /// output. Returns `false` for a chat that had nothing to stop.
    pub async fn stop(&self, chat: ChatKey) -> bool {
        let Some(state) = self.existing(chat) else {
            return false;
        };
        let mut state = state.lock().await;
        let had_session = state.current.is_some() || !state.queue.is_empty() || state.output.is_some();

        state.clear();
        if let Some(output) = state.output.take() {
            self.driver.stop(&output).await;
            self.driver.release(&output).await;
        }

        if had_session {
            log::info!("⏹ Stopped playback in {}", chat);
        }
        had_session
    }

    /// The platform tore down the chat's voice session: stop and forget the chat.
    pub async fn teardown(&self, chat: ChatKey) {
        self.stop(chat).await;
        self.chats.remove(&chat);
        metrics::ACTIVE_CHATS.set(self.chats.len() as f64);
        log::info!("Dropped playback state for {}", chat);
    }

    /// Sets the loop mode from a `/loop` code; `None` toggles off/queue.
    pub async fn set_loop_mode(&self, chat: ChatKey, code: Option<i64>) -> PlayerResult<LoopMode> {
        let requested = code.map(LoopMode::from_code).transpose()?;

        let state = self.state(chat);
        let mut state = state.lock().await;
        let mode = requested.unwrap_or_else(|| state.loop_mode.toggled());
        state.loop_mode = mode;
        log::info!("🔄 Loop mode in {} set to {}", chat, mode);
        Ok(mode)
    }

    /// Changes the playback rate.
    ///
    /// A running track is stopped and marked for restart, so its completion
    /// starts it again from the beginning at the new rate, ahead of the queue.
    pub async fn set_speed(&self, chat: ChatKey, value: f64) -> PlayerResult<Speed> {
        let speed = Speed::new(value)?;

        let state = self.state(chat);
        let mut state = state.lock().await;
        state.speed = speed;

        if let Some(track) = state.current.as_ref().map(|now| now.track.clone()) {
            state.restart.get_or_insert(track);
            if let Some(output) = &state.output {
                self.driver.stop(output).await;
            }
        }

        log::info!("⏩ Speed in {} set to {}", chat, speed);
        Ok(speed)
    }

    /// Best-effort seek. `Ok(false)` means the driver cannot seek.
    pub async fn seek(&self, chat: ChatKey, position_seconds: u64) -> PlayerResult<bool> {
        let Some(state) = self.existing(chat) else {
            return Err(PlayerError::NothingPlaying(chat));
        };
        let state = state.lock().await;
        let (Some(_), Some(output)) = (&state.current, &state.output) else {
            return Err(PlayerError::NothingPlaying(chat));
        };

        let moved = self.driver.seek(output, Duration::from_secs(position_seconds)).await;
        if !moved {
            log::info!("Seek to {}s in {} not supported by driver", position_seconds, chat);
        }
        Ok(moved)
    }

    pub async fn pause(&self, chat: ChatKey) -> bool {
        let Some(state) = self.existing(chat) else {
            return false;
        };
        let mut state = state.lock().await;
        if state.current.is_none() || state.paused {
            return false;
        }
        let Some(output) = state.output.clone() else {
            return false;
        };
        let paused = self.driver.pause(&output).await;
        state.paused = paused;
        paused
    }

    pub async fn resume(&self, chat: ChatKey) -> bool {
        let Some(state) = self.existing(chat) else {
            return false;
        };
        let mut state = state.lock().await;
        if state.current.is_none() || !state.paused {
            return false;
        }
        let Some(output) = state.output.clone() else {
            return false;
        };
        let resumed = self.driver.resume(&output).await;
        if resumed {
            state.paused = false;
        }
        resumed
    }

    pub async fn snapshot(&self, chat: ChatKey) -> QueueSnapshot {
        match self.existing(chat) {
            Some(state) => state.lock().await.snapshot(),
            None => QueueSnapshot::idle(),
        }
    }

    /// Handles one completion event, logging instead of returning errors.
    pub async fn handle_completion(&self, event: TrackEnded) {
        let chat = event.chat;
        match self.on_track_end(event).await {
            Ok(_) => {}
            Err(PlayerError::StaleCompletion(_)) => {
                log::debug!("Ignoring stale completion for {}", chat);
            }
            Err(err) => {
                log::error!("Could not continue playback in {}: {}", chat, err);
                self.notify(PlayerNotice::PlaybackFailed { chat, error: err });
            }
        }
    }

    /// Consumes driver completions until every sender is dropped.
    ///
    /// Each event gets its own task so a slow resolver in one chat never
    /// delays the next-track decision of another; events for the same chat
    /// serialize on that chat's lock.
    pub async fn run(self: Arc<Self>, mut completions: CompletionReceiver) {
        log::info!("Playback completion loop started");
        while let Some(event) = completions.recv().await {
            let manager = Arc::clone(&self);
            tokio::spawn(async move {
                manager.handle_completion(event).await;
            });
        }
        log::info!("Playback completion loop stopped");
    }
}
