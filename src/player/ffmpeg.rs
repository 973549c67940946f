//! Playback driver that pushes a track to an RTMP ingest with FFmpeg.
//!
//! Telegram channel and group live streams accept RTMP, so the output handle
//! for a chat is simply the `rtmp(s)://.../<stream key>` URL. Each start spawns
//! one `ffmpeg` process and a watcher task that reports exactly one
//! [`TrackEnded`] when the process exits or is stopped.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};

use super::driver::{
    CompletionSender, EndReason, OutputHandle, PlaybackDriver, PlaybackId, StartRequest, TrackEnded,
};
use super::error::DriverError;
use super::state::Speed;

struct ActiveStream {
    playback_id: PlaybackId,
    stop: oneshot::Sender<()>,
}

pub struct FfmpegDriver {
    ffmpeg_bin: String,
    completions: CompletionSender,
    active: Arc<Mutex<HashMap<OutputHandle, ActiveStream>>>,
}

impl FfmpegDriver {
    pub fn new(ffmpeg_bin: impl Into<String>, completions: CompletionSender) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            completions,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of running ffmpeg processes.
    pub async fn active_streams(&self) -> usize {
        self.active.lock().await.len()
    }
}

/// `atempo` accepts 0.5..=2.0 in one stage, which is exactly the [`Speed`] range.
pub fn build_atempo_filter(speed: Speed) -> String {
    format!("atempo={}", speed.value())
}

/// Builds the ffmpeg argument list for one stream.
pub fn build_stream_args(request: &StartRequest) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-re",
        "-reconnect",
        "1",
        "-reconnect_streamed",
        "1",
        "-reconnect_delay_max",
        "5",
        "-i",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(request.source.clone());

    let speed = request.speed;
    if request.is_video {
        if !speed.is_normal() {
            args.push("-filter_complex".into());
            args.push(format!(
                "[0:v]setpts={}*PTS[vout];[0:a]{}[aout]",
                1.0 / speed.value(),
                build_atempo_filter(speed)
            ));
            args.extend(["-map", "[vout]", "-map", "[aout]"].map(String::from));
        }
        args.extend(
            [
                "-c:v", "libx264", "-preset", "veryfast", "-b:v", "2500k", "-maxrate", "2500k", "-bufsize", "5000k",
                "-pix_fmt", "yuv420p", "-g", "60",
            ]
            .map(String::from),
        );
    } else {
        args.push("-vn".into());
        if !speed.is_normal() {
            args.push("-af".into());
            args.push(build_atempo_filter(speed));
        }
    }

    args.extend(["-c:a", "aac", "-b:a", "128k", "-ar", "48000", "-f", "flv"].map(String::from));
    args.push(request.output.target().to_string());
    args
}

fn last_line(stderr: &str) -> Option<&str> {
    stderr.lines().rev().map(str::trim).find(|line| !line.is_empty())
}

#[async_trait]
impl PlaybackDriver for FfmpegDriver {
    async fn start(&self, request: StartRequest) -> Result<(), DriverError> {
        // One stream per output; a leftover run reports Stopped and goes stale
        self.stop(&request.output).await;

        let args = build_stream_args(&request);
        log::debug!("Spawning {} for {} ({})", self.ffmpeg_bin, request.chat, request.playback_id);

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DriverError::Spawn(format!("{}: {}", self.ffmpeg_bin, e)))?;

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        self.active.lock().await.insert(
            request.output.clone(),
            ActiveStream {
                playback_id: request.playback_id,
                stop: stop_tx,
            },
        );

        let active = Arc::clone(&self.active);
        let completions = self.completions.clone();
        let StartRequest {
            chat,
            playback_id,
            output,
            ..
        } = request;

        tokio::spawn(async move {
            let reason = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => EndReason::Finished,
                    Ok(status) => {
                        let stderr = stderr_task.await.unwrap_or_default();
                        let detail = last_line(&stderr).unwrap_or("no output");
                        EndReason::Failed(format!("ffmpeg exited with {}: {}", status, detail))
                    }
                    Err(e) => EndReason::Failed(format!("failed to wait for ffmpeg: {}", e)),
                },
                _ = stop_rx => {
                    if let Err(e) = child.kill().await {
                        log::warn!("Failed to kill ffmpeg for {}: {}", chat, e);
                    }
                    EndReason::Stopped
                }
            };

            {
                let mut active = active.lock().await;
                if active.get(&output).is_some_and(|s| s.playback_id == playback_id) {
                    active.remove(&output);
                }
            }

            log::debug!("ffmpeg for {} ({}) ended: {:?}", chat, playback_id, reason);
            let _ = completions.send(TrackEnded {
                chat,
                playback_id,
                reason,
            });
        });

        Ok(())
    }

    async fn stop(&self, output: &OutputHandle) {
        let stream = self.active.lock().await.remove(output);
        if let Some(stream) = stream {
            log::debug!("Stopping stream {} on {:?}", stream.playback_id, output);
            let _ = stream.stop.send(());
        }
    }

    async fn pause(&self, _output: &OutputHandle) -> bool {
        false
    }

    async fn resume(&self, _output: &OutputHandle) -> bool {
        false
    }

    async fn release(&self, output: &OutputHandle) {
        self.stop(output).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::driver::completion_channel;
    use crate::player::track::ChatKey;

    fn request(is_video: bool, speed: f64) -> StartRequest {
        StartRequest {
            chat: ChatKey::telegram(-1001),
            playback_id: PlaybackId(3),
            output: OutputHandle::new("rtmps://dc4-1.rtmp.t.me/s/key"),
            source: "https://media.example/stream.m4a".to_string(),
            speed: Speed::new(speed).unwrap(),
            is_video,
        }
    }

    #[test]
    fn test_build_atempo_filter() {
        assert_eq!(build_atempo_filter(Speed::new(1.5).unwrap()), "atempo=1.5");
        assert_eq!(build_atempo_filter(Speed::new(0.5).unwrap()), "atempo=0.5");
    }

    #[test]
    fn test_audio_args_at_normal_speed() {
        let args = build_stream_args(&request(false, 1.0));
        assert!(args.contains(&"-vn".to_string()));
        assert!(!args.contains(&"-af".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("rtmps://dc4-1.rtmp.t.me/s/key"));
    }

    #[test]
    fn test_audio_args_with_speed() {
        let args = build_stream_args(&request(false, 2.0));
        let pos = args.iter().position(|a| a == "-af").unwrap();
        assert_eq!(args[pos + 1], "atempo=2");
    }

    #[test]
    fn test_video_args_with_speed() {
        let args = build_stream_args(&request(true, 2.0));
        assert!(!args.contains(&"-vn".to_string()));
        assert!(args.contains(&"[0:v]setpts=0.5*PTS[vout];[0:a]atempo=2[aout]".to_string()));
        assert!(args.contains(&"libx264".to_string()));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let (tx, _rx) = completion_channel();
        let driver = FfmpegDriver::new("/nonexistent/ffmpeg-binary", tx);
        let err = driver.start(request(false, 1.0)).await.unwrap_err();
        assert!(matches!(err, DriverError::Spawn(_)));
        assert_eq!(driver.active_streams().await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_sends_single_completion() {
        let (tx, mut rx) = completion_channel();
        // sh rejects the ffmpeg flags and exits on its own, racing the stop
        let driver = FfmpegDriver::new("sh", tx);
        let mut req = request(false, 1.0);
        req.source = "ignored".to_string();

        driver.start(req).await.unwrap();
        driver.stop(&OutputHandle::new("rtmps://dc4-1.rtmp.t.me/s/key")).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.playback_id, PlaybackId(3));
        assert!(rx.try_recv().is_err());
    }
}
