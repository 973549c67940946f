//! yt-dlp backed [`TrackResolver`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::core::config;
use crate::core::metrics;
use crate::core::process::{run_with_timeout, stderr_summary};
use crate::core::utils::is_url;
use crate::player::{DriverError, PlayerError, ResolvedTrack, Track, TrackResolver};

/// Audio format selector for streaming
pub const AUDIO_FORMAT: &str = "bestaudio/best";
/// Video format selector for streaming; 720p keeps ffmpeg re-encoding cheap
pub const VIDEO_FORMAT: &str = "best[height<=720]/best";

/// Subset of the yt-dlp info JSON we read.
#[derive(Debug, Deserialize)]
struct InfoJson {
    id: Option<String>,
    title: Option<String>,
    webpage_url: Option<String>,
    original_url: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    view_count: Option<u64>,
    #[serde(default)]
    entries: Option<Vec<InfoJson>>,
}

impl InfoJson {
    fn into_track(self) -> Option<ResolvedTrack> {
        if let Some(entries) = self.entries {
            // Search results and playlists: first entry wins
            return entries.into_iter().next().and_then(InfoJson::into_track);
        }

        let id = self.id.unwrap_or_default();
        let url = self
            .webpage_url
            .or(self.original_url)
            .or(self.url)
            .or_else(|| (!id.is_empty()).then(|| format!("https://www.youtube.com/watch?v={}", id)))?;

        Some(ResolvedTrack {
            title: self.title.unwrap_or_else(|| "Unknown".to_string()),
            url,
            duration_seconds: self.duration.map(|d| d.max(0.0).round() as u64).unwrap_or(0),
            thumbnail: self.thumbnail,
            uploader: self.uploader.or(self.channel),
            view_count: self.view_count,
            id,
        })
    }
}

/// Parses `--dump-single-json` output. `Ok(None)` means the search was empty.
pub fn parse_info_json(raw: &str) -> Result<Option<ResolvedTrack>, serde_json::Error> {
    let info: InfoJson = serde_json::from_str(raw)?;
    Ok(info.into_track())
}

/// First non-empty line of `-g` output.
pub fn parse_stream_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Turns a chat query into a yt-dlp target.
pub fn search_target(query: &str) -> String {
    let query = query.trim();
    if is_url(query) {
        query.to_string()
    } else {
        format!("ytsearch1:{}", query)
    }
}

fn looks_like_not_found(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    ["unsupported url", "video unavailable", "not available", "no video results", "404"]
        .iter()
        .any(|needle| stderr.contains(needle))
}

pub struct YtDlpResolver {
    bin: String,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    pub fn from_config() -> Self {
        Self::new(config::YTDL_BIN.as_str(), config::download::ytdlp_timeout())
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<ResolvedTrack, PlayerError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PlayerError::NotFound(String::new()));
        }

        let target = search_target(query);
        let mut cmd = Command::new(&self.bin);
        cmd.args([
            "--dump-single-json",
            "--no-playlist",
            "--no-warnings",
            "--skip-download",
            target.as_str(),
        ]);

        log::debug!("Resolving {} with {}", target, self.bin);
        let timer = metrics::YTDLP_EXECUTION_DURATION_SECONDS
            .with_label_values(&["resolve"])
            .start_timer();
        let output = run_with_timeout(&mut cmd, self.timeout)
            .await
            .map_err(|e| PlayerError::Resolver(e.to_string()))?;
        timer.observe_duration();

        if !output.status.success() {
            let stderr = stderr_summary(&output);
            if looks_like_not_found(&stderr) {
                return Err(PlayerError::NotFound(query.to_string()));
            }
            return Err(PlayerError::Resolver(stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_info_json(&stdout) {
            Ok(Some(track)) => {
                log::info!("Resolved \"{}\" -> {} ({}s)", query, track.title, track.duration_seconds);
                Ok(track)
            }
            Ok(None) => Err(PlayerError::NotFound(query.to_string())),
            Err(e) => Err(PlayerError::Resolver(format!("unexpected yt-dlp output: {}", e))),
        }
    }

    async fn stream_source(&self, track: &Track) -> Result<String, PlayerError> {
        let format = if track.is_video { VIDEO_FORMAT } else { AUDIO_FORMAT };
        let mut cmd = Command::new(&self.bin);
        cmd.args(["-g", "-f", format, "--no-playlist", "--no-warnings", track.source.as_str()]);

        let timer = metrics::YTDLP_EXECUTION_DURATION_SECONDS
            .with_label_values(&["stream_url"])
            .start_timer();
        let output = run_with_timeout(&mut cmd, self.timeout)
            .await
            .map_err(|e| DriverError::Source(e.to_string()))?;
        timer.observe_duration();

        if !output.status.success() {
            return Err(DriverError::Source(stderr_summary(&output)).into());
        }

        parse_stream_url(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| DriverError::Source(format!("no stream URL for {}", track.source)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_search_target() {
        assert_eq!(search_target("lofi beats"), "ytsearch1:lofi beats");
        assert_eq!(
            search_target(" https://youtu.be/dQw4w9WgXcQ "),
            "https://youtu.be/dQw4w9WgXcQ"
        );
    }

    #[test]
    fn test_parse_single_video() {
        let raw = r#"{
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "duration": 212.6,
            "uploader": "Rick Astley",
            "view_count": 1500000000,
            "thumbnail": "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg"
        }"#;
        let track = parse_info_json(raw).unwrap().unwrap();
        assert_eq!(track.id, "dQw4w9WgXcQ");
        assert_eq!(track.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(track.duration_seconds, 213);
        assert_eq!(track.uploader.as_deref(), Some("Rick Astley"));
        assert_eq!(track.view_count, Some(1_500_000_000));
    }

    #[test]
    fn test_parse_search_takes_first_entry() {
        let raw = r#"{
            "id": "ytsearch1:query",
            "title": "query",
            "entries": [
                {"id": "aaa", "title": "First", "duration": 60, "channel": "Chan"},
                {"id": "bbb", "title": "Second", "duration": 90}
            ]
        }"#;
        let track = parse_info_json(raw).unwrap().unwrap();
        assert_eq!(track.title, "First");
        assert_eq!(track.url, "https://www.youtube.com/watch?v=aaa");
        assert_eq!(track.uploader.as_deref(), Some("Chan"));
    }

    #[test]
    fn test_parse_empty_search() {
        let raw = r#"{"id": "ytsearch1:zzz", "title": "zzz", "entries": []}"#;
        assert_eq!(parse_info_json(raw).unwrap(), None);
        assert!(parse_info_json("not json").is_err());
    }

    #[test]
    fn test_parse_stream_url() {
        assert_eq!(
            parse_stream_url("\nhttps://rr1.googlevideo.com/videoplayback?x=1\n").as_deref(),
            Some("https://rr1.googlevideo.com/videoplayback?x=1")
        );
        assert_eq!(parse_stream_url("  \n"), None);
    }

    #[test]
    fn test_not_found_detection() {
        assert!(looks_like_not_found("ERROR: [youtube] abc: Video unavailable"));
        assert!(looks_like_not_found("ERROR: Unsupported URL: https://example.com"));
        assert!(!looks_like_not_found("ERROR: unable to download webpage: timed out"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_resolver_error() {
        let resolver = YtDlpResolver::new("/nonexistent/yt-dlp", Duration::from_secs(1));
        let err = resolver.resolve("anything").await.unwrap_err();
        assert!(matches!(err, PlayerError::Resolver(_)));
    }
}
