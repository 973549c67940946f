//! `/song`: download a track as an MP3 file.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::process::Command;

use crate::core::error::{AppError, AppResult};
use crate::core::metrics;
use crate::core::process::{run_with_timeout, stderr_summary};
use crate::core::utils::clean_filename;
use crate::player::ResolvedTrack;

#[derive(Debug, Clone)]
pub struct DownloadedSong {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub title: String,
    pub uploader: Option<String>,
    pub duration_seconds: u64,
}

/// `<clean title>-<id>` without extension.
pub fn song_file_stem(track: &ResolvedTrack) -> String {
    let title = clean_filename(&track.title);
    if track.id.is_empty() {
        title
    } else {
        format!("{}-{}", title, clean_filename(&track.id))
    }
}

/// Extracts `track` as MP3 into `dir`.
pub async fn download_song(
    ytdl_bin: &str,
    track: &ResolvedTrack,
    dir: &Path,
    timeout: Duration,
) -> AppResult<DownloadedSong> {
    tokio::fs::create_dir_all(dir).await?;

    let stem = song_file_stem(track);
    let template = dir.join(format!("{}.%(ext)s", stem));
    let path = dir.join(format!("{}.mp3", stem));

    let mut cmd = Command::new(ytdl_bin);
    cmd.args(["-x", "--audio-format", "mp3", "--audio-quality", "192K", "--no-playlist", "--no-warnings"])
        .arg("-o")
        .arg(&template)
        .arg(&track.url);

    log::info!("Downloading \"{}\" to {}", track.title, path.display());
    let timer = metrics::YTDLP_EXECUTION_DURATION_SECONDS
        .with_label_values(&["download"])
        .start_timer();
    let output = run_with_timeout(&mut cmd, timeout).await?;
    timer.observe_duration();

    if !output.status.success() {
        metrics::record_error("download", "song");
        return Err(AppError::Download(stderr_summary(&output)));
    }

    let size_bytes = match tokio::fs::metadata(&path).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            metrics::record_error("download", "song");
            return Err(AppError::Download(format!(
                "yt-dlp finished but {} is missing: {}",
                path.display(),
                e
            )));
        }
    };

    Ok(DownloadedSong {
        path,
        size_bytes,
        title: track.title.clone(),
        uploader: track.uploader.clone(),
        duration_seconds: track.duration_seconds,
    })
}

/// Removes files in `dir` whose modification time is at least `max_age` ago.
///
/// Returns how many files were deleted. A missing directory counts as empty.
pub async fn cleanup_downloads(dir: &Path, max_age: Duration) -> AppResult<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let now = SystemTime::now();
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let meta = match entry.metadata().await {
            Ok(meta) if meta.is_file() => meta,
            _ => continue,
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => log::warn!("Failed to remove {}: {}", entry.path().display(), e),
        }
    }

    if removed > 0 {
        log::info!("🧹 Removed {} old download(s) from {}", removed, dir.display());
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(title: &str, id: &str) -> ResolvedTrack {
        ResolvedTrack {
            id: id.to_string(),
            title: title.to_string(),
            url: format!("https://www.youtube.com/watch?v={}", id),
            duration_seconds: 180,
            thumbnail: None,
            uploader: None,
            view_count: None,
        }
    }

    #[test]
    fn test_song_file_stem() {
        assert_eq!(song_file_stem(&resolved("Song: Live / 2020", "abc")), "Song__Live___2020-abc");
        assert_eq!(song_file_stem(&resolved("Plain", "")), "Plain");
    }

    #[tokio::test]
    async fn test_cleanup_respects_age() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        assert_eq!(cleanup_downloads(dir.path(), Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(cleanup_downloads(dir.path(), Duration::ZERO).await.unwrap(), 1);
        assert!(dir.path().join("nested").exists());
    }

    #[tokio::test]
    async fn test_cleanup_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(cleanup_downloads(&missing, Duration::ZERO).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_download_with_missing_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = download_song("/nonexistent/yt-dlp", &resolved("x", "y"), dir.path(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
    }
}
