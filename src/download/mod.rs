//! yt-dlp integration: query resolution, stream URLs and `/song` downloads

pub mod song;
pub mod ytdlp;

pub use song::{cleanup_downloads, download_song, DownloadedSong};
pub use ytdlp::YtDlpResolver;
