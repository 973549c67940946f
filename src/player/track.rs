//! Track descriptors and chat identities.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::resolver::ResolvedTrack;

/// Chat platform a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Discord,
    Telegram,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Discord => "discord",
            Platform::Telegram => "telegram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of playback isolation: a Discord guild or a Telegram chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatKey {
    pub platform: Platform,
    pub id: i64,
}

impl ChatKey {
    pub fn telegram(id: i64) -> Self {
        Self {
            platform: Platform::Telegram,
            id,
        }
    }

    pub fn discord(id: i64) -> Self {
        Self {
            platform: Platform::Discord,
            id,
        }
    }
}

impl fmt::Display for ChatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.id)
    }
}

/// One queued song.
///
/// Built from resolver output and never mutated afterwards; the queue moves
/// whole descriptors around instead of editing them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    /// Page URL of the media (not the direct stream URL)
    pub source: String,
    pub duration_seconds: u64,
    pub is_video: bool,
    pub requested_by: i64,
    pub platform: Platform,
    pub thumbnail: Option<String>,
    pub uploader: Option<String>,
}

impl Track {
    pub fn new(
        title: impl Into<String>,
        source: impl Into<String>,
        duration_seconds: u64,
        is_video: bool,
        requested_by: i64,
        platform: Platform,
    ) -> Self {
        Self {
            title: title.into(),
            source: source.into(),
            duration_seconds,
            is_video,
            requested_by,
            platform,
            thumbnail: None,
            uploader: None,
        }
    }

    /// Creates a descriptor for a resolved search result.
    pub fn from_resolved(resolved: ResolvedTrack, requested_by: i64, platform: Platform, is_video: bool) -> Self {
        Self {
            title: resolved.title,
            source: resolved.url,
            duration_seconds: resolved.duration_seconds,
            is_video,
            requested_by,
            platform,
            thumbnail: resolved.thumbnail,
            uploader: resolved.uploader,
        }
    }
}
