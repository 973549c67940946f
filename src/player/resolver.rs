//! Resolver contract consumed by the queue manager.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::PlayerError;
use super::track::Track;

/// Metadata for a single media item found by a resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTrack {
    pub id: String,
    pub title: String,
    /// Canonical page URL, stored as the track source
    pub url: String,
    pub duration_seconds: u64,
    pub thumbnail: Option<String>,
    pub uploader: Option<String>,
    pub view_count: Option<u64>,
}

#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Looks up a search query or URL. Returns [`PlayerError::NotFound`] when
    /// nothing matches.
    async fn resolve(&self, query: &str) -> Result<ResolvedTrack, PlayerError>;

    /// Extracts the direct media URL a driver can stream for `track`.
    async fn stream_source(&self, track: &Track) -> Result<String, PlayerError>;
}
