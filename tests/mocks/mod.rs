//! Scripted stand-ins for the playback driver and the resolver
//!
//! The queue manager only sees the `PlaybackDriver` / `TrackResolver`
//! traits, so tests drive it with these and fire completions by hand.

pub mod mock_player;

pub use mock_player::{MockDriver, MockResolver};
