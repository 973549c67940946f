//! Chat notifications for playback events that happen outside a command:
//! the next track starting, the queue running dry, a stream dying.

use std::sync::Arc;

use teloxide::prelude::*;
use tokio::sync::mpsc;

use crate::core::utils::{format_duration, truncate_text};
use crate::player::{Platform, PlayerNotice, Track};
use crate::storage::db::{self, DbPool};

/// Text posted to the chat for a notice.
pub fn notice_text(notice: &PlayerNotice) -> String {
    match notice {
        PlayerNotice::NowPlaying { track, .. } => format!(
            "🎶 Now playing: {} [{}]{}\nRequested by {}",
            truncate_text(&track.title, 80),
            format_duration(track.duration_seconds),
            if track.is_video { " 🎬" } else { "" },
            track.requested_by
        ),
        PlayerNotice::QueueFinished { .. } => "✅ Queue finished.".to_string(),
        PlayerNotice::PlaybackFailed { error, .. } => format!("❌ Playback stopped: {}", error),
    }
}

fn record_play(db_pool: &DbPool, chat_id: i64, platform: Platform, track: &Track) {
    let result = db::get_connection(db_pool)
        .map_err(|e| e.to_string())
        .and_then(|conn| {
            db::log_music_play(
                &conn,
                track.requested_by,
                chat_id,
                platform,
                &track.title,
                &track.source,
                track.duration_seconds,
            )
            .map_err(|e| e.to_string())
        });
    if let Err(e) = result {
        log::warn!("Failed to record play of {}: {}", track.title, e);
    }
}

/// Posts notices to Telegram chats and records started tracks, until the
/// player is dropped.
pub async fn run_notice_loop(bot: Bot, db_pool: Arc<DbPool>, mut notices: mpsc::UnboundedReceiver<PlayerNotice>) {
    log::info!("Player notice loop started");
    while let Some(notice) = notices.recv().await {
        let chat = match &notice {
            PlayerNotice::NowPlaying { chat, track } => {
                record_play(&db_pool, chat.id, chat.platform, track);
                *chat
            }
            PlayerNotice::QueueFinished { chat } | PlayerNotice::PlaybackFailed { chat, .. } => *chat,
        };

        if chat.platform != Platform::Telegram {
            continue;
        }
        if let Err(e) = bot.send_message(ChatId(chat.id), notice_text(&notice)).await {
            log::warn!("Failed to notify {}: {}", chat, e);
        }
    }
    log::info!("Player notice loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{ChatKey, PlayerError};

    #[test]
    fn test_now_playing_text() {
        let mut track = Track::new("Song", "https://example.com/s", 125, false, 42, Platform::Telegram);
        let notice = PlayerNotice::NowPlaying {
            chat: ChatKey::telegram(-1),
            track: track.clone(),
        };
        assert_eq!(notice_text(&notice), "🎶 Now playing: Song [02:05]\nRequested by 42");

        track.is_video = true;
        let notice = PlayerNotice::NowPlaying {
            chat: ChatKey::telegram(-1),
            track,
        };
        assert!(notice_text(&notice).contains("🎬"));
    }

    #[test]
    fn test_failure_text() {
        let notice = PlayerNotice::PlaybackFailed {
            chat: ChatKey::telegram(-1),
            error: PlayerError::NotFound("x".to_string()),
        };
        assert_eq!(notice_text(&notice), "❌ Playback stopped: nothing found for \"x\"");
    }

    #[test]
    fn test_record_play_updates_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notices.db");
        let pool = db::create_pool(path.to_str().unwrap()).unwrap();
        let track = Track::new("Song", "https://example.com/s", 60, false, 7, Platform::Telegram);

        record_play(&pool, -5, Platform::Telegram, &track);

        let conn = db::get_connection(&pool).unwrap();
        let recent = db::get_recent_songs(&conn, 10, Some((-5, Platform::Telegram))).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].title, "Song");
    }
}
