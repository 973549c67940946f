//! Inline keyboards for /start and /help and their callback queries
//!
//! Callback data is `help:<topic>`. Tapping a button edits the menu message
//! in place; every topic page carries a back button to the help overview.

use teloxide::prelude::*;
use teloxide::types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId};
use teloxide::{ApiError, RequestError};

use super::handlers::{is_dropped, HandlerDeps};
use crate::core::config;
use crate::core::error::AppResult;
use crate::core::utils::format_uptime;
use crate::player::ChatKey;
use crate::storage::db;
use crate::storage::get_connection;

const CALLBACK_PREFIX: &str = "help:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpTopic {
    Menu,
    Music,
    Video,
    Admin,
    Stats,
    Advanced,
    Channel,
    BotStats,
}

impl HelpTopic {
    fn key(self) -> &'static str {
        match self {
            HelpTopic::Menu => "menu",
            HelpTopic::Music => "music",
            HelpTopic::Video => "video",
            HelpTopic::Admin => "admin",
            HelpTopic::Stats => "stats",
            HelpTopic::Advanced => "advanced",
            HelpTopic::Channel => "channel",
            HelpTopic::BotStats => "bot_stats",
        }
    }

    pub fn callback_data(self) -> String {
        format!("{}{}", CALLBACK_PREFIX, self.key())
    }

    pub fn from_callback(data: &str) -> Option<Self> {
        let key = data.strip_prefix(CALLBACK_PREFIX)?;
        [
            HelpTopic::Menu,
            HelpTopic::Music,
            HelpTopic::Video,
            HelpTopic::Admin,
            HelpTopic::Stats,
            HelpTopic::Advanced,
            HelpTopic::Channel,
            HelpTopic::BotStats,
        ]
        .into_iter()
        .find(|topic| topic.key() == key)
    }

    fn button(self, label: &str) -> InlineKeyboardButton {
        InlineKeyboardButton::callback(label, self.callback_data())
    }
}

/// Buttons under the /start greeting.
pub fn start_keyboard() -> InlineKeyboardMarkup {
    let mut bottom = vec![HelpTopic::BotStats.button("📊 Bot Stats")];
    match url::Url::parse(config::SUPPORT_CHANNEL.as_str()) {
        Ok(url) => bottom.push(InlineKeyboardButton::url("📞 Support", url)),
        Err(e) => log::warn!("SUPPORT_CHANNEL is not a valid URL, hiding the button: {}", e),
    }

    InlineKeyboardMarkup::new(vec![
        vec![
            HelpTopic::Music.button("🎵 Music Commands"),
            HelpTopic::Admin.button("⚙️ Admin Commands"),
        ],
        bottom,
    ])
}

pub fn help_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![HelpTopic::Music.button("🎵 Music"), HelpTopic::Video.button("📺 Video")],
        vec![HelpTopic::Admin.button("⚙️ Admin"), HelpTopic::Stats.button("📊 Stats")],
        vec![
            HelpTopic::Advanced.button("🔧 Advanced"),
            HelpTopic::Channel.button("📱 Channel"),
        ],
    ])
}

fn back_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![HelpTopic::Menu.button("⬅️ Back")]])
}

pub fn help_text() -> &'static str {
    "🎵 Music Bot Help Menu\n\n\
     Select a category below to see detailed commands.\n\n\
     Quick commands:\n\
     • /play <song> - play music\n\
     • /vplay <song> - play with video\n\
     • /song <song> - download a song\n\
     • /queue - show the queue\n\
     • /skip - skip the current song\n\
     • /stop - stop playback"
}

/// Static page for a topic. `Menu` and `BotStats` are built elsewhere.
pub fn topic_text(topic: HelpTopic) -> &'static str {
    match topic {
        HelpTopic::Menu => help_text(),
        HelpTopic::Music => {
            "🎵 Music commands\n\n\
             Playback:\n\
             • /play <song> - play audio in the stream\n\
             • /song <song> - download as MP3\n\
             • /pause, /resume - pause and resume\n\
             • /stop - stop and clear the queue\n\n\
             Queue:\n\
             • /queue - show the queue\n\
             • /skip - skip the current song\n\
             • /shuffle - shuffle the queue\n\
             • /loop [0-10] - 0 off, 1 song, 2 queue, 3-10 repeat count"
        }
        HelpTopic::Video => {
            "📺 Video\n\n\
             • /vplay <song> - stream the video, capped at 720p\n\n\
             Video uses the same queue and controls as audio."
        }
        HelpTopic::Admin => {
            "⚙️ Admin commands (sudoers)\n\n\
             • /auth <user id> - allow a user to control playback\n\
             • /unauth <user id> - take that right away\n\
             • /gban <user id> [reason] - ban a user everywhere\n\
             • /ungban <user id> - lift a global ban\n\
             • /maintenance on|off - maintenance mode\n\
             • /stats - bot statistics\n\n\
             /auth, /unauth, /gban and /ungban also work as a reply."
        }
        HelpTopic::Stats => {
            "📊 Statistics\n\n\
             • /stats - users, chats, commands and songs played (sudoers)\n\
             • /ping - latency and uptime\n\n\
             The Bot Stats button on /start shows a public summary."
        }
        HelpTopic::Advanced => {
            "🔧 Advanced controls\n\n\
             • /speed <0.5-2.0> - playback speed, restarts the song\n\
             • /seek <seconds|mm:ss> - jump to a position where supported"
        }
        HelpTopic::Channel => {
            "📱 Streaming\n\n\
             • /channelplay <rtmp url> - connect this chat's live stream\n\
             • /channelplay off - disconnect it\n\n\
             Chat admins and authorized users may run it."
        }
        HelpTopic::BotStats => "",
    }
}

fn bot_stats_text(deps: &HandlerDeps) -> AppResult<String> {
    let stats = {
        let conn = get_connection(&deps.db_pool)?;
        db::get_bot_stats(&conn)?
    };
    Ok(format!(
        "📊 Bot statistics\n\n\
         ⏰ Uptime: {}\n\
         🎵 Songs played: {}\n\
         ⚡ Commands used: {}\n\
         👥 Users served: {}\n\
         💬 Chats served: {}\n\
         🎧 Chats with a player: {}",
        format_uptime(deps.started_at.elapsed()),
        stats.total_songs_played,
        stats.total_commands,
        stats.total_users,
        stats.total_chats,
        deps.player.chat_count(),
    ))
}

/// Answers an inline-keyboard tap from the /start or /help menus.
pub async fn handle_callback(bot: &Bot, q: &CallbackQuery, deps: &HandlerDeps) -> AppResult<()> {
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(topic) = q.data.as_deref().and_then(HelpTopic::from_callback) else {
        log::debug!("Ignoring unknown callback data {:?}", q.data);
        return Ok(());
    };
    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };
    let chat_id = message.chat().id;

    let user_id = i64::try_from(q.from.id.0).unwrap_or(i64::MAX);
    if is_dropped(&deps.db_pool, user_id, ChatKey::telegram(chat_id.0)) {
        return Ok(());
    }

    let (text, keyboard) = match topic {
        HelpTopic::Menu => (help_text().to_string(), help_keyboard()),
        HelpTopic::BotStats => (bot_stats_text(deps)?, back_keyboard()),
        other => (topic_text(other).to_string(), back_keyboard()),
    };
    edit_menu(bot, chat_id, message.id(), text, keyboard).await
}

async fn edit_menu(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    text: String,
    keyboard: InlineKeyboardMarkup,
) -> AppResult<()> {
    match bot.edit_message_text(chat_id, message_id, text).reply_markup(keyboard).await {
        Ok(_) => Ok(()),
        // Same button tapped twice
        Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_data_parses_back() {
        for topic in [HelpTopic::Menu, HelpTopic::Music, HelpTopic::Channel, HelpTopic::BotStats] {
            assert_eq!(HelpTopic::from_callback(&topic.callback_data()), Some(topic));
        }
        assert_eq!(HelpTopic::from_callback("help:unknown"), None);
        assert_eq!(HelpTopic::from_callback("music"), None);
    }

    #[test]
    fn test_callback_data_fits_telegram_limit() {
        // Telegram rejects callback_data longer than 64 bytes
        assert!(HelpTopic::BotStats.callback_data().len() <= 64);
    }

    #[test]
    fn test_help_keyboard_layout() {
        let keyboard = help_keyboard();
        assert_eq!(keyboard.inline_keyboard.len(), 3);
        assert!(keyboard.inline_keyboard.iter().all(|row| row.len() == 2));
    }

    #[test]
    fn test_start_keyboard_has_stats_button() {
        let keyboard = start_keyboard();
        let labels: Vec<&str> = keyboard
            .inline_keyboard
            .iter()
            .flatten()
            .map(|button| button.text.as_str())
            .collect();
        assert!(labels.contains(&"📊 Bot Stats"));
        assert!(labels.contains(&"🎵 Music Commands"));
    }

    #[test]
    fn test_topic_pages_mention_their_commands() {
        assert!(topic_text(HelpTopic::Music).contains("/loop"));
        assert!(topic_text(HelpTopic::Admin).contains("/gban"));
        assert!(topic_text(HelpTopic::Channel).contains("/channelplay"));
        assert!(topic_text(HelpTopic::Advanced).contains("/speed"));
    }
}
