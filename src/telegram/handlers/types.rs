//! Handler types, dependencies, and user bookkeeping helpers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use teloxide::prelude::*;
use teloxide::types::Message;

use crate::core::error::AppResult;
use crate::core::rate_limiter::RateLimiter;
use crate::player::{ChatKey, Platform, QueueManager};
use crate::storage::db::{self, DbPool};
use crate::storage::get_connection;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub db_pool: Arc<DbPool>,
    pub player: Arc<QueueManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub maintenance: Arc<AtomicBool>,
    pub started_at: Instant,
}

impl HandlerDeps {
    pub fn new(
        db_pool: Arc<DbPool>,
        player: Arc<QueueManager>,
        rate_limiter: Arc<RateLimiter>,
        maintenance: bool,
    ) -> Self {
        Self {
            db_pool,
            player,
            rate_limiter,
            maintenance: Arc::new(AtomicBool::new(maintenance)),
            started_at: Instant::now(),
        }
    }

    pub fn in_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::Relaxed)
    }

    pub fn set_maintenance(&self, enabled: bool) {
        self.maintenance.store(enabled, Ordering::Relaxed);
    }
}

/// Who sent a command and where
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub chat_id: ChatId,
    pub chat: ChatKey,
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub chat_title: Option<String>,
    pub chat_type: &'static str,
}

impl CommandContext {
    /// Extract sender and chat info from a Telegram message
    pub fn from_message(msg: &Message) -> Self {
        let from = msg.from.as_ref();
        let chat_type = if msg.chat.is_private() {
            "private"
        } else if msg.chat.is_supergroup() {
            "supergroup"
        } else if msg.chat.is_group() {
            "group"
        } else {
            "channel"
        };

        Self {
            chat_id: msg.chat.id,
            chat: ChatKey::telegram(msg.chat.id.0),
            user_id: from.and_then(|u| i64::try_from(u.id.0).ok()).unwrap_or(0),
            username: from.and_then(|u| u.username.clone()),
            first_name: from.map(|u| u.first_name.clone()),
            last_name: from.and_then(|u| u.last_name.clone()),
            chat_title: msg.chat.title().map(str::to_string),
            chat_type,
        }
    }

    pub fn is_private(&self) -> bool {
        self.chat_type == "private"
    }
}

/// Registers (or refreshes) the sender and the chat.
pub fn ensure_known(db_pool: &DbPool, ctx: &CommandContext) -> AppResult<()> {
    let conn = get_connection(db_pool)?;
    if ctx.user_id != 0 {
        db::add_user(
            &conn,
            ctx.user_id,
            ctx.username.as_deref(),
            ctx.first_name.as_deref(),
            ctx.last_name.as_deref(),
            Platform::Telegram,
        )?;
    }
    db::add_chat(&conn, ctx.chat.id, Platform::Telegram, ctx.chat_title.as_deref(), ctx.chat_type)?;
    Ok(())
}
