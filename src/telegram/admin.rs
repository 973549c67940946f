//! Sudo commands for the Telegram bot
//!
//! The dispatcher only lets sudoers reach these handlers.
//!
//! - /stats: bot-wide statistics
//! - /gban, /ungban: global bans
//! - /auth, /unauth: playback management rights
//! - /maintenance: runtime maintenance switch

use teloxide::prelude::*;

use super::handlers::{CommandContext, HandlerDeps};
use crate::core::config::admin::is_sudoer;
use crate::core::error::AppResult;
use crate::core::utils::format_uptime;
use crate::storage::db;
use crate::storage::get_connection;

/// Splits `"<user id> [rest]"`.
pub fn parse_user_arg(args: &str) -> Option<(i64, &str)> {
    let args = args.trim();
    let (id, rest) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    let id = id.parse::<i64>().ok().filter(|&id| id != 0)?;
    Some((id, rest.trim()))
}

/// Target user from the arguments, or the author of the replied-to message.
fn target_user<'a>(msg: &Message, args: &'a str) -> Option<(i64, &'a str)> {
    if let Some(parsed) = parse_user_arg(args) {
        return Some(parsed);
    }
    let from = msg.reply_to_message()?.from.as_ref()?;
    let id = i64::try_from(from.id.0).ok()?;
    Some((id, args.trim()))
}

pub async fn stats(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps) -> AppResult<()> {

    let (stats, recent) = {
        let conn = get_connection(&deps.db_pool)?;
        (db::get_bot_stats(&conn)?, db::get_recent_songs(&conn, 5, None)?)
    };

    let mut text = format!(
        "📊 Bot statistics\n\n\
         👤 Users: {} ({} active in 24h)\n\
         💬 Chats: {} ({} active in 24h)\n\
         ⌨️ Commands: {}\n\
         🎵 Songs played: {}\n\
         🚫 Banned users: {}\n\
         ⛔ Blacklisted chats: {}\n\
         🎧 Chats with a player: {}\n\
         ⏱ Uptime: {}",
        stats.total_users,
        stats.active_users_24h,
        stats.total_chats,
        stats.active_chats_24h,
        stats.total_commands,
        stats.total_songs_played,
        stats.banned_users,
        stats.blacklisted_chats,
        deps.player.chat_count(),
        format_uptime(deps.started_at.elapsed()),
    );
    if !recent.is_empty() {
        text.push_str("\n\nRecently played:");
        for song in &recent {
            text.push_str(&format!("\n• {}", song.title));
        }
    }

    bot.send_message(ctx.chat_id, text).await?;
    Ok(())
}

pub async fn gban(bot: &Bot, msg: &Message, ctx: &CommandContext, deps: &HandlerDeps, args: &str) -> AppResult<()> {
    let Some((user_id, reason)) = target_user(msg, args) else {
        bot.send_message(ctx.chat_id, "Usage: /gban <user id> [reason], or reply to a message")
            .await?;
        return Ok(());
    };
    if is_sudoer(user_id) {
        bot.send_message(ctx.chat_id, "❌ Sudoers can't be banned.").await?;
        return Ok(());
    }

    let reason = if reason.is_empty() { "no reason given" } else { reason };
    {
        let conn = get_connection(&deps.db_pool)?;
        db::global_ban_user(&conn, user_id, reason, ctx.user_id)?;
    }
    log::warn!("User {} globally banned by {}: {}", user_id, ctx.user_id, reason);
    bot.send_message(ctx.chat_id, format!("🚫 User {} is banned globally.\nReason: {}", user_id, reason))
        .await?;
    Ok(())
}

pub async fn ungban(bot: &Bot, msg: &Message, ctx: &CommandContext, deps: &HandlerDeps, args: &str) -> AppResult<()> {
    let Some((user_id, _)) = target_user(msg, args) else {
        bot.send_message(ctx.chat_id, "Usage: /ungban <user id>, or reply to a message")
            .await?;
        return Ok(());
    };

    let removed = {
        let conn = get_connection(&deps.db_pool)?;
        db::global_unban_user(&conn, user_id)?
    };
    let text = if removed {
        log::info!("User {} unbanned by {}", user_id, ctx.user_id);
        format!("✅ User {} is no longer banned.", user_id)
    } else {
        format!("User {} was not banned.", user_id)
    };
    bot.send_message(ctx.chat_id, text).await?;
    Ok(())
}

pub async fn auth(bot: &Bot, msg: &Message, ctx: &CommandContext, deps: &HandlerDeps, args: &str) -> AppResult<()> {
    let Some((user_id, _)) = target_user(msg, args) else {
        bot.send_message(ctx.chat_id, "Usage: /auth <user id>, or reply to a message")
            .await?;
        return Ok(());
    };

    {
        let conn = get_connection(&deps.db_pool)?;
        db::authorize_user(&conn, user_id)?;
    }
    bot.send_message(ctx.chat_id, format!("✅ User {} can now control playback.", user_id))
        .await?;
    Ok(())
}

pub async fn unauth(bot: &Bot, msg: &Message, ctx: &CommandContext, deps: &HandlerDeps, args: &str) -> AppResult<()> {
    let Some((user_id, _)) = target_user(msg, args) else {
        bot.send_message(ctx.chat_id, "Usage: /unauth <user id>, or reply to a message")
            .await?;
        return Ok(());
    };

    let removed = {
        let conn = get_connection(&deps.db_pool)?;
        db::unauthorize_user(&conn, user_id)?
    };
    let text = if removed {
        format!("✅ User {} can no longer control playback.", user_id)
    } else {
        format!("User {} was not authorized.", user_id)
    };
    bot.send_message(ctx.chat_id, text).await?;
    Ok(())
}

pub async fn maintenance(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps, args: &str) -> AppResult<()> {
    let text = match args.trim().to_lowercase().as_str() {
        "on" | "enable" => {
            deps.set_maintenance(true);
            log::warn!("🔧 Maintenance mode enabled by {}", ctx.user_id);
            "🔧 Maintenance mode enabled.".to_string()
        }
        "off" | "disable" => {
            deps.set_maintenance(false);
            log::info!("Maintenance mode disabled by {}", ctx.user_id);
            "✅ Maintenance mode disabled.".to_string()
        }
        _ => format!(
            "Maintenance mode is {}. Usage: /maintenance on|off",
            if deps.in_maintenance() { "on" } else { "off" }
        ),
    };
    bot.send_message(ctx.chat_id, text).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_arg() {
        assert_eq!(parse_user_arg("12345 spamming links"), Some((12345, "spamming links")));
        assert_eq!(parse_user_arg(" 777 "), Some((777, "")));
        assert_eq!(parse_user_arg("@someone"), None);
        assert_eq!(parse_user_arg("0"), None);
        assert_eq!(parse_user_arg(""), None);
    }
}
