//! Dispatcher schema and command gatekeeping

use teloxide::dispatching::{HandlerExt, UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;

use super::types::{ensure_known, CommandContext, HandlerDeps, HandlerError};
use crate::core::config;
use crate::core::error::AppResult;
use crate::core::metrics;
use crate::core::rate_limiter::RateLimiter;
use crate::player::{ChatKey, Platform};
use crate::storage::db::{self, DbPool};
use crate::storage::get_connection;
use crate::telegram::bot::Command;
use crate::telegram::{admin, menu, music};

const NOT_SUDOER: &str = "❌ This command is for sudoers only.";

/// What happens to a command before it runs
#[derive(Debug, PartialEq, Eq)]
pub enum Access {
    Allow,
    /// Banned user or blacklisted chat: no reply at all
    Drop,
    Deny(String),
}

/// Builds the dispatcher handler tree.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    let deps_callback = deps.clone();

    dptree::entry()
        .branch(commands_handler(deps))
        .branch(callback_handler(deps_callback))
}

fn commands_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message().branch(dptree::entry().filter_command::<Command>().endpoint(
        move |bot: Bot, msg: Message, cmd: Command| {
            let deps = deps.clone();
            async move { command_handler(bot, msg, cmd, deps).await }
        },
    ))
}

/// Handler for callback queries (inline keyboard buttons)
fn callback_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_callback_query().endpoint(move |bot: Bot, q: CallbackQuery| {
        let deps = deps.clone();
        async move {
            if let Err(e) = menu::handle_callback(&bot, &q, &deps).await {
                log::error!("Callback {:?} from {} failed: {}", q.data, q.from.id, e);
                metrics::record_error("callback", "menu");
            }
            Ok::<(), HandlerError>(())
        }
    })
}

fn lookup_dropped(db_pool: &DbPool, user_id: i64, chat: ChatKey) -> AppResult<bool> {
    let conn = get_connection(db_pool)?;
    if db::is_globally_banned(&conn, user_id)? {
        log::debug!("Dropping update from banned user {}", user_id);
        return Ok(true);
    }
    if db::is_chat_blacklisted(&conn, chat.id, Platform::Telegram)? {
        log::debug!("Dropping update in blacklisted chat {}", chat);
        return Ok(true);
    }
    Ok(false)
}

/// Banned user or blacklisted chat. Fails closed when the lookup errors.
pub fn is_dropped(db_pool: &DbPool, user_id: i64, chat: ChatKey) -> bool {
    lookup_dropped(db_pool, user_id, chat).unwrap_or_else(|e| {
        log::error!(
            "Ban lookup failed for {} in {}, dropping the update: {}",
            user_id,
            chat,
            e
        );
        metrics::record_error("database", "ban_lookup");
        true
    })
}

/// Decides whether a command from `ctx` may run.
pub async fn check_access(
    db_pool: &DbPool,
    rate_limiter: &RateLimiter,
    maintenance: bool,
    ctx: &CommandContext,
    command: &Command,
) -> Access {
    if is_dropped(db_pool, ctx.user_id, ctx.chat) {
        return Access::Drop;
    }

    let sudoer = config::admin::is_sudoer(ctx.user_id);
    if command.is_sudo_only() && !sudoer {
        return Access::Deny(NOT_SUDOER.to_string());
    }
    if maintenance && !sudoer {
        return Access::Deny("🔧 The bot is under maintenance, please try again later.".to_string());
    }

    if !sudoer && !rate_limiter.check(ctx.user_id).await {
        metrics::record_rate_limit_hit(command.name());
        let wait = rate_limiter
            .remaining_time(ctx.user_id)
            .await
            .map(|d| d.as_secs().max(1))
            .unwrap_or(1);
        return Access::Deny(format!("⏳ Slow down! Try again in {}s.", wait));
    }

    Access::Allow
}

async fn command_handler(bot: Bot, msg: Message, cmd: Command, deps: HandlerDeps) -> Result<(), HandlerError> {
    let ctx = CommandContext::from_message(&msg);

    if let Err(e) = ensure_known(&deps.db_pool, &ctx) {
        log::warn!("Failed to register user {} in {}: {}", ctx.user_id, ctx.chat, e);
    }

    match check_access(&deps.db_pool, &deps.rate_limiter, deps.in_maintenance(), &ctx, &cmd).await {
        Access::Allow => {}
        Access::Drop => return Ok(()),
        Access::Deny(text) => {
            bot.send_message(ctx.chat_id, text).await?;
            return Ok(());
        }
    }

    metrics::record_command(cmd.name());
    log::info!("/{} from {} in {}", cmd.name(), ctx.user_id, ctx.chat);

    let result = run_command(&bot, &msg, &ctx, &cmd, &deps).await;

    let error_text = result.as_ref().err().map(|e| e.to_string());
    match get_connection(&deps.db_pool) {
        Ok(conn) => {
            if let Err(e) = db::log_command(
                &conn,
                ctx.user_id,
                ctx.chat.id,
                Platform::Telegram,
                cmd.name(),
                cmd.args().filter(|a| !a.is_empty()),
                result.is_ok(),
                error_text.as_deref(),
            ) {
                log::warn!("Failed to log /{}: {}", cmd.name(), e);
            }
        }
        Err(e) => log::warn!("Failed to log /{}: {}", cmd.name(), e),
    }

    if let Err(e) = result {
        log::error!("/{} failed in {}: {}", cmd.name(), ctx.chat, e);
        metrics::record_error("command", cmd.name());
        bot.send_message(ctx.chat_id, format!("❌ {}", e.user_message())).await?;
    }

    Ok(())
}

async fn run_command(
    bot: &Bot,
    msg: &Message,
    ctx: &CommandContext,
    cmd: &Command,
    deps: &HandlerDeps,
) -> AppResult<()> {
    match cmd {
        Command::Start => music::start(bot, ctx).await,
        Command::Help => {
            bot.send_message(ctx.chat_id, menu::help_text())
                .reply_markup(menu::help_keyboard())
                .await?;
            Ok(())
        }
        Command::Play(query) => music::play(bot, ctx, deps, query, false).await,
        Command::Vplay(query) => music::play(bot, ctx, deps, query, true).await,
        Command::Song(query) => music::song(bot, ctx, deps, query).await,
        Command::Queue => music::queue(bot, ctx, deps).await,
        Command::Ping => music::ping(bot, ctx, deps).await,
        Command::Stats => admin::stats(bot, ctx, deps).await,
        Command::Gban(args) => admin::gban(bot, msg, ctx, deps, args).await,
        Command::Ungban(args) => admin::ungban(bot, msg, ctx, deps, args).await,
        Command::Auth(args) => admin::auth(bot, msg, ctx, deps, args).await,
        Command::Unauth(args) => admin::unauth(bot, msg, ctx, deps, args).await,
        Command::Maintenance(args) => admin::maintenance(bot, ctx, deps, args).await,
        control => {
            if !music::can_manage(bot, ctx, deps).await? {
                bot.send_message(
                    ctx.chat_id,
                    "❌ Only chat admins and authorized users can control playback.",
                )
                .await?;
                return Ok(());
            }
            match control {
                Command::Shuffle => music::shuffle(bot, ctx, deps).await,
                Command::Skip => music::skip(bot, ctx, deps).await,
                Command::Stop => music::stop(bot, ctx, deps).await,
                Command::Pause => music::pause(bot, ctx, deps).await,
                Command::Resume => music::resume(bot, ctx, deps).await,
                Command::Loop(args) => music::set_loop(bot, ctx, deps, args).await,
                Command::Speed(args) => music::speed(bot, ctx, deps, args).await,
                Command::Seek(args) => music::seek(bot, ctx, deps, args).await,
                Command::Channelplay(args) => music::channelplay(bot, ctx, deps, args).await,
                _ => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use teloxide::types::ChatId;

    fn ctx(user_id: i64, chat_id: i64) -> CommandContext {
        CommandContext {
            chat_id: ChatId(chat_id),
            chat: ChatKey::telegram(chat_id),
            user_id,
            username: None,
            first_name: Some("Test".to_string()),
            last_name: None,
            chat_title: None,
            chat_type: "group",
        }
    }

    fn test_pool() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.db");
        let pool = db::create_pool(path.to_str().unwrap()).unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_banned_user_is_dropped() {
        let (_dir, pool) = test_pool();
        let limiter = RateLimiter::new(10, Duration::from_secs(60), true);
        {
            let conn = get_connection(&pool).unwrap();
            db::global_ban_user(&conn, 42, "spam", 1).unwrap();
        }
        let access = check_access(&pool, &limiter, false, &ctx(42, -100), &Command::Queue).await;
        assert_eq!(access, Access::Drop);
    }

    #[tokio::test]
    async fn test_blacklisted_chat_is_dropped() {
        let (_dir, pool) = test_pool();
        let limiter = RateLimiter::new(10, Duration::from_secs(60), true);
        {
            let conn = get_connection(&pool).unwrap();
            db::add_chat(&conn, -200, Platform::Telegram, None, "group").unwrap();
            db::blacklist_chat(&conn, -200, Platform::Telegram).unwrap();
        }
        let access = check_access(&pool, &limiter, false, &ctx(7, -200), &Command::Queue).await;
        assert_eq!(access, Access::Drop);
    }

    #[tokio::test]
    async fn test_maintenance_denies_regular_users() {
        let (_dir, pool) = test_pool();
        let limiter = RateLimiter::new(10, Duration::from_secs(60), true);
        let access = check_access(&pool, &limiter, true, &ctx(7, -100), &Command::Ping).await;
        assert!(matches!(access, Access::Deny(text) if text.contains("maintenance")));
    }

    #[tokio::test]
    async fn test_rate_limit_denies_after_budget() {
        let (_dir, pool) = test_pool();
        let limiter = RateLimiter::new(2, Duration::from_secs(60), true);
        let user = ctx(9, -100);
        assert_eq!(
            check_access(&pool, &limiter, false, &user, &Command::Ping).await,
            Access::Allow
        );
        assert_eq!(
            check_access(&pool, &limiter, false, &user, &Command::Ping).await,
            Access::Allow
        );
        let third = check_access(&pool, &limiter, false, &user, &Command::Ping).await;
        assert!(matches!(third, Access::Deny(text) if text.contains("Slow down")));
    }

    #[tokio::test]
    async fn test_sudo_only_command_denied_for_regular_user() {
        let (_dir, pool) = test_pool();
        let limiter = RateLimiter::new(10, Duration::from_secs(60), true);
        let access = check_access(&pool, &limiter, false, &ctx(7, -100), &Command::Gban("12".to_string())).await;
        assert_eq!(access, Access::Deny(NOT_SUDOER.to_string()));

        let access = check_access(&pool, &limiter, false, &ctx(7, -100), &Command::Queue).await;
        assert_eq!(access, Access::Allow);
    }

    #[tokio::test]
    async fn test_broken_ban_lookup_drops_command() {
        let (_dir, pool) = test_pool();
        {
            let conn = get_connection(&pool).unwrap();
            conn.execute_batch("DROP TABLE global_bans").unwrap();
        }
        let limiter = RateLimiter::new(10, Duration::from_secs(60), true);
        let access = check_access(&pool, &limiter, false, &ctx(7, -100), &Command::Play("song".to_string())).await;
        assert_eq!(access, Access::Drop);
        assert!(is_dropped(&pool, 7, ChatKey::telegram(-100)));
    }
}
