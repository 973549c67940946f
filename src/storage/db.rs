use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::Serialize;
use std::time::Duration;

use crate::core::error::AppResult;
use crate::player::Platform;
use crate::storage::migrations::run_migrations;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create a new database connection pool
///
/// Initializes a pool with up to 10 connections and applies schema migrations
/// on the first one.
pub fn create_pool(database_path: &str) -> AppResult<DbPool> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|c| {
        c.busy_timeout(Duration::from_secs(5))?;
        c.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
    });
    let pool = Pool::builder()
        .max_size(10) // Maximum 10 connections in the pool
        .build(manager)?;

    let mut conn = pool.get()?;
    run_migrations(&mut conn)?;

    Ok(pool)
}

/// Get a connection from the pool
///
/// The connection goes back to the pool when dropped.
pub fn get_connection(pool: &DbPool) -> std::result::Result<DbConnection, r2d2::Error> {
    pool.get()
}

/// Aggregate numbers for /stats and the keep-alive server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BotStats {
    pub total_users: i64,
    pub total_chats: i64,
    pub total_commands: i64,
    pub total_songs_played: i64,
    pub active_users_24h: i64,
    pub active_chats_24h: i64,
    pub banned_users: i64,
    pub blacklisted_chats: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayedSong {
    pub user_id: i64,
    pub chat_id: i64,
    pub platform: String,
    pub title: String,
    pub url: String,
    pub duration_seconds: i64,
    pub played_at: String,
}

/// Inserts or refreshes a user. Authorization and ban flags survive updates.
pub fn add_user(
    conn: &Connection,
    user_id: i64,
    username: Option<&str>,
    first_name: Option<&str>,
    last_name: Option<&str>,
    platform: Platform,
) -> Result<()> {
    conn.execute(
        "INSERT INTO users (user_id, username, first_name, last_name, platform, last_active)
         VALUES (?1, ?2, ?3, ?4, ?5, CURRENT_TIMESTAMP)
         ON CONFLICT(user_id) DO UPDATE SET
            username = excluded.username,
            first_name = excluded.first_name,
            last_name = excluded.last_name,
            platform = excluded.platform,
            last_active = CURRENT_TIMESTAMP",
        params![user_id, username, first_name, last_name, platform.as_str()],
    )?;
    Ok(())
}

/// Inserts or refreshes a chat. The blacklist flag survives updates.
pub fn add_chat(
    conn: &Connection,
    chat_id: i64,
    platform: Platform,
    title: Option<&str>,
    chat_type: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO chats (chat_id, platform, chat_title, chat_type, last_active)
         VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)
         ON CONFLICT(chat_id, platform) DO UPDATE SET
            chat_title = excluded.chat_title,
            chat_type = excluded.chat_type,
            last_active = CURRENT_TIMESTAMP",
        params![chat_id, platform.as_str(), title, chat_type],
    )?;
    Ok(())
}

pub fn is_authorized(conn: &Connection, user_id: i64) -> Result<bool> {
    let flag: Option<bool> = conn
        .query_row(
            "SELECT is_authorized FROM users WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(flag.unwrap_or(false))
}

/// Marks a user as authorized, creating the row if needed.
pub fn authorize_user(conn: &Connection, user_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO users (user_id, is_authorized) VALUES (?1, 1)
         ON CONFLICT(user_id) DO UPDATE SET is_authorized = 1",
        [user_id],
    )?;
    Ok(())
}

/// Returns `false` if the user was unknown.
pub fn unauthorize_user(conn: &Connection, user_id: i64) -> Result<bool> {
    let changed = conn.execute("UPDATE users SET is_authorized = 0 WHERE user_id = ?1", [user_id])?;
    Ok(changed > 0)
}

pub fn is_globally_banned(conn: &Connection, user_id: i64) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM global_bans WHERE user_id = ?1)",
        [user_id],
        |row| row.get(0),
    )
}

pub fn global_ban_user(conn: &Connection, user_id: i64, reason: &str, banned_by: i64) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT OR REPLACE INTO global_bans (user_id, reason, banned_by, ban_date)
         VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)",
        params![user_id, reason, banned_by],
    )?;
    tx.execute("UPDATE users SET is_banned = 1 WHERE user_id = ?1", [user_id])?;
    tx.commit()
}

/// Returns `false` if the user was not banned.
pub fn global_unban_user(conn: &Connection, user_id: i64) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let removed = tx.execute("DELETE FROM global_bans WHERE user_id = ?1", [user_id])?;
    tx.execute("UPDATE users SET is_banned = 0 WHERE user_id = ?1", [user_id])?;
    tx.commit()?;
    Ok(removed > 0)
}

pub fn is_chat_blacklisted(conn: &Connection, chat_id: i64, platform: Platform) -> Result<bool> {
    let flag: Option<bool> = conn
        .query_row(
            "SELECT is_blacklisted FROM chats WHERE chat_id = ?1 AND platform = ?2",
            params![chat_id, platform.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(flag.unwrap_or(false))
}

pub fn blacklist_chat(conn: &Connection, chat_id: i64, platform: Platform) -> Result<()> {
    conn.execute(
        "INSERT INTO chats (chat_id, platform, is_blacklisted) VALUES (?1, ?2, 1)
         ON CONFLICT(chat_id, platform) DO UPDATE SET is_blacklisted = 1",
        params![chat_id, platform.as_str()],
    )?;
    Ok(())
}

/// Returns `false` if the chat is unknown.
pub fn whitelist_chat(conn: &Connection, chat_id: i64, platform: Platform) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE chats SET is_blacklisted = 0 WHERE chat_id = ?1 AND platform = ?2",
        params![chat_id, platform.as_str()],
    )?;
    Ok(changed > 0)
}

/// Records one command and bumps the user and chat counters.
#[allow(clippy::too_many_arguments)]
pub fn log_command(
    conn: &Connection,
    user_id: i64,
    chat_id: i64,
    platform: Platform,
    command: &str,
    arguments: Option<&str>,
    success: bool,
    error_message: Option<&str>,
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO command_logs (user_id, chat_id, platform, command, arguments, success, error_message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![user_id, chat_id, platform.as_str(), command, arguments, success, error_message],
    )?;
    tx.execute(
        "UPDATE users SET total_commands = total_commands + 1, last_active = CURRENT_TIMESTAMP
         WHERE user_id = ?1",
        [user_id],
    )?;
    tx.execute(
        "UPDATE chats SET total_commands = total_commands + 1, last_active = CURRENT_TIMESTAMP
         WHERE chat_id = ?1 AND platform = ?2",
        params![chat_id, platform.as_str()],
    )?;
    tx.commit()
}

/// Records a started track and bumps the play counters.
pub fn log_music_play(
    conn: &Connection,
    user_id: i64,
    chat_id: i64,
    platform: Platform,
    title: &str,
    url: &str,
    duration_seconds: u64,
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO music_history (user_id, chat_id, platform, song_title, song_url, duration)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![user_id, chat_id, platform.as_str(), title, url, duration_seconds as i64],
    )?;
    tx.execute(
        "UPDATE users SET total_songs_played = total_songs_played + 1 WHERE user_id = ?1",
        [user_id],
    )?;
    tx.execute(
        "UPDATE chats SET total_songs_played = total_songs_played + 1 WHERE chat_id = ?1 AND platform = ?2",
        params![chat_id, platform.as_str()],
    )?;
    tx.commit()
}

fn count(conn: &Connection, sql: &str) -> Result<i64> {
    conn.query_row(sql, [], |row| row.get::<_, Option<i64>>(0))
        .map(|v| v.unwrap_or(0))
}

pub fn get_bot_stats(conn: &Connection) -> Result<BotStats> {
    Ok(BotStats {
        total_users: count(conn, "SELECT COUNT(*) FROM users")?,
        total_chats: count(conn, "SELECT COUNT(*) FROM chats")?,
        total_commands: count(conn, "SELECT COUNT(*) FROM command_logs")?,
        total_songs_played: count(conn, "SELECT COUNT(*) FROM music_history")?,
        active_users_24h: count(
            conn,
            "SELECT COUNT(*) FROM users WHERE last_active > datetime('now', '-1 day')",
        )?,
        active_chats_24h: count(
            conn,
            "SELECT COUNT(*) FROM chats WHERE last_active > datetime('now', '-1 day')",
        )?,
        banned_users: count(conn, "SELECT COUNT(*) FROM global_bans")?,
        blacklisted_chats: count(conn, "SELECT COUNT(*) FROM chats WHERE is_blacklisted = 1")?,
    })
}

/// Most recent plays, newest first, optionally limited to one chat.
pub fn get_recent_songs(
    conn: &Connection,
    limit: usize,
    chat: Option<(i64, Platform)>,
) -> Result<Vec<PlayedSong>> {
    let (chat_id, platform) = match chat {
        Some((id, platform)) => (Some(id), Some(platform.as_str())),
        None => (None, None),
    };
    let mut stmt = conn.prepare(
        "SELECT user_id, chat_id, platform, song_title, song_url, duration, play_date
         FROM music_history
         WHERE (?1 IS NULL OR chat_id = ?1) AND (?2 IS NULL OR platform = ?2)
         ORDER BY play_date DESC, id DESC
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![chat_id, platform, limit as i64], |row| {
        Ok(PlayedSong {
            user_id: row.get(0)?,
            chat_id: row.get(1)?,
            platform: row.get(2)?,
            title: row.get(3)?,
            url: row.get(4)?,
            duration_seconds: row.get(5)?,
            played_at: row.get(6)?,
        })
    })?;
    rows.collect()
}

pub fn set_chat_setting(conn: &Connection, chat_id: i64, platform: Platform, name: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO chat_settings (chat_id, platform, setting_name, setting_value) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(chat_id, platform, setting_name) DO UPDATE SET setting_value = excluded.setting_value",
        params![chat_id, platform.as_str(), name, value],
    )?;
    Ok(())
}

pub fn get_chat_setting(conn: &Connection, chat_id: i64, platform: Platform, name: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT setting_value FROM chat_settings WHERE chat_id = ?1 AND platform = ?2 AND setting_name = ?3",
        params![chat_id, platform.as_str(), name],
        |row| row.get(0),
    )
    .optional()
}

pub fn delete_chat_setting(conn: &Connection, chat_id: i64, platform: Platform, name: &str) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM chat_settings WHERE chat_id = ?1 AND platform = ?2 AND setting_name = ?3",
        params![chat_id, platform.as_str(), name],
    )?;
    Ok(removed > 0)
}

/// All stored values of one setting, used to restore state at startup.
pub fn get_setting_for_all_chats(conn: &Connection, name: &str) -> Result<Vec<(i64, String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT chat_id, platform, setting_value FROM chat_settings WHERE setting_name = ?1",
    )?;
    let rows = stmt.query_map([name], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
    rows.collect()
}

/// Deletes command and play logs older than `days`. Returns the number of rows removed.
pub fn cleanup_old_logs(conn: &Connection, days: u32) -> Result<usize> {
    let modifier = format!("-{} days", days);
    let commands = conn.execute(
        "DELETE FROM command_logs WHERE timestamp < datetime('now', ?1)",
        [&modifier],
    )?;
    let plays = conn.execute(
        "DELETE FROM music_history WHERE play_date < datetime('now', ?1)",
        [&modifier],
    )?;
    Ok(commands + plays)
}
