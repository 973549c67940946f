//! SQLite bookkeeping: users, chats, bans, command and play logs, chat settings

pub mod db;
pub mod migrations;

// Re-exports for convenience
pub use db::{create_pool, get_connection, BotStats, DbConnection, DbPool, PlayedSong};
