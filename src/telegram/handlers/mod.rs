//! Telegram bot handler tree configuration
//!
//! This module provides the dispatcher schema. Every command passes the same
//! gate (bans, maintenance, rate limit) before it reaches its handler.

mod schema;
mod types;

pub use schema::{check_access, is_dropped, schema, Access};
pub use types::{ensure_known, CommandContext, HandlerDeps, HandlerError};
