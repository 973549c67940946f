//! Playback commands: /play, /vplay, /song, /queue and the playback controls
//!
//! Every handler here talks to the [`QueueManager`](crate::player::QueueManager)
//! for the chat the command came from. Limits that belong to the bot rather
//! than to playback (queue size, track length, feature switches) are checked
//! before anything reaches the queue.

use std::path::Path;
use std::time::Instant;

use teloxide::prelude::*;
use teloxide::types::{InputFile, UserId};

use super::handlers::{CommandContext, HandlerDeps};
use super::menu;
use crate::core::config;
use crate::core::error::AppResult;
use crate::core::utils::{format_duration, format_file_size, format_uptime, truncate_text};
use crate::download::download_song;
use crate::player::{
    ChatKey, EnqueueOutcome, OutputHandle, Platform, PlayerError, QueueManager, QueueSnapshot, SkipOutcome, Track,
};
use crate::storage::db::{self, DbPool};
use crate::storage::get_connection;

/// chat_settings key holding a chat's RTMP ingest URL
pub const OUTPUT_SETTING: &str = "stream_output";

/// How many queued tracks /queue lists before summarizing the rest
const QUEUE_PREVIEW_LEN: usize = 10;

/// Parsed /channelplay argument
#[derive(Debug, PartialEq, Eq)]
pub enum ChannelTarget {
    Off,
    Stream(String),
}

pub fn parse_channel_target(args: &str) -> Result<ChannelTarget, String> {
    let args = args.trim();
    if args.eq_ignore_ascii_case("off") || args.eq_ignore_ascii_case("disable") {
        return Ok(ChannelTarget::Off);
    }
    match url::Url::parse(args) {
        Ok(url) if matches!(url.scheme(), "rtmp" | "rtmps") && url.host_str().is_some() => {
            Ok(ChannelTarget::Stream(args.to_string()))
        }
        _ => Err("Usage: /channelplay <rtmp(s)://server/key> or /channelplay off".to_string()),
    }
}

/// `/loop` argument: empty toggles, `off` is 0, otherwise a number.
pub fn parse_loop_arg(args: &str) -> Result<Option<i64>, String> {
    let args = args.trim();
    if args.is_empty() {
        return Ok(None);
    }
    if args.eq_ignore_ascii_case("off") || args.eq_ignore_ascii_case("disable") {
        return Ok(Some(0));
    }
    args.parse::<i64>()
        .map(Some)
        .map_err(|_| "Usage: /loop [0-10]. 0 disables, 1 loops the song, 2 the queue, 3-10 repeats N times.".to_string())
}

/// Accepts `1.5` and `1.5x`.
pub fn parse_speed(args: &str) -> Option<f64> {
    let args = args.trim();
    let args = args.strip_suffix(['x', 'X']).unwrap_or(args);
    args.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Accepts `90`, `1:30` and `1:02:03`.
pub fn parse_position(args: &str) -> Option<u64> {
    let args = args.trim();
    if args.is_empty() {
        return None;
    }
    let parts = args.split(':').collect::<Vec<_>>();
    if parts.len() > 3 {
        return None;
    }
    let mut total: u64 = 0;
    for (i, part) in parts.iter().enumerate() {
        let value = part.trim().parse::<u64>().ok()?;
        if i > 0 && value >= 60 {
            return None;
        }
        total = total.checked_mul(60)?.checked_add(value)?;
    }
    Some(total)
}

fn track_line(track: &Track) -> String {
    format!(
        "{} [{}]",
        truncate_text(&track.title, 60),
        format_duration(track.duration_seconds)
    )
}

/// Renders a queue snapshot for /queue.
pub fn format_queue(snapshot: &QueueSnapshot) -> String {
    let Some(current) = &snapshot.current else {
        if snapshot.queue.is_empty() {
            return "📭 Nothing is playing and the queue is empty.".to_string();
        }
        return format!("⏳ {} track(s) waiting, playback is idle.", snapshot.queue.len());
    };

    let mut text = format!(
        "🎶 Now playing: {}{}\n",
        track_line(current),
        if snapshot.restarting {
            " (restarting)"
        } else if snapshot.paused {
            " (paused)"
        } else {
            ""
        }
    );
    text.push_str(&format!("🔁 Loop: {}   ⏩ Speed: {}\n", snapshot.loop_mode, snapshot.speed));

    if snapshot.queue.is_empty() {
        text.push_str("\nQueue is empty.");
        return text;
    }

    text.push_str(&format!(
        "\nUp next ({}, {} total):\n",
        snapshot.queue.len(),
        format_duration(snapshot.queued_duration_seconds())
    ));
    for (i, track) in snapshot.queue.iter().take(QUEUE_PREVIEW_LEN).enumerate() {
        text.push_str(&format!("{}. {}\n", i + 1, track_line(track)));
    }
    if snapshot.queue.len() > QUEUE_PREVIEW_LEN {
        text.push_str(&format!("...and {} more", snapshot.queue.len() - QUEUE_PREVIEW_LEN));
    }
    text.trim_end().to_string()
}

/// Private chats, sudoers, authorized users and chat admins may control playback.
pub async fn can_manage(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps) -> AppResult<bool> {
    if ctx.is_private() || config::admin::is_sudoer(ctx.user_id) {
        return Ok(true);
    }
    {
        let conn = get_connection(&deps.db_pool)?;
        if db::is_authorized(&conn, ctx.user_id)? {
            return Ok(true);
        }
    }
    let Ok(user_id) = u64::try_from(ctx.user_id) else {
        return Ok(false);
    };
    let member = bot.get_chat_member(ctx.chat_id, UserId(user_id)).await?;
    Ok(member.kind.is_privileged())
}

/// Re-attaches a saved /channelplay target after a /stop or a restart.
async fn ensure_output(deps: &HandlerDeps, chat: ChatKey) -> AppResult<bool> {
    if deps.player.output(chat).await.is_some() {
        return Ok(true);
    }
    let saved = {
        let conn = get_connection(&deps.db_pool)?;
        db::get_chat_setting(&conn, chat.id, chat.platform, OUTPUT_SETTING)?
    };
    match saved {
        Some(target) => {
            deps.player.attach_output(chat, OutputHandle::new(target)).await;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Attaches every saved stream target. Returns how many chats were restored.
pub async fn restore_outputs(db_pool: &DbPool, player: &QueueManager) -> AppResult<usize> {
    let saved = {
        let conn = get_connection(db_pool)?;
        db::get_setting_for_all_chats(&conn, OUTPUT_SETTING)?
    };

    let mut restored = 0;
    for (chat_id, platform, target) in saved {
        let chat = match platform.as_str() {
            "telegram" => ChatKey::telegram(chat_id),
            "discord" => ChatKey::discord(chat_id),
            other => {
                log::warn!("Skipping saved output for unknown platform {}", other);
                continue;
            }
        };
        player.attach_output(chat, OutputHandle::new(target)).await;
        restored += 1;
    }
    if restored > 0 {
        log::info!("Restored stream outputs for {} chat(s)", restored);
    }
    Ok(restored)
}

pub async fn start(bot: &Bot, ctx: &CommandContext) -> AppResult<()> {
    let name = ctx.first_name.as_deref().unwrap_or("there");
    let text = format!(
        "👋 Hi {}! I play music in live streams and video chats.\n\n\
         1. Start a live stream in your group or channel\n\
         2. Connect it with /channelplay <rtmp url>\n\
         3. /play <song name or link>\n\n\
         /help lists every command.",
        name
    );
    bot.send_message(ctx.chat_id, text)
        .reply_markup(menu::start_keyboard())
        .await?;
    Ok(())
}

pub async fn play(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps, query: &str, is_video: bool) -> AppResult<()> {
    let query = query.trim();
    if query.is_empty() {
        let usage = if is_video { "/vplay" } else { "/play" };
        bot.send_message(ctx.chat_id, format!("Usage: {} <song name or link>", usage))
            .await?;
        return Ok(());
    }
    if is_video && !*config::playback::ENABLE_VIDEO_CALLS {
        bot.send_message(ctx.chat_id, "🎬 Video playback is disabled on this bot.").await?;
        return Ok(());
    }
    if !ensure_output(deps, ctx.chat).await? {
        bot.send_message(
            ctx.chat_id,
            "🔌 No stream connected. Start a live stream and run /channelplay <rtmp url> first.",
        )
        .await?;
        return Ok(());
    }

    let max_queue = *config::playback::MAX_QUEUE_SIZE;
    if deps.player.snapshot(ctx.chat).await.queue.len() >= max_queue {
        bot.send_message(ctx.chat_id, format!("📛 The queue is full ({} tracks).", max_queue))
            .await?;
        return Ok(());
    }

    let status = bot.send_message(ctx.chat_id, "🔎 Searching...").await?;
    let resolved = match deps.player.resolve(query).await {
        Ok(resolved) => resolved,
        Err(e) => {
            bot.delete_message(ctx.chat_id, status.id).await.ok();
            return Err(e.into());
        }
    };

    let max_duration = *config::playback::MAX_SONG_DURATION;
    if resolved.duration_seconds > max_duration {
        bot.edit_message_text(
            ctx.chat_id,
            status.id,
            format!(
                "⏱ \"{}\" is {} long, the limit is {}.",
                truncate_text(&resolved.title, 60),
                format_duration(resolved.duration_seconds),
                format_duration(max_duration)
            ),
        )
        .await?;
        return Ok(());
    }

    let track = Track::from_resolved(resolved, ctx.user_id, Platform::Telegram, is_video);
    let line = track_line(&track);
    match deps.player.enqueue(ctx.chat, track).await {
        // The now-playing notice announces it
        Ok(EnqueueOutcome::Started(_)) => {
            bot.delete_message(ctx.chat_id, status.id).await.ok();
        }
        Ok(EnqueueOutcome::Queued { position }) if position > 0 => {
            bot.edit_message_text(ctx.chat_id, status.id, format!("➕ Queued at #{}: {}", position, line))
                .await?;
        }
        Ok(EnqueueOutcome::Queued { .. }) => {
            bot.edit_message_text(ctx.chat_id, status.id, "⚠️ Could not start playback, try again.")
                .await?;
        }
        Err(e) => {
            bot.delete_message(ctx.chat_id, status.id).await.ok();
            return Err(e.into());
        }
    }
    Ok(())
}

pub async fn song(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps, query: &str) -> AppResult<()> {
    let query = query.trim();
    if query.is_empty() {
        bot.send_message(ctx.chat_id, "Usage: /song <song name or link>").await?;
        return Ok(());
    }

    let status = bot.send_message(ctx.chat_id, "🔎 Searching...").await?;
    let resolved = match deps.player.resolve(query).await {
        Ok(resolved) => resolved,
        Err(e) => {
            bot.delete_message(ctx.chat_id, status.id).await.ok();
            return Err(e.into());
        }
    };

    let max_duration = *config::playback::MAX_SONG_DURATION;
    if resolved.duration_seconds > max_duration {
        bot.edit_message_text(
            ctx.chat_id,
            status.id,
            format!("⏱ Tracks longer than {} cannot be downloaded.", format_duration(max_duration)),
        )
        .await?;
        return Ok(());
    }

    bot.edit_message_text(
        ctx.chat_id,
        status.id,
        format!("⬇️ Downloading {}...", truncate_text(&resolved.title, 60)),
    )
    .await?;

    let downloaded = download_song(
        &config::YTDL_BIN,
        &resolved,
        Path::new(config::DOWNLOAD_DIR.as_str()),
        config::download::song_timeout(),
    )
    .await;
    let song = match downloaded {
        Ok(song) => song,
        Err(e) => {
            bot.delete_message(ctx.chat_id, status.id).await.ok();
            return Err(e);
        }
    };

    log::info!(
        "Sending {} ({}) to {}",
        song.path.display(),
        format_file_size(song.size_bytes),
        ctx.chat
    );
    let mut request = bot
        .send_audio(ctx.chat_id, InputFile::file(song.path.clone()))
        .title(song.title.clone())
        .duration(u32::try_from(song.duration_seconds).unwrap_or(u32::MAX));
    if let Some(uploader) = &song.uploader {
        request = request.performer(uploader.clone());
    }
    let sent = request.await;

    if let Err(e) = tokio::fs::remove_file(&song.path).await {
        log::warn!("Failed to remove {}: {}", song.path.display(), e);
    }
    bot.delete_message(ctx.chat_id, status.id).await.ok();
    sent?;
    Ok(())
}

pub async fn queue(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps) -> AppResult<()> {
    let snapshot = deps.player.snapshot(ctx.chat).await;
    bot.send_message(ctx.chat_id, format_queue(&snapshot)).await?;
    Ok(())
}

pub async fn shuffle(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps) -> AppResult<()> {
    let text = if deps.player.shuffle(ctx.chat).await {
        "🔀 Queue shuffled."
    } else {
        "The queue is empty, nothing to shuffle."
    };
    bot.send_message(ctx.chat_id, text).await?;
    Ok(())
}

pub async fn skip(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps) -> AppResult<()> {
    let text = match deps.player.skip(ctx.chat).await? {
        SkipOutcome::Stopping(track) => format!("⏭ Skipped {}", truncate_text(&track.title, 60)),
        SkipOutcome::Started(track) => format!("▶️ Started {}", track_line(&track)),
        SkipOutcome::NothingToSkip => "Nothing to skip.".to_string(),
    };
    bot.send_message(ctx.chat_id, text).await?;
    Ok(())
}

pub async fn stop(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps) -> AppResult<()> {
    let text = if deps.player.stop(ctx.chat).await {
        "⏹ Stopped playback and cleared the queue."
    } else {
        "Nothing is playing."
    };
    bot.send_message(ctx.chat_id, text).await?;
    Ok(())
}

pub async fn pause(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps) -> AppResult<()> {
    let text = if deps.player.pause(ctx.chat).await {
        "⏸ Paused."
    } else {
        "Can't pause: nothing is playing or this stream does not support pausing."
    };
    bot.send_message(ctx.chat_id, text).await?;
    Ok(())
}

pub async fn resume(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps) -> AppResult<()> {
    let text = if deps.player.resume(ctx.chat).await {
        "▶️ Resumed."
    } else {
        "Nothing is paused."
    };
    bot.send_message(ctx.chat_id, text).await?;
    Ok(())
}

pub async fn set_loop(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps, args: &str) -> AppResult<()> {
    let code = match parse_loop_arg(args) {
        Ok(code) => code,
        Err(usage) => {
            bot.send_message(ctx.chat_id, usage).await?;
            return Ok(());
        }
    };
    let mode = deps.player.set_loop_mode(ctx.chat, code).await?;
    bot.send_message(ctx.chat_id, format!("🔁 Loop: {}", mode)).await?;
    Ok(())
}

pub async fn speed(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps, args: &str) -> AppResult<()> {
    if args.trim().is_empty() {
        let snapshot = deps.player.snapshot(ctx.chat).await;
        bot.send_message(
            ctx.chat_id,
            format!("⏩ Current speed: {}. Usage: /speed <0.5-2.0>", snapshot.speed),
        )
        .await?;
        return Ok(());
    }
    let Some(value) = parse_speed(args) else {
        bot.send_message(ctx.chat_id, "Usage: /speed <0.5-2.0>").await?;
        return Ok(());
    };

    let speed = deps.player.set_speed(ctx.chat, value).await?;
    let restarting = deps.player.snapshot(ctx.chat).await.current.is_some();
    let text = if restarting {
        format!("⏩ Speed set to {}, restarting the current track.", speed)
    } else {
        format!("⏩ Speed set to {}.", speed)
    };
    bot.send_message(ctx.chat_id, text).await?;
    Ok(())
}

pub async fn seek(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps, args: &str) -> AppResult<()> {
    let Some(position) = parse_position(args) else {
        bot.send_message(ctx.chat_id, "Usage: /seek <seconds or mm:ss>").await?;
        return Ok(());
    };

    let snapshot = deps.player.snapshot(ctx.chat).await;
    if let Some(current) = &snapshot.current {
        if current.duration_seconds > 0 && position >= current.duration_seconds {
            bot.send_message(
                ctx.chat_id,
                format!("The track is only {} long.", format_duration(current.duration_seconds)),
            )
            .await?;
            return Ok(());
        }
    }

    let text = match deps.player.seek(ctx.chat, position).await {
        Ok(true) => format!("⏩ Jumped to {}.", format_duration(position)),
        Ok(false) => "Seeking is not supported on this stream.".to_string(),
        Err(PlayerError::NothingPlaying(_)) => "Nothing is playing.".to_string(),
        Err(e) => return Err(e.into()),
    };
    bot.send_message(ctx.chat_id, text).await?;
    Ok(())
}

pub async fn ping(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps) -> AppResult<()> {
    let sent_at = Instant::now();
    let reply = bot.send_message(ctx.chat_id, "🏓 Pinging...").await?;
    let latency = sent_at.elapsed();
    bot.edit_message_text(
        ctx.chat_id,
        reply.id,
        format!(
            "🏓 Pong! {} ms\n⏱ Uptime: {}\n🎧 Active chats: {}",
            latency.as_millis(),
            format_uptime(deps.started_at.elapsed()),
            deps.player.chat_count()
        ),
    )
    .await?;
    Ok(())
}

pub async fn channelplay(bot: &Bot, ctx: &CommandContext, deps: &HandlerDeps, args: &str) -> AppResult<()> {
    if !*config::playback::ENABLE_CHANNEL_PLAY {
        bot.send_message(ctx.chat_id, "Channel play is disabled on this bot.").await?;
        return Ok(());
    }

    let target = match parse_channel_target(args) {
        Ok(target) => target,
        Err(usage) => {
            bot.send_message(ctx.chat_id, usage).await?;
            return Ok(());
        }
    };

    let chat = ctx.chat;
    let conn = get_connection(&deps.db_pool)?;
    match target {
        ChannelTarget::Off => {
            db::delete_chat_setting(&conn, chat.id, chat.platform, OUTPUT_SETTING)?;
            drop(conn);
            deps.player.teardown(chat).await;
            bot.send_message(ctx.chat_id, "🔌 Stream disconnected.").await?;
        }
        ChannelTarget::Stream(url) => {
            db::set_chat_setting(&conn, chat.id, chat.platform, OUTPUT_SETTING, &url)?;
            drop(conn);
            let output = OutputHandle::new(&url);
            log::info!("{} connected to {:?}", chat, output);
            deps.player.attach_output(chat, output).await;
            bot.send_message(ctx.chat_id, "🔌 Stream connected. Use /play to start.").await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{LoopMode, PlaybackStatus, Speed};
    use pretty_assertions::assert_eq;

    fn track(title: &str, secs: u64) -> Track {
        Track::new(title, format!("https://example.com/{}", title), secs, false, 1, Platform::Telegram)
    }

    #[test]
    fn test_parse_channel_target() {
        assert_eq!(parse_channel_target(" off "), Ok(ChannelTarget::Off));
        assert_eq!(
            parse_channel_target("rtmps://dc4-1.rtmp.t.me/s/123:abc"),
            Ok(ChannelTarget::Stream("rtmps://dc4-1.rtmp.t.me/s/123:abc".to_string()))
        );
        assert!(parse_channel_target("https://example.com/live").is_err());
        assert!(parse_channel_target("").is_err());
    }

    #[test]
    fn test_parse_loop_arg() {
        assert_eq!(parse_loop_arg(""), Ok(None));
        assert_eq!(parse_loop_arg("off"), Ok(Some(0)));
        assert_eq!(parse_loop_arg(" 5 "), Ok(Some(5)));
        // Range is checked by the player
        assert_eq!(parse_loop_arg("42"), Ok(Some(42)));
        assert!(parse_loop_arg("forever").is_err());
    }

    #[test]
    fn test_parse_speed() {
        assert_eq!(parse_speed("1.5"), Some(1.5));
        assert_eq!(parse_speed("2x"), Some(2.0));
        assert_eq!(parse_speed("fast"), None);
        assert_eq!(parse_speed("NaN"), None);
    }

    #[test]
    fn test_parse_position() {
        assert_eq!(parse_position("90"), Some(90));
        assert_eq!(parse_position("1:30"), Some(90));
        assert_eq!(parse_position("1:02:03"), Some(3723));
        assert_eq!(parse_position("1:75"), None);
        assert_eq!(parse_position("1:2:3:4"), None);
        assert_eq!(parse_position(""), None);
    }

    #[test]
    fn test_format_queue_idle() {
        assert_eq!(
            format_queue(&QueueSnapshot::idle()),
            "📭 Nothing is playing and the queue is empty."
        );
    }

    #[test]
    fn test_format_queue_lists_tracks() {
        let snapshot = QueueSnapshot {
            status: PlaybackStatus::Playing,
            current: Some(track("Intro", 65)),
            queue: vec![track("Second", 120), track("Third", 30)],
            loop_mode: LoopMode::Queue,
            speed: Speed::NORMAL,
            paused: false,
            restarting: false,
            connected: true,
        };
        let text = format_queue(&snapshot);
        assert!(text.starts_with("🎶 Now playing: Intro [01:05]"));
        assert!(text.contains("Loop: queue"));
        assert!(text.contains("Up next (2, 02:30 total)"));
        assert!(text.contains("1. Second [02:00]"));
        assert!(text.ends_with("2. Third [30s]"));
    }

    #[test]
    fn test_format_queue_truncates_long_queues() {
        let snapshot = QueueSnapshot {
            status: PlaybackStatus::Playing,
            current: Some(track("Now", 10)),
            queue: (0..13).map(|i| track(&format!("t{}", i), 10)).collect(),
            loop_mode: LoopMode::Off,
            speed: Speed::NORMAL,
            paused: true,
            restarting: false,
            connected: true,
        };
        let text = format_queue(&snapshot);
        assert!(text.contains("(paused)"));
        assert!(text.ends_with("...and 3 more"));
    }
}
