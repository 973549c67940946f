//! Bot initialization and the command set
//!
//! This module contains:
//! - Command enum definition
//! - Bot instance creation
//! - Registration of the command list in the Telegram UI

use teloxide::prelude::*;
use teloxide::types::BotCommand;
use teloxide::utils::command::BotCommands;

use crate::core::config;

/// Bot commands enum with descriptions
///
/// Commands that take an argument receive the rest of the message text,
/// empty when the user typed none.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "welcome message")]
    Start,
    #[command(description = "show this help")]
    Help,
    #[command(description = "play audio: /play <query or link>")]
    Play(String),
    #[command(description = "play video: /vplay <query or link>")]
    Vplay(String),
    #[command(description = "download a track as MP3: /song <query>")]
    Song(String),
    #[command(description = "show the queue")]
    Queue,
    #[command(description = "shuffle the queue")]
    Shuffle,
    #[command(description = "skip the current track")]
    Skip,
    #[command(description = "stop playback and clear the queue")]
    Stop,
    #[command(description = "pause playback")]
    Pause,
    #[command(description = "resume playback")]
    Resume,
    #[command(description = "loop mode: /loop [0-10], no argument toggles")]
    Loop(String),
    #[command(description = "playback speed: /speed <0.5-2.0>")]
    Speed(String),
    #[command(description = "jump to a position: /seek <seconds or mm:ss>")]
    Seek(String),
    #[command(description = "check the bot is alive")]
    Ping,
    #[command(description = "connect a live stream: /channelplay <rtmp url> or off")]
    Channelplay(String),
    #[command(description = "bot statistics (sudoers only)")]
    Stats,
    #[command(description = "ban a user everywhere (sudoers only)")]
    Gban(String),
    #[command(description = "lift a global ban (sudoers only)")]
    Ungban(String),
    #[command(description = "let a user manage playback (sudoers only)")]
    Auth(String),
    #[command(description = "revoke playback management (sudoers only)")]
    Unauth(String),
    #[command(description = "maintenance mode: /maintenance on|off (sudoers only)")]
    Maintenance(String),
}

impl Command {
    /// Name used in command logs and metrics labels
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::Play(_) => "play",
            Command::Vplay(_) => "vplay",
            Command::Song(_) => "song",
            Command::Queue => "queue",
            Command::Shuffle => "shuffle",
            Command::Skip => "skip",
            Command::Stop => "stop",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Loop(_) => "loop",
            Command::Speed(_) => "speed",
            Command::Seek(_) => "seek",
            Command::Ping => "ping",
            Command::Channelplay(_) => "channelplay",
            Command::Stats => "stats",
            Command::Gban(_) => "gban",
            Command::Ungban(_) => "ungban",
            Command::Auth(_) => "auth",
            Command::Unauth(_) => "unauth",
            Command::Maintenance(_) => "maintenance",
        }
    }

    /// Raw argument text, if the command takes one
    pub fn args(&self) -> Option<&str> {
        match self {
            Command::Play(args)
            | Command::Vplay(args)
            | Command::Song(args)
            | Command::Loop(args)
            | Command::Speed(args)
            | Command::Seek(args)
            | Command::Channelplay(args)
            | Command::Gban(args)
            | Command::Ungban(args)
            | Command::Auth(args)
            | Command::Unauth(args)
            | Command::Maintenance(args) => Some(args.as_str()),
            _ => None,
        }
    }

    /// Commands only sudoers may run; the dispatcher rejects everyone else
    pub fn is_sudo_only(&self) -> bool {
        matches!(
            self,
            Command::Stats
                | Command::Gban(_)
                | Command::Ungban(_)
                | Command::Auth(_)
                | Command::Unauth(_)
                | Command::Maintenance(_)
        )
    }
}

/// Creates the Bot instance from BOT_TOKEN
pub fn create_bot() -> Bot {
    Bot::new(config::BOT_TOKEN.as_str())
}

/// Sets up bot commands in Telegram UI
///
/// Sudo commands are left out of the public list.
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    bot.set_my_commands(vec![
        BotCommand::new("play", "play audio from a query or link"),
        BotCommand::new("vplay", "play video from a query or link"),
        BotCommand::new("song", "download a track as MP3"),
        BotCommand::new("queue", "show the queue"),
        BotCommand::new("skip", "skip the current track"),
        BotCommand::new("stop", "stop playback and clear the queue"),
        BotCommand::new("shuffle", "shuffle the queue"),
        BotCommand::new("loop", "loop mode 0-10"),
        BotCommand::new("speed", "playback speed 0.5-2.0"),
        BotCommand::new("seek", "jump to a position"),
        BotCommand::new("pause", "pause playback"),
        BotCommand::new("resume", "resume playback"),
        BotCommand::new("channelplay", "connect a live stream"),
        BotCommand::new("ping", "check the bot is alive"),
        BotCommand::new("help", "show help"),
    ])
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptions_list_commands() {
        let command_list = Command::descriptions().to_string();
        assert!(command_list.contains("Available commands"));
        assert!(command_list.contains("/play"));
        assert!(command_list.contains("/channelplay"));
    }

    #[test]
    fn test_parse_with_arguments() {
        assert_eq!(
            Command::parse("/play lofi beats", "musicbot").unwrap(),
            Command::Play("lofi beats".to_string())
        );
        assert_eq!(Command::parse("/loop", "musicbot").unwrap(), Command::Loop(String::new()));
        assert_eq!(Command::parse("/skip", "musicbot").unwrap(), Command::Skip);
    }

    #[test]
    fn test_name_and_args() {
        let cmd = Command::Speed("1.5".to_string());
        assert_eq!(cmd.name(), "speed");
        assert_eq!(cmd.args(), Some("1.5"));
        assert_eq!(Command::Queue.args(), None);
        assert!(Command::Maintenance("on".to_string()).is_sudo_only());
        assert!(!Command::Play(String::new()).is_sudo_only());
    }
}
