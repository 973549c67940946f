use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "musicbot")]
#[command(author, version, about = "Music bot with per-chat playback queues for Telegram live streams", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Run the bot (default when no command is given)
    Run,

    /// Resolve a search query or link and print the track metadata as JSON
    Resolve {
        /// Search terms or a media URL
        query: String,
    },

    /// Remove old files from the download directory once and exit
    Cleanup {
        /// Also delete command and play logs older than this many days
        #[arg(long)]
        logs_older_than: Option<u32>,
    },

    /// Print a .env template with every supported variable
    EnvTemplate,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_no_command() {
        let cli = Cli::try_parse_from(["musicbot"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_resolve_takes_query() {
        let cli = Cli::try_parse_from(["musicbot", "resolve", "lofi beats"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Resolve {
                query: "lofi beats".to_string()
            })
        );
    }

    #[test]
    fn test_cleanup_flags() {
        let cli = Cli::try_parse_from(["musicbot", "cleanup", "--logs-older-than", "30"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Cleanup {
                logs_older_than: Some(30)
            })
        );
        let cli = Cli::try_parse_from(["musicbot", "env-template"]).unwrap();
        assert_eq!(cli.command, Some(Commands::EnvTemplate));
    }
}
