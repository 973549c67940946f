use anyhow::Result;
use dotenvy::dotenv;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tokio::time::{interval, sleep};

use musicbot::cli::{Cli, Commands};
use musicbot::core::{config, init_logger, log_startup_configuration, metrics, RateLimiter};
use musicbot::download::{cleanup_downloads, YtDlpResolver};
use musicbot::player::{completion_channel, FfmpegDriver, QueueManager, TrackResolver};
use musicbot::storage::db;
use musicbot::storage::{create_pool, get_connection};
use musicbot::telegram::{create_bot, restore_outputs, run_notice_loop, schema, setup_bot_commands, HandlerDeps};

/// Command and play logs are kept this long by the periodic cleanup
const LOG_RETENTION_DAYS: u32 = 30;

/// Main entry point
///
/// Parses CLI arguments and dispatches to the matching subcommand.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load environment variables from .env if present
    let _ = dotenv();

    if let Some(Commands::EnvTemplate) = cli.command {
        print!("{}", config::env_template());
        return Ok(());
    }

    init_logger(&config::LOG_FILE_PATH)?;

    match cli.command {
        Some(Commands::Resolve { query }) => run_resolve(&query).await,
        Some(Commands::Cleanup { logs_older_than }) => run_cleanup(logs_older_than).await,
        Some(Commands::Run) | Some(Commands::EnvTemplate) | None => run_bot().await,
    }
}

/// Resolves one query with yt-dlp and prints the result
async fn run_resolve(query: &str) -> Result<()> {
    let resolver = YtDlpResolver::from_config();
    let track = resolver
        .resolve(query)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to resolve \"{}\": {}", query, e))?;
    println!("{}", serde_json::to_string_pretty(&track)?);
    Ok(())
}

/// One-shot cleanup of old downloads and, optionally, old logs
async fn run_cleanup(logs_older_than: Option<u32>) -> Result<()> {
    let removed = cleanup_downloads(
        Path::new(config::DOWNLOAD_DIR.as_str()),
        config::download::max_file_age(),
    )
    .await?;
    log::info!("Removed {} old download(s)", removed);

    if let Some(days) = logs_older_than {
        let pool = create_pool(&config::DATABASE_PATH)?;
        let conn = get_connection(&pool)?;
        let rows = db::cleanup_old_logs(&conn, days)?;
        log::info!("Removed {} log row(s) older than {} days", rows, days);
    }
    Ok(())
}

async fn run_bot() -> Result<()> {
    let bot_init_start = std::time::Instant::now();
    log::info!("Starting bot...");

    log_startup_configuration();
    config::validate().map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    metrics::init_metrics();

    let db_pool = Arc::new(
        create_pool(&config::DATABASE_PATH).map_err(|e| anyhow::anyhow!("Failed to create database pool: {}", e))?,
    );

    // Player: ffmpeg reports finished tracks back to the queue manager
    let (completion_tx, completion_rx) = completion_channel();
    let driver = Arc::new(FfmpegDriver::new(config::FFMPEG_BIN.as_str(), completion_tx));
    let resolver = Arc::new(YtDlpResolver::from_config());
    let (manager, notices) = QueueManager::new(driver, resolver).with_notices();
    let player = Arc::new(manager);
    tokio::spawn(Arc::clone(&player).run(completion_rx));

    if let Err(e) = restore_outputs(&db_pool, &player).await {
        log::warn!("Failed to restore stream outputs: {}", e);
    }

    let bot = create_bot();
    let bot_info = bot.get_me().await?;
    log::info!("Bot username: {:?}, Bot ID: {}", bot_info.username, bot_info.id);
    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to set bot commands: {}", e);
    }

    tokio::spawn(run_notice_loop(bot.clone(), Arc::clone(&db_pool), notices));

    let rate_limiter = Arc::new(RateLimiter::from_config());
    {
        let rate_limiter = Arc::clone(&rate_limiter);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(300));
            loop {
                ticker.tick().await;
                rate_limiter.cleanup().await;
            }
        });
    }

    // Periodic cleanup of old downloads and logs
    {
        let db_pool = Arc::clone(&db_pool);
        tokio::spawn(async move {
            let mut ticker = interval(config::download::cleanup_interval());
            loop {
                ticker.tick().await;
                if let Err(e) = cleanup_downloads(
                    Path::new(config::DOWNLOAD_DIR.as_str()),
                    config::download::max_file_age(),
                )
                .await
                {
                    log::warn!("Download cleanup failed: {}", e);
                }
                match get_connection(&db_pool) {
                    Ok(conn) => match db::cleanup_old_logs(&conn, LOG_RETENTION_DAYS) {
                        Ok(0) => {}
                        Ok(rows) => log::info!("Removed {} old log row(s)", rows),
                        Err(e) => log::warn!("Log cleanup failed: {}", e),
                    },
                    Err(e) => log::warn!("Log cleanup failed: {}", e),
                }
            }
        });
    }

    if config::server::enabled() {
        let port = *config::server::KEEP_ALIVE_PORT;
        let db_pool = Arc::clone(&db_pool);
        let player = Arc::clone(&player);
        tokio::spawn(async move {
            if let Err(e) = musicbot::core::metrics_server::start_keep_alive_server(port, db_pool, player).await {
                log::error!("Keep-alive server error: {}", e);
            }
        });
    } else {
        log::info!("Keep-alive server disabled (KEEP_ALIVE_PORT=0)");
    }

    let deps = HandlerDeps::new(
        Arc::clone(&db_pool),
        Arc::clone(&player),
        rate_limiter,
        *config::MAINTENANCE_MODE,
    );
    let handler = schema(deps);

    log::info!("================================================");
    log::info!(
        "🎉 Bot initialization complete in {:.2}s",
        bot_init_start.elapsed().as_secs_f64()
    );
    log::info!("📡 Ready to receive updates!");
    log::info!("================================================");

    // Run the dispatcher with retry logic
    let max_retries = config::retry::MAX_DISPATCHER_RETRIES;
    let mut retry_count = 0;
    loop {
        let bot_clone = bot.clone();
        let handler_clone = handler.clone();

        // A panicking dispatcher surfaces through the JoinHandle
        let handle = tokio::spawn(async move {
            Dispatcher::builder(bot_clone, handler_clone)
                .enable_ctrlc_handler()
                .build()
                .dispatch()
                .await
        });

        match handle.await {
            Ok(()) => {
                log::info!("Dispatcher shutdown gracefully");
                break;
            }
            Err(join_err) if join_err.is_panic() => {
                log::error!("Dispatcher panicked: {}", join_err);
                if retry_count >= max_retries {
                    log::error!("Max retries reached after panic. Exiting...");
                    break;
                }
                retry_count += 1;
                log::info!(
                    "Restarting dispatcher (attempt {}/{})...",
                    retry_count,
                    max_retries
                );
                sleep(config::retry::dispatcher_delay()).await;
            }
            Err(join_err) => {
                log::warn!("Dispatcher task was cancelled: {}", join_err);
                break;
            }
        }
    }

    Ok(())
}
