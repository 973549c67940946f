//! Prometheus metrics for playback and commands
//!
//! Everything registers into the default registry on first access;
//! `init_metrics` touches each metric at startup so `/metrics` lists them
//! with zero values before the first event.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge, HistogramVec,
    TextEncoder,
};

// ======================
// PLAYBACK METRICS
// ======================

/// Tracks that started streaming
/// Labels: platform (discord/telegram)
pub static TRACKS_STARTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "musicbot_tracks_started_total",
        "Total number of tracks that started playing",
        &["platform"]
    )
    .unwrap()
});

/// Driver completions
/// Labels: reason (finished/stopped/failed)
pub static TRACK_END_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "musicbot_track_end_total",
        "Total number of track completions by reason",
        &["reason"]
    )
    .unwrap()
});

/// Tracks that could not be started
/// Labels: kind (resolver/driver/not_found)
pub static START_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "musicbot_start_failures_total",
        "Total number of failed track starts",
        &["kind"]
    )
    .unwrap()
});

/// Chats with a playback state record
pub static ACTIVE_CHATS: Lazy<Gauge> =
    Lazy::new(|| register_gauge!("musicbot_active_chats", "Number of chats with playback state").unwrap());

/// yt-dlp command execution duration
/// Labels: operation (resolve/stream_url/download)
pub static YTDLP_EXECUTION_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "musicbot_ytdlp_execution_duration_seconds",
        "Time spent executing yt-dlp commands",
        &["operation"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]
    )
    .unwrap()
});

// ======================
// COMMAND METRICS
// ======================

/// Command executions
/// Labels: command
pub static COMMAND_USAGE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "musicbot_command_usage_total",
        "Total number of command executions",
        &["command"]
    )
    .unwrap()
});

/// Commands rejected by the limiter
pub static RATE_LIMIT_HITS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "musicbot_rate_limit_hits_total",
        "Total number of rate-limited commands",
        &["command"]
    )
    .unwrap()
});

/// Errors by category
/// Labels: category (player/database/telegram/download), operation
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "musicbot_errors_total",
        "Total number of errors by category and operation",
        &["category", "operation"]
    )
    .unwrap()
});

/// Initialize metrics (call this at startup to register all metrics)
pub fn init_metrics() {
    log::info!("Initializing metrics registry...");

    Lazy::force(&TRACKS_STARTED_TOTAL);
    Lazy::force(&TRACK_END_TOTAL);
    Lazy::force(&START_FAILURES_TOTAL);
    Lazy::force(&ACTIVE_CHATS);
    Lazy::force(&YTDLP_EXECUTION_DURATION_SECONDS);
    Lazy::force(&COMMAND_USAGE_TOTAL);
    Lazy::force(&RATE_LIMIT_HITS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);

    for platform in ["discord", "telegram"] {
        TRACKS_STARTED_TOTAL.with_label_values(&[platform]);
    }
    for reason in ["finished", "stopped", "failed"] {
        TRACK_END_TOTAL.with_label_values(&[reason]);
    }
    for command in ["play", "vplay", "song", "skip", "stop", "queue"] {
        COMMAND_USAGE_TOTAL.with_label_values(&[command]);
    }

    log::info!("Metrics registry initialized successfully");
}

/// Helper function to record command usage
pub fn record_command(command: &str) {
    COMMAND_USAGE_TOTAL.with_label_values(&[command]).inc();
}

/// Helper function to record rate limit hit
pub fn record_rate_limit_hit(command: &str) {
    RATE_LIMIT_HITS_TOTAL.with_label_values(&[command]).inc();
}

/// Helper function to record error
pub fn record_error(category: &str, operation: &str) {
    ERRORS_TOTAL.with_label_values(&[category, operation]).inc();
}

/// Renders the default registry in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        log::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_registered_metrics() {
        init_metrics();
        record_command("play");
        let text = render();
        assert!(text.contains("musicbot_command_usage_total"));
        assert!(text.contains("musicbot_track_end_total"));
    }
}
