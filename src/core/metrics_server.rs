//! Keep-alive HTTP server
//!
//! Hosting platforms that idle a container without inbound traffic get pinged
//! here. The same listener exposes health, bot statistics and Prometheus
//! metrics. Port comes from KEEP_ALIVE_PORT (default 8080, 0 disables).

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Instant;

use crate::core::config;
use crate::core::utils::format_uptime;
use crate::player::QueueManager;
use crate::storage::db::{self, DbPool};

#[derive(Clone)]
struct AppState {
    start_time: Instant,
    db_pool: Arc<DbPool>,
    player: Arc<QueueManager>,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(state))
}

/// Serves the keep-alive endpoints until the listener fails.
pub async fn start_keep_alive_server(
    port: u16,
    db_pool: Arc<DbPool>,
    player: Arc<QueueManager>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(AppState {
        start_time: Instant::now(),
        db_pool,
        player,
    });

    log::info!("Starting keep-alive server on http://{}", addr);
    log::info!("  /health  - Liveness and uptime");
    log::info!("  /stats   - Bot statistics");
    log::info!("  /metrics - Prometheus metrics");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "musicbot",
        "version": env!("CARGO_PKG_VERSION"),
        "features": {
            "video": *config::playback::ENABLE_VIDEO_CALLS,
            "channel_play": *config::playback::ENABLE_CHANNEL_PLAY,
            "max_queue_size": *config::playback::MAX_QUEUE_SIZE,
        },
        "endpoints": ["/", "/health", "/stats", "/metrics"],
    }))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed();
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_seconds": uptime.as_secs(),
        "uptime_human": format_uptime(uptime),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    let active_chats = state.player.chat_count();
    let pool = Arc::clone(&state.db_pool);

    // r2d2 and rusqlite block, keep them off the runtime threads
    let stats = tokio::task::spawn_blocking(move || {
        let conn = db::get_connection(&pool).map_err(|e| e.to_string())?;
        db::get_bot_stats(&conn).map_err(|e| e.to_string())
    })
    .await;

    match stats {
        Ok(Ok(stats)) => Json(serde_json::json!({
            "stats": stats,
            "active_chats": active_chats,
        }))
        .into_response(),
        Ok(Err(e)) => {
            log::error!("Failed to load stats: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to load stats").into_response()
        }
        Err(e) => {
            log::error!("Stats task panicked: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to load stats").into_response()
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::core::metrics::render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{
        DriverError, OutputHandle, PlaybackDriver, PlayerError, ResolvedTrack, StartRequest, Track, TrackResolver,
    };
    use async_trait::async_trait;

    struct NullDriver;

    #[async_trait]
    impl PlaybackDriver for NullDriver {
        async fn start(&self, _request: StartRequest) -> Result<(), DriverError> {
            Ok(())
        }
        async fn stop(&self, _output: &OutputHandle) {}
        async fn pause(&self, _output: &OutputHandle) -> bool {
            false
        }
        async fn resume(&self, _output: &OutputHandle) -> bool {
            false
        }
    }

    struct NullResolver;

    #[async_trait]
    impl TrackResolver for NullResolver {
        async fn resolve(&self, query: &str) -> Result<ResolvedTrack, PlayerError> {
            Err(PlayerError::NotFound(query.to_string()))
        }
        async fn stream_source(&self, track: &Track) -> Result<String, PlayerError> {
            Ok(track.source.clone())
        }
    }

    fn test_state(dir: &tempfile::TempDir) -> Arc<AppState> {
        let path = dir.path().join("bot.db");
        let pool = db::create_pool(path.to_str().unwrap()).unwrap();
        Arc::new(AppState {
            start_time: Instant::now(),
            db_pool: Arc::new(pool),
            player: Arc::new(QueueManager::new(Arc::new(NullDriver), Arc::new(NullResolver))),
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_uptime() {
        let dir = tempfile::tempdir().unwrap();
        let response = health_handler(State(test_state(&dir))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["uptime_human"], "0s");
    }

    #[tokio::test]
    async fn test_stats_on_empty_database() {
        let dir = tempfile::tempdir().unwrap();
        let response = stats_handler(State(test_state(&dir))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["active_chats"], 0);
        assert_eq!(body["stats"]["total_users"], 0);
    }

    #[tokio::test]
    async fn test_metrics_content_type() {
        crate::core::metrics::init_metrics();
        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );
    }
}
