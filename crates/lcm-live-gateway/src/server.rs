//! Axum HTTP + WebSocket server.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use lcm_live_core::protocol::QueueSize;

use crate::connection::handle_ws_connection;
use crate::state::GatewayState;
use crate::stream::stream_handler;

/// Build the gateway router.
///
/// When `gateway.static_dir` is set, files under it are served for any path
/// not matched by an API route.
pub fn router(state: Arc<GatewayState>) -> Router {
    let static_dir = state
        .config
        .gateway
        .as_ref()
        .and_then(|g| g.static_dir.clone());

    let mut app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/stream/{session_id}", get(stream_handler))
        .route("/queue_size", get(queue_size_handler))
        .route("/health", get(health_handler));

    #[cfg(feature = "metrics")]
    {
        app = app.route("/metrics", get(metrics_handler));
    }

    if let Some(dir) = static_dir {
        info!(dir = %dir, "Serving static files");
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on an already-bound listener until `shutdown` resolves.
///
/// On shutdown every session is removed so open streams end and the server
/// can drain.
pub async fn serve<F>(listener: TcpListener, state: Arc<GatewayState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = state.registry.clone();
    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let closed = registry.clear();
            info!(sessions = closed, "Closing sessions for shutdown");
        })
        .await?;

    Ok(())
}

/// Start the gateway on the configured bind address and `port`.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.bind_addr();
    let addr = format!("{bind_addr}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(
        max_sessions = state.registry.capacity(),
        pipeline = state.transformer.id(),
        "Gateway listening on {addr}"
    );

    serve(listener, state, shutdown_signal()).await
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(state, socket))
}

async fn queue_size_handler(State(state): State<Arc<GatewayState>>) -> Json<QueueSize> {
    Json(QueueSize {
        queue_size: state.registry.count(),
    })
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "status": "ok",
        "version": version,
        "sessions": state.registry.count(),
        "capacity": state.registry.capacity(),
    }))
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    use axum::http::StatusCode;

    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "Metrics recorder not installed".to_string()),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for CTRL+C; running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
