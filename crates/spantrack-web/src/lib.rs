//! Spantrack Web - ingestion, query, and realtime HTTP surface
//!
//! Routes:
//! - `POST /v1/spans/upsert`: apply one lifecycle event, then broadcast
//! - `GET /v1/spans`: filtered span query
//! - `GET /v1/spans/{trace_id}/{span_id}`: single span
//! - `GET /v1/realtime`: WebSocket stream of `span_upsert` messages
//! - `GET /health/live`, `GET /health/ready`

mod api;
pub mod broadcast;
pub mod error;
mod ws;

pub use api::SpansResponse;
pub use broadcast::Broadcaster;
pub use error::{ApiError, ApiResult};

use axum::{
    response::Json,
    routing::{get, post},
    Router,
};
use spantrack_store::SpanStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Web server configuration
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7878,
        }
    }
}

impl From<&spantrack_core::config::ServerSettings> for WebConfig {
    fn from(settings: &spantrack_core::config::ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub store: Arc<dyn SpanStore>,
    pub broadcaster: Broadcaster,
    closing: watch::Sender<bool>,
}

impl AppState {
    pub fn new(store: Arc<dyn SpanStore>, broadcaster: Broadcaster) -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            store,
            broadcaster,
            closing,
        }
    }

    /// Close every open realtime socket. Upgraded sockets are not tracked
    /// by graceful shutdown, so `serve` calls this once it stops accepting.
    pub fn close_realtime(&self) {
        self.closing.send_replace(true);
    }

    pub(crate) fn closing(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }
}

/// Build the router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/spans/upsert", post(api::upsert_span))
        .route("/v1/spans", get(api::query_spans))
        .route("/v1/spans/{trace_id}/{span_id}", get(api::get_span))
        .route("/v1/realtime", get(ws::ws_handler))
        .route("/health/live", get(health_live))
        .route("/health/ready", get(api::ready))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve on an already-bound listener until `shutdown` resolves
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = router(Arc::clone(&state));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            state.close_realtime();
        })
        .await?;
    Ok(())
}

/// Start the web server, stopping on Ctrl-C
pub async fn start_server(config: WebConfig, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Spantrack listening on http://{}", addr);
    info!("  - Ingestion at POST /v1/spans/upsert");
    info!("  - Query at GET /v1/spans");
    info!("  - Realtime at /v1/realtime");

    serve(listener, state, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
        }
    })
    .await
}

/// Liveness probe
async fn health_live() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "spantrack",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
