//! Axum WebSocket server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::json;
use tracing::info;

use voxline_convo::{ConvoError, SpeechDetector};
use voxline_core::Config;
use voxline_voice::VoiceAgent;

use crate::session::handle_socket;

/// Builds a fresh speech detector for each conversation.
pub type DetectorFactory =
    dyn Fn() -> Result<Box<dyn SpeechDetector>, ConvoError> + Send + Sync;

/// Shared gateway state — config plus the collaborator wiring every
/// conversation is built from.
pub struct GatewayState {
    pub config: Config,
    pub voice_agent: Arc<dyn VoiceAgent>,
    pub detector_factory: Box<DetectorFactory>,
    pub active_conversations: AtomicUsize,
}

impl GatewayState {
    pub fn new(
        config: Config,
        voice_agent: Arc<dyn VoiceAgent>,
        detector_factory: Box<DetectorFactory>,
    ) -> Self {
        Self {
            config,
            voice_agent,
            detector_factory,
            active_conversations: AtomicUsize::new(0),
        }
    }
}

/// Start the gateway server; runs until ctrl-c.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind = state.config.gateway_bind();

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "conversations": state.active_conversations.load(Ordering::SeqCst),
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(%e, "Failed to install CTRL+C handler");
    }
    info!("Shutdown signal received");
}
