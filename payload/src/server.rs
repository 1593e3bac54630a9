use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use partlink_protocol::{routes, InfoResponse, PayloadStatus, PeerMessage};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::error::NodeError;
use crate::lifecycle::{StartOutcome, TerminateOutcome};
use crate::node::NodeContext;

pub fn create_router(ctx: Arc<NodeContext>) -> Router {
    Router::new()
        .route(routes::PAYLOAD_START, post(start_handler))
        .route(routes::PAYLOAD_TERMINATE, post(terminate_handler))
        .route(routes::PAYLOAD_COMMUNICATION, post(communication_handler))
        .route(routes::PAYLOAD_STATUS, get(status_handler))
        .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1MB
        .with_state(ctx)
}

async fn start_handler(State(ctx): State<Arc<NodeContext>>) -> Result<Json<InfoResponse>, NodeError> {
    tracing::info!(id = ctx.config.local_id(), "Start received");
    let outcome = ctx
        .lifecycle
        .start_with(|| tokio::spawn(ctx.messaging_loop().run()))
        .inspect_err(|e| tracing::warn!(error = %e, "Start rejected"))?;

    let info = match outcome {
        StartOutcome::Started => "payload has been started",
        StartOutcome::AlreadyRunning => "payload already running",
    };
    Ok(Json(InfoResponse::new(info)))
}

async fn terminate_handler(State(ctx): State<Arc<NodeContext>>) -> Json<InfoResponse> {
    tracing::info!(id = ctx.config.local_id(), "Terminate received");
    let info = match ctx.lifecycle.terminate() {
        TerminateOutcome::Requested => "payload terminating",
        TerminateOutcome::AlreadyRequested => "payload already terminating",
    };
    Json(InfoResponse::new(info))
}

async fn communication_handler(
    State(ctx): State<Arc<NodeContext>>,
    Json(msg): Json<PeerMessage>,
) -> Result<Json<InfoResponse>, NodeError> {
    if let Err(e) = ctx.lifecycle.check_accepts_messages() {
        tracing::warn!(origin = msg.origin, error = %e, "Communication rejected");
        return Err(e);
    }
    if !msg.addressed_to(ctx.config.local_id()) {
        tracing::warn!(origin = msg.origin, to = %msg.target(), "Communication not addressed to us, accepting anyway");
    }
    tracing::info!(
        origin = msg.origin,
        to = %msg.target(),
        key = %msg.key,
        value = %msg.value,
        "Communication received"
    );
    Ok(Json(InfoResponse::new(format!("message from {} understood", msg.origin))))
}

async fn status_handler(State(ctx): State<Arc<NodeContext>>) -> Json<PayloadStatus> {
    let uptime = chrono::Utc::now() - ctx.started_at;
    Json(PayloadStatus {
        id: ctx.config.local_id(),
        state: ctx.lifecycle.state().to_string(),
        partitions: ctx.config.identity.partition_count,
        peer_count: ctx.directory.len() as u64,
        started_at: ctx.started_at.to_rfc3339(),
        uptime_secs: uptime.num_seconds(),
    })
}
