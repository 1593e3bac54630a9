use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use partlink_protocol::{DirectoryError, ErrorBody};
use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// Failures the payload distinguishes.
///
/// `InvalidConfiguration`, `RendezvousUnreachable` and a failing server
/// socket (`Io`) end the process; the rest are contained where they happen.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("supervisor at {endpoint} unreachable: {reason}")]
    RendezvousUnreachable { endpoint: String, reason: String },

    #[error("{call} not accepted while {state}")]
    NotReady { call: &'static str, state: LifecycleState },

    #[error("{target} unreachable: {reason}")]
    PeerUnreachable { target: String, reason: String },

    #[error("inactive announcement failed: {0}")]
    InactiveAnnounceFailed(String),

    #[error("payload server i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DirectoryError> for NodeError {
    fn from(e: DirectoryError) -> Self {
        NodeError::InvalidConfiguration(e.to_string())
    }
}

impl NodeError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NodeError::InvalidConfiguration(_) | NodeError::RendezvousUnreachable { .. } | NodeError::Io(_)
        )
    }
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let (status, state) = match &self {
            NodeError::NotReady { state, .. } => (StatusCode::CONFLICT, Some(state.to_string())),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        let body = ErrorBody { error: self.to_string(), state };
        (status, Json(body)).into_response()
    }
}
