use async_trait::async_trait;
use partlink_protocol::{routes, Endpoint, InactiveRequest, InfoResponse, NodeId, PeerMessage, ReadyRequest};
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;

use crate::config::NodeConfig;
use crate::error::NodeError;

/// The two calls that bracket a node's working lifetime
#[async_trait]
pub trait Rendezvous: Send + Sync {
    /// Tell the supervisor we are live. Failure is fatal for the node.
    async fn announce_ready(&self, local: SocketAddr) -> Result<InfoResponse, NodeError>;

    /// Tell the supervisor our work is done. Best-effort.
    async fn announce_inactive(&self) -> Result<InfoResponse, NodeError>;
}

/// Outbound peer messages. The node only knows peer ids; resolving them,
/// and expanding a broadcast, is the transport's business.
#[async_trait]
pub trait Courier: Send + Sync {
    async fn deliver(&self, message: &PeerMessage) -> Result<InfoResponse, NodeError>;
}

/// HTTP client for the supervisor. It also relays peer messages.
pub struct SupervisorClient {
    http: reqwest::Client,
    supervisor: Endpoint,
    local_id: NodeId,
}

impl SupervisorClient {
    pub fn new(cfg: &NodeConfig) -> Result<Self, NodeError> {
        Self::with_timeout(cfg.supervisor.clone(), cfg.local_id(), cfg.rpc_timeout)
    }

    pub fn with_timeout(supervisor: Endpoint, local_id: NodeId, timeout: Duration) -> Result<Self, NodeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| NodeError::InvalidConfiguration(format!("http client: {e}")))?;
        Ok(Self { http, supervisor, local_id })
    }

    pub fn supervisor(&self) -> &Endpoint {
        &self.supervisor
    }

    /// POST `body` to a supervisor route; any transport error, timeout or
    /// non-success status comes back as a plain reason string.
    async fn call<B: Serialize + ?Sized>(&self, route: &str, body: &B) -> Result<InfoResponse, String> {
        let url = self.supervisor.url(route);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| describe(&e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {status} {text}").trim_end().to_string());
        }
        resp.json::<InfoResponse>().await.map_err(|e| format!("bad response: {e}"))
    }
}

fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timed out: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

#[async_trait]
impl Rendezvous for SupervisorClient {
    async fn announce_ready(&self, local: SocketAddr) -> Result<InfoResponse, NodeError> {
        let request = ReadyRequest {
            info: format!("payload {} alive", self.local_id),
            port: local.port(),
            id: self.local_id,
        };
        tracing::info!(supervisor = %self.supervisor, port = request.port, "Sending ready");
        let ack = self
            .call(routes::JOB_READY, &request)
            .await
            .map_err(|reason| NodeError::RendezvousUnreachable {
                endpoint: self.supervisor.to_string(),
                reason,
            })?;
        tracing::info!(info = %ack.info, "Supervisor acknowledged ready");
        Ok(ack)
    }

    async fn announce_inactive(&self) -> Result<InfoResponse, NodeError> {
        let request = InactiveRequest {
            info: format!("payload {} out of work", self.local_id),
            id: self.local_id,
        };
        tracing::info!(supervisor = %self.supervisor, "Sending inactive");
        let ack = self
            .call(routes::JOB_INACTIVE, &request)
            .await
            .map_err(NodeError::InactiveAnnounceFailed)?;
        tracing::info!(info = %ack.info, "Supervisor acknowledged inactive");
        Ok(ack)
    }
}

#[async_trait]
impl Courier for SupervisorClient {
    async fn deliver(&self, message: &PeerMessage) -> Result<InfoResponse, NodeError> {
        self.call(routes::JOB_COMMUNICATION, message)
            .await
            .map_err(|reason| NodeError::PeerUnreachable { target: message.target(), reason })
    }
}
