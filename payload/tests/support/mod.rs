//! In-process supervisor used by the integration tests.
//!
//! Records every Ready / Inactive / relayed Communication in arrival order.
//! Relays go to payloads that registered with it; a broadcast goes to every
//! registered payload but the sender. Ids in `down` answer 502 as if the
//! peer's server were gone.

#![allow(dead_code)]

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use parking_lot::Mutex;
use partlink_payload::{NodeConfig, RunMode};
use partlink_protocol::{routes, Endpoint, InactiveRequest, InfoResponse, NodeId, PeerMessage, ReadyRequest};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Ready(NodeId),
    Relay { origin: NodeId, to: NodeId },
    Inactive(NodeId),
}

pub struct SupervisorState {
    pub log: Mutex<Vec<Seen>>,
    pub relayed: Mutex<Vec<PeerMessage>>,
    pub down: Mutex<HashSet<NodeId>>,
    ports: watch::Sender<BTreeMap<NodeId, u16>>,
    http: reqwest::Client,
}

pub struct StubSupervisor {
    pub addr: SocketAddr,
    pub state: Arc<SupervisorState>,
    task: JoinHandle<()>,
}

impl StubSupervisor {
    pub async fn spawn() -> Self {
        let (ports, _) = watch::channel(BTreeMap::new());
        let state = Arc::new(SupervisorState {
            log: Mutex::new(Vec::new()),
            relayed: Mutex::new(Vec::new()),
            down: Mutex::new(HashSet::new()),
            ports,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .build()
                .unwrap(),
        });

        let app = Router::new()
            .route(routes::JOB_READY, post(ready))
            .route(routes::JOB_INACTIVE, post(inactive))
            .route(routes::JOB_COMMUNICATION, post(relay))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state, task }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.addr.port())
    }

    /// Config for a payload of this supervisor with fast test timings
    pub fn config(&self, id: NodeId, partitions: u32, mode: RunMode) -> NodeConfig {
        NodeConfig::new(id, partitions, self.endpoint())
            .unwrap()
            .with_interval(Duration::from_millis(50))
            .with_rpc_timeout(Duration::from_secs(2))
            .with_run_mode(mode)
    }

    pub fn mark_down(&self, id: NodeId) {
        self.state.down.lock().insert(id);
    }

    /// Port announced by `id`, waiting for its Ready if needed
    pub async fn wait_ready(&self, id: NodeId) -> u16 {
        let mut rx = self.state.ports.subscribe();
        let ports = tokio::time::timeout(TEST_TIMEOUT, rx.wait_for(|p| p.contains_key(&id)))
            .await
            .expect("payload never announced ready")
            .unwrap();
        ports[&id]
    }

    pub fn log(&self) -> Vec<Seen> {
        self.state.log.lock().clone()
    }

    pub fn relayed(&self) -> Vec<PeerMessage> {
        self.state.relayed.lock().clone()
    }
}

impl Drop for StubSupervisor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn ready(State(state): State<Arc<SupervisorState>>, Json(req): Json<ReadyRequest>) -> Json<InfoResponse> {
    state.log.lock().push(Seen::Ready(req.id));
    state.ports.send_modify(|p| {
        p.insert(req.id, req.port);
    });
    Json(InfoResponse::new(format!("welcome {}", req.id)))
}

async fn inactive(State(state): State<Arc<SupervisorState>>, Json(req): Json<InactiveRequest>) -> Json<InfoResponse> {
    state.log.lock().push(Seen::Inactive(req.id));
    Json(InfoResponse::new("noted"))
}

async fn relay(
    State(state): State<Arc<SupervisorState>>,
    Json(msg): Json<PeerMessage>,
) -> Result<Json<InfoResponse>, (StatusCode, String)> {
    let targets: Vec<NodeId> = if msg.is_broadcast() {
        state.ports.borrow().keys().copied().filter(|id| *id != msg.origin).collect()
    } else {
        msg.destinations.iter().copied().collect()
    };
    {
        let mut log = state.log.lock();
        for to in &targets {
            log.push(Seen::Relay { origin: msg.origin, to: *to });
        }
    }
    state.relayed.lock().push(msg.clone());

    let mut infos = Vec::new();
    for to in targets {
        if state.down.lock().contains(&to) {
            return Err((StatusCode::BAD_GATEWAY, format!("payload {to} is down")));
        }
        let port = state.ports.borrow().get(&to).copied();
        match port {
            Some(port) => {
                let url = Endpoint::new("127.0.0.1", port).url(routes::PAYLOAD_COMMUNICATION);
                let resp = state
                    .http
                    .post(&url)
                    .json(&msg)
                    .send()
                    .await
                    .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;
                if !resp.status().is_success() {
                    return Err((StatusCode::BAD_GATEWAY, format!("payload {to} answered {}", resp.status())));
                }
                let ack: InfoResponse = resp.json().await.map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;
                infos.push(ack.info);
            }
            // not one of ours: accept on its behalf
            None => infos.push(format!("accepted for {to}")),
        }
    }
    Ok(Json(InfoResponse::new(infos.join("; "))))
}

/// Supervisor → payload command
pub async fn try_command(addr: SocketAddr, route: &str) -> reqwest::Result<reqwest::Response> {
    reqwest::Client::new()
        .post(format!("http://{addr}{route}"))
        .send()
        .await
}

pub async fn command(addr: SocketAddr, route: &str) -> reqwest::Response {
    try_command(addr, route).await.unwrap()
}
