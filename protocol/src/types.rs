use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a payload inside its partition set
pub type NodeId = u32;

/// Routes served by the supervisor and by every payload
pub mod routes {
    /// Node → supervisor: "I'm alive, here is my port"
    pub const JOB_READY: &str = "/api/job/ready";
    /// Node → supervisor: "I've run out of work"
    pub const JOB_INACTIVE: &str = "/api/job/inactive";
    /// Node → supervisor: relay a message to the listed destinations
    pub const JOB_COMMUNICATION: &str = "/api/job/communication";

    pub const PAYLOAD_START: &str = "/api/payload/start";
    pub const PAYLOAD_TERMINATE: &str = "/api/payload/terminate";
    pub const PAYLOAD_COMMUNICATION: &str = "/api/payload/communication";
    pub const PAYLOAD_STATUS: &str = "/api/payload/status";
}

/// A `(host, port)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Plain-HTTP URL for a route on this endpoint
    pub fn url(&self, route: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, route)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Readiness announcement sent once after the payload has bound its port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyRequest {
    pub info: String,
    pub port: u16,
    pub id: NodeId,
}

/// End-of-work announcement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InactiveRequest {
    pub info: String,
    pub id: NodeId,
}

/// A message between payloads.
///
/// An empty `destinations` set is a broadcast: the supervisor hands it to
/// every other member of the partition set. `origin` is whatever the sender
/// put there; receivers must not trust it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMessage {
    pub origin: NodeId,
    pub destinations: BTreeSet<NodeId>,
    pub key: String,
    pub value: String,
}

impl PeerMessage {
    /// Message from `origin` addressed to a single peer
    pub fn to_peer(origin: NodeId, peer: NodeId, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            origin,
            destinations: BTreeSet::from([peer]),
            key: key.into(),
            value: value.into(),
        }
    }

    /// Message from `origin` to every other payload
    pub fn broadcast(origin: NodeId, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            origin,
            destinations: BTreeSet::new(),
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Whether `id` is one of the recipients
    pub fn addressed_to(&self, id: NodeId) -> bool {
        self.is_broadcast() || self.destinations.contains(&id)
    }

    /// Human-readable recipient list for logs and errors
    pub fn target(&self) -> String {
        let mut ids = self.destinations.iter();
        match (ids.next(), ids.next()) {
            (None, _) => "all peers".to_string(),
            (Some(id), None) => format!("peer {id}"),
            _ => format!("peers {:?}", self.destinations),
        }
    }
}

/// Acknowledgement carried by every successful call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoResponse {
    pub info: String,
}

impl InfoResponse {
    pub fn new(info: impl Into<String>) -> Self {
        Self { info: info.into() }
    }
}

/// Body of a rejected call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Snapshot returned by the payload status call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadStatus {
    pub id: NodeId,
    pub state: String,
    pub partitions: u32,
    pub peer_count: u64,
    pub started_at: String,
    pub uptime_secs: i64,
}
