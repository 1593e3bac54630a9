use partlink_protocol::{Endpoint, NodeIdentity, PeerDirectory};
use std::time::Duration;

use crate::error::NodeError;

/// How the messaging loop decides it is done
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Stop after this many attempted exchanges (or earlier on terminate)
    Bounded(u64),
    /// Keep sending until terminated
    UntilTerminated,
}

/// Who each exchange is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePattern {
    /// One peer picked uniformly at random
    RandomPeer,
    /// Every peer at once (empty destination set)
    Broadcast,
}

/// Everything the node needs, fixed at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub identity: NodeIdentity,
    pub supervisor: Endpoint,
    /// Host the payload server binds on; the port is always OS-assigned
    pub bind_host: String,
    pub exchange_interval: Duration,
    pub run_mode: RunMode,
    pub pattern: ExchangePattern,
    pub rpc_timeout: Duration,
}

impl NodeConfig {
    pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
    pub const DEFAULT_EXCHANGES: u64 = 3;

    /// Validated config with the default timings
    pub fn new(local_id: u32, partition_count: u32, supervisor: Endpoint) -> Result<Self, NodeError> {
        let identity = NodeIdentity::new(local_id, partition_count)?;
        Ok(Self {
            identity,
            bind_host: supervisor.host.clone(),
            supervisor,
            exchange_interval: Self::DEFAULT_INTERVAL,
            run_mode: RunMode::Bounded(Self::DEFAULT_EXCHANGES),
            pattern: ExchangePattern::RandomPeer,
            rpc_timeout: Self::DEFAULT_RPC_TIMEOUT,
        })
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.exchange_interval = interval;
        self
    }

    pub fn with_run_mode(mut self, mode: RunMode) -> Self {
        self.run_mode = mode;
        self
    }

    pub fn with_pattern(mut self, pattern: ExchangePattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Checks that the builder setters cannot enforce. The identity is
    /// re-checked since its fields are public.
    pub fn validate(&self) -> Result<(), NodeError> {
        NodeIdentity::new(self.identity.local_id, self.identity.partition_count)?;
        if self.exchange_interval.is_zero() {
            return Err(NodeError::InvalidConfiguration("exchange interval must be non-zero".into()));
        }
        if self.rpc_timeout.is_zero() {
            return Err(NodeError::InvalidConfiguration("rpc timeout must be non-zero".into()));
        }
        if self.bind_host.is_empty() || self.supervisor.host.is_empty() {
            return Err(NodeError::InvalidConfiguration("hosts must not be empty".into()));
        }
        Ok(())
    }

    pub fn local_id(&self) -> u32 {
        self.identity.local_id
    }

    pub fn directory(&self) -> PeerDirectory {
        PeerDirectory::for_identity(&self.identity)
    }
}
