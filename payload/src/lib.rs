//! Payload side of the partlink protocol.
//!
//! A payload binds an OS-assigned port, announces it to its supervisor,
//! waits for `Start`, then trades best-effort messages with its sibling
//! payloads until its work runs out or the supervisor sends `Terminate`.

pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod messaging;
pub mod node;
pub mod server;
pub mod signal;

pub use client::{Courier, Rendezvous, SupervisorClient};
pub use config::{ExchangePattern, NodeConfig, RunMode};
pub use error::NodeError;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use messaging::{LoopExit, LoopReport};
pub use node::{Node, NodeContext};
pub use signal::TerminationSignal;
