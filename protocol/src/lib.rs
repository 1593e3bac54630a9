//! partlink payload protocol
//!
//! Shared vocabulary between a payload process and the supervisor that
//! launched it.
//!
//! # Architecture
//!
//! ```text
//!            Ready / Inactive / Communication
//!   ┌─────────┐ ─────────────────────────►  ┌────────────┐
//!   │Payload 0│                             │ Supervisor │──► relays to payload 1, 2, ...
//!   └─────────┘ ◄─────────────────────────  └────────────┘
//!              Start / Terminate / Communication
//! ```
//!
//! ## Rendezvous
//! - A payload binds an OS-assigned port and announces it with `Ready`
//! - The supervisor answers with `Start` once the job is assembled
//! - The payload reports `Inactive` when its work runs out
//! - `Terminate` asks the payload to drain and exit
//!
//! ## Messaging
//! - Messages name their destinations by [`NodeId`]; the supervisor resolves
//!   addresses, payloads never track peer endpoints
//! - An empty destination set is a broadcast to every other payload
//! - Delivery is best-effort, unordered, at-most-once

pub mod peer;
pub mod types;

pub use peer::{DirectoryError, NodeIdentity, PeerDirectory};
pub use types::*;
