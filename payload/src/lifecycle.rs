//! Node lifecycle.
//!
//! ```text
//! Initializing ──Bound──► Registering ──Registered──► Ready ──Start──► Running
//!                              │                        │                 │
//!                    RegistrationFailed             Terminate     Terminate / WorkExhausted
//!                              ▼                        ▼                 ▼
//!                         Terminated ◄──────Drained─────────── Draining
//! ```
//!
//! The state lives in a `watch` channel so every transition is a single
//! atomic compare-and-set that observers can await. Triggers that do not
//! apply to the current state are ignored, which makes duplicate and
//! out-of-order RPCs harmless.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::NodeError;
use crate::messaging::LoopReport;
use crate::signal::TerminationSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Initializing,
    Registering,
    Ready,
    Running,
    Draining,
    Terminated,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Terminated
    }

    /// Whether peers may still talk to us
    pub fn accepts_messages(self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::Draining)
    }

    /// Target state for `event`, or `None` when the trigger does not apply.
    pub fn next(self, event: Event) -> Option<LifecycleState> {
        use Event::*;
        use LifecycleState::*;
        match (self, event) {
            (Initializing, Bound) => Some(Registering),
            (Registering, Registered) => Some(Ready),
            // a terminate that raced registration still ends the node
            (Registering | Draining, RegistrationFailed) => Some(Terminated),
            (Ready, StartRequested) => Some(Running),
            (Running, WorkExhausted) => Some(Draining),
            (Draining, Drained) => Some(Terminated),
            (Terminated, _) | (Draining, TerminateRequested) => None,
            (_, TerminateRequested) => Some(Draining),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Initializing => "initializing",
            LifecycleState::Registering => "registering",
            LifecycleState::Ready => "ready",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Things that can move the node between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Listening socket bound, peer directory built
    Bound,
    Registered,
    RegistrationFailed,
    StartRequested,
    TerminateRequested,
    /// The messaging loop ran out of exchanges
    WorkExhausted,
    /// Server drained and messaging loop joined
    Drained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied { from: LifecycleState, to: LifecycleState },
    Ignored(LifecycleState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    Requested,
    AlreadyRequested,
}

/// Owner of the node's single `LifecycleState`, its termination signal and
/// the messaging loop handle.
pub struct Lifecycle {
    state: watch::Sender<LifecycleState>,
    termination: TerminationSignal,
    messaging: Mutex<Option<JoinHandle<LoopReport>>>,
    history: Mutex<Vec<(LifecycleState, LifecycleState)>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _rx) = watch::channel(LifecycleState::Initializing);
        Self {
            state,
            termination: TerminationSignal::new(),
            messaging: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn termination(&self) -> &TerminationSignal {
        &self.termination
    }

    /// Every applied transition, oldest first
    pub fn history(&self) -> Vec<(LifecycleState, LifecycleState)> {
        self.history.lock().clone()
    }

    pub fn apply(&self, event: Event) -> Transition {
        let mut outcome = None;
        self.state.send_if_modified(|current| {
            let transition = match current.next(event) {
                Some(to) => {
                    let from = *current;
                    *current = to;
                    self.history.lock().push((from, to));
                    Transition::Applied { from, to }
                }
                None => Transition::Ignored(*current),
            };
            outcome = Some(transition);
            matches!(transition, Transition::Applied { .. })
        });
        // send_if_modified runs the closure exactly once
        let outcome = outcome.unwrap_or(Transition::Ignored(self.state()));

        match outcome {
            Transition::Applied { from, to } => {
                tracing::info!(%from, %to, ?event, "Lifecycle transition");
            }
            Transition::Ignored(state) => {
                tracing::debug!(%state, ?event, "Lifecycle trigger ignored");
            }
        }
        outcome
    }

    /// `Ready → Running`, running `spawn` only on the call that wins the transition.
    pub fn start_with<F>(&self, spawn: F) -> Result<StartOutcome, NodeError>
    where
        F: FnOnce() -> JoinHandle<LoopReport>,
    {
        let mut slot = self.messaging.lock();
        match self.apply(Event::StartRequested) {
            Transition::Applied { .. } => {
                *slot = Some(spawn());
                Ok(StartOutcome::Started)
            }
            Transition::Ignored(LifecycleState::Running) => Ok(StartOutcome::AlreadyRunning),
            Transition::Ignored(state) => Err(NodeError::NotReady { call: "start", state }),
        }
    }

    /// Move to `Draining` and fire the termination signal.
    pub fn terminate(&self) -> TerminateOutcome {
        self.apply(Event::TerminateRequested);
        if self.termination.fire() {
            TerminateOutcome::Requested
        } else {
            TerminateOutcome::AlreadyRequested
        }
    }

    /// Called by the messaging loop after its last exchange: drain and stop.
    pub fn finish_work(&self) {
        self.apply(Event::WorkExhausted);
        self.termination.fire();
    }

    /// Gate for inbound peer messages
    pub fn check_accepts_messages(&self) -> Result<(), NodeError> {
        let state = self.state();
        if state.accepts_messages() {
            Ok(())
        } else {
            Err(NodeError::NotReady { call: "communication", state })
        }
    }

    pub fn take_messaging(&self) -> Option<JoinHandle<LoopReport>> {
        self.messaging.lock().take()
    }

    pub fn has_messaging(&self) -> bool {
        self.messaging.lock().is_some()
    }

    /// Wait until the node reaches `target`
    pub async fn wait_for(&self, target: LifecycleState) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == target).await;
    }
}
