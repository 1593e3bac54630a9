use partlink_protocol::{NodeId, PeerDirectory, PeerMessage};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;

use crate::client::{Courier, Rendezvous};
use crate::config::{ExchangePattern, RunMode};
use crate::lifecycle::Lifecycle;

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Bounded run used up its exchanges
    Exhausted,
    /// Termination signal observed at a checkpoint
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    pub attempted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub exit: LoopExit,
}

/// Background sender: every `interval`, one message to one random peer
/// (or to all of them with [`ExchangePattern::Broadcast`]).
///
/// Checkpoints sit between sends. A send already in flight is never
/// interrupted; it finishes or times out on its own.
pub struct MessagingLoop {
    local_id: NodeId,
    directory: PeerDirectory,
    interval: Duration,
    mode: RunMode,
    pattern: ExchangePattern,
    courier: Arc<dyn Courier>,
    rendezvous: Arc<dyn Rendezvous>,
    lifecycle: Arc<Lifecycle>,
    rng: StdRng,
}

impl MessagingLoop {
    pub fn new(
        directory: PeerDirectory,
        interval: Duration,
        mode: RunMode,
        courier: Arc<dyn Courier>,
        rendezvous: Arc<dyn Rendezvous>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            local_id: directory.local_id(),
            directory,
            interval,
            mode,
            pattern: ExchangePattern::RandomPeer,
            courier,
            rendezvous,
            lifecycle,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_pattern(mut self, pattern: ExchangePattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    fn budget_spent(&self, attempted: u64) -> bool {
        match self.mode {
            RunMode::Bounded(max) => attempted >= max,
            RunMode::UntilTerminated => false,
        }
    }

    /// Message for exchange number `exchange`, `None` if nobody can receive it
    fn next_message(&mut self, exchange: u64) -> Option<PeerMessage> {
        if self.directory.is_empty() {
            return None;
        }
        let value = format!("exchange {exchange} from {}", self.local_id);
        match self.pattern {
            ExchangePattern::Broadcast => Some(PeerMessage::broadcast(self.local_id, "hello", value)),
            ExchangePattern::RandomPeer => {
                let peer = self.directory.choose(&mut self.rng)?;
                Some(PeerMessage::to_peer(self.local_id, peer, "hello", value))
            }
        }
    }

    pub async fn run(mut self) -> LoopReport {
        tracing::info!(
            id = self.local_id,
            peers = self.directory.len(),
            mode = ?self.mode,
            pattern = ?self.pattern,
            "Messaging loop started"
        );

        let mut attempted = 0u64;
        let mut delivered = 0u64;
        let mut failed = 0u64;

        let exit = loop {
            if self.lifecycle.termination().is_fired() {
                break LoopExit::Cancelled;
            }
            if self.budget_spent(attempted) {
                break LoopExit::Exhausted;
            }

            let cancelled = tokio::select! {
                _ = tokio::time::sleep(self.interval) => false,
                _ = self.lifecycle.termination().wait() => true,
            };
            if cancelled {
                break LoopExit::Cancelled;
            }

            let Some(message) = self.next_message(attempted + 1) else {
                tracing::warn!(id = self.local_id, "No peers to message, stopping");
                break LoopExit::Exhausted;
            };
            attempted += 1;
            let target = message.target();
            tracing::info!(from = self.local_id, to = %target, exchange = attempted, "Sending communication");

            match self.courier.deliver(&message).await {
                Ok(ack) => {
                    delivered += 1;
                    tracing::info!(to = %target, info = %ack.info, "Communication acknowledged");
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(to = %target, error = %e, "Communication failed, skipping exchange");
                }
            }
        };

        let report = LoopReport { attempted, delivered, failed, exit };
        tracing::info!(?report, "Messaging loop finished");

        if let Err(e) = self.rendezvous.announce_inactive().await {
            tracing::warn!(error = %e, "Proceeding to terminate without inactive acknowledgement");
        }
        self.lifecycle.finish_work();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use crate::lifecycle::{Event, LifecycleState};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use partlink_protocol::{InfoResponse, NodeIdentity};
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeCourier {
        down: HashSet<NodeId>,
        sent: Mutex<Vec<PeerMessage>>,
    }

    #[async_trait]
    impl Courier for FakeCourier {
        async fn deliver(&self, message: &PeerMessage) -> Result<InfoResponse, NodeError> {
            self.sent.lock().push(message.clone());
            if self.down.iter().any(|peer| message.addressed_to(*peer)) {
                Err(NodeError::PeerUnreachable { target: message.target(), reason: "connection refused".into() })
            } else {
                Ok(InfoResponse::new("understood"))
            }
        }
    }

    #[derive(Default)]
    struct FakeRendezvous {
        fail_inactive: bool,
        inactive_calls: AtomicUsize,
    }

    #[async_trait]
    impl Rendezvous for FakeRendezvous {
        async fn announce_ready(&self, _local: SocketAddr) -> Result<InfoResponse, NodeError> {
            Ok(InfoResponse::new("welcome"))
        }

        async fn announce_inactive(&self) -> Result<InfoResponse, NodeError> {
            self.inactive_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_inactive {
                Err(NodeError::InactiveAnnounceFailed("supervisor gone".into()))
            } else {
                Ok(InfoResponse::new("noted"))
            }
        }
    }

    fn running_lifecycle() -> Arc<Lifecycle> {
        let lc = Lifecycle::new();
        lc.apply(Event::Bound);
        lc.apply(Event::Registered);
        lc.apply(Event::StartRequested);
        Arc::new(lc)
    }

    fn build_with(
        directory: PeerDirectory,
        mode: RunMode,
        courier: Arc<FakeCourier>,
        rendezvous: Arc<FakeRendezvous>,
        lifecycle: Arc<Lifecycle>,
    ) -> MessagingLoop {
        MessagingLoop::new(directory, Duration::from_millis(10), mode, courier, rendezvous, lifecycle)
            .with_rng(StdRng::seed_from_u64(42))
    }

    fn build(
        partitions: u32,
        mode: RunMode,
        courier: Arc<FakeCourier>,
        rendezvous: Arc<FakeRendezvous>,
        lifecycle: Arc<Lifecycle>,
    ) -> MessagingLoop {
        build_with(PeerDirectory::build(0, partitions).unwrap(), mode, courier, rendezvous, lifecycle)
    }

    #[tokio::test]
    async fn bounded_run_sends_exactly_budget() {
        let courier = Arc::new(FakeCourier::default());
        let rendezvous = Arc::new(FakeRendezvous::default());
        let lifecycle = running_lifecycle();

        let report = build(3, RunMode::Bounded(4), courier.clone(), rendezvous.clone(), lifecycle.clone())
            .run()
            .await;

        assert_eq!(report, LoopReport { attempted: 4, delivered: 4, failed: 0, exit: LoopExit::Exhausted });
        let sent = courier.sent.lock();
        assert_eq!(sent.len(), 4);
        for msg in sent.iter() {
            assert_eq!(msg.origin, 0);
            assert_eq!(msg.destinations.len(), 1);
            assert!(msg.addressed_to(1) || msg.addressed_to(2));
        }
        assert_eq!(rendezvous.inactive_calls.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.state(), LifecycleState::Draining);
        assert!(lifecycle.termination().is_fired());
    }

    #[tokio::test]
    async fn unreachable_peer_does_not_stall_loop() {
        let courier = Arc::new(FakeCourier { down: HashSet::from([1]), ..Default::default() });
        let rendezvous = Arc::new(FakeRendezvous::default());

        let report = build(2, RunMode::Bounded(3), courier.clone(), rendezvous, running_lifecycle())
            .run()
            .await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.failed, 3);
        assert_eq!(report.exit, LoopExit::Exhausted);
    }

    #[tokio::test]
    async fn mixed_outcomes_add_up() {
        let courier = Arc::new(FakeCourier { down: HashSet::from([1]), ..Default::default() });
        let rendezvous = Arc::new(FakeRendezvous::default());

        let report = build(3, RunMode::Bounded(20), courier.clone(), rendezvous, running_lifecycle())
            .run()
            .await;

        assert_eq!(report.attempted, 20);
        assert_eq!(report.delivered + report.failed, 20);
        let to_one = courier.sent.lock().iter().filter(|m| m.addressed_to(1)).count() as u64;
        assert_eq!(report.failed, to_one);
    }

    #[tokio::test]
    async fn termination_cancels_unbounded_run() {
        let courier = Arc::new(FakeCourier::default());
        let rendezvous = Arc::new(FakeRendezvous::default());
        let lifecycle = running_lifecycle();

        let handle = tokio::spawn(
            build(3, RunMode::UntilTerminated, courier, rendezvous.clone(), lifecycle.clone()).run(),
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        lifecycle.terminate();

        let report = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop ignored termination")
            .unwrap();
        assert_eq!(report.exit, LoopExit::Cancelled);
        assert!(report.attempted >= 1);
        assert_eq!(rendezvous.inactive_calls.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.state(), LifecycleState::Draining);
    }

    #[tokio::test]
    async fn already_terminated_sends_nothing() {
        let courier = Arc::new(FakeCourier::default());
        let lifecycle = running_lifecycle();
        lifecycle.terminate();

        let report = build(3, RunMode::Bounded(5), courier.clone(), Arc::new(FakeRendezvous::default()), lifecycle)
            .run()
            .await;
        assert_eq!(report.attempted, 0);
        assert!(courier.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn failed_inactive_still_finishes() {
        let rendezvous = Arc::new(FakeRendezvous { fail_inactive: true, ..Default::default() });
        let lifecycle = running_lifecycle();

        build(2, RunMode::Bounded(1), Arc::new(FakeCourier::default()), rendezvous.clone(), lifecycle.clone())
            .run()
            .await;

        assert_eq!(rendezvous.inactive_calls.load(Ordering::SeqCst), 1);
        assert!(lifecycle.termination().is_fired());
    }

    #[tokio::test]
    async fn broadcast_leaves_destinations_empty() {
        let courier = Arc::new(FakeCourier::default());
        let report = build(4, RunMode::Bounded(2), courier.clone(), Arc::new(FakeRendezvous::default()), running_lifecycle())
            .with_pattern(ExchangePattern::Broadcast)
            .run()
            .await;

        assert_eq!(report.delivered, 2);
        let sent = courier.sent.lock();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.is_broadcast() && m.origin == 0));
    }

    #[tokio::test]
    async fn broadcast_fails_when_any_peer_is_down() {
        let courier = Arc::new(FakeCourier { down: HashSet::from([3]), ..Default::default() });
        let report = build(4, RunMode::Bounded(2), courier, Arc::new(FakeRendezvous::default()), running_lifecycle())
            .with_pattern(ExchangePattern::Broadcast)
            .run()
            .await;
        assert_eq!(report.failed, 2);
        assert_eq!(report.exit, LoopExit::Exhausted);
    }

    #[tokio::test]
    async fn empty_directory_stops_without_panicking() {
        let courier = Arc::new(FakeCourier::default());
        let rendezvous = Arc::new(FakeRendezvous::default());
        let lifecycle = running_lifecycle();
        let lonely = PeerDirectory::for_identity(&NodeIdentity { local_id: 0, partition_count: 1 });

        let report = build_with(lonely, RunMode::UntilTerminated, courier.clone(), rendezvous.clone(), lifecycle.clone())
            .run()
            .await;

        assert_eq!(report, LoopReport { attempted: 0, delivered: 0, failed: 0, exit: LoopExit::Exhausted });
        assert!(courier.sent.lock().is_empty());
        assert_eq!(rendezvous.inactive_calls.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.state(), LifecycleState::Draining);
        assert!(lifecycle.termination().is_fired());
    }
}
