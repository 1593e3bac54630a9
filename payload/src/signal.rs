use tokio::sync::watch;

/// Single-fire, multi-waiter shutdown flag. Once fired it stays fired.
#[derive(Debug)]
pub struct TerminationSignal {
    tx: watch::Sender<bool>,
}

impl Default for TerminationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminationSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Returns true only for the call that actually fired the signal.
    pub fn fire(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until fired. Returns immediately if it already was.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in `self`, so the channel cannot close under us
        let _ = rx.wait_for(|fired| *fired).await;
    }
}
