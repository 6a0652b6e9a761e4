//! One-shot readiness gate.
//!
//! The runtime fires the [`ReadyTrigger`] once the platform connection has
//! delivered its initial state. Initial population of guild aggregates
//! waits on the matching [`ReadySignal`].

use tokio::sync::watch;

/// Creates a connected trigger/signal pair, initially not ready.
#[must_use]
pub fn readiness() -> (ReadyTrigger, ReadySignal) {
    let (tx, rx) = watch::channel(false);
    (ReadyTrigger { tx }, ReadySignal { rx })
}

/// Firing side of the gate.
#[derive(Debug)]
pub struct ReadyTrigger {
    tx: watch::Sender<bool>,
}

impl ReadyTrigger {
    /// Marks the runtime ready. Firing twice has no further effect.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }
}

/// Waiting side of the gate. Clone it to wait from several tasks.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    rx: watch::Receiver<bool>,
}

impl ReadySignal {
    /// Returns `true` once the trigger has fired.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits until the trigger fires.
    ///
    /// Returns `false` if the trigger was dropped without firing.
    pub async fn wait(&mut self) -> bool {
        self.rx.wait_for(|ready| *ready).await.is_ok()
    }
}
