//! Cooperative cancellation built on `tokio::sync::watch`.
//!
//! A [`CancellationHandle`] flips the flag; any number of
//! [`CancellationToken`]s observe it. Child handles are cancelled together
//! with their parent but can also be cancelled on their own.

use std::sync::Arc;
use tokio::sync::watch;

/// The triggering side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// The observing side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Create a handle that is cancelled whenever `self` is.
    ///
    /// A forwarding task is spawned on the current runtime; it exits when
    /// either side is cancelled or every parent handle is dropped.
    pub fn child(&self) -> CancellationHandle {
        let child = CancellationHandle::new();
        if self.is_cancelled() {
            child.cancel();
            return child;
        }
        let mut parent = self.token();
        let forward = child.clone();
        let mut child_token = child.token();
        tokio::spawn(async move {
            tokio::select! {
                fired = parent.wait() => {
                    if fired {
                        forward.cancel();
                    }
                }
                _ = child_token.wait() => {}
            }
        });
        child
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        CancellationHandle::new().token()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled.
    ///
    /// If every handle is dropped without cancelling, this never resolves.
    pub async fn cancelled(&self) {
        let mut token = self.clone();
        if !token.wait().await {
            std::future::pending::<()>().await;
        }
    }

    /// `true` once cancelled, `false` if the signal can no longer fire.
    async fn wait(&mut self) -> bool {
        self.rx.wait_for(|cancelled| *cancelled).await.is_ok()
    }
}
