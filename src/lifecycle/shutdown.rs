//! Stop coordination between the signal listener and the serve loop.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// One-shot stop switch shared by clones.
///
/// A stop requested before anyone waits is remembered, so a server started
/// late still drains instead of running forever.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    requested: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request a stop. Returns how many waiters were woken.
    pub fn trigger(&self) -> usize {
        self.requested.store(true, Ordering::SeqCst);
        self.tx.send(()).unwrap_or(0)
    }

    pub fn is_triggered(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Future for `axum::serve(..).with_graceful_shutdown`.
    ///
    /// Resolves on the first trigger, immediately if one already happened.
    /// Never resolves if every clone is dropped without triggering.
    pub fn signalled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        let requested = self.requested.clone();
        let keep_open = self.tx.clone();
        async move {
            if requested.load(Ordering::SeqCst) {
                return;
            }
            let _ = rx.recv().await;
            drop(keep_open);
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
