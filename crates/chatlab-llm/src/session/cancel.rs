//! Cooperative cancellation of a streaming session

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::debug;

/// Handle used to stop an in-flight generation. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancellationController {
    sender: Arc<watch::Sender<bool>>,
    finished: Arc<AtomicBool>,
}

/// Session-side half, awaited by the session task
#[derive(Debug)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancellationController {
    pub fn new() -> (Self, CancelSignal) {
        let (sender, receiver) = watch::channel(false);
        (
            Self {
                sender: Arc::new(sender),
                finished: Arc::new(AtomicBool::new(false)),
            },
            CancelSignal { receiver },
        )
    }

    /// Request cancellation. Returns true only for the call that actually
    /// cancelled; repeated calls and calls after completion do nothing.
    pub fn cancel(&self) -> bool {
        if self.finished.load(Ordering::SeqCst) {
            debug!("Cancel ignored, session already finished");
            return false;
        }
        self.sender.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Called by the session once it has stopped consuming, before finalizing
    pub(crate) fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

impl CancelSignal {
    /// Resolves once cancellation was requested. Never resolves if every
    /// controller is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
