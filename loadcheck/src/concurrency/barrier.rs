use std::sync::Arc;

use tokio::sync::watch;

/// Completion barrier for one batch of asynchronous calls.
///
/// Every call of the batch registers a [`BarrierArrival`] before it is submitted. The arrival
/// counts the barrier down when it is dropped, which happens once the callback holding it has
/// finished or when a rejected call's callback is discarded. [`BatchBarrier::wait`] resolves once
/// every registered arrival is gone.
#[derive(Debug, Clone)]
pub struct BatchBarrier {
    pending: Arc<watch::Sender<usize>>,
}

impl BatchBarrier {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            pending: Arc::new(tx),
        }
    }

    /// Registers one more call of the batch.
    pub fn arrival(&self) -> BarrierArrival {
        self.pending.send_modify(|pending| *pending += 1);

        BarrierArrival {
            pending: self.pending.clone(),
        }
    }

    /// Returns the number of arrivals still outstanding.
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Waits until every registered arrival has been released.
    pub async fn wait(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }
}

impl Default for BatchBarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// Outstanding call of a [`BatchBarrier`]. Counts the barrier down on drop.
#[derive(Debug)]
pub struct BarrierArrival {
    pending: Arc<watch::Sender<usize>>,
}

impl Drop for BarrierArrival {
    fn drop(&mut self) {
        self.pending
            .send_modify(|pending| *pending = pending.saturating_sub(1));
    }
}
