use tokio::sync::mpsc;

/// Most ids the reconciliation worker takes from the queue in one drain.
pub const MAX_DRAIN_BATCH: usize = 10;

/// Producer side of the copy queue: ids of rows that will be copied and then deleted.
#[derive(Debug, Clone)]
pub struct CopyQueueTx {
    tx: mpsc::UnboundedSender<i64>,
}

impl CopyQueueTx {
    /// Enqueues `id`. Returns `false` when the consumer is gone.
    pub fn push(&self, id: i64) -> bool {
        self.tx.send(id).is_ok()
    }
}

/// Consumer side of the copy queue, owned by a single reconciliation worker.
#[derive(Debug)]
pub struct CopyQueueRx {
    rx: mpsc::UnboundedReceiver<i64>,
}

impl CopyQueueRx {
    /// Moves up to `max` queued ids into `buffer` without waiting and returns how many moved.
    pub fn drain_into(&mut self, buffer: &mut Vec<i64>, max: usize) -> usize {
        let mut drained = 0;
        while drained < max {
            match self.rx.try_recv() {
                Ok(id) => {
                    buffer.push(id);
                    drained += 1;
                }
                Err(_) => break,
            }
        }

        drained
    }
}

/// Creates an unbounded FIFO copy queue.
pub fn create_copy_queue() -> (CopyQueueTx, CopyQueueRx) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CopyQueueTx { tx }, CopyQueueRx { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_fifo_order_up_to_max() {
        let (tx, mut rx) = create_copy_queue();
        for id in 1..=25 {
            assert!(tx.push(id));
        }

        let mut buffer = Vec::new();
        assert_eq!(rx.drain_into(&mut buffer, MAX_DRAIN_BATCH), 10);
        assert_eq!(buffer, (1..=10).collect::<Vec<_>>());

        buffer.clear();
        assert_eq!(rx.drain_into(&mut buffer, MAX_DRAIN_BATCH), 10);
        buffer.clear();
        assert_eq!(rx.drain_into(&mut buffer, MAX_DRAIN_BATCH), 5);
        assert_eq!(buffer, (21..=25).collect::<Vec<_>>());

        buffer.clear();
        assert_eq!(rx.drain_into(&mut buffer, MAX_DRAIN_BATCH), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn many_producers_feed_one_consumer() {
        let (tx, mut rx) = create_copy_queue();
        let other = tx.clone();
        tx.push(1);
        other.push(2);

        let mut buffer = Vec::new();
        rx.drain_into(&mut buffer, MAX_DRAIN_BATCH);
        assert_eq!(buffer, vec![1, 2]);
    }

    #[test]
    fn push_fails_once_consumer_is_dropped() {
        let (tx, rx) = create_copy_queue();
        drop(rx);
        assert!(!tx.push(1));
    }
}
