use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::info;

use crate::event::EventRecord;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("ingestion queue is closed")]
    Closed,
}

#[derive(Clone)]
enum QueueSender {
    Bounded(mpsc::Sender<EventRecord>),
    Unbounded(mpsc::UnboundedSender<EventRecord>),
}

enum QueueReceiver {
    Bounded(mpsc::Receiver<EventRecord>),
    Unbounded(mpsc::UnboundedReceiver<EventRecord>),
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<EventRecord> {
        match self {
            QueueReceiver::Bounded(rx) => rx.recv().await,
            QueueReceiver::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// In-memory FIFO between the ingress handlers and the worker pool.
///
/// When bounded, `enqueue` waits for a free slot instead of rejecting: a full queue pushes
/// back on publishers. Once `close` is called new entries are refused, while the entries
/// already accepted stay available to `dequeue` until the queue is empty.
pub struct IngestQueue {
    sender: RwLock<Option<QueueSender>>,
    receiver: Mutex<QueueReceiver>,
    depth: AtomicUsize,
    capacity: Option<usize>,
}

impl IngestQueue {
    /// Build a queue holding at most `capacity` pending entries, or unbounded for `None`.
    /// A capacity of zero is treated as unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        let capacity = capacity.filter(|c| *c > 0);
        let (sender, receiver) = match capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity);
                (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
            }
        };

        Self {
            sender: RwLock::new(Some(sender)),
            receiver: Mutex::new(receiver),
            depth: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn bounded(capacity: usize) -> Self {
        Self::new(Some(capacity))
    }

    /// Append a record. Waits for room if the queue is bounded and full.
    /// Ownership of the record moves to the queue; it is never dropped once this returns `Ok`.
    pub async fn enqueue(&self, record: EventRecord) -> Result<(), QueueError> {
        let sender = self.sender.read().await.clone().ok_or(QueueError::Closed)?;

        match sender {
            QueueSender::Bounded(tx) => {
                let permit = tx.reserve().await.map_err(|_| QueueError::Closed)?;
                self.depth.fetch_add(1, Ordering::AcqRel);
                permit.send(record);
            }
            QueueSender::Unbounded(tx) => {
                self.depth.fetch_add(1, Ordering::AcqRel);
                if tx.send(record).is_err() {
                    self.depth.fetch_sub(1, Ordering::AcqRel);
                    return Err(QueueError::Closed);
                }
            }
        }

        self.report_depth();
        Ok(())
    }

    /// Wait for the next record. Returns `None` once the queue is closed and fully drained.
    ///
    /// Cancel safe: dropping the returned future before it resolves loses no record.
    pub async fn dequeue(&self) -> Option<EventRecord> {
        let record = self.receiver.lock().await.recv().await;
        if record.is_some() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            self.report_depth();
        }
        record
    }

    /// Stop accepting entries. Returns false if the queue was already closed.
    pub async fn close(&self) -> bool {
        let closed = self.sender.write().await.take().is_some();
        if closed {
            info!(pending = self.depth(), "ingestion queue closed");
        }
        closed
    }

    /// Approximate number of pending entries. Never blocks.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn report_depth(&self) {
        metrics::gauge!("aggregator_queue_depth").set(self.depth() as f64);
    }
}
