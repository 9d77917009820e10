use std::sync::Arc;
use std::time::Duration;

use aggregator_common::counters::Counters;
use aggregator_common::event::EventRecord;
use aggregator_common::queue::IngestQueue;
use aggregator_common::store::EventStore;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::WorkerError;

/// What became of a record once a worker took it off the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// This record created the row for its key.
    Persisted,
    /// The key was already stored; the record was discarded.
    Duplicate,
    /// The store call failed; the record was discarded.
    Dropped,
}

/// Persist one dequeued record and account for the outcome.
///
/// Delivery is at-most-once after acknowledgement: the publisher was answered when the record
/// was enqueued, so a store failure is not reported back. The record is logged with its key,
/// counted as a persist failure and dropped. There is no retry and no requeue.
pub async fn process_record(
    store: &(dyn EventStore + Send + Sync),
    counters: &Counters,
    record: &EventRecord,
) -> RecordOutcome {
    match store.insert_if_absent(record).await {
        Ok(true) => {
            metrics::counter!("aggregator_events_persisted_total").increment(1);
            RecordOutcome::Persisted
        }
        Ok(false) => {
            counters.record_duplicate();
            info!(key = %record.key(), "dropped duplicate event");
            RecordOutcome::Duplicate
        }
        Err(err) => {
            counters.record_persist_failure();
            error!(
                key = %record.key(),
                "failed to persist event, dropping it: {}",
                err
            );
            RecordOutcome::Dropped
        }
    }
}

struct Worker {
    name: String,
    queue: Arc<IngestQueue>,
    store: Arc<dyn EventStore + Send + Sync>,
    counters: Arc<Counters>,
    abort: CancellationToken,
}

impl Worker {
    /// Consume the queue until it is closed and empty, or until the pool aborts.
    /// The abort signal is only observed between records, never in the middle of a store call.
    async fn run(self) {
        info!(worker = %self.name, "consumer started");
        let mut processed: u64 = 0;

        loop {
            let record = tokio::select! {
                biased;
                _ = self.abort.cancelled() => break,
                record = self.queue.dequeue() => record,
            };

            let Some(record) = record else {
                break;
            };

            process_record(self.store.as_ref(), &self.counters, &record).await;
            processed += 1;
        }

        info!(worker = %self.name, processed, "consumer stopped");
    }
}

/// Totals reported once every worker has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Entries left in the queue when the drain deadline passed.
    pub abandoned: usize,
    /// Workers whose task panicked or was cancelled.
    pub failed_workers: usize,
}

impl ShutdownSummary {
    pub fn drained(&self) -> bool {
        self.abandoned == 0
    }
}

/// A fixed set of workers draining one IngestQueue into one EventStore.
pub struct WorkerPool {
    queue: Arc<IngestQueue>,
    abort: CancellationToken,
    workers: Vec<(String, JoinHandle<()>)>,
}

impl WorkerPool {
    /// Spawn `size` workers on the current runtime.
    pub fn start(
        size: usize,
        queue: Arc<IngestQueue>,
        store: Arc<dyn EventStore + Send + Sync>,
        counters: Arc<Counters>,
    ) -> Result<Self, WorkerError> {
        if size == 0 {
            return Err(WorkerError::NoWorkersError);
        }

        let abort = CancellationToken::new();
        let workers = (1..=size)
            .map(|i| {
                let worker = Worker {
                    name: format!("w{}", i),
                    queue: queue.clone(),
                    store: store.clone(),
                    counters: counters.clone(),
                    abort: abort.clone(),
                };
                (worker.name.clone(), tokio::spawn(worker.run()))
            })
            .collect();

        info!("started worker pool with {} workers", size);

        Ok(Self {
            queue,
            abort,
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop the pool: close the queue, let workers drain what was already accepted, and
    /// abort whatever is still queued once `drain_timeout` elapses. Returns after every
    /// worker has exited, so the store can be closed safely afterwards.
    pub async fn shutdown(self, drain_timeout: Duration) -> ShutdownSummary {
        self.queue.close().await;

        let deadline = {
            let abort = self.abort.clone();
            tokio::spawn(async move {
                tokio::time::sleep(drain_timeout).await;
                warn!("drain deadline of {:?} reached, stopping workers", drain_timeout);
                abort.cancel();
            })
        };

        let results = join_all(self.workers.into_iter().map(|(name, handle)| async move {
            handle
                .await
                .map_err(|error| WorkerError::JoinError { name, error })
        }))
        .await;
        deadline.abort();

        let mut failed_workers = 0;
        for result in results {
            if let Err(err) = result {
                error!("{}", err);
                failed_workers += 1;
            }
        }

        let abandoned = self.queue.depth();
        if abandoned > 0 {
            warn!(abandoned, "dropping events still queued at shutdown");
        } else {
            info!("worker pool drained");
        }

        ShutdownSummary {
            abandoned,
            failed_workers,
        }
    }
}
