use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::{Result, WrapErr};
use tracing::info;

use aggregator_common::counters::Counters;
use aggregator_common::queue::IngestQueue;
use aggregator_common::store::{EventStore, SqliteStore};
use aggregator_worker::worker::{ShutdownSummary, WorkerPool};

use crate::config::Config;
use crate::router;

/// The store, queue and worker pool, built once at startup and torn down in reverse.
pub struct Pipeline {
    store: Arc<SqliteStore>,
    queue: Arc<IngestQueue>,
    counters: Arc<Counters>,
    workers: WorkerPool,
    started_at: Instant,
}

impl Pipeline {
    pub async fn start(config: &Config) -> Result<Self> {
        let db_path = config.resolved_db_path();
        let store = SqliteStore::open_with_connections(&db_path, config.max_store_connections)
            .await
            .wrap_err_with(|| format!("failed to open event store at {}", db_path.display()))?;
        let store = Arc::new(store);

        let queue = Arc::new(IngestQueue::new(config.queue_capacity()));
        let counters = Arc::new(Counters::new());

        let workers = WorkerPool::start(
            config.consumer_workers.get(),
            queue.clone(),
            store.clone(),
            counters.clone(),
        )
        .wrap_err("failed to start worker pool")?;

        info!(
            workers = workers.size(),
            queue_capacity = ?queue.capacity(),
            "pipeline started"
        );

        Ok(Self {
            store,
            queue,
            counters,
            workers,
            started_at: Instant::now(),
        })
    }

    /// Router state sharing this pipeline's queue, store and counters.
    pub fn state(&self) -> router::State {
        router::State {
            queue: self.queue.clone(),
            store: self.store.clone(),
            counters: self.counters.clone(),
            started_at: self.started_at,
            workers: self.workers.size(),
            db_path: self.db_path().display().to_string(),
        }
    }

    pub fn db_path(&self) -> &Path {
        self.store.path()
    }

    /// Close the queue, drain it within `drain_timeout`, join every worker, then close the store.
    pub async fn shutdown(self, drain_timeout: Duration) -> ShutdownSummary {
        let summary = self.workers.shutdown(drain_timeout).await;
        self.store.close().await;

        let counters = self.counters.snapshot();
        info!(
            received = counters.received,
            duplicate_dropped = counters.duplicate_dropped,
            persist_failed = counters.persist_failed,
            abandoned = summary.abandoned,
            "pipeline stopped"
        );

        summary
    }
}
