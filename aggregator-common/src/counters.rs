use std::sync::atomic::{AtomicU64, Ordering};

/// Process lifetime pipeline counters. Start at zero, never persisted.
///
/// The number of unique events is deliberately absent: it is always read from the store.
#[derive(Debug, Default)]
pub struct Counters {
    received: AtomicU64,
    duplicate_dropped: AtomicU64,
    persist_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub received: u64,
    pub duplicate_dropped: u64,
    pub persist_failed: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records accepted into the ingestion queue.
    pub fn record_received(&self, count: u64) {
        self.received.fetch_add(count, Ordering::Relaxed);
        metrics::counter!("aggregator_events_received_total").increment(count);
    }

    /// An insert attempt that found the key already stored.
    pub fn record_duplicate(&self) {
        self.duplicate_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("aggregator_events_duplicate_total").increment(1);
    }

    /// A record dropped because the store call failed.
    pub fn record_persist_failure(&self) {
        self.persist_failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("aggregator_events_persist_failed_total").increment(1);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn duplicate_dropped(&self) -> u64 {
        self.duplicate_dropped.load(Ordering::Relaxed)
    }

    pub fn persist_failed(&self) -> u64 {
        self.persist_failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            received: self.received(),
            duplicate_dropped: self.duplicate_dropped(),
            persist_failed: self.persist_failed(),
        }
    }
}
