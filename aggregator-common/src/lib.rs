pub mod counters;
pub mod event;
pub mod metrics;
pub mod queue;
pub mod store;
