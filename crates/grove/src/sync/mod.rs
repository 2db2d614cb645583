//! The bulk sync pipeline: ingest filter, worker pool, progress events
//! and the tidy pass.

pub mod events;
pub mod tidy;

mod engine;
mod task;

pub use engine::{SyncEngine, SyncOptions, SyncSummary, QUEUE_CAPACITY, WORKER_LIMIT};
pub use task::TaskOutcome;
