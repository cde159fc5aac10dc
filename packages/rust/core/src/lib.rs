//! Pipeline core: work queue, feeders, worker pool, and aggregation.
//!
//! This crate ties the corpus, session, and storage layers into the
//! checkpointed producer/consumer pipeline (see [`pipeline`]):
//!
//! ```text
//! feeder → work queue → workers (one session each) → output queue
//!        → aggregator → result table + checkpoint
//! ```

pub mod aggregator;
pub mod feeder;
pub mod pipeline;
pub mod queue;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use pipeline::{
    ProgressReporter, RunSummary, SilentProgress, run_generation, run_refinement,
};
pub use queue::ContextQueue;
pub use worker::{Worker, WorkerConfig, WorkerOutput, WorkerStats};
