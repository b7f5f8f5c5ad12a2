//! Tarpaulin resize worker
//!
//! Consumes image ids from the work queue and writes JPEG derivatives for each
//! size tier back into the blob store, linking them from the original's metadata.

pub mod pipeline;
pub mod setup;

pub use pipeline::{PipelineReport, PipelineStage, ResizeWorker, WorkerSettings};
pub use setup::build_consumer;
