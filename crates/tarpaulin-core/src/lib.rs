//! Tarpaulin Core Library
//!
//! This crate provides the domain models, error types and configuration shared by
//! the ingest API, the blob store, the message channel and the resize worker.

pub mod backends;
pub mod config;
pub mod error;
pub mod models;
pub mod task_error;

// Re-export commonly used types
pub use backends::{QueueBackend, StorageBackend};
pub use config::{BaseConfig, Config, PipelineConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use models::{
    DerivativeTier, DerivativeUrls, ImageId, ImageInfo, ImageMetadata, InvalidImageId,
    MetadataPatch,
};
pub use task_error::{TaskError, TaskResultExt};
