//! Tarpaulin Storage Library
//!
//! Streaming blob storage for uploaded photos and the derivatives generated from
//! them. Every blob has a generated [`ImageId`](tarpaulin_core::ImageId), a
//! filename, a content type and an [`ImageInfo`](tarpaulin_core::ImageInfo)
//! record whose metadata the resize worker patches with derivative links.
//!
//! # Filenames
//!
//! Filenames are single path components: no `/`, `\`, `..` or leading `.`.
//! Looking a blob up by filename returns the most recent upload under that name.

pub mod factory;
pub(crate) mod names;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-postgres")]
pub mod postgres;
pub mod traits;

// Re-export commonly used types
pub use factory::create_blob_store;
#[cfg(feature = "storage-local")]
pub use local::LocalBlobStore;
#[cfg(feature = "storage-postgres")]
pub use postgres::PgBlobStore;
pub use tarpaulin_core::StorageBackend;
pub use traits::{BlobStore, ByteStream, StorageError, StorageResult};
