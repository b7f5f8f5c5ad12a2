//! Tarpaulin infrastructure
//!
//! Process-level plumbing shared by the API and worker binaries.

#[cfg(feature = "database")]
pub mod database;
pub mod shutdown;
pub mod telemetry;

#[cfg(feature = "database")]
pub use database::{connect_pool, run_migrations};
pub use shutdown::shutdown_signal;
pub use telemetry::init_telemetry;
