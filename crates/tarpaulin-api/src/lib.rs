//! Tarpaulin ingest API
//!
//! Minimal HTTP surface in front of the blob store and the message channel:
//! photo upload, photo info and media download.

pub mod api_doc;
pub mod error;
pub mod handlers;
pub mod setup;
pub mod state;

pub use error::{ErrorResponse, HttpAppError};
pub use setup::routes::setup_routes;
pub use setup::{build_state, initialize_app};
pub use state::AppState;
