use std::sync::Arc;
use tarpaulin_core::Config;
use tarpaulin_queue::MessageChannel;
use tarpaulin_storage::BlobStore;

/// Shared handler state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn BlobStore>,
    pub channel: Arc<dyn MessageChannel>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn BlobStore>, channel: Arc<dyn MessageChannel>) -> Self {
        Self {
            config,
            store,
            channel,
        }
    }
}
