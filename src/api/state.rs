use std::sync::Arc;

use crate::adapters::OrderStore;
use crate::queue::JobQueue;
use crate::services::ConnectionRegistry;

/// Shared application state for API handlers. All collaborators are
/// constructor-injected handles; nothing here is a module-level static.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub queue: Arc<dyn JobQueue>,
    pub registry: Arc<ConnectionRegistry>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn OrderStore>,
        queue: Arc<dyn JobQueue>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
        }
    }
}
