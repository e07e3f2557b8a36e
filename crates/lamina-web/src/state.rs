//! Shared application state for the web server.

use std::sync::Arc;

use lamina_acquisition::orchestrator::Orchestrator;
use lamina_acquisition::progress::ProgressBus;
use lamina_acquisition::registry::JobRegistry;
use lamina_acquisition::storage::StorageLayout;

/// Injected into every Axum handler.
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub storage: Arc<StorageLayout>,
    pub bus: Arc<ProgressBus>,
}

pub type SharedState = Arc<AppState>;
