use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::store::OrchestratorStore;

/// Shared application state injected into every route via axum's
/// `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OrchestratorStore>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(store: Arc<dyn OrchestratorStore>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build outbound http client");
        Self { store, http }
    }
}
