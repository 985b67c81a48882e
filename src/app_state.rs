use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    broker::JobBroker,
    pipeline::Pipeline,
    status::JobStatusService,
    store::JobStore,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub broker: Arc<JobBroker>,
    pub status: JobStatusService,
    pub base_path: Option<String>,
    pub results_dir: Arc<PathBuf>,
}

impl AppState {
    /// Wire the broker and status service to one store.
    pub fn new(store: Arc<JobStore>, pipeline: Arc<dyn Pipeline>, config: &AppConfig) -> Self {
        let broker = JobBroker::new(store.clone(), pipeline, config.max_concurrent_jobs);
        Self {
            status: JobStatusService::new(store.clone()),
            broker: Arc::new(broker),
            store,
            base_path: config.base_path.clone(),
            results_dir: Arc::new(config.results_dir.clone()),
        }
    }

    /// Base path prefix, or "" when routes are served at the root.
    pub fn base_path(&self) -> &str {
        self.base_path.as_deref().unwrap_or("")
    }
}
