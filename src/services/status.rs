use std::sync::Arc;
use std::time::Duration;

use crate::models::job::JobRecord;
use crate::services::identity::JobId;
use crate::services::store::{JobStore, StoreError};

/// How long the ask page waits between polls. Clients own this; the server
/// never pushes.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Read-only view of job records for polling clients.
#[derive(Clone)]
pub struct JobStatusService {
    store: Arc<JobStore>,
}

impl JobStatusService {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self { store }
    }

    /// Current record for a client-supplied id, whatever its status.
    pub async fn query(&self, raw_id: &str) -> Result<JobRecord, QueryError> {
        let id = JobId::parse(raw_id).map_err(|_| QueryError::NotFound(raw_id.to_string()))?;
        match self.store.get(&id).await {
            Ok(record) => Ok(record),
            Err(StoreError::NotFound(_)) => Err(QueryError::NotFound(raw_id.to_string())),
            Err(e) => Err(QueryError::Store(e)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("No job with id {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(StoreError),
}
