//! Test helper utilities shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use hal_broker::models::job::{JobRecord, JobStatus, ResultFields};
use hal_broker::services::pipeline::{Pipeline, PipelineError};
use hal_broker::services::status::JobStatusService;
use hal_broker::services::store::JobStore;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

/// Stand-in for the geodata pipeline that counts its runs.
///
/// A held pipeline blocks every run until `release` hands out a permit, which
/// lets a test observe jobs while they are still in progress.
pub struct FakePipeline {
    calls: AtomicUsize,
    fields: Option<ResultFields>,
    gate: Option<Semaphore>,
}

impl FakePipeline {
    pub fn succeeding(fields: ResultFields) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fields: Some(fields),
            gate: None,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fields: None,
            gate: None,
        })
    }

    pub fn held(fields: ResultFields) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fields: Some(fields),
            gate: Some(Semaphore::new(0)),
        })
    }

    pub fn release(&self, runs: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(runs);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pipeline for FakePipeline {
    async fn run(&self, _input: &str) -> Result<ResultFields, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        match &self.fields {
            Some(fields) => Ok(fields.clone()),
            None => Err(PipelineError::MissingTokens("place".to_string())),
        }
    }
}

/// Result fields shaped like the geodata pipeline's.
pub fn sample_fields() -> ResultFields {
    let mut fields = ResultFields::new();
    fields.insert("place".to_string(), json!("Springfield"));
    fields.insert("geospatial_feature".to_string(), json!("museums"));
    fields.insert(
        "data_file_name".to_string(),
        json!("results/Springfield_museums/Springfield_museums.overpass.json"),
    );
    fields
}

pub async fn open_store(dir: &Path) -> Arc<JobStore> {
    Arc::new(
        JobStore::open(dir.join("cache.json"))
            .await
            .expect("Failed to open job store"),
    )
}

/// Poll a job the way the ask page does until it leaves `in_progress`.
///
/// Panics if a terminal status is ever followed by a non-terminal one, or if
/// the job does not finish within `timeout`.
pub async fn poll_until_finished(
    status: &JobStatusService,
    id: &str,
    timeout: Duration,
) -> JobRecord {
    let interval = Duration::from_millis(10);
    let attempts = (timeout.as_millis() / interval.as_millis()).max(1);

    for _ in 0..attempts {
        let record = status.query(id).await.expect("Job disappeared while polling");
        match record.status {
            JobStatus::Succeeded | JobStatus::Failed => {
                // A finished job must stay finished.
                let again = status.query(id).await.expect("Job disappeared while polling");
                assert_eq!(again.status, record.status);
                return record;
            }
            JobStatus::Pending | JobStatus::InProgress => sleep(interval).await,
        }
    }

    panic!("Job {id} did not finish within {timeout:?}");
}
