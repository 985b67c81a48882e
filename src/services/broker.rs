use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Semaphore;

use crate::models::job::{JobRecord, JobStatus, ResultFields};
use crate::services::identity::{IdentityError, JobId};
use crate::services::pipeline::Pipeline;
use crate::services::store::{JobStore, StoreError};

pub const JOBS_SUBMITTED: &str = "hal_jobs_submitted_total";
pub const JOBS_DEDUPLICATED: &str = "hal_jobs_deduplicated_total";
pub const JOBS_SUCCEEDED: &str = "hal_jobs_succeeded_total";
pub const JOBS_FAILED: &str = "hal_jobs_failed_total";
pub const JOBS_REAPED: &str = "hal_jobs_reaped_total";
pub const JOBS_IN_FLIGHT: &str = "hal_jobs_in_flight";
pub const JOB_PROCESSING_SECONDS: &str = "hal_job_processing_seconds";

/// Register descriptions for the broker's metrics.
pub fn describe_metrics() {
    metrics::describe_counter!(JOBS_SUBMITTED, "Jobs created from a new question");
    metrics::describe_counter!(
        JOBS_DEDUPLICATED,
        "Submissions answered by an existing job"
    );
    metrics::describe_counter!(JOBS_SUCCEEDED, "Jobs whose pipeline succeeded");
    metrics::describe_counter!(JOBS_FAILED, "Jobs whose pipeline failed");
    metrics::describe_counter!(JOBS_REAPED, "In-progress jobs failed by the reaper");
    metrics::describe_gauge!(JOBS_IN_FLIGHT, "Pipelines currently running");
    metrics::describe_histogram!(JOB_PROCESSING_SECONDS, "Time spent in the pipeline");
}

/// Owns job submission, background dispatch and the terminal write.
///
/// Each new job gets its own task straight away; a semaphore bounds how many
/// of those tasks may be inside the pipeline at once, the rest wait their turn.
#[derive(Clone)]
pub struct JobBroker {
    store: Arc<JobStore>,
    pipeline: Arc<dyn Pipeline>,
    permits: Arc<Semaphore>,
}

impl JobBroker {
    pub fn new(store: Arc<JobStore>, pipeline: Arc<dyn Pipeline>, max_concurrent_jobs: usize) -> Self {
        Self {
            store,
            pipeline,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    /// Submit `input` and return its job id without waiting for the work.
    ///
    /// A job that already exists, in any state, is left alone. Registering
    /// and dispatching run in their own task, so a new job always gets a
    /// worker even if the caller goes away.
    pub async fn submit(&self, input: &str) -> Result<JobId, BrokerError> {
        let id = JobId::from_input(input)?;

        let broker = self.clone();
        let input = input.to_string();
        tokio::spawn(async move { broker.register(id, input).await }).await?
    }

    async fn register(&self, id: JobId, input: String) -> Result<JobId, BrokerError> {
        let created = self
            .store
            .insert_if_absent(id.clone(), JobRecord::in_progress(input.clone()))
            .await?;

        if !created {
            metrics::counter!(JOBS_DEDUPLICATED).increment(1);
            tracing::debug!(job_id = %id, "Job already known, not dispatching");
            return Ok(id);
        }

        metrics::counter!(JOBS_SUBMITTED).increment(1);
        tracing::info!(job_id = %id, "Job created, dispatching");

        self.dispatch(id.clone(), input);
        Ok(id)
    }

    fn dispatch(&self, id: JobId, input: String) {
        let store = self.store.clone();
        let pipeline = self.pipeline.clone();
        let permits = self.permits.clone();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::error!(job_id = %id, "Job permits closed, job left in progress");
                    return;
                }
            };

            // The reaper may have failed the job while it waited for a permit.
            match store.get(&id).await {
                Ok(record) if !record.is_terminal() => {}
                Ok(record) => {
                    tracing::info!(job_id = %id, status = %record.status, "Job finished while queued, skipping pipeline");
                    return;
                }
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Queued job vanished from store");
                    return;
                }
            }

            run_job(&store, pipeline.as_ref(), &id, &input).await;
        });
    }

    /// Fail every in-progress job created more than `max_age` ago.
    ///
    /// Returns the number of jobs reaped. A worker that finishes afterwards
    /// finds its job terminal and drops its result.
    pub async fn reap_stale(&self, max_age: chrono::Duration) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - max_age;
        let stale: Vec<JobId> = self
            .store
            .snapshot()
            .await
            .into_iter()
            .filter(|(_, record)| !record.is_terminal() && record.created_at < cutoff)
            .map(|(id, _)| id)
            .collect();

        let mut reaped = 0;
        for id in stale {
            let mut fields = ResultFields::new();
            fields.insert("error".to_string(), json!("timed out"));

            let result = self
                .store
                .update(&id, |record| {
                    if record.is_terminal() {
                        return Ok(());
                    }
                    record.complete(JobStatus::Failed, fields)?;
                    Ok(())
                })
                .await?;

            if result.status == JobStatus::Failed && result.results.contains_key("error") {
                reaped += 1;
                metrics::counter!(JOBS_REAPED).increment(1);
                tracing::warn!(job_id = %id, created_at = %result.created_at, "Stale job reaped");
            }
        }

        Ok(reaped)
    }
}

async fn run_job(store: &JobStore, pipeline: &dyn Pipeline, id: &JobId, input: &str) {
    let in_flight = metrics::gauge!(JOBS_IN_FLIGHT);
    in_flight.increment(1.0);
    let start = Instant::now();

    let (status, fields) = match pipeline.run(input).await {
        Ok(fields) => (JobStatus::Succeeded, fields),
        Err(e) => {
            tracing::warn!(job_id = %id, error = %e, "Pipeline failed");
            (JobStatus::Failed, ResultFields::new())
        }
    };

    let elapsed = start.elapsed();
    in_flight.decrement(1.0);
    metrics::histogram!(JOB_PROCESSING_SECONDS).record(elapsed.as_secs_f64());

    let written = store
        .update(id, |record| {
            record.complete(status, fields)?;
            Ok(())
        })
        .await;

    match written {
        Ok(_) => {
            let counter = if status == JobStatus::Succeeded {
                JOBS_SUCCEEDED
            } else {
                JOBS_FAILED
            };
            metrics::counter!(counter).increment(1);
            tracing::info!(
                job_id = %id,
                status = %status,
                duration_ms = elapsed.as_millis() as u64,
                "Job finished"
            );
        }
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "Failed to record job outcome");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Invalid job input: {0}")]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Submission task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
