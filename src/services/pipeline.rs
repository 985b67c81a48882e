use async_trait::async_trait;

use crate::models::job::ResultFields;

/// The computation behind a job.
///
/// Given a job's input it eventually produces result fields or fails. The
/// broker runs it at most once per job and records whichever happens.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(&self, input: &str) -> Result<ResultFields, PipelineError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} responded with status {status}")]
    Upstream {
        service: &'static str,
        status: reqwest::StatusCode,
    },

    #[error("Failed to parse {what}: {reason}")]
    Parse { what: &'static str, reason: String },

    #[error("Could not work out {0} from the question")]
    MissingTokens(String),

    #[error("{0} does not know about this place")]
    UnknownPlace(String),

    #[error("Failed to write pipeline output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pipeline is not configured: {0}")]
    NotConfigured(&'static str),
}
