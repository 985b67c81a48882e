use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

/// Named values a pipeline attaches to a finished job.
pub type ResultFields = Map<String, Value>;

/// Keys owned by the record itself; result fields may not shadow them.
const RESERVED_FIELDS: [&str; 4] = ["status", "input", "created_at", "updated_at"];

/// Status of an asked question in the job store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// Persisted state for one job identity.
///
/// Serialized flat: `status`, `input` and the timestamps sit beside whatever
/// result fields the pipeline produced, which is the shape polling clients see.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub status: JobStatus,
    pub input: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub results: ResultFields,
}

impl JobRecord {
    /// A freshly submitted job, before its worker has reported back.
    pub fn in_progress(input: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            status: JobStatus::InProgress,
            input: input.into(),
            created_at: now,
            updated_at: now,
            results: ResultFields::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move the record to a terminal status and overlay `fields` onto it.
    ///
    /// Fails if the record is already terminal or `status` is not terminal.
    /// Fields named like the record's own keys are dropped.
    pub fn complete(
        &mut self,
        status: JobStatus,
        fields: ResultFields,
    ) -> Result<(), InvalidTransition> {
        if self.is_terminal() || !status.is_terminal() {
            return Err(InvalidTransition {
                from: self.status,
                to: status,
            });
        }

        for (key, value) in fields {
            if RESERVED_FIELDS.contains(&key.as_str()) {
                tracing::warn!(field = %key, "Ignoring result field that shadows a record field");
                continue;
            }
            self.results.insert(key, value);
        }

        self.status = status;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot move job from {from} to {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}
