//! Job domain types: type, status, payload, and the fields needed for leasing and
//! retry accounting.

use backplane_common::StructuredError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// The kinds of background work the pool knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Waveform,
    Transcription,
    ClipExtraction,
    PodcastSync,
    AutoLabel,
}

impl JobType {
    /// Every variant, in no particular order — used to derive a worker's allowed-type
    /// set from its registered processors' `can_process` predicates.
    pub const ALL: [JobType; 5] = [
        JobType::Waveform,
        JobType::Transcription,
        JobType::ClipExtraction,
        JobType::PodcastSync,
        JobType::AutoLabel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Waveform => "waveform",
            JobType::Transcription => "transcription",
            JobType::ClipExtraction => "clip_extraction",
            JobType::PodcastSync => "podcast_sync",
            JobType::AutoLabel => "auto_label",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = backplane_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waveform" => Ok(JobType::Waveform),
            "transcription" => Ok(JobType::Transcription),
            "clip_extraction" => Ok(JobType::ClipExtraction),
            "podcast_sync" => Ok(JobType::PodcastSync),
            "auto_label" => Ok(JobType::AutoLabel),
            other => Err(backplane_common::Error::InvalidInput(format!(
                "unknown job type: {}",
                other
            ))),
        }
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    PermanentlyFailed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::PermanentlyFailed => "permanently_failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states never auto-transition further.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::PermanentlyFailed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = backplane_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "permanently_failed" => Ok(JobStatus::PermanentlyFailed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(backplane_common::Error::Internal(format!(
                "unknown job status in database row: {}",
                other
            ))),
        }
    }
}

/// Options accepted by `JobService::enqueue`.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: i64,
    pub max_retries: Option<u32>,
    pub created_by: Option<String>,
}

/// A durable unit of background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub job_type: JobType,
    pub status: JobStatus,
    pub payload: HashMap<String, Value>,
    pub priority: i64,
    pub progress: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub result: Option<HashMap<String, Value>>,
    pub error: Option<StructuredError>,
    pub created_by: Option<String>,
}

impl Job {
    /// Whether this job is eligible to be (re-)claimed by a worker.
    pub fn is_claimable(&self) -> bool {
        match self.status {
            JobStatus::Pending => true,
            JobStatus::Failed => self.retry_count < self.max_retries,
            _ => false,
        }
    }

    /// Typed payload accessor: a string field, or `InvalidPayload` classification.
    pub fn payload_str(&self, key: &str) -> Result<&str, StructuredError> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StructuredError::invalid_payload(
                    "missing_field",
                    format!("payload missing required string field `{}`", key),
                )
            })
    }

    /// Typed payload accessor: an integer field, or `InvalidPayload` classification.
    pub fn payload_i64(&self, key: &str) -> Result<i64, StructuredError> {
        self.payload
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                StructuredError::invalid_payload(
                    "missing_field",
                    format!("payload missing required integer field `{}`", key),
                )
            })
    }

    /// Typed payload accessor: a bool field with a default when absent.
    pub fn payload_bool(&self, key: &str, default: bool) -> bool {
        self.payload
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_job_is_claimable() {
        let job = sample_job(JobStatus::Pending, 0, 3);
        assert!(job.is_claimable());
    }

    #[test]
    fn failed_job_below_max_retries_is_claimable() {
        let job = sample_job(JobStatus::Failed, 2, 3);
        assert!(job.is_claimable());
    }

    #[test]
    fn failed_job_at_max_retries_is_not_claimable() {
        let job = sample_job(JobStatus::Failed, 3, 3);
        assert!(!job.is_claimable());
    }

    #[test]
    fn terminal_statuses_are_never_claimable() {
        for status in [
            JobStatus::Completed,
            JobStatus::PermanentlyFailed,
            JobStatus::Cancelled,
        ] {
            let job = sample_job(status, 0, 3);
            assert!(!job.is_claimable());
        }
    }

    fn sample_job(status: JobStatus, retry_count: u32, max_retries: u32) -> Job {
        Job {
            id: 1,
            job_type: JobType::Waveform,
            status,
            payload: HashMap::new(),
            priority: 0,
            progress: 0,
            retry_count,
            max_retries,
            worker_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_failed_at: None,
            result: None,
            error: None,
            created_by: None,
        }
    }
}
