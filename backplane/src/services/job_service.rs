//! Policy layer over the job store: enqueue, unique-enqueue, retry and cleanup policy.

use crate::db::jobs;
use crate::models::job::{EnqueueOptions, Job, JobType};
use backplane_common::{BackplaneEvent, EventBus, Result, StructuredError};
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashMap;

#[derive(Clone)]
pub struct JobService {
    db: SqlitePool,
    events: EventBus,
}

impl JobService {
    pub fn new(db: SqlitePool, events: EventBus) -> Self {
        Self { db, events }
    }

    pub async fn enqueue(
        &self,
        job_type: JobType,
        payload: HashMap<String, Value>,
        options: EnqueueOptions,
    ) -> Result<i64> {
        jobs::enqueue(&self.db, job_type, payload, options).await
    }

    /// Enqueues unless a non-terminal job with the same `(type, unique_key)` already
    /// exists, in which case that job's id is returned unchanged.
    pub async fn enqueue_unique(
        &self,
        job_type: JobType,
        unique_key: &str,
        payload: HashMap<String, Value>,
        options: EnqueueOptions,
    ) -> Result<i64> {
        jobs::enqueue_unique(&self.db, job_type, unique_key, payload, options).await
    }

    pub async fn get(&self, job_id: i64) -> Result<Option<Job>> {
        jobs::get(&self.db, job_id).await
    }

    pub async fn claim_next(&self, worker_id: &str, allowed_types: &[JobType]) -> Result<Option<Job>> {
        let job = jobs::claim_next(&self.db, worker_id, allowed_types).await?;
        if let Some(job) = &job {
            self.events.publish(BackplaneEvent::JobClaimed {
                job_id: job.id,
                job_type: job.job_type.as_str().to_string(),
                worker_id: worker_id.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
        Ok(job)
    }

    pub async fn update_progress(&self, job_id: i64, progress: u8) -> Result<()> {
        jobs::update_progress(&self.db, job_id, progress.min(100)).await?;
        self.events.publish(BackplaneEvent::JobProgress {
            job_id,
            progress: progress.min(100),
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    pub async fn complete(&self, job_id: i64, result: Option<HashMap<String, Value>>) -> Result<()> {
        jobs::complete(&self.db, job_id, result).await?;
        self.events.publish(BackplaneEvent::JobFinished {
            job_id,
            status: "completed".to_string(),
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    pub async fn fail(&self, job_id: i64, message: &str) -> Result<()> {
        jobs::fail(&self.db, job_id, message).await?;
        self.notify_finished_if_terminal(job_id).await
    }

    pub async fn fail_with_details(&self, job_id: i64, error: &StructuredError) -> Result<()> {
        jobs::fail_with_details(&self.db, job_id, error).await?;
        self.notify_finished_if_terminal(job_id).await
    }

    async fn notify_finished_if_terminal(&self, job_id: i64) -> Result<()> {
        if let Some(job) = jobs::get(&self.db, job_id).await? {
            if job.status.is_terminal() {
                self.events.publish(BackplaneEvent::JobFinished {
                    job_id,
                    status: job.status.as_str().to_string(),
                    timestamp: chrono::Utc::now(),
                });
            }
        }
        Ok(())
    }

    pub async fn release(&self, job_id: i64) -> Result<()> {
        jobs::release(&self.db, job_id).await
    }

    pub async fn retry_failed(&self, job_id: i64) -> Result<()> {
        jobs::retry_failed(&self.db, job_id).await
    }

    /// Deletes terminal jobs older than `retention_days`, returning the count removed.
    pub async fn cleanup(&self, retention_days: i64) -> Result<u64> {
        jobs::cleanup(&self.db, retention_days).await
    }
}
