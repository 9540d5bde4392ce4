//! The durable job queue: enqueue, atomic claim, progress, and terminal updates.

use crate::models::job::{EnqueueOptions, Job, JobStatus, JobType};
use crate::utils::{begin_monitored, retry_on_lock};
use backplane_common::{Error, Result, StructuredError};
use chrono::Utc;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

const LOCK_RETRY_MAX_WAIT_MS: u64 = 2000;

fn payload_to_json(payload: &HashMap<String, Value>) -> Result<String> {
    serde_json::to_string(payload)
        .map_err(|e| Error::Internal(format!("failed to serialize job payload: {}", e)))
}

fn json_to_payload(raw: &str) -> Result<HashMap<String, Value>> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Internal(format!("failed to deserialize job payload: {}", e)))
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let job_type_str: String = row.try_get("type")?;
    let status_str: String = row.try_get("status")?;
    let payload_str: String = row.try_get("payload")?;
    let result_str: Option<String> = row.try_get("result")?;
    let error_type: Option<String> = row.try_get("error_type")?;
    let error_code: Option<String> = row.try_get("error_code")?;
    let error_message: Option<String> = row.try_get("error_message")?;
    let error_details: Option<String> = row.try_get("error_details")?;

    let error = match (error_type, error_message) {
        (Some(kind_str), Some(message)) => {
            let kind = backplane_common::ErrorKind::from_str_lossy(&kind_str);
            let details = error_details
                .as_deref()
                .and_then(|s| serde_json::from_str::<Value>(s).ok());
            Some(StructuredError {
                kind,
                code: error_code.unwrap_or_default(),
                message,
                details,
            })
        }
        _ => None,
    };

    Ok(Job {
        id: row.try_get("id")?,
        job_type: job_type_str
            .parse::<JobType>()
            .map_err(|e| Error::Internal(e.to_string()))?,
        status: status_str
            .parse::<JobStatus>()
            .map_err(|e| Error::Internal(e.to_string()))?,
        payload: json_to_payload(&payload_str)?,
        priority: row.try_get("priority")?,
        progress: {
            let raw: i64 = row.try_get("progress")?;
            raw.clamp(0, 100) as u8
        },
        retry_count: {
            let raw: i64 = row.try_get("retry_count")?;
            raw as u32
        },
        max_retries: {
            let raw: i64 = row.try_get("max_retries")?;
            raw as u32
        },
        worker_id: row.try_get("worker_id")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
        started_at: parse_optional_timestamp(row.try_get("started_at")?)?,
        completed_at: parse_optional_timestamp(row.try_get("completed_at")?)?,
        last_failed_at: parse_optional_timestamp(row.try_get("last_failed_at")?)?,
        result: match result_str {
            Some(raw) => Some(json_to_payload(&raw)?),
            None => None,
        },
        error,
        created_by: row.try_get("created_by")?,
    })
}

fn parse_timestamp(raw: String) -> Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("invalid timestamp in jobs row: {}", e)))
}

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<chrono::DateTime<Utc>>> {
    raw.map(parse_timestamp).transpose()
}

/// Insert a new job. Returns its assigned id.
pub async fn enqueue(
    pool: &SqlitePool,
    job_type: JobType,
    payload: HashMap<String, Value>,
    options: EnqueueOptions,
) -> Result<i64> {
    enqueue_with_unique_key(pool, job_type, payload, options, None).await
}

/// Insert a job, failing if a non-terminal job with the same `(type, unique_key)`
/// already exists. Returns the id of the existing job when one is found, so callers
/// can treat this as an idempotent upsert-by-key rather than an error.
pub async fn enqueue_unique(
    pool: &SqlitePool,
    job_type: JobType,
    unique_key: &str,
    payload: HashMap<String, Value>,
    options: EnqueueOptions,
) -> Result<i64> {
    if let Some(existing) = find_non_terminal_by_unique_key(pool, job_type, unique_key).await? {
        return Ok(existing);
    }

    retry_on_lock("enqueue_unique", LOCK_RETRY_MAX_WAIT_MS, || {
        let payload = payload.clone();
        let options = EnqueueOptions {
            priority: options.priority,
            max_retries: options.max_retries,
            created_by: options.created_by.clone(),
        };
        async {
            match enqueue_with_unique_key(pool, job_type, payload, options, Some(unique_key)).await
            {
                Ok(id) => Ok(id),
                Err(Error::Database(sqlx::Error::Database(db_err)))
                    if db_err.message().contains("UNIQUE constraint failed") =>
                {
                    find_non_terminal_by_unique_key(pool, job_type, unique_key)
                        .await?
                        .ok_or_else(|| {
                            Error::Internal(
                                "unique constraint violated but no matching row found"
                                    .to_string(),
                            )
                        })
                }
                Err(other) => Err(other),
            }
        }
    })
    .await
}

async fn find_non_terminal_by_unique_key(
    pool: &SqlitePool,
    job_type: JobType,
    unique_key: &str,
) -> Result<Option<i64>> {
    let row = sqlx::query(
        r#"
        SELECT id FROM jobs
        WHERE type = ? AND unique_key = ?
          AND status IN ('pending', 'processing', 'failed')
        LIMIT 1
        "#,
    )
    .bind(job_type.as_str())
    .bind(unique_key)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.get::<i64, _>("id")))
}

async fn enqueue_with_unique_key(
    pool: &SqlitePool,
    job_type: JobType,
    payload: HashMap<String, Value>,
    options: EnqueueOptions,
    unique_key: Option<&str>,
) -> Result<i64> {
    let now = Utc::now().to_rfc3339();
    let payload_json = payload_to_json(&payload)?;
    let max_retries = options.max_retries.unwrap_or(3);

    let result = sqlx::query(
        r#"
        INSERT INTO jobs
            (type, status, payload, priority, progress, retry_count, max_retries,
             unique_key, created_at, created_by)
        VALUES (?, 'pending', ?, ?, 0, 0, ?, ?, ?, ?)
        "#,
    )
    .bind(job_type.as_str())
    .bind(payload_json)
    .bind(options.priority)
    .bind(max_retries as i64)
    .bind(unique_key)
    .bind(&now)
    .bind(options.created_by)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Atomically lease the highest-priority, oldest claimable job of one of
/// `allowed_types` to `worker_id`.
///
/// The claim is a single `UPDATE ... WHERE id = (SELECT ...)` statement: SQLite
/// serializes writers, so the row selected by the subquery and the row updated by
/// the outer statement are the same row for exactly one caller even under
/// concurrent `claim_next` calls. It's still run through an explicit transaction
/// (rather than a bare `pool.execute`) so `begin_monitored` can surface connection
/// acquisition stalls on this path: every idle worker polls it once per tick, so
/// it's the first place pool saturation under a large worker count would show up.
pub async fn claim_next(
    pool: &SqlitePool,
    worker_id: &str,
    allowed_types: &[JobType],
) -> Result<Option<Job>> {
    if allowed_types.is_empty() {
        return Ok(None);
    }

    let placeholders = vec!["?"; allowed_types.len()].join(", ");
    let sql = format!(
        r#"
        UPDATE jobs
        SET status = 'processing', worker_id = ?, started_at = ?
        WHERE id = (
            SELECT id FROM jobs
            WHERE type IN ({})
              AND (status = 'pending'
                   OR (status = 'failed' AND retry_count < max_retries))
            ORDER BY priority DESC, created_at ASC
            LIMIT 1
        )
        RETURNING *
        "#,
        placeholders
    );

    retry_on_lock("claim_next", LOCK_RETRY_MAX_WAIT_MS, || async {
        let now = Utc::now().to_rfc3339();
        let mut tx = begin_monitored(pool, "jobs::claim_next").await?;

        let mut query = sqlx::query(&sql).bind(worker_id).bind(&now);
        for job_type in allowed_types {
            query = query.bind(job_type.as_str());
        }
        let row = query.fetch_optional(tx.inner_mut()).await?;

        let job = match &row {
            Some(row) => Some(row_to_job(row)?),
            None => None,
        };
        tx.commit().await?;
        Ok(job)
    })
    .await
}

/// Persist a progress update for a job currently `processing`. Callers are expected
/// to only ever increase `progress` within a single run.
pub async fn update_progress(pool: &SqlitePool, job_id: i64, progress: u8) -> Result<()> {
    retry_on_lock("update_progress", LOCK_RETRY_MAX_WAIT_MS, || async {
        sqlx::query("UPDATE jobs SET progress = ? WHERE id = ? AND status = 'processing'")
            .bind(progress as i64)
            .bind(job_id)
            .execute(pool)
            .await?;
        Ok(())
    })
    .await
}

/// Mark a job completed with an optional result payload.
pub async fn complete(
    pool: &SqlitePool,
    job_id: i64,
    result: Option<HashMap<String, Value>>,
) -> Result<()> {
    retry_on_lock("complete", LOCK_RETRY_MAX_WAIT_MS, || async {
        let now = Utc::now().to_rfc3339();
        let result_json = result.as_ref().map(payload_to_json).transpose()?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', progress = 100, completed_at = ?, result = ?,
                worker_id = NULL
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(result_json)
        .bind(job_id)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Mark a job failed with an unstructured message. Applies the retry budget: when
/// `retry_count` reaches `max_retries` the job becomes `permanently_failed`.
pub async fn fail(pool: &SqlitePool, job_id: i64, message: &str) -> Result<()> {
    fail_with_details(
        pool,
        job_id,
        &StructuredError::system("unclassified_failure", message),
    )
    .await
}

/// Mark a job failed with a classified error, applying the retry budget.
pub async fn fail_with_details(
    pool: &SqlitePool,
    job_id: i64,
    error: &StructuredError,
) -> Result<()> {
    retry_on_lock("fail_with_details", LOCK_RETRY_MAX_WAIT_MS, || async {
        let now = Utc::now().to_rfc3339();
        let details_json = error
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| Error::Internal(format!("failed to serialize error details: {}", e)))?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET retry_count = retry_count + 1,
                last_failed_at = ?,
                worker_id = NULL,
                error_type = ?,
                error_code = ?,
                error_message = ?,
                error_details = ?,
                status = CASE
                    WHEN retry_count + 1 >= max_retries THEN 'permanently_failed'
                    ELSE 'failed'
                END
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(error.kind.as_str())
        .bind(&error.code)
        .bind(&error.message)
        .bind(details_json)
        .bind(job_id)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Return a job to `pending` without consuming a retry, e.g. on graceful worker
/// shutdown mid-run.
pub async fn release(pool: &SqlitePool, job_id: i64) -> Result<()> {
    retry_on_lock("release", LOCK_RETRY_MAX_WAIT_MS, || async {
        sqlx::query(
            "UPDATE jobs SET status = 'pending', worker_id = NULL, started_at = NULL \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(job_id)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Move a `permanently_failed` job back to `pending`, resetting its retry counter.
pub async fn retry_failed(pool: &SqlitePool, job_id: i64) -> Result<()> {
    retry_on_lock("retry_failed", LOCK_RETRY_MAX_WAIT_MS, || async {
        sqlx::query(
            "UPDATE jobs SET status = 'pending', retry_count = 0, worker_id = NULL, \
             error_type = NULL, error_code = NULL, error_message = NULL, error_details = NULL \
             WHERE id = ? AND status = 'permanently_failed'",
        )
        .bind(job_id)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Fetch a job by id.
pub async fn get(pool: &SqlitePool, job_id: i64) -> Result<Option<Job>> {
    let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_job).transpose()
}

/// Delete terminal jobs older than `retention_days`. Returns the number removed.
pub async fn cleanup(pool: &SqlitePool, retention_days: i64) -> Result<u64> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).to_rfc3339();

    let result = sqlx::query(
        r#"
        DELETE FROM jobs
        WHERE status IN ('completed', 'permanently_failed', 'cancelled')
          AND COALESCE(completed_at, last_failed_at, created_at) < ?
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Count of non-terminal/attention-worthy jobs by status, for the health endpoint.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct JobCounts {
    pub pending: i64,
    pub processing: i64,
    pub failed: i64,
    pub permanently_failed: i64,
}

pub async fn count_by_status(pool: &SqlitePool) -> Result<JobCounts> {
    let rows = sqlx::query("SELECT status, COUNT(*) as n FROM jobs GROUP BY status")
        .fetch_all(pool)
        .await?;

    let mut counts = JobCounts::default();
    for row in rows {
        let status: String = row.try_get("status")?;
        let n: i64 = row.try_get("n")?;
        match status.as_str() {
            "pending" => counts.pending = n,
            "processing" => counts.processing = n,
            "failed" => counts.failed = n,
            "permanently_failed" => counts.permanently_failed = n,
            _ => {}
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::initialize_schema;
    use std::collections::HashMap;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn enqueue_and_claim_round_trip() {
        let pool = test_pool().await;
        let mut payload = HashMap::new();
        payload.insert("episode_id".to_string(), Value::from(123));

        let id = enqueue(
            &pool,
            JobType::Waveform,
            payload,
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

        let claimed = claim_next(&pool, "worker-1", &JobType::ALL).await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn claim_next_returns_none_when_queue_empty() {
        let pool = test_pool().await;
        assert!(claim_next(&pool, "worker-1", &JobType::ALL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_next_ignores_jobs_outside_allowed_types() {
        let pool = test_pool().await;
        enqueue(&pool, JobType::PodcastSync, HashMap::new(), EnqueueOptions::default())
            .await
            .unwrap();

        assert!(claim_next(&pool, "worker-1", &[JobType::Waveform])
            .await
            .unwrap()
            .is_none());

        let waveform_id = enqueue(&pool, JobType::Waveform, HashMap::new(), EnqueueOptions::default())
            .await
            .unwrap();
        let claimed = claim_next(&pool, "worker-1", &[JobType::Waveform])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, waveform_id);
    }

    #[tokio::test]
    async fn enqueue_unique_returns_existing_id_for_non_terminal_job() {
        let pool = test_pool().await;
        let id1 = enqueue_unique(
            &pool,
            JobType::Transcription,
            "episode:123",
            HashMap::new(),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

        let id2 = enqueue_unique(
            &pool,
            JobType::Transcription,
            "episode:123",
            HashMap::new(),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn fail_with_details_marks_permanently_failed_at_retry_budget() {
        let pool = test_pool().await;
        let id = enqueue(
            &pool,
            JobType::Waveform,
            HashMap::new(),
            EnqueueOptions {
                max_retries: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        claim_next(&pool, "w1", &JobType::ALL).await.unwrap();
        fail(&pool, id, "boom").await.unwrap();
        let job = get(&pool, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 1);

        claim_next(&pool, "w1", &JobType::ALL).await.unwrap();
        fail(&pool, id, "boom again").await.unwrap();
        let job = get(&pool, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::PermanentlyFailed);
        assert_eq!(job.retry_count, 2);
        assert!(!job.is_claimable());
    }

    #[tokio::test]
    async fn progress_updates_persist_while_processing() {
        let pool = test_pool().await;
        let id = enqueue(
            &pool,
            JobType::Waveform,
            HashMap::new(),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();
        claim_next(&pool, "w1", &JobType::ALL).await.unwrap();

        update_progress(&pool, id, 50).await.unwrap();
        let job = get(&pool, id).await.unwrap().unwrap();
        assert_eq!(job.progress, 50);
    }

    #[tokio::test]
    async fn retry_failed_resets_permanently_failed_job_to_pending() {
        let pool = test_pool().await;
        let id = enqueue(
            &pool,
            JobType::Waveform,
            HashMap::new(),
            EnqueueOptions {
                max_retries: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        claim_next(&pool, "w1", &JobType::ALL).await.unwrap();
        fail(&pool, id, "boom").await.unwrap();
        assert_eq!(
            get(&pool, id).await.unwrap().unwrap().status,
            JobStatus::PermanentlyFailed
        );

        retry_failed(&pool, id).await.unwrap();
        let job = get(&pool, id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
    }

    #[tokio::test]
    async fn count_by_status_reflects_pending_and_processing_jobs() {
        let pool = test_pool().await;
        enqueue(&pool, JobType::Waveform, HashMap::new(), EnqueueOptions::default())
            .await
            .unwrap();
        let claimed_id = enqueue(&pool, JobType::Waveform, HashMap::new(), EnqueueOptions::default())
            .await
            .unwrap();
        claim_next(&pool, "w1", &JobType::ALL).await.unwrap();
        let _ = claimed_id;

        let counts = count_by_status(&pool).await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processing, 1);
    }
}
