//! Row storage for clips.

use crate::models::clip::{Clip, ClipFilters, ClipStatus, CreateClipParams};
use backplane_common::{Error, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn row_to_clip(row: &sqlx::sqlite::SqliteRow) -> Result<Clip> {
    let uuid_str: String = row.try_get("uuid")?;
    let status_str: String = row.try_get("status")?;

    Ok(Clip {
        uuid: Uuid::parse_str(&uuid_str)
            .map_err(|e| Error::Internal(format!("invalid clip uuid in row: {}", e)))?,
        podcast_episode_id: row.try_get("podcast_index_episode_id")?,
        source_url: row.try_get("source_episode_url")?,
        start_seconds: row.try_get("original_start_time")?,
        end_seconds: row.try_get("original_end_time")?,
        label: row.try_get("label")?,
        filename: row.try_get::<Option<String>, _>("clip_filename")?.unwrap_or_default(),
        status: status_str
            .parse::<ClipStatus>()
            .map_err(|e| Error::Internal(e.to_string()))?,
        approved: row.try_get::<i64, _>("approved")? != 0,
        extracted: row.try_get::<i64, _>("extracted")? != 0,
        label_method: row.try_get("label_method")?,
        clip_duration: row.try_get("clip_duration")?,
        clip_size_bytes: row.try_get("clip_size_bytes")?,
        error_message: row.try_get("error_message")?,
        created_at: parse_ts(row.try_get("created_at")?)?,
        updated_at: parse_ts(row.try_get("updated_at")?)?,
    })
}

fn parse_ts(raw: String) -> Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("invalid timestamp in clips row: {}", e)))
}

fn clip_filename(uuid: Uuid) -> String {
    format!("clip_{}.wav", uuid)
}

pub async fn insert(
    pool: &SqlitePool,
    source_url: &str,
    params: &CreateClipParams,
) -> Result<Clip> {
    let uuid = Uuid::new_v4();
    let filename = clip_filename(uuid);
    let now = Utc::now();
    let now_str = now.to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO clips
            (uuid, podcast_index_episode_id, source_episode_url, original_start_time,
             original_end_time, label, clip_filename, status, extracted, approved,
             label_method, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?, ?)
        "#,
    )
    .bind(uuid.to_string())
    .bind(params.episode_id)
    .bind(source_url)
    .bind(params.start_seconds)
    .bind(params.end_seconds)
    .bind(&params.label)
    .bind(&filename)
    .bind(params.approved)
    .bind(&params.label_method)
    .bind(&now_str)
    .bind(&now_str)
    .execute(pool)
    .await?;

    Ok(Clip {
        uuid,
        podcast_episode_id: params.episode_id,
        source_url: source_url.to_string(),
        start_seconds: params.start_seconds,
        end_seconds: params.end_seconds,
        label: params.label.clone(),
        filename,
        status: ClipStatus::Pending,
        approved: params.approved,
        extracted: false,
        label_method: params.label_method.clone(),
        clip_duration: None,
        clip_size_bytes: None,
        error_message: None,
        created_at: now,
        updated_at: now,
    })
}

pub async fn get(pool: &SqlitePool, uuid: Uuid) -> Result<Option<Clip>> {
    let row = sqlx::query("SELECT * FROM clips WHERE uuid = ?")
        .bind(uuid.to_string())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_clip).transpose()
}

/// Idempotently mark a clip approved.
pub async fn approve(pool: &SqlitePool, uuid: Uuid) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE clips SET approved = 1, updated_at = ? WHERE uuid = ?")
        .bind(now)
        .bind(uuid.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Rename a clip's label. The blob move is the caller's responsibility; this only
/// touches the row, so callers that need compensation on DB failure can retry the
/// blob move with the old/new labels swapped.
pub async fn update_label(pool: &SqlitePool, uuid: Uuid, new_label: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let result = sqlx::query("UPDATE clips SET label = ?, updated_at = ? WHERE uuid = ?")
        .bind(new_label)
        .bind(now)
        .bind(uuid.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("clip {} not found", uuid)));
    }
    Ok(())
}

pub async fn delete(pool: &SqlitePool, uuid: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM clips WHERE uuid = ?")
        .bind(uuid.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark a clip `processing`, used when extraction starts (job-driven or export-driven).
pub async fn mark_processing(pool: &SqlitePool, uuid: Uuid) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE clips SET status = 'processing', updated_at = ? WHERE uuid = ?")
        .bind(now)
        .bind(uuid.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a successful extraction: status → ready, extracted → true, size/duration set.
pub async fn mark_extracted(
    pool: &SqlitePool,
    uuid: Uuid,
    duration: f64,
    size_bytes: i64,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        UPDATE clips
        SET status = 'ready', extracted = 1, clip_duration = ?, clip_size_bytes = ?,
            error_message = NULL, updated_at = ?
        WHERE uuid = ?
        "#,
    )
    .bind(duration)
    .bind(size_bytes)
    .bind(now)
    .bind(uuid.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_failed(pool: &SqlitePool, uuid: Uuid, error_message: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE clips SET status = 'failed', error_message = ?, updated_at = ? WHERE uuid = ?")
        .bind(error_message)
        .bind(now)
        .bind(uuid.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list(pool: &SqlitePool, filters: &ClipFilters) -> Result<Vec<Clip>> {
    let mut sql = String::from("SELECT * FROM clips WHERE 1=1");
    if filters.episode_id.is_some() {
        sql.push_str(" AND podcast_index_episode_id = ?");
    }
    if filters.label.is_some() {
        sql.push_str(" AND label = ?");
    }
    if filters.status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if filters.approved.is_some() {
        sql.push_str(" AND approved = ?");
    }
    sql.push_str(" ORDER BY created_at DESC");
    if filters.limit.is_some() {
        sql.push_str(" LIMIT ?");
    }
    if filters.offset.is_some() {
        sql.push_str(" OFFSET ?");
    }

    let mut query = sqlx::query(&sql);
    if let Some(episode_id) = filters.episode_id {
        query = query.bind(episode_id);
    }
    if let Some(label) = &filters.label {
        query = query.bind(label.clone());
    }
    if let Some(status) = filters.status {
        query = query.bind(status.as_str());
    }
    if let Some(approved) = filters.approved {
        query = query.bind(approved);
    }
    if let Some(limit) = filters.limit {
        query = query.bind(limit);
    }
    if let Some(offset) = filters.offset {
        query = query.bind(offset);
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(row_to_clip).collect()
}

/// All clips with `approved = true`, used by `export_dataset`.
pub async fn list_approved(pool: &SqlitePool) -> Result<Vec<Clip>> {
    let rows = sqlx::query("SELECT * FROM clips WHERE approved = 1 ORDER BY created_at ASC")
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_clip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::initialize_schema;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        pool
    }

    fn params() -> CreateClipParams {
        CreateClipParams {
            episode_id: 123,
            start_seconds: 10.0,
            end_seconds: 15.0,
            label: "volume spike".to_string(),
            approved: false,
            label_method: "manual".to_string(),
        }
    }

    #[tokio::test]
    async fn create_then_approve_then_get() {
        let pool = test_pool().await;
        let clip = insert(&pool, "https://example.com/ep123.mp3", &params())
            .await
            .unwrap();
        assert_eq!(clip.status, ClipStatus::Pending);
        assert!(!clip.extracted);

        approve(&pool, clip.uuid).await.unwrap();
        let fetched = get(&pool, clip.uuid).await.unwrap().unwrap();
        assert!(fetched.approved);
    }

    #[tokio::test]
    async fn mark_extracted_sets_ready_and_size() {
        let pool = test_pool().await;
        let clip = insert(&pool, "https://example.com/ep123.mp3", &params())
            .await
            .unwrap();

        mark_processing(&pool, clip.uuid).await.unwrap();
        mark_extracted(&pool, clip.uuid, 5.0, 160044).await.unwrap();

        let fetched = get(&pool, clip.uuid).await.unwrap().unwrap();
        assert_eq!(fetched.status, ClipStatus::Ready);
        assert!(fetched.extracted);
        assert_eq!(fetched.clip_size_bytes, Some(160044));
    }

    #[tokio::test]
    async fn list_approved_only_returns_approved_clips() {
        let pool = test_pool().await;
        let mut approved_params = params();
        approved_params.approved = true;
        insert(&pool, "https://example.com/ep123.mp3", &approved_params)
            .await
            .unwrap();
        insert(&pool, "https://example.com/ep123.mp3", &params())
            .await
            .unwrap();

        let approved = list_approved(&pool).await.unwrap();
        assert_eq!(approved.len(), 1);
        assert!(approved[0].approved);
    }
}
