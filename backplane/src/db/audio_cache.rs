//! Row storage for the content-addressed audio cache.

use crate::models::audio_cache::{AudioCacheEntry, AudioCacheStats};
use backplane_common::{Error, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<AudioCacheEntry> {
    Ok(AudioCacheEntry {
        id: row.try_get("id")?,
        podcast_episode_id: row.try_get("podcast_index_episode_id")?,
        source_url: row.try_get("original_url")?,
        content_hash: row.try_get("original_sha256")?,
        original_path: row.try_get("original_path")?,
        original_size: row.try_get("original_size")?,
        file_path: row.try_get("processed_path")?,
        file_size_bytes: row.try_get::<Option<i64>, _>("processed_size")?.unwrap_or(0),
        processed_sha256: row.try_get("processed_sha256")?,
        duration_seconds: row.try_get("duration_seconds")?,
        sample_rate: row.try_get("sample_rate")?,
        channels: row.try_get("channels")?,
        last_accessed_at: parse_ts(row.try_get("last_used_at")?)?,
        created_at: parse_ts(row.try_get("created_at")?)?,
    })
}

fn parse_ts(raw: String) -> Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("invalid timestamp in audio_caches row: {}", e)))
}

/// Raw fields persisted on first download. Original and processed metadata travels
/// together so dedup-by-hash can copy an existing entry's fields verbatim.
#[derive(Debug, Clone)]
pub struct NewCacheEntry {
    pub podcast_episode_id: i64,
    pub original_url: String,
    pub original_path: String,
    pub original_sha256: String,
    pub original_size: i64,
    pub processed_path: Option<String>,
    pub processed_sha256: Option<String>,
    pub processed_size: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub sample_rate: Option<i32>,
    pub channels: Option<i32>,
}

pub async fn find_by_episode(pool: &SqlitePool, episode_id: i64) -> Result<Option<AudioCacheEntry>> {
    let row = sqlx::query("SELECT * FROM audio_caches WHERE podcast_index_episode_id = ?")
        .bind(episode_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_entry).transpose()
}

pub async fn find_by_sha256(pool: &SqlitePool, sha256: &str) -> Result<Option<AudioCacheEntry>> {
    let row = sqlx::query("SELECT * FROM audio_caches WHERE original_sha256 = ? LIMIT 1")
        .bind(sha256)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_entry).transpose()
}

pub async fn insert(pool: &SqlitePool, entry: NewCacheEntry) -> Result<i64> {
    let now = Utc::now().to_rfc3339();
    let result = sqlx::query(
        r#"
        INSERT INTO audio_caches
            (podcast_index_episode_id, original_url, original_path, original_sha256,
             original_size, processed_path, processed_sha256, processed_size,
             duration_seconds, sample_rate, channels, last_used_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.podcast_episode_id)
    .bind(&entry.original_url)
    .bind(&entry.original_path)
    .bind(&entry.original_sha256)
    .bind(entry.original_size)
    .bind(&entry.processed_path)
    .bind(&entry.processed_sha256)
    .bind(entry.processed_size)
    .bind(entry.duration_seconds)
    .bind(entry.sample_rate)
    .bind(entry.channels)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Update `last_used_at` to now, marking an entry as recently touched by a cache hit.
pub async fn touch(pool: &SqlitePool, id: i64) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query("UPDATE audio_caches SET last_used_at = ? WHERE id = ?")
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM audio_caches WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Entries whose `last_used_at` is older than `retention_days`.
pub async fn find_stale(pool: &SqlitePool, retention_days: i64) -> Result<Vec<AudioCacheEntry>> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).to_rfc3339();
    let rows = sqlx::query("SELECT * FROM audio_caches WHERE last_used_at < ?")
        .bind(cutoff)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_entry).collect()
}

pub async fn stats(pool: &SqlitePool) -> Result<AudioCacheStats> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) as entry_count,
            COUNT(DISTINCT original_sha256) as distinct_hashes,
            COALESCE(SUM(COALESCE(processed_size, original_size)), 0) as total_bytes
        FROM audio_caches
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(AudioCacheStats {
        entry_count: row.try_get("entry_count")?,
        distinct_content_hashes: row.try_get("distinct_hashes")?,
        total_bytes: row.try_get("total_bytes")?,
    })
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

    fn sample_entry(episode_id: i64, sha: &str) -> NewCacheEntry {
        NewCacheEntry {
            podcast_episode_id: episode_id,
            original_url: "https://example.com/ep.mp3".to_string(),
            original_path: format!("/data/original/{}_{}.mp3", episode_id, &sha[..8]),
            original_sha256: sha.to_string(),
            original_size: 1024,
            processed_path: Some(format!("/data/processed/{}_{}_16khz.mp3", episode_id, &sha[..8])),
            processed_sha256: Some("processedhash".repeat(4)),
            processed_size: Some(512),
            duration_seconds: Some(120.0),
            sample_rate: Some(16000),
            channels: Some(1),
        }
    }

    #[tokio::test]
    async fn insert_and_find_by_episode_round_trip() {
        let pool = test_pool().await;
        let id = insert(&pool, sample_entry(11111, &"a".repeat(64))).await.unwrap();

        let found = find_by_episode(&pool, 11111).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.podcast_episode_id, 11111);
    }

    #[tokio::test]
    async fn dedup_by_sha256_finds_prior_entry_for_different_episode() {
        let pool = test_pool().await;
        let shared_sha = "b".repeat(64);
        insert(&pool, sample_entry(11111, &shared_sha)).await.unwrap();

        let existing = find_by_sha256(&pool, &shared_sha).await.unwrap().unwrap();
        assert_eq!(existing.podcast_episode_id, 11111);

        insert(&pool, sample_entry(22222, &shared_sha)).await.unwrap();
        let stats = stats(&pool).await.unwrap();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.distinct_content_hashes, 1);
    }

    /// Mirrors `AudioCache::get_or_download`'s dedup branch: the second episode's row
    /// must copy the prior entry's original/processed fields verbatim rather than
    /// conflating original size with processed size, or original hash with processed
    /// hash (the two are deliberately distinct in `sample_entry`).
    #[tokio::test]
    async fn deduped_row_matches_prior_original_and_processed_fields_exactly() {
        let pool = test_pool().await;
        let shared_sha = "c".repeat(64);
        insert(&pool, sample_entry(11111, &shared_sha)).await.unwrap();

        let prior = find_by_sha256(&pool, &shared_sha).await.unwrap().unwrap();
        insert(
            &pool,
            NewCacheEntry {
                podcast_episode_id: 22222,
                original_url: "https://example.com/other.mp3".to_string(),
                original_path: prior.original_path.clone(),
                original_sha256: prior.content_hash.clone(),
                original_size: prior.original_size,
                processed_path: Some(prior.file_path.clone()),
                processed_sha256: prior.processed_sha256.clone(),
                processed_size: Some(prior.file_size_bytes),
                duration_seconds: prior.duration_seconds,
                sample_rate: prior.sample_rate,
                channels: prior.channels,
            },
        )
        .await
        .unwrap();

        let first = find_by_episode(&pool, 11111).await.unwrap().unwrap();
        let second = find_by_episode(&pool, 22222).await.unwrap().unwrap();

        assert_eq!(first.original_path, second.original_path);
        assert_eq!(first.original_size, second.original_size);
        assert_eq!(first.file_path, second.file_path);
        assert_eq!(first.file_size_bytes, second.file_size_bytes);
        assert_eq!(first.processed_sha256, second.processed_sha256);
        assert_eq!(first.duration_seconds, second.duration_seconds);
        assert_ne!(first.original_size, first.file_size_bytes);
    }
}
