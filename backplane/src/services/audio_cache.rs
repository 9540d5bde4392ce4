//! Content-addressed download + ML-normalization cache, keyed on episode id and
//! SHA-256 of the original bytes.

use crate::db::audio_cache as cache_db;
use crate::models::audio_cache::{AudioCacheEntry, AudioCacheStats};
use crate::services::blob_store::BlobStore;
use crate::services::downloader::Downloader;
use crate::services::media_tool::MediaTool;
use crate::utils::sha256::{hash_file, short_hash};
use backplane_common::StructuredError;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

pub struct AudioCache {
    db: SqlitePool,
    blob_store: Arc<dyn BlobStore>,
    downloader: Arc<Downloader>,
    media_tool: Arc<dyn MediaTool>,
}

impl AudioCache {
    pub fn new(
        db: SqlitePool,
        blob_store: Arc<dyn BlobStore>,
        downloader: Arc<Downloader>,
        media_tool: Arc<dyn MediaTool>,
    ) -> Self {
        Self {
            db,
            blob_store,
            downloader,
            media_tool,
        }
    }

    /// Returns the cache entry for `episode_id`, downloading and transcoding on a
    /// first access and deduplicating by content hash against any other episode
    /// that happens to carry identical audio.
    pub async fn get_or_download(
        &self,
        episode_id: i64,
        audio_url: &str,
    ) -> Result<AudioCacheEntry, StructuredError> {
        if let Some(existing) = cache_db::find_by_episode(&self.db, episode_id)
            .await
            .map_err(|e| StructuredError::system("db_lookup_failed", e.to_string()))?
        {
            cache_db::touch(&self.db, existing.id)
                .await
                .map_err(|e| StructuredError::system("db_touch_failed", e.to_string()))?;
            return Ok(existing);
        }

        let download = self
            .downloader
            .download_with_retry(audio_url, episode_id)
            .await?;

        let original_hash = hash_file(&download.path)
            .await
            .map_err(|e| StructuredError::system("hash_failed", e.to_string()))?;

        if let Some(prior) = cache_db::find_by_sha256(&self.db, &original_hash)
            .await
            .map_err(|e| StructuredError::system("db_lookup_failed", e.to_string()))?
        {
            let _ = tokio::fs::remove_file(&download.path).await;
            let id = cache_db::insert(
                &self.db,
                cache_db::NewCacheEntry {
                    podcast_episode_id: episode_id,
                    original_url: audio_url.to_string(),
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
            .map_err(|e| StructuredError::system("db_insert_failed", e.to_string()))?;

            return cache_db::find_by_episode(&self.db, episode_id)
                .await
                .map_err(|e| StructuredError::system("db_lookup_failed", e.to_string()))?
                .ok_or_else(|| {
                    StructuredError::system(
                        "cache_row_missing_after_insert",
                        format!("row {} vanished immediately after insert", id),
                    )
                });
        }

        self.ingest_new_original(episode_id, audio_url, &download.path, &original_hash)
            .await
    }

    async fn ingest_new_original(
        &self,
        episode_id: i64,
        audio_url: &str,
        original_path: &Path,
        original_hash: &str,
    ) -> Result<AudioCacheEntry, StructuredError> {
        let original_bytes = tokio::fs::read(original_path)
            .await
            .map_err(|e| StructuredError::system("read_original_failed", e.to_string()))?;
        let ext = original_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp3");
        let sha8 = short_hash(original_hash);

        let stored_original = self
            .blob_store
            .save(
                &original_bytes,
                &format!("original/{}_{}.{}", episode_id, sha8, ext),
            )
            .await
            .map_err(|e| StructuredError::system("save_original_failed", e.to_string()))?;

        let processed_relative = format!("processed/{}_{}_16khz.mp3", episode_id, sha8);
        let processed_temp = original_path.with_file_name(format!("{}_processed.mp3", sha8));

        if let Err(e) = self
            .media_tool
            .transcode_to_ml(original_path, &processed_temp)
            .await
        {
            let _ = self.blob_store.delete(&stored_original).await;
            return Err(e);
        }

        let processed_bytes = match tokio::fs::read(&processed_temp).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = self.blob_store.delete(&stored_original).await;
                return Err(StructuredError::system("read_processed_failed", e.to_string()));
            }
        };

        let stored_processed = match self.blob_store.save(&processed_bytes, &processed_relative).await {
            Ok(path) => path,
            Err(e) => {
                let _ = self.blob_store.delete(&stored_original).await;
                return Err(StructuredError::system("save_processed_failed", e.to_string()));
            }
        };

        let processed_hash = hash_file(&processed_temp).await.unwrap_or_default();
        let duration = self
            .media_tool
            .probe_duration(&processed_temp)
            .await
            .unwrap_or(0.0);
        let _ = tokio::fs::remove_file(&processed_temp).await;

        let insert_result = cache_db::insert(
            &self.db,
            cache_db::NewCacheEntry {
                podcast_episode_id: episode_id,
                original_url: audio_url.to_string(),
                original_path: stored_original.clone(),
                original_sha256: original_hash.to_string(),
                original_size: original_bytes.len() as i64,
                processed_path: Some(stored_processed.clone()),
                processed_sha256: Some(processed_hash),
                processed_size: Some(processed_bytes.len() as i64),
                duration_seconds: Some(duration),
                sample_rate: Some(16000),
                channels: Some(1),
            },
        )
        .await;

        let id = match insert_result {
            Ok(id) => id,
            Err(e) => {
                let _ = self.blob_store.delete(&stored_original).await;
                let _ = self.blob_store.delete(&stored_processed).await;
                return Err(StructuredError::system("db_insert_failed", e.to_string()));
            }
        };

        cache_db::find_by_episode(&self.db, episode_id)
            .await
            .map_err(|e| StructuredError::system("db_lookup_failed", e.to_string()))?
            .ok_or_else(|| {
                StructuredError::system(
                    "cache_row_missing_after_insert",
                    format!("row {} vanished immediately after insert", id),
                )
            })
    }

    pub async fn cleanup_old(&self, retention_days: i64) -> Result<usize, StructuredError> {
        let stale = cache_db::find_stale(&self.db, retention_days)
            .await
            .map_err(|e| StructuredError::system("db_lookup_failed", e.to_string()))?;

        let mut removed = 0;
        for entry in stale {
            if let Err(e) = self.blob_store.delete(&entry.file_path).await {
                tracing::warn!(entry_id = entry.id, error = %e, "failed to delete stale blob");
            }
            if let Err(e) = cache_db::delete(&self.db, entry.id).await {
                tracing::warn!(entry_id = entry.id, error = %e, "failed to delete stale row");
                continue;
            }
            removed += 1;
        }
        Ok(removed)
    }

    pub async fn get_stats(&self) -> Result<AudioCacheStats, StructuredError> {
        cache_db::stats(&self.db)
            .await
            .map_err(|e| StructuredError::system("db_lookup_failed", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::initialize_schema;
    use crate::services::blob_store::FilesystemBlobStore;
    use crate::services::media_tool::mock::MockMediaTool;
    use std::time::Duration;

    fn test_downloader(temp_dir: &Path) -> Downloader {
        Downloader::new(
            temp_dir.to_path_buf(),
            500 * 1024 * 1024,
            Duration::from_secs(300),
            "test-agent/1.0",
        )
    }

    #[tokio::test]
    async fn get_stats_on_empty_cache_is_zero() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let cache = AudioCache::new(
            pool,
            Arc::new(FilesystemBlobStore::new(dir.path())),
            Arc::new(test_downloader(dir.path())),
            Arc::new(MockMediaTool::new()),
        );

        let stats = cache.get_stats().await.unwrap();
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn cleanup_old_on_empty_cache_removes_nothing() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let cache = AudioCache::new(
            pool,
            Arc::new(FilesystemBlobStore::new(dir.path())),
            Arc::new(test_downloader(dir.path())),
            Arc::new(MockMediaTool::new()),
        );

        assert_eq!(cache.cleanup_old(30).await.unwrap(), 0);
    }
}
