//! Create, label, and export labeled audio clips. Extraction is lazy: a clip row
//! can sit at `status=pending` indefinitely until something asks for its bytes.

use crate::db::clips;
use crate::models::clip::{Clip, ClipFilters, ClipSource, CreateClipParams, ManifestEntry};
use crate::services::audio_cache::AudioCache;
use crate::services::blob_store::BlobStore;
use crate::services::episode_resolver::EpisodeResolver;
use crate::services::media_tool::MediaTool;
use backplane_common::StructuredError;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub struct ClipService {
    db: SqlitePool,
    blob_store: Arc<dyn BlobStore>,
    media_tool: Arc<dyn MediaTool>,
    audio_cache: Arc<AudioCache>,
    episode_resolver: Arc<dyn EpisodeResolver>,
    temp_dir: std::path::PathBuf,
}

impl ClipService {
    pub fn new(
        db: SqlitePool,
        blob_store: Arc<dyn BlobStore>,
        media_tool: Arc<dyn MediaTool>,
        audio_cache: Arc<AudioCache>,
        episode_resolver: Arc<dyn EpisodeResolver>,
        temp_dir: std::path::PathBuf,
    ) -> Self {
        Self {
            db,
            blob_store,
            media_tool,
            audio_cache,
            episode_resolver,
            temp_dir,
        }
    }

    async fn resolve_source(&self, episode_id: i64) -> backplane_common::Result<ClipSource> {
        if let Some(entry) = crate::db::audio_cache::find_by_episode(&self.db, episode_id).await? {
            return Ok(ClipSource::CachedFile {
                path: entry.original_path,
            });
        }
        let episode = self.episode_resolver.resolve(episode_id).await?;
        Ok(ClipSource::RemoteUrl {
            url: episode.audio_url,
        })
    }

    pub async fn create(&self, params: CreateClipParams) -> Result<Clip, StructuredError> {
        params.validate()?;
        let source = self.resolve_source(params.episode_id).await?;
        let clip = clips::insert(&self.db, source.as_str(), &params).await?;
        Ok(clip)
    }

    pub async fn approve(&self, uuid: Uuid) -> backplane_common::Result<()> {
        clips::approve(&self.db, uuid).await
    }

    /// Moves the clip's blob to the new label's directory, then updates the row. On
    /// a DB failure after a successful move, the blob move is reversed.
    pub async fn update_label(&self, uuid: Uuid, new_label: &str) -> Result<(), StructuredError> {
        let clip = clips::get(&self.db, uuid)
            .await?
            .ok_or_else(|| StructuredError::not_found("clip_not_found", format!("clip {} not found", uuid)))?;

        if !clip.extracted {
            return clips::update_label(&self.db, uuid, new_label)
                .await
                .map_err(Into::into);
        }

        let old_label = clip.label.clone();
        self.blob_store
            .move_clip(&old_label, new_label, &clip.filename)
            .await?;

        if let Err(e) = clips::update_label(&self.db, uuid, new_label).await {
            if let Err(compensation_err) = self.blob_store.move_clip(new_label, &old_label, &clip.filename).await {
                tracing::error!(
                    clip_uuid = %uuid,
                    error = %compensation_err,
                    "failed to compensate blob move after label update failure"
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn delete(&self, uuid: Uuid) -> backplane_common::Result<()> {
        if let Some(clip) = clips::get(&self.db, uuid).await? {
            if clip.status == crate::models::clip::ClipStatus::Ready {
                if let Err(e) = self.blob_store.delete_clip(&clip.label, &clip.filename).await {
                    tracing::warn!(clip_uuid = %uuid, error = %e, "failed to delete clip blob");
                }
            }
        }
        clips::delete(&self.db, uuid).await
    }

    pub async fn list(&self, filters: &ClipFilters) -> backplane_common::Result<Vec<Clip>> {
        clips::list(&self.db, filters).await
    }

    async fn extract_for_export(&self, clip: &Clip) -> Result<(), StructuredError> {
        clips::mark_processing(&self.db, clip.uuid).await?;

        let source_path = match self.resolve_source(clip.podcast_episode_id).await? {
            ClipSource::CachedFile { path } => path,
            ClipSource::RemoteUrl { url } => {
                let entry = self
                    .audio_cache
                    .get_or_download(clip.podcast_episode_id, &url)
                    .await?;
                entry.original_path
            }
        };

        let temp_path = self.temp_dir.join(format!("clip_extract_{}.wav", clip.uuid));
        self.media_tool
            .extract_segment(
                Path::new(&source_path),
                &temp_path,
                clip.start_seconds,
                clip.duration_requested(),
            )
            .await?;

        let bytes = tokio::fs::read(&temp_path).await.map_err(|e| {
            StructuredError::system("read_extracted_clip_failed", e.to_string())
        })?;
        let _ = tokio::fs::remove_file(&temp_path).await;

        let stored_path = self
            .blob_store
            .save_clip(&clip.label, &clip.filename, &bytes)
            .await?;

        let duration = self
            .media_tool
            .probe_duration(Path::new(&stored_path))
            .await
            .unwrap_or_else(|_| clip.duration_requested());

        if let Err(e) = clips::mark_extracted(&self.db, clip.uuid, duration, bytes.len() as i64).await {
            let _ = self.blob_store.delete_clip(&clip.label, &clip.filename).await;
            clips::mark_failed(&self.db, clip.uuid, &e.to_string()).await?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Copies every approved clip's audio into `export_dir/<label>/<filename>`,
    /// extracting on demand for clips that have never been materialized, then
    /// writes `manifest.jsonl` listing the clips that made it across.
    pub async fn export_dataset(&self, export_dir: &Path) -> Result<usize, StructuredError> {
        tokio::fs::create_dir_all(export_dir)
            .await
            .map_err(|e| StructuredError::system("export_dir_create_failed", e.to_string()))?;

        let approved = clips::list_approved(&self.db).await?;
        let mut manifest_entries = Vec::new();

        for clip in approved {
            let already_present = clip.extracted && self.blob_store.exists(&self.blob_store.get_clip_path(&clip.label, &clip.filename)).await.unwrap_or(false);

            if !already_present {
                if let Err(e) = self.extract_for_export(&clip).await {
                    tracing::warn!(clip_uuid = %clip.uuid, error = %e, "skipping clip in export: extraction failed");
                    continue;
                }
            }

            let clip = match clips::get(&self.db, clip.uuid).await? {
                Some(clip) => clip,
                None => continue,
            };

            match self
                .blob_store
                .export_clip(&clip.label, &clip.filename, export_dir)
                .await
            {
                Ok(exported_path) => {
                    manifest_entries.push(ManifestEntry {
                        file_path: exported_path,
                        label: clip.label.clone(),
                        duration: clip.clip_duration.unwrap_or_else(|| clip.duration_requested()),
                        source_url: clip.source_url.clone(),
                        original_start_time: clip.start_seconds,
                        original_end_time: clip.end_seconds,
                        uuid: clip.uuid.to_string(),
                        created_at: clip.created_at.to_rfc3339(),
                    });
                }
                Err(e) => {
                    tracing::warn!(clip_uuid = %clip.uuid, error = %e, "skipping clip in export: copy to export dir failed");
                }
            }
        }

        write_manifest(export_dir, &manifest_entries).await?;
        Ok(manifest_entries.len())
    }
}

async fn write_manifest(export_dir: &Path, entries: &[ManifestEntry]) -> Result<(), StructuredError> {
    let manifest_path = export_dir.join("manifest.jsonl");
    let mut file = tokio::fs::File::create(&manifest_path)
        .await
        .map_err(|e| StructuredError::system("manifest_create_failed", e.to_string()))?;

    for entry in entries {
        let line = serde_json::to_string(entry)
            .map_err(|e| StructuredError::system("manifest_serialize_failed", e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StructuredError::system("manifest_write_failed", e.to_string()))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| StructuredError::system("manifest_write_failed", e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::initialize_schema;
    use crate::services::blob_store::FilesystemBlobStore;
    use crate::services::downloader::Downloader;
    use crate::services::episode_resolver::mock::MockEpisodeResolver;
    use crate::services::episode_resolver::EpisodeInfo;
    use crate::services::media_tool::mock::MockMediaTool;
    use std::time::Duration;

    async fn test_service() -> (ClipService, tempfile::TempDir) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let blob_store: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(dir.path()));
        let media_tool: Arc<dyn MediaTool> = Arc::new(MockMediaTool::new());
        let downloader = Arc::new(Downloader::new(
            dir.path().to_path_buf(),
            500 * 1024 * 1024,
            Duration::from_secs(60),
            "test-agent/1.0",
        ));
        let audio_cache = Arc::new(AudioCache::new(pool.clone(), blob_store.clone(), downloader, media_tool.clone()));
        let resolver = Arc::new(MockEpisodeResolver::new());
        resolver
            .insert(EpisodeInfo {
                episode_id: 1,
                audio_url: "https://example.com/ep1.mp3".to_string(),
                transcript_url: None,
            })
            .await;

        let service = ClipService::new(pool, blob_store, media_tool, audio_cache, resolver, dir.path().to_path_buf());
        (service, dir)
    }

    fn params() -> CreateClipParams {
        CreateClipParams {
            episode_id: 1,
            start_seconds: 1.0,
            end_seconds: 6.0,
            label: "intro".to_string(),
            approved: true,
            label_method: "manual".to_string(),
        }
    }

    #[tokio::test]
    async fn create_then_approve_round_trip() {
        let (service, _dir) = test_service().await;
        let mut p = params();
        p.approved = false;
        let clip = service.create(p).await.unwrap();
        assert!(!clip.approved);

        service.approve(clip.uuid).await.unwrap();
        let listed = service.list(&ClipFilters::default()).await.unwrap();
        assert!(listed[0].approved);
    }

    #[tokio::test]
    async fn export_dataset_extracts_and_writes_manifest() {
        let (service, dir) = test_service().await;
        service.create(params()).await.unwrap();

        let export_dir = dir.path().join("export");
        let exported = service.export_dataset(&export_dir).await.unwrap();
        assert_eq!(exported, 1);

        let manifest = tokio::fs::read_to_string(export_dir.join("manifest.jsonl"))
            .await
            .unwrap();
        assert_eq!(manifest.lines().count(), 1);
        assert!(manifest.contains("\"label\":\"intro\""));
    }

    #[tokio::test]
    async fn export_dataset_with_no_approved_clips_writes_empty_manifest() {
        let (service, dir) = test_service().await;
        let export_dir = dir.path().join("export");
        let exported = service.export_dataset(&export_dir).await.unwrap();
        assert_eq!(exported, 0);

        let manifest = tokio::fs::read_to_string(export_dir.join("manifest.jsonl"))
            .await
            .unwrap();
        assert!(manifest.is_empty());
    }

    #[tokio::test]
    async fn export_dataset_run_twice_skips_re_extraction_and_repeats_manifest() {
        let (service, dir) = test_service().await;
        let clip = service.create(params()).await.unwrap();

        let export_dir = dir.path().join("export");
        let first = service.export_dataset(&export_dir).await.unwrap();
        assert_eq!(first, 1);
        let after_first = clips::get(&service.db, clip.uuid).await.unwrap().unwrap();
        assert!(after_first.extracted);

        let second = service.export_dataset(&export_dir).await.unwrap();
        assert_eq!(second, 1);
        let after_second = clips::get(&service.db, clip.uuid).await.unwrap().unwrap();
        assert_eq!(after_second.clip_size_bytes, after_first.clip_size_bytes);

        let manifest = tokio::fs::read_to_string(export_dir.join("manifest.jsonl"))
            .await
            .unwrap();
        assert_eq!(manifest.lines().count(), 1);
    }
}
