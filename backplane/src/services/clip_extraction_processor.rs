//! Job-driven clip extraction: an alternative to lazy extraction at export time,
//! materializing a single clip's audio up front.

use crate::db::clips;
use crate::models::clip::ClipSource;
use crate::models::job::{Job, JobType};
use crate::services::audio_cache::AudioCache;
use crate::services::blob_store::BlobStore;
use crate::services::episode_resolver::EpisodeResolver;
use crate::services::job_service::JobService;
use crate::services::media_tool::MediaTool;
use crate::services::worker_pool::{JobProcessor, ProcessorError};
use async_trait::async_trait;
use backplane_common::StructuredError;
use serde_json::json;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

const EXTRACTION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

pub struct ClipExtractionProcessor {
    db: SqlitePool,
    job_service: JobService,
    blob_store: Arc<dyn BlobStore>,
    media_tool: Arc<dyn MediaTool>,
    audio_cache: Arc<AudioCache>,
    episode_resolver: Arc<dyn EpisodeResolver>,
    temp_dir: std::path::PathBuf,
}

impl ClipExtractionProcessor {
    pub fn new(
        db: SqlitePool,
        job_service: JobService,
        blob_store: Arc<dyn BlobStore>,
        media_tool: Arc<dyn MediaTool>,
        audio_cache: Arc<AudioCache>,
        episode_resolver: Arc<dyn EpisodeResolver>,
        temp_dir: std::path::PathBuf,
    ) -> Self {
        Self {
            db,
            job_service,
            blob_store,
            media_tool,
            audio_cache,
            episode_resolver,
            temp_dir,
        }
    }

    async fn resolve_source(&self, episode_id: i64) -> Result<ClipSource, StructuredError> {
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

    async fn run(&self, job: &Job) -> Result<serde_json::Map<String, serde_json::Value>, ProcessorError> {
        let clip_uuid_str = job.payload_str("clip_uuid")?;
        let clip_uuid = Uuid::parse_str(clip_uuid_str).map_err(|e| {
            ProcessorError::Structured(StructuredError::invalid_payload(
                "invalid_clip_uuid",
                e.to_string(),
            ))
        })?;

        self.job_service.update_progress(job.id, 5).await.map_err(to_other)?;

        let clip = clips::get(&self.db, clip_uuid)
            .await
            .map_err(to_other)?
            .ok_or_else(|| {
                ProcessorError::Structured(StructuredError::not_found(
                    "clip_not_found",
                    format!("clip {} not found", clip_uuid),
                ))
            })?;

        clips::mark_processing(&self.db, clip_uuid).await.map_err(to_other)?;
        self.job_service.update_progress(job.id, 10).await.map_err(to_other)?;

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

        self.job_service.update_progress(job.id, 50).await.map_err(to_other)?;

        let temp_path = self
            .temp_dir
            .join(format!("clip_extract_job_{}.wav", clip.uuid));

        let extraction = tokio::time::timeout(
            EXTRACTION_TIMEOUT,
            self.media_tool.extract_segment(
                Path::new(&source_path),
                &temp_path,
                clip.start_seconds,
                clip.duration_requested(),
            ),
        )
        .await
        .map_err(|_| {
            ProcessorError::Structured(StructuredError::processing(
                "extraction_timeout",
                format!("clip {} extraction exceeded {:?}", clip.uuid, EXTRACTION_TIMEOUT),
            ))
        })?;
        extraction?;

        self.job_service.update_progress(job.id, 75).await.map_err(to_other)?;

        let bytes = tokio::fs::read(&temp_path).await.map_err(|e| {
            ProcessorError::Structured(StructuredError::system(
                "read_extracted_clip_failed",
                e.to_string(),
            ))
        })?;
        let _ = tokio::fs::remove_file(&temp_path).await;

        let stored_path = self.blob_store.save_clip(&clip.label, &clip.filename, &bytes).await?;

        let duration = self
            .media_tool
            .probe_duration(Path::new(&stored_path))
            .await
            .unwrap_or_else(|_| clip.duration_requested());

        if let Err(e) = clips::mark_extracted(&self.db, clip_uuid, duration, bytes.len() as i64).await {
            let _ = self.blob_store.delete_clip(&clip.label, &clip.filename).await;
            let structured = StructuredError::system("mark_extracted_failed", e.to_string());
            let _ = clips::mark_failed(&self.db, clip_uuid, &structured.message).await;
            return Err(ProcessorError::Structured(structured));
        }

        self.job_service.update_progress(job.id, 95).await.map_err(to_other)?;

        let mut result = serde_json::Map::new();
        result.insert("clip_uuid".to_string(), json!(clip.uuid.to_string()));
        result.insert("label".to_string(), json!(clip.label));
        result.insert("duration".to_string(), json!(duration));
        result.insert("size_bytes".to_string(), json!(bytes.len() as i64));
        result.insert("sample_rate".to_string(), json!(16000));
        result.insert("channels".to_string(), json!(1));
        result.insert("source_url".to_string(), json!(clip.source_url));
        result.insert("storage_path".to_string(), json!(stored_path));
        result.insert(
            "original_range".to_string(),
            json!({ "start": clip.start_seconds, "end": clip.end_seconds }),
        );
        Ok(result)
    }
}

fn to_other(e: backplane_common::Error) -> ProcessorError {
    ProcessorError::Other(e)
}

#[async_trait]
impl JobProcessor for ClipExtractionProcessor {
    fn can_process(&self, job_type: JobType) -> bool {
        job_type == JobType::ClipExtraction
    }

    async fn process(&self, _ctx: tokio_util::sync::CancellationToken, job: Job) -> Result<(), ProcessorError> {
        let result = self.run(&job).await?;
        self.job_service
            .complete(job.id, Some(result.into_iter().collect()))
            .await
            .map_err(to_other)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::initialize_schema;
    use crate::models::clip::CreateClipParams;
    use crate::models::job::EnqueueOptions;
    use crate::services::blob_store::FilesystemBlobStore;
    use crate::services::downloader::Downloader;
    use crate::services::episode_resolver::mock::MockEpisodeResolver;
    use crate::services::episode_resolver::EpisodeInfo;
    use crate::services::media_tool::mock::MockMediaTool;
    use backplane_common::EventBus;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn extraction_job_completes_and_marks_clip_ready() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        let job_service = JobService::new(pool.clone(), EventBus::new(16));
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
                episode_id: 9,
                audio_url: "https://example.com/ep9.mp3".to_string(),
                transcript_url: None,
            })
            .await;

        let clip = clips::insert(
            &pool,
            "https://example.com/ep9.mp3",
            &CreateClipParams {
                episode_id: 9,
                start_seconds: 2.0,
                end_seconds: 7.0,
                label: "spike".to_string(),
                approved: false,
                label_method: "auto".to_string(),
            },
        )
        .await
        .unwrap();

        let processor = ClipExtractionProcessor::new(
            pool.clone(),
            job_service.clone(),
            blob_store,
            media_tool,
            audio_cache,
            resolver,
            dir.path().to_path_buf(),
        );

        let mut payload = HashMap::new();
        payload.insert("clip_uuid".to_string(), json!(clip.uuid.to_string()));
        let job_id = job_service
            .enqueue(JobType::ClipExtraction, payload, EnqueueOptions::default())
            .await
            .unwrap();
        let job = job_service.get(job_id).await.unwrap().unwrap();

        processor.process(CancellationToken::new(), job).await.unwrap();

        let updated = clips::get(&pool, clip.uuid).await.unwrap().unwrap();
        assert!(updated.extracted);
        assert_eq!(updated.status, crate::models::clip::ClipStatus::Ready);

        let persisted_job = job_service.get(job_id).await.unwrap().unwrap();
        assert_eq!(persisted_job.progress, 100);
    }

    #[tokio::test]
    async fn missing_clip_fails_job_with_not_found() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        let job_service = JobService::new(pool.clone(), EventBus::new(16));
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

        let processor = ClipExtractionProcessor::new(
            pool.clone(),
            job_service.clone(),
            blob_store,
            media_tool,
            audio_cache,
            resolver,
            dir.path().to_path_buf(),
        );

        let mut payload = HashMap::new();
        payload.insert("clip_uuid".to_string(), json!(Uuid::new_v4().to_string()));
        let job_id = job_service
            .enqueue(JobType::ClipExtraction, payload, EnqueueOptions::default())
            .await
            .unwrap();
        let job = job_service.get(job_id).await.unwrap().unwrap();

        let result = processor.process(CancellationToken::new(), job).await;
        assert!(matches!(result, Err(ProcessorError::Structured(_))));
    }
}
