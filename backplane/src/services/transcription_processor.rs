//! Fetches a publisher-supplied transcript when one exists, otherwise generates
//! one from cached audio via an external speech-to-text binary.

use crate::db::transcriptions;
use crate::models::job::{Job, JobType};
use crate::models::transcription::{TranscriptFormat, TranscriptSource};
use crate::services::audio_cache::AudioCache;
use crate::services::episode_resolver::EpisodeResolver;
use crate::services::job_service::JobService;
use crate::services::worker_pool::{JobProcessor, ProcessorError};
use async_trait::async_trait;
use backplane_common::StructuredError;
use serde_json::json;
use sqlx::SqlitePool;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const MAX_TRANSCRIPT_BYTES: u64 = 10 * 1024 * 1024;
const SPEECH_TO_TEXT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TranscriptionProcessor {
    db: SqlitePool,
    job_service: JobService,
    episode_resolver: Arc<dyn EpisodeResolver>,
    audio_cache: Arc<AudioCache>,
    http_client: reqwest::Client,
    whisper_binary: Option<String>,
    prefer_existing: bool,
}

impl TranscriptionProcessor {
    pub fn new(
        db: SqlitePool,
        job_service: JobService,
        episode_resolver: Arc<dyn EpisodeResolver>,
        audio_cache: Arc<AudioCache>,
        whisper_binary: Option<String>,
        prefer_existing: bool,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent("backplane-transcription/1.0 (+audio)")
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client configuration is always valid");

        Self {
            db,
            job_service,
            episode_resolver,
            audio_cache,
            http_client,
            whisper_binary,
            prefer_existing,
        }
    }

    async fn run(&self, job: &Job) -> Result<(), ProcessorError> {
        let episode_id = job.payload_i64("episode_id")?;
        self.job_service.update_progress(job.id, 5).await.map_err(to_other)?;

        let episode = self
            .episode_resolver
            .resolve(episode_id)
            .await
            .map_err(to_other)?;

        self.job_service.update_progress(job.id, 10).await.map_err(to_other)?;

        if self.prefer_existing {
            if let Some(transcript_url) = &episode.transcript_url {
                if let Ok((text, format)) = self.fetch_existing(transcript_url).await {
                    self.job_service.update_progress(job.id, 85).await.map_err(to_other)?;
                    transcriptions::upsert(&self.db, episode_id, &text, format, TranscriptSource::Fetched)
                        .await
                        .map_err(to_other)?;
                    return Ok(());
                }
            }
        }

        self.job_service.update_progress(job.id, 50).await.map_err(to_other)?;

        let cache_entry = self
            .audio_cache
            .get_or_download(episode_id, &episode.audio_url)
            .await?;

        let text = self
            .transcribe_with_whisper(std::path::Path::new(&cache_entry.file_path))
            .await?;

        self.job_service.update_progress(job.id, 85).await.map_err(to_other)?;

        transcriptions::upsert(&self.db, episode_id, &text, TranscriptFormat::Text, TranscriptSource::Generated)
            .await
            .map_err(to_other)?;

        Ok(())
    }

    async fn fetch_existing(
        &self,
        url: &str,
    ) -> Result<(String, TranscriptFormat), StructuredError> {
        let response = self.http_client.get(url).send().await.map_err(|e| {
            StructuredError::download("transcript_fetch_failed", format!("fetching {}: {}", url, e))
        })?;

        if let Some(len) = response.content_length() {
            if len > MAX_TRANSCRIPT_BYTES {
                return Err(StructuredError::invalid_payload(
                    "oversize_transcript",
                    format!("transcript at {} exceeds max size", url),
                ));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.text().await.map_err(|e| {
            StructuredError::download("transcript_fetch_failed", format!("reading body of {}: {}", url, e))
        })?;

        if body.len() as u64 > MAX_TRANSCRIPT_BYTES {
            return Err(StructuredError::invalid_payload(
                "oversize_transcript",
                format!("transcript at {} exceeds max size", url),
            ));
        }

        let format = TranscriptFormat::sniff(url, content_type.as_deref(), &body);
        Ok((body, format))
    }

    /// Invokes the configured speech-to-text binary, or falls back to a fixed
    /// placeholder transcript when no binary is configured (local dev / tests
    /// without a real speech model installed).
    async fn transcribe_with_whisper(&self, audio_path: &std::path::Path) -> Result<String, ProcessorError> {
        let Some(binary) = &self.whisper_binary else {
            return Ok(format!(
                "[transcription unavailable: no speech-to-text binary configured for {}]",
                audio_path.display()
            ));
        };

        let output = tokio::time::timeout(
            SPEECH_TO_TEXT_TIMEOUT,
            Command::new(binary)
                .arg(audio_path)
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| {
            ProcessorError::Structured(StructuredError::processing(
                "speech_to_text_timeout",
                format!("{} did not finish within {:?}", binary, SPEECH_TO_TEXT_TIMEOUT),
            ))
        })?
        .map_err(|e| {
            ProcessorError::Structured(StructuredError::processing(
                "speech_to_text_spawn_failed",
                format!("{} failed to start: {}", binary, e),
            ))
        })?;

        if !output.status.success() {
            return Err(ProcessorError::Structured(StructuredError::processing(
                "speech_to_text_nonzero_exit",
                format!(
                    "{} exited with {}: {}",
                    binary,
                    output.status,
                    String::from_utf8_lossy(&output.stderr)
                ),
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn to_other(e: backplane_common::Error) -> ProcessorError {
    ProcessorError::Other(e)
}

#[async_trait]
impl JobProcessor for TranscriptionProcessor {
    fn can_process(&self, job_type: JobType) -> bool {
        job_type == JobType::Transcription
    }

    async fn process(&self, _ctx: CancellationToken, job: Job) -> Result<(), ProcessorError> {
        self.run(&job).await?;
        self.job_service
            .complete(job.id, Some([("status".to_string(), json!("transcribed"))].into_iter().collect()))
            .await
            .map_err(to_other)?;
        Ok(())
    }
}
