//! Turns episode audio into a fixed-resolution peak array for scrubbing UIs.

use crate::db::waveforms;
use crate::models::job::{Job, JobType};
use crate::models::waveform::WaveformData;
use crate::services::audio_cache::AudioCache;
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
use tokio_util::sync::CancellationToken;

const DEFAULT_RESOLUTION: usize = 300;
const PEAK_SAMPLE_RATE: u32 = 44_100;

pub struct WaveformProcessor {
    db: SqlitePool,
    job_service: JobService,
    episode_resolver: Arc<dyn EpisodeResolver>,
    audio_cache: Arc<AudioCache>,
    media_tool: Arc<dyn MediaTool>,
    temp_dir: std::path::PathBuf,
}

impl WaveformProcessor {
    pub fn new(
        db: SqlitePool,
        job_service: JobService,
        episode_resolver: Arc<dyn EpisodeResolver>,
        audio_cache: Arc<AudioCache>,
        media_tool: Arc<dyn MediaTool>,
        temp_dir: std::path::PathBuf,
    ) -> Self {
        Self {
            db,
            job_service,
            episode_resolver,
            audio_cache,
            media_tool,
            temp_dir,
        }
    }

    async fn run(&self, job: &Job) -> Result<WaveformData, ProcessorError> {
        let episode_id = job.payload_i64("episode_id")?;
        self.job_service.update_progress(job.id, 5).await.map_err(to_other)?;

        if let Some(existing) = waveforms::find(&self.db, episode_id).await.map_err(to_other)? {
            return Ok(existing);
        }

        let episode = self
            .episode_resolver
            .resolve(episode_id)
            .await
            .map_err(to_other)?;

        self.job_service.update_progress(job.id, 10).await.map_err(to_other)?;

        let cache_entry = self
            .audio_cache
            .get_or_download(episode_id, &episode.audio_url)
            .await?;

        self.job_service.update_progress(job.id, 50).await.map_err(to_other)?;

        let raw_path = self
            .temp_dir
            .join(format!("waveform_{}_{}.raw", episode_id, uuid::Uuid::new_v4()));

        let result = self
            .extract_peaks(Path::new(&cache_entry.file_path), &raw_path, DEFAULT_RESOLUTION)
            .await;

        let _ = tokio::fs::remove_file(&raw_path).await;
        let peaks = result?;

        self.job_service.update_progress(job.id, 85).await.map_err(to_other)?;

        let duration = cache_entry.duration_seconds.unwrap_or(0.0);
        let waveform = WaveformData {
            podcast_episode_id: episode_id,
            resolution: peaks.len() as i32,
            peaks,
            duration_seconds: duration,
        };

        waveforms::upsert(&self.db, &waveform, PEAK_SAMPLE_RATE as i32)
            .await
            .map_err(to_other)?;

        Ok(waveform)
    }

    async fn extract_peaks(
        &self,
        src: &Path,
        raw_dst: &Path,
        resolution: usize,
    ) -> Result<Vec<(f32, f32)>, ProcessorError> {
        self.media_tool
            .transcode_to_raw_f32(src, raw_dst, PEAK_SAMPLE_RATE)
            .await?;

        let bytes = tokio::fs::read(raw_dst).await.map_err(|e| {
            ProcessorError::Structured(StructuredError::system(
                "read_raw_pcm_failed",
                e.to_string(),
            ))
        })?;

        Ok(compute_peaks(&bytes, resolution))
    }
}

/// First pass records each window's peak absolute amplitude and the global max;
/// second pass normalizes every window peak by the global max into `[0, 1]`.
fn compute_peaks(raw_pcm: &[u8], resolution: usize) -> Vec<(f32, f32)> {
    let total_samples = raw_pcm.len() / 4;
    if total_samples == 0 || resolution == 0 {
        return vec![(0.0, 0.0); resolution];
    }

    let samples_per_peak = (total_samples / resolution).max(1);
    let mut window_peaks = Vec::with_capacity(resolution);
    let mut global_max: f32 = 0.0;

    for window in 0..resolution {
        let start = window * samples_per_peak;
        if start >= total_samples {
            window_peaks.push(0.0);
            continue;
        }
        let end = (start + samples_per_peak).min(total_samples);
        let mut peak: f32 = 0.0;
        for sample_index in start..end {
            let offset = sample_index * 4;
            let value = f32::from_le_bytes(raw_pcm[offset..offset + 4].try_into().unwrap());
            peak = peak.max(value.abs());
        }
        global_max = global_max.max(peak);
        window_peaks.push(peak);
    }

    if global_max == 0.0 {
        return vec![(0.0, 0.0); resolution];
    }

    window_peaks
        .into_iter()
        .map(|peak| {
            let normalized = peak / global_max;
            (-normalized, normalized)
        })
        .collect()
}

fn to_other(e: backplane_common::Error) -> ProcessorError {
    ProcessorError::Other(e)
}

#[async_trait]
impl JobProcessor for WaveformProcessor {
    fn can_process(&self, job_type: JobType) -> bool {
        job_type == JobType::Waveform
    }

    async fn process(&self, _ctx: CancellationToken, job: Job) -> Result<(), ProcessorError> {
        let waveform = self.run(&job).await?;
        self.job_service
            .complete(
                job.id,
                Some(
                    [(
                        "peaks_count".to_string(),
                        json!(waveform.peaks.len()),
                    )]
                    .into_iter()
                    .collect(),
                ),
            )
            .await
            .map_err(to_other)?;
        Ok(())
    }
}
