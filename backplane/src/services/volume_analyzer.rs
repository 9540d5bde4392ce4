//! Detects transient loudness spikes in an episode's processed audio, segment by
//! segment, for the episode-analysis flow to turn into unapproved clips.

use crate::models::volume_spike::{SegmentVolume, VolumeSpike};
use crate::services::media_tool::MediaTool;
use backplane_common::StructuredError;
use std::path::Path;
use std::sync::Arc;

const SEGMENT_SECONDS: f64 = 5.0;
const BASELINE_OFFSET_DB: f64 = 20.0;
const MAX_OFFSET_DB: f64 = 5.0;
const MERGE_GAP_SECONDS: f64 = 1.0;
const MIN_SPIKE_SECONDS: f64 = 5.0;

pub struct VolumeAnalyzer {
    media_tool: Arc<dyn MediaTool>,
}

impl VolumeAnalyzer {
    pub fn new(media_tool: Arc<dyn MediaTool>) -> Self {
        Self { media_tool }
    }

    pub async fn analyze(&self, audio_path: &Path) -> Result<Vec<VolumeSpike>, StructuredError> {
        let duration = self.media_tool.probe_duration(audio_path).await?;
        let segments = self.collect_segment_volumes(audio_path, duration).await?;

        if segments.is_empty() {
            return Ok(Vec::new());
        }

        let baseline = segments.iter().map(|s| s.mean_db).sum::<f64>() / segments.len() as f64;
        let threshold = baseline + BASELINE_OFFSET_DB;

        let raw_spikes: Vec<VolumeSpike> = segments
            .iter()
            .filter(|s| s.mean_db > threshold || s.max_db > threshold + MAX_OFFSET_DB)
            .map(|s| VolumeSpike {
                start: s.start,
                end: s.end,
                peak_db: s.max_db,
            })
            .collect();

        let merged = merge_adjacent(&raw_spikes, MERGE_GAP_SECONDS);
        Ok(merged
            .into_iter()
            .filter(|spike| spike.duration() >= MIN_SPIKE_SECONDS)
            .collect())
    }

    async fn collect_segment_volumes(
        &self,
        audio_path: &Path,
        duration: f64,
    ) -> Result<Vec<SegmentVolume>, StructuredError> {
        let mut segments = Vec::new();
        let mut start = 0.0;

        while start < duration {
            let segment_duration = (duration - start).min(SEGMENT_SECONDS);
            let end = start + segment_duration;

            let (mean_db, max_db) = match self
                .media_tool
                .segment_volume_stats(audio_path, start, segment_duration)
                .await
            {
                Ok(stats) => stats,
                Err(_) => self
                    .media_tool
                    .segment_volume_stats(audio_path, 0.0, duration)
                    .await?,
            };

            segments.push(SegmentVolume {
                start,
                end,
                mean_db,
                max_db,
            });
            start = end;
        }

        Ok(segments)
    }
}

/// Merges spikes whose gap to the next one is within `gap_tolerance`, extending the
/// end and taking the max peak, per spike §4.10 step 4.
fn merge_adjacent(spikes: &[VolumeSpike], gap_tolerance: f64) -> Vec<VolumeSpike> {
    let mut merged: Vec<VolumeSpike> = Vec::new();

    for spike in spikes {
        match merged.last_mut() {
            Some(last) if last.overlaps_or_adjacent(spike, gap_tolerance) => {
                *last = last.merged_with(spike);
            }
            _ => merged.push(*spike),
        }
    }

    merged
}
