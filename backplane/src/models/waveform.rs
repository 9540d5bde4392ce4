//! Precomputed waveform peak data for episode scrubbing UIs.

use serde::{Deserialize, Serialize};

/// Downsampled min/max peak pairs for one episode, one row per resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveformData {
    pub podcast_episode_id: i64,
    pub resolution: i32,
    pub peaks: Vec<(f32, f32)>,
    pub duration_seconds: f64,
}

impl WaveformData {
    /// Flattens peaks into the `[min0, max0, min1, max1, ...]` layout the JSON wire
    /// format and waveform image renderers both expect.
    pub fn flattened(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.peaks.len() * 2);
        for (min, max) in &self.peaks {
            out.push(*min);
            out.push(*max);
        }
        out
    }

    pub fn sample_count(&self) -> usize {
        self.peaks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattened_interleaves_min_and_max() {
        let waveform = WaveformData {
            podcast_episode_id: 1,
            resolution: 1000,
            peaks: vec![(-0.5, 0.5), (-0.2, 0.8)],
            duration_seconds: 120.0,
        };
        assert_eq!(waveform.flattened(), vec![-0.5, 0.5, -0.2, 0.8]);
        assert_eq!(waveform.sample_count(), 2);
    }
}
