//! Transient volume-spike intervals produced by volume analysis.

use serde::{Deserialize, Serialize};

/// A time interval whose volume exceeds an adaptive threshold, with the peak level
/// observed inside it. Never persisted on its own — each surviving spike is turned
/// into an unapproved clip by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpike {
    pub start: f64,
    pub end: f64,
    pub peak_db: f64,
}

impl VolumeSpike {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn overlaps_or_adjacent(&self, other: &VolumeSpike, gap_tolerance: f64) -> bool {
        other.start - self.end <= gap_tolerance
    }

    pub fn merged_with(&self, other: &VolumeSpike) -> VolumeSpike {
        VolumeSpike {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            peak_db: self.peak_db.max(other.peak_db),
        }
    }
}

/// Per-5-second-segment mean/max volume readings, the raw input to spike detection.
#[derive(Debug, Clone, Copy)]
pub struct SegmentVolume {
    pub start: f64,
    pub end: f64,
    pub mean_db: f64,
    pub max_db: f64,
}
