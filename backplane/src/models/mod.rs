//! Domain types shared by the db and services layers.

pub mod audio_cache;
pub mod clip;
pub mod job;
pub mod transcription;
pub mod volume_spike;
pub mod waveform;

pub use audio_cache::{AudioCacheEntry, AudioCacheStats};
pub use clip::{Clip, ClipFilters, ClipSource, ClipStatus, CreateClipParams, ManifestEntry};
pub use job::{EnqueueOptions, Job, JobStatus, JobType};
pub use transcription::{TranscriptFormat, TranscriptSource, Transcription};
pub use volume_spike::{SegmentVolume, VolumeSpike};
pub use waveform::WaveformData;
