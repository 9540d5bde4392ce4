//! Long-lived service objects and job processors wired together in `main`.

pub mod audio_cache;
pub mod blob_store;
pub mod clip_extraction_processor;
pub mod clip_service;
pub mod downloader;
pub mod episode_resolver;
pub mod job_service;
pub mod media_tool;
pub mod transcription_processor;
pub mod volume_analyzer;
pub mod waveform_processor;
pub mod worker_pool;

pub use audio_cache::AudioCache;
pub use blob_store::{BlobStore, FilesystemBlobStore};
pub use clip_extraction_processor::ClipExtractionProcessor;
pub use clip_service::ClipService;
pub use downloader::Downloader;
pub use episode_resolver::{EpisodeResolver, HttpEpisodeResolver};
pub use job_service::JobService;
pub use media_tool::{FfmpegMediaTool, MediaTool};
pub use transcription_processor::TranscriptionProcessor;
pub use volume_analyzer::VolumeAnalyzer;
pub use waveform_processor::WaveformProcessor;
pub use worker_pool::{JobProcessor, ProcessorError, WorkerPool};
