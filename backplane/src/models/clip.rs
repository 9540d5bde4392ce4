//! Clip domain types: a labeled time range of an episode, its lifecycle status, and
//! the inputs/filters its service layer accepts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl ClipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClipStatus::Pending => "pending",
            ClipStatus::Processing => "processing",
            ClipStatus::Ready => "ready",
            ClipStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ClipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ClipStatus {
    type Err = backplane_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ClipStatus::Pending),
            "processing" => Ok(ClipStatus::Processing),
            "ready" => Ok(ClipStatus::Ready),
            "failed" => Ok(ClipStatus::Failed),
            other => Err(backplane_common::Error::Internal(format!(
                "unknown clip status in database row: {}",
                other
            ))),
        }
    }
}

/// Where a clip's audio ultimately comes from: a remote episode URL, or a path that
/// the audio cache already has on disk for this episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClipSource {
    CachedFile { path: String },
    RemoteUrl { url: String },
}

impl ClipSource {
    pub fn as_str(&self) -> &str {
        match self {
            ClipSource::CachedFile { path } => path,
            ClipSource::RemoteUrl { url } => url,
        }
    }
}

/// A labeled time range of an episode, materialized into a short mono WAV on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clip {
    pub uuid: Uuid,
    pub podcast_episode_id: i64,
    pub source_url: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub label: String,
    pub filename: String,
    pub status: ClipStatus,
    pub approved: bool,
    pub extracted: bool,
    pub label_method: String,
    pub clip_duration: Option<f64>,
    pub clip_size_bytes: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Clip {
    pub fn duration_requested(&self) -> f64 {
        self.end_seconds - self.start_seconds
    }
}

/// Input to `ClipService::create`.
#[derive(Debug, Clone)]
pub struct CreateClipParams {
    pub episode_id: i64,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub label: String,
    pub approved: bool,
    pub label_method: String,
}

impl CreateClipParams {
    pub fn validate(&self) -> Result<(), backplane_common::StructuredError> {
        if self.episode_id <= 0 {
            return Err(backplane_common::StructuredError::invalid_payload(
                "invalid_episode_id",
                "episode_id must be positive",
            ));
        }
        if self.end_seconds <= self.start_seconds {
            return Err(backplane_common::StructuredError::invalid_payload(
                "invalid_range",
                "end_seconds must be greater than start_seconds",
            ));
        }
        if self.label.trim().is_empty() {
            return Err(backplane_common::StructuredError::invalid_payload(
                "empty_label",
                "label must not be empty",
            ));
        }
        Ok(())
    }
}

/// Filters accepted by `ClipService::list`.
#[derive(Debug, Clone, Default)]
pub struct ClipFilters {
    pub episode_id: Option<i64>,
    pub label: Option<String>,
    pub status: Option<ClipStatus>,
    pub approved: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// One line of `manifest.jsonl`.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub file_path: String,
    pub label: String,
    pub duration: f64,
    pub source_url: String,
    pub original_start_time: f64,
    pub original_end_time: f64,
    pub uuid: String,
    pub created_at: String,
}
