//! Persisted transcript text for an episode, either fetched from a publisher-supplied
//! URL or generated locally via speech-to-text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptFormat {
    Vtt,
    Srt,
    Json,
    Text,
}

impl TranscriptFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            TranscriptFormat::Vtt => "vtt",
            TranscriptFormat::Srt => "srt",
            TranscriptFormat::Json => "json",
            TranscriptFormat::Text => "text",
        }
    }

    /// Sniffs format from extension first, then content-type, then content: a
    /// `WEBVTT` prefix means VTT, an arrow cue marker means VTT-or-SRT (folded into
    /// VTT since both are cue-timed text), a leading `{`/`[` means JSON, else text.
    pub fn sniff(url: &str, content_type: Option<&str>, body: &str) -> Self {
        let lower_url = url.to_ascii_lowercase();
        if lower_url.ends_with(".vtt") {
            return TranscriptFormat::Vtt;
        }
        if lower_url.ends_with(".srt") {
            return TranscriptFormat::Srt;
        }
        if lower_url.ends_with(".json") {
            return TranscriptFormat::Json;
        }
        if let Some(ct) = content_type {
            if ct.contains("vtt") {
                return TranscriptFormat::Vtt;
            }
            if ct.contains("json") {
                return TranscriptFormat::Json;
            }
        }
        let trimmed = body.trim_start();
        if trimmed.starts_with("WEBVTT") {
            return TranscriptFormat::Vtt;
        }
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            return TranscriptFormat::Json;
        }
        if body.contains("-->") {
            return TranscriptFormat::Vtt;
        }
        TranscriptFormat::Text
    }
}

impl fmt::Display for TranscriptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptSource {
    Fetched,
    Generated,
}

impl TranscriptSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TranscriptSource::Fetched => "fetched",
            TranscriptSource::Generated => "generated",
        }
    }
}

impl fmt::Display for TranscriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub podcast_episode_id: i64,
    pub text: String,
    pub format: TranscriptFormat,
    pub source: TranscriptSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
