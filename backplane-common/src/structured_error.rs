//! Structured, classified errors surfaced by job processors.
//!
//! A processor never lets an external failure (network, media tool, codec) reach the
//! worker pool unclassified. It catches the error, buckets it into an [`ErrorKind`],
//! and returns a [`StructuredError`]. The worker pool maps that into
//! `JobStore::fail_with_details`; anything else (a bug, an unexpected panic payload)
//! falls back to plain `JobStore::fail`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The five-way classification used for retry routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network / hotlink failures talking to a remote audio source. Retryable.
    Download,
    /// Media tool / codec failures. Retryable with caution, terminal after max_retries.
    Processing,
    /// A referenced row or blob is missing when it was expected to exist. Not retryable.
    NotFound,
    /// Filesystem, database, or file-handle failures. Retryable.
    System,
    /// The job payload could not be parsed into the shape the processor expects.
    /// Not retryable.
    InvalidPayload,
}

impl ErrorKind {
    /// Whether a job failing with this kind should ever be retried.
    ///
    /// `NotFound` and `InvalidPayload` are permanent by construction: retrying them
    /// burns the retry budget on a failure mode that will never resolve itself.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::NotFound | ErrorKind::InvalidPayload)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Download => "download",
            ErrorKind::Processing => "processing",
            ErrorKind::NotFound => "not_found",
            ErrorKind::System => "system",
            ErrorKind::InvalidPayload => "invalid_payload",
        }
    }

    /// Parse a persisted `error_type` column value, falling back to `System` for any
    /// value written by a version that doesn't recognize it rather than failing to
    /// load the row at all.
    pub fn from_str_lossy(raw: &str) -> Self {
        match raw {
            "download" => ErrorKind::Download,
            "processing" => ErrorKind::Processing,
            "not_found" => ErrorKind::NotFound,
            "invalid_payload" => ErrorKind::InvalidPayload,
            _ => ErrorKind::System,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified failure attached to a job or clip row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub kind: ErrorKind,
    /// Short machine-stable code, e.g. `"hotlink_blocked"`, `"probe_failed"`.
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl StructuredError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn download(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Download, code, message)
    }

    pub fn processing(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Processing, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, code, message)
    }

    pub fn system(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::System, code, message)
    }

    pub fn invalid_payload(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPayload, code, message)
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.kind, self.code, self.message)
    }
}

impl std::error::Error for StructuredError {}

impl From<crate::Error> for StructuredError {
    /// Errors crossing from the plain db/IO error type are never retry-classified
    /// by the caller, so they fall back to `System` — still retryable, just not
    /// attributable to a specific external collaborator.
    fn from(e: crate::Error) -> Self {
        StructuredError::system("internal_error", e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_and_processing_are_retryable() {
        assert!(ErrorKind::Download.is_retryable());
        assert!(ErrorKind::Processing.is_retryable());
        assert!(ErrorKind::System.is_retryable());
    }

    #[test]
    fn not_found_and_invalid_payload_are_not_retryable() {
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::InvalidPayload.is_retryable());
    }

    #[test]
    fn display_includes_kind_and_code() {
        let err = StructuredError::download("hotlink_blocked", "HTTP 403");
        assert_eq!(err.to_string(), "[download/hotlink_blocked] HTTP 403");
    }

    #[test]
    fn from_str_lossy_falls_back_to_system_for_unknown_values() {
        assert_eq!(ErrorKind::from_str_lossy("download"), ErrorKind::Download);
        assert_eq!(ErrorKind::from_str_lossy("garbage"), ErrorKind::System);
    }
}
