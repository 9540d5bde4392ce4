//! Content-addressed audio cache entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A downloaded-and-decoded episode audio file, deduplicated by content hash.
///
/// The cache key callers look up by (episode id, or source URL) may differ across
/// entries that end up pointing at the same `content_hash` and `file_path` once two
/// episodes happen to share identical audio. Original and processed metadata are
/// tracked as separate fields throughout (`content_hash`/`original_size` for the
/// downloaded bytes, `processed_sha256`/`file_size_bytes` for the transcoded ones)
/// so a dedup insert can copy a prior entry's fields verbatim without conflating
/// the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioCacheEntry {
    pub id: i64,
    pub podcast_episode_id: i64,
    pub source_url: String,
    pub content_hash: String,
    pub original_path: String,
    pub original_size: i64,
    pub file_path: String,
    pub file_size_bytes: i64,
    pub processed_sha256: Option<String>,
    pub duration_seconds: Option<f64>,
    pub sample_rate: Option<i32>,
    pub channels: Option<i32>,
    pub last_accessed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl AudioCacheEntry {
    pub fn short_hash(&self) -> &str {
        &self.content_hash[..self.content_hash.len().min(8)]
    }
}

/// Aggregate counters returned by `AudioCache::stats`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AudioCacheStats {
    pub entry_count: i64,
    pub distinct_content_hashes: i64,
    pub total_bytes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hash_is_first_eight_chars_of_content_hash() {
        let entry = AudioCacheEntry {
            id: 1,
            podcast_episode_id: 1,
            source_url: "https://example.com/ep1.mp3".to_string(),
            content_hash: "abcdef0123456789".repeat(4),
            original_path: "/data/blobs/original/1_abcdef01.mp3".to_string(),
            original_size: 2048,
            file_path: "/data/blobs/ab/abcdef01.mp3".to_string(),
            file_size_bytes: 1024,
            processed_sha256: Some("fedcba9876543210".repeat(4)),
            duration_seconds: Some(300.0),
            sample_rate: Some(44100),
            channels: Some(2),
            last_accessed_at: Utc::now(),
            created_at: Utc::now(),
        };
        assert_eq!(entry.short_hash(), "abcdef01");
    }
}
