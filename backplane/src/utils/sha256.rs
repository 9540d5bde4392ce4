//! Streaming SHA-256 hashing, used by the audio cache to content-address downloads.
//!
//! Ported from the hash-deduplication pattern: read in fixed-size chunks on a blocking
//! thread so a multi-hundred-megabyte audio file doesn't block the async runtime.

use backplane_common::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const CHUNK_SIZE: usize = 1024 * 1024;

/// Compute the hex-encoded SHA-256 digest of a file's contents.
pub async fn hash_file(path: &Path) -> Result<String> {
    let path_buf: PathBuf = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<String> {
        use std::fs::File;
        use std::io::Read;

        let mut file = File::open(&path_buf).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to open {} for hashing: {}", path_buf.display(), e),
            ))
        })?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];

        loop {
            let bytes_read = file.read(&mut buffer).map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to read {} for hashing: {}", path_buf.display(), e),
                ))
            })?;

            if bytes_read == 0 {
                break;
            }

            hasher.update(&buffer[..bytes_read]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| Error::Internal(format!("hash task failed: {}", e)))?
}

/// First 8 hex characters of a SHA-256 digest, used in blob filenames (`<id>_<sha8>.<ext>`).
pub fn short_hash(full_hash: &str) -> &str {
    &full_hash[..full_hash.len().min(8)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn hash_file_matches_known_digest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();
        file.flush().unwrap();

        let hash = hash_file(file.path()).await.unwrap();
        let expected = format!("{:x}", Sha256::digest(b"test content"));
        assert_eq!(hash, expected);
        assert_eq!(hash.len(), 64);
    }

    #[test]
    fn short_hash_truncates_to_eight_chars() {
        let full = "a".repeat(64);
        assert_eq!(short_hash(&full).len(), 8);
    }
}
