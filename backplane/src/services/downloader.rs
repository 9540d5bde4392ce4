//! Streams a remote audio URL to a temp file with a size cap, content-type gate,
//! spoofed user-agent, and bounded retry on hotlink-protection responses.

use backplane_common::{ErrorKind, StructuredError};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub path: PathBuf,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Many podcast hosts gate hotlinking on `Referer` matching their own origin; sending
/// the scheme+host of the URL we're fetching satisfies that check without tracking
/// down the page that actually embeds the episode.
fn referer_for(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => format!("{}://{}/", parsed.scheme(), parsed.host_str().unwrap_or("")),
        Err(_) => url.to_string(),
    }
}

pub struct Downloader {
    client: reqwest::Client,
    temp_dir: PathBuf,
    max_bytes: u64,
    timeout: Duration,
}

impl Downloader {
    pub fn new(temp_dir: PathBuf, max_bytes: u64, timeout: Duration, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is always valid");

        Self {
            client,
            temp_dir,
            max_bytes,
            timeout,
        }
    }

    fn guess_extension(url: &str, content_type: Option<&str>) -> &'static str {
        if url.ends_with(".mp3") {
            return "mp3";
        }
        if url.ends_with(".wav") {
            return "wav";
        }
        if url.ends_with(".m4a") {
            return "m4a";
        }
        match content_type {
            Some(ct) if ct.contains("wav") => "wav",
            Some(ct) if ct.contains("mp4") || ct.contains("m4a") => "m4a",
            _ => "mp3",
        }
    }

    /// Download `url` to a uniquely-named temp file, classifying failures so the
    /// caller's job processor can route retries.
    pub async fn download_to_temp(
        &self,
        url: &str,
        episode_id: i64,
    ) -> Result<DownloadResult, StructuredError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "audio/*,*/*;q=0.8")
            .header(reqwest::header::REFERER, referer_for(url))
            .send()
            .await
            .map_err(|e| {
                StructuredError::download("transport_error", format!("request to {} failed: {}", url, e))
            })?;

        let status = response.status();
        if status.as_u16() == 403 {
            return Err(StructuredError::new(
                ErrorKind::Download,
                "hotlink_blocked",
                format!("HTTP 403 fetching {}", url),
            ));
        }
        if !(status.as_u16() == 200 || status.as_u16() == 206) {
            return Err(StructuredError::download(
                "transport_error",
                format!("unexpected status {} fetching {}", status, url),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let is_audio = content_type
            .as_deref()
            .map(|ct| ct.starts_with("audio/") || ct == "application/octet-stream")
            .unwrap_or(true);
        if !is_audio {
            return Err(StructuredError::invalid_payload(
                "unsupported_content_type",
                format!("content-type {:?} is not audio", content_type),
            ));
        }

        let content_length = response.content_length();
        if let Some(len) = content_length {
            if len > self.max_bytes {
                return Err(StructuredError::invalid_payload(
                    "oversize_download",
                    format!("content-length {} exceeds max {}", len, self.max_bytes),
                ));
            }
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let ext = Self::guess_extension(url, content_type.as_deref());
        let dest = self
            .temp_dir
            .join(format!("dl_{}_{}.{}", episode_id, uuid::Uuid::new_v4(), ext));
        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|e| StructuredError::system("temp_dir_create_failed", e.to_string()))?;

        let mut file = tokio::fs::File::create(&dest)
            .await
            .map_err(|e| StructuredError::system("temp_file_create_failed", e.to_string()))?;

        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                StructuredError::download("transport_error", format!("stream error: {}", e))
            })?;
            written += chunk.len() as u64;
            if written > self.max_bytes {
                let _ = tokio::fs::remove_file(&dest).await;
                return Err(StructuredError::invalid_payload(
                    "oversize_download",
                    format!("download exceeded max {} bytes", self.max_bytes),
                ));
            }
            file.write_all(&chunk).await.map_err(|e| {
                StructuredError::system("temp_file_write_failed", e.to_string())
            })?;
        }

        Ok(DownloadResult {
            path: dest,
            content_type,
            content_length: content_length.or(Some(written)),
            etag,
            last_modified,
        })
    }

    /// Retries only `hotlink_blocked` failures, up to 3 times, waiting
    /// approximately `2 * attempt` seconds between attempts.
    pub async fn download_with_retry(
        &self,
        url: &str,
        episode_id: i64,
    ) -> Result<DownloadResult, StructuredError> {
        let mut attempt = 0;
        loop {
            match self.download_to_temp(url, episode_id).await {
                Ok(result) => return Ok(result),
                Err(err) if err.code == "hotlink_blocked" && attempt < 3 => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_secs(2 * attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
