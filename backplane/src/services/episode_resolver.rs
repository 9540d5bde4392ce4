//! Read-only access to episode metadata owned by another service.

use async_trait::async_trait;
use backplane_common::{Error, Result};
use serde::Deserialize;

/// What a clip or cache lookup needs to know about an episode, independent of
/// whichever catalog service actually stores it.
#[derive(Debug, Clone)]
pub struct EpisodeInfo {
    pub episode_id: i64,
    pub audio_url: String,
    pub transcript_url: Option<String>,
}

/// Boundary to the episode catalog. Implementations live outside this crate; tests
/// use an in-memory double.
#[async_trait]
pub trait EpisodeResolver: Send + Sync {
    async fn resolve(&self, episode_id: i64) -> Result<EpisodeInfo>;
}

#[derive(Debug, Deserialize)]
struct EpisodeMetadataResponse {
    audio_url: String,
    #[serde(default)]
    transcript_url: Option<String>,
}

/// Thin JSON-over-HTTP boundary implementation: `GET {base_url}/episodes/{id}` is
/// expected to return `{"audio_url": "...", "transcript_url": "..."}`. This is
/// deliberately not a full podcast-index client — no search, pagination, or
/// provider-specific schema — just enough to let the binary resolve an episode id
/// without every deployment having to write its own `EpisodeResolver`.
pub struct HttpEpisodeResolver {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEpisodeResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn episode_url(&self, episode_id: i64) -> String {
        format!("{}/episodes/{}", self.base_url.trim_end_matches('/'), episode_id)
    }
}

#[async_trait]
impl EpisodeResolver for HttpEpisodeResolver {
    async fn resolve(&self, episode_id: i64) -> Result<EpisodeInfo> {
        let url = self.episode_url(episode_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::NotFound(format!("episode metadata lookup {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::NotFound(format!(
                "episode {} metadata lookup returned {}",
                episode_id,
                response.status()
            )));
        }

        let body: EpisodeMetadataResponse = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("malformed episode metadata response: {}", e)))?;

        Ok(EpisodeInfo {
            episode_id,
            audio_url: body.audio_url,
            transcript_url: body.transcript_url,
        })
    }
}

#[cfg(test)]
mod http_resolver_tests {
    use super::*;

    #[test]
    fn episode_url_joins_base_and_id_without_double_slash() {
        let resolver = HttpEpisodeResolver::new("https://catalog.internal/");
        assert_eq!(resolver.episode_url(42), "https://catalog.internal/episodes/42");
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct MockEpisodeResolver {
        episodes: Mutex<HashMap<i64, EpisodeInfo>>,
    }

    impl MockEpisodeResolver {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn insert(&self, info: EpisodeInfo) {
            self.episodes.lock().await.insert(info.episode_id, info);
        }
    }

    #[async_trait]
    impl EpisodeResolver for MockEpisodeResolver {
        async fn resolve(&self, episode_id: i64) -> Result<EpisodeInfo> {
            self.episodes
                .lock()
                .await
                .get(&episode_id)
                .cloned()
                .ok_or_else(|| {
                    backplane_common::Error::NotFound(format!("episode {} not known", episode_id))
                })
        }
    }
}
