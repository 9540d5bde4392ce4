//! Configuration loading.
//!
//! A single immutable [`BackplaneConfig`] is assembled once at startup and passed to
//! every component's constructor instead of being re-read from globals. Resolution
//! follows a CLI > env > TOML > compiled-default ladder.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// On-disk TOML representation. Every field is optional; missing fields fall through
/// to environment variables and then compiled defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub db_path: Option<String>,
    pub blob_root: Option<String>,
    pub worker_count: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub download_max_bytes: Option<u64>,
    pub download_timeout_secs: Option<u64>,
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
    pub whisper_path: Option<String>,
    pub whisper_model_path: Option<String>,
    pub default_max_retries: Option<u32>,
    pub cache_retention_days: Option<i64>,
    pub job_retention_days: Option<i64>,
    pub episode_metadata_base_url: Option<String>,
}

/// Fully resolved, immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct BackplaneConfig {
    pub db_path: PathBuf,
    pub blob_root: PathBuf,
    pub worker_count: usize,
    pub poll_interval: std::time::Duration,
    pub download_max_bytes: u64,
    pub download_timeout: std::time::Duration,
    pub user_agent: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub whisper_path: Option<String>,
    pub whisper_model_path: Option<String>,
    pub default_max_retries: u32,
    pub cache_retention_days: i64,
    pub job_retention_days: i64,
    /// Base URL of the episode-metadata catalog, e.g. `https://catalog.internal`.
    /// Consumed only by the binary's composition root, which uses it to build the
    /// one concrete `EpisodeResolver` this crate bundles; the trait itself has no
    /// opinion on how an episode is resolved.
    pub episode_metadata_base_url: Option<String>,
}

/// CLI overrides, one field per flag. All optional; `None` defers to env/TOML/default.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub db_path: Option<String>,
    pub blob_root: Option<String>,
    pub worker_count: Option<usize>,
    pub poll_interval_ms: Option<u64>,
}

const DEFAULT_WORKER_COUNT: usize = 4;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_DOWNLOAD_MAX_BYTES: u64 = 500 * 1024 * 1024;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_CACHE_RETENTION_DAYS: i64 = 90;
const DEFAULT_JOB_RETENTION_DAYS: i64 = 30;

impl BackplaneConfig {
    /// Resolve configuration: CLI > environment > TOML file > compiled default.
    pub fn resolve(cli: CliOverrides, toml_path: Option<&Path>) -> Result<Self> {
        let toml_config = match toml_path {
            Some(path) if path.exists() => load_toml_config(path)?,
            _ => TomlConfig::default(),
        };

        let db_path = cli
            .db_path
            .or_else(|| std::env::var("BACKPLANE_DB_PATH").ok())
            .or(toml_config.db_path.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir().join("backplane.db"));

        let blob_root = cli
            .blob_root
            .or_else(|| std::env::var("BACKPLANE_BLOB_ROOT").ok())
            .or(toml_config.blob_root.clone())
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir().join("blobs"));

        let worker_count = cli
            .worker_count
            .or_else(|| env_parse("BACKPLANE_WORKER_COUNT"))
            .or(toml_config.worker_count)
            .unwrap_or(DEFAULT_WORKER_COUNT);

        let poll_interval_ms = cli
            .poll_interval_ms
            .or_else(|| env_parse("BACKPLANE_POLL_INTERVAL_MS"))
            .or(toml_config.poll_interval_ms)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        let download_max_bytes = env_parse("BACKPLANE_DOWNLOAD_MAX_BYTES")
            .or(toml_config.download_max_bytes)
            .unwrap_or(DEFAULT_DOWNLOAD_MAX_BYTES);

        let download_timeout_secs = env_parse("BACKPLANE_DOWNLOAD_TIMEOUT_SECS")
            .or(toml_config.download_timeout_secs)
            .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS);

        let ffmpeg_path = std::env::var("BACKPLANE_FFMPEG_PATH")
            .ok()
            .or(toml_config.ffmpeg_path.clone())
            .unwrap_or_else(|| "ffmpeg".to_string());

        let ffprobe_path = std::env::var("BACKPLANE_FFPROBE_PATH")
            .ok()
            .or(toml_config.ffprobe_path.clone())
            .unwrap_or_else(|| "ffprobe".to_string());

        let whisper_path = std::env::var("BACKPLANE_WHISPER_PATH")
            .ok()
            .or(toml_config.whisper_path.clone());

        let whisper_model_path = std::env::var("BACKPLANE_WHISPER_MODEL_PATH")
            .ok()
            .or(toml_config.whisper_model_path.clone());

        let default_max_retries = env_parse("BACKPLANE_DEFAULT_MAX_RETRIES")
            .or(toml_config.default_max_retries)
            .unwrap_or(DEFAULT_MAX_RETRIES);

        let cache_retention_days = env_parse("BACKPLANE_CACHE_RETENTION_DAYS")
            .or(toml_config.cache_retention_days)
            .unwrap_or(DEFAULT_CACHE_RETENTION_DAYS);

        let job_retention_days = env_parse("BACKPLANE_JOB_RETENTION_DAYS")
            .or(toml_config.job_retention_days)
            .unwrap_or(DEFAULT_JOB_RETENTION_DAYS);

        let episode_metadata_base_url = std::env::var("BACKPLANE_EPISODE_METADATA_BASE_URL")
            .ok()
            .or(toml_config.episode_metadata_base_url.clone());

        Ok(Self {
            db_path,
            blob_root,
            worker_count,
            poll_interval: std::time::Duration::from_millis(poll_interval_ms),
            download_max_bytes,
            download_timeout: std::time::Duration::from_secs(download_timeout_secs),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            ffmpeg_path,
            ffprobe_path,
            whisper_path,
            whisper_model_path,
            default_max_retries,
            cache_retention_days,
            job_retention_days,
            episode_metadata_base_url,
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read TOML config {}: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse TOML config {}: {}", path.display(), e)))
}

/// Default per-OS TOML config file location, following the same ladder as the
/// teacher's `wkmp_common::config::load_config_file`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("backplane").join("backplane.toml"))
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("backplane"))
        .unwrap_or_else(|| PathBuf::from("./backplane_data"))
}
