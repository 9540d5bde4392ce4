//! backplaned — the media processing backplane service binary.
//!
//! Resolves configuration, opens the job database, wires the audio cache, blob
//! store, media tool, episode resolver, and job processors, then runs the worker
//! pool alongside a thin `/health` + `/events` observability router until asked
//! to shut down.

use anyhow::{Context, Result};
use backplane::services::{
    AudioCache, ClipExtractionProcessor, Downloader, FfmpegMediaTool, FilesystemBlobStore,
    HttpEpisodeResolver, JobProcessor, JobService, TranscriptionProcessor, WaveformProcessor,
    WorkerPool,
};
use backplane::{build_router, db, AppState};
use backplane_common::config::{BackplaneConfig, CliOverrides};
use backplane_common::EventBus;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "backplaned")]
#[command(about = "Media processing backplane: job queue, worker pool, audio pipelines")]
#[command(version)]
struct Args {
    /// Path to a TOML config file. Falls back to the per-OS default config path.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (overrides config file / environment / default).
    #[arg(short, long)]
    db_path: Option<PathBuf>,

    /// Blob storage root (overrides config file / environment / default).
    #[arg(short, long)]
    blob_root: Option<PathBuf>,

    /// Number of worker pool pollers.
    #[arg(short, long)]
    worker_count: Option<usize>,

    /// Poller interval in milliseconds.
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Address to bind the observability router to.
    #[arg(long, default_value = "127.0.0.1:5730")]
    listen_addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting backplaned v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let toml_path = args
        .config
        .clone()
        .or_else(backplane_common::config::default_config_path);

    let config = BackplaneConfig::resolve(
        CliOverrides {
            db_path: args.db_path.map(|p| p.to_string_lossy().into_owned()),
            blob_root: args.blob_root.map(|p| p.to_string_lossy().into_owned()),
            worker_count: args.worker_count,
            poll_interval_ms: args.poll_interval_ms,
        },
        toml_path.as_deref(),
    )
    .context("failed to resolve configuration")?;

    info!(db_path = %config.db_path.display(), blob_root = %config.blob_root.display(), worker_count = config.worker_count, "configuration resolved");

    let pool = db::init_database_pool(&config.db_path)
        .await
        .context("failed to open job database")?;
    info!("database connection established");

    let event_bus = EventBus::new(256);
    let job_service = JobService::new(pool.clone(), event_bus.clone());

    let blob_store: Arc<dyn backplane::services::BlobStore> =
        Arc::new(FilesystemBlobStore::new(config.blob_root.clone()));
    let media_tool: Arc<dyn backplane::services::MediaTool> =
        Arc::new(FfmpegMediaTool::new(config.ffmpeg_path.clone(), config.ffprobe_path.clone()));
    let temp_dir = std::env::temp_dir().join("backplane");
    let downloader = Arc::new(Downloader::new(
        temp_dir.clone(),
        config.download_max_bytes,
        config.download_timeout,
        &config.user_agent,
    ));
    let audio_cache = Arc::new(AudioCache::new(
        pool.clone(),
        blob_store.clone(),
        downloader,
        media_tool.clone(),
    ));

    let episode_resolver: Arc<dyn backplane::services::EpisodeResolver> =
        match &config.episode_metadata_base_url {
            Some(base_url) => Arc::new(HttpEpisodeResolver::new(base_url.clone())),
            None => {
                tracing::warn!(
                    "no episode_metadata_base_url configured; episode-driven jobs (waveform, \
                     transcription, clip extraction against uncached episodes) will fail with \
                     not_found until one is set"
                );
                Arc::new(HttpEpisodeResolver::new(""))
            }
        };

    let processors: Vec<Arc<dyn JobProcessor>> = vec![
        Arc::new(WaveformProcessor::new(
            pool.clone(),
            job_service.clone(),
            episode_resolver.clone(),
            audio_cache.clone(),
            media_tool.clone(),
            temp_dir.clone(),
        )),
        Arc::new(TranscriptionProcessor::new(
            pool.clone(),
            job_service.clone(),
            episode_resolver.clone(),
            audio_cache.clone(),
            config.whisper_path.clone(),
            true,
        )),
        Arc::new(ClipExtractionProcessor::new(
            pool.clone(),
            job_service.clone(),
            blob_store.clone(),
            media_tool.clone(),
            audio_cache.clone(),
            episode_resolver.clone(),
            temp_dir.clone(),
        )),
    ];

    let mut worker_pool = WorkerPool::new(
        job_service.clone(),
        processors,
        config.worker_count,
        config.poll_interval,
    );
    worker_pool
        .start()
        .context("worker pool failed to start")?;
    info!(worker_count = config.worker_count, "worker pool started");

    let retention_task = spawn_retention_sweep(job_service.clone(), audio_cache.clone(), &config);

    let state = AppState::new(pool, event_bus);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&args.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", args.listen_addr))?;
    info!(addr = %args.listen_addr, "observability router listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("observability server exited with an error")?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    retention_task.abort();
    worker_pool.stop().await;
    info!("backplaned stopped");
    Ok(())
}

/// Periodically deletes terminal jobs and stale cache entries past their
/// configured retention windows, per SPEC_FULL.md's retention-sweep addition.
fn spawn_retention_sweep(
    job_service: JobService,
    audio_cache: Arc<AudioCache>,
    config: &BackplaneConfig,
) -> tokio::task::JoinHandle<()> {
    let job_retention_days = config.job_retention_days;
    let cache_retention_days = config.cache_retention_days;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(24 * 60 * 60));
        loop {
            interval.tick().await;
            match job_service.cleanup(job_retention_days).await {
                Ok(removed) => info!(removed, "job retention sweep completed"),
                Err(e) => tracing::warn!(error = %e, "job retention sweep failed"),
            }
            match audio_cache.cleanup_old(cache_retention_days).await {
                Ok(removed) => info!(removed, "audio cache retention sweep completed"),
                Err(e) => tracing::warn!(error = %e, "audio cache retention sweep failed"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
