//! Table definitions and indexes for the backplane's SQLite store.

use backplane_common::Result;
use sqlx::SqlitePool;

const CREATE_JOBS: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    type            TEXT NOT NULL,
    status          TEXT NOT NULL,
    payload         TEXT NOT NULL,
    priority        INTEGER NOT NULL DEFAULT 0,
    progress        INTEGER NOT NULL DEFAULT 0,
    retry_count     INTEGER NOT NULL DEFAULT 0,
    max_retries     INTEGER NOT NULL DEFAULT 3,
    worker_id       TEXT,
    unique_key      TEXT,
    created_at      TEXT NOT NULL,
    started_at      TEXT,
    completed_at    TEXT,
    last_failed_at  TEXT,
    result          TEXT,
    error_type      TEXT,
    error_code      TEXT,
    error_message   TEXT,
    error_details   TEXT,
    created_by      TEXT
)
"#;

const CREATE_JOBS_CLAIM_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs (status, priority DESC, created_at ASC)";

const CREATE_JOBS_UNIQUE_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_type_unique_key ON jobs (type, unique_key) WHERE unique_key IS NOT NULL AND status IN ('pending', 'processing', 'failed')";

const CREATE_AUDIO_CACHES: &str = r#"
CREATE TABLE IF NOT EXISTS audio_caches (
    id                          INTEGER PRIMARY KEY AUTOINCREMENT,
    podcast_index_episode_id   INTEGER NOT NULL,
    original_url                TEXT NOT NULL,
    original_path                TEXT NOT NULL,
    original_sha256              TEXT NOT NULL,
    original_size                INTEGER NOT NULL,
    processed_path                TEXT,
    processed_sha256              TEXT,
    processed_size                INTEGER,
    duration_seconds             REAL,
    sample_rate                  INTEGER,
    channels                    INTEGER,
    last_used_at                TEXT NOT NULL,
    created_at                  TEXT NOT NULL
)
"#;

const CREATE_AUDIO_CACHES_EPISODE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_audio_caches_episode ON audio_caches (podcast_index_episode_id)";

const CREATE_AUDIO_CACHES_SHA_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_audio_caches_sha ON audio_caches (original_sha256)";

const CREATE_CLIPS: &str = r#"
CREATE TABLE IF NOT EXISTS clips (
    uuid                        TEXT PRIMARY KEY,
    podcast_index_episode_id   INTEGER NOT NULL,
    source_episode_url          TEXT NOT NULL,
    original_start_time         REAL NOT NULL,
    original_end_time           REAL NOT NULL,
    label                       TEXT NOT NULL,
    clip_filename               TEXT,
    status                      TEXT NOT NULL,
    extracted                   INTEGER NOT NULL DEFAULT 0,
    approved                    INTEGER NOT NULL DEFAULT 0,
    label_method                TEXT NOT NULL,
    clip_duration                REAL,
    clip_size_bytes              INTEGER,
    error_message                TEXT,
    created_at                  TEXT NOT NULL,
    updated_at                  TEXT NOT NULL
)
"#;

const CREATE_CLIPS_EPISODE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_clips_episode ON clips (podcast_index_episode_id)";

const CREATE_CLIPS_LABEL_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_clips_label ON clips (label)";

const CREATE_WAVEFORMS: &str = r#"
CREATE TABLE IF NOT EXISTS waveforms (
    episode_id      INTEGER PRIMARY KEY,
    duration        REAL NOT NULL,
    resolution      INTEGER NOT NULL,
    sample_rate     INTEGER NOT NULL,
    peaks           BLOB NOT NULL
)
"#;

const CREATE_TRANSCRIPTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS transcriptions (
    episode_id      INTEGER PRIMARY KEY,
    text            TEXT NOT NULL,
    format          TEXT NOT NULL,
    source          TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
)
"#;

/// Create every table and index the backplane needs, idempotently.
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    sqlx::query(CREATE_JOBS).execute(pool).await?;
    sqlx::query(CREATE_JOBS_CLAIM_INDEX).execute(pool).await?;
    sqlx::query(CREATE_JOBS_UNIQUE_INDEX).execute(pool).await?;

    sqlx::query(CREATE_AUDIO_CACHES).execute(pool).await?;
    sqlx::query(CREATE_AUDIO_CACHES_EPISODE_INDEX)
        .execute(pool)
        .await?;
    sqlx::query(CREATE_AUDIO_CACHES_SHA_INDEX).execute(pool).await?;

    sqlx::query(CREATE_CLIPS).execute(pool).await?;
    sqlx::query(CREATE_CLIPS_EPISODE_INDEX).execute(pool).await?;
    sqlx::query(CREATE_CLIPS_LABEL_INDEX).execute(pool).await?;

    sqlx::query(CREATE_WAVEFORMS).execute(pool).await?;

    sqlx::query(CREATE_TRANSCRIPTIONS).execute(pool).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_initializes_on_fresh_in_memory_db() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        assert!(tables.contains(&"jobs".to_string()));
        assert!(tables.contains(&"audio_caches".to_string()));
        assert!(tables.contains(&"clips".to_string()));
        assert!(tables.contains(&"waveforms".to_string()));
    }

    #[tokio::test]
    async fn schema_initialization_is_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        initialize_schema(&pool).await.unwrap();
    }
}
