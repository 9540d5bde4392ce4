//! Database access for the backplane.

pub mod audio_cache;
pub mod clips;
pub mod jobs;
pub mod schema;
pub mod transcriptions;
pub mod waveforms;

use backplane_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open (creating if necessary) the backplane's SQLite database and run schema setup.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!(url = %db_url, "opening backplane database");

    let pool = SqlitePool::connect(&db_url).await?;
    schema::initialize_schema(&pool).await?;

    Ok(pool)
}
