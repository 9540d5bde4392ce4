//! Row storage for persisted transcript text.

use crate::models::transcription::{TranscriptFormat, TranscriptSource, Transcription};
use backplane_common::{Error, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

impl FromStr for TranscriptFormat {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "vtt" => Ok(TranscriptFormat::Vtt),
            "srt" => Ok(TranscriptFormat::Srt),
            "json" => Ok(TranscriptFormat::Json),
            "text" => Ok(TranscriptFormat::Text),
            other => Err(Error::Internal(format!("unknown transcript format: {}", other))),
        }
    }
}

impl FromStr for TranscriptSource {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fetched" => Ok(TranscriptSource::Fetched),
            "generated" => Ok(TranscriptSource::Generated),
            other => Err(Error::Internal(format!("unknown transcript source: {}", other))),
        }
    }
}

fn row_to_transcription(row: &sqlx::sqlite::SqliteRow) -> Result<Transcription> {
    let format_raw: String = row.try_get("format")?;
    let source_raw: String = row.try_get("source")?;
    Ok(Transcription {
        podcast_episode_id: row.try_get("episode_id")?,
        text: row.try_get("text")?,
        format: format_raw.parse()?,
        source: source_raw.parse()?,
        created_at: parse_ts(row.try_get("created_at")?)?,
        updated_at: parse_ts(row.try_get("updated_at")?)?,
    })
}

fn parse_ts(raw: String) -> Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("invalid timestamp in transcriptions row: {}", e)))
}

pub async fn find(pool: &SqlitePool, episode_id: i64) -> Result<Option<Transcription>> {
    let row = sqlx::query("SELECT * FROM transcriptions WHERE episode_id = ?")
        .bind(episode_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_transcription).transpose()
}

pub async fn upsert(
    pool: &SqlitePool,
    episode_id: i64,
    text: &str,
    format: TranscriptFormat,
    source: TranscriptSource,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO transcriptions (episode_id, text, format, source, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(episode_id) DO UPDATE SET
            text = excluded.text,
            format = excluded.format,
            source = excluded.source,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(episode_id)
    .bind(text)
    .bind(format.as_str())
    .bind(source.as_str())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::initialize_schema;

    #[tokio::test]
    async fn upsert_then_find_round_trip() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();

        upsert(&pool, 42, "hello world", TranscriptFormat::Text, TranscriptSource::Generated)
            .await
            .unwrap();

        let found = find(&pool, 42).await.unwrap().unwrap();
        assert_eq!(found.text, "hello world");
        assert_eq!(found.source, TranscriptSource::Generated);
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_transcript() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();

        upsert(&pool, 42, "draft", TranscriptFormat::Text, TranscriptSource::Generated)
            .await
            .unwrap();
        upsert(&pool, 42, "final cut", TranscriptFormat::Vtt, TranscriptSource::Fetched)
            .await
            .unwrap();

        let found = find(&pool, 42).await.unwrap().unwrap();
        assert_eq!(found.text, "final cut");
        assert_eq!(found.source, TranscriptSource::Fetched);
    }
}
