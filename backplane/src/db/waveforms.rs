//! Row storage for precomputed waveform peaks.

use crate::models::waveform::WaveformData;
use backplane_common::{Error, Result};
use sqlx::{Row, SqlitePool};

fn encode_peaks(peaks: &[(f32, f32)]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(peaks.len() * 8);
    for (min, max) in peaks {
        buf.extend_from_slice(&min.to_le_bytes());
        buf.extend_from_slice(&max.to_le_bytes());
    }
    buf
}

fn decode_peaks(raw: &[u8]) -> Result<Vec<(f32, f32)>> {
    if raw.len() % 8 != 0 {
        return Err(Error::Internal(
            "waveform peaks blob length is not a multiple of 8 bytes".to_string(),
        ));
    }
    let mut peaks = Vec::with_capacity(raw.len() / 8);
    for chunk in raw.chunks_exact(8) {
        let min = f32::from_le_bytes(chunk[0..4].try_into().unwrap());
        let max = f32::from_le_bytes(chunk[4..8].try_into().unwrap());
        peaks.push((min, max));
    }
    Ok(peaks)
}

pub async fn find(pool: &SqlitePool, episode_id: i64) -> Result<Option<WaveformData>> {
    let row = sqlx::query("SELECT * FROM waveforms WHERE episode_id = ?")
        .bind(episode_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let peaks_blob: Vec<u8> = row.try_get("peaks")?;
            Ok(Some(WaveformData {
                podcast_episode_id: row.try_get("episode_id")?,
                resolution: row.try_get("resolution")?,
                peaks: decode_peaks(&peaks_blob)?,
                duration_seconds: row.try_get("duration")?,
            }))
        }
        None => Ok(None),
    }
}

pub async fn upsert(pool: &SqlitePool, waveform: &WaveformData, sample_rate: i32) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO waveforms (episode_id, duration, resolution, sample_rate, peaks)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(episode_id) DO UPDATE SET
            duration = excluded.duration,
            resolution = excluded.resolution,
            sample_rate = excluded.sample_rate,
            peaks = excluded.peaks
        "#,
    )
    .bind(waveform.podcast_episode_id)
    .bind(waveform.duration_seconds)
    .bind(waveform.resolution)
    .bind(sample_rate)
    .bind(encode_peaks(&waveform.peaks))
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::initialize_schema;

    #[tokio::test]
    async fn upsert_then_find_round_trips_peaks() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();

        let waveform = WaveformData {
            podcast_episode_id: 123,
            resolution: 3,
            peaks: vec![(-0.1, 0.1), (-0.5, 0.5), (-1.0, 1.0)],
            duration_seconds: 30.0,
        };
        upsert(&pool, &waveform, 44100).await.unwrap();

        let found = find(&pool, 123).await.unwrap().unwrap();
        assert_eq!(found.peaks, waveform.peaks);
        assert_eq!(found.resolution, 3);
    }

    #[tokio::test]
    async fn find_returns_none_when_missing() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        assert!(find(&pool, 999).await.unwrap().is_none());
    }
}
