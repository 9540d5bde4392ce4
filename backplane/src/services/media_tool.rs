//! Adapter over an external `ffmpeg`-class tool and a compatible probe. Every method
//! is a black-box subprocess invocation; nothing here decodes audio in-process.

use async_trait::async_trait;
use backplane_common::StructuredError;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

#[async_trait]
pub trait MediaTool: Send + Sync {
    async fn probe_duration(&self, path: &Path) -> Result<f64, StructuredError>;
    async fn transcode_to_ml(&self, src: &Path, dst: &Path) -> Result<(), StructuredError>;
    async fn extract_segment(
        &self,
        src: &Path,
        dst: &Path,
        start: f64,
        duration: f64,
    ) -> Result<(), StructuredError>;
    async fn pad_or_crop(&self, src: &Path, target_duration: f64) -> Result<f64, StructuredError>;
    async fn segment_volume_stats(
        &self,
        src: &Path,
        start: f64,
        duration: f64,
    ) -> Result<(f64, f64), StructuredError>;
    /// Transcode to headerless mono 32-bit float little-endian PCM at `sample_rate`,
    /// the raw shape the waveform peak algorithm reads directly.
    async fn transcode_to_raw_f32(
        &self,
        src: &Path,
        dst: &Path,
        sample_rate: u32,
    ) -> Result<(), StructuredError>;
}

/// Reference adapter shelling out to `ffmpeg`/`ffprobe`.
pub struct FfmpegMediaTool {
    ffmpeg_path: String,
    ffprobe_path: String,
    mean_volume_re: Regex,
    max_volume_re: Regex,
}

impl FfmpegMediaTool {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
            mean_volume_re: Regex::new(r"mean_volume:\s*([-\d.]+)\s*dB").unwrap(),
            max_volume_re: Regex::new(r"max_volume:\s*([-\d.]+)\s*dB").unwrap(),
        }
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<(String, String), StructuredError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                StructuredError::processing("tool_spawn_failed", format!("{} failed to start: {}", program, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(StructuredError::processing(
                "tool_nonzero_exit",
                format!("{} exited with {}: {}", program, output.status, stderr),
            ));
        }

        Ok((stdout, stderr))
    }
}

#[async_trait]
impl MediaTool for FfmpegMediaTool {
    async fn probe_duration(&self, path: &Path) -> Result<f64, StructuredError> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            path.display().to_string(),
        ];
        let (stdout, _) = self.run(&self.ffprobe_path, &args).await?;
        stdout.trim().parse::<f64>().map_err(|_| {
            StructuredError::processing(
                "probe_parse_failed",
                format!("could not parse ffprobe duration output: {:?}", stdout),
            )
        })
    }

    async fn transcode_to_ml(&self, src: &Path, dst: &Path) -> Result<(), StructuredError> {
        let args = vec![
            "-i".to_string(),
            src.display().to_string(),
            "-ar".to_string(),
            "16000".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-b:a".to_string(),
            "64k".to_string(),
            "-f".to_string(),
            "mp3".to_string(),
            "-y".to_string(),
            dst.display().to_string(),
        ];
        self.run(&self.ffmpeg_path, &args).await.map(|_| ())
    }

    async fn extract_segment(
        &self,
        src: &Path,
        dst: &Path,
        start: f64,
        duration: f64,
    ) -> Result<(), StructuredError> {
        let args = vec![
            "-ss".to_string(),
            start.to_string(),
            "-i".to_string(),
            src.display().to_string(),
            "-t".to_string(),
            duration.to_string(),
            "-ar".to_string(),
            "16000".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            "-f".to_string(),
            "wav".to_string(),
            "-y".to_string(),
            dst.display().to_string(),
        ];
        self.run(&self.ffmpeg_path, &args).await.map(|_| ())
    }

    async fn pad_or_crop(&self, src: &Path, target_duration: f64) -> Result<f64, StructuredError> {
        let actual = self.probe_duration(src).await?;
        if (actual - target_duration).abs() <= 0.5 {
            return Ok(actual);
        }

        let tmp = src.with_extension("tmp.wav");
        if actual < target_duration {
            let args = vec![
                "-i".to_string(),
                src.display().to_string(),
                "-af".to_string(),
                format!("apad=whole_dur={}", target_duration),
                "-ar".to_string(),
                "16000".to_string(),
                "-ac".to_string(),
                "1".to_string(),
                "-c:a".to_string(),
                "pcm_s16le".to_string(),
                "-y".to_string(),
                tmp.display().to_string(),
            ];
            self.run(&self.ffmpeg_path, &args).await?;
        } else {
            let offset = (actual - target_duration) / 2.0;
            let args = vec![
                "-ss".to_string(),
                offset.to_string(),
                "-i".to_string(),
                src.display().to_string(),
                "-t".to_string(),
                target_duration.to_string(),
                "-ar".to_string(),
                "16000".to_string(),
                "-ac".to_string(),
                "1".to_string(),
                "-c:a".to_string(),
                "pcm_s16le".to_string(),
                "-y".to_string(),
                tmp.display().to_string(),
            ];
            self.run(&self.ffmpeg_path, &args).await?;
        }

        tokio::fs::rename(&tmp, src).await.map_err(|e| {
            StructuredError::system("pad_or_crop_replace_failed", e.to_string())
        })?;
        Ok(target_duration)
    }

    async fn transcode_to_raw_f32(
        &self,
        src: &Path,
        dst: &Path,
        sample_rate: u32,
    ) -> Result<(), StructuredError> {
        let args = vec![
            "-i".to_string(),
            src.display().to_string(),
            "-ar".to_string(),
            sample_rate.to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-f".to_string(),
            "f32le".to_string(),
            "-acodec".to_string(),
            "pcm_f32le".to_string(),
            "-y".to_string(),
            dst.display().to_string(),
        ];
        self.run(&self.ffmpeg_path, &args).await.map(|_| ())
    }

    async fn segment_volume_stats(
        &self,
        src: &Path,
        start: f64,
        duration: f64,
    ) -> Result<(f64, f64), StructuredError> {
        let args = vec![
            "-ss".to_string(),
            start.to_string(),
            "-t".to_string(),
            duration.to_string(),
            "-i".to_string(),
            src.display().to_string(),
            "-af".to_string(),
            "volumedetect".to_string(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ];

        let output = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| StructuredError::processing("tool_spawn_failed", e.to_string()))?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mean = self
            .mean_volume_re
            .captures(&stderr)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok());
        let max = self
            .max_volume_re
            .captures(&stderr)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok());

        match (mean, max) {
            (Some(mean), Some(max)) => Ok((mean, max)),
            _ => Err(StructuredError::processing(
                "volume_parse_failed",
                "could not parse mean_volume/max_volume from ffmpeg output",
            )),
        }
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted double standing in for the real subprocess-backed tool.
    #[derive(Default)]
    pub struct MockMediaTool {
        pub durations: Mutex<HashMap<String, f64>>,
        pub volume_stats: Mutex<Vec<(f64, f64)>>,
        pub default_duration: f64,
    }

    impl MockMediaTool {
        pub fn new() -> Self {
            Self {
                durations: Mutex::new(HashMap::new()),
                volume_stats: Mutex::new(Vec::new()),
                default_duration: 30.0,
            }
        }

        pub fn with_volume_sequence(stats: Vec<(f64, f64)>) -> Self {
            Self {
                durations: Mutex::new(HashMap::new()),
                volume_stats: Mutex::new(stats),
                default_duration: 30.0,
            }
        }
    }

    #[async_trait]
    impl MediaTool for MockMediaTool {
        async fn probe_duration(&self, path: &Path) -> Result<f64, StructuredError> {
            Ok(*self
                .durations
                .lock()
                .unwrap()
                .get(&path.display().to_string())
                .unwrap_or(&self.default_duration))
        }

        async fn transcode_to_ml(&self, _src: &Path, dst: &Path) -> Result<(), StructuredError> {
            std::fs::write(dst, b"mock-transcoded").map_err(|e| {
                StructuredError::system("mock_write_failed", e.to_string())
            })
        }

        async fn extract_segment(
            &self,
            _src: &Path,
            dst: &Path,
            _start: f64,
            _duration: f64,
        ) -> Result<(), StructuredError> {
            std::fs::write(dst, b"mock-clip").map_err(|e| {
                StructuredError::system("mock_write_failed", e.to_string())
            })
        }

        async fn pad_or_crop(&self, _src: &Path, target_duration: f64) -> Result<f64, StructuredError> {
            Ok(target_duration)
        }

        async fn transcode_to_raw_f32(
            &self,
            _src: &Path,
            dst: &Path,
            _sample_rate: u32,
        ) -> Result<(), StructuredError> {
            // A gentle rising-then-falling sine-ish envelope so peak extraction has
            // something nonzero and non-uniform to normalize against.
            let sample_count = 44_100usize;
            let mut bytes = Vec::with_capacity(sample_count * 4);
            for i in 0..sample_count {
                let phase = i as f32 / sample_count as f32;
                let envelope = (phase * std::f32::consts::PI).sin();
                let value = envelope * ((i as f32 * 0.1).sin());
                bytes.extend_from_slice(&value.to_le_bytes());
            }
            std::fs::write(dst, &bytes)
                .map_err(|e| StructuredError::system("mock_write_failed", e.to_string()))
        }

        async fn segment_volume_stats(
            &self,
            _src: &Path,
            _start: f64,
            _duration: f64,
        ) -> Result<(f64, f64), StructuredError> {
            let mut stats = self.volume_stats.lock().unwrap();
            if stats.is_empty() {
                Ok((-30.0, -25.0))
            } else {
                Ok(stats.remove(0))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_regex_matches_ffmpeg_output() {
        let tool = FfmpegMediaTool::new("ffmpeg", "ffprobe");
        let sample = "[Parsed_volumedetect_0 @ 0x1] mean_volume: -24.3 dB\n[Parsed_volumedetect_0 @ 0x1] max_volume: -3.1 dB\n";
        let mean: f64 = tool
            .mean_volume_re
            .captures(sample)
            .unwrap()
            .get(1)
            .unwrap()
            .as_str()
            .parse()
            .unwrap();
        let max: f64 = tool
            .max_volume_re
            .captures(sample)
            .unwrap()
            .get(1)
            .unwrap()
            .as_str()
            .parse()
            .unwrap();
        assert_eq!(mean, -24.3);
        assert_eq!(max, -3.1);
    }
}
