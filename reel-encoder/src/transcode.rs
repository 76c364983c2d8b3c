//! ffmpeg transcode execution
//!
//! Runs one assignment as an ffmpeg subprocess, parsing its progress stream
//! and reporting percent-complete against the source duration obtained from
//! ffprobe. Cancellation aborts the owning task, which kills the child.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reel_core::domain::encoding::{EncodingAssignment, TranscodeProfile};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Terminal output of one transcode
#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    pub path: String,
    pub size_bytes: u64,
}

/// Executes one assignment and streams progress
///
/// Behind a trait so the connection layer can be exercised without ffmpeg.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(
        &self,
        assignment: &EncodingAssignment,
        progress: mpsc::Sender<f32>,
    ) -> Result<TranscodeOutput>;
}

pub struct Transcoder {
    ffmpeg_bin: String,
    ffprobe_bin: String,
    work_dir: PathBuf,
}

impl Transcoder {
    pub fn new(config: &Config) -> Self {
        Self {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            ffprobe_bin: config.ffprobe_bin.clone(),
            work_dir: PathBuf::from(&config.work_dir),
        }
    }

    /// Source duration in seconds, for progress percentages.
    async fn probe_duration(&self, source: &str) -> Result<f64> {
        let output = Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                source,
            ])
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.ffprobe_bin))?;
        if !output.status.success() {
            anyhow::bail!("ffprobe exited with {}", output.status);
        }
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .context("ffprobe printed no duration")
    }

    fn output_path(&self, assignment: &EncodingAssignment) -> PathBuf {
        let stem = Path::new(&assignment.source_path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| assignment.id.to_string());
        self.work_dir
            .join(format!("{}.{}.mkv", stem, assignment.profile.name))
    }

    fn build_args(source: &str, output: &Path, profile: &TranscodeProfile) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            source.to_string(),
            "-c:v".to_string(),
            profile.video_codec.clone(),
            "-crf".to_string(),
            profile.crf.to_string(),
            "-c:a".to_string(),
            profile.audio_codec.clone(),
        ];
        if let Some(height) = profile.max_height {
            args.push("-vf".to_string());
            args.push(format!("scale=-2:min({h}\\,ih)", h = height));
        }
        args.push("-progress".to_string());
        args.push("pipe:1".to_string());
        args.push("-nostats".to_string());
        args.push(output.to_string_lossy().to_string());
        args
    }
}

/// Seconds of output already encoded, from one `-progress` line.
///
/// ffmpeg's `out_time_ms` field is microseconds despite the name.
fn parse_out_time(line: &str) -> Option<f64> {
    let value = line.strip_prefix("out_time_ms=")?;
    let micros: i64 = value.trim().parse().ok()?;
    Some(micros.max(0) as f64 / 1_000_000.0)
}

#[async_trait]
impl JobRunner for Transcoder {
    async fn run(
        &self,
        assignment: &EncodingAssignment,
        progress: mpsc::Sender<f32>,
    ) -> Result<TranscodeOutput> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .context("failed to create work directory")?;

        let duration = match self.probe_duration(&assignment.source_path).await {
            Ok(duration) if duration > 0.0 => Some(duration),
            Ok(_) => None,
            Err(e) => {
                warn!("could not probe {}: {:#}", assignment.source_path, e);
                None
            }
        };

        let output_path = self.output_path(assignment);
        let args = Self::build_args(&assignment.source_path, &output_path, &assignment.profile);
        info!(
            "transcoding {} -> {} ({})",
            assignment.source_path,
            output_path.display(),
            assignment.profile.name
        );

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {}", self.ffmpeg_bin))?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            let mut last_percent = -1.0f32;
            while let Ok(Some(line)) = lines.next_line().await {
                let Some(elapsed) = parse_out_time(&line) else {
                    continue;
                };
                let Some(duration) = duration else { continue };
                let percent = ((elapsed / duration) * 100.0).clamp(0.0, 100.0) as f32;
                // Only report whole-percent movement to keep the wire quiet.
                if percent - last_percent >= 1.0 {
                    last_percent = percent;
                    debug!("assignment {} at {:.0}%", assignment.id, percent);
                    let _ = progress.send(percent).await;
                }
            }
        }

        let status = child.wait().await.context("ffmpeg did not run")?;
        if !status.success() {
            anyhow::bail!("ffmpeg exited with {}", status);
        }

        let size_bytes = tokio::fs::metadata(&output_path)
            .await
            .context("transcoded output missing")?
            .len();
        Ok(TranscodeOutput {
            path: output_path.to_string_lossy().to_string(),
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn transcoder() -> Transcoder {
        Transcoder {
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            work_dir: PathBuf::from("/var/lib/reel/work"),
        }
    }

    fn assignment() -> EncodingAssignment {
        EncodingAssignment::new(
            Uuid::new_v4(),
            "enc-1",
            "/work/in/Heat.1995.mkv",
            TranscodeProfile::default(),
        )
    }

    #[test]
    fn test_output_path_uses_stem_and_profile() {
        let path = transcoder().output_path(&assignment());
        assert_eq!(
            path,
            PathBuf::from("/var/lib/reel/work/Heat.1995.hevc-1080p.mkv")
        );
    }

    #[test]
    fn test_build_args_reflect_profile() {
        let profile = TranscodeProfile {
            name: "h264-720p".to_string(),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            crf: 20,
            max_height: Some(720),
        };
        let args = Transcoder::build_args("/in/a.mkv", Path::new("/out/a.mkv"), &profile);
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-crf", "20"]));
        assert!(args.iter().any(|a| a.contains("min(720")));
        assert_eq!(args.last().unwrap(), "/out/a.mkv");
    }

    #[test]
    fn test_build_args_without_height_skips_scale() {
        let profile = TranscodeProfile {
            max_height: None,
            ..TranscodeProfile::default()
        };
        let args = Transcoder::build_args("/in/a.mkv", Path::new("/out/a.mkv"), &profile);
        assert!(!args.iter().any(|a| a == "-vf"));
    }

    #[test]
    fn test_parse_out_time() {
        assert_eq!(parse_out_time("out_time_ms=1500000"), Some(1.5));
        assert_eq!(parse_out_time("out_time_ms=0"), Some(0.0));
        assert_eq!(parse_out_time("frame=42"), None);
        assert_eq!(parse_out_time("out_time_ms=garbage"), None);
    }
}
