use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{ffi::OsString, path::Path, time::Duration};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Outcome of an audio extraction run.
#[derive(Debug, Clone)]
pub struct ExtractReport {
    pub success: bool,
    pub diagnostics: String,
}

/// Transcoding backend.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Re-encode `input` into `output` so it fits within `target_size_mb`.
    async fn compress(&self, input: &Path, output: &Path, target_size_mb: u64) -> Result<()>;

    /// Write the audio track of `input` to `output`.
    ///
    /// A failed run is reported through `ExtractReport`, not as `Err`. `Err`
    /// means the tool could not be run at all.
    async fn extract_audio(&self, input: &Path, output: &Path) -> Result<ExtractReport>;
}

pub struct FfmpegTranscoder {
    ffmpeg: String,
    ffprobe: String,
    compress_timeout: Duration,
    extract_timeout: Duration,
}

/// Splits the bitrate budget for `target_bytes` over `duration_secs` into
/// (video, audio) bits per second.
pub fn split_bitrate(target_bytes: u64, duration_secs: f64) -> Result<(u64, u64)> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        anyhow::bail!("Invalid video duration: {}", duration_secs);
    }

    let target_bitrate = ((target_bytes * 8) as f64 / duration_secs) as u64;
    let audio_bitrate = (target_bitrate / 10).min(192_000);
    // Leave headroom for container overhead
    let video_bitrate = (target_bitrate - audio_bitrate) * 95 / 100;

    if video_bitrate < 1000 {
        anyhow::bail!(
            "Target size is too small for a {:.0}s video ({} bps)",
            duration_secs,
            video_bitrate
        );
    }

    Ok((video_bitrate, audio_bitrate))
}

impl FfmpegTranscoder {
    pub fn new(
        ffmpeg: impl Into<String>,
        ffprobe: impl Into<String>,
        compress_timeout: Duration,
        extract_timeout: Duration,
    ) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            compress_timeout,
            extract_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.tools.ffmpeg.clone(),
            config.tools.ffprobe.clone(),
            config.timeouts.compress(),
            config.timeouts.extract(),
        )
    }

    async fn get_video_duration(&self, input_path: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe)
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(input_path)
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to run ffprobe")?;

        if !output.status.success() {
            anyhow::bail!(
                "Failed to get video duration: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let duration_str = String::from_utf8_lossy(&output.stdout);
        let duration: f64 = duration_str
            .trim()
            .parse()
            .context("Failed to parse video duration")?;

        Ok(duration)
    }

    async fn run_pass(&self, pass: u8, args: Vec<OsString>) -> Result<()> {
        let output = Command::new(&self.ffmpeg)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to run ffmpeg")?;

        if !output.status.success() {
            anyhow::bail!(
                "Failed to encode video pass {}: {}",
                pass,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(())
    }

    async fn two_pass_encode(&self, input: &Path, output: &Path, target_size_mb: u64) -> Result<()> {
        let duration = self.get_video_duration(input).await?;
        let target_size_bytes = target_size_mb * 1_000_000;
        let (video_bitrate, audio_bitrate) = split_bitrate(target_size_bytes, duration)?;

        info!(
            "Video duration: {:.2}s, target bitrate: video {} kbps, audio {} kbps",
            duration,
            video_bitrate / 1000,
            audio_bitrate / 1000
        );

        // Pass logs share the output's name so they are swept with it
        let mut passlog = output.as_os_str().to_owned();
        passlog.push("-passlog");

        let common = |pass: &str| -> Vec<OsString> {
            vec![
                "-y".into(),
                "-i".into(),
                input.as_os_str().to_owned(),
                "-c:v".into(),
                "libx264".into(),
                "-preset".into(),
                "medium".into(),
                "-b:v".into(),
                format!("{}k", video_bitrate / 1000).into(),
                "-pass".into(),
                pass.into(),
                "-passlogfile".into(),
                passlog.clone(),
            ]
        };

        let null_sink = if cfg!(windows) { "NUL" } else { "/dev/null" };
        let mut pass1 = common("1");
        pass1.extend(["-an", "-f", "null", null_sink].map(OsString::from));
        self.run_pass(1, pass1).await?;

        let mut pass2 = common("2");
        pass2.extend(["-c:a", "aac", "-b:a"].map(OsString::from));
        pass2.push(format!("{}k", audio_bitrate / 1000).into());
        pass2.extend(["-movflags", "+faststart"].map(OsString::from));
        pass2.push(output.as_os_str().to_owned());
        self.run_pass(2, pass2).await
    }

    pub async fn test_availability(binary: &str) -> bool {
        match Command::new(binary).arg("-version").output().await {
            Ok(output) => {
                if output.status.success() {
                    let version_line = String::from_utf8_lossy(&output.stdout)
                        .lines()
                        .next()
                        .unwrap_or("unknown")
                        .to_string();
                    info!("✅ ffmpeg is available: {}", version_line);
                    true
                } else {
                    warn!("❌ ffmpeg command failed");
                    false
                }
            }
            Err(e) => {
                warn!(
                    "❌ ffmpeg not found: {} (required for compression and audio extraction)",
                    e
                );
                false
            }
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn compress(&self, input: &Path, output: &Path, target_size_mb: u64) -> Result<()> {
        info!(
            "Compressing {} to fit within {} MB",
            input.display(),
            target_size_mb
        );

        tokio::time::timeout(
            self.compress_timeout,
            self.two_pass_encode(input, output, target_size_mb),
        )
        .await
        .with_context(|| {
            format!(
                "Compression timed out after {}s",
                self.compress_timeout.as_secs()
            )
        })??;

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            anyhow::bail!("Compression produced no output file");
        }

        Ok(())
    }

    async fn extract_audio(&self, input: &Path, output: &Path) -> Result<ExtractReport> {
        debug!(
            "ffmpeg command: {} -i {} -q:a 0 -map a {}",
            self.ffmpeg,
            input.display(),
            output.display()
        );

        let result = tokio::time::timeout(
            self.extract_timeout,
            Command::new(&self.ffmpeg)
                .arg("-y")
                .arg("-i")
                .arg(input)
                .arg("-q:a")
                .arg("0")
                .arg("-map")
                .arg("a")
                .arg(output)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match result {
            Ok(output) => output.context("Failed to run ffmpeg")?,
            Err(_) => {
                return Ok(ExtractReport {
                    success: false,
                    diagnostics: format!(
                        "Audio extraction timed out after {}s",
                        self.extract_timeout.as_secs()
                    ),
                })
            }
        };

        debug!("ffmpeg returncode: {:?}", output.status.code());

        Ok(ExtractReport {
            success: output.status.success(),
            diagnostics: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
