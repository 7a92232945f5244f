use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_INLINE_LIMIT_BYTES: u64 = 2 * 1024 * 1024 * 1024;
pub const DEFAULT_COMPRESS_TARGET_MB: u64 = 2000;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Working directory for transient artifacts
    pub download_dir: PathBuf,
    /// Largest artifact delivered inline as video
    pub inline_limit_bytes: u64,
    /// Size budget handed to the compressor when the inline limit is exceeded
    pub compress_target_mb: u64,
    pub tools: ToolsConfig,
    pub timeouts: TimeoutsConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            inline_limit_bytes: DEFAULT_INLINE_LIMIT_BYTES,
            compress_target_mb: DEFAULT_COMPRESS_TARGET_MB,
            tools: ToolsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        if config.inline_limit_bytes == 0 {
            anyhow::bail!("inline_limit_bytes must be greater than zero");
        }
        if config.compress_target_mb == 0 {
            anyhow::bail!("compress_target_mb must be greater than zero");
        }
        Ok(config)
    }

    pub fn get_logging_format(&self) -> &str {
        &self.logging.format
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ToolsConfig {
    pub ytdlp: String,
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp: "yt-dlp".to_string(),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

/// Upper bounds for each external operation, in seconds.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub formats: u64,
    pub fetch: u64,
    pub compress: u64,
    pub extract: u64,
    pub payload: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            formats: 30,
            fetch: 30 * 60,
            compress: 2 * 60 * 60,
            extract: 10 * 60,
            payload: 10 * 60,
        }
    }
}

impl TimeoutsConfig {
    pub fn formats(&self) -> Duration {
        Duration::from_secs(self.formats)
    }

    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch)
    }

    pub fn compress(&self) -> Duration {
        Duration::from_secs(self.compress)
    }

    pub fn extract(&self) -> Duration {
        Duration::from_secs(self.extract)
    }

    pub fn payload(&self) -> Duration {
        Duration::from_secs(self.payload)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
        }
    }
}
