use super::{
    retriever::Retriever,
    types::{EncodingOption, FormatSelector, UNKNOWN_RESOLUTION},
};
use crate::{config::Config, utils::format_file_size};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct YtDlpRetriever {
    binary: String,
    formats_timeout: Duration,
    fetch_timeout: Duration,
}

impl YtDlpRetriever {
    pub fn new(binary: impl Into<String>, formats_timeout: Duration, fetch_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            formats_timeout,
            fetch_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.tools.ytdlp.clone(),
            config.timeouts.formats(),
            config.timeouts.fetch(),
        )
    }

    fn format_args(format: &FormatSelector) -> Vec<String> {
        match format {
            // yt-dlp's own default is already `bv*+ba/b`
            FormatSelector::Default => Vec::new(),
            FormatSelector::Best => vec!["--format".to_string(), "bv*+ba/b".to_string()],
            // Video-only ids get the best audio merged in; muxed ids fall through as-is
            FormatSelector::Exact(id) => {
                vec!["--format".to_string(), format!("{id}+bestaudio/{id}")]
            }
        }
    }

    async fn find_output(dir: &Path, stem: &str) -> Result<PathBuf> {
        let expected = dir.join(format!("{stem}.mp4"));
        if tokio::fs::try_exists(&expected).await.unwrap_or(false) {
            return Ok(expected);
        }

        let prefix = format!("{stem}.");
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to list {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && !name.ends_with(".part") && !name.ends_with(".ytdl") {
                return Ok(entry.path());
            }
        }

        Err(anyhow::anyhow!("Media download produced no output file"))
    }

    pub async fn test_availability(binary: &str) -> bool {
        match Command::new(binary).arg("--version").output().await {
            Ok(output) => {
                if output.status.success() {
                    let version = String::from_utf8_lossy(&output.stdout);
                    info!("✅ yt-dlp is available, version: {}", version.trim());
                    true
                } else {
                    warn!("❌ yt-dlp command failed");
                    false
                }
            }
            Err(e) => {
                warn!("❌ yt-dlp not found: {}", e);
                false
            }
        }
    }
}

/// Turns `yt-dlp --dump-single-json` output into encoding options, in the
/// order the backend listed them. Entries without a `format_id` are skipped.
pub fn parse_formats(json: &Value) -> Vec<EncodingOption> {
    let Some(formats) = json["formats"].as_array() else {
        return Vec::new();
    };

    formats
        .iter()
        .filter_map(|format| {
            let format_id = format["format_id"].as_str()?.trim();
            if format_id.is_empty() {
                return None;
            }

            let has_video = format["vcodec"].as_str().map_or(true, |v| v != "none");
            let resolution = match format["height"].as_u64() {
                Some(height) if has_video => format!("{height}p"),
                _ => UNKNOWN_RESOLUTION.to_string(),
            };

            let approx_size = format["filesize"]
                .as_u64()
                .or_else(|| format["filesize_approx"].as_f64().map(|s| s as u64))
                .map(format_file_size)
                .unwrap_or_else(|| "?".to_string());

            Some(EncodingOption {
                format_id: format_id.to_string(),
                resolution,
                approx_size,
            })
        })
        .collect()
}

#[async_trait]
impl Retriever for YtDlpRetriever {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn enumerate(&self, url: &str) -> Result<Vec<EncodingOption>> {
        debug!("Listing formats with yt-dlp for: {}", url);

        let output = tokio::time::timeout(
            self.formats_timeout,
            Command::new(&self.binary)
                .arg("--dump-single-json")
                .arg("--no-download")
                .arg("--no-playlist")
                .arg("--no-warnings")
                .arg(url)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .context("Format listing timed out")?
        .context("Failed to list formats")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!("Format listing failed: {}", error.trim()));
        }

        let json: Value =
            serde_json::from_slice(&output.stdout).context("Failed to parse format listing")?;
        Ok(parse_formats(&json))
    }

    async fn retrieve(
        &self,
        url: &str,
        dir: &Path,
        stem: &str,
        format: &FormatSelector,
    ) -> Result<PathBuf> {
        info!("Downloading media with yt-dlp: {} (format: {})", url, format);

        let template = dir.join(format!("{stem}.%(ext)s"));
        let output = tokio::time::timeout(
            self.fetch_timeout,
            Command::new(&self.binary)
                .args(Self::format_args(format))
                .arg("--merge-output-format")
                .arg("mp4")
                .arg("--no-playlist")
                .arg("--no-warnings")
                .arg("--output")
                .arg(&template)
                .arg(url)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .with_context(|| {
            format!(
                "Media download timed out after {}s",
                self.fetch_timeout.as_secs()
            )
        })?
        .context("Failed to run yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!("Media download failed: {}", error.trim()));
        }

        let path = Self::find_output(dir, stem).await?;
        debug!("yt-dlp wrote {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_formats_keeps_backend_order() {
        let json = json!({
            "id": "abc123",
            "formats": [
                {"format_id": "140", "vcodec": "none", "acodec": "mp4a", "filesize": 3_400_000},
                {"format_id": "18", "vcodec": "avc1", "height": 360, "filesize_approx": 12_582_912.0},
                {"format_id": "137", "vcodec": "avc1", "height": 1080},
                {"format_id": "", "height": 720},
                {"height": 480}
            ]
        });

        let formats = parse_formats(&json);
        assert_eq!(formats.len(), 3);

        assert_eq!(formats[0].format_id, "140");
        assert_eq!(formats[0].resolution, UNKNOWN_RESOLUTION);
        assert_eq!(formats[0].approx_size, "3.2 MB");

        assert_eq!(formats[1].format_id, "18");
        assert_eq!(formats[1].resolution, "360p");
        assert_eq!(formats[1].approx_size, "12.0 MB");

        assert_eq!(formats[2].resolution, "1080p");
        assert_eq!(formats[2].approx_size, "?");
        assert!(formats.iter().all(|f| !f.format_id.is_empty()));
    }

    #[test]
    fn test_parse_formats_without_list() {
        assert!(parse_formats(&json!({"id": "x"})).is_empty());
        assert!(parse_formats(&json!(null)).is_empty());
    }

    #[test]
    fn test_format_args() {
        assert!(YtDlpRetriever::format_args(&FormatSelector::Default).is_empty());
        assert_eq!(
            YtDlpRetriever::format_args(&FormatSelector::Best),
            vec!["--format", "bv*+ba/b"]
        );
        assert_eq!(
            YtDlpRetriever::format_args(&FormatSelector::Exact("137".to_string())),
            vec!["--format", "137+bestaudio/137"]
        );
    }

    #[tokio::test]
    async fn test_find_output_skips_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("video_x.f137.mp4.part"), b"partial").unwrap();
        assert!(YtDlpRetriever::find_output(dir.path(), "video_x").await.is_err());

        std::fs::write(dir.path().join("video_x.webm"), b"done").unwrap();
        let found = YtDlpRetriever::find_output(dir.path(), "video_x").await.unwrap();
        assert_eq!(found, dir.path().join("video_x.webm"));

        std::fs::write(dir.path().join("video_x.mp4"), b"done").unwrap();
        let found = YtDlpRetriever::find_output(dir.path(), "video_x").await.unwrap();
        assert_eq!(found, dir.path().join("video_x.mp4"));
    }

    #[tokio::test]
    #[ignore = "Requires yt-dlp installed and network access"]
    async fn test_enumerate_real_video() {
        let retriever = YtDlpRetriever::from_config(&Config::default());
        let formats = retriever
            .enumerate("https://www.youtube.com/watch?v=jNQXAC9IVRw")
            .await
            .unwrap();
        assert!(!formats.is_empty());
    }
}
