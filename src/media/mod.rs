mod catalog;
mod link;
mod retriever;
mod transcode;
mod types;
mod ytdlp;

pub use catalog::{build_choices, FormatCatalog, QUALITY_PREFIX};
pub use link::SourceLink;
pub use retriever::Retriever;
pub use transcode::{FfmpegTranscoder, Transcoder};
pub use types::{Choice, FormatSelector};
pub use ytdlp::YtDlpRetriever;

#[cfg(test)]
pub use transcode::ExtractReport;
#[cfg(test)]
pub use types::EncodingOption;

use crate::config::Config;
use anyhow::Result;
use tracing::{info, warn};

/// Probes the external tools the pipeline shells out to.
pub async fn test_setup(config: &Config) -> Result<()> {
    info!("Testing media backend setup...");

    let ytdlp_available = YtDlpRetriever::test_availability(&config.tools.ytdlp).await;
    let ffmpeg_available = FfmpegTranscoder::test_availability(&config.tools.ffmpeg).await;

    if ytdlp_available && !ffmpeg_available {
        warn!("⚠️  yt-dlp will work but merging, compression and audio extraction will fail");
    }

    if ytdlp_available {
        info!("✅ Media retrieval backend is available");
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "yt-dlp is not available. Please install yt-dlp and ffmpeg."
        ))
    }
}
