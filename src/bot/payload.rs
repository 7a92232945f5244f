use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{path::Path, time::Duration};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Re-materializes a video that the messaging client still holds.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    async fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

pub struct HttpPayloadSource {
    client: reqwest::Client,
}

impl HttpPayloadSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PayloadSource for HttpPayloadSource {
    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        debug!("Downloading message payload: {}", url);

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to fetch message payload")?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Failed to download payload: HTTP {}",
                response.status()
            ));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read payload data")?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!("Restored {} bytes to {}", written, dest.display());
        Ok(())
    }
}
