use super::{
    retriever::Retriever,
    types::{Choice, EncodingOption, BEST_FORMAT},
};
use std::sync::Arc;
use tracing::{info, warn};

pub const QUALITY_PREFIX: &str = "quality:";
pub const BEST_LABEL: &str = "Best quality";

/// Lists the encodings a URL offers, failing soft to an empty list.
pub struct FormatCatalog {
    retriever: Arc<dyn Retriever>,
}

impl FormatCatalog {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }

    /// An empty result means enumeration was impossible and the caller should
    /// fall back to a default-quality fetch.
    pub async fn list_formats(&self, url: &str) -> Vec<EncodingOption> {
        match self.retriever.enumerate(url).await {
            Ok(formats) => {
                let formats: Vec<EncodingOption> = formats
                    .into_iter()
                    .filter(|f| !f.format_id.is_empty())
                    .collect();
                info!(
                    "{} listed {} formats for {}",
                    self.retriever.name(),
                    formats.len(),
                    url
                );
                formats
            }
            Err(e) => {
                warn!("Format enumeration unavailable for {}: {:#}", url, e);
                Vec::new()
            }
        }
    }
}

/// Builds the quality menu: known resolutions in backend order, then `best`.
pub fn build_choices(options: &[EncodingOption]) -> Vec<Choice> {
    options
        .iter()
        .filter(|option| option.has_known_resolution())
        .map(|option| Choice {
            label: format!("{} ({})", option.resolution, option.approx_size),
            callback: format!("{QUALITY_PREFIX}{}", option.format_id),
        })
        .chain(std::iter::once(Choice {
            label: BEST_LABEL.to_string(),
            callback: format!("{QUALITY_PREFIX}{BEST_FORMAT}"),
        }))
        .collect()
}
