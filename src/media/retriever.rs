use super::types::{EncodingOption, FormatSelector};
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Video retrieval backend.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Human-readable name of the backend
    fn name(&self) -> &'static str;

    /// Enumerate the encodings available for `url`. May be empty.
    async fn enumerate(&self, url: &str) -> Result<Vec<EncodingOption>>;

    /// Retrieve `url` into `dir`, naming the artifact with `stem`.
    ///
    /// `Default` and `Best` may resolve to the same stream when the backend's
    /// default already is its best merged selection, as with yt-dlp. `Exact`
    /// ids name a catalog entry; a backend may widen a video-only id with its
    /// best audio track.
    ///
    /// Returns the path of the finished file. An interrupted retrieval leaves
    /// `<stem>*.part` files behind and no finished file.
    async fn retrieve(
        &self,
        url: &str,
        dir: &Path,
        stem: &str,
        format: &FormatSelector,
    ) -> Result<PathBuf>;
}
