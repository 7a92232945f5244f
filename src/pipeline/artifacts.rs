use std::{
    collections::BTreeSet,
    fmt, io,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};
use uuid::Uuid;

const PART_SUFFIX: &str = ".part";

/// Unique token naming every artifact of one fetch or extract operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_id() -> Self {
        Self(Uuid::new_v4())
    }

    /// Only well-formed ids are accepted, so callback data can never name a
    /// path outside the working directory.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// What one directory listing says about a request's video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoState {
    Missing,
    InFlight,
    Present(PathBuf),
}

/// Naming convention for artifacts in the working directory.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    dir: PathBuf,
}

impl ArtifactLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    pub fn video_stem(id: &RequestId) -> String {
        format!("video_{id}")
    }

    pub fn audio_stem(id: &RequestId) -> String {
        format!("audio_{id}")
    }

    pub fn video_path(&self, id: &RequestId) -> PathBuf {
        self.dir.join(format!("{}.mp4", Self::video_stem(id)))
    }

    pub fn compressed_path(&self, id: &RequestId) -> PathBuf {
        self.dir.join(format!("{}_compressed.mp4", Self::video_stem(id)))
    }

    pub fn audio_path(&self, id: &RequestId) -> PathBuf {
        self.dir.join(format!("{}.mp3", Self::audio_stem(id)))
    }

    /// Classifies the video of `id` from a single listing of the directory.
    ///
    /// A finished `video_<id>.<ext>` wins over leftover partial files.
    pub async fn inspect_video(&self, id: &RequestId) -> io::Result<VideoState> {
        let stem = Self::video_stem(id);
        let finished_prefix = format!("{stem}.");
        let expected = self.video_path(id);

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(VideoState::Missing),
            Err(e) => return Err(e),
        };

        let mut finished: Vec<PathBuf> = Vec::new();
        let mut in_flight = false;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(&finished_prefix) {
                continue;
            }
            if name.ends_with(PART_SUFFIX) || name.ends_with(".ytdl") {
                in_flight = true;
            } else {
                finished.push(entry.path());
            }
        }

        if finished.contains(&expected) {
            return Ok(VideoState::Present(expected));
        }
        if in_flight {
            return Ok(VideoState::InFlight);
        }
        Ok(finished
            .into_iter()
            .next()
            .map(VideoState::Present)
            .unwrap_or(VideoState::Missing))
    }

    pub fn scope(&self, id: &RequestId) -> ArtifactScope {
        ArtifactScope::new(self.dir.clone(), id.clone())
    }
}

/// Owns every artifact created under one request id.
///
/// Normal completion awaits [`ArtifactScope::release`], which deletes through
/// tokio's fs. Dropping an unreleased scope (panic, cancellation) deletes
/// synchronously instead.
///
/// Registered paths are removed exactly once. Registered prefixes also sweep
/// backend side files such as `.part` downloads and encoder pass logs.
#[derive(Debug)]
pub struct ArtifactScope {
    dir: PathBuf,
    id: RequestId,
    paths: BTreeSet<PathBuf>,
    prefixes: BTreeSet<String>,
}

impl ArtifactScope {
    fn new(dir: PathBuf, id: RequestId) -> Self {
        Self {
            dir,
            id,
            paths: BTreeSet::new(),
            prefixes: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn register(&mut self, path: impl Into<PathBuf>) {
        self.paths.insert(path.into());
    }

    pub fn register_prefix(&mut self, prefix: impl Into<String>) {
        self.prefixes.insert(prefix.into());
    }

    fn matches_prefix(&self, name: &str) -> bool {
        self.prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }

    /// Deletes everything the scope owns without blocking the runtime.
    pub async fn release(mut self) {
        let mut paths = std::mem::take(&mut self.paths);
        if !self.prefixes.is_empty() {
            if let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    if self.matches_prefix(&entry.file_name().to_string_lossy()) {
                        paths.insert(entry.path());
                    }
                }
            }
            self.prefixes.clear();
        }

        debug!(request_id = %self.id, count = paths.len(), "Releasing artifacts");
        for path in &paths {
            log_removal(path, tokio::fs::remove_file(path).await);
        }
    }

    fn swept_paths(&self) -> Vec<PathBuf> {
        if self.prefixes.is_empty() {
            return Vec::new();
        }
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| self.matches_prefix(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.path())
            .collect()
    }
}

impl Drop for ArtifactScope {
    fn drop(&mut self) {
        if self.paths.is_empty() && self.prefixes.is_empty() {
            return;
        }
        let mut paths = std::mem::take(&mut self.paths);
        paths.extend(self.swept_paths());
        debug!(request_id = %self.id, count = paths.len(), "Cleaning up unreleased artifacts");
        cleanup(paths.iter());
    }
}

/// Deletes each path if present. Failures are logged and discarded.
pub fn cleanup<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) {
    for path in paths {
        log_removal(path, std::fs::remove_file(path));
    }
}

fn log_removal(path: &Path, result: io::Result<()>) {
    match result {
        Ok(()) => debug!(path = %path.display(), "Removed artifact"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove artifact"),
    }
}
