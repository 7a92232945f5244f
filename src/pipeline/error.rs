use thiserror::Error;

/// Everything a request can end with besides success. Every variant is
/// reported to the user and none are retried.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no link found in message")]
    LinkNotFound,

    /// Soft: the caller falls back to a default-quality fetch.
    #[error("format enumeration unavailable: {0}")]
    EnumerationUnavailable(String),

    #[error("retrieval failed: {0}")]
    RetrievalFailed(String),

    #[error("no pending link for this chat")]
    SessionExpired,

    #[error("source video is still downloading")]
    NotReadyYet,

    #[error("source video not found")]
    SourceMissing,

    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl PipelineError {
    pub fn retrieval(err: anyhow::Error) -> Self {
        PipelineError::RetrievalFailed(format!("{err:#}"))
    }

    pub fn transcode(err: anyhow::Error) -> Self {
        PipelineError::TranscodeFailed(format!("{err:#}"))
    }

    /// Short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::LinkNotFound => "link_not_found",
            PipelineError::EnumerationUnavailable(_) => "enumeration_unavailable",
            PipelineError::RetrievalFailed(_) => "retrieval_failed",
            PipelineError::SessionExpired => "session_expired",
            PipelineError::NotReadyYet => "not_ready_yet",
            PipelineError::SourceMissing => "source_missing",
            PipelineError::TranscodeFailed(_) => "transcode_failed",
            PipelineError::Unexpected(_) => "unexpected",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PipelineError::LinkNotFound => {
                "❗ No video link found. Please send a valid link.".to_string()
            }
            PipelineError::EnumerationUnavailable(_) => {
                "⏳ Could not list qualities, downloading with default quality...".to_string()
            }
            PipelineError::RetrievalFailed(cause) => {
                format!("❌ Failed to download the video: {cause}")
            }
            PipelineError::SessionExpired => {
                "❌ Link not found. Please send it again.".to_string()
            }
            PipelineError::NotReadyYet => {
                "❗ The video has not finished downloading yet. Please try again shortly."
                    .to_string()
            }
            PipelineError::SourceMissing => {
                "❌ Video not found. Please try again.".to_string()
            }
            PipelineError::TranscodeFailed(cause) => format!("❌ Processing failed: {cause}"),
            PipelineError::Unexpected(cause) => format!("❌ Unexpected error: {cause}"),
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Unexpected(format!("{err:#}"))
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Unexpected(err.to_string())
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
