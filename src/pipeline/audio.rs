use super::{
    artifacts::{ArtifactLayout, ArtifactScope, RequestId, VideoState},
    error::{PipelineError, PipelineResult},
    session::KeyedLocks,
    ChatId,
};
use crate::{
    bot::{Messenger, PayloadSource},
    media::Transcoder,
};
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info, warn};

const DIAGNOSTICS_TAIL: usize = 400;

/// Where the audio flow stopped, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOutcome {
    /// Extracted from the video still on disk
    Delivered,
    /// Extracted after restoring the video from the message payload
    DeliveredReconstructed,
}

/// Derives an audio track from the video of an earlier request.
///
/// Runs for one request id at a time. A duplicate press waits for the first
/// run to finish, including its cleanup, and then runs from scratch.
pub struct AudioExtractor {
    layout: ArtifactLayout,
    transcoder: Arc<dyn Transcoder>,
    payloads: Arc<dyn PayloadSource>,
    locks: KeyedLocks<RequestId>,
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = text
        .char_indices()
        .nth(count - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &text[skip..]
}

impl AudioExtractor {
    pub fn new(
        layout: ArtifactLayout,
        transcoder: Arc<dyn Transcoder>,
        payloads: Arc<dyn PayloadSource>,
    ) -> Self {
        Self {
            layout,
            transcoder,
            payloads,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn extract(
        &self,
        messenger: &dyn Messenger,
        chat: ChatId,
        id: &RequestId,
        attached_video: Option<&str>,
    ) -> PipelineResult<AudioOutcome> {
        let _serialized = self.locks.lock(id).await;

        // Only the two conventional paths: an in-flight fetch keeps its .part
        let mut scope = self.layout.scope(id);
        scope.register(self.layout.video_path(id));
        scope.register(self.layout.audio_path(id));

        let result = self
            .extract_in_scope(messenger, chat, id, attached_video, &mut scope)
            .await;
        scope.release().await;
        result
    }

    async fn extract_in_scope(
        &self,
        messenger: &dyn Messenger,
        chat: ChatId,
        id: &RequestId,
        attached_video: Option<&str>,
        scope: &mut ArtifactScope,
    ) -> PipelineResult<AudioOutcome> {
        let video_path = self.layout.video_path(id);
        let audio_path = self.layout.audio_path(id);

        let state = self.layout.inspect_video(id).await?;
        debug!(request_id = %id, ?state, "Located source video");

        let (source, outcome): (PathBuf, AudioOutcome) = match state {
            VideoState::Present(path) => {
                scope.register(path.clone());
                (path, AudioOutcome::Delivered)
            }
            VideoState::InFlight => return Err(PipelineError::NotReadyYet),
            VideoState::Missing => {
                let Some(url) = attached_video else {
                    return Err(PipelineError::SourceMissing);
                };
                self.layout.ensure_dir().await?;
                self.payloads
                    .download(url, &video_path)
                    .await
                    .map_err(PipelineError::retrieval)?;
                (video_path.clone(), AudioOutcome::DeliveredReconstructed)
            }
        };

        let report = self
            .transcoder
            .extract_audio(&source, &audio_path)
            .await
            .map_err(PipelineError::transcode)?;

        if !report.success {
            warn!(request_id = %id, "ffmpeg stderr: {}", report.diagnostics);
            return Err(PipelineError::TranscodeFailed(
                tail(&report.diagnostics, DIAGNOSTICS_TAIL).to_string(),
            ));
        }

        if !tokio::fs::try_exists(&audio_path).await.unwrap_or(false) {
            warn!(request_id = %id, "Audio file was not created: {}", audio_path.display());
            return Err(PipelineError::TranscodeFailed(
                "no audio file was produced; the video may have no audio track".to_string(),
            ));
        }

        info!(request_id = %id, "Audio file created: {}", audio_path.display());

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| ArtifactLayout::video_stem(id));
        messenger
            .send_audio(
                chat,
                &audio_path,
                &format!("Audio - {stem}"),
                "🎵 Audio version of the video",
            )
            .await?;

        Ok(outcome)
    }
}
