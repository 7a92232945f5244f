use super::{
    artifacts::{ArtifactLayout, ArtifactScope},
    error::{PipelineError, PipelineResult},
    ChatId,
};
use crate::{
    bot::{Callback, MessageRef, Messenger},
    media::Transcoder,
    utils::{format_file_size, format_number},
};
use std::{path::Path, sync::Arc};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPlan {
    /// Inline video with an audio affordance
    Direct,
    /// Compress to the target budget, then send as a generic attachment
    Compress,
}

pub fn plan(size: u64, limit_bytes: u64) -> DeliveryPlan {
    if size <= limit_bytes {
        DeliveryPlan::Direct
    } else {
        DeliveryPlan::Compress
    }
}

pub struct DeliveryRequest<'a> {
    pub chat: ChatId,
    pub progress: &'a MessageRef,
    pub caption: &'a str,
    pub artifact: &'a Path,
}

pub struct DeliveryPlanner {
    transcoder: Arc<dyn Transcoder>,
    limit_bytes: u64,
    target_mb: u64,
}

impl DeliveryPlanner {
    pub fn new(transcoder: Arc<dyn Transcoder>, limit_bytes: u64, target_mb: u64) -> Self {
        Self {
            transcoder,
            limit_bytes,
            target_mb,
        }
    }

    /// Delivers `request.artifact`, compressing it first when it exceeds the
    /// inline limit. Every file it creates is registered with `scope`.
    pub async fn plan_and_execute(
        &self,
        messenger: &dyn Messenger,
        request: DeliveryRequest<'_>,
        scope: &mut ArtifactScope,
        layout: &ArtifactLayout,
    ) -> PipelineResult<DeliveryPlan> {
        let size = tokio::fs::metadata(request.artifact).await?.len();
        let decision = plan(size, self.limit_bytes);
        info!(
            request_id = %scope.id(),
            "Artifact is {} bytes (limit {}), plan: {:?}",
            format_number(size),
            format_number(self.limit_bytes),
            decision
        );

        match decision {
            DeliveryPlan::Direct => {
                let audio = Callback::audio_data(scope.id());
                messenger
                    .send_video(request.chat, request.artifact, request.caption, Some(&audio))
                    .await?;
            }
            DeliveryPlan::Compress => {
                messenger
                    .edit_text(
                        request.progress,
                        &format!(
                            "⚠️ File is larger than {}! Compressing the video, please wait...",
                            format_file_size(self.limit_bytes)
                        ),
                        &[],
                    )
                    .await?;

                let compressed = layout.compressed_path(scope.id());
                scope.register(compressed.clone());

                self.transcoder
                    .compress(request.artifact, &compressed, self.target_mb)
                    .await
                    .map_err(PipelineError::transcode)?;

                messenger
                    .send_document(request.chat, &compressed, request.caption)
                    .await?;
            }
        }

        Ok(decision)
    }
}
