mod artifacts;
mod audio;
mod error;
mod planner;
mod session;

pub use artifacts::RequestId;
pub use session::ChatId;

use artifacts::{ArtifactLayout, ArtifactScope};
use audio::AudioExtractor;
use error::{PipelineError, PipelineResult};
use planner::{DeliveryPlanner, DeliveryRequest};
use session::SessionStore;

use crate::{
    bot::{Callback, InboundEvent, MessageRef, Messenger, PayloadSource},
    config::Config,
    media::{build_choices, FormatCatalog, FormatSelector, Retriever, SourceLink, Transcoder},
};
use std::sync::Arc;
use tracing::{error, info, warn};

const CHECKING_FORMATS: &str = "⏳ Checking available formats...";
const DOWNLOADING: &str = "⏳ Downloading the video, please wait...";
const PICK_QUALITY: &str = "🎥 Choose the video quality:";
const EXTRACTING_AUDIO: &str = "⏳ Extracting audio, please wait...";

/// Wires the catalog, fetcher, planner and audio service to one messenger.
pub struct Pipeline {
    messenger: Arc<dyn Messenger>,
    retriever: Arc<dyn Retriever>,
    catalog: FormatCatalog,
    planner: DeliveryPlanner,
    audio: AudioExtractor,
    sessions: SessionStore,
    layout: ArtifactLayout,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        messenger: Arc<dyn Messenger>,
        retriever: Arc<dyn Retriever>,
        transcoder: Arc<dyn Transcoder>,
        payloads: Arc<dyn PayloadSource>,
    ) -> Self {
        let layout = ArtifactLayout::new(config.download_dir.clone());
        Self {
            catalog: FormatCatalog::new(retriever.clone()),
            planner: DeliveryPlanner::new(
                transcoder.clone(),
                config.inline_limit_bytes,
                config.compress_target_mb,
            ),
            audio: AudioExtractor::new(layout.clone(), transcoder, payloads),
            sessions: SessionStore::new(),
            messenger,
            retriever,
            layout,
        }
    }

    /// Handles one inbound event. Failures are reported to the chat and
    /// logged; they never escape.
    pub async fn handle_event(&self, event: InboundEvent) {
        let (chat, result) = match event {
            InboundEvent::Message { chat, text } => (chat, self.handle_message(chat, &text).await),
            InboundEvent::Callback {
                chat,
                message_id,
                data,
                video_url,
            } => {
                let message = message_id.map(|message_id| MessageRef { chat, message_id });
                let result = self
                    .handle_callback(chat, message, &data, video_url.as_deref())
                    .await;
                (chat, result)
            }
            InboundEvent::Ack { .. } => return,
        };

        if let Err(e) = result {
            warn!(chat, kind = e.kind(), "Request failed: {}", e);
            if let Err(send_err) = self.messenger.send_text(chat, &e.user_message()).await {
                error!(chat, "Failed to report error: {:#}", send_err);
            }
        }
    }

    /// A free-text message: remember its first link, then offer a quality
    /// menu or, when no formats can be listed, fetch at default quality.
    pub async fn handle_message(&self, chat: ChatId, text: &str) -> PipelineResult<()> {
        let link = SourceLink::extract(text.trim()).ok_or(PipelineError::LinkNotFound)?;
        info!(chat, network = %link.network(), "Received link: {}", link);

        let progress = self.messenger.send_text(chat, CHECKING_FORMATS).await?;
        self.sessions.remember(chat, link.clone(), progress.message_id);

        let formats = self.catalog.list_formats(link.as_str()).await;
        if formats.is_empty() {
            let notice = PipelineError::EnumerationUnavailable("no formats listed".to_string());
            info!(chat, kind = notice.kind(), "Falling back to default quality");
            let result: PipelineResult<()> = async {
                self.messenger
                    .edit_text(&progress, &notice.user_message(), &[])
                    .await?;
                self.fetch_and_deliver(chat, &link, &FormatSelector::Default, &progress)
                    .await
            }
            .await;
            return self.finish(&progress, result).await;
        }

        let choices = build_choices(&formats);
        let result = self
            .messenger
            .edit_text(&progress, PICK_QUALITY, &choices)
            .await
            .map_err(PipelineError::from);
        self.finish(&progress, result).await
    }

    pub async fn handle_callback(
        &self,
        chat: ChatId,
        message: Option<MessageRef>,
        data: &str,
        attached_video: Option<&str>,
    ) -> PipelineResult<()> {
        match Callback::parse(data) {
            Callback::Quality(selector) => self.handle_quality_pick(chat, message, selector).await,
            Callback::GetAudio(id) => {
                info!(chat, request_id = %id, "Audio requested");
                self.messenger.send_text(chat, EXTRACTING_AUDIO).await?;
                let outcome = self
                    .audio
                    .extract(self.messenger.as_ref(), chat, &id, attached_video)
                    .await?;
                info!(chat, request_id = %id, ?outcome, "Audio delivered");
                Ok(())
            }
            Callback::Unknown => {
                info!(chat, "Ignoring unknown callback: {}", data);
                Ok(())
            }
        }
    }

    async fn handle_quality_pick(
        &self,
        chat: ChatId,
        menu: Option<MessageRef>,
        selector: FormatSelector,
    ) -> PipelineResult<()> {
        // A pick from a menu that a newer link replaced is stale
        let link = self
            .sessions
            .recall(chat)
            .filter(|pending| menu.as_ref().map_or(true, |m| pending.offered_by(m.message_id)))
            .map(|pending| pending.link);
        let Some(link) = link else {
            if let Some(menu) = &menu {
                let err = PipelineError::SessionExpired;
                self.messenger.edit_text(menu, &err.user_message(), &[]).await?;
                warn!(chat, kind = err.kind(), "Quality pick without a pending link for this menu");
                return Ok(());
            }
            return Err(PipelineError::SessionExpired);
        };

        let progress = match menu {
            Some(menu) => {
                self.messenger.edit_text(&menu, DOWNLOADING, &[]).await?;
                menu
            }
            None => self.messenger.send_text(chat, DOWNLOADING).await?,
        };

        let result = self
            .fetch_and_deliver(chat, &link, &selector, &progress)
            .await;
        self.finish(&progress, result).await
    }

    /// Fetch, plan and deliver under a fresh request id. All artifacts of the
    /// request are removed when this returns, on every path.
    async fn fetch_and_deliver(
        &self,
        chat: ChatId,
        link: &SourceLink,
        selector: &FormatSelector,
        progress: &MessageRef,
    ) -> PipelineResult<()> {
        self.layout.ensure_dir().await?;

        let id = RequestId::new_id();
        let mut scope = self.layout.scope(&id);
        scope.register(self.layout.video_path(&id));
        scope.register(self.layout.compressed_path(&id));
        scope.register_prefix(ArtifactLayout::video_stem(&id));

        let result = self
            .deliver_in_scope(chat, link, selector, progress, &mut scope)
            .await;
        scope.release().await;
        result
    }

    async fn deliver_in_scope(
        &self,
        chat: ChatId,
        link: &SourceLink,
        selector: &FormatSelector,
        progress: &MessageRef,
        scope: &mut ArtifactScope,
    ) -> PipelineResult<()> {
        let id = scope.id().clone();
        let stem = ArtifactLayout::video_stem(&id);

        info!(chat, request_id = %id, format = %selector, "Fetching {}", link);
        let video = self
            .retriever
            .retrieve(link.as_str(), self.layout.dir(), &stem, selector)
            .await
            .map_err(PipelineError::retrieval)?;
        scope.register(video.clone());

        let caption = link.caption();
        let plan = self
            .planner
            .plan_and_execute(
                self.messenger.as_ref(),
                DeliveryRequest {
                    chat,
                    progress,
                    caption: &caption,
                    artifact: &video,
                },
                scope,
                &self.layout,
            )
            .await?;

        info!(chat, request_id = %id, ?plan, "Delivered");
        if let Err(e) = self.messenger.delete(progress).await {
            warn!(chat, "Failed to delete progress message: {:#}", e);
        }
        Ok(())
    }

    /// Reports a failure in place of the progress message.
    async fn finish(&self, progress: &MessageRef, result: PipelineResult<()>) -> PipelineResult<()> {
        let Err(e) = result else {
            return Ok(());
        };

        warn!(chat = progress.chat, kind = e.kind(), "Request failed: {}", e);
        self.messenger
            .edit_text(progress, &e.user_message(), &[])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
