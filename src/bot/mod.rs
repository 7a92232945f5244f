pub mod bridge;
pub mod callback;
pub mod payload;

pub use callback::Callback;
pub use payload::{HttpPayloadSource, PayloadSource};

use crate::{media::Choice, pipeline::ChatId};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

/// A message previously sent to a chat, addressable for edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub chat: ChatId,
    pub message_id: i64,
}

/// Outbound side of the messaging client.
///
/// File deliveries return only once the client has read the file, so the
/// caller may delete it afterwards.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageRef>;

    /// Replace the text of `message`, optionally attaching a choice menu.
    async fn edit_text(&self, message: &MessageRef, text: &str, choices: &[Choice]) -> Result<()>;

    async fn delete(&self, message: &MessageRef) -> Result<()>;

    /// Inline video; `audio_callback` attaches the "get audio" button.
    async fn send_video(
        &self,
        chat: ChatId,
        path: &Path,
        caption: &str,
        audio_callback: Option<&str>,
    ) -> Result<()>;

    async fn send_document(&self, chat: ChatId, path: &Path, caption: &str) -> Result<()>;

    async fn send_audio(&self, chat: ChatId, path: &Path, title: &str, caption: &str)
        -> Result<()>;
}

/// Events arriving from the messaging client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Message {
        chat: ChatId,
        text: String,
    },
    Callback {
        chat: ChatId,
        /// The message carrying the pressed button
        #[serde(default)]
        message_id: Option<i64>,
        data: String,
        /// Download URL of the video attached to that message, if any
        #[serde(default)]
        video_url: Option<String>,
    },
    Ack {
        seq: u64,
        #[serde(default = "default_ack_ok")]
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

fn default_ack_ok() -> bool {
    true
}
