use super::{InboundEvent, MessageRef, Messenger};
use crate::{media::Choice, pipeline::{ChatId, Pipeline}};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{oneshot, Mutex as AsyncMutex},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

/// Responses written to the client, one JSON object per line.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outbound<'a> {
    Text {
        chat: ChatId,
        message_id: i64,
        text: &'a str,
    },
    Edit {
        chat: ChatId,
        message_id: i64,
        text: &'a str,
        #[serde(skip_serializing_if = "<[Choice]>::is_empty")]
        choices: &'a [Choice],
    },
    Delete {
        chat: ChatId,
        message_id: i64,
    },
    Video {
        seq: u64,
        chat: ChatId,
        path: &'a Path,
        caption: &'a str,
        audio_callback: Option<&'a str>,
    },
    Document {
        seq: u64,
        chat: ChatId,
        path: &'a Path,
        caption: &'a str,
    },
    Audio {
        seq: u64,
        chat: ChatId,
        path: &'a Path,
        title: &'a str,
        caption: &'a str,
    },
}

type AckSender = oneshot::Sender<std::result::Result<(), String>>;

/// Messenger speaking newline-delimited JSON to a client process.
///
/// File deliveries carry a `seq` and block until the client answers with an
/// `ack` event for it, so the file is not removed while still being read.
pub struct BridgeMessenger<W> {
    out: AsyncMutex<W>,
    next_message_id: AtomicI64,
    next_seq: AtomicU64,
    pending: Mutex<HashMap<u64, AckSender>>,
    ack_timeout: Duration,
}

impl<W: AsyncWrite + Unpin + Send> BridgeMessenger<W> {
    pub fn new(out: W, ack_timeout: Duration) -> Self {
        Self {
            out: AsyncMutex::new(out),
            next_message_id: AtomicI64::new(1),
            next_seq: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            ack_timeout,
        }
    }

    async fn write_line(&self, event: &Outbound<'_>) -> Result<()> {
        let mut line = serde_json::to_vec(event).context("Failed to encode outbound event")?;
        line.push(b'\n');

        let mut out = self.out.lock().await;
        out.write_all(&line).await.context("Failed to write to client")?;
        out.flush().await.context("Failed to flush client output")?;
        Ok(())
    }

    async fn deliver_file(&self, seq: u64, event: &Outbound<'_>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(seq, tx);

        if let Err(e) = self.write_line(event).await {
            self.lock_pending().remove(&seq);
            return Err(e);
        }

        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(Ok(()))) => {
                debug!(seq, "Delivery acknowledged");
                Ok(())
            }
            Ok(Ok(Err(reason))) => Err(anyhow::anyhow!("Client rejected delivery: {}", reason)),
            Ok(Err(_)) => Err(anyhow::anyhow!("Delivery {} was dropped", seq)),
            Err(_) => {
                self.lock_pending().remove(&seq);
                Err(anyhow::anyhow!(
                    "Client did not acknowledge delivery within {}s",
                    self.ack_timeout.as_secs()
                ))
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, AckSender>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn resolve_ack(&self, seq: u64, ok: bool, error: Option<String>) {
        let Some(tx) = self.lock_pending().remove(&seq) else {
            warn!(seq, "Ack for unknown delivery");
            return;
        };
        let result = if ok {
            Ok(())
        } else {
            Err(error.unwrap_or_else(|| "unknown error".to_string()))
        };
        let _ = tx.send(result);
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Messenger for BridgeMessenger<W> {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageRef> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        self.write_line(&Outbound::Text {
            chat,
            message_id,
            text,
        })
        .await?;
        Ok(MessageRef { chat, message_id })
    }

    async fn edit_text(&self, message: &MessageRef, text: &str, choices: &[Choice]) -> Result<()> {
        self.write_line(&Outbound::Edit {
            chat: message.chat,
            message_id: message.message_id,
            text,
            choices,
        })
        .await
    }

    async fn delete(&self, message: &MessageRef) -> Result<()> {
        self.write_line(&Outbound::Delete {
            chat: message.chat,
            message_id: message.message_id,
        })
        .await
    }

    async fn send_video(
        &self,
        chat: ChatId,
        path: &Path,
        caption: &str,
        audio_callback: Option<&str>,
    ) -> Result<()> {
        let seq = self.next_seq();
        self.deliver_file(
            seq,
            &Outbound::Video {
                seq,
                chat,
                path,
                caption,
                audio_callback,
            },
        )
        .await
    }

    async fn send_document(&self, chat: ChatId, path: &Path, caption: &str) -> Result<()> {
        let seq = self.next_seq();
        self.deliver_file(
            seq,
            &Outbound::Document {
                seq,
                chat,
                path,
                caption,
            },
        )
        .await
    }

    async fn send_audio(
        &self,
        chat: ChatId,
        path: &Path,
        title: &str,
        caption: &str,
    ) -> Result<()> {
        let seq = self.next_seq();
        self.deliver_file(
            seq,
            &Outbound::Audio {
                seq,
                chat,
                path,
                title,
                caption,
            },
        )
        .await
    }
}

/// Reads events from `input` until it closes, handling each message or
/// button press in its own task.
pub async fn run<R, W>(
    pipeline: Arc<Pipeline>,
    messenger: Arc<BridgeMessenger<W>>,
    input: R,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    info!("Bridge starting...");

    let mut lines = BufReader::new(input).lines();
    let mut tasks = JoinSet::new();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Input stream ended");
                break;
            }
            Err(source) => {
                error!(?source, "Error reading event");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let event: InboundEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("Skipping malformed event: {}", e);
                continue;
            }
        };

        match event {
            InboundEvent::Ack { seq, ok, error } => messenger.resolve_ack(seq, ok, error),
            event => {
                let pipeline = pipeline.clone();
                tasks.spawn(async move { pipeline.handle_event(event).await });
            }
        }

        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                error!("Event task failed: {}", e);
            }
        }
    }

    while let Some(finished) = tasks.join_next().await {
        if let Err(e) = finished {
            error!("Event task failed: {}", e);
        }
    }

    Ok(())
}
