use super::*;
use crate::media::{Choice, EncodingOption, ExtractReport};
use anyhow::Result;
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};
use tempfile::TempDir;

const LIMIT: u64 = 1000;

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Text {
        chat: ChatId,
        text: String,
    },
    Edit {
        message_id: i64,
        text: String,
        choices: Vec<Choice>,
    },
    Delete {
        message_id: i64,
    },
    Video {
        caption: String,
        audio_callback: Option<String>,
        existed: bool,
    },
    Document {
        path: PathBuf,
        existed: bool,
    },
    Audio {
        title: String,
        existed: bool,
    },
}

#[derive(Default)]
struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    next_id: Mutex<i64>,
}

impl RecordingMessenger {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn push(&self, sent: Sent) {
        self.sent.lock().unwrap().push(sent);
    }

    fn videos(&self) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| matches!(s, Sent::Video { .. }))
            .collect()
    }

    fn last_edit(&self) -> Option<String> {
        self.sent().into_iter().rev().find_map(|s| match s {
            Sent::Edit { text, .. } => Some(text),
            _ => None,
        })
    }

    fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageRef> {
        let message_id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.push(Sent::Text {
            chat,
            text: text.to_string(),
        });
        Ok(MessageRef { chat, message_id })
    }

    async fn edit_text(&self, message: &MessageRef, text: &str, choices: &[Choice]) -> Result<()> {
        self.push(Sent::Edit {
            message_id: message.message_id,
            text: text.to_string(),
            choices: choices.to_vec(),
        });
        Ok(())
    }

    async fn delete(&self, message: &MessageRef) -> Result<()> {
        self.push(Sent::Delete {
            message_id: message.message_id,
        });
        Ok(())
    }

    async fn send_video(
        &self,
        _chat: ChatId,
        path: &Path,
        caption: &str,
        audio_callback: Option<&str>,
    ) -> Result<()> {
        self.push(Sent::Video {
            caption: caption.to_string(),
            audio_callback: audio_callback.map(str::to_string),
            existed: path.exists(),
        });
        Ok(())
    }

    async fn send_document(&self, _chat: ChatId, path: &Path, _caption: &str) -> Result<()> {
        self.push(Sent::Document {
            path: path.to_path_buf(),
            existed: path.exists(),
        });
        Ok(())
    }

    async fn send_audio(
        &self,
        _chat: ChatId,
        path: &Path,
        title: &str,
        _caption: &str,
    ) -> Result<()> {
        self.push(Sent::Audio {
            title: title.to_string(),
            existed: path.exists(),
        });
        Ok(())
    }
}

#[derive(Default)]
struct FakeRetriever {
    /// `None` makes enumeration fail
    formats: Option<Vec<EncodingOption>>,
    size: u64,
    fail: bool,
    calls: Mutex<Vec<(String, FormatSelector, String)>>,
}

impl FakeRetriever {
    fn calls(&self) -> Vec<(String, FormatSelector, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for FakeRetriever {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn enumerate(&self, _url: &str) -> Result<Vec<EncodingOption>> {
        self.formats
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Unsupported URL"))
    }

    async fn retrieve(
        &self,
        url: &str,
        dir: &Path,
        stem: &str,
        format: &FormatSelector,
    ) -> Result<PathBuf> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), format.clone(), stem.to_string()));

        if self.fail {
            std::fs::write(dir.join(format!("{stem}.f137.mp4.part")), b"partial")?;
            anyhow::bail!("HTTP Error 403: Forbidden");
        }

        let path = dir.join(format!("{stem}.mp4"));
        let file = std::fs::File::create(&path)?;
        file.set_len(self.size)?;
        Ok(path)
    }
}

#[derive(Default)]
struct FakeTranscoder {
    fail_compress: bool,
    /// Extraction exits cleanly but writes nothing
    silent_source: bool,
    fail_extract: bool,
    compress_calls: Mutex<Vec<u64>>,
    extract_calls: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn compress(&self, _input: &Path, output: &Path, target_size_mb: u64) -> Result<()> {
        self.compress_calls.lock().unwrap().push(target_size_mb);
        let mut passlog = output.as_os_str().to_owned();
        passlog.push("-passlog-0.log");
        std::fs::write(PathBuf::from(passlog), b"pass 1")?;
        if self.fail_compress {
            anyhow::bail!("Failed to encode video pass 2: invalid data");
        }
        std::fs::write(output, b"smaller")?;
        Ok(())
    }

    async fn extract_audio(&self, input: &Path, output: &Path) -> Result<ExtractReport> {
        self.extract_calls.lock().unwrap().push(input.to_path_buf());
        if self.fail_extract {
            return Ok(ExtractReport {
                success: false,
                diagnostics: "Output file #0 does not contain any stream".to_string(),
            });
        }
        if !self.silent_source {
            std::fs::write(output, b"ID3")?;
        }
        Ok(ExtractReport {
            success: true,
            diagnostics: String::new(),
        })
    }
}

#[derive(Default)]
struct FakePayloads {
    fail: bool,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl PayloadSource for FakePayloads {
    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.fail {
            anyhow::bail!("HTTP 404");
        }
        std::fs::write(dest, b"restored video")?;
        Ok(())
    }
}

struct Harness {
    dir: TempDir,
    messenger: Arc<RecordingMessenger>,
    retriever: Arc<FakeRetriever>,
    transcoder: Arc<FakeTranscoder>,
    payloads: Arc<FakePayloads>,
    pipeline: Pipeline,
}

impl Harness {
    fn new(retriever: FakeRetriever, transcoder: FakeTranscoder, payloads: FakePayloads) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            download_dir: dir.path().to_path_buf(),
            inline_limit_bytes: LIMIT,
            ..Config::default()
        };

        let messenger = Arc::new(RecordingMessenger::default());
        let retriever = Arc::new(retriever);
        let transcoder = Arc::new(transcoder);
        let payloads = Arc::new(payloads);
        let pipeline = Pipeline::new(
            &config,
            messenger.clone(),
            retriever.clone(),
            transcoder.clone(),
            payloads.clone(),
        );

        Self {
            dir,
            messenger,
            retriever,
            transcoder,
            payloads,
            pipeline,
        }
    }

    fn with_size(size: u64) -> Self {
        Self::new(
            FakeRetriever {
                formats: Some(Vec::new()),
                size,
                ..Default::default()
            },
            FakeTranscoder::default(),
            FakePayloads::default(),
        )
    }

    fn leftovers(&self) -> Vec<String> {
        std::fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    fn layout(&self) -> ArtifactLayout {
        ArtifactLayout::new(self.dir.path())
    }
}

fn option(id: &str, resolution: &str) -> EncodingOption {
    EncodingOption {
        format_id: id.to_string(),
        resolution: resolution.to_string(),
        approx_size: "1.0 MB".to_string(),
    }
}

#[tokio::test]
async fn test_message_without_link() {
    let h = Harness::with_size(10);
    let result = h.pipeline.handle_message(1, "hello there").await;
    assert!(matches!(result, Err(PipelineError::LinkNotFound)));

    h.pipeline
        .handle_event(InboundEvent::Message {
            chat: 1,
            text: "hello there".to_string(),
        })
        .await;
    assert_eq!(
        h.messenger.texts(),
        vec![PipelineError::LinkNotFound.user_message()]
    );
    assert!(h.retriever.calls().is_empty());
}

#[tokio::test]
async fn test_empty_catalog_fetches_default_quality() {
    let h = Harness::with_size(10);
    h.pipeline
        .handle_message(1, "check this out https://youtu.be/abc123 thanks")
        .await
        .unwrap();

    let calls = h.retriever.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "https://youtu.be/abc123");
    assert_eq!(calls[0].1, FormatSelector::Default);

    // No menu was offered
    assert!(h.messenger.sent().iter().all(|s| match s {
        Sent::Edit { choices, .. } => choices.is_empty(),
        _ => true,
    }));

    let videos = h.messenger.videos();
    assert_eq!(videos.len(), 1);
    let Sent::Video {
        caption,
        audio_callback,
        existed,
    } = &videos[0]
    else {
        unreachable!()
    };
    assert_eq!(caption, "YouTube video");
    assert!(*existed);

    // The affordance names the same id as the video artifact
    let stem = &calls[0].2;
    let id = stem.strip_prefix("video_").unwrap();
    assert_eq!(audio_callback.as_deref(), Some(format!("get_audio:{id}").as_str()));

    assert!(h.messenger.sent().contains(&Sent::Delete { message_id: 1 }));
    assert!(h.leftovers().is_empty());
}

#[tokio::test]
async fn test_enumeration_failure_falls_back_to_default() {
    let h = Harness::new(
        FakeRetriever {
            formats: None,
            size: 10,
            ..Default::default()
        },
        FakeTranscoder::default(),
        FakePayloads::default(),
    );
    h.pipeline
        .handle_message(1, "https://example.org/v/1")
        .await
        .unwrap();

    assert_eq!(h.retriever.calls()[0].1, FormatSelector::Default);
    assert_eq!(h.messenger.videos().len(), 1);
}

#[tokio::test]
async fn test_catalog_offers_menu_and_waits() {
    let h = Harness::new(
        FakeRetriever {
            formats: Some(vec![
                option("140", "unknown"),
                option("18", "360p"),
                option("22", "720p"),
            ]),
            size: 10,
            ..Default::default()
        },
        FakeTranscoder::default(),
        FakePayloads::default(),
    );
    h.pipeline
        .handle_message(3, "https://www.youtube.com/watch?v=x")
        .await
        .unwrap();

    assert!(h.retriever.calls().is_empty());
    let menu = h
        .messenger
        .sent()
        .into_iter()
        .find_map(|s| match s {
            Sent::Edit { choices, .. } if !choices.is_empty() => Some(choices),
            _ => None,
        })
        .unwrap();
    let callbacks: Vec<String> = menu.into_iter().map(|c| c.callback).collect();
    assert_eq!(
        callbacks,
        vec!["quality:18", "quality:22", "quality:best"]
    );
}

#[tokio::test]
async fn test_quality_pick_uses_remembered_link() {
    let h = Harness::new(
        FakeRetriever {
            formats: Some(vec![option("22", "720p")]),
            size: 10,
            ..Default::default()
        },
        FakeTranscoder::default(),
        FakePayloads::default(),
    );
    h.pipeline
        .handle_message(3, "https://www.tiktok.com/@a/video/1")
        .await
        .unwrap();
    h.pipeline
        .handle_callback(3, Some(MessageRef { chat: 3, message_id: 1 }), "quality:best", None)
        .await
        .unwrap();

    let calls = h.retriever.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "https://www.tiktok.com/@a/video/1");
    assert_eq!(calls[0].1, FormatSelector::Best);
    assert_eq!(h.messenger.videos().len(), 1);
    assert!(h.leftovers().is_empty());
}

#[tokio::test]
async fn test_quality_pick_from_replaced_menu_is_expired() {
    let h = Harness::new(
        FakeRetriever {
            formats: Some(vec![option("22", "720p")]),
            size: 10,
            ..Default::default()
        },
        FakeTranscoder::default(),
        FakePayloads::default(),
    );
    h.pipeline
        .handle_message(3, "https://www.tiktok.com/@a/video/1")
        .await
        .unwrap();
    h.pipeline
        .handle_message(3, "https://vimeo.com/2")
        .await
        .unwrap();

    let old_menu = MessageRef {
        chat: 3,
        message_id: 1,
    };
    h.pipeline
        .handle_callback(3, Some(old_menu), "quality:22", None)
        .await
        .unwrap();
    assert_eq!(
        h.messenger.last_edit(),
        Some(PipelineError::SessionExpired.user_message())
    );
    assert!(h.retriever.calls().is_empty());

    let new_menu = MessageRef {
        chat: 3,
        message_id: 2,
    };
    h.pipeline
        .handle_callback(3, Some(new_menu), "quality:22", None)
        .await
        .unwrap();
    let calls = h.retriever.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "https://vimeo.com/2");
    assert_eq!(calls[0].1, FormatSelector::Exact("22".to_string()));
}

#[tokio::test]
async fn test_quality_pick_without_session() {
    let h = Harness::with_size(10);
    let menu = MessageRef {
        chat: 9,
        message_id: 77,
    };
    h.pipeline
        .handle_callback(9, Some(menu), "quality:22", None)
        .await
        .unwrap();
    assert_eq!(
        h.messenger.last_edit(),
        Some(PipelineError::SessionExpired.user_message())
    );

    let result = h.pipeline.handle_callback(9, None, "quality:22", None).await;
    assert!(matches!(result, Err(PipelineError::SessionExpired)));
    assert!(h.retriever.calls().is_empty());
}

#[tokio::test]
async fn test_oversized_artifact_is_compressed_and_attached() {
    let h = Harness::with_size(LIMIT + 1);
    h.pipeline
        .handle_message(1, "https://vimeo.com/12345")
        .await
        .unwrap();

    assert_eq!(*h.transcoder.compress_calls.lock().unwrap(), vec![2000]);
    assert!(h.messenger.videos().is_empty());

    let document = h
        .messenger
        .sent()
        .into_iter()
        .find(|s| matches!(s, Sent::Document { .. }))
        .unwrap();
    let Sent::Document { path, existed } = document else {
        unreachable!()
    };
    assert!(existed);
    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with("_compressed.mp4"));

    assert!(h.leftovers().is_empty());
}

#[tokio::test]
async fn test_artifact_at_limit_is_sent_inline() {
    let h = Harness::with_size(LIMIT);
    h.pipeline
        .handle_message(1, "https://vimeo.com/12345")
        .await
        .unwrap();
    assert!(h.transcoder.compress_calls.lock().unwrap().is_empty());
    assert_eq!(h.messenger.videos().len(), 1);
}

#[tokio::test]
async fn test_compression_failure_is_reported_and_cleaned() {
    let h = Harness::new(
        FakeRetriever {
            formats: Some(Vec::new()),
            size: LIMIT * 5,
            ..Default::default()
        },
        FakeTranscoder {
            fail_compress: true,
            ..Default::default()
        },
        FakePayloads::default(),
    );
    h.pipeline
        .handle_message(1, "https://vimeo.com/12345")
        .await
        .unwrap();

    let report = h.messenger.last_edit().unwrap();
    assert!(report.contains("Failed to encode video pass 2"));
    assert!(!h
        .messenger
        .sent()
        .iter()
        .any(|s| matches!(s, Sent::Document { .. })));
    assert!(h.leftovers().is_empty());
}

#[tokio::test]
async fn test_retrieval_failure_is_reported_and_cleaned() {
    let h = Harness::new(
        FakeRetriever {
            formats: Some(Vec::new()),
            fail: true,
            ..Default::default()
        },
        FakeTranscoder::default(),
        FakePayloads::default(),
    );
    h.pipeline
        .handle_message(1, "https://instagram.com/reel/xyz")
        .await
        .unwrap();

    let report = h.messenger.last_edit().unwrap();
    assert!(report.contains("HTTP Error 403"));
    assert!(h.leftovers().is_empty());
}

#[tokio::test]
async fn test_concurrent_fetches_use_distinct_ids() {
    let h = Harness::with_size(10);
    let (a, b) = tokio::join!(
        h.pipeline.handle_message(1, "https://youtu.be/one"),
        h.pipeline.handle_message(2, "https://youtu.be/two"),
    );
    a.unwrap();
    b.unwrap();

    let calls = h.retriever.calls();
    assert_eq!(calls.len(), 2);
    assert_ne!(calls[0].2, calls[1].2);
    assert_eq!(h.messenger.videos().len(), 2);
    assert!(h.leftovers().is_empty());
}

#[tokio::test]
async fn test_audio_from_video_on_disk() {
    let h = Harness::with_size(10);
    let id = RequestId::new_id();
    std::fs::write(h.layout().video_path(&id), b"video").unwrap();

    h.pipeline
        .handle_callback(1, None, &format!("get_audio:{id}"), None)
        .await
        .unwrap();

    assert_eq!(h.transcoder.extract_calls.lock().unwrap().len(), 1);
    assert!(h.payloads.calls.lock().unwrap().is_empty());
    assert!(h.messenger.sent().contains(&Sent::Audio {
        title: format!("Audio - video_{id}"),
        existed: true,
    }));
    assert!(h.leftovers().is_empty());
}

#[tokio::test]
async fn test_audio_while_video_in_flight() {
    let h = Harness::with_size(10);
    let id = RequestId::new_id();
    let part = h.dir.path().join(format!("video_{id}.mp4.part"));
    std::fs::write(&part, b"partial").unwrap();

    let result = h
        .pipeline
        .handle_callback(1, None, &format!("get_audio:{id}"), Some("https://cdn/x.mp4"))
        .await;

    assert!(matches!(result, Err(PipelineError::NotReadyYet)));
    assert!(h.transcoder.extract_calls.lock().unwrap().is_empty());
    assert!(h.payloads.calls.lock().unwrap().is_empty());
    // The in-flight download is left alone
    assert!(part.exists());
}

#[tokio::test]
async fn test_audio_without_any_source() {
    let h = Harness::with_size(10);
    let id = RequestId::new_id();

    let result = h
        .pipeline
        .handle_callback(1, None, &format!("get_audio:{id}"), None)
        .await;

    assert!(matches!(result, Err(PipelineError::SourceMissing)));
    assert!(h.transcoder.extract_calls.lock().unwrap().is_empty());
    assert!(h.leftovers().is_empty());
}

#[tokio::test]
async fn test_audio_reconstructed_from_payload() {
    let h = Harness::with_size(10);
    let id = RequestId::new_id();

    h.pipeline
        .handle_callback(
            1,
            None,
            &format!("get_audio:{id}"),
            Some("https://files.example/video.mp4"),
        )
        .await
        .unwrap();

    assert_eq!(
        *h.payloads.calls.lock().unwrap(),
        vec!["https://files.example/video.mp4".to_string()]
    );
    assert_eq!(
        *h.transcoder.extract_calls.lock().unwrap(),
        vec![h.layout().video_path(&id)]
    );
    assert!(h
        .messenger
        .sent()
        .iter()
        .any(|s| matches!(s, Sent::Audio { existed: true, .. })));
    assert!(h.leftovers().is_empty());
}

#[tokio::test]
async fn test_audio_payload_download_failure() {
    let h = Harness::new(
        FakeRetriever::default(),
        FakeTranscoder::default(),
        FakePayloads {
            fail: true,
            ..Default::default()
        },
    );
    let id = RequestId::new_id();

    let result = h
        .pipeline
        .handle_callback(1, None, &format!("get_audio:{id}"), Some("https://gone"))
        .await;

    assert!(matches!(result, Err(PipelineError::RetrievalFailed(_))));
    assert!(h.leftovers().is_empty());
}

#[tokio::test]
async fn test_audio_extraction_failures() {
    for transcoder in [
        FakeTranscoder {
            fail_extract: true,
            ..Default::default()
        },
        FakeTranscoder {
            silent_source: true,
            ..Default::default()
        },
    ] {
        let h = Harness::new(FakeRetriever::default(), transcoder, FakePayloads::default());
        let id = RequestId::new_id();
        std::fs::write(h.layout().video_path(&id), b"video").unwrap();

        let result = h
            .pipeline
            .handle_callback(1, None, &format!("get_audio:{id}"), None)
            .await;

        assert!(matches!(result, Err(PipelineError::TranscodeFailed(_))));
        assert!(!h
            .messenger
            .sent()
            .iter()
            .any(|s| matches!(s, Sent::Audio { .. })));
        assert!(h.leftovers().is_empty());
    }
}

#[tokio::test]
async fn test_duplicate_audio_requests_are_serialized() {
    let h = Harness::with_size(10);
    let id = RequestId::new_id();
    std::fs::write(h.layout().video_path(&id), b"video").unwrap();
    let data = format!("get_audio:{id}");

    let (a, b) = tokio::join!(
        h.pipeline
            .handle_callback(1, None, &data, Some("https://files.example/v.mp4")),
        h.pipeline
            .handle_callback(1, None, &data, Some("https://files.example/v.mp4")),
    );
    a.unwrap();
    b.unwrap();

    // The second run found the video gone and restored it from the payload
    assert_eq!(h.transcoder.extract_calls.lock().unwrap().len(), 2);
    assert_eq!(h.payloads.calls.lock().unwrap().len(), 1);
    assert!(h.leftovers().is_empty());
}

#[tokio::test]
async fn test_unknown_callback_is_ignored() {
    let h = Harness::with_size(10);
    h.pipeline
        .handle_callback(1, None, "share:whatever", None)
        .await
        .unwrap();
    h.pipeline
        .handle_callback(1, None, "get_audio:not-an-id", None)
        .await
        .unwrap();
    assert!(h.messenger.sent().is_empty());
}

#[tokio::test]
async fn test_event_errors_are_reported_to_chat() {
    let h = Harness::with_size(10);
    let id = RequestId::new_id();
    h.pipeline
        .handle_event(InboundEvent::Callback {
            chat: 4,
            message_id: Some(12),
            data: format!("get_audio:{id}"),
            video_url: None,
        })
        .await;

    assert_eq!(
        h.messenger.texts().last(),
        Some(&PipelineError::SourceMissing.user_message())
    );
}
