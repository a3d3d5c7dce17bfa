//! Turns operator input into messages, emits them and applies them
//! optimistically to the chat cache.
//!
//! A send runs `Idle -> Validating -> Sending -> OptimisticallyApplied -> Idle`.
//! "Emitted" is terminal success: nothing is rolled back if the server later
//! rejects a message.

use chatcore::ids::MessageIdGenerator;
use chatcore::quick_response::{QuickResponse, validate_batch};
use chatcore::time::{Clock, SystemClock};
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

use crate::cache::ChatCacheStore;
use crate::config::Delivery;
use crate::error::ComposeError;
use crate::socket::EventChannel;
use crate::types::events::{EventBus, Notice};
use crate::types::{Media, MediaKind, Message, MessageBody, OutgoingMessage};
use crate::upload::{MediaFile, MediaUploader, UploadProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComposeState {
    #[default]
    Idle,
    Validating,
    Sending,
    OptimisticallyApplied,
}

/// Where an attachment comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Already hosted, e.g. picked from a quick response.
    Uploaded(Media),
    /// A local file that must be uploaded first.
    File(MediaFile),
}

/// One item typed or attached by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Draft {
    Text(String),
    Media {
        source: MediaSource,
        caption: Option<String>,
    },
}

/// Outcome of [`Composer::send_drafts`]. Drafts that failed are reported by
/// index; the ones sent before and after them are not rolled back.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub sent: Vec<Message>,
    pub failed: Vec<(usize, ComposeError)>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Composer {
    channel: Arc<EventChannel>,
    store: Arc<ChatCacheStore>,
    uploader: Arc<dyn MediaUploader>,
    bus: Arc<EventBus>,
    ids: MessageIdGenerator,
    clock: Arc<dyn Clock>,
    delivery: Delivery,
    state: watch::Sender<ComposeState>,
    upload_progress: watch::Sender<UploadProgress>,
    // Serializes sends so the cache sees them in call order.
    send_lock: Mutex<()>,
}

impl Composer {
    pub fn new(
        channel: Arc<EventChannel>,
        store: Arc<ChatCacheStore>,
        uploader: Arc<dyn MediaUploader>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            channel,
            store,
            uploader,
            bus,
            ids: MessageIdGenerator::new(),
            clock: Arc::new(SystemClock),
            delivery: Delivery::default(),
            state: watch::channel(ComposeState::Idle).0,
            upload_progress: watch::channel(UploadProgress::Pending).0,
            send_lock: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn state(&self) -> watch::Receiver<ComposeState> {
        self.state.subscribe()
    }

    pub fn upload_progress(&self) -> watch::Receiver<UploadProgress> {
        self.upload_progress.subscribe()
    }

    fn set_state(&self, state: ComposeState) {
        self.state.send_replace(state);
    }

    fn stamp(&self, body: MessageBody) -> Message {
        let timestamp = self.clock.now_millis();
        Message::business(self.ids.next_id(timestamp), timestamp, body)
    }

    fn text_message(&self, text: &str) -> Result<Message, ComposeError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(ComposeError::EmptyMessage);
        }
        Ok(self.stamp(MessageBody::Text(content.to_string())))
    }

    async fn resolve_media(&self, source: MediaSource) -> Result<Media, ComposeError> {
        let file = match source {
            MediaSource::Uploaded(media) => return Ok(media),
            MediaSource::File(file) => file,
        };

        self.upload_progress.send_replace(UploadProgress::Pending);
        match self.uploader.upload(&file, &self.upload_progress).await {
            Ok(url) => {
                let mut media = Media::new(MediaKind::from_mimetype(&file.mimetype), url)
                    .with_mimetype(file.mimetype.clone());
                if let Some(name) = file.filename {
                    media = media.with_filename(name);
                }
                Ok(media)
            }
            Err(e) => {
                warn!("Upload failed, message not sent: {e}");
                self.bus.notify(Notice::destructive(
                    "Upload failed",
                    format!("The file could not be uploaded: {e}"),
                ));
                Err(ComposeError::Upload(e.to_string()))
            }
        }
    }

    async fn media_message(
        &self,
        source: MediaSource,
        caption: Option<&str>,
    ) -> Result<Message, ComposeError> {
        let media = self.resolve_media(source).await?.normalized();
        Ok(self.stamp(MessageBody::captioned(media, caption)))
    }

    /// Emit, then apply optimistically. In acknowledged mode the ack is
    /// awaited in the background; a missing ack only produces a notice.
    async fn dispatch(&self, conversation_id: &str, message: Message) {
        self.set_state(ComposeState::Sending);
        let outgoing = OutgoingMessage {
            conversation_id: conversation_id.to_string(),
            message,
        };

        match self.delivery {
            Delivery::FireAndForget => self.channel.send_message(&outgoing).await,
            Delivery::Acknowledged { timeout } => {
                match self.channel.send_message_acknowledged(&outgoing).await {
                    Ok(pending) => {
                        let bus = self.bus.clone();
                        let message_id = outgoing.message.id.clone();
                        tokio::spawn(async move {
                            if let Err(e) = pending.wait(timeout).await {
                                warn!("Message {message_id} not confirmed: {e}");
                                bus.notify(Notice::destructive(
                                    "Message not confirmed",
                                    "The server did not confirm a sent message. It may not have been delivered.",
                                ));
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Message {} not emitted: {e}", outgoing.message.id);
                        self.bus.notify(Notice::destructive(
                            "Message not sent",
                            "The real-time channel is unavailable.",
                        ));
                    }
                }
            }
        }

        let outcome = self
            .store
            .append_message(conversation_id, outgoing.message)
            .await;
        debug!("Sent to {conversation_id}: {outcome:?}");
        self.set_state(ComposeState::OptimisticallyApplied);
    }

    /// Send trimmed text. Whitespace-only input sends nothing and leaves the
    /// cache untouched.
    pub async fn send_text(&self, conversation_id: &str, text: &str) -> Result<Message, ComposeError> {
        let _lock = self.send_lock.lock().await;
        let _guard = scopeguard::guard((), |_| self.set_state(ComposeState::Idle));

        self.set_state(ComposeState::Validating);
        let message = self.text_message(text)?;
        self.dispatch(conversation_id, message.clone()).await;
        Ok(message)
    }

    /// Send one attachment, uploading it first when it is a local file. The
    /// caption becomes the message content.
    pub async fn send_media(
        &self,
        conversation_id: &str,
        source: MediaSource,
        caption: Option<&str>,
    ) -> Result<Message, ComposeError> {
        let _lock = self.send_lock.lock().await;
        let _guard = scopeguard::guard((), |_| self.set_state(ComposeState::Idle));

        self.set_state(ComposeState::Validating);
        let message = self.media_message(source, caption).await?;
        self.dispatch(conversation_id, message.clone()).await;
        Ok(message)
    }

    /// Expand a quick response and send every message in order. The whole
    /// batch is checked before the first emit.
    pub async fn send_quick_response(
        &self,
        conversation_id: &str,
        quick_response: &QuickResponse,
    ) -> Result<Vec<Message>, ComposeError> {
        let _lock = self.send_lock.lock().await;
        let _guard = scopeguard::guard((), |_| self.set_state(ComposeState::Idle));

        self.set_state(ComposeState::Validating);
        let messages = quick_response.expand(&self.ids, self.clock.as_ref());
        if let Err(e) = validate_batch(&messages) {
            warn!("Quick response {} not sent: {e}", quick_response.id);
            self.bus.notify(Notice::info(
                "Quick response not sent",
                format!("/{} has nothing to send.", quick_response.shortcut),
            ));
            return Err(e);
        }

        for message in &messages {
            self.dispatch(conversation_id, message.clone()).await;
        }
        Ok(messages)
    }

    /// Send text and attachments in order. Each draft stands alone: a failed
    /// upload skips that draft only.
    pub async fn send_drafts(&self, conversation_id: &str, drafts: Vec<Draft>) -> BatchReport {
        let _lock = self.send_lock.lock().await;
        let _guard = scopeguard::guard((), |_| self.set_state(ComposeState::Idle));

        let mut report = BatchReport::default();
        for (index, draft) in drafts.into_iter().enumerate() {
            self.set_state(ComposeState::Validating);
            let message = match draft {
                Draft::Text(text) => self.text_message(&text),
                Draft::Media { source, caption } => {
                    self.media_message(source, caption.as_deref()).await
                }
            };
            match message {
                Ok(message) => {
                    self.dispatch(conversation_id, message.clone()).await;
                    report.sent.push(message);
                }
                Err(e) => {
                    debug!("Draft {index} for {conversation_id} skipped: {e}");
                    report.failed.push((index, e));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockBackend, StepClock, chat, open_channel};
    use crate::transport::mock::MockTransportFactory;
    use crate::types::Role;
    use crate::types::events::Severity;
    use chatcore::frame::Packet;
    use std::collections::HashSet;
    use std::time::Duration;

    struct Fixture {
        composer: Composer,
        store: Arc<ChatCacheStore>,
        backend: Arc<MockBackend>,
        bus: Arc<EventBus>,
        factory: MockTransportFactory,
    }

    async fn fixture() -> Fixture {
        let bus = Arc::new(EventBus::new());
        let backend = Arc::new(MockBackend::new(vec![
            chat("1", "Ana", Some(100), 0),
            chat("2", "Beto", Some(200), 0),
        ]));
        let store = Arc::new(ChatCacheStore::new(backend.clone(), bus.clone()));
        store.fetch_chats().await.unwrap();
        store.fetch_chat_messages("1").await.unwrap();

        let (channel, factory) = open_channel(bus.clone()).await;
        let composer = Composer::new(channel, store.clone(), backend.clone(), bus.clone())
            .with_clock(StepClock::starting_at(300));
        Fixture {
            composer,
            store,
            backend,
            bus,
            factory,
        }
    }

    fn emitted_messages(frames: &[String]) -> Vec<OutgoingMessage> {
        frames
            .iter()
            .filter_map(|f| match Packet::decode(f) {
                Ok(Packet::Event { data, .. }) => serde_json::from_value(data).ok(),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn text_is_trimmed_emitted_and_applied() {
        let f = fixture().await;

        let message = f.composer.send_text("1", "  Hola  ").await.unwrap();
        assert_eq!(message.content, "Hola");
        assert_eq!(message.role, Role::Business);
        assert!(message.media.is_none());

        let emitted = emitted_messages(&f.factory.sent_frames().await);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].conversation_id, "1");
        assert_eq!(emitted[0].message, message);

        let log = f.store.messages("1").unwrap();
        assert_eq!(log.messages.last(), Some(&message));
        let chats = f.store.chats().await.unwrap();
        assert_eq!(chats[0].id, "1");
        assert_eq!(*f.composer.state().borrow(), ComposeState::Idle);
    }

    #[tokio::test]
    async fn whitespace_text_sends_nothing() {
        let f = fixture().await;
        let mut changes = f.bus.cache_changed.subscribe();
        let before = f.store.chats().await;

        assert_eq!(
            f.composer.send_text("1", "   ").await,
            Err(ComposeError::EmptyMessage)
        );

        assert!(f.factory.sent_frames().await.is_empty());
        assert!(changes.try_recv().is_err());
        assert_eq!(f.store.chats().await, before);
        assert!(f.store.messages("1").unwrap().messages.is_empty());
        assert_eq!(*f.composer.state().borrow(), ComposeState::Idle);
    }

    #[tokio::test]
    async fn quick_response_sends_text_then_media() {
        let f = fixture().await;
        let qr = QuickResponse {
            id: "qr".into(),
            shortcut: "promo".into(),
            content: "Promo".into(),
            media: vec![
                Media::new(MediaKind::Image, "https://cdn/a.jpg"),
                Media::new(MediaKind::Document, "https://cdn/catalogo")
                    .with_mimetype("application/pdf"),
            ],
        };

        let messages = f.composer.send_quick_response("1", &qr).await.unwrap();
        assert_eq!(messages.len(), 3);
        let distinct: HashSet<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(distinct.len(), 3);

        let emitted = emitted_messages(&f.factory.sent_frames().await);
        let emitted_ids: Vec<_> = emitted.iter().map(|o| o.message.id.clone()).collect();
        let sent_ids: Vec<_> = messages.iter().map(|m| m.id.clone()).collect();
        assert_eq!(emitted_ids, sent_ids);
        assert_eq!(emitted[0].message.content, "Promo");
        assert_eq!(
            emitted[2].message.media.as_ref().unwrap().filename.as_deref(),
            Some("catalogo.pdf")
        );

        let logged: Vec<_> = f
            .store
            .messages("1")
            .unwrap()
            .messages
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(logged, sent_ids);
    }

    #[tokio::test]
    async fn empty_quick_response_is_rejected_with_notice() {
        let f = fixture().await;
        let mut notices = f.bus.notice.subscribe();
        let qr = QuickResponse {
            id: "qr".into(),
            shortcut: "vacio".into(),
            content: "  ".into(),
            media: vec![],
        };

        assert_eq!(
            f.composer.send_quick_response("1", &qr).await,
            Err(ComposeError::EmptyBatch)
        );
        assert!(f.factory.sent_frames().await.is_empty());
        assert_eq!(notices.recv().await.unwrap().severity, Severity::Info);
    }

    #[tokio::test]
    async fn uploaded_file_becomes_media_message() {
        let f = fixture().await;
        let file = MediaFile::new(vec![1, 2, 3], "image/png");

        let message = f
            .composer
            .send_media("1", MediaSource::File(file), Some(" mira "))
            .await
            .unwrap();

        let media = message.media.as_ref().unwrap();
        assert_eq!(media.kind, MediaKind::Image);
        assert_eq!(media.url, "https://cdn.test/u/0");
        assert_eq!(media.filename.as_deref(), Some("0.png"));
        assert_eq!(message.content, "mira");
        assert_eq!(
            *f.composer.upload_progress().borrow(),
            UploadProgress::Done {
                url: "https://cdn.test/u/0".into()
            }
        );
    }

    #[tokio::test]
    async fn uploaded_media_keeps_its_own_caption() {
        let f = fixture().await;
        let media = Media::new(MediaKind::Image, "https://cdn/menu.jpg").with_caption("Nuestro menú");

        let message = f
            .composer
            .send_media("1", MediaSource::Uploaded(media.clone()), None)
            .await
            .unwrap();
        assert_eq!(message.content, "Nuestro menú");

        let message = f
            .composer
            .send_media("1", MediaSource::Uploaded(media), Some("Carta"))
            .await
            .unwrap();
        assert_eq!(message.content, "Carta");

        let qr = QuickResponse {
            id: "qr".into(),
            shortcut: "menu".into(),
            content: String::new(),
            media: vec![Media::new(MediaKind::Image, "https://cdn/m.jpg").with_caption("Nuestro menú")],
        };
        let messages = f.composer.send_quick_response("1", &qr).await.unwrap();
        let emitted = emitted_messages(&f.factory.sent_frames().await);
        assert_eq!(messages[0].content, "Nuestro menú");
        assert_eq!(emitted.last().unwrap().message.content, "Nuestro menú");
    }

    #[tokio::test]
    async fn failed_upload_aborts_only_that_draft() {
        let f = fixture().await;
        let mut notices = f.bus.notice.subscribe();
        f.backend.set_fail_uploads(true);

        let report = f
            .composer
            .send_drafts(
                "1",
                vec![
                    Draft::Text("antes".into()),
                    Draft::Media {
                        source: MediaSource::File(MediaFile::new(vec![0; 8], "video/mp4")),
                        caption: None,
                    },
                    Draft::Text("después".into()),
                ],
            )
            .await;

        assert_eq!(report.sent.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, 1);
        assert!(matches!(report.failed[0].1, ComposeError::Upload(_)));

        let contents: Vec<_> = f
            .store
            .messages("1")
            .unwrap()
            .messages
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["antes", "después"]);
        assert_eq!(emitted_messages(&f.factory.sent_frames().await).len(), 2);

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.severity, Severity::Destructive);
        assert_eq!(notice.title, "Upload failed");
    }

    #[tokio::test]
    async fn send_to_uncached_chat_still_emits() {
        let f = fixture().await;
        f.composer.send_text("99", "hola").await.unwrap();
        assert_eq!(emitted_messages(&f.factory.sent_frames().await).len(), 1);
        assert!(f.store.messages("99").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_notifies_without_rollback() {
        let f = fixture().await;
        let composer = f.composer.with_delivery(Delivery::Acknowledged {
            timeout: Duration::from_secs(2),
        });
        let mut notices = f.bus.notice.subscribe();

        let message = composer.send_text("1", "hola").await.unwrap();
        let frames = f.factory.sent_frames().await;
        assert!(frames[0].starts_with("420["));

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.severity, Severity::Destructive);
        assert_eq!(
            f.store.messages("1").unwrap().messages.last().map(|m| &m.id),
            Some(&message.id)
        );
    }

    #[tokio::test]
    async fn acked_send_raises_no_notice() {
        let f = fixture().await;
        let channel = f.composer.channel.clone();
        let composer = f.composer.with_delivery(Delivery::Acknowledged {
            timeout: Duration::from_secs(5),
        });
        let mut notices = f.bus.notice.subscribe();

        composer.send_text("1", "hola").await.unwrap();
        channel.handle_frame("430[]").await;
        tokio::task::yield_now().await;
        assert!(notices.try_recv().is_err());
    }
}
