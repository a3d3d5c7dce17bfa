//! Test doubles for the REST collaborators and clock, shared by unit tests
//! and the integration tests under `tests/`.

use async_trait::async_trait;
use chatcore::time::Clock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, watch};

use crate::api::ChatBackend;
use crate::error::ApiError;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::socket::EventChannel;
use crate::transport::TransportFactory;
use crate::transport::mock::MockTransportFactory;
use crate::types::events::EventBus;
use crate::types::{Chat, ChatClient, ChatMessages, Message, MessageBody, Role};
use crate::upload::{MediaFile, MediaUploader, UploadProgress};

/// Answers every request with the same canned response and records what
/// was asked.
#[derive(Debug)]
pub struct RecordingHttpClient {
    status_code: u16,
    body: Vec<u8>,
    requests: AsyncMutex<Vec<HttpRequest>>,
}

impl RecordingHttpClient {
    pub fn with_response(status_code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code,
            body: body.into(),
            requests: AsyncMutex::new(Vec::new()),
        }
    }

    pub async fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl HttpClient for RecordingHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        self.requests.lock().await.push(request);
        Ok(HttpResponse {
            status_code: self.status_code,
            body: self.body.clone(),
        })
    }
}

/// In-memory chat backend and uploader.
#[derive(Default)]
pub struct MockBackend {
    chats: Mutex<Vec<Chat>>,
    threads: Mutex<HashMap<String, ChatMessages>>,
    fail_fetches: AtomicBool,
    fail_uploads: AtomicBool,
    chat_fetches: AtomicUsize,
    message_fetches: AtomicUsize,
    uploads: AtomicUsize,
}

impl MockBackend {
    pub fn new(chats: Vec<Chat>) -> Self {
        Self {
            chats: Mutex::new(chats),
            ..Default::default()
        }
    }

    pub fn set_chats(&self, chats: Vec<Chat>) {
        *self.chats.lock().unwrap_or_else(|e| e.into_inner()) = chats;
    }

    pub fn set_messages(&self, chat_id: &str, messages: Vec<Message>) {
        self.threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(chat_id.to_string())
            .or_default()
            .messages = messages;
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn chat_fetches(&self) -> usize {
        self.chat_fetches.load(Ordering::SeqCst)
    }

    pub fn message_fetches(&self) -> usize {
        self.message_fetches.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn check_fetch(&self, url: &str) -> Result<(), ApiError> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(ApiError::Request {
                url: url.to_string(),
                reason: "backend unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn fetch_chats(&self) -> Result<Vec<Chat>, ApiError> {
        self.chat_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_fetch("mock://chats")?;
        Ok(self.chats.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn fetch_chat_messages(&self, chat_id: &str) -> Result<ChatMessages, ApiError> {
        self.message_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_fetch(&format!("mock://chats/{chat_id}/messages"))?;
        Ok(self
            .threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(chat_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl MediaUploader for MockBackend {
    async fn upload(
        &self,
        file: &MediaFile,
        progress: &watch::Sender<UploadProgress>,
    ) -> Result<String, ApiError> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        let total = file.bytes.len() as u64;
        progress.send_replace(UploadProgress::Uploading { sent: 0, total });

        if self.fail_uploads.load(Ordering::SeqCst) {
            progress.send_replace(UploadProgress::Failed {
                reason: "upload rejected".to_string(),
            });
            return Err(ApiError::Status {
                url: "mock://media/upload".to_string(),
                status: 500,
                body: "upload rejected".to_string(),
            });
        }

        let url = format!("https://cdn.test/u/{n}");
        progress.send_replace(UploadProgress::Done { url: url.clone() });
        Ok(url)
    }
}

/// Clock that advances one millisecond per reading.
#[derive(Debug)]
pub struct StepClock(AtomicI64);

impl StepClock {
    pub fn starting_at(millis: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(millis)))
    }
}

impl Clock for StepClock {
    fn now_millis(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

pub fn text_message(id: &str, text: &str, timestamp: i64) -> Message {
    Message::new(
        id.to_string(),
        Role::User,
        timestamp,
        MessageBody::Text(text.to_string()),
    )
}

/// A chat with a named client, optionally with a last message at `last_at`.
pub fn chat(id: &str, name: &str, last_at: Option<i64>, unread: u32) -> Chat {
    let mut chat = Chat::new(
        id,
        ChatClient {
            profile_name: name.to_string(),
            identifier: format!("52155500{id}"),
        },
    );
    chat.last_message = last_at.map(|ts| text_message(&format!("{id}-last"), "…", ts));
    chat.new_client_messages_count = unread;
    chat
}

/// An [`EventChannel`] attached to a mock transport that has completed the
/// handshake. Handshake frames are already drained from the factory.
pub async fn open_channel(bus: Arc<EventBus>) -> (Arc<EventChannel>, MockTransportFactory) {
    let factory = MockTransportFactory::new();
    let channel = Arc::new(EventChannel::new(bus));
    if let Ok((transport, _events)) = factory.create_transport().await {
        channel.attach(transport).await;
    }
    channel.handle_frame(r#"0{"sid":"e1"}"#).await;
    channel.handle_frame(r#"40{"sid":"s1"}"#).await;
    factory.take_sent().await;
    (channel, factory)
}
