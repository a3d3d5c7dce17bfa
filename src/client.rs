use chatcore::quick_response::{QuickResponse, QuickResponseIndex};
use chatcore::time::Clock;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::api::{ChatBackend, RestBackend};
use crate::cache::{AssistantScope, ChatCacheStore};
use crate::chat_list::{ChatListView, ChatRow};
use crate::composer::{Composer, MediaSource};
use crate::config::ClientConfig;
use crate::error::{ApiError, ClientError, ComposeError};
use crate::http::HttpClient;
use crate::socket::EventChannel;
use crate::transport::{TransportEvent, TransportFactory};
use crate::types::events::EventBus;
use crate::types::{ChatMessages, Message};
use crate::upload::MediaUploader;

/// The operator console session: one event channel, one chat cache, one
/// composer and the sidebar state, wired together.
pub struct Client {
    config: ClientConfig,
    bus: Arc<EventBus>,
    channel: Arc<EventChannel>,
    store: Arc<ChatCacheStore>,
    composer: Composer,
    transport_factory: Arc<dyn TransportFactory>,
    chat_list: Mutex<ChatListView>,
    quick_responses: RwLock<QuickResponseIndex>,
    is_connecting: AtomicBool,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn store(&self) -> Arc<ChatCacheStore> {
        self.store.clone()
    }

    pub fn channel(&self) -> Arc<EventChannel> {
        self.channel.clone()
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Open the transport and start processing its events. The event channel
    /// becomes usable once the server accepts the namespace connect, which
    /// [`EventBus::connected`] reports.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.is_connecting.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyConnected);
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Relaxed);
        });

        let mut read_task = self.read_task.lock().await;
        if read_task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(ClientError::AlreadyConnected);
        }

        info!("Connecting to {}", self.config.socket_url);
        let (transport, events) = self
            .transport_factory
            .create_transport()
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        self.channel.attach(transport).await;

        let client = self.clone();
        *read_task = Some(tokio::spawn(async move {
            client.read_events_loop(events).await;
        }));
        Ok(())
    }

    async fn read_events_loop(&self, mut events: mpsc::Receiver<TransportEvent>) {
        debug!("Starting event loop");
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected => debug!("Transport connected"),
                TransportEvent::FrameReceived(frame) => {
                    if let Some(inbound) = self.channel.handle_frame(&frame).await {
                        self.store.handle_inbound(&inbound).await;
                    }
                }
                TransportEvent::Disconnected => break,
            }
        }
        info!("Transport disconnected");
        self.channel.detach().await;
    }

    pub async fn disconnect(&self) {
        info!("Disconnecting client intentionally.");
        if let Some(task) = self.read_task.lock().await.take() {
            task.abort();
        }
        self.channel.detach().await;
    }

    // --- chat list ---

    /// Chat list rows, fetching the list when it is not cached or stale.
    pub async fn load_chats(&self) -> Result<Vec<ChatRow>, ApiError> {
        self.store.fetch_chats().await?;
        Ok(self.chat_rows().await)
    }

    pub async fn chat_rows(&self) -> Vec<ChatRow> {
        self.chat_list.lock().await.rows(&self.store).await
    }

    pub async fn set_search(&self, search: impl Into<String>) {
        self.chat_list.lock().await.set_search(search);
    }

    pub async fn selected_chat(&self) -> Option<String> {
        self.chat_list.lock().await.selected().map(str::to_string)
    }

    /// Select a chat, clearing its unread counter locally, and load its
    /// message log.
    pub async fn open_chat(&self, chat_id: &str) -> Result<ChatMessages, ApiError> {
        self.chat_list.lock().await.select(&self.store, chat_id).await;
        self.store.fetch_chat_messages(chat_id).await
    }

    // --- assistants ---

    /// Emit the toggle and patch the cached conversations it covers.
    pub async fn set_assistant(&self, enabled: bool, scope: AssistantScope) -> Vec<String> {
        match &scope {
            AssistantScope::Chat(chat_id) => {
                self.channel.set_chat_assistant(chat_id, enabled).await
            }
            AssistantScope::All { user_id } => {
                self.channel.set_all_assistants(enabled, user_id).await
            }
        }
        self.store.set_assistant_enabled(enabled, &scope).await
    }

    /// Toggle the assistant on every conversation of the configured account.
    pub async fn set_all_assistants(&self, enabled: bool) -> Vec<String> {
        let scope = AssistantScope::All {
            user_id: self.config.user_id.clone(),
        };
        self.set_assistant(enabled, scope).await
    }

    // --- sending to the selected chat ---

    async fn require_selected(&self) -> Result<String, ComposeError> {
        self.selected_chat().await.ok_or_else(|| {
            warn!("Send attempted with no chat selected");
            ComposeError::NoChatSelected
        })
    }

    pub async fn send_text(&self, text: &str) -> Result<Message, ComposeError> {
        let chat_id = self.require_selected().await?;
        self.composer.send_text(&chat_id, text).await
    }

    pub async fn send_media(
        &self,
        source: MediaSource,
        caption: Option<&str>,
    ) -> Result<Message, ComposeError> {
        let chat_id = self.require_selected().await?;
        self.composer.send_media(&chat_id, source, caption).await
    }

    // --- quick responses ---

    pub async fn set_quick_responses(&self, quick_responses: Vec<QuickResponse>) {
        let index = QuickResponseIndex::new(quick_responses);
        debug!("Loaded {} quick responses", index.len());
        *self.quick_responses.write().await = index;
    }

    /// Autocomplete for composer input starting with `/`.
    pub async fn suggest_quick_responses(&self, input: &str) -> Vec<QuickResponse> {
        self.quick_responses
            .read()
            .await
            .suggest(input)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn send_quick_response(&self, id: &str) -> Result<Vec<Message>, ComposeError> {
        let chat_id = self.require_selected().await?;
        let quick_response = self
            .quick_responses
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ComposeError::UnknownQuickResponse(id.to_string()))?;
        self.composer
            .send_quick_response(&chat_id, &quick_response)
            .await
    }
}

#[derive(Default)]
pub struct ClientBuilder {
    config: Option<ClientConfig>,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    http_client: Option<Arc<dyn HttpClient>>,
    backend: Option<Arc<dyn ChatBackend>>,
    uploader: Option<Arc<dyn MediaUploader>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ClientBuilder {
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// HTTP client for the REST backend. Not needed when both a backend and
    /// an uploader are supplied.
    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn MediaUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Arc<Client>, ClientError> {
        let config = self.config.ok_or(ClientError::Incomplete("config"))?;
        let transport_factory = self
            .transport_factory
            .ok_or(ClientError::Incomplete("transport factory"))?;

        let rest = match (&self.backend, &self.uploader) {
            (Some(_), Some(_)) => None,
            _ => {
                let http_client = self
                    .http_client
                    .ok_or(ClientError::Incomplete("http client"))?;
                Some(Arc::new(
                    RestBackend::new(http_client, config.api_url.clone())
                        .with_auth_token(config.auth_token.clone()),
                ))
            }
        };
        let backend: Arc<dyn ChatBackend> = match (self.backend, &rest) {
            (Some(backend), _) => backend,
            (None, Some(rest)) => rest.clone(),
            (None, None) => return Err(ClientError::Incomplete("chat backend")),
        };
        let uploader: Arc<dyn MediaUploader> = match (self.uploader, &rest) {
            (Some(uploader), _) => uploader,
            (None, Some(rest)) => rest.clone(),
            (None, None) => return Err(ClientError::Incomplete("media uploader")),
        };

        let bus = Arc::new(EventBus::new());
        let channel =
            Arc::new(EventChannel::new(bus.clone()).with_auth_token(config.auth_token.clone()));
        let store = Arc::new(
            ChatCacheStore::new(backend, bus.clone())
                .with_freshness(config.chats_freshness, config.messages_freshness),
        );
        let mut composer = Composer::new(channel.clone(), store.clone(), uploader, bus.clone())
            .with_delivery(config.delivery);
        if let Some(clock) = self.clock {
            composer = composer.with_clock(clock);
        }

        info!("Client created for user {}", config.user_id);
        Ok(Arc::new(Client {
            config,
            bus,
            channel,
            store,
            composer,
            transport_factory,
            chat_list: Mutex::new(ChatListView::new()),
            quick_responses: RwLock::new(QuickResponseIndex::default()),
            is_connecting: AtomicBool::new(false),
            read_task: Mutex::new(None),
        }))
    }
}
