//! The shared event channel to the backend.
//!
//! One [`EventChannel`] exists per client. It speaks Socket.IO over whatever
//! [`Transport`] is attached: answers pings, joins the default namespace after
//! the Engine.IO handshake, publishes inbound events on the [`EventBus`] and
//! emits outbound events. Plain emits are fire-and-forget; failures are
//! logged and never reach the caller.

use chatcore::frame::Packet;
use log::{debug, info, trace, warn};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};

use crate::error::TransportError;
use crate::transport::Transport;
use crate::types::OutgoingMessage;
use crate::types::events::{Connected, Disconnected, EventBus, InboundEvent, Notice};

pub const NEW_BUSINESS_MESSAGE: &str = "newBusinessMessage";
pub const ENABLE_ALL_ASSISTANTS: &str = "enableAllAssistants";
pub const DISABLE_ALL_ASSISTANTS: &str = "disableAllAssistants";
pub const TOGGLE_ASSISTANT: &str = "toggleAssistant";

type AckWaiters = Mutex<HashMap<u64, oneshot::Sender<Vec<Value>>>>;

/// An emitted event waiting for its acknowledgement.
#[derive(Debug)]
pub struct PendingAck {
    event: String,
    ack_id: u64,
    rx: oneshot::Receiver<Vec<Value>>,
    waiters: Weak<AckWaiters>,
}

impl PendingAck {
    /// Wait for the server's answer. On timeout the waiter is unregistered,
    /// so a late ack is ignored.
    pub async fn wait(self, timeout: Duration) -> Result<Vec<Value>, TransportError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(args)) => Ok(args),
            Ok(Err(_)) => Err(TransportError::AckDropped { event: self.event }),
            Err(_) => {
                if let Some(waiters) = self.waiters.upgrade() {
                    waiters.lock().await.remove(&self.ack_id);
                }
                Err(TransportError::AckTimeout {
                    event: self.event,
                    timeout,
                })
            }
        }
    }
}

pub struct EventChannel {
    transport: Mutex<Option<Arc<dyn Transport>>>,
    /// Namespace joined; events may flow.
    is_open: AtomicBool,
    ack_waiters: Arc<AckWaiters>,
    next_ack_id: AtomicU64,
    auth: Option<Value>,
    bus: Arc<EventBus>,
}

impl EventChannel {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            transport: Mutex::new(None),
            is_open: AtomicBool::new(false),
            ack_waiters: Arc::new(Mutex::new(HashMap::new())),
            next_ack_id: AtomicU64::new(0),
            auth: None,
            bus,
        }
    }

    /// Token sent in the namespace connect packet.
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth = token.map(|token| json!({ "token": token }));
        self
    }

    pub fn is_connected(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    pub async fn attach(&self, transport: Arc<dyn Transport>) {
        *self.transport.lock().await = Some(transport);
    }

    /// Drop the transport. Pending acknowledgements fail with
    /// [`TransportError::AckDropped`].
    pub async fn detach(&self) {
        let transport = self.transport.lock().await.take();
        let was_open = self.is_open.swap(false, Ordering::AcqRel);
        self.ack_waiters.lock().await.clear();

        if let Some(transport) = transport {
            transport.disconnect().await;
        }
        if was_open {
            info!("Event channel closed");
            let _ = self.bus.disconnected.send(Arc::new(Disconnected));
        }
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), TransportError> {
        let transport = self
            .transport
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)?;
        let frame = packet.encode();
        trace!("--> {frame}");
        transport
            .send(&frame)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn event_packet<T: Serialize>(
        name: &str,
        payload: &T,
        ack_id: Option<u64>,
    ) -> Result<Packet, TransportError> {
        let data = serde_json::to_value(payload).map_err(|source| TransportError::Payload {
            event: name.to_string(),
            source,
        })?;
        Ok(Packet::Event {
            ack_id,
            name: name.to_string(),
            data,
        })
    }

    async fn try_emit<T: Serialize>(&self, name: &str, payload: &T) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let packet = Self::event_packet(name, payload, None)?;
        self.send_packet(&packet).await
    }

    /// Fire-and-forget emit of a named event.
    pub async fn emit<T: Serialize>(&self, name: &str, payload: &T) {
        match self.try_emit(name, payload).await {
            Ok(()) => debug!("Emitted {name}"),
            Err(e) => warn!("Dropping {name}: {e}"),
        }
    }

    /// Emit an event that asks the server for an acknowledgement.
    ///
    /// Returns once the frame is handed to the transport; await the returned
    /// [`PendingAck`] for the server's answer.
    pub async fn emit_with_ack<T: Serialize>(
        &self,
        name: &str,
        payload: &T,
    ) -> Result<PendingAck, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let ack_id = self.next_ack_id.fetch_add(1, Ordering::Relaxed);
        let packet = Self::event_packet(name, payload, Some(ack_id))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.ack_waiters.lock().await;
            // Waiters whose PendingAck was dropped unawaited.
            waiters.retain(|_, tx| !tx.is_closed());
            waiters.insert(ack_id, tx);
        }

        if let Err(e) = self.send_packet(&packet).await {
            self.ack_waiters.lock().await.remove(&ack_id);
            return Err(e);
        }
        debug!("Emitted {name} (ack {ack_id})");
        Ok(PendingAck {
            event: name.to_string(),
            ack_id,
            rx,
            waiters: Arc::downgrade(&self.ack_waiters),
        })
    }

    /// Emit `newBusinessMessage`.
    pub async fn send_message(&self, outgoing: &OutgoingMessage) {
        self.emit(NEW_BUSINESS_MESSAGE, outgoing).await;
    }

    /// Emit `newBusinessMessage` requesting an acknowledgement.
    pub async fn send_message_acknowledged(
        &self,
        outgoing: &OutgoingMessage,
    ) -> Result<PendingAck, TransportError> {
        self.emit_with_ack(NEW_BUSINESS_MESSAGE, outgoing).await
    }

    /// Emit `enableAllAssistants` / `disableAllAssistants` for the account.
    pub async fn set_all_assistants(&self, enabled: bool, user_id: &str) {
        let name = if enabled {
            ENABLE_ALL_ASSISTANTS
        } else {
            DISABLE_ALL_ASSISTANTS
        };
        self.emit(name, &user_id).await;
    }

    /// Emit `toggleAssistant` for one conversation.
    pub async fn set_chat_assistant(&self, conversation_id: &str, enabled: bool) {
        self.emit(
            TOGGLE_ASSISTANT,
            &json!({ "conversationId": conversation_id, "enabled": enabled }),
        )
        .await;
    }

    /// Process one inbound frame. Protocol packets are handled here; server
    /// events are published on the bus and returned.
    pub async fn handle_frame(&self, frame: &str) -> Option<InboundEvent> {
        trace!("<-- {frame}");
        let packet = match Packet::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Skipping undecodable frame {frame:?}: {e}");
                return None;
            }
        };

        match packet {
            Packet::Open(handshake) => {
                debug!("Engine.IO open: {handshake}");
                let connect = Packet::Connect(self.auth.clone());
                if let Err(e) = self.send_packet(&connect).await {
                    warn!("Failed to join namespace: {e}");
                }
            }
            Packet::Ping => {
                if let Err(e) = self.send_packet(&Packet::Pong).await {
                    warn!("Failed to answer ping: {e}");
                }
            }
            Packet::Connect(payload) => {
                let sid = payload
                    .as_ref()
                    .and_then(|p| p.get("sid"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                self.is_open.store(true, Ordering::Release);
                info!("Event channel connected (sid {:?})", sid);
                let _ = self.bus.connected.send(Arc::new(Connected { sid }));
            }
            Packet::ConnectError(err) => {
                warn!("Server refused the connection: {err}");
                self.bus.notify(Notice::destructive(
                    "Connection refused",
                    "The real-time channel rejected this session.",
                ));
            }
            Packet::Disconnect | Packet::Close => {
                info!("Server closed the event channel");
                self.detach().await;
            }
            Packet::Ack { ack_id, args } => {
                match self.ack_waiters.lock().await.remove(&ack_id) {
                    Some(waiter) => {
                        let _ = waiter.send(args);
                    }
                    None => debug!("Ack {ack_id} has no waiter"),
                }
            }
            Packet::Event { ack_id, name, data } => {
                if let Some(id) = ack_id {
                    // The console never answers server requests with data.
                    let ack = Packet::Ack {
                        ack_id: id,
                        args: Vec::new(),
                    };
                    if let Err(e) = self.send_packet(&ack).await {
                        debug!("Failed to ack {name}: {e}");
                    }
                }
                let event = InboundEvent { name, data };
                let _ = self.bus.inbound.send(Arc::new(event.clone()));
                return Some(event);
            }
            Packet::Pong | Packet::Noop => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransportFactory;
    use crate::transport::TransportFactory;
    use crate::types::{Message, MessageBody};

    async fn open_channel() -> (EventChannel, MockTransportFactory) {
        let factory = MockTransportFactory::new();
        let (transport, _events) = factory.create_transport().await.unwrap();
        let channel = EventChannel::new(Arc::new(EventBus::new()));
        channel.attach(transport).await;
        channel.handle_frame(r#"0{"sid":"e1","pingInterval":25000}"#).await;
        channel.handle_frame(r#"40{"sid":"s1"}"#).await;
        factory.take_sent().await;
        (channel, factory)
    }

    #[tokio::test]
    async fn handshake_joins_namespace_with_token() {
        let factory = MockTransportFactory::new();
        let (transport, _events) = factory.create_transport().await.unwrap();
        let bus = Arc::new(EventBus::new());
        let mut connected = bus.connected.subscribe();
        let channel = EventChannel::new(bus).with_auth_token(Some("tok".into()));
        channel.attach(transport).await;

        channel.handle_frame(r#"0{"sid":"e1"}"#).await;
        assert_eq!(factory.sent_frames().await, vec![r#"40{"token":"tok"}"#]);
        assert!(!channel.is_connected());

        channel.handle_frame(r#"40{"sid":"s1"}"#).await;
        assert!(channel.is_connected());
        assert_eq!(connected.recv().await.unwrap().sid.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn answers_ping_with_pong() {
        let (channel, factory) = open_channel().await;
        channel.handle_frame("2").await;
        assert_eq!(factory.sent_frames().await, vec!["3"]);
    }

    #[tokio::test]
    async fn send_message_emits_new_business_message() {
        let (channel, factory) = open_channel().await;
        let outgoing = OutgoingMessage {
            conversation_id: "42".into(),
            message: Message::business("BM1".into(), 300, MessageBody::Text("Hola".into())),
        };

        channel.send_message(&outgoing).await;

        let frames = factory.sent_frames().await;
        assert_eq!(frames.len(), 1);
        let packet = Packet::decode(&frames[0]).unwrap();
        assert_eq!(
            packet,
            Packet::event(
                NEW_BUSINESS_MESSAGE,
                json!({
                    "conversationId": "42",
                    "message": {
                        "id": "BM1",
                        "content": "Hola",
                        "role": "business",
                        "timestamp": 300,
                        "media": null
                    }
                })
            )
        );
    }

    #[tokio::test]
    async fn assistant_events() {
        let (channel, factory) = open_channel().await;

        channel.set_all_assistants(true, "op-1").await;
        channel.set_all_assistants(false, "op-1").await;
        channel.set_chat_assistant("42", false).await;

        assert_eq!(
            factory.sent_frames().await,
            vec![
                r#"42["enableAllAssistants","op-1"]"#.to_string(),
                r#"42["disableAllAssistants","op-1"]"#.to_string(),
                r#"42["toggleAssistant",{"conversationId":"42","enabled":false}]"#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn emit_without_connection_is_swallowed() {
        let channel = EventChannel::new(Arc::new(EventBus::new()));
        channel.emit("anything", &json!({})).await;
        assert!(matches!(
            channel.emit_with_ack("anything", &json!({})).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn transport_failure_is_swallowed_by_emit() {
        let (channel, factory) = open_channel().await;
        factory.set_fail_sends(true);
        channel.emit("x", &1).await;
        assert!(factory.sent_frames().await.is_empty());
    }

    #[tokio::test]
    async fn ack_resolves_pending_emit() {
        let (channel, factory) = open_channel().await;

        let pending = channel.emit_with_ack("ping", &json!({"n": 1})).await.unwrap();
        let frames = factory.sent_frames().await;
        assert_eq!(frames, vec![r#"420["ping",{"n":1}]"#]);

        channel.handle_frame(r#"430[{"ok":true}]"#).await;
        let args = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(args, vec![json!({"ok": true})]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_times_out() {
        let (channel, _factory) = open_channel().await;
        let pending = channel.emit_with_ack("ping", &json!(null)).await.unwrap();
        assert!(matches!(
            pending.wait(Duration::from_secs(5)).await,
            Err(TransportError::AckTimeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_acks_release_their_waiters() {
        let (channel, _factory) = open_channel().await;
        for _ in 0..50 {
            let pending = channel.emit_with_ack("ping", &json!(null)).await.unwrap();
            assert!(pending.wait(Duration::from_millis(10)).await.is_err());
        }
        assert!(channel.ack_waiters.lock().await.is_empty());

        // A late ack for a forgotten id is ignored.
        channel.handle_frame("4349[]").await;
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn dropped_pending_acks_are_pruned_on_next_emit() {
        let (channel, _factory) = open_channel().await;
        drop(channel.emit_with_ack("ping", &json!(null)).await.unwrap());
        let _pending = channel.emit_with_ack("ping", &json!(null)).await.unwrap();
        let waiters = channel.ack_waiters.lock().await;
        assert_eq!(waiters.keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn detach_drops_pending_acks() {
        let (channel, _factory) = open_channel().await;
        let pending = channel.emit_with_ack("ping", &json!(null)).await.unwrap();
        channel.detach().await;
        assert!(!channel.is_connected());
        assert!(matches!(
            pending.wait(Duration::from_secs(5)).await,
            Err(TransportError::AckDropped { .. })
        ));
    }

    #[tokio::test]
    async fn inbound_events_are_published() {
        let (channel, factory) = open_channel().await;
        let mut inbound = channel.bus.inbound.subscribe();

        let event = channel
            .handle_frame(r#"423["newClientMessage",{"conversationId":"42"}]"#)
            .await
            .unwrap();
        assert_eq!(event.conversation_id(), Some("42"));
        assert_eq!(inbound.recv().await.unwrap().name, "newClientMessage");
        assert_eq!(factory.sent_frames().await, vec!["433[]"]);
    }

    #[tokio::test]
    async fn garbage_frames_are_skipped() {
        let (channel, factory) = open_channel().await;
        assert!(channel.handle_frame("").await.is_none());
        assert!(channel.handle_frame("42{oops").await.is_none());
        assert!(channel.is_connected());
        assert!(factory.sent_frames().await.is_empty());
    }
}
