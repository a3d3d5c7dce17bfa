use std::sync::Arc;
use std::time::Duration;

use chatdesk::Client;
use chatdesk::config::ClientConfig;
use chatdesk::frame::Packet;
use chatdesk::test_utils::{MockBackend, StepClock, chat};
use chatdesk::transport::mock::MockTransportFactory;
use chatdesk::types::{OutgoingMessage, Role};

async fn connected_client(backend: Arc<MockBackend>, factory: &MockTransportFactory) -> Arc<Client> {
    let client = Client::builder()
        .with_config(ClientConfig::new("http://localhost:3000/api", "op-1"))
        .with_transport_factory(Arc::new(factory.clone()))
        .with_backend(backend.clone())
        .with_uploader(backend)
        .with_clock(StepClock::starting_at(300))
        .build()
        .unwrap();

    let mut connected = client.event_bus().connected.subscribe();
    client.connect().await.unwrap();
    factory.push_frame(r#"0{"sid":"e1","pingInterval":25000}"#).await;
    factory.push_frame(r#"40{"sid":"s1"}"#).await;
    tokio::time::timeout(Duration::from_secs(1), connected.recv())
        .await
        .expect("namespace connect")
        .unwrap();
    factory.take_sent().await;
    client
}

#[tokio::test]
async fn test_open_chat_reply_moves_chat_to_top() {
    let _ = env_logger::builder().is_test(true).try_init();

    let backend = Arc::new(MockBackend::new(vec![
        chat("7", "Beto", Some(200), 0),
        chat("42", "Ana", Some(100), 3),
    ]));
    let factory = MockTransportFactory::new();
    let client = connected_client(backend, &factory).await;

    let rows = client.load_chats().await.unwrap();
    let order: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(order, vec!["7", "42"]);
    assert_eq!(rows[1].unread, 3);

    // Opening resets the unread counter locally.
    client.open_chat("42").await.unwrap();
    let rows = client.chat_rows().await;
    assert_eq!(rows[1].unread, 0);
    assert!(rows[1].selected);

    let sent = client.send_text("Hola").await.unwrap();
    assert_eq!(sent.role, Role::Business);
    assert_eq!(sent.content, "Hola");

    // Emitted as newBusinessMessage for chat 42.
    let frames = factory.sent_frames().await;
    assert_eq!(frames.len(), 1);
    let Packet::Event { name, data, .. } = Packet::decode(&frames[0]).unwrap() else {
        panic!("expected an event frame, got {}", frames[0]);
    };
    assert_eq!(name, "newBusinessMessage");
    let outgoing: OutgoingMessage = serde_json::from_value(data).unwrap();
    assert_eq!(outgoing.conversation_id, "42");
    assert_eq!(outgoing.message, sent);

    // Appended to the log and promoted to the top of the list.
    let log = client.store().messages("42").unwrap();
    assert_eq!(log.messages.last(), Some(&sent));

    let rows = client.chat_rows().await;
    let order: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(order, vec!["42", "7"]);
    assert_eq!(rows[0].preview, "Hola");
    assert_eq!(rows[0].last_activity, Some(sent.timestamp));

    client.disconnect().await;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_rapid_sends_keep_call_order() {
    let backend = Arc::new(MockBackend::new(vec![chat("1", "Ana", Some(10), 0)]));
    let factory = MockTransportFactory::new();
    let client = connected_client(backend, &factory).await;
    client.load_chats().await.unwrap();
    client.open_chat("1").await.unwrap();

    let a = client.send_text("A").await.unwrap();
    let b = client.send_text("B").await.unwrap();

    let ids: Vec<_> = client
        .store()
        .messages("1")
        .unwrap()
        .messages
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec![a.id, b.id]);
}

#[tokio::test]
async fn test_whitespace_reply_is_not_sent() {
    let backend = Arc::new(MockBackend::new(vec![chat("1", "Ana", Some(10), 0)]));
    let factory = MockTransportFactory::new();
    let client = connected_client(backend, &factory).await;
    client.load_chats().await.unwrap();
    client.open_chat("1").await.unwrap();
    let before = client.store().chats().await;

    assert!(client.send_text("   ").await.is_err());
    assert!(factory.sent_frames().await.is_empty());
    assert_eq!(client.store().chats().await, before);
    assert!(client.store().messages("1").unwrap().messages.is_empty());
}

#[tokio::test]
async fn test_server_ping_is_answered() {
    let backend = Arc::new(MockBackend::new(vec![]));
    let factory = MockTransportFactory::new();
    let _client = connected_client(backend, &factory).await;

    factory.push_frame("2").await;
    for _ in 0..100 {
        if !factory.sent_frames().await.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(factory.sent_frames().await, vec!["3"]);
}
