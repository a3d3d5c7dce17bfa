pub use chatcore::net::{Transport, TransportEvent, TransportFactory};
pub use chatdesk_tokio_transport::TokioWebSocketTransportFactory;

/// In-memory transport for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::{Mutex, mpsc};

    type SentFrames = Arc<Mutex<Vec<String>>>;

    /// A mock transport that records every frame it is asked to send.
    pub struct MockTransport {
        sent: SentFrames,
        fail_sends: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, frame: &str) -> Result<(), anyhow::Error> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("mock transport refused the frame"));
            }
            self.sent.lock().await.push(frame.to_string());
            Ok(())
        }

        async fn disconnect(&self) {}
    }

    /// A mock transport factory. Clones share state, so a test can keep one
    /// handle to inspect sent frames and inject server frames while the
    /// client owns another.
    #[derive(Clone, Default)]
    pub struct MockTransportFactory {
        sent: SentFrames,
        inbound: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
        fail_sends: Arc<AtomicBool>,
    }

    impl MockTransportFactory {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn sent_frames(&self) -> Vec<String> {
            self.sent.lock().await.clone()
        }

        pub async fn take_sent(&self) -> Vec<String> {
            std::mem::take(&mut *self.sent.lock().await)
        }

        pub fn set_fail_sends(&self, fail: bool) {
            self.fail_sends.store(fail, Ordering::SeqCst);
        }

        /// Deliver a frame as if the server had sent it. Returns false when
        /// no transport is open or its reader is gone.
        pub async fn push_frame(&self, frame: &str) -> bool {
            let sender = self.inbound.lock().await.clone();
            match sender {
                Some(tx) => tx
                    .send(TransportEvent::FrameReceived(frame.to_string()))
                    .await
                    .is_ok(),
                None => false,
            }
        }

        /// Simulate the connection dropping.
        pub async fn drop_connection(&self) {
            if let Some(tx) = self.inbound.lock().await.take() {
                let _ = tx.send(TransportEvent::Disconnected).await;
            }
        }
    }

    #[async_trait]
    impl TransportFactory for MockTransportFactory {
        async fn create_transport(
            &self,
        ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
            let (tx, rx) = mpsc::channel(64);
            let _ = tx.send(TransportEvent::Connected).await;
            *self.inbound.lock().await = Some(tx);
            let transport = MockTransport {
                sent: self.sent.clone(),
                fail_sends: self.fail_sends.clone(),
            };
            Ok((Arc::new(transport), rx))
        }
    }
}
