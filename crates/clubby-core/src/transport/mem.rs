//! In-process transport for tests.
//!
//! [`MemTransport`] is the client half; [`MemPeer`] plays the far end. The
//! peer reads whatever the client sends and can inject messages, errors, a
//! refused connect or a server-side close.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{DecodeError, Envelope, TransportError, envelope};

use super::{EventQueue, TransportBackend, TransportEvent};

#[derive(Clone, Debug)]
pub struct MemTransport {
    inner: Arc<MemInner>,
}

#[derive(Debug)]
struct MemInner {
    events: EventQueue,
    open: AtomicBool,
    to_peer: mpsc::UnboundedSender<String>,
    refuse_connect: Mutex<Option<String>>,
}

impl MemTransport {
    pub fn pair() -> (Self, MemPeer) {
        let (to_peer, from_client) = mpsc::unbounded_channel();
        let inner = Arc::new(MemInner {
            events: EventQueue::new(),
            open: AtomicBool::new(false),
            to_peer,
            refuse_connect: Mutex::new(None),
        });
        (
            Self {
                inner: inner.clone(),
            },
            MemPeer {
                inner,
                from_client: tokio::sync::Mutex::new(from_client),
            },
        )
    }
}

impl TransportBackend for MemTransport {
    fn open(&self) {
        if self.inner.open.load(Ordering::Acquire) {
            return;
        }
        self.inner.events.emit(TransportEvent::Connecting);
        if let Some(reason) = self.inner.refuse_connect.lock().take() {
            self.inner
                .events
                .emit(TransportEvent::ConnectError(TransportError::Connect(reason)));
            return;
        }
        self.inner.open.store(true, Ordering::Release);
        self.inner.events.emit(TransportEvent::Opened);
    }

    fn close(&self) {
        if self.inner.open.swap(false, Ordering::AcqRel) {
            self.inner.events.emit(TransportEvent::Closing);
            self.inner.events.emit(TransportEvent::Closed);
        }
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.inner
            .to_peer
            .send(text)
            .map_err(|_| TransportError::Closed)
    }

    async fn recv_event(&self) -> Result<TransportEvent, TransportError> {
        self.inner.events.recv().await
    }

    fn shutdown(&self) {
        self.inner.events.shutdown();
    }
}

/// The far end of a [`MemTransport`].
#[derive(Debug)]
pub struct MemPeer {
    inner: Arc<MemInner>,
    from_client: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MemPeer {
    /// Next text the client sent, or `None` once the client side is gone.
    pub async fn recv_text(&self) -> Option<String> {
        self.from_client.lock().await.recv().await
    }

    /// Next text the client sent, parsed as an envelope.
    pub async fn recv_envelope(&self) -> Option<Result<Envelope, DecodeError>> {
        self.recv_text().await.map(|text| envelope::decode(&text))
    }

    /// Deliver a text message to the client.
    pub fn send_text(&self, text: impl Into<String>) {
        self.inner.events.emit(TransportEvent::Message(text.into()));
    }

    /// Report a fault on the established connection.
    pub fn inject_error(&self, error: TransportError) {
        self.inner.events.emit(TransportEvent::Error(error));
    }

    /// Make the client's next `open()` fail with a connect error.
    pub fn refuse_next_connect(&self, reason: impl Into<String>) {
        *self.inner.refuse_connect.lock() = Some(reason.into());
    }

    /// Close the connection from the peer's side.
    pub fn disconnect(&self) {
        if self.inner.open.swap(false, Ordering::AcqRel) {
            self.inner.events.emit(TransportEvent::Closing);
            self.inner.events.emit(TransportEvent::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_send_close_emits_lifecycle() {
        let (transport, peer) = MemTransport::pair();
        assert!(transport.send_text("early".into()).is_err());

        transport.open();
        assert!(transport.is_open());
        transport.send_text("hello".into()).unwrap();
        assert_eq!(peer.recv_text().await.as_deref(), Some("hello"));
        transport.close();
        transport.shutdown();

        let mut events = Vec::new();
        while let Ok(event) = transport.recv_event().await {
            events.push(format!("{event:?}"));
        }
        assert_eq!(events, vec!["Connecting", "Opened", "Closing", "Closed"]);
    }

    #[tokio::test]
    async fn refused_connect_stays_closed() {
        let (transport, peer) = MemTransport::pair();
        peer.refuse_next_connect("nope");
        transport.open();
        assert!(!transport.is_open());

        assert!(matches!(
            transport.recv_event().await,
            Ok(TransportEvent::Connecting)
        ));
        assert!(matches!(
            transport.recv_event().await,
            Ok(TransportEvent::ConnectError(TransportError::Connect(_)))
        ));
    }
}
