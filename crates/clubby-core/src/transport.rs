//! Transport enum and internal backend trait.
//!
//! The public API is the [`Transport`] enum. Each backend lives in its own
//! module under `transport/` and implements the internal [`TransportBackend`]
//! trait. Backends report everything that happens on the connection as
//! [`TransportEvent`]s; the session's event loop is their only consumer.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::TransportError;

/// Something that happened on the connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// An `open()` started.
    Connecting,
    /// The connection is established.
    Opened,
    /// A close started (locally or by the peer).
    Closing,
    /// The connection is gone.
    Closed,
    /// A text message arrived.
    Message(String),
    /// The established connection failed.
    Error(TransportError),
    /// `open()` failed.
    ConnectError(TransportError),
}

pub(crate) trait TransportBackend: Send + Sync + Clone + 'static {
    fn open(&self);
    fn close(&self);
    fn is_open(&self) -> bool;
    fn send_text(&self, text: String) -> Result<(), TransportError>;
    async fn recv_event(&self) -> Result<TransportEvent, TransportError>;
    fn shutdown(&self);
}

#[derive(Clone, Debug)]
pub enum Transport {
    #[cfg(feature = "mem")]
    Mem(mem::MemTransport),
    #[cfg(feature = "websocket")]
    WebSocket(websocket::WebSocketTransport),
}

impl Transport {
    /// Start connecting. Progress is reported through events.
    pub fn open(&self) {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.open(),
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.open(),
        }
    }

    /// Start closing. Progress is reported through events.
    pub fn close(&self) {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.close(),
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.close(),
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.is_open(),
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.is_open(),
        }
    }

    /// Queue a text message for the peer. Fails if the connection is not open.
    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.send_text(text),
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.send_text(text),
        }
    }

    /// Next connection event. Returns [`TransportError::Closed`] once the
    /// transport has been shut down and every queued event was delivered.
    pub async fn recv_event(&self) -> Result<TransportEvent, TransportError> {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.recv_event().await,
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.recv_event().await,
        }
    }

    /// Stop producing events for good.
    pub fn shutdown(&self) {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.shutdown(),
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.shutdown(),
        }
    }

    #[cfg(feature = "mem")]
    pub fn mem_pair() -> (Self, mem::MemPeer) {
        let (transport, peer) = mem::MemTransport::pair();
        (Transport::Mem(transport), peer)
    }

    #[cfg(feature = "websocket")]
    pub fn websocket(server_address: impl Into<String>) -> Self {
        Transport::WebSocket(websocket::WebSocketTransport::new(server_address))
    }
}

/// Event queue shared by the backends.
///
/// Background tasks emit through `&self`; once [`EventQueue::shutdown`] drops
/// the sender, the receiver drains what is left and then reports `Closed`.
#[derive(Debug)]
pub(crate) struct EventQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub(crate) async fn recv(&self) -> Result<TransportEvent, TransportError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    pub(crate) fn shutdown(&self) {
        self.tx.lock().take();
    }
}

#[cfg(feature = "mem")]
pub mod mem;
#[cfg(feature = "websocket")]
pub mod websocket;
