//! WebSocket client transport.
//!
//! `open()` spawns the handshake on the current tokio runtime. Once the
//! socket is up it is split into a writer task fed by an unbounded queue and
//! a reader task that turns incoming text frames into events.
//!
//! A close or shutdown requested while the handshake is still running is
//! remembered; the socket is closed as soon as the handshake finishes.
//!
//! `wss://` addresses need the `websocket-tls` feature.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{SEC_WEBSOCKET_EXTENSIONS, SEC_WEBSOCKET_PROTOCOL};

use crate::TransportError;

use super::{EventQueue, TransportBackend, TransportEvent};

/// Subprotocol requested during the handshake.
pub const SUBPROTOCOL: &str = "clubby.cesanta.com";

/// Extension header requesting JSON in both directions.
pub const ENCODING_EXTENSION: &str = "clubby.cesanta.com-encoding; in=json; out=json";

enum OutMsg {
    Data(String),
    Close,
}

struct WebSocketInner {
    server_address: String,
    events: EventQueue,
    open: AtomicBool,
    connecting: AtomicBool,
    /// Set when a close arrives before the handshake has finished.
    close_requested: AtomicBool,
    /// Writer queue. Also serializes close requests against the switch to open.
    out: Mutex<Option<mpsc::UnboundedSender<OutMsg>>>,
}

#[derive(Clone)]
pub struct WebSocketTransport {
    inner: Arc<WebSocketInner>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("server_address", &self.inner.server_address)
            .field("open", &self.inner.open.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(WebSocketInner {
                server_address: server_address.into(),
                events: EventQueue::new(),
                open: AtomicBool::new(false),
                connecting: AtomicBool::new(false),
                close_requested: AtomicBool::new(false),
                out: Mutex::new(None),
            }),
        }
    }

    pub fn server_address(&self) -> &str {
        &self.inner.server_address
    }
}

impl TransportBackend for WebSocketTransport {
    fn open(&self) {
        if self.inner.open.load(Ordering::Acquire)
            || self.inner.connecting.swap(true, Ordering::AcqRel)
        {
            return;
        }
        self.inner.close_requested.store(false, Ordering::Release);
        self.inner.events.emit(TransportEvent::Connecting);

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                self.inner.connecting.store(false, Ordering::Release);
                self.inner
                    .events
                    .emit(TransportEvent::ConnectError(TransportError::Connect(
                        e.to_string(),
                    )));
                return;
            }
        };
        runtime.spawn(connect(self.inner.clone()));
    }

    fn close(&self) {
        let out = self.inner.out.lock();
        match out.as_ref() {
            Some(out) => {
                self.inner.events.emit(TransportEvent::Closing);
                let _ = out.send(OutMsg::Close);
            }
            None if self.inner.connecting.load(Ordering::Acquire) => {
                self.inner.close_requested.store(true, Ordering::Release);
            }
            None => {}
        }
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let out = self.inner.out.lock();
        let Some(out) = out.as_ref() else {
            return Err(TransportError::Closed);
        };
        out.send(OutMsg::Data(text))
            .map_err(|_| TransportError::Closed)
    }

    async fn recv_event(&self) -> Result<TransportEvent, TransportError> {
        self.inner.events.recv().await
    }

    fn shutdown(&self) {
        {
            let mut out = self.inner.out.lock();
            match out.take() {
                Some(out) => {
                    let _ = out.send(OutMsg::Close);
                }
                None if self.inner.connecting.load(Ordering::Acquire) => {
                    self.inner.close_requested.store(true, Ordering::Release);
                }
                None => {}
            }
        }
        self.inner.events.shutdown();
    }
}

async fn connect(inner: Arc<WebSocketInner>) {
    let ws = match handshake(&inner.server_address).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(server = %inner.server_address, error = %e, "websocket connect failed");
            {
                let _out = inner.out.lock();
                inner.connecting.store(false, Ordering::Release);
                inner.close_requested.store(false, Ordering::Release);
            }
            inner.events.emit(TransportEvent::ConnectError(e));
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutMsg>();
    let closed_early = {
        let mut out = inner.out.lock();
        inner.connecting.store(false, Ordering::Release);
        if inner.close_requested.swap(false, Ordering::AcqRel) {
            true
        } else {
            *out = Some(out_tx);
            inner.open.store(true, Ordering::Release);
            false
        }
    };
    if closed_early {
        tracing::debug!(server = %inner.server_address, "closed before the handshake finished");
        let _ = sink.send(Message::Close(None)).await;
        inner.events.emit(TransportEvent::Closed);
        return;
    }
    tracing::debug!(server = %inner.server_address, "websocket connected");
    inner.events.emit(TransportEvent::Opened);

    let inner_for_writer = inner.clone();
    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            match msg {
                OutMsg::Data(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        inner_for_writer
                            .events
                            .emit(TransportEvent::Error(TransportError::WebSocket(
                                e.to_string(),
                            )));
                        break;
                    }
                }
                OutMsg::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    while let Some(item) = stream.next().await {
        match item {
            Ok(Message::Text(text)) => {
                inner
                    .events
                    .emit(TransportEvent::Message(text.as_str().to_owned()));
            }
            Ok(Message::Close(frame)) => {
                tracing::debug!(?frame, "websocket close frame received");
                inner.events.emit(TransportEvent::Closing);
                break;
            }
            Ok(Message::Binary(data)) => {
                tracing::debug!(len = data.len(), "ignoring binary websocket frame");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
            Err(e) => {
                inner
                    .events
                    .emit(TransportEvent::Error(TransportError::WebSocket(
                        e.to_string(),
                    )));
                break;
            }
        }
    }

    inner.open.store(false, Ordering::Release);
    inner.out.lock().take();
    inner.events.emit(TransportEvent::Closed);
}

async fn handshake(
    server_address: &str,
) -> Result<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    TransportError,
> {
    let mut request = server_address
        .into_client_request()
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    let headers = request.headers_mut();
    headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
    headers.insert(
        SEC_WEBSOCKET_EXTENSIONS,
        HeaderValue::from_static(ENCODING_EXTENSION),
    );

    let (ws, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    Ok(ws)
}
