//! clubby: client for the Clubby JSON-envelope RPC protocol.
//!
//! # Quick Start
//!
//! ```ignore
//! use clubby::prelude::*;
//! use serde_json::Value;
//!
//! clubby::tracing_setup::init_tracing();
//!
//! let config = ClubbyBuilder::new()
//!     .device("//api.cesanta.com/d/my-device", "secret")
//!     .timeout_secs(10)
//!     .build()?;
//! let clubby = Clubby::new(config);
//! clubby.connect_and_wait().await?;
//!
//! let hello: Value = clubby.request_backend("/v1/Hello", &(), None)?.await?;
//! ```
//!
//! Calls can also deliver their result to a listener instead of a future:
//!
//! ```ignore
//! clubby.call_backend("/v1/Hello", &(), on_result(|res: Result<Value, CallError>| {
//!     println!("{res:?}");
//! }), None)?;
//! ```
//!
//! # Transports
//!
//! - **websocket** (default): `ws://` servers; add **websocket-tls** for `wss://`
//! - **mem** (default): in-process pair for tests, see [`Clubby::with_transport`]

#![forbid(unsafe_code)]

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use clubby_core::{
    CallError, CallId, CallListener, CallOptions, CallbackFault, ClubbyError, ClubbyListener,
    ClubbySession, ConnectionState, DecodeError, EncodeError, Envelope, FnListener, ReplyFuture,
    SessionConfig, Transport, TransportError, TransportEvent, on_result,
};

pub mod config;
pub mod tracing_setup;

pub use config::{ClubbyBuilder, ClubbyConfig, ConfigError};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use clubby::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CallError, CallListener, CallOptions, Clubby, ClubbyBuilder, ClubbyError, ClubbyListener,
        ConnectionState, on_result,
    };
}

/// Transport implementations.
pub mod transport {
    #[cfg(feature = "mem")]
    pub use clubby_core::mem::{MemPeer, MemTransport};

    #[cfg(feature = "websocket")]
    pub use clubby_core::websocket::WebSocketTransport;
}

/// A configured client with its event loop running.
///
/// Dereferences to [`ClubbySession`] for calls, observers and state.
/// Dropping it shuts the session down.
pub struct Clubby {
    session: Arc<ClubbySession>,
    config: ClubbyConfig,
    run: Mutex<Option<JoinHandle<Result<(), TransportError>>>>,
}

impl Clubby {
    /// Client talking WebSocket to `config.server_address`.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    #[cfg(feature = "websocket")]
    pub fn new(config: ClubbyConfig) -> Self {
        let transport = Transport::websocket(config.server_address.clone());
        Self::with_transport(config, transport)
    }

    /// Client over an arbitrary transport.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn with_transport(config: ClubbyConfig, transport: Transport) -> Self {
        let session = Arc::new(ClubbySession::new(transport, config.session_config()));
        let run = tokio::spawn(session.clone().run());
        tracing::debug!(
            server = %config.server_address,
            backend = %config.backend,
            "clubby client created"
        );
        Self {
            session,
            config,
            run: Mutex::new(Some(run)),
        }
    }

    pub fn config(&self) -> &ClubbyConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<ClubbySession> {
        &self.session
    }

    /// Connect and wait for the outcome.
    ///
    /// Returns immediately if already connected.
    pub async fn connect_and_wait(&self) -> Result<(), TransportError> {
        if self.session.current_state() == ConnectionState::Connected {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        let waiter: Arc<dyn ClubbyListener> = Arc::new(ConnectWaiter {
            tx: Mutex::new(Some(tx)),
        });
        self.session.add_listener(waiter.clone());
        self.session.connect();
        let outcome = tokio::select! {
            received = rx => received.unwrap_or(Err(TransportError::Closed)),
            () = self.session.wait_for_state(ConnectionState::Connected) => Ok(()),
        };
        self.session.remove_listener(&waiter);
        outcome
    }

    /// [`ClubbySession::request`] addressed to the configured backend.
    pub fn request_backend<A, R>(
        &self,
        command: &str,
        args: &A,
        options: Option<CallOptions>,
    ) -> Result<ReplyFuture<R>, ClubbyError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        self.session
            .request(&self.config.backend, command, args, options)
    }

    /// Disconnect, stop the event loop and wait for it to finish.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.session.shutdown();
        let run = self.run.lock().take();
        match run {
            Some(run) => run
                .await
                .map_err(|e| TransportError::Io(std::io::Error::other(e)))?,
            None => Ok(()),
        }
    }
}

impl Deref for Clubby {
    type Target = ClubbySession;

    fn deref(&self) -> &ClubbySession {
        &self.session
    }
}

impl Drop for Clubby {
    /// Without a prior [`close`](Clubby::close), stop the event loop so it
    /// does not outlive the client.
    fn drop(&mut self) {
        if self.run.get_mut().is_some() {
            self.session.shutdown();
        }
    }
}

impl std::fmt::Debug for Clubby {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clubby")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Completes a oneshot on the first connect outcome.
struct ConnectWaiter {
    tx: Mutex<Option<oneshot::Sender<Result<(), TransportError>>>>,
}

impl ConnectWaiter {
    fn complete(&self, outcome: Result<(), TransportError>) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(outcome);
        }
    }
}

impl ClubbyListener for ConnectWaiter {
    fn on_connected(&self) {
        self.complete(Ok(()));
    }

    fn on_connect_error(&self, cause: &TransportError) {
        let reason = match cause {
            TransportError::Connect(reason) => reason.clone(),
            other => other.to_string(),
        };
        self.complete(Err(TransportError::Connect(reason)));
    }
}
