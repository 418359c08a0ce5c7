//! The connection-scoped call correlation engine.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{oneshot, watch};

use crate::call::{self, CallListener, CallOptions, ReplyFuture};
use crate::envelope::{self, CallId, Command, Envelope};
use crate::listener::{ClubbyListener, ListenerManager};
use crate::pending::{PendingCall, PendingCalls, Resolver};
use crate::state::{ConnectionState, StateCell};
use crate::{
    CallError, CallbackFault, ClubbyError, TimeoutScheduler, Transport, TransportError,
    TransportEvent,
};

/// Identity and addressing of the local end.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Written as `src` in every outgoing envelope.
    pub device_id: String,
    /// Written as `key` when non-empty.
    pub device_psk: String,
    /// Destination used by [`ClubbySession::call_backend`].
    pub backend: String,
    pub default_options: CallOptions,
}

/// One logical connection: id allocation, in-flight calls, deadlines,
/// connection state and observers.
///
/// All methods take `&self`; share the session behind an `Arc` and drive it
/// with [`ClubbySession::run`] on a spawned task.
pub struct ClubbySession {
    transport: Transport,
    device_id: String,
    device_psk: String,
    backend: String,
    default_options: Mutex<CallOptions>,

    /// Next id handed out by `call`. Ids start at 1.
    next_id: AtomicU32,

    /// Shared with deadline timers, which resolve through the same `pop`.
    pending: Arc<PendingCalls>,

    state: StateCell,

    /// Shared with call resolvers so listener panics can be reported.
    listeners: Arc<ListenerManager>,

    timers: TimeoutScheduler,
}

impl std::fmt::Debug for ClubbySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClubbySession")
            .field("device_id", &self.device_id)
            .field("backend", &self.backend)
            .field("state", &self.state.get())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl ClubbySession {
    /// Create a session whose deadline timers run on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn new(transport: Transport, config: SessionConfig) -> Self {
        Self::with_scheduler(transport, config, TimeoutScheduler::current())
    }

    pub fn with_scheduler(
        transport: Transport,
        config: SessionConfig,
        timers: TimeoutScheduler,
    ) -> Self {
        Self {
            transport,
            device_id: config.device_id,
            device_psk: config.device_psk,
            backend: config.backend,
            default_options: Mutex::new(config.default_options),
            next_id: AtomicU32::new(1),
            pending: Arc::new(PendingCalls::new()),
            state: StateCell::default(),
            listeners: Arc::new(ListenerManager::new()),
            timers,
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn default_options(&self) -> CallOptions {
        *self.default_options.lock()
    }

    /// Replace the options used by calls that do not pass their own.
    pub fn set_default_options(&self, options: CallOptions) {
        *self.default_options.lock() = options;
    }

    // ---- connection lifecycle ----

    /// Start connecting. The outcome is reported to observers.
    pub fn connect(&self) {
        tracing::debug!(device_id = %self.device_id, "connect requested");
        self.transport.open();
    }

    /// Start disconnecting. Pending calls are left to their deadlines.
    pub fn disconnect(&self) {
        tracing::debug!(device_id = %self.device_id, "disconnect requested");
        self.transport.close();
    }

    /// Close the connection and stop the event loop once the remaining
    /// events have been handled.
    pub fn shutdown(&self) {
        self.transport.close();
        self.transport.shutdown();
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Whether the transport is currently open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Wait until the session reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| *state == target).await;
    }

    pub fn add_listener(&self, listener: Arc<dyn ClubbyListener>) {
        self.listeners.add(listener);
    }

    /// Remove the first registration of `listener`. Returns whether one was found.
    pub fn remove_listener(&self, listener: &Arc<dyn ClubbyListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Ids of calls still waiting for a response, in ascending order.
    pub fn pending_call_ids(&self) -> Vec<CallId> {
        self.pending.ids()
    }

    pub fn has_pending_call(&self, id: CallId) -> bool {
        self.pending.contains(id)
    }

    // ---- calls ----

    /// Send `command` to `destination` and route the response to `listener`.
    ///
    /// Fails synchronously with [`ClubbyError::NotConnected`] when the
    /// transport is not open; nothing is registered or sent in that case.
    /// `options` overrides the session defaults for this call.
    pub fn call<A, R, L>(
        &self,
        destination: &str,
        command: &str,
        args: &A,
        listener: L,
        options: Option<CallOptions>,
    ) -> Result<CallId, ClubbyError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + 'static,
        L: CallListener<R>,
    {
        let resolver = self.resolver::<R, L>(listener);
        self.dispatch(destination, command, args, Some(resolver), options)
    }

    /// [`call`](Self::call) addressed to the configured backend.
    pub fn call_backend<A, R, L>(
        &self,
        command: &str,
        args: &A,
        listener: L,
        options: Option<CallOptions>,
    ) -> Result<CallId, ClubbyError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + 'static,
        L: CallListener<R>,
    {
        let resolver = self.resolver::<R, L>(listener);
        self.dispatch(&self.backend, command, args, Some(resolver), options)
    }

    /// Send a command without waiting for its response.
    ///
    /// An id is still allocated and written; a response to it is dropped.
    pub fn notify<A>(
        &self,
        destination: &str,
        command: &str,
        args: &A,
        options: Option<CallOptions>,
    ) -> Result<CallId, ClubbyError>
    where
        A: Serialize + ?Sized,
    {
        self.dispatch(destination, command, args, None, options)
    }

    /// Like [`call`](Self::call), but the result arrives through a future.
    pub fn request<A, R>(
        &self,
        destination: &str,
        command: &str,
        args: &A,
        options: Option<CallOptions>,
    ) -> Result<ReplyFuture<R>, ClubbyError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<Result<R, CallError>>();
        let id = self.call(destination, command, args, tx, options)?;
        Ok(ReplyFuture::new(id, rx))
    }

    /// Wrap a listener so that the payload is decoded into `R`. A payload of
    /// the wrong shape and a panicking listener are reported to observers.
    fn resolver<R, L>(&self, listener: L) -> Resolver
    where
        R: DeserializeOwned + 'static,
        L: CallListener<R>,
    {
        let listeners = self.listeners.clone();
        Box::new(move |outcome| {
            let observers = &listeners;
            let delivered = catch_unwind(AssertUnwindSafe(move || {
                call::deliver::<R, L>(listener, outcome, |e| {
                    tracing::warn!(error = %e, "response payload has the wrong shape");
                    observers.error(&ClubbyError::Decode(e.duplicate()));
                });
            }));
            if let Err(panic) = delivered {
                listeners.callback_error(&CallbackFault::from_panic(panic.as_ref()));
            }
        })
    }

    fn dispatch<A>(
        &self,
        destination: &str,
        command: &str,
        args: &A,
        resolver: Option<Resolver>,
        options: Option<CallOptions>,
    ) -> Result<CallId, ClubbyError>
    where
        A: Serialize + ?Sized,
    {
        if !self.transport.is_open() {
            tracing::debug!(command, destination, "call rejected: not connected");
            return Err(ClubbyError::NotConnected);
        }

        let args = envelope::encode_args(args).map_err(|e| self.encode_failed(e.into()))?;
        let timeout_secs = options.unwrap_or_else(|| self.default_options()).timeout_secs;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = Envelope::command(
            &self.device_id,
            destination,
            &self.device_psk,
            Command::new(command, id, args, timeout_secs),
        );
        let text = envelope::encode(&frame).map_err(|e| self.encode_failed(e.into()))?;

        if let Some(resolver) = resolver {
            if let Err(rejected) = self.pending.insert(PendingCall::new(id, command, resolver)) {
                rejected.resolve(Err(CallError::Dropped));
                return Ok(id);
            }
            if timeout_secs > 0 {
                self.arm_timeout(id, timeout_secs);
            }
        }

        self.listeners.data_sending(&text);
        if let Err(e) = self.transport.send_text(text) {
            tracing::warn!(call_id = id, command, error = %e, "send failed; dropping call");
            if let Some(call) = self.pending.pop(id) {
                call.cancel_timer();
            }
            return Err(e.into());
        }

        tracing::debug!(call_id = id, command, destination, timeout_secs, "call sent");
        Ok(id)
    }

    fn arm_timeout(&self, id: CallId, timeout_secs: u32) {
        let pending = self.pending.clone();
        let timer = self
            .timers
            .arm(Duration::from_secs(u64::from(timeout_secs)), move || {
                if let Some(call) = pending.pop(id) {
                    tracing::debug!(call_id = id, command = %call.command, "call timed out");
                    call.resolve(Err(CallError::Timeout));
                }
            });
        self.pending.attach_timer(id, timer);
    }

    fn encode_failed(&self, error: ClubbyError) -> ClubbyError {
        tracing::warn!(error = %error, "failed to encode outgoing command");
        self.listeners.error(&error);
        error
    }

    // ---- event loop ----

    /// Consume transport events until the transport is shut down.
    pub async fn run(self: Arc<Self>) -> Result<(), TransportError> {
        tracing::debug!("ClubbySession::run: starting event loop");
        loop {
            match self.transport.recv_event().await {
                Ok(event) => self.handle_event(event),
                Err(TransportError::Closed) => {
                    tracing::debug!("ClubbySession::run: transport shut down");
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "ClubbySession::run: transport error");
                    return Err(e);
                }
            }
        }
    }

    /// Apply one transport event. [`run`](Self::run) calls this for every
    /// event; it is public so a custom loop can drive the session.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connecting => self.transition(ConnectionState::Connecting),
            TransportEvent::Opened => self.transition(ConnectionState::Connected),
            TransportEvent::Closing => self.transition(ConnectionState::Disconnecting),
            TransportEvent::Closed => self.transition(ConnectionState::NotConnected),
            TransportEvent::Message(text) => {
                self.listeners.data_received(&text);
                self.handle_message(&text);
            }
            TransportEvent::ConnectError(cause) => self.connect_failed(cause),
            TransportEvent::Error(cause) => {
                if self.state.get() == ConnectionState::Connecting {
                    self.connect_failed(cause);
                } else {
                    tracing::error!(error = %cause, "transport error");
                    self.listeners.error(&ClubbyError::Transport(cause));
                }
            }
        }
    }

    fn connect_failed(&self, cause: TransportError) {
        tracing::warn!(error = %cause, "connect failed");
        self.listeners.connect_error(&cause);
        self.transition(ConnectionState::NotConnected);
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.replace(next);
        if previous == next {
            return;
        }
        tracing::debug!(from = %previous, to = %next, "connection state changed");
        self.listeners.state_changed(next);
        match next {
            ConnectionState::Connected => self.listeners.connected(),
            ConnectionState::NotConnected
                if matches!(
                    previous,
                    ConnectionState::Connected | ConnectionState::Disconnecting
                ) =>
            {
                self.listeners.disconnected()
            }
            _ => {}
        }
    }

    fn handle_message(&self, text: &str) {
        let frame = match envelope::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "dropping malformed message");
                self.listeners.error(&ClubbyError::Decode(e));
                return;
            }
        };

        for command in frame.commands() {
            tracing::debug!(
                command = %command.name,
                id = command.id,
                src = %frame.src,
                "ignoring incoming command"
            );
        }

        for response in frame.responses.unwrap_or_default() {
            let id = response.id;
            let Some(call) = self.pending.pop(id) else {
                tracing::debug!(call_id = id, "dropping response for unknown call");
                continue;
            };
            tracing::debug!(
                call_id = id,
                command = %call.command,
                status = response.status,
                "routing response"
            );
            let outcome = if response.is_success() {
                Ok(response.payload)
            } else {
                Err(CallError::Remote {
                    status: response.status,
                    message: response.status_message,
                })
            };
            call.resolve(outcome);
        }
    }
}
