//! Connection observers and their fan-out.
//!
//! Observers are called synchronously on the task that delivers the event, in
//! registration order. A panicking observer does not stop the fan-out: the
//! remaining observers still see the event, and afterwards every observer is
//! told about the fault through [`ClubbyListener::on_callback_error`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{CallbackFault, ClubbyError, ConnectionState, TransportError};

/// Generic connection observer.
///
/// Not to be confused with [`CallListener`](crate::CallListener), which
/// receives the result of one particular call. Every method has an empty
/// default body, so implementors override only what they care about.
#[allow(unused_variables)]
pub trait ClubbyListener: Send + Sync {
    /// The connection is established.
    fn on_connected(&self) {}

    /// Connecting failed.
    fn on_connect_error(&self, cause: &TransportError) {}

    /// The connection is gone.
    fn on_disconnected(&self) {}

    /// Raw text is about to go out on the wire.
    fn on_data_sending(&self, text: &str) {}

    /// Raw text just arrived from the wire.
    fn on_data_received(&self, text: &str) {}

    /// A connection-scoped error: transport faults, malformed envelopes,
    /// payloads that could not be encoded.
    fn on_error(&self, error: &ClubbyError) {}

    fn on_state_changed(&self, state: ConnectionState) {}

    /// An observer or call listener panicked.
    ///
    /// Whether this is fatal is up to the application; the client keeps running.
    fn on_callback_error(&self, fault: &CallbackFault) {}
}

/// Ordered set of observers.
#[derive(Default)]
pub(crate) struct ListenerManager {
    listeners: RwLock<Vec<Arc<dyn ClubbyListener>>>,
}

impl ListenerManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register an observer. The same observer may be registered more than once.
    pub(crate) fn add(&self, listener: Arc<dyn ClubbyListener>) {
        self.listeners.write().push(listener);
    }

    /// Remove the first registration of `listener` (compared by identity).
    pub(crate) fn remove(&self, listener: &Arc<dyn ClubbyListener>) -> bool {
        let mut listeners = self.listeners.write();
        match listeners.iter().position(|l| same_listener(l, listener)) {
            Some(idx) => {
                listeners.remove(idx);
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub(crate) fn connected(&self) {
        self.emit(|l| l.on_connected());
    }

    pub(crate) fn disconnected(&self) {
        self.emit(|l| l.on_disconnected());
    }

    pub(crate) fn connect_error(&self, cause: &TransportError) {
        self.emit(|l| l.on_connect_error(cause));
    }

    pub(crate) fn error(&self, error: &ClubbyError) {
        self.emit(|l| l.on_error(error));
    }

    pub(crate) fn state_changed(&self, state: ConnectionState) {
        self.emit(|l| l.on_state_changed(state));
    }

    pub(crate) fn data_sending(&self, text: &str) {
        self.emit(|l| l.on_data_sending(text));
    }

    pub(crate) fn data_received(&self, text: &str) {
        self.emit(|l| l.on_data_received(text));
    }

    /// Deliver a callback fault to every observer.
    ///
    /// Panics raised while handling the fault are logged and dropped.
    pub(crate) fn callback_error(&self, fault: &CallbackFault) {
        tracing::error!(fault = %fault, "callback panicked");
        for listener in self.snapshot() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener.on_callback_error(fault)))
            {
                let nested = CallbackFault::from_panic(panic.as_ref());
                tracing::error!(fault = %nested, "on_callback_error panicked; ignoring");
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn ClubbyListener>> {
        self.listeners.read().clone()
    }

    fn emit(&self, event: impl Fn(&dyn ClubbyListener)) {
        let mut faults = Vec::new();
        for listener in self.snapshot() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| event(listener.as_ref()))) {
                faults.push(CallbackFault::from_panic(panic.as_ref()));
            }
        }
        for fault in &faults {
            self.callback_error(fault);
        }
    }
}

fn same_listener(a: &Arc<dyn ClubbyListener>, b: &Arc<dyn ClubbyListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
