//! Connection state.

use core::fmt;

use tokio::sync::watch;

/// Lifecycle of the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    NotConnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Current state, readable from any thread and observable through a watch
/// channel.
///
/// Only the session's event loop writes it.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl Default for StateCell {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::NotConnected);
        Self { tx }
    }
}

impl StateCell {
    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Store `next`, returning the previous state.
    pub(crate) fn replace(&self, next: ConnectionState) -> ConnectionState {
        self.tx.send_replace(next)
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}
