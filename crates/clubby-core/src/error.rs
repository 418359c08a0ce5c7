//! Error codes and error types.

use core::fmt;

/// Status reported to a call listener when no response arrived in time.
pub const TIMEOUT_STATUS: i32 = 504;

/// Message reported alongside [`TIMEOUT_STATUS`].
pub const TIMEOUT_MESSAGE: &str = "Response timeout";

/// Status used when a successful response could not be decoded into the
/// shape the caller asked for.
pub const DECODE_STATUS: i32 = 500;

/// Transport-level errors.
#[derive(Debug)]
pub enum TransportError {
    Closed,
    Io(std::io::Error),
    Connect(String),
    WebSocket(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "transport closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Connect(msg) => write!(f, "connect failed: {msg}"),
            Self::WebSocket(msg) => write!(f, "websocket error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Encoding errors.
#[derive(Debug)]
pub enum EncodeError {
    Json(serde_json::Error),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "encode failed: {e}"),
        }
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
        }
    }
}

/// Decoding errors.
#[derive(Debug)]
pub enum DecodeError {
    /// The text is not a well-formed envelope.
    Envelope(serde_json::Error),
    /// A response payload does not match the expected shape.
    Payload(serde_json::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Envelope(e) => write!(f, "malformed envelope: {e}"),
            Self::Payload(e) => write!(f, "unexpected response payload: {e}"),
        }
    }
}

impl DecodeError {
    /// A copy carrying the same message, for a second recipient.
    pub(crate) fn duplicate(&self) -> Self {
        use serde::de::Error as _;
        match self {
            Self::Envelope(e) => Self::Envelope(serde_json::Error::custom(e)),
            Self::Payload(e) => Self::Payload(serde_json::Error::custom(e)),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Envelope(e) | Self::Payload(e) => Some(e),
        }
    }
}

/// A call-scoped failure, delivered only to the listener of that call.
#[derive(Debug)]
pub enum CallError {
    /// The peer answered with a non-zero status.
    Remote { status: i32, message: String },
    /// No response arrived before the call's deadline.
    Timeout,
    /// The response payload could not be decoded.
    Decode(DecodeError),
    /// The listener went away before the call resolved (future-based calls only).
    Dropped,
}

impl CallError {
    /// Numeric status in the protocol's terms.
    pub fn status(&self) -> i32 {
        match self {
            Self::Remote { status, .. } => *status,
            Self::Timeout => TIMEOUT_STATUS,
            Self::Decode(_) | Self::Dropped => DECODE_STATUS,
        }
    }

    /// Human-readable detail, as the peer would phrase it.
    pub fn message(&self) -> String {
        match self {
            Self::Remote { message, .. } => message.clone(),
            Self::Timeout => TIMEOUT_MESSAGE.to_string(),
            Self::Decode(e) => e.to_string(),
            Self::Dropped => "call dropped before resolution".to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote { status, message } => write!(f, "status {status}: {message}"),
            Self::Timeout => write!(f, "status {TIMEOUT_STATUS}: {TIMEOUT_MESSAGE}"),
            Self::Decode(e) => write!(f, "{e}"),
            Self::Dropped => write!(f, "call dropped before resolution"),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

/// A user callback (observer or call listener) panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFault {
    pub message: String,
}

impl CallbackFault {
    /// Build a fault from a panic payload caught with `catch_unwind`.
    pub fn from_panic(panic: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = panic.downcast_ref::<&str>() {
            format!("panic in callback: {s}")
        } else if let Some(s) = panic.downcast_ref::<String>() {
            format!("panic in callback: {s}")
        } else {
            "panic in callback".to_string()
        };
        Self { message }
    }
}

impl fmt::Display for CallbackFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CallbackFault {}

/// Connection-scoped and synchronous client errors.
#[derive(Debug)]
pub enum ClubbyError {
    /// A call was attempted while the transport was not open.
    NotConnected,
    Transport(TransportError),
    Encode(EncodeError),
    Decode(DecodeError),
}

impl fmt::Display for ClubbyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "clubby is not connected"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Encode(e) => write!(f, "{e}"),
            Self::Decode(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ClubbyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::NotConnected => None,
        }
    }
}

impl From<TransportError> for ClubbyError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<EncodeError> for ClubbyError {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

impl From<DecodeError> for ClubbyError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}
