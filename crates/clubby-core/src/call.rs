//! Per-call options and result delivery.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use crate::envelope::{self, CallId};
use crate::pending::Outcome;
use crate::{CallError, DecodeError};

/// Options for a single call.
///
/// A session keeps a default set; passing `Some(options)` to a call replaces
/// the defaults for that call only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallOptions {
    /// Deadline in seconds. Zero means no deadline.
    pub timeout_secs: u32,
}

impl CallOptions {
    pub fn with_timeout(timeout_secs: u32) -> Self {
        Self { timeout_secs }
    }
}

/// Receives the result of one call.
///
/// Exactly one of the two methods is called, exactly once, unless the call
/// never resolves (no deadline and no response).
pub trait CallListener<R>: Send + 'static {
    fn on_response(self, response: R);
    fn on_error(self, error: CallError);
}

/// [`CallListener`] backed by a closure taking the call's result.
pub struct FnListener<F> {
    f: F,
}

/// Wrap a closure as a call listener.
///
/// ```ignore
/// session.call("//api", "/v1/Ping", &(), on_result(|res: Result<Value, CallError>| {
///     println!("{res:?}");
/// }), None)?;
/// ```
pub fn on_result<R, F>(f: F) -> FnListener<F>
where
    F: FnOnce(Result<R, CallError>) + Send + 'static,
{
    FnListener { f }
}

impl<R, F> CallListener<R> for FnListener<F>
where
    F: FnOnce(Result<R, CallError>) + Send + 'static,
{
    fn on_response(self, response: R) {
        (self.f)(Ok(response))
    }

    fn on_error(self, error: CallError) {
        (self.f)(Err(error))
    }
}

impl<R: Send + 'static> CallListener<R> for oneshot::Sender<Result<R, CallError>> {
    fn on_response(self, response: R) {
        let _ = self.send(Ok(response));
    }

    fn on_error(self, error: CallError) {
        let _ = self.send(Err(error));
    }
}

/// Decode the outcome into the listener's shape and hand it over.
///
/// A payload that does not fit `R` is shown to `mismatch` first and then
/// reaches the listener as [`CallError::Decode`].
pub(crate) fn deliver<R, L>(listener: L, outcome: Outcome, mismatch: impl FnOnce(&DecodeError))
where
    R: DeserializeOwned,
    L: CallListener<R>,
{
    let decoded = outcome.and_then(|payload| {
        envelope::decode_payload::<R>(payload).map_err(|e| {
            mismatch(&e);
            CallError::Decode(e)
        })
    });
    match decoded {
        Ok(response) => listener.on_response(response),
        Err(error) => listener.on_error(error),
    }
}

/// Future resolving to the result of a call started with
/// [`ClubbySession::request`](crate::ClubbySession::request).
///
/// Dropping it does not cancel the call; the result is discarded.
#[derive(Debug)]
pub struct ReplyFuture<R> {
    id: CallId,
    rx: oneshot::Receiver<Result<R, CallError>>,
}

impl<R> ReplyFuture<R> {
    pub(crate) fn new(id: CallId, rx: oneshot::Receiver<Result<R, CallError>>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> CallId {
        self.id
    }
}

impl<R> Future for ReplyFuture<R> {
    type Output = Result<R, CallError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx
            .poll_unpin(cx)
            .map(|received| received.unwrap_or(Err(CallError::Dropped)))
    }
}
