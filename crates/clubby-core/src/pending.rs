//! Registry of in-flight calls.
//!
//! Every path that can resolve a call (response routing, deadline timer,
//! failed send) goes through [`PendingCalls::pop`]. The entry is handed out
//! exactly once, so a call resolves at most once no matter which path wins.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use serde_json::Value;

use crate::{CallError, CallId, TimerHandle};

/// What a call resolves with: the raw response payload, or a call-scoped error.
pub(crate) type Outcome = Result<Option<Value>, CallError>;

/// Resolution callback, closed over the caller's expected response shape.
pub(crate) type Resolver = Box<dyn FnOnce(Outcome) + Send>;

/// An in-flight call awaiting resolution.
pub(crate) struct PendingCall {
    pub(crate) id: CallId,
    pub(crate) command: String,
    resolver: Resolver,
    timer: Option<TimerHandle>,
}

impl PendingCall {
    pub(crate) fn new(id: CallId, command: &str, resolver: Resolver) -> Self {
        Self {
            id,
            command: command.to_string(),
            resolver,
            timer: None,
        }
    }

    /// Cancel the deadline timer, if one was armed.
    pub(crate) fn cancel_timer(&self) {
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
    }

    /// Consume the call and hand the outcome to its listener.
    pub(crate) fn resolve(self, outcome: Outcome) {
        self.cancel_timer();
        (self.resolver)(outcome);
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("timer", &self.timer.is_some())
            .finish_non_exhaustive()
    }
}

/// Thread-safe map from call id to pending call.
#[derive(Default)]
pub(crate) struct PendingCalls {
    calls: Mutex<HashMap<CallId, PendingCall>>,
}

impl PendingCalls {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a call under its (freshly allocated) id.
    ///
    /// Ids are unique by construction; a duplicate is rejected and handed
    /// back so the existing entry is never clobbered.
    pub(crate) fn insert(&self, call: PendingCall) -> Result<(), PendingCall> {
        let mut calls = self.calls.lock();
        if calls.contains_key(&call.id) {
            debug_assert!(false, "call id {} registered twice", call.id);
            tracing::error!(call_id = call.id, "call id already pending; refusing");
            return Err(call);
        }
        let call_id = call.id;
        let command = call.command.clone();
        calls.insert(call_id, call);
        tracing::debug!(
            call_id,
            command = command.as_str(),
            pending_len = calls.len(),
            "registered pending call"
        );
        Ok(())
    }

    /// Attach the deadline timer to a registered call.
    ///
    /// If the call already resolved, the timer is cancelled on the spot.
    pub(crate) fn attach_timer(&self, id: CallId, timer: TimerHandle) {
        let mut calls = self.calls.lock();
        match calls.get_mut(&id) {
            Some(call) => call.timer = Some(timer),
            None => {
                drop(calls);
                timer.cancel();
            }
        }
    }

    /// Atomically remove and return the call registered under `id`.
    pub(crate) fn pop(&self, id: CallId) -> Option<PendingCall> {
        self.calls.lock().remove(&id)
    }

    pub(crate) fn contains(&self, id: CallId) -> bool {
        self.calls.lock().contains_key(&id)
    }

    /// Sorted ids of in-flight calls (for diagnostics).
    pub(crate) fn ids(&self) -> Vec<CallId> {
        let calls = self.calls.lock();
        let mut ids: Vec<CallId> = calls.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_call(id: CallId, hits: &Arc<AtomicUsize>) -> PendingCall {
        let hits = hits.clone();
        PendingCall::new(
            id,
            "test",
            Box::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn pop_hands_out_entry_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let registry = PendingCalls::new();
        registry.insert(counting_call(1, &hits)).unwrap();

        assert!(registry.contains(1));
        let call = registry.pop(1).expect("registered call");
        assert!(registry.pop(1).is_none());

        call.resolve(Ok(None));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn ids_are_sorted() {
        let hits = Arc::new(AtomicUsize::new(0));
        let registry = PendingCalls::new();
        for id in [5, 2, 9] {
            registry.insert(counting_call(id, &hits)).unwrap();
        }
        assert_eq!(registry.ids(), vec![2, 5, 9]);
    }

    #[test]
    fn concurrent_pops_resolve_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(PendingCalls::new());
        registry.insert(counting_call(7, &hits)).unwrap();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    if let Some(call) = registry.pop(7) {
                        call.resolve(Err(CallError::Timeout));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
