//! Bookkeeping for in-flight invocations and event handlers.
//!
//! The registry is a pure data structure: no I/O, no locking of its own. The
//! session orchestrator owns the single instance and serializes access to it.
//!
//! Entries for unary invocations and stream subscriptions share one index
//! keyed by invocation id, so a terminal message removes whatever is
//! outstanding for its id in one O(1) operation. Event handlers live in an
//! append-only list per event name; registration order is firing order.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::protocol::Completion;
use crate::session::stream::StreamSubscription;

/// Handler for a server-to-client invocation, called with the argument list.
pub(crate) type EventCallback = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback receiving the completion of a tracked invocation or stream.
pub(crate) type CompletionCallback =
    Arc<dyn Fn(Completion) -> BoxFuture<'static, ()> + Send + Sync>;

/// An entry correlated by invocation id.
#[derive(Clone)]
pub(crate) enum InvocationEntry {
    /// A unary invocation awaiting its completion.
    Pending(CompletionCallback),
    /// An active server-to-client stream.
    Stream(Arc<StreamSubscription>),
}

/// Index of pending invocations, active streams, and event handlers.
#[derive(Default)]
pub(crate) struct Registry {
    by_id: HashMap<String, Vec<InvocationEntry>>,
    handlers: HashMap<String, Vec<EventCallback>>,
}

impl Registry {
    /// Tracks a unary invocation until its completion arrives.
    pub(crate) fn add_pending(&mut self, id: String, callback: CompletionCallback) {
        self.by_id
            .entry(id)
            .or_default()
            .push(InvocationEntry::Pending(callback));
    }

    /// Tracks a stream subscription until a terminal message arrives.
    pub(crate) fn add_stream(&mut self, id: String, subscription: Arc<StreamSubscription>) {
        self.by_id
            .entry(id)
            .or_default()
            .push(InvocationEntry::Stream(subscription));
    }

    /// Appends a handler for an event name. Handlers are never removed.
    pub(crate) fn add_handler(&mut self, event: &str, callback: EventCallback) {
        self.handlers
            .entry(event.to_string())
            .or_default()
            .push(callback);
    }

    /// Removes and returns every entry for the id. Removing an unknown id is
    /// a no-op yielding an empty vec.
    pub(crate) fn remove_by_id(&mut self, id: &str) -> Vec<InvocationEntry> {
        self.by_id.remove(id).unwrap_or_default()
    }

    /// Snapshot of the entries for an id, without mutating the index.
    pub(crate) fn lookup_by_id(&self, id: &str) -> Vec<InvocationEntry> {
        self.by_id.get(id).cloned().unwrap_or_default()
    }

    /// Snapshot of the handlers for an event name, in registration order.
    ///
    /// Callers invoke the snapshot after releasing the registry lock, so a
    /// handler registering or removing entries mid-dispatch cannot skip or
    /// double-fire its siblings.
    pub(crate) fn lookup_by_target(&self, event: &str) -> Vec<EventCallback> {
        self.handlers.get(event).cloned().unwrap_or_default()
    }
}
