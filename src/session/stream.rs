//! Stream handles: server-to-client subscriptions and client-to-server uploads.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::HubError;
use crate::protocol::{CancelInvocation, Completion, Message, StreamItem};
use crate::session::registry::CompletionCallback;
use crate::session::HubSession;

/// Callback receiving one element of a server stream.
pub(crate) type ItemCallback = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback receiving the server-initiated abort of a stream.
pub(crate) type CancelCallback =
    Arc<dyn Fn(CancelInvocation) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct SubscriptionCallbacks {
    next: Option<ItemCallback>,
    complete: Option<CompletionCallback>,
    error: Option<CancelCallback>,
}

/// Callback slots for one active server-to-client stream.
///
/// The registry holds this behind an `Arc`; dispatch snapshots the individual
/// callbacks and invokes them without holding the slot lock.
#[derive(Default)]
pub(crate) struct StreamSubscription {
    callbacks: RwLock<SubscriptionCallbacks>,
}

impl StreamSubscription {
    pub(crate) async fn next_callback(&self) -> Option<ItemCallback> {
        self.callbacks.read().await.next.clone()
    }

    pub(crate) async fn complete_callback(&self) -> Option<CompletionCallback> {
        self.callbacks.read().await.complete.clone()
    }

    pub(crate) async fn error_callback(&self) -> Option<CancelCallback> {
        self.callbacks.read().await.error.clone()
    }
}

/// Handle to a server-to-client stream started with
/// [`HubSession::stream`](crate::HubSession::stream).
///
/// Subscribe to receive items; the stream ends when the server sends a
/// completion (normal end) or cancels the invocation (abort). Either terminal
/// event unregisters the subscription.
pub struct StreamHandle {
    invocation_id: String,
    subscription: Arc<StreamSubscription>,
}

impl StreamHandle {
    pub(crate) fn new(invocation_id: String, subscription: Arc<StreamSubscription>) -> Self {
        Self {
            invocation_id,
            subscription,
        }
    }

    /// The id correlating this stream's items and terminal message.
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    /// Installs the three stream callbacks, replacing any previous set.
    pub async fn subscribe<N, NFut, C, CFut, E, EFut>(
        &self,
        on_next: N,
        on_complete: C,
        on_error: E,
    ) where
        N: Fn(Value) -> NFut + Send + Sync + 'static,
        NFut: Future<Output = ()> + Send + 'static,
        C: Fn(Completion) -> CFut + Send + Sync + 'static,
        CFut: Future<Output = ()> + Send + 'static,
        E: Fn(CancelInvocation) -> EFut + Send + Sync + 'static,
        EFut: Future<Output = ()> + Send + 'static,
    {
        let mut callbacks = self.subscription.callbacks.write().await;
        callbacks.next = Some(Arc::new(move |item| -> BoxFuture<'static, ()> {
            Box::pin(on_next(item))
        }));
        callbacks.complete = Some(Arc::new(move |completion| -> BoxFuture<'static, ()> {
            Box::pin(on_complete(completion))
        }));
        callbacks.error = Some(Arc::new(move |cancel| -> BoxFuture<'static, ()> {
            Box::pin(on_error(cancel))
        }));
    }
}

/// Handle to a client-to-server upload stream, scoped by
/// [`HubSession::client_stream`](crate::HubSession::client_stream).
///
/// The surrounding scope sends the stream invocation before the closure runs
/// and the terminating completion after it returns, on every exit path. The
/// handle itself only pushes items.
pub struct ClientStream {
    session: HubSession,
    invocation_id: String,
}

impl ClientStream {
    pub(crate) fn new(session: HubSession, invocation_id: String) -> Self {
        Self {
            session,
            invocation_id,
        }
    }

    /// The id this upload stream sends under.
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    /// Pushes one item to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport no longer accepts frames.
    pub async fn send(&self, item: Value) -> Result<(), HubError> {
        let message = Message::StreamItem(StreamItem {
            invocation_id: self.invocation_id.clone(),
            item,
        });
        self.session.send_message(&message).await
    }
}
