//! Hub session orchestration.
//!
//! This module drives the protocol state machine on top of the transport
//! channels: it decodes inbound deliveries, correlates completions and stream
//! items with the registry, routes server-initiated invocations to event
//! handlers, and builds outbound frames for the public send/stream API.

mod registry;
mod stream;

pub use stream::{ClientStream, StreamHandle};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::HubError;
use crate::protocol::{
    CancelInvocation, Completion, Invocation, JsonCodec, Message, StreamInvocation, StreamItem,
};
use crate::session::registry::{CompletionCallback, EventCallback, InvocationEntry, Registry};
use crate::session::stream::StreamSubscription;
use crate::transport::{InboundReceiver, OutboundSender, TransportEvent};

type LifecycleCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Single-slot lifecycle callbacks; re-registration is last-write-wins.
#[derive(Default)]
struct LifecycleCallbacks {
    on_open: Option<LifecycleCallback>,
    on_close: Option<LifecycleCallback>,
    on_error: Option<CompletionCallback>,
}

/// Whether the dispatch loop keeps consuming inbound messages.
#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    Stop,
}

/// A client-side hub session.
///
/// The session owns the invocation registry and is the only component that
/// mutates it. Handles are cheap to clone and share the same session, so
/// event handlers can capture one and issue their own sends.
///
/// Inbound dispatch is a single cooperative path: [`run`](Self::run) processes
/// one message at a time, awaiting each handler before moving on. This trades
/// inbound throughput for deterministic per-message ordering.
#[derive(Clone)]
pub struct HubSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    registry: RwLock<Registry>,
    lifecycle: RwLock<LifecycleCallbacks>,
    /// Attached to outbound Invocation/StreamInvocation frames.
    headers: HashMap<String, String>,
    outbound: OutboundSender,
    /// Taken by the first call to `run`.
    inbound: Mutex<Option<InboundReceiver>>,
}

impl HubSession {
    /// Creates a session over the transport's channel pair.
    pub fn new(outbound: OutboundSender, inbound: InboundReceiver) -> Self {
        Self::with_headers(outbound, inbound, HashMap::new())
    }

    /// Creates a session that carries `headers` on every outbound invocation.
    pub fn with_headers(
        outbound: OutboundSender,
        inbound: InboundReceiver,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                registry: RwLock::new(Registry::default()),
                lifecycle: RwLock::new(LifecycleCallbacks::default()),
                headers,
                outbound,
                inbound: Mutex::new(Some(inbound)),
            }),
        }
    }

    /// Drives the session until the transport closes or a fatal error occurs.
    ///
    /// Messages are dispatched in delivery order, each to completion before
    /// the next. Returns `Ok(())` on a normal close (transport closed, or a
    /// server `Close` without error) after firing the close callback.
    ///
    /// # Errors
    ///
    /// - [`HubError::AlreadyRunning`] if the session is already being driven.
    /// - [`HubError::Protocol`] on a payload that fails to decode.
    /// - [`HubError::Server`] on `Close.error`, or on `Completion.error` with
    ///   no error callback registered.
    pub async fn run(&self) -> Result<(), HubError> {
        let mut inbound = self
            .inner
            .inbound
            .lock()
            .await
            .take()
            .ok_or(HubError::AlreadyRunning)?;

        debug!("session loop started");
        while let Some(event) = inbound.recv().await {
            match event {
                TransportEvent::Opened => {
                    let callback = self.inner.lifecycle.read().await.on_open.clone();
                    if let Some(callback) = callback {
                        callback().await;
                    }
                }
                TransportEvent::Payload(raw) => {
                    for message in JsonCodec::decode(&raw)? {
                        if self.dispatch(message).await? == Flow::Stop {
                            self.fire_on_close().await;
                            return Ok(());
                        }
                    }
                }
                TransportEvent::Closed => break,
            }
        }

        debug!("transport closed, session loop ending");
        self.fire_on_close().await;
        Ok(())
    }

    /// Registers a handler for a server-to-client event.
    ///
    /// Several handlers may share an event name; an inbound invocation fires
    /// all of them, in registration order. Handlers live for the whole
    /// session.
    pub async fn on<F, Fut>(&self, event: &str, handler: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        debug!(event, "handler registered");
        let callback: EventCallback = Arc::new(move |args| -> BoxFuture<'static, ()> {
            Box::pin(handler(args))
        });
        self.inner.registry.write().await.add_handler(event, callback);
    }

    /// Sets the callback fired when the transport reports the connection open.
    pub async fn on_open<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.lifecycle.write().await.on_open =
            Some(Arc::new(move || -> BoxFuture<'static, ()> {
                Box::pin(callback())
            }));
    }

    /// Sets the callback fired when the session ends normally.
    pub async fn on_close<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.lifecycle.write().await.on_close =
            Some(Arc::new(move || -> BoxFuture<'static, ()> {
                Box::pin(callback())
            }));
    }

    /// Sets the callback receiving server-reported completion errors.
    ///
    /// Single slot: registering again replaces the previous callback. Without
    /// one, a `Completion.error` is fatal to the session; a server-reported
    /// application error is never silently dropped.
    pub async fn on_error<F, Fut>(&self, callback: F)
    where
        F: Fn(Completion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.lifecycle.write().await.on_error =
            Some(Arc::new(move |completion| -> BoxFuture<'static, ()> {
                Box::pin(callback(completion))
            }));
    }

    /// Calls a hub method without tracking its result.
    ///
    /// The invocation still carries a fresh id; a completion the server sends
    /// back later simply finds no registry entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport no longer accepts frames.
    pub async fn send(&self, method: &str, arguments: Vec<Value>) -> Result<(), HubError> {
        let message = self.invocation(method, arguments);
        self.send_message(&message).await
    }

    /// Calls a hub method and registers `on_result` for its completion.
    ///
    /// The callback receives the matching [`Completion`] exactly once, after
    /// which the pending entry is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport no longer accepts frames.
    pub async fn invoke<F, Fut>(
        &self,
        method: &str,
        arguments: Vec<Value>,
        on_result: F,
    ) -> Result<(), HubError>
    where
        F: Fn(Completion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let invocation_id = Uuid::new_v4().to_string();
        let message = Message::Invocation(Invocation {
            invocation_id: Some(invocation_id.clone()),
            target: method.to_string(),
            arguments,
            headers: self.inner.headers.clone(),
        });

        let callback: CompletionCallback =
            Arc::new(move |completion| -> BoxFuture<'static, ()> {
                Box::pin(on_result(completion))
            });
        self.inner
            .registry
            .write()
            .await
            .add_pending(invocation_id, callback);

        self.send_message(&message).await
    }

    /// Starts a server-to-client stream for `event`.
    ///
    /// Subscribe on the returned handle to receive items. The stream ends on
    /// the server's completion or cancellation.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport no longer accepts frames.
    pub async fn stream(
        &self,
        event: &str,
        arguments: Vec<Value>,
    ) -> Result<StreamHandle, HubError> {
        let invocation_id = Uuid::new_v4().to_string();
        let subscription = Arc::new(StreamSubscription::default());
        self.inner
            .registry
            .write()
            .await
            .add_stream(invocation_id.clone(), subscription.clone());

        let message = Message::StreamInvocation(StreamInvocation {
            invocation_id: invocation_id.clone(),
            target: event.to_string(),
            arguments,
            headers: self.inner.headers.clone(),
        });
        self.send_message(&message).await?;
        Ok(StreamHandle::new(invocation_id, subscription))
    }

    /// Opens a client-to-server upload stream scoped to `scope`.
    ///
    /// Sends the stream invocation, runs the closure with a [`ClientStream`]
    /// handle for pushing items, and sends the terminating completion exactly
    /// once after the closure returns, also when it failed, so the server
    /// always observes a clean end. A failure inside the closure takes
    /// precedence over a failure to send the completion.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or a transport error from the stream
    /// invocation or terminating completion.
    pub async fn client_stream<F, Fut, T>(&self, target: &str, scope: F) -> Result<T, HubError>
    where
        F: FnOnce(ClientStream) -> Fut,
        Fut: Future<Output = Result<T, HubError>>,
    {
        let invocation_id = Uuid::new_v4().to_string();
        let open = Message::StreamInvocation(StreamInvocation {
            invocation_id: invocation_id.clone(),
            target: target.to_string(),
            arguments: Vec::new(),
            headers: self.inner.headers.clone(),
        });
        self.send_message(&open).await?;

        let outcome = scope(ClientStream::new(self.clone(), invocation_id.clone())).await;

        let terminator = Message::Completion(Completion {
            invocation_id,
            result: None,
            error: None,
        });
        let terminated = self.send_message(&terminator).await;

        match outcome {
            Ok(value) => {
                terminated?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }

    fn invocation(&self, method: &str, arguments: Vec<Value>) -> Message {
        Message::Invocation(Invocation {
            invocation_id: Some(Uuid::new_v4().to_string()),
            target: method.to_string(),
            arguments,
            headers: self.inner.headers.clone(),
        })
    }

    /// Encodes and hands one frame to the transport, suspending until the
    /// outbound channel accepts it.
    pub(crate) async fn send_message(&self, message: &Message) -> Result<(), HubError> {
        let frame = JsonCodec::encode(message)?;
        debug!(kind = message.kind(), len = frame.len(), "frame out");
        self.inner
            .outbound
            .send(frame)
            .await
            .map_err(|_| HubError::TransportClosed)
    }

    async fn dispatch(&self, message: Message) -> Result<Flow, HubError> {
        match message {
            // Liveness signal for the transport layer; never routed further.
            Message::Ping => {}
            Message::Invocation(invocation) => self.handle_invocation(invocation).await,
            Message::StreamItem(item) => self.handle_stream_item(item).await,
            Message::Completion(completion) => return self.handle_completion(completion).await,
            Message::CancelInvocation(cancel) => self.handle_cancel(cancel).await,
            Message::StreamInvocation(invocation) => {
                // The client does not serve streams to the server.
                debug!(target = %invocation.target, "ignoring inbound stream invocation");
            }
            Message::Close(close) => {
                return match close.error {
                    Some(error) => Err(HubError::Server(error)),
                    None => Ok(Flow::Stop),
                };
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_invocation(&self, invocation: Invocation) {
        let handlers = self
            .inner
            .registry
            .read()
            .await
            .lookup_by_target(&invocation.target);
        if handlers.is_empty() {
            warn!(target = %invocation.target, "no handler registered for event");
            return;
        }
        for handler in handlers {
            handler(invocation.arguments.clone()).await;
        }
    }

    async fn handle_stream_item(&self, item: StreamItem) {
        let entries = self
            .inner
            .registry
            .read()
            .await
            .lookup_by_id(&item.invocation_id);
        if entries.is_empty() {
            warn!(invocation_id = %item.invocation_id, "stream item matched no active stream");
            return;
        }
        for entry in entries {
            match entry {
                InvocationEntry::Stream(subscription) => {
                    if let Some(callback) = subscription.next_callback().await {
                        callback(item.item.clone()).await;
                    }
                }
                InvocationEntry::Pending(_) => {
                    warn!(invocation_id = %item.invocation_id, "stream item addressed a unary invocation");
                }
            }
        }
    }

    async fn handle_completion(&self, completion: Completion) -> Result<Flow, HubError> {
        let removed = self
            .inner
            .registry
            .write()
            .await
            .remove_by_id(&completion.invocation_id);
        if removed.is_empty() {
            warn!(invocation_id = %completion.invocation_id, "completion matched no pending invocation or stream");
        }

        if let Some(error) = &completion.error {
            let callback = self.inner.lifecycle.read().await.on_error.clone();
            match callback {
                Some(callback) => callback(completion.clone()).await,
                None => return Err(HubError::Server(error.clone())),
            }
        }

        for entry in removed {
            match entry {
                InvocationEntry::Pending(callback) => callback(completion.clone()).await,
                InvocationEntry::Stream(subscription) => {
                    if let Some(callback) = subscription.complete_callback().await {
                        callback(completion.clone()).await;
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_cancel(&self, cancel: CancelInvocation) {
        let removed = self
            .inner
            .registry
            .write()
            .await
            .remove_by_id(&cancel.invocation_id);
        if removed.is_empty() {
            warn!(invocation_id = %cancel.invocation_id, "cancellation matched no active stream");
            return;
        }
        for entry in removed {
            match entry {
                InvocationEntry::Stream(subscription) => {
                    if let Some(callback) = subscription.error_callback().await {
                        callback(cancel.clone()).await;
                    }
                }
                InvocationEntry::Pending(_) => {
                    warn!(invocation_id = %cancel.invocation_id, "cancellation addressed a unary invocation");
                }
            }
        }
    }

    async fn fire_on_close(&self) {
        let callback = self.inner.lifecycle.read().await.on_close.clone();
        if let Some(callback) = callback {
            callback().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    fn session() -> (
        HubSession,
        mpsc::Receiver<Vec<u8>>,
        mpsc::Sender<TransportEvent>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(16);
        let (in_tx, in_rx) = mpsc::channel(16);
        (HubSession::new(out_tx, in_rx), out_rx, in_tx)
    }

    fn spawn_run(session: &HubSession) -> JoinHandle<Result<(), HubError>> {
        let session = session.clone();
        tokio::spawn(async move { session.run().await })
    }

    fn payload(record: &str) -> TransportEvent {
        TransportEvent::Payload(format!("{record}\u{1e}").into_bytes())
    }

    async fn next_outbound(rx: &mut mpsc::Receiver<Vec<u8>>) -> Message {
        let raw = rx.recv().await.expect("expected an outbound frame");
        let mut messages = JsonCodec::decode(&raw).unwrap();
        assert_eq!(messages.len(), 1, "one message per outbound frame");
        messages.remove(0)
    }

    #[tokio::test]
    async fn send_attaches_a_fresh_invocation_id() {
        let (session, mut out_rx, _in_tx) = session();
        session
            .send("SendMessage", vec![serde_json::json!("hi")])
            .await
            .unwrap();
        session.send("SendMessage", vec![]).await.unwrap();

        let first = next_outbound(&mut out_rx).await;
        let second = next_outbound(&mut out_rx).await;
        let (first, second) = match (first, second) {
            (Message::Invocation(a), Message::Invocation(b)) => (a, b),
            other => panic!("expected two invocations, got {:?}", other),
        };
        assert_eq!(first.target, "SendMessage");
        assert!(first.invocation_id.is_some());
        assert_ne!(first.invocation_id, second.invocation_id);
    }

    #[tokio::test]
    async fn invoke_correlates_completion_and_fires_once() {
        let (session, mut out_rx, in_tx) = session();
        let results = Arc::new(StdMutex::new(Vec::new()));

        let captured = results.clone();
        session
            .invoke("Add", vec![serde_json::json!(2)], move |completion| {
                let captured = captured.clone();
                async move {
                    captured.lock().unwrap().push(completion.result);
                }
            })
            .await
            .unwrap();

        let id = match next_outbound(&mut out_rx).await {
            Message::Invocation(inv) => inv.invocation_id.unwrap(),
            other => panic!("expected Invocation, got {:?}", other),
        };

        let runner = spawn_run(&session);
        let completion = format!("{{\"type\":3,\"invocationId\":\"{id}\",\"result\":4}}");
        in_tx.send(payload(&completion)).await.unwrap();
        // A second completion for the same id finds no entry and is a no-op.
        in_tx.send(payload(&completion)).await.unwrap();
        drop(in_tx);

        runner.await.unwrap().unwrap();
        assert_eq!(*results.lock().unwrap(), vec![Some(serde_json::json!(4))]);
    }

    #[tokio::test]
    async fn handlers_fire_in_registration_order() {
        let (session, _out_rx, in_tx) = session();
        let log = Arc::new(StdMutex::new(Vec::new()));

        for tag in [1usize, 2] {
            let log = log.clone();
            session
                .on("Foo", move |args| {
                    let log = log.clone();
                    async move {
                        log.lock().unwrap().push((tag, args));
                    }
                })
                .await;
        }
        let log_other = log.clone();
        session
            .on("Bar", move |args| {
                let log = log_other.clone();
                async move {
                    log.lock().unwrap().push((99, args));
                }
            })
            .await;

        let runner = spawn_run(&session);
        in_tx
            .send(payload("{\"type\":1,\"target\":\"Foo\",\"arguments\":[1,2]}"))
            .await
            .unwrap();
        drop(in_tx);
        runner.await.unwrap().unwrap();

        let args = vec![serde_json::json!(1), serde_json::json!(2)];
        assert_eq!(*log.lock().unwrap(), vec![(1, args.clone()), (2, args)]);
    }

    #[tokio::test]
    async fn unmatched_event_and_ping_are_non_fatal() {
        let (session, _out_rx, in_tx) = session();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        session
            .on("Known", move |_args| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        let runner = spawn_run(&session);
        in_tx
            .send(payload("{\"type\":1,\"target\":\"Unknown\",\"arguments\":[]}"))
            .await
            .unwrap();
        in_tx.send(payload("{\"type\":6}")).await.unwrap();
        drop(in_tx);

        runner.await.unwrap().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stream_delivers_items_then_completes_and_goes_stale() {
        let (session, _out_rx, in_tx) = session();
        let handle = session.stream("Counter", vec![serde_json::json!(3)]).await.unwrap();
        let id = handle.invocation_id().to_string();

        let items = Arc::new(StdMutex::new(Vec::new()));
        let completed = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicUsize::new(0));
        {
            let items = items.clone();
            let completed = completed.clone();
            let cancelled = cancelled.clone();
            handle
                .subscribe(
                    move |item| {
                        let items = items.clone();
                        async move {
                            items.lock().unwrap().push(item);
                        }
                    },
                    move |_completion| {
                        let completed = completed.clone();
                        async move {
                            completed.fetch_add(1, Ordering::SeqCst);
                        }
                    },
                    move |_cancel| {
                        let cancelled = cancelled.clone();
                        async move {
                            cancelled.fetch_add(1, Ordering::SeqCst);
                        }
                    },
                )
                .await;
        }

        let runner = spawn_run(&session);
        for n in 0..3 {
            let item = format!("{{\"type\":2,\"invocationId\":\"{id}\",\"item\":{n}}}");
            in_tx.send(payload(&item)).await.unwrap();
        }
        in_tx
            .send(payload(&format!("{{\"type\":3,\"invocationId\":\"{id}\"}}")))
            .await
            .unwrap();
        // The subscription is gone: a late item only logs.
        in_tx
            .send(payload(&format!(
                "{{\"type\":2,\"invocationId\":\"{id}\",\"item\":99}}"
            )))
            .await
            .unwrap();
        drop(in_tx);
        runner.await.unwrap().unwrap();

        assert_eq!(
            *items.lock().unwrap(),
            vec![serde_json::json!(0), serde_json::json!(1), serde_json::json!(2)]
        );
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_invocation_aborts_the_stream() {
        let (session, _out_rx, in_tx) = session();
        let handle = session.stream("Feed", vec![]).await.unwrap();
        let id = handle.invocation_id().to_string();

        let cancelled = Arc::new(AtomicUsize::new(0));
        {
            let cancelled = cancelled.clone();
            handle
                .subscribe(
                    |_item| async {},
                    |_completion| async {},
                    move |_cancel| {
                        let cancelled = cancelled.clone();
                        async move {
                            cancelled.fetch_add(1, Ordering::SeqCst);
                        }
                    },
                )
                .await;
        }

        let runner = spawn_run(&session);
        in_tx
            .send(payload(&format!("{{\"type\":5,\"invocationId\":\"{id}\"}}")))
            .await
            .unwrap();
        drop(in_tx);
        runner.await.unwrap().unwrap();
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completion_error_without_error_callback_is_fatal() {
        let (session, _out_rx, in_tx) = session();
        let runner = spawn_run(&session);
        in_tx
            .send(payload(
                "{\"type\":3,\"invocationId\":\"x\",\"error\":\"boom\"}",
            ))
            .await
            .unwrap();

        let err = runner.await.unwrap().unwrap_err();
        match err {
            HubError::Server(message) => assert_eq!(message, "boom"),
            other => panic!("expected Server error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn completion_error_with_error_callback_continues() {
        let (session, _out_rx, in_tx) = session();
        let errors = Arc::new(StdMutex::new(Vec::new()));
        let captured = errors.clone();
        session
            .on_error(move |completion| {
                let captured = captured.clone();
                async move {
                    captured.lock().unwrap().push(completion.error);
                }
            })
            .await;

        let runner = spawn_run(&session);
        in_tx
            .send(payload(
                "{\"type\":3,\"invocationId\":\"x\",\"error\":\"boom\"}",
            ))
            .await
            .unwrap();
        // Dispatch keeps going afterwards.
        in_tx.send(payload("{\"type\":6}")).await.unwrap();
        drop(in_tx);

        runner.await.unwrap().unwrap();
        assert_eq!(*errors.lock().unwrap(), vec![Some("boom".to_string())]);
    }

    #[tokio::test]
    async fn close_with_error_is_fatal() {
        let (session, _out_rx, in_tx) = session();
        let runner = spawn_run(&session);
        in_tx
            .send(payload("{\"type\":7,\"error\":\"kicked\"}"))
            .await
            .unwrap();

        assert!(matches!(
            runner.await.unwrap(),
            Err(HubError::Server(message)) if message == "kicked"
        ));
    }

    #[tokio::test]
    async fn close_without_error_stops_cleanly() {
        let (session, _out_rx, in_tx) = session();
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        session
            .on_close(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        let runner = spawn_run(&session);
        in_tx.send(payload("{\"type\":7}")).await.unwrap();

        runner.await.unwrap().unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_notification_fires_callback() {
        let (session, _out_rx, in_tx) = session();
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        session
            .on_open(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        let runner = spawn_run(&session);
        in_tx.send(TransportEvent::Opened).await.unwrap();
        drop(in_tx);
        runner.await.unwrap().unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_discriminant_aborts_the_session() {
        let (session, _out_rx, in_tx) = session();
        let runner = spawn_run(&session);
        in_tx.send(payload("{\"type\":9}")).await.unwrap();

        assert!(matches!(
            runner.await.unwrap(),
            Err(HubError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn run_can_only_be_called_once() {
        let (session, _out_rx, in_tx) = session();
        drop(in_tx);
        session.run().await.unwrap();
        assert!(matches!(
            session.run().await,
            Err(HubError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn client_stream_terminates_on_success() {
        let (session, mut out_rx, _in_tx) = session();
        session
            .client_stream("Upload", |stream| async move {
                stream.send(serde_json::json!(1)).await?;
                stream.send(serde_json::json!(2)).await?;
                Ok(())
            })
            .await
            .unwrap();

        let open = match next_outbound(&mut out_rx).await {
            Message::StreamInvocation(si) => si,
            other => panic!("expected StreamInvocation, got {:?}", other),
        };
        assert_eq!(open.target, "Upload");

        for expected in [serde_json::json!(1), serde_json::json!(2)] {
            match next_outbound(&mut out_rx).await {
                Message::StreamItem(item) => {
                    assert_eq!(item.invocation_id, open.invocation_id);
                    assert_eq!(item.item, expected);
                }
                other => panic!("expected StreamItem, got {:?}", other),
            }
        }

        match next_outbound(&mut out_rx).await {
            Message::Completion(completion) => {
                assert_eq!(completion.invocation_id, open.invocation_id);
                assert!(completion.result.is_none());
                assert!(completion.error.is_none());
            }
            other => panic!("expected Completion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn client_stream_terminates_on_failure_too() {
        let (session, mut out_rx, _in_tx) = session();
        let outcome: Result<(), HubError> = session
            .client_stream("Upload", |stream| async move {
                stream.send(serde_json::json!(1)).await?;
                Err(HubError::Server("caller gave up".to_string()))
            })
            .await;
        assert!(matches!(outcome, Err(HubError::Server(_))));

        let open = match next_outbound(&mut out_rx).await {
            Message::StreamInvocation(si) => si,
            other => panic!("expected StreamInvocation, got {:?}", other),
        };
        let _item = next_outbound(&mut out_rx).await;
        match next_outbound(&mut out_rx).await {
            Message::Completion(completion) => {
                assert_eq!(completion.invocation_id, open.invocation_id);
            }
            other => panic!("expected Completion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn headers_ride_on_outbound_invocations() {
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (_in_tx, in_rx) = mpsc::channel(16);
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer t".to_string());
        let session = HubSession::with_headers(out_tx, in_rx, headers.clone());

        session.send("Ping", vec![]).await.unwrap();
        match next_outbound(&mut out_rx).await {
            Message::Invocation(inv) => assert_eq!(inv.headers, headers),
            other => panic!("expected Invocation, got {:?}", other),
        }

        session.stream("Feed", vec![]).await.unwrap();
        match next_outbound(&mut out_rx).await {
            Message::StreamInvocation(si) => assert_eq!(si.headers, headers),
            other => panic!("expected StreamInvocation, got {:?}", other),
        }
    }
}
