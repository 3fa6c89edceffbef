//! Application-facing client: one connection, one event bus, and a table
//! of in-flight requests.
//!
//! [`Client::connect`] returns a [`ClientDriver`]; the driver must be polled
//! (usually spawned with `tokio::spawn(driver.run())`) for received events to
//! reach the bus.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use mozaic_proto::{
    Correlated, EventRegistry, EventType, EventTypeId, Payload, RequestId, TypedEvent, WireEvent,
    events::{CONNECTED, Connected, DISCONNECTED, Disconnected},
};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::{
    bus::{EventBus, Subscription, SubscriptionId},
    connection::{Connection, ConnectionEvent, ConnectionState},
    error::ClientError,
};

type Failer = Box<dyn FnOnce(ClientError) + Send>;

type WireTap = dyn Fn(&WireEvent) -> anyhow::Result<()> + Send + Sync;

struct PendingRequest {
    response_type: EventTypeId,
    subscription: SubscriptionId,
    fail: Failer,
}

struct PendingTable {
    next_id: RequestId,
    entries: HashMap<RequestId, PendingRequest>,
}

impl PendingTable {
    fn allocate(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }
}

struct ClientInner {
    connection: Connection,
    bus: EventBus,
    pending: Mutex<PendingTable>,
    taps: Mutex<Vec<Arc<WireTap>>>,
    /// Set by `Client::close`; frames still queued are not dispatched.
    closed_locally: AtomicBool,
}

impl ClientInner {
    /// Drop a pending entry and its response subscription.
    fn settle(&self, request_id: RequestId) -> Option<PendingRequest> {
        let entry = self.pending.lock().entries.remove(&request_id)?;
        self.bus.unsubscribe(entry.response_type, entry.subscription);
        Some(entry)
    }

    fn fail_all(&self) -> usize {
        let entries: Vec<_> = self.pending.lock().entries.drain().collect();
        let count = entries.len();
        for (request_id, entry) in entries {
            self.bus.unsubscribe(entry.response_type, entry.subscription);
            trace!(request_id, "request failed: connection closed");
            (entry.fail)(ClientError::ConnectionClosed);
        }
        if count > 0 {
            debug!(count, "failed pending requests");
        }
        count
    }

    fn handle(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                self.bus.dispatch(&CONNECTED.create(Connected {}));
            }
            ConnectionEvent::Message(body) => {
                if self.closed_locally.load(Ordering::Acquire) {
                    trace!(len = body.len(), "dropping message received before local close");
                    return;
                }
                match WireEvent::decode(body) {
                    Ok(event) => {
                        self.tap(&event);
                        self.bus.dispatch_wire(&event);
                    }
                    Err(e) => warn!(error = %e, "Malformed wire event (ignored)"),
                }
            }
            ConnectionEvent::Disconnected { reason } => {
                self.fail_all();
                self.bus.dispatch(&DISCONNECTED.create(Disconnected { reason }));
            }
        }
    }

    fn tap(&self, event: &WireEvent) {
        let taps = self.taps.lock().clone();
        for tap in taps {
            if let Err(e) = tap(event) {
                warn!(type_id = event.type_id, error = %e, "Wire tap failed");
            }
        }
    }
}

/// Cheap-to-clone handle to a match client.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                connection: Connection::new(),
                bus: EventBus::new(registry),
                pending: Mutex::new(PendingTable {
                    next_id: 1,
                    entries: HashMap::new(),
                }),
                taps: Mutex::new(Vec::new()),
                closed_locally: AtomicBool::new(false),
            }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        self.inner.bus.registry()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Subscribe to events of `event_type` on this client's bus.
    pub fn on<T, F>(&self, event_type: &EventType<T>, handler: F) -> Result<Subscription, ClientError>
    where
        T: Send + 'static,
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(event_type, handler)
    }

    /// Observe every received event before it is decoded, including events
    /// of unregistered types. Taps run on the driver, ahead of the bus.
    pub fn tap<F>(&self, tap: F)
    where
        F: Fn(&WireEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.taps.lock().push(Arc::new(tap));
    }

    /// Start the handshake over `stream`.
    pub fn connect<S>(&self, stream: S, handshake: &[u8]) -> Result<ClientDriver, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let events = self.inner.connection.connect(stream, handshake)?;
        Ok(ClientDriver {
            inner: self.inner.clone(),
            events,
        })
    }

    pub async fn connect_tcp(
        &self,
        addr: SocketAddr,
        handshake: &[u8],
    ) -> Result<ClientDriver, ClientError> {
        let events = self.inner.connection.connect_tcp(addr, handshake).await?;
        Ok(ClientDriver {
            inner: self.inner.clone(),
            events,
        })
    }

    /// Encode `event` and queue it on the connection.
    pub fn send<T: Payload>(&self, event: &TypedEvent<T>) -> Result<(), ClientError> {
        let wire = event.to_wire()?;
        self.inner.connection.send(&wire.encode())?;
        trace!(type_id = wire.type_id, len = wire.payload.len(), "event sent");
        Ok(())
    }

    /// Send `event` with a fresh request id and wait for the `response_type`
    /// event carrying the same id.
    ///
    /// The returned future fails with `ConnectionClosed` if the connection
    /// closes first. It never times out on its own; see
    /// [`ResponseFuture::with_timeout`].
    pub fn request<Req, Resp>(
        &self,
        mut event: TypedEvent<Req>,
        response_type: &EventType<Resp>,
    ) -> Result<ResponseFuture<Resp>, ClientError>
    where
        Req: Payload + Correlated,
        Resp: Payload + Correlated + Clone,
    {
        if self.state() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }

        let request_id = self.inner.pending.lock().allocate();
        event.data_mut().set_request_id(request_id);

        let (tx, rx) = oneshot::channel::<Result<Resp, ClientError>>();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let weak = Arc::downgrade(&self.inner);
        let complete = tx.clone();
        let subscription = self.inner.bus.subscribe(response_type, move |response: &Resp| {
            if response.request_id() != request_id {
                return Ok(());
            }
            if let Some(inner) = weak.upgrade() {
                inner.settle(request_id);
            }
            if let Some(tx) = complete.lock().take() {
                let _ = tx.send(Ok(response.clone()));
            }
            Ok(())
        })?;

        let fail: Failer = Box::new(move |err| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(Err(err));
            }
        });
        self.inner.pending.lock().entries.insert(
            request_id,
            PendingRequest {
                response_type: response_type.id(),
                subscription: subscription.detach(),
                fail,
            },
        );

        if let Err(e) = self.send(&event) {
            self.inner.settle(request_id);
            return Err(e);
        }
        debug!(
            request_id,
            type_id = event.type_id(),
            response_type = response_type.id(),
            "request sent"
        );

        Ok(ResponseFuture {
            request_id,
            rx,
            client: Arc::downgrade(&self.inner),
        })
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().entries.len()
    }

    /// Close the connection and fail every pending request. Frames received
    /// but not yet dispatched are dropped.
    ///
    /// Returns `false` if the connection was already closed.
    pub fn close(&self) -> bool {
        let never_connected = self.state() == ConnectionState::Disconnected;
        self.inner.closed_locally.store(true, Ordering::Release);
        let closed = self.inner.connection.close();
        self.inner.fail_all();
        // Without a driver nobody else reports the close.
        if closed && never_connected {
            self.inner.bus.dispatch(&DISCONNECTED.create(Disconnected {
                reason: "closed locally".to_string(),
            }));
        }
        closed
    }

    pub fn downgrade(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("pending", &self.pending_requests())
            .field("bus", &self.inner.bus)
            .finish()
    }
}

/// Non-owning client handle, for handlers that live on the client's own bus.
#[derive(Clone, Debug)]
pub struct WeakClient {
    inner: Weak<ClientInner>,
}

impl WeakClient {
    pub fn upgrade(&self) -> Option<Client> {
        self.inner.upgrade().map(|inner| Client { inner })
    }
}

/// Pumps connection events into the client's bus.
///
/// Events are dispatched one at a time, in receive order.
pub struct ClientDriver {
    inner: Arc<ClientInner>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl ClientDriver {
    /// Dispatch the next connection event. Returns `false` once the
    /// connection is gone and every event has been handled.
    pub async fn step(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.inner.handle(event);
                true
            }
            None => false,
        }
    }

    /// Dispatch events until the connection closes.
    pub async fn run(mut self) {
        while self.step().await {}
        debug!("client driver finished");
    }
}

/// Pending response of [`Client::request`].
///
/// Dropping the future abandons the request.
#[must_use = "futures do nothing unless awaited"]
pub struct ResponseFuture<T> {
    request_id: RequestId,
    rx: oneshot::Receiver<Result<T, ClientError>>,
    client: Weak<ClientInner>,
}

impl<T> ResponseFuture<T> {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Wait at most `duration`; fails with `Timeout` afterwards.
    pub async fn with_timeout(self, duration: Duration) -> Result<T, ClientError> {
        match tokio::time::timeout(duration, self).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }
}

impl<T> Future for ResponseFuture<T> {
    type Output = Result<T, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ClientError::ConnectionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for ResponseFuture<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.client.upgrade() {
            if inner.settle(self.request_id).is_some() {
                trace!(request_id = self.request_id, "request abandoned");
            }
        }
    }
}
