//! In-process typed publish/subscribe.
//!
//! Handlers run synchronously on the dispatching thread, in subscription
//! order. Dispatch iterates a snapshot of the subscriber list, so handlers
//! may dispatch, subscribe or unsubscribe re-entrantly.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use mozaic_proto::{DecodeError, EventRegistry, EventType, EventTypeId, TypedEvent, WireEvent};
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::error::ClientError;

/// Identifier of one subscription, unique per bus.
pub type SubscriptionId = u64;

type ErasedHandler = dyn Fn(&(dyn Any + Send)) -> anyhow::Result<()> + Send + Sync;

struct Entry {
    id: SubscriptionId,
    once: bool,
    active: AtomicBool,
    handler: Box<ErasedHandler>,
}

/// Result of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Handlers that returned `Ok`.
    pub handled: usize,
    /// Handlers that returned an error.
    pub failed: usize,
}

/// Result of dispatching an undecoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireOutcome {
    Delivered(Delivery),
    /// The id is not registered; the event was dropped.
    UnknownType(EventTypeId),
    /// The payload did not decode; the event was dropped.
    Malformed(DecodeError),
}

/// Cheap-to-clone handle to an event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    registry: Arc<EventRegistry>,
    table: Mutex<HashMap<EventTypeId, Vec<Arc<Entry>>>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, type_id: EventTypeId, id: SubscriptionId) -> bool {
        let mut table = self.table.lock();
        let Some(entries) = table.get_mut(&type_id) else {
            return false;
        };
        let Some(pos) = entries.iter().position(|e| e.id == id) else {
            return false;
        };
        let entry = entries.remove(pos);
        entry.active.store(false, Ordering::Release);
        if entries.is_empty() {
            table.remove(&type_id);
        }
        true
    }
}

impl EventBus {
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry,
                table: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.inner.registry
    }

    /// Register `handler` for every event of `event_type`.
    pub fn subscribe<T, F>(
        &self,
        event_type: &EventType<T>,
        handler: F,
    ) -> Result<Subscription, ClientError>
    where
        T: Send + 'static,
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(event_type, handler, false)
    }

    /// Register `handler` for the next event of `event_type` only.
    pub fn subscribe_once<T, F>(
        &self,
        event_type: &EventType<T>,
        handler: F,
    ) -> Result<Subscription, ClientError>
    where
        T: Send + 'static,
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(event_type, handler, true)
    }

    fn insert<T, F>(
        &self,
        event_type: &EventType<T>,
        handler: F,
        once: bool,
    ) -> Result<Subscription, ClientError>
    where
        T: Send + 'static,
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.registry.check(event_type)?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let erased = move |value: &(dyn Any + Send)| match value.downcast_ref::<T>() {
            Some(value) => handler(value),
            None => Err(anyhow::anyhow!(
                "payload is not a {}",
                type_name::<T>()
            )),
        };
        let entry = Arc::new(Entry {
            id,
            once,
            active: AtomicBool::new(true),
            handler: Box::new(erased),
        });

        self.inner
            .table
            .lock()
            .entry(event_type.id())
            .or_default()
            .push(entry);
        trace!(type_id = event_type.id(), subscription = id, once, "subscribed");

        Ok(Subscription {
            id,
            type_id: event_type.id(),
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Remove a subscription by id. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, type_id: EventTypeId, id: SubscriptionId) -> bool {
        self.inner.remove(type_id, id)
    }

    pub fn subscriber_count(&self, type_id: EventTypeId) -> usize {
        self.inner
            .table
            .lock()
            .get(&type_id)
            .map_or(0, |entries| entries.len())
    }

    /// Deliver a decoded event to its subscribers.
    pub fn dispatch<T: Send + 'static>(&self, event: &TypedEvent<T>) -> Delivery {
        self.deliver(event.type_id(), event.data())
    }

    /// Decode an undecoded event through the registry and deliver it.
    ///
    /// Unknown ids and undecodable payloads are logged and dropped.
    pub fn dispatch_wire(&self, event: &WireEvent) -> WireOutcome {
        match self.inner.registry.decode(event) {
            Ok(Some(decoded)) => {
                WireOutcome::Delivered(self.deliver(decoded.type_id, decoded.value.as_ref()))
            }
            Ok(None) => {
                warn!(
                    type_id = event.type_id,
                    len = event.payload.len(),
                    "Unknown event type (ignored)"
                );
                WireOutcome::UnknownType(event.type_id)
            }
            Err(e) => {
                warn!(type_id = event.type_id, error = %e, "Malformed event (ignored)");
                WireOutcome::Malformed(e)
            }
        }
    }

    fn deliver(&self, type_id: EventTypeId, value: &(dyn Any + Send)) -> Delivery {
        let snapshot = match self.inner.table.lock().get(&type_id) {
            Some(entries) => entries.clone(),
            None => return Delivery::default(),
        };

        let mut delivery = Delivery::default();
        for entry in snapshot {
            if entry.once {
                // Claim the one-shot before running it; nested dispatches skip it.
                if !entry.active.swap(false, Ordering::AcqRel) {
                    continue;
                }
                self.inner.remove(type_id, entry.id);
            } else if !entry.active.load(Ordering::Acquire) {
                continue;
            }

            match (entry.handler)(value) {
                Ok(()) => delivery.handled += 1,
                Err(e) => {
                    warn!(type_id, subscription = entry.id, error = %e, "Event handler failed");
                    delivery.failed += 1;
                }
            }
        }
        delivery
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.inner.table.lock();
        let mut counts: Vec<_> = table.iter().map(|(id, e)| (*id, e.len())).collect();
        counts.sort_unstable();
        f.debug_struct("EventBus")
            .field("subscribers", &counts)
            .finish()
    }
}

/// Handle to a registered handler.
///
/// Dropping the handle leaves the handler registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[must_use = "the handler stays registered until unsubscribed"]
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    type_id: EventTypeId,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn type_id(&self) -> EventTypeId {
        self.type_id
    }

    /// Remove the handler. Returns `false` if it was already gone
    /// (one-shot already fired, or the bus was dropped).
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.remove(self.type_id, self.id),
            None => false,
        }
    }

    /// Give up the handle, keeping the handler registered for the bus lifetime.
    pub fn detach(self) -> SubscriptionId {
        self.id
    }
}
