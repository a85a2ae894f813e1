//! Event Fan-out
//!
//! Publish/subscribe registry that decouples the socket reader from event
//! consumers.
//!
//! # Delivery
//!
//! `dispatch` runs on the session's single reader task. Every subscriber
//! receives event N before any subscriber receives event N+1. Two kinds of
//! subscriber are supported:
//!
//! - **Handlers** (`subscribe_fn`): closures called synchronously during dispatch
//! - **Channels** (`subscribe`): unbounded queues, so a slow consumer never
//!   stalls the reader
//!
//! Subscriber order within one dispatch is unspecified.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::infrastructure::protocol::messages::Event;

// =============================================================================
// Types
// =============================================================================

/// Callback invoked for every dispatched event.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifier of one registration.
pub type SubscriberId = u64;

#[derive(Clone)]
enum Sink {
    Handler(EventHandler),
    Channel(mpsc::UnboundedSender<Arc<Event>>),
}

impl Sink {
    fn deliver(&self, event: &Arc<Event>) {
        match self {
            Self::Handler(handler) => handler(event),
            // A closed receiver is released by its own Drop; nothing to do here.
            Self::Channel(tx) => {
                let _ = tx.send(Arc::clone(event));
            }
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    sinks: RwLock<HashMap<SubscriberId, Sink>>,
}

// =============================================================================
// Subscriber Registry
// =============================================================================

/// Set of active event subscribers for one transport session.
///
/// Cloning yields another handle to the same set.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for all future events.
    ///
    /// The returned capability removes exactly this handler. Dropping it
    /// without calling [`Unsubscriber::unsubscribe`] leaves the handler registered.
    #[must_use = "dropping the unsubscriber makes the handler permanent"]
    pub fn subscribe_fn<F>(&self, handler: F) -> Unsubscriber
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Sink::Handler(Arc::new(handler)))
    }

    /// Register a channel subscriber for all future events.
    ///
    /// The subscription is released when it is dropped.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let unsubscriber = self.register(Sink::Channel(tx));
        Subscription { rx, unsubscriber }
    }

    fn register(&self, sink: Sink) -> Unsubscriber {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.sinks.write().insert(id, sink);

        tracing::trace!(subscriber = id, "Subscriber registered");

        Unsubscriber {
            id,
            registry: Arc::downgrade(&self.inner),
            released: AtomicBool::new(false),
        }
    }

    /// Deliver `event` to every current subscriber.
    ///
    /// Returns the number of subscribers the event was delivered to. Handlers
    /// may subscribe or unsubscribe while being called; such changes apply
    /// from the next dispatch.
    pub fn dispatch(&self, event: Event) -> usize {
        let sinks: Vec<Sink> = self.inner.sinks.read().values().cloned().collect();
        let event = Arc::new(event);

        for sink in &sinks {
            sink.deliver(&event);
        }

        sinks.len()
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.sinks.read().len()
    }

    /// Drop every subscriber. Channel subscriptions drain and then end.
    pub fn clear(&self) {
        self.inner.sinks.write().clear();
    }
}

// =============================================================================
// Unsubscribe Capability
// =============================================================================

/// Capability that removes one registration.
#[derive(Debug)]
pub struct Unsubscriber {
    id: SubscriberId,
    registry: Weak<RegistryInner>,
    released: AtomicBool,
}

impl Unsubscriber {
    /// Remove the registration. Calling it again is a no-op.
    ///
    /// Returns `true` only for the call that removed the registration.
    pub fn unsubscribe(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }

        let removed = self
            .registry
            .upgrade()
            .is_some_and(|inner| inner.sinks.write().remove(&self.id).is_some());

        if removed {
            tracing::trace!(subscriber = self.id, "Subscriber released");
        }
        removed
    }

    /// Whether [`Self::unsubscribe`] has been called.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Registration identifier.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }
}

// =============================================================================
// Channel Subscription
// =============================================================================

/// Channel-backed subscription; yields events in dispatch order.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Arc<Event>>,
    unsubscriber: Unsubscriber,
}

impl Subscription {
    /// Wait for the next event.
    ///
    /// Returns `None` once the subscription is released (or the session is
    /// gone) and every queued event has been drained.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving new events. Idempotent.
    pub fn unsubscribe(&self) -> bool {
        self.unsubscriber.unsubscribe()
    }

    /// Whether the subscription has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.unsubscriber.is_released()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscriber.unsubscribe();
    }
}

// =============================================================================
// Tests
// =============================================================================
