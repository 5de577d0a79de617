// SPDX-License-Identifier: MIT OR Apache-2.0
//! asb-bus
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! In-process event bus for Agent Switchboard.
//!
//! Delivery is synchronous and in subscription order; a panicking
//! subscriber is isolated and the remaining subscribers still run.
//! Subscription mutation happens under a small critical section, emission
//! snapshots the subscriber list first and runs lock-free after that.
//!
//! The [`EventBus::bridge`] forwards every event as a JSON
//! [`WireMessage`] into an external sink (the HTTP/WebSocket façade);
//! dropping the returned handle unsubscribes every bridged listener.

use asb_core::{HubEvent, WireMessage};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::warn;

type Handler = Arc<dyn Fn(&HubEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    /// `None` subscribes to every event kind.
    kind: Option<String>,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    total_published: AtomicU64,
    isolated_panics: AtomicU64,
}

/// Identifier of one subscription, for [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Snapshot of bus statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusStats {
    /// Total number of events published.
    pub total_published: u64,
    /// Number of subscribers currently registered.
    pub active_subscribers: usize,
    /// Subscriber panics that were isolated during delivery.
    pub isolated_panics: u64,
}

/// Synchronous pub/sub over [`HubEvent`]s.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event kind (a wire name such as `request:claimed`).
    pub fn subscribe<F>(&self, kind: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&HubEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind.into()), Arc::new(handler))
    }

    /// Subscribe to every event kind.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&HubEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, kind: Option<String>, handler: Handler) -> SubscriptionId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("subscriber lock poisoned");
        subscribers.push(Subscriber { id, kind, handler });
        SubscriptionId(id)
    }

    /// Remove one subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("subscriber lock poisoned");
        subscribers.retain(|s| s.id != id.0);
    }

    /// Deliver an event to every matching subscriber, in subscription
    /// order. A panicking subscriber is isolated; delivery continues.
    pub fn emit(&self, event: HubEvent) {
        self.inner.total_published.fetch_add(1, Ordering::Relaxed);

        let name = event.kind.name();
        let snapshot: Vec<Handler> = {
            let subscribers = self
                .inner
                .subscribers
                .lock()
                .expect("subscriber lock poisoned");
            subscribers
                .iter()
                .filter(|s| s.kind.as_deref().is_none_or(|k| k == name))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                self.inner.isolated_panics.fetch_add(1, Ordering::Relaxed);
                warn!(event = name, "event subscriber panicked; isolating");
            }
        }
    }

    /// Forward every event into `sink` as a [`WireMessage`].
    ///
    /// The returned handle unsubscribes the bridge when closed or dropped.
    #[must_use]
    pub fn bridge(&self, sink: mpsc::UnboundedSender<WireMessage>) -> BridgeHandle {
        let id = self.subscribe_all(move |event| {
            // A closed sink just means the façade went away.
            let _ = sink.send(WireMessage::from_event(event));
        });
        BridgeHandle {
            bus: self.clone(),
            ids: vec![id],
        }
    }

    /// Snapshot of the current statistics.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        let active = self
            .inner
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .len();
        BusStats {
            total_published: self.inner.total_published.load(Ordering::Relaxed),
            active_subscribers: active,
            isolated_panics: self.inner.isolated_panics.load(Ordering::Relaxed),
        }
    }
}

/// Cleanup handle for a bridge; unsubscribes all bridged listeners.
pub struct BridgeHandle {
    bus: EventBus,
    ids: Vec<SubscriptionId>,
}

impl BridgeHandle {
    /// Unsubscribe the bridge now.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        for id in self.ids.drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asb_core::{HubEventKind, RequestId};
    use std::sync::atomic::AtomicUsize;

    fn tick(processed: usize) -> HubEvent {
        HubEvent::now(HubEventKind::SchedulerTick { processed })
    }

    fn claimed() -> HubEvent {
        HubEvent::now(HubEventKind::RequestClaimed {
            request_id: RequestId::from("req-1"),
            service: "billing".into(),
        })
    }

    #[test]
    fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.subscribe_all(move |_| order.lock().unwrap().push(label));
        }
        bus.emit(tick(0));

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn kind_filter_matches_wire_names() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        bus.subscribe("request:claimed", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(tick(0));
        bus.emit(claimed());
        bus.emit(tick(1));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe_all(|_| panic!("boom"));
        let counter = Arc::clone(&hits);
        bus.subscribe_all(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(tick(0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().isolated_panics, 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let id = bus.subscribe_all(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(tick(0));
        bus.unsubscribe(id);
        bus.emit(tick(1));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bridge_forwards_wire_messages_and_cleans_up() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = bus.bridge(tx);
        bus.emit(claimed());

        let wire = rx.recv().await.unwrap();
        assert_eq!(wire.kind, "request:claimed");
        assert_eq!(wire.data["service"], "billing");

        handle.close();
        assert_eq!(bus.stats().active_subscribers, 0);
        bus.emit(tick(0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stats_count_published_events() {
        let bus = EventBus::new();
        bus.emit(tick(0));
        bus.emit(tick(1));
        assert_eq!(bus.stats().total_published, 2);
    }
}
