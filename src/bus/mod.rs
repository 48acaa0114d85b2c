//! # Event Bus
//!
//! Publish/subscribe routing over a configured [`Dispatcher`]. `notify` looks
//! up the consumers whose selectors match the routing key (in registration
//! order) and hands each one to the dispatcher as an independent task unit —
//! the bus adds no ordering or threading semantics of its own beyond what the
//! backing dispatcher provides.
//!
//! Consumer callbacks may call `notify` recursively (including from the
//! dispatcher's own consumer thread); re-entrant dispatch is part of the
//! dispatcher contract, so ping-pong style conversations between keys are
//! safe under every variant.

pub mod event;
pub mod routing;
pub mod selector;

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{DispatchConfig, DispatcherKind};
use crate::dispatch::{
    Dispatcher, RingBufferDispatcher, SynchronousDispatcher, TaskUnit, ThreadPoolDispatcher,
    WorkQueueDispatcher,
};
use crate::error::{BoxError, Result};

pub use event::Event;
pub use routing::Registration;
pub use selector::{KeySelector, PredicateSelector, Selector, WildcardSelector};

use routing::{BusConsumer, RoutingTable};

/// Router mapping selectors to consumers, delegating execution to its
/// dispatcher.
pub struct EventBus<T: Clone + Send + 'static> {
    name: String,
    dispatcher: Arc<dyn Dispatcher<Event<T>>>,
    table: RoutingTable<T>,
    /// Self-reference handed to responding consumers so replies can re-enter
    /// the bus without keeping it alive on their own.
    weak_self: Weak<EventBus<T>>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Create a bus on an explicit dispatcher.
    pub fn new(name: impl Into<String>, dispatcher: Arc<dyn Dispatcher<Event<T>>>) -> Arc<Self> {
        let name = name.into();
        info!(bus = %name, dispatcher = dispatcher.name(), "event bus created");
        Arc::new_cyclic(|weak_self| Self {
            name,
            dispatcher,
            table: RoutingTable::new(),
            weak_self: weak_self.clone(),
        })
    }

    /// Create a bus that executes consumers inline on the notifying thread.
    pub fn synchronous(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let dispatcher = Arc::new(SynchronousDispatcher::new(format!("{name}-dispatcher")));
        Self::new(name, dispatcher)
    }

    /// Create a bus backed by the dispatcher variant named in configuration.
    pub fn from_config(name: impl Into<String>, config: &DispatchConfig) -> Result<Arc<Self>> {
        let name = name.into();
        let dispatcher_name = format!("{name}-dispatcher");
        let dispatcher: Arc<dyn Dispatcher<Event<T>>> = match config.bus.dispatcher {
            DispatcherKind::Synchronous => Arc::new(SynchronousDispatcher::new(dispatcher_name)),
            DispatcherKind::ThreadPool => Arc::new(ThreadPoolDispatcher::new(
                dispatcher_name,
                config.thread_pool.workers,
                config.thread_pool.queue_capacity,
            )?),
            DispatcherKind::RingBuffer => Arc::new(RingBufferDispatcher::from_config(
                dispatcher_name,
                &config.ring_buffer,
            )?),
            DispatcherKind::WorkQueue => Arc::new(WorkQueueDispatcher::from_config(
                dispatcher_name,
                &config.work_queue,
            )?),
        };
        Ok(Self::new(name, dispatcher))
    }

    /// Register a durable consumer for keys matching `selector`.
    pub fn on<S, F>(&self, selector: S, consumer: F) -> Registration
    where
        S: Selector + 'static,
        F: Fn(Event<T>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.register(Box::new(selector), Arc::new(consumer), false)
    }

    /// Register a consumer delivered at most once; the registration cancels
    /// itself after its first matched notify.
    pub fn once<S, F>(&self, selector: S, consumer: F) -> Registration
    where
        S: Selector + 'static,
        F: Fn(Event<T>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.register(Box::new(selector), Arc::new(consumer), true)
    }

    /// Register a responding consumer: its result is re-notified under the
    /// event's reply-to key. Events arriving without a reply-to key have
    /// their reply dropped with a warning.
    pub fn receive<S, F>(&self, selector: S, responder: F) -> Registration
    where
        S: Selector + 'static,
        F: Fn(&Event<T>) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        let bus = self.weak_self.clone();
        let consumer: BusConsumer<T> = Arc::new(move |event: Event<T>| {
            let reply = responder(&event)?;
            match (event.reply_to(), bus.upgrade()) {
                (Some(reply_key), Some(bus)) => {
                    bus.notify(reply_key, reply)?;
                }
                (None, _) => {
                    warn!(key = %event.key(), "reply produced for event without reply_to; dropped");
                }
                (_, None) => {
                    warn!(key = %event.key(), "bus gone before reply could be notified");
                }
            }
            Ok(())
        });
        self.register(Box::new(selector), consumer, false)
    }

    fn register(
        &self,
        selector: Box<dyn Selector>,
        consumer: BusConsumer<T>,
        once: bool,
    ) -> Registration {
        let registration = self.table.register(selector, consumer, once);
        debug!(bus = %self.name, registration = %registration.id(), once, "consumer registered");
        registration
    }

    /// Publish a payload under `key`. Returns how many consumers were
    /// dispatched to.
    pub fn notify(&self, key: impl Into<String>, payload: T) -> Result<usize> {
        self.route(Event::new(key, payload))
    }

    /// Publish a payload expecting responding consumers to reply under
    /// `reply_to`.
    pub fn send(
        &self,
        key: impl Into<String>,
        payload: T,
        reply_to: impl Into<String>,
    ) -> Result<usize> {
        self.route(Event::new(key, payload).with_reply_to(reply_to))
    }

    /// Route an already-built event.
    pub fn route(&self, event: Event<T>) -> Result<usize> {
        let matched = self.table.matching(event.key());
        if matched.is_empty() {
            debug!(bus = %self.name, key = %event.key(), "no consumers matched");
            return Ok(0);
        }

        let count = matched.len();
        for entry in matched {
            entry.record_delivery();
            let consumer = entry.consumer.clone();
            let delivery = event.clone();
            let registration_id = entry.id;
            let key = event.key().to_string();
            let task = TaskUnit::new(delivery, move |event| consumer(event)).with_error_handler(
                move |task_error| {
                    error!(
                        registration = %registration_id,
                        key = %key,
                        error = %task_error,
                        "bus consumer failed; other consumers unaffected"
                    );
                },
            );
            self.dispatcher.dispatch(task)?;
        }
        Ok(count)
    }

    /// Registration and delivery counters. Advisory: races with concurrent
    /// notifies.
    pub fn stats(&self) -> BusStats {
        let entries = self.table.snapshot();
        let mut stats = BusStats {
            registrations: entries.len(),
            active: 0,
            total_deliveries: 0,
            details: Vec::with_capacity(entries.len()),
        };
        for entry in entries {
            let deliveries = entry.deliveries.load(std::sync::atomic::Ordering::Relaxed);
            if !entry.is_cancelled() {
                stats.active += 1;
            }
            stats.total_deliveries += deliveries;
            stats.details.push(RegistrationDetail {
                id: entry.id,
                selector: entry.selector_description(),
                deliveries,
                last_delivery_at: entry.last_delivery_at(),
            });
        }
        stats
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dispatcher backing this bus, for lifecycle control (shutdown,
    /// await-and-shutdown) at the composition root.
    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher<Event<T>>> {
        &self.dispatcher
    }
}

/// Aggregate view over a bus's registrations.
#[derive(Debug, Clone)]
pub struct BusStats {
    pub registrations: usize,
    pub active: usize,
    pub total_deliveries: u64,
    pub details: Vec<RegistrationDetail>,
}

/// Per-registration counters.
#[derive(Debug, Clone)]
pub struct RegistrationDetail {
    pub id: Uuid,
    pub selector: String,
    pub deliveries: u64,
    pub last_delivery_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn notify_reaches_matching_consumers_in_registration_order() {
        let bus = EventBus::synchronous("orders");
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first_order = order.clone();
        bus.on(WildcardSelector::new("order.*"), move |event| {
            first_order.lock().push(("wildcard", *event.payload()));
            Ok(())
        });
        let second_order = order.clone();
        bus.on(KeySelector::new("order.placed"), move |event| {
            second_order.lock().push(("exact", *event.payload()));
            Ok(())
        });

        let matched = bus.notify("order.placed", 7u32).unwrap();
        assert_eq!(matched, 2);
        assert_eq!(*order.lock(), vec![("wildcard", 7), ("exact", 7)]);
    }

    #[test]
    fn unmatched_key_dispatches_nothing() {
        let bus = EventBus::synchronous("quiet");
        bus.on(KeySelector::new("known"), |_| Ok(()));
        assert_eq!(bus.notify("unknown", 1u32).unwrap(), 0);
    }

    #[test]
    fn once_consumer_sees_exactly_one_notify() {
        let bus = EventBus::synchronous("once");
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = hits.clone();
        bus.once(KeySelector::new("k"), move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.notify("k", 1u32).unwrap();
        bus.notify("k", 2u32).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_registration_stops_receiving() {
        let bus = EventBus::synchronous("cancel");
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = hits.clone();
        let registration = bus.on(KeySelector::new("k"), move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.notify("k", 1u32).unwrap();
        registration.cancel();
        bus.notify("k", 2u32).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn responding_consumer_replies_via_reply_to() {
        let bus = EventBus::synchronous("request-reply");
        let replies = Arc::new(parking_lot::Mutex::new(Vec::new()));

        bus.receive(KeySelector::new("job.request"), |event| {
            Ok(*event.payload() * 2)
        });
        let sink = replies.clone();
        bus.on(KeySelector::new("job.reply"), move |event| {
            sink.lock().push(*event.payload());
            Ok(())
        });

        bus.send("job.request", 21u32, "job.reply").unwrap();
        assert_eq!(*replies.lock(), vec![42]);
    }

    #[test]
    fn failing_consumer_does_not_affect_the_rest() {
        let bus = EventBus::synchronous("isolated");
        let hits = Arc::new(AtomicUsize::new(0));

        bus.on(KeySelector::new("k"), |_| Err("first consumer broke".into()));
        let sink = hits.clone();
        bus.on(KeySelector::new("k"), move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.notify("k", 1u32).unwrap(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stats_count_registrations_and_deliveries() {
        let bus = EventBus::synchronous("stats");
        bus.on(KeySelector::new("a"), |_| Ok(()));
        bus.on(KeySelector::new("b"), |_| Ok(()));

        bus.notify("a", 1u32).unwrap();
        bus.notify("a", 2u32).unwrap();

        let stats = bus.stats();
        assert_eq!(stats.registrations, 2);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.total_deliveries, 2);
        let delivered = stats.details.iter().find(|d| d.deliveries == 2).unwrap();
        assert_eq!(delivered.selector, "a");
        assert!(delivered.last_delivery_at.is_some());
    }
}
