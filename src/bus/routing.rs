//! # Routing Table
//!
//! Ordered registration storage for the event bus. Registrations are
//! immutable records published atomically into the table: a concurrent
//! `notify` either sees a registration completely or not at all, and
//! insertion order is invocation order when one key matches several entries.
//!
//! Cancellation is a flag flip on the registration, not a structural change;
//! the table prunes flagged entries lazily while it already holds the write
//! lock for an insert.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::event::Event;
use super::selector::Selector;
use crate::error::BoxError;

/// Consumer callback invoked with a delivered event.
pub(crate) type BusConsumer<T> =
    Arc<dyn Fn(Event<T>) -> Result<(), BoxError> + Send + Sync>;

/// Handle returned by `on`/`once`/`receive`. Cancelling removes the mapping;
/// dropping the handle leaves it in place.
#[derive(Debug, Clone)]
pub struct Registration {
    id: Uuid,
    cancelled: Arc<AtomicBool>,
}

impl Registration {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            debug!(registration = %self.id, "registration cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub(crate) struct RouteEntry<T> {
    pub(crate) id: Uuid,
    selector: Box<dyn Selector>,
    pub(crate) consumer: BusConsumer<T>,
    once: bool,
    cancelled: Arc<AtomicBool>,
    pub(crate) deliveries: AtomicU64,
    /// Millisecond UTC timestamp of the last delivery, 0 when never.
    last_delivery_millis: AtomicI64,
}

impl<T> RouteEntry<T> {
    pub(crate) fn selector_description(&self) -> String {
        self.selector.describe()
    }

    pub(crate) fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
        self.last_delivery_millis
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub(crate) fn last_delivery_at(&self) -> Option<DateTime<Utc>> {
        match self.last_delivery_millis.load(Ordering::Relaxed) {
            0 => None,
            millis => DateTime::from_timestamp_millis(millis),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub(crate) struct RoutingTable<T> {
    entries: RwLock<Vec<Arc<RouteEntry<T>>>>,
}

impl<T> RoutingTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Insert a registration; the entry becomes visible to `matching` as a
    /// whole, never partially.
    pub(crate) fn register(
        &self,
        selector: Box<dyn Selector>,
        consumer: BusConsumer<T>,
        once: bool,
    ) -> Registration {
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = Arc::new(RouteEntry {
            id: Uuid::new_v4(),
            selector,
            consumer,
            once,
            cancelled: cancelled.clone(),
            deliveries: AtomicU64::new(0),
            last_delivery_millis: AtomicI64::new(0),
        });
        let registration = Registration {
            id: entry.id,
            cancelled,
        };

        let mut entries = self.entries.write();
        entries.retain(|existing| !existing.is_cancelled());
        entries.push(entry);
        registration
    }

    /// Entries whose selector matches `key`, in registration order. A `once`
    /// entry is claimed here: exactly one caller observes it matched, after
    /// which it is cancelled.
    pub(crate) fn matching(&self, key: &str) -> Vec<Arc<RouteEntry<T>>> {
        let entries = self.entries.read();
        let mut matched = Vec::new();
        for entry in entries.iter() {
            if entry.is_cancelled() || !entry.selector.matches(key) {
                continue;
            }
            if entry.once {
                // Claim the single delivery; a concurrent notify loses.
                if entry
                    .cancelled
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    continue;
                }
            }
            matched.push(entry.clone());
        }
        matched
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<RouteEntry<T>>> {
        self.entries.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::selector::{KeySelector, WildcardSelector};

    fn consumer() -> BusConsumer<u32> {
        Arc::new(|_event| Ok(()))
    }

    #[test]
    fn matches_in_registration_order() {
        let table: RoutingTable<u32> = RoutingTable::new();
        let first = table.register(Box::new(WildcardSelector::new("task.*")), consumer(), false);
        let second = table.register(Box::new(KeySelector::new("task.done")), consumer(), false);

        let matched = table.matching("task.done");
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].id, first.id());
        assert_eq!(matched[1].id, second.id());
    }

    #[test]
    fn cancelled_entries_stop_matching() {
        let table: RoutingTable<u32> = RoutingTable::new();
        let registration = table.register(Box::new(KeySelector::new("k")), consumer(), false);
        assert_eq!(table.matching("k").len(), 1);

        registration.cancel();
        assert!(registration.is_cancelled());
        assert!(table.matching("k").is_empty());
    }

    #[test]
    fn once_entries_match_exactly_once() {
        let table: RoutingTable<u32> = RoutingTable::new();
        table.register(Box::new(KeySelector::new("k")), consumer(), true);
        assert_eq!(table.matching("k").len(), 1);
        assert!(table.matching("k").is_empty());
    }

    #[test]
    fn registering_prunes_cancelled_entries() {
        let table: RoutingTable<u32> = RoutingTable::new();
        let registration = table.register(Box::new(KeySelector::new("a")), consumer(), false);
        registration.cancel();
        table.register(Box::new(KeySelector::new("b")), consumer(), false);
        assert_eq!(table.snapshot().len(), 1);
    }
}
