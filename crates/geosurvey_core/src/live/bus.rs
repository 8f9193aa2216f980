//! Table-keyed change notification.
//!
//! # Responsibility
//! - Track one revision counter per table touched by survey writes.
//! - Notify subscribers whose table set intersects a published change.
//!
//! # Invariants
//! - Revisions only grow.
//! - Subscribers are invoked synchronously on the publishing thread, after
//!   the internal lock is released (callbacks may publish or subscribe).

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Tables whose changes can be observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataTable {
    Projects,
    ObjectTypes,
    Attributes,
    AttributeOptions,
    SurveySessions,
    Observations,
    ObservationAnswers,
}

impl DataTable {
    pub const ALL: [DataTable; 7] = [
        DataTable::Projects,
        DataTable::ObjectTypes,
        DataTable::Attributes,
        DataTable::AttributeOptions,
        DataTable::SurveySessions,
        DataTable::Observations,
        DataTable::ObservationAnswers,
    ];

    /// Form-builder tables.
    pub const SCHEMA: [DataTable; 3] = [
        DataTable::ObjectTypes,
        DataTable::Attributes,
        DataTable::AttributeOptions,
    ];

    /// Field-visit tables.
    pub const SURVEY: [DataTable; 3] = [
        DataTable::SurveySessions,
        DataTable::Observations,
        DataTable::ObservationAnswers,
    ];

    fn index(self) -> usize {
        match self {
            Self::Projects => 0,
            Self::ObjectTypes => 1,
            Self::Attributes => 2,
            Self::AttributeOptions => 3,
            Self::SurveySessions => 4,
            Self::Observations => 5,
            Self::ObservationAnswers => 6,
        }
    }
}

/// Handle returned by `ChangeBus::subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&[DataTable]) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    tables: BTreeSet<DataTable>,
    listener: Listener,
}

/// Per-table revision counters plus synchronous subscribers.
///
/// Share one bus (behind `Arc`) between every writer and reader of the same
/// database file.
#[derive(Default)]
pub struct ChangeBus {
    revisions: [AtomicU64; 7],
    next_subscription: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps the revision of every listed table and notifies subscribers.
    ///
    /// Duplicate tables are collapsed; an empty slice is a no-op.
    pub fn publish(&self, tables: &[DataTable]) {
        let changed = tables.iter().copied().collect::<BTreeSet<_>>();
        if changed.is_empty() {
            return;
        }
        for table in &changed {
            self.revisions[table.index()].fetch_add(1, Ordering::SeqCst);
        }

        let listeners = {
            let subscriptions = self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subscriptions
                .iter()
                .filter(|subscription| !subscription.tables.is_disjoint(&changed))
                .map(|subscription| Arc::clone(&subscription.listener))
                .collect::<Vec<_>>()
        };

        let changed = changed.into_iter().collect::<Vec<_>>();
        for listener in listeners {
            listener(&changed);
        }
    }

    /// Registers `listener` for changes touching any of `tables`.
    pub fn subscribe(
        &self,
        tables: &[DataTable],
        listener: impl Fn(&[DataTable]) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                id,
                tables: tables.iter().copied().collect(),
                listener: Arc::new(listener),
            });
        id
    }

    /// Removes one subscription. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.id != id);
        subscriptions.len() != before
    }

    /// Current revision of one table.
    pub fn revision(&self, table: DataTable) -> u64 {
        self.revisions[table.index()].load(Ordering::SeqCst)
    }

    /// Revisions of `tables`, in the given order.
    pub fn revisions(&self, tables: &[DataTable]) -> Vec<u64> {
        tables.iter().map(|table| self.revision(*table)).collect()
    }

    /// Sum of all table revisions; grows on every publish.
    pub fn global_revision(&self) -> u64 {
        DataTable::ALL.iter().map(|table| self.revision(*table)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeBus, DataTable};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn publish_bumps_only_listed_tables() {
        let bus = ChangeBus::new();
        bus.publish(&[DataTable::Observations, DataTable::Observations]);

        assert_eq!(bus.revision(DataTable::Observations), 1);
        assert_eq!(bus.revision(DataTable::Projects), 0);
        assert_eq!(bus.global_revision(), 1);
    }

    #[test]
    fn subscribers_only_see_intersecting_changes() {
        let bus = ChangeBus::new();
        let schema_hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&schema_hits);
        bus.subscribe(&DataTable::SCHEMA, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&[DataTable::Observations]);
        assert_eq!(schema_hits.load(Ordering::SeqCst), 0);

        bus.publish(&[DataTable::Attributes, DataTable::Observations]);
        assert_eq!(schema_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let bus = ChangeBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = bus.subscribe(&[DataTable::Projects], move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&[DataTable::Projects]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_may_publish_without_deadlock() {
        let bus = Arc::new(ChangeBus::new());
        let inner = Arc::clone(&bus);
        bus.subscribe(&[DataTable::Projects], move |_| {
            inner.publish(&[DataTable::ObjectTypes]);
        });

        bus.publish(&[DataTable::Projects]);
        assert_eq!(bus.revision(DataTable::ObjectTypes), 1);
    }
}
