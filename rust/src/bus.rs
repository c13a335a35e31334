//! In-process realtime event bus.
//!
//! Storage backends push every durable append into the bus through the
//! [`RealtimeSink`] trait; the bus fans rows out to per-session subscribers.
//! Delivery is at-least-once: publishing the same row twice delivers it
//! twice, and consumers dedup by row id. Rows of one conversation arrive in
//! publish order; there is no ordering across conversations.
//!
//! Each subscription carries its own delivery sequence starting at 1. A
//! consumer that observes a jump in `seq`, or a [`BusEvent::Reconnected`],
//! must treat the stream as gapped and re-query storage instead of trusting
//! the incremental feed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use shepherd_storage_traits::{RealtimeSink, RowInsert};

/// What a subscriber wants to see.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    /// Direct rows where this user is the sender or the receiver.
    pub user_id: Option<String>,
    /// Group rows for any of these groups.
    pub group_ids: HashSet<String>,
}

impl SubscriptionFilter {
    /// Everything relevant to one session: the viewer's direct traffic plus
    /// their groups.
    pub fn for_viewer(user_id: impl Into<String>, group_ids: HashSet<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            group_ids,
        }
    }

    fn matches(&self, row: &RowInsert) -> bool {
        match row {
            RowInsert::Direct(m) => self
                .user_id
                .as_deref()
                .is_some_and(|u| m.sender_id == u || m.receiver_id == u),
            RowInsert::Group(m) => self.group_ids.contains(&m.group_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A matching row was appended. `seq` is per-subscription, starting at 1.
    Insert { seq: u64, row: RowInsert },
    /// The transport was re-established; events may have been lost.
    Reconnected,
}

/// Handle identifying one subscription. Pass it back to
/// [`RealtimeBus::unsubscribe`] when the session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: u64,
}

struct SubEntry {
    filter: SubscriptionFilter,
    tx: flume::Sender<BusEvent>,
    next_seq: u64,
}

#[derive(Default)]
struct BusInner {
    subs: HashMap<u64, SubEntry>,
    next_id: u64,
}

/// The fan-out hub. One instance is shared by the store (as its sink) and
/// every [`crate::App`] built on that store.
#[derive(Default)]
pub struct RealtimeBus {
    inner: Mutex<BusInner>,
}

impl RealtimeBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self, filter: SubscriptionFilter) -> (Subscription, flume::Receiver<BusEvent>) {
        let (tx, rx) = flume::unbounded();
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subs.insert(
            id,
            SubEntry {
                filter,
                tx,
                next_seq: 1,
            },
        );
        (Subscription { id }, rx)
    }

    /// Remove the subscription and close its receiver. Synchronous, so no
    /// event is delivered after this returns.
    pub fn unsubscribe(&self, sub: &Subscription) {
        self.inner.lock().subs.remove(&sub.id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subs.len()
    }

    /// Simulate a transport drop: every subscriber gets a
    /// [`BusEvent::Reconnected`] and must re-query storage.
    pub fn simulate_reconnect(&self) {
        let mut inner = self.inner.lock();
        inner
            .subs
            .retain(|_, entry| entry.tx.send(BusEvent::Reconnected).is_ok());
    }

    /// Advance every subscription's sequence without a delivery, as if one
    /// event per subscriber was lost in transit. Test hook for exercising
    /// gap detection.
    pub fn induce_gap(&self) {
        for entry in self.inner.lock().subs.values_mut() {
            entry.next_seq += 1;
        }
    }
}

impl RealtimeSink for RealtimeBus {
    fn row_inserted(&self, row: RowInsert) {
        let mut inner = self.inner.lock();
        // A dead receiver drops the whole subscription.
        inner.subs.retain(|_, entry| {
            if !entry.filter.matches(&row) {
                return true;
            }
            let seq = entry.next_seq;
            entry.next_seq += 1;
            entry
                .tx
                .send(BusEvent::Insert {
                    seq,
                    row: row.clone(),
                })
                .is_ok()
        });
    }
}
