// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Subscription table: re-reads views whose dependencies changed.
use std::collections::BTreeSet;

use tracing::debug;

use crate::ident::DataId;
use crate::reader::read_with_previous;
use crate::snapshot::Snapshot;
use crate::source::RecordSource;

/// Handle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Callback receiving the new snapshot of a subscribed view.
pub type SnapshotCallback = Box<dyn FnMut(&Snapshot)>;

struct Subscription {
    id: SubscriptionId,
    snapshot: Snapshot,
    callback: SnapshotCallback,
}

/// Subscriptions in registration order.
#[derive(Default)]
pub struct SubscriptionTable {
    entries: Vec<Subscription>,
    next_id: u64,
}

impl SubscriptionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for changes to `snapshot`'s view.
    pub fn subscribe(&mut self, snapshot: Snapshot, callback: SnapshotCallback) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.entries.push(Subscription {
            id,
            snapshot,
            callback,
        });
        id
    }

    /// Removes a subscription. Returns `false` if it was already removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest snapshot delivered for `id`.
    pub fn snapshot(&self, id: SubscriptionId) -> Option<&Snapshot> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| &entry.snapshot)
    }

    /// Re-reads every subscription whose dependencies intersect `changed` and
    /// invokes the callbacks whose data changed identity.
    ///
    /// Returns the ids notified, in registration order.
    pub fn notify(
        &mut self,
        source: &RecordSource,
        changed: &BTreeSet<DataId>,
    ) -> Vec<SubscriptionId> {
        let mut notified = Vec::new();
        if changed.is_empty() {
            return notified;
        }
        for entry in &mut self.entries {
            if !entry.snapshot.depends_on_any(changed) {
                continue;
            }
            let next = read_with_previous(source, &entry.snapshot.selector, Some(&entry.snapshot));
            if next.data.same(&entry.snapshot.data) {
                // Dependencies may still have moved (e.g. a newly seen record).
                entry.snapshot.seen_records = next.seen_records;
                entry.snapshot.is_missing_data = next.is_missing_data;
                continue;
            }
            entry.snapshot = next;
            (entry.callback)(&entry.snapshot);
            notified.push(entry.id);
        }
        debug!(changed = changed.len(), notified = notified.len(), "notified subscriptions");
        notified
    }
}
