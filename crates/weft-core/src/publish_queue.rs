// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Publish queue: sequences base and optimistic updates into single commits.
//!
//! Lifecycle: `Idle → HasPendingPayloads → Applying → Committed → Idle`.
//!
//! Application order within one [`PublishQueue::run`]:
//! 1. the committed source,
//! 2. queued base items (normalized payloads, updaters) in enqueue order,
//! 3. optimistic updates in enqueue order (a later update wins a field
//!    conflict).
//!
//! Optimistic writes record the prior state of every id they touch in a
//! backup overlay. A run restores that backup (a rebase) only when a base item
//! must slide underneath applied optimistic updates or an applied update was
//! reverted; otherwise new optimistic updates are layered on top.
//!
//! Every write is staged in an overlay and reaches the committed source in
//! one pass at the end of the run; readers never see intermediate state.
use std::collections::{BTreeSet, VecDeque};
use std::mem;

use tracing::{debug, warn};

use crate::ident::DataId;
use crate::mutator::{MutatorError, RecordSourceMutator, Updater};
use crate::source::{OverlayView, RecordOverlay, RecordSource};
use crate::StoreError;

/// Queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing queued.
    Idle,
    /// Base items, optimistic additions or reverts are waiting for a run.
    HasPendingPayloads,
    /// A run is merging updates.
    Applying,
    /// A run committed; notifications have not settled yet.
    Committed,
}

/// Handle of an optimistic update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpdateId(pub u64);

/// Update applied beneath all optimistic layers.
pub enum BaseItem {
    /// A normalized payload sink.
    Source(RecordSource),
    /// A non-optimistic updater.
    Updater(Updater),
}

/// Update layered optimistically on top of committed data.
pub enum OptimisticUpdate {
    /// A normalized optimistic response.
    Source(RecordSource),
    /// An optimistic updater; it reruns on every rebase.
    Updater(Updater),
}

/// Which queued item a run failed to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// A base updater; it is dropped.
    Base,
    /// An optimistic update; it is dropped and will not rerun.
    Optimistic(UpdateId),
}

/// Result of one [`PublishQueue::run`].
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Ids whose committed entry changed by value (including erasures).
    pub changed: BTreeSet<DataId>,
    /// Updaters that failed; their writes were discarded.
    pub errors: Vec<(UpdateOrigin, MutatorError)>,
}

/// Sequencer for base and optimistic updates.
pub struct PublishQueue {
    state: QueueState,
    pending_base: VecDeque<BaseItem>,
    pending_adds: Vec<(UpdateId, OptimisticUpdate)>,
    applied: Vec<(UpdateId, OptimisticUpdate)>,
    pending_reverts: BTreeSet<UpdateId>,
    backup: RecordOverlay,
    next_update: u64,
}

impl Default for PublishQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishQueue {
    /// Creates an idle queue.
    pub fn new() -> Self {
        Self {
            state: QueueState::Idle,
            pending_base: VecDeque::new(),
            pending_adds: Vec::new(),
            applied: Vec::new(),
            pending_reverts: BTreeSet::new(),
            backup: RecordOverlay::new(),
            next_update: 1,
        }
    }

    /// Current state.
    pub fn state(&self) -> QueueState {
        self.state
    }

    /// Number of optimistic updates currently applied.
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Returns `true` if a run has work to do.
    pub fn has_pending(&self) -> bool {
        !self.pending_base.is_empty()
            || !self.pending_adds.is_empty()
            || !self.pending_reverts.is_empty()
    }

    fn mark_pending(&mut self) {
        if self.state == QueueState::Idle {
            self.state = QueueState::HasPendingPayloads;
        }
    }

    /// Queues a normalized server payload.
    pub fn commit_source(&mut self, source: RecordSource) {
        self.pending_base.push_back(BaseItem::Source(source));
        self.mark_pending();
    }

    /// Queues a non-optimistic updater.
    pub fn commit_update(&mut self, updater: Updater) {
        self.pending_base.push_back(BaseItem::Updater(updater));
        self.mark_pending();
    }

    /// Queues an optimistic update and returns its handle.
    pub fn apply_update(&mut self, update: OptimisticUpdate) -> UpdateId {
        let id = UpdateId(self.next_update);
        self.next_update += 1;
        self.pending_adds.push((id, update));
        self.mark_pending();
        id
    }

    /// Queues removal of an optimistic update.
    ///
    /// Returns `false` when `id` is not live (never issued, already reverted,
    /// or dropped after failing).
    pub fn revert_update(&mut self, id: UpdateId) -> bool {
        let live = self.applied.iter().any(|(u, _)| *u == id)
            || self.pending_adds.iter().any(|(u, _)| *u == id);
        if !live || !self.pending_reverts.insert(id) {
            return false;
        }
        self.mark_pending();
        true
    }

    /// Merges every pending item and commits the result into `source`.
    ///
    /// Leaves the queue [`QueueState::Committed`]; call
    /// [`PublishQueue::settle`] once notifications have been delivered.
    ///
    /// # Errors
    /// [`StoreError::QueueReentered`] if a run is already applying.
    pub fn run(&mut self, source: &mut RecordSource) -> Result<RunOutcome, StoreError> {
        if self.state == QueueState::Applying {
            return Err(StoreError::QueueReentered);
        }
        self.state = QueueState::Applying;

        let mut overlay = RecordOverlay::new();
        let reverts = mem::take(&mut self.pending_reverts);
        let must_rebase = self.applied.iter().any(|(id, _)| reverts.contains(id))
            || (!self.pending_base.is_empty() && !self.applied.is_empty());
        if must_rebase {
            for (id, prior) in mem::take(&mut self.backup).into_entries() {
                match prior {
                    Some(entry) => overlay.set_entry(id, entry),
                    None => overlay.erase(id),
                }
            }
            let mut replay = mem::take(&mut self.applied);
            replay.append(&mut self.pending_adds);
            self.pending_adds = replay;
        }
        self.pending_adds.retain(|(id, _)| !reverts.contains(id));
        debug!(
            base = self.pending_base.len(),
            optimistic = self.pending_adds.len(),
            reverted = reverts.len(),
            rebase = must_rebase,
            "publish queue run"
        );

        let mut errors = Vec::new();
        while let Some(item) = self.pending_base.pop_front() {
            let mut scratch = RecordOverlay::new();
            let result = {
                let view = OverlayView::new(&*source, &overlay);
                let mut mutator = RecordSourceMutator::new(&view, &mut scratch);
                match &item {
                    BaseItem::Source(sink) => {
                        mutator.publish_source(sink);
                        Ok(())
                    }
                    BaseItem::Updater(updater) => updater(&mut mutator),
                }
            };
            match result {
                Ok(()) => merge(&mut overlay, scratch),
                Err(err) => {
                    warn!(error = %err, "base updater failed; dropped");
                    errors.push((UpdateOrigin::Base, err));
                }
            }
        }

        for (id, update) in mem::take(&mut self.pending_adds) {
            let mut scratch = RecordOverlay::new();
            let mut prior = RecordOverlay::new();
            let result = {
                let view = OverlayView::new(&*source, &overlay);
                let mut mutator = RecordSourceMutator::with_backup(&view, &mut scratch, &mut prior);
                match &update {
                    OptimisticUpdate::Source(sink) => {
                        mutator.publish_source(sink);
                        Ok(())
                    }
                    OptimisticUpdate::Updater(updater) => updater(&mut mutator),
                }
            };
            match result {
                Ok(()) => {
                    merge(&mut overlay, scratch);
                    for (touched, entry) in prior.into_entries() {
                        if !self.backup.contains(&touched) {
                            match entry {
                                Some(entry) => self.backup.set_entry(touched, entry),
                                None => self.backup.erase(touched),
                            }
                        }
                    }
                    self.applied.push((id, update));
                }
                Err(err) => {
                    warn!(update = id.0, error = %err, "optimistic update failed; dropped");
                    errors.push((UpdateOrigin::Optimistic(id), err));
                }
            }
        }

        if self.applied.is_empty() {
            self.backup = RecordOverlay::new();
        }
        let changed = commit(source, overlay);
        debug!(changed = changed.len(), applied = self.applied.len(), "publish queue committed");
        self.state = QueueState::Committed;
        Ok(RunOutcome { changed, errors })
    }

    /// Returns the queue to rest after a committed run.
    ///
    /// # Errors
    /// [`StoreError::Internal`] when no run has committed.
    pub fn settle(&mut self) -> Result<(), StoreError> {
        if self.state != QueueState::Committed {
            return Err(StoreError::Internal("settle without a committed run"));
        }
        self.state = if self.has_pending() {
            QueueState::HasPendingPayloads
        } else {
            QueueState::Idle
        };
        Ok(())
    }
}

fn merge(overlay: &mut RecordOverlay, scratch: RecordOverlay) {
    for (id, entry) in scratch.into_entries() {
        match entry {
            Some(entry) => overlay.set_entry(id, entry),
            None => overlay.erase(id),
        }
    }
}

/// Writes staged entries that differ by value; erasures remove present ids.
fn commit(source: &mut RecordSource, overlay: RecordOverlay) -> BTreeSet<DataId> {
    let mut changed = BTreeSet::new();
    for (id, entry) in overlay.into_entries() {
        match entry {
            Some(entry) => {
                if source.get(&id) != Some(&entry) {
                    source.set_entry(id.clone(), entry);
                    changed.insert(id);
                }
            }
            None => {
                if source.remove(&id).is_some() {
                    changed.insert(id);
                }
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::record::{FieldValue, Record};
    use crate::source::ReadSource;

    fn user(name: &str) -> RecordSource {
        let mut sink = RecordSource::new();
        sink.set(Arc::new(
            Record::new(DataId::from("1"), Some("User".into()))
                .with_field("name", FieldValue::Scalar(json!(name))),
        ));
        sink
    }

    fn name_of(source: &RecordSource) -> Option<serde_json::Value> {
        source.record(&DataId::from("1"))?.get_value("name").cloned()
    }

    fn rename(name: &'static str) -> Updater {
        Box::new(move |m| m.set_value(&DataId::from("1"), "name", json!(name)))
    }

    #[test]
    fn lifecycle_moves_through_states() {
        let mut source = RecordSource::new();
        let mut queue = PublishQueue::new();
        assert_eq!(queue.state(), QueueState::Idle);
        queue.commit_source(user("Alice"));
        assert_eq!(queue.state(), QueueState::HasPendingPayloads);
        let outcome = queue.run(&mut source).unwrap();
        assert_eq!(queue.state(), QueueState::Committed);
        assert!(outcome.changed.contains(&DataId::from("1")));
        queue.settle().unwrap();
        assert_eq!(queue.state(), QueueState::Idle);
        assert!(queue.settle().is_err());
    }

    #[test]
    fn identical_payload_changes_nothing() {
        let mut source = RecordSource::new();
        let mut queue = PublishQueue::new();
        queue.commit_source(user("Alice"));
        queue.run(&mut source).unwrap();
        queue.settle().unwrap();
        queue.commit_source(user("Alice"));
        assert!(queue.run(&mut source).unwrap().changed.is_empty());
    }

    #[test]
    fn optimistic_update_applies_and_reverts() {
        let mut source = RecordSource::new();
        let mut queue = PublishQueue::new();
        queue.commit_source(user("Alice"));
        queue.run(&mut source).unwrap();
        queue.settle().unwrap();

        let id = queue.apply_update(OptimisticUpdate::Updater(rename("Optimistic")));
        queue.run(&mut source).unwrap();
        queue.settle().unwrap();
        assert_eq!(name_of(&source), Some(json!("Optimistic")));

        assert!(queue.revert_update(id));
        assert!(!queue.revert_update(id));
        let outcome = queue.run(&mut source).unwrap();
        assert_eq!(name_of(&source), Some(json!("Alice")));
        assert!(outcome.changed.contains(&DataId::from("1")));
        assert_eq!(queue.applied_count(), 0);
    }

    #[test]
    fn base_payload_slides_under_optimistic_layer() {
        let mut source = RecordSource::new();
        let mut queue = PublishQueue::new();
        queue.commit_source(user("Alice"));
        queue.run(&mut source).unwrap();
        queue.settle().unwrap();

        let id = queue.apply_update(OptimisticUpdate::Updater(rename("Optimistic")));
        queue.run(&mut source).unwrap();
        queue.settle().unwrap();

        queue.commit_source(user("Server"));
        queue.run(&mut source).unwrap();
        queue.settle().unwrap();
        assert_eq!(name_of(&source), Some(json!("Optimistic")));

        queue.revert_update(id);
        queue.run(&mut source).unwrap();
        assert_eq!(name_of(&source), Some(json!("Server")));
    }

    #[test]
    fn later_optimistic_update_wins() {
        let mut source = RecordSource::new();
        let mut queue = PublishQueue::new();
        queue.commit_source(user("Alice"));
        queue.apply_update(OptimisticUpdate::Updater(rename("First")));
        queue.apply_update(OptimisticUpdate::Updater(rename("Second")));
        queue.run(&mut source).unwrap();
        assert_eq!(name_of(&source), Some(json!("Second")));
    }

    #[test]
    fn optimistic_creation_is_erased_on_revert() {
        let mut source = RecordSource::new();
        let mut queue = PublishQueue::new();
        let id = queue.apply_update(OptimisticUpdate::Updater(Box::new(|m| {
            m.create(DataId::from("client:new"), "User")
        })));
        queue.run(&mut source).unwrap();
        queue.settle().unwrap();
        assert!(source.has(&DataId::from("client:new")));
        queue.revert_update(id);
        let outcome = queue.run(&mut source).unwrap();
        assert!(!source.has(&DataId::from("client:new")));
        assert!(outcome.changed.contains(&DataId::from("client:new")));
    }

    #[test]
    fn failing_updater_is_dropped_without_partial_writes() {
        let mut source = RecordSource::new();
        let mut queue = PublishQueue::new();
        queue.commit_source(user("Alice"));
        let id = queue.apply_update(OptimisticUpdate::Updater(Box::new(|m| {
            m.set_value(&DataId::from("1"), "name", json!("Half"))?;
            m.set_value(&DataId::from("404"), "name", json!("x"))
        })));
        let outcome = queue.run(&mut source).unwrap();
        assert_eq!(name_of(&source), Some(json!("Alice")));
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].0, UpdateOrigin::Optimistic(id));
        assert!(!queue.revert_update(id));
    }

    #[test]
    fn failed_update_leaves_no_stale_backup() {
        let mut source = RecordSource::new();
        let mut queue = PublishQueue::new();
        queue.commit_source(user("Alice"));
        queue.apply_update(OptimisticUpdate::Updater(Box::new(|m| {
            m.set_value(&DataId::from("1"), "name", json!("Half"))?;
            m.set_value(&DataId::from("404"), "name", json!("x"))
        })));
        queue.run(&mut source).unwrap();
        queue.settle().unwrap();

        queue.commit_source(user("Bob"));
        queue.run(&mut source).unwrap();
        queue.settle().unwrap();
        let id = queue.apply_update(OptimisticUpdate::Updater(rename("Optimistic")));
        queue.run(&mut source).unwrap();
        queue.settle().unwrap();
        queue.revert_update(id);
        queue.run(&mut source).unwrap();
        assert_eq!(name_of(&source), Some(json!("Bob")));
    }
}
