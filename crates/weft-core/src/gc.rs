// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reference-counted garbage collector.
//!
//! Each retained root stores the id set the reference marker produced for it,
//! and every id in that set carries one count per retaining root. A record is
//! eligible for collection when its count is zero.
//!
//! Invariants
//! - Tracking starts over an empty source, so no record is ever untracked.
//! - Counts equal the multiset union of the marked sets of live (and
//!   buffered) roots. [`GarbageCollector::refresh`] re-marks roots touched by a
//!   commit so records that arrive after `retain` are counted.
//! - A batch re-reads counts when it executes; an id retained after it was
//!   scheduled is skipped, never removed.
//! - Collection is cooperative: [`GarbageCollector::collect_step`] removes at
//!   most `step_budget` ids and returns, leaving the rest for a later step.
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::ident::DataId;
use crate::marker::mark_references;
use crate::selector::Selector;
use crate::source::RecordSource;
use crate::StoreError;

/// Handle of a retained root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RetainId(pub u64);

/// Handle of a collection hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HoldId(pub u64);

/// What a collection step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectStep {
    /// Nothing scheduled.
    Idle,
    /// A hold is active; the collection resumes once every hold is released.
    Paused,
    /// A batch ran and candidates remain.
    Continue(Vec<DataId>),
    /// The final batch ran.
    Finished(Vec<DataId>),
}

struct RetainedRoot {
    selector: Selector,
    marked: BTreeSet<DataId>,
    released: bool,
}

struct Collection {
    candidates: VecDeque<DataId>,
    step_budget: usize,
}

/// Retain-count table plus incremental sweeper.
pub struct GarbageCollector {
    enabled: bool,
    counts: FxHashMap<DataId, usize>,
    roots: BTreeMap<RetainId, RetainedRoot>,
    release_buffer: VecDeque<RetainId>,
    release_buffer_size: usize,
    holds: BTreeSet<HoldId>,
    collection: Option<Collection>,
    paused: bool,
    next_retain: u64,
    next_hold: u64,
}

impl GarbageCollector {
    /// Creates a collector for a store that starts out empty.
    pub fn new(enabled: bool, release_buffer_size: usize) -> Self {
        Self {
            enabled,
            counts: FxHashMap::default(),
            roots: BTreeMap::new(),
            release_buffer: VecDeque::new(),
            release_buffer_size,
            holds: BTreeSet::new(),
            collection: None,
            paused: false,
            next_retain: 1,
            next_hold: 1,
        }
    }

    /// Creates a collector over an existing `source`.
    ///
    /// # Errors
    /// [`StoreError::CollectionNotEmpty`] when collection is enabled and
    /// `source` already holds records.
    pub fn for_source(
        source: &RecordSource,
        enabled: bool,
        release_buffer_size: usize,
    ) -> Result<Self, StoreError> {
        if enabled && !source.is_empty() {
            return Err(StoreError::CollectionNotEmpty(source.len()));
        }
        Ok(Self::new(enabled, release_buffer_size))
    }

    /// Current count for `id`.
    pub fn retain_count(&self, id: &DataId) -> usize {
        self.counts.get(id).copied().unwrap_or(0)
    }

    /// Returns `true` while a collection is scheduled or paused.
    pub fn is_collecting(&self) -> bool {
        self.collection.is_some()
    }

    /// Number of live or buffered roots.
    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    fn increment(&mut self, ids: &BTreeSet<DataId>) {
        for id in ids {
            *self.counts.entry(id.clone()).or_insert(0) += 1;
        }
    }

    fn decrement(&mut self, ids: &BTreeSet<DataId>) -> Result<usize, StoreError> {
        let mut zeroed = 0;
        for id in ids {
            let Some(count) = self.counts.get_mut(id) else {
                return Err(StoreError::RetainCountUnderflow(id.clone()));
            };
            *count -= 1;
            if *count == 0 {
                self.counts.remove(id);
                zeroed += 1;
            }
        }
        Ok(zeroed)
    }

    /// Retains everything `selector` reaches in `source`.
    pub fn retain(&mut self, source: &RecordSource, selector: &Selector) -> RetainId {
        let id = RetainId(self.next_retain);
        self.next_retain += 1;
        let marked = mark_references(source, selector);
        self.increment(&marked);
        debug!(retain = id.0, marked = marked.len(), "retained root");
        self.roots.insert(
            id,
            RetainedRoot {
                selector: selector.clone(),
                marked,
                released: false,
            },
        );
        id
    }

    /// Releases a root. Returns `Ok(None)` when `id` was already released.
    ///
    /// With a release buffer, the root stays counted until enough later
    /// releases push it out. Otherwise (and for the evicted root) counts drop
    /// now. `Ok(Some(n))` reports how many ids reached zero.
    ///
    /// # Errors
    /// [`StoreError::RetainCountUnderflow`] if the count table lost track of
    /// an id the root marked.
    pub fn release(&mut self, id: RetainId) -> Result<Option<usize>, StoreError> {
        match self.roots.get_mut(&id) {
            Some(root) if !root.released => root.released = true,
            _ => return Ok(None),
        }
        if self.release_buffer_size == 0 {
            return self.drop_root(id).map(Some);
        }
        self.release_buffer.push_back(id);
        let mut zeroed = 0;
        while self.release_buffer.len() > self.release_buffer_size {
            if let Some(evicted) = self.release_buffer.pop_front() {
                zeroed += self.drop_root(evicted)?;
            }
        }
        Ok(Some(zeroed))
    }

    fn drop_root(&mut self, id: RetainId) -> Result<usize, StoreError> {
        let Some(root) = self.roots.remove(&id) else {
            return Err(StoreError::Internal("released root missing from table"));
        };
        let zeroed = self.decrement(&root.marked)?;
        debug!(retain = id.0, marked = root.marked.len(), zeroed, "released root");
        Ok(zeroed)
    }

    /// Re-marks every root whose marked set intersects `changed`.
    ///
    /// # Errors
    /// [`StoreError::RetainCountUnderflow`] on a corrupted count table.
    pub fn refresh(
        &mut self,
        source: &RecordSource,
        changed: &BTreeSet<DataId>,
    ) -> Result<(), StoreError> {
        if changed.is_empty() {
            return Ok(());
        }
        let touched: Vec<RetainId> = self
            .roots
            .iter()
            .filter(|(_, root)| !root.marked.is_disjoint(changed))
            .map(|(id, _)| *id)
            .collect();
        for id in touched {
            let Some(root) = self.roots.get_mut(&id) else {
                continue;
            };
            let next = mark_references(source, &root.selector);
            let added: BTreeSet<DataId> = next.difference(&root.marked).cloned().collect();
            let removed: BTreeSet<DataId> = root.marked.difference(&next).cloned().collect();
            root.marked = next;
            self.increment(&added);
            self.decrement(&removed)?;
            if !added.is_empty() || !removed.is_empty() {
                trace!(retain = id.0, added = added.len(), removed = removed.len(), "re-marked root");
            }
        }
        Ok(())
    }

    /// Pauses collection until the returned hold is released.
    pub fn hold(&mut self) -> HoldId {
        let id = HoldId(self.next_hold);
        self.next_hold += 1;
        self.holds.insert(id);
        id
    }

    /// Releases a hold. Returns `(released, resume)`: whether the hold was
    /// live, and whether a paused collection should be rescheduled.
    pub fn release_hold(&mut self, id: HoldId) -> (bool, bool) {
        if !self.holds.remove(&id) {
            return (false, false);
        }
        let resume = self.holds.is_empty() && self.paused && self.collection.is_some();
        if resume {
            self.paused = false;
        }
        (true, resume)
    }

    /// Schedules collection of every currently unretained id in `source`.
    ///
    /// Replaces any collection already in progress. Returns the number of
    /// candidates; zero means nothing was scheduled.
    pub fn schedule(&mut self, source: &RecordSource, step_budget: usize) -> usize {
        if !self.enabled {
            return 0;
        }
        let candidates: VecDeque<DataId> = source
            .ids()
            .filter(|id| self.retain_count(id) == 0)
            .cloned()
            .collect();
        let scheduled = candidates.len();
        debug!(candidates = scheduled, step_budget, "scheduled collection");
        self.collection = (scheduled > 0).then(|| Collection {
            candidates,
            step_budget: step_budget.max(1),
        });
        self.paused = false;
        scheduled
    }

    /// Runs one batch of the scheduled collection.
    ///
    /// Counts are read when the batch runs, so a candidate retained after
    /// scheduling is dropped from the collection instead of removed.
    pub fn collect_step(&mut self, source: &mut RecordSource) -> CollectStep {
        if !self.holds.is_empty() {
            if self.collection.is_some() {
                self.paused = true;
                return CollectStep::Paused;
            }
            return CollectStep::Idle;
        }
        let Some(collection) = self.collection.as_mut() else {
            return CollectStep::Idle;
        };
        let mut batch = Vec::new();
        while batch.len() < collection.step_budget {
            let Some(id) = collection.candidates.pop_front() else {
                break;
            };
            if self.counts.get(&id).is_some_and(|count| *count > 0) {
                trace!(id = %id, "candidate retained since scheduling; kept");
                continue;
            }
            batch.push(id);
        }
        let finished = collection.candidates.is_empty();
        if finished {
            self.collection = None;
        }
        let mut removed = Vec::with_capacity(batch.len());
        for id in batch {
            if source.remove(&id).is_some() {
                trace!(id = %id, "collected record");
                removed.push(id);
            }
        }
        debug!(removed = removed.len(), finished, "collection batch");
        if finished {
            CollectStep::Finished(removed)
        } else {
            CollectStep::Continue(removed)
        }
    }
}
