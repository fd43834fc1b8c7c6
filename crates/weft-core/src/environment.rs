// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The store environment: one explicit handle owning every store component.
//!
//! There is no ambient "current store"; hosts create an [`Environment`] and
//! pass it wherever store access is needed.
//!
//! Ownership
//! - The committed [`RecordSource`] is written only by the publish queue's
//!   commit and by collection batches.
//! - The retain table is owned by the collector and changes only inside
//!   environment calls, so a batch never interleaves with a `retain`.
//! - Notifications fire synchronously inside the call that committed, in
//!   subscription registration order.
use std::collections::{BTreeSet, VecDeque};

use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::gc::{CollectStep, GarbageCollector, HoldId, RetainId};
use crate::ident::{DataId, SelectorId, ROOT_ID};
use crate::mutator::{MutatorError, Updater};
use crate::normalizer::{normalize, FieldError, Inconsistency, NormalizeOptions, Normalized};
use crate::publish_queue::{OptimisticUpdate, PublishQueue, QueueState, UpdateId, UpdateOrigin};
use crate::reader::{read, read_with_previous};
use crate::selector::Selector;
use crate::snapshot::Snapshot;
use crate::source::{ReadSource, RecordSource, RecordStatus};
use crate::subscriptions::{SnapshotCallback, SubscriptionId, SubscriptionTable};
use crate::task::{Task, TaskQueue};

/// Handle returned by operations that hold a resource until disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposable {
    /// A subscription from [`Environment::subscribe`].
    Subscription(SubscriptionId),
    /// A retained root from [`Environment::retain`].
    Retain(RetainId),
    /// An optimistic update from [`Environment::apply_update`].
    Update(UpdateId),
    /// A collection hold from [`Environment::hold_gc`].
    GcHold(HoldId),
}

/// Optimistic input accepted by [`Environment::apply_update`].
pub enum OptimisticInput {
    /// An optimistic response, normalized against `selector`.
    Payload {
        /// Selector the response answers.
        selector: Selector,
        /// Raw response data.
        data: Value,
    },
    /// An updater rerun on every rebase.
    Updater(Updater),
}

/// What one publish-queue run did.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Ids whose committed entry changed.
    pub changed: BTreeSet<DataId>,
    /// Subscriptions notified, in registration order.
    pub notified: Vec<SubscriptionId>,
    /// Updaters that failed and were dropped.
    pub errors: Vec<(UpdateOrigin, MutatorError)>,
}

/// Diagnostics of a committed or queued payload.
#[derive(Debug, Default)]
pub struct PayloadOutcome {
    /// Field-level errors (e.g. non-null violations).
    pub field_errors: Vec<FieldError>,
    /// Identity or typename conflicts inside the payload.
    pub inconsistencies: Vec<Inconsistency>,
    /// The run that committed the payload; `None` when it was only queued.
    pub report: Option<RunReport>,
}

/// Bounded FIFO of the last snapshot per selector.
struct SnapshotCache {
    capacity: usize,
    order: VecDeque<SelectorId>,
    entries: FxHashMap<SelectorId, Snapshot>,
}

impl SnapshotCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            entries: FxHashMap::default(),
        }
    }

    fn get(&self, id: &SelectorId) -> Option<&Snapshot> {
        self.entries.get(id)
    }

    fn insert(&mut self, id: SelectorId, snapshot: Snapshot) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(id, snapshot).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }
}

/// Normalized record store with publish/subscribe and reference-counted GC.
pub struct Environment {
    config: StoreConfig,
    normalize_options: NormalizeOptions,
    source: RecordSource,
    queue: PublishQueue,
    gc: GarbageCollector,
    subscriptions: SubscriptionTable,
    tasks: TaskQueue,
    cache: SnapshotCache,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl Environment {
    /// Creates an environment over an empty store.
    pub fn new(config: StoreConfig) -> Self {
        let gc = GarbageCollector::new(config.gc_enabled, config.gc_release_buffer_size);
        Self::assemble(config, RecordSource::new(), gc)
    }

    /// Creates an environment over pre-populated records.
    ///
    /// # Errors
    /// [`StoreError::CollectionNotEmpty`] unless collection is disabled or
    /// `source` is empty.
    pub fn with_source(config: StoreConfig, source: RecordSource) -> Result<Self, StoreError> {
        let gc = GarbageCollector::for_source(
            &source,
            config.gc_enabled,
            config.gc_release_buffer_size,
        )?;
        Ok(Self::assemble(config, source, gc))
    }

    fn assemble(config: StoreConfig, source: RecordSource, gc: GarbageCollector) -> Self {
        let normalize_options = NormalizeOptions {
            identity_field: config.identity_field.clone(),
        };
        let cache = SnapshotCache::new(config.snapshot_cache_capacity);
        Self {
            config,
            normalize_options,
            source,
            queue: PublishQueue::new(),
            gc,
            subscriptions: SubscriptionTable::new(),
            tasks: TaskQueue::new(),
            cache,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Committed records.
    pub fn source(&self) -> &RecordSource {
        &self.source
    }

    /// Retain count of `id`.
    pub fn retain_count(&self, id: &DataId) -> usize {
        self.gc.retain_count(id)
    }

    /// Publish queue state.
    pub fn queue_state(&self) -> QueueState {
        self.queue.state()
    }

    /// Number of deferred tasks waiting for [`Environment::tick`].
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Reads `selector` against committed data.
    ///
    /// Repeated lookups of the same selector share structure with the
    /// previous result while it stays cached.
    pub fn lookup(&mut self, selector: &Selector) -> Snapshot {
        let previous = self.cache.get(&selector.id());
        let snapshot = read_with_previous(&self.source, selector, previous);
        self.cache.insert(selector.id(), snapshot.clone());
        snapshot
    }

    /// Returns `true` when every field `selector` needs is present.
    pub fn check(&self, selector: &Selector) -> bool {
        !read(&self.source, selector).is_missing_data
    }

    /// Subscribes `callback` to changes of `selector`'s data.
    pub fn subscribe(&mut self, selector: &Selector, callback: SnapshotCallback) -> Disposable {
        let snapshot = self.lookup(selector);
        Disposable::Subscription(self.subscriptions.subscribe(snapshot, callback))
    }

    /// Latest snapshot delivered to a subscription.
    pub fn subscription_snapshot(&self, id: SubscriptionId) -> Option<&Snapshot> {
        self.subscriptions.snapshot(id)
    }

    /// Keeps every record `selector` reaches alive until disposed.
    pub fn retain(&mut self, selector: &Selector) -> Disposable {
        Disposable::Retain(self.gc.retain(&self.source, selector))
    }

    fn normalize_payload(
        &self,
        selector: &Selector,
        data: &Value,
    ) -> Result<Normalized, StoreError> {
        if selector.data_id().as_str() != ROOT_ID
            && self.source.status(selector.data_id()) == RecordStatus::Unknown
        {
            return Err(StoreError::UnknownRoot(selector.data_id().clone()));
        }
        Ok(normalize(selector, data, &self.normalize_options)?)
    }

    /// Normalizes `data`, commits it and notifies affected subscribers.
    ///
    /// # Errors
    /// [`StoreError::UnknownRoot`] for a non-query selector whose root record
    /// is unknown, [`StoreError::Normalize`] when `data` is not an object.
    #[instrument(skip(self, data), fields(selector = ?selector.id()))]
    pub fn commit_payload(
        &mut self,
        selector: &Selector,
        data: &Value,
    ) -> Result<PayloadOutcome, StoreError> {
        let normalized = self.normalize_payload(selector, data)?;
        self.queue.commit_source(normalized.source);
        let report = self.run()?;
        Ok(PayloadOutcome {
            field_errors: normalized.field_errors,
            inconsistencies: normalized.inconsistencies,
            report: Some(report),
        })
    }

    /// Normalizes and queues `data`, deferring the commit to a [`Task::Run`].
    ///
    /// Several queued payloads commit together and notify once.
    ///
    /// # Errors
    /// As [`Environment::commit_payload`].
    pub fn queue_payload(
        &mut self,
        selector: &Selector,
        data: &Value,
    ) -> Result<PayloadOutcome, StoreError> {
        let normalized = self.normalize_payload(selector, data)?;
        self.queue.commit_source(normalized.source);
        self.tasks.schedule(Task::Run);
        Ok(PayloadOutcome {
            field_errors: normalized.field_errors,
            inconsistencies: normalized.inconsistencies,
            report: None,
        })
    }

    /// Applies a non-optimistic updater and commits.
    ///
    /// # Errors
    /// Fatal store errors only; a failing updater is reported in the report.
    pub fn commit_update(&mut self, updater: Updater) -> Result<RunReport, StoreError> {
        self.queue.commit_update(updater);
        self.run()
    }

    /// Applies an optimistic update on top of committed data.
    ///
    /// Disposing the returned handle reverts the update.
    ///
    /// # Errors
    /// As [`Environment::commit_payload`] for payload input.
    pub fn apply_update(&mut self, input: OptimisticInput) -> Result<Disposable, StoreError> {
        let update = match input {
            OptimisticInput::Payload { selector, data } => {
                OptimisticUpdate::Source(self.normalize_payload(&selector, &data)?.source)
            }
            OptimisticInput::Updater(updater) => OptimisticUpdate::Updater(updater),
        };
        let id = self.queue.apply_update(update);
        self.run()?;
        Ok(Disposable::Update(id))
    }

    /// Commits everything queued, refreshes retained roots and notifies.
    ///
    /// # Errors
    /// [`StoreError::QueueReentered`] or a corrupted retain table.
    #[instrument(skip(self))]
    pub fn run(&mut self) -> Result<RunReport, StoreError> {
        let outcome = self.queue.run(&mut self.source)?;
        self.gc.refresh(&self.source, &outcome.changed)?;
        let notified = self.subscriptions.notify(&self.source, &outcome.changed);
        self.queue.settle()?;
        Ok(RunReport {
            changed: outcome.changed,
            notified,
            errors: outcome.errors,
        })
    }

    /// Schedules collection of every unretained record in batches of
    /// `step_budget`. Returns the number of candidates.
    ///
    /// Batches run from [`Environment::tick`] / [`Environment::flush`].
    #[instrument(skip(self))]
    pub fn schedule_collection(&mut self, step_budget: usize) -> usize {
        let candidates = self.gc.schedule(&self.source, step_budget);
        if candidates > 0 {
            self.tasks.schedule(Task::CollectGarbage);
        }
        candidates
    }

    /// Pauses collection batches until the returned handle is disposed.
    pub fn hold_gc(&mut self) -> Disposable {
        Disposable::GcHold(self.gc.hold())
    }

    /// Releases a handle. Returns `Ok(false)` if it was already disposed.
    ///
    /// Releasing a retain that drops counts to zero schedules a collection
    /// with the configured step budget.
    ///
    /// # Errors
    /// Fatal errors from the run triggered by reverting an optimistic update,
    /// or a corrupted retain table.
    pub fn dispose(&mut self, disposable: Disposable) -> Result<bool, StoreError> {
        match disposable {
            Disposable::Subscription(id) => Ok(self.subscriptions.unsubscribe(id)),
            Disposable::Retain(id) => match self.gc.release(id)? {
                None => Ok(false),
                Some(zeroed) => {
                    if zeroed > 0 {
                        self.schedule_collection(self.config.gc_step_budget);
                    }
                    Ok(true)
                }
            },
            Disposable::Update(id) => {
                if !self.queue.revert_update(id) {
                    return Ok(false);
                }
                self.run()?;
                Ok(true)
            }
            Disposable::GcHold(id) => {
                let (released, resume) = self.gc.release_hold(id);
                if resume {
                    self.tasks.schedule(Task::CollectGarbage);
                }
                Ok(released)
            }
        }
    }

    /// Runs the next deferred task. Returns `false` when none was waiting.
    ///
    /// # Errors
    /// Fatal errors raised by the task.
    pub fn tick(&mut self) -> Result<bool, StoreError> {
        let Some(task) = self.tasks.pop() else {
            return Ok(false);
        };
        match task {
            Task::Run => {
                self.run()?;
            }
            Task::CollectGarbage => match self.gc.collect_step(&mut self.source) {
                CollectStep::Continue(_) => {
                    self.tasks.schedule(Task::CollectGarbage);
                }
                CollectStep::Paused => debug!("collection paused by hold"),
                CollectStep::Idle | CollectStep::Finished(_) => {}
            },
        }
        Ok(true)
    }

    /// Runs deferred tasks until none remain. Returns how many ran.
    ///
    /// # Errors
    /// The first fatal error raised by a task.
    pub fn flush(&mut self) -> Result<usize, StoreError> {
        let mut ran = 0;
        while self.tick()? {
            ran += 1;
        }
        Ok(ran)
    }
}
