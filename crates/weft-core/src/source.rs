// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Flat normalized store mapping record ids to records.
//!
//! A record id is in exactly one of three states, and the distinction is kept
//! end-to-end:
//! - **existent**: an entry holding a record;
//! - **nonexistent**: an entry holding the [`RecordEntry::Deleted`] sentinel;
//! - **unknown**: no entry at all (never fetched, or collected).
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ident::DataId;
use crate::record::Record;

/// What the store holds for a present id.
#[derive(Clone, Debug)]
pub enum RecordEntry {
    /// A live record.
    Existent(Arc<Record>),
    /// The record is known to be deleted.
    Deleted,
}

impl RecordEntry {
    /// Returns the record when existent.
    #[must_use]
    pub fn record(&self) -> Option<&Arc<Record>> {
        match self {
            Self::Existent(record) => Some(record),
            Self::Deleted => None,
        }
    }
}

/// Value equality: pointer-equal records short-circuit, otherwise fields are compared.
impl PartialEq for RecordEntry {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Deleted, Self::Deleted) => true,
            (Self::Existent(a), Self::Existent(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

/// Three-way status of a record id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordStatus {
    /// A record is present.
    Existent,
    /// The record was explicitly deleted.
    Nonexistent,
    /// Nothing is known about the id.
    Unknown,
}

/// Read access shared by the committed store and in-flight overlays.
///
/// The reader and the reference marker are generic over this trait so they can
/// run against a committed [`RecordSource`] or against an [`OverlayView`]
/// while a publish is being assembled.
pub trait ReadSource {
    /// Entry for `id`, or `None` when unknown.
    fn entry(&self, id: &DataId) -> Option<&RecordEntry>;

    /// Three-way status of `id`.
    fn status(&self, id: &DataId) -> RecordStatus {
        match self.entry(id) {
            Some(RecordEntry::Existent(_)) => RecordStatus::Existent,
            Some(RecordEntry::Deleted) => RecordStatus::Nonexistent,
            None => RecordStatus::Unknown,
        }
    }

    /// The record for `id` when existent.
    fn record(&self, id: &DataId) -> Option<&Arc<Record>> {
        self.entry(id).and_then(RecordEntry::record)
    }
}

/// In-memory record storage.
///
/// Uses a `BTreeMap` so iteration (debug dumps, GC sweeps) is deterministic.
#[derive(Clone, Debug, Default)]
pub struct RecordSource {
    records: BTreeMap<DataId, RecordEntry>,
}

impl RecordSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `id`: a record, the deleted sentinel, or `None` when unknown.
    #[must_use]
    pub fn get(&self, id: &DataId) -> Option<&RecordEntry> {
        self.records.get(id)
    }

    /// Inserts or replaces the record stored under its own id.
    pub fn set(&mut self, record: Arc<Record>) {
        self.records
            .insert(record.id().clone(), RecordEntry::Existent(record));
    }

    /// Inserts or replaces a raw entry.
    pub fn set_entry(&mut self, id: DataId, entry: RecordEntry) {
        self.records.insert(id, entry);
    }

    /// Marks `id` as deleted. The id stays present with the sentinel entry.
    pub fn delete(&mut self, id: DataId) {
        self.records.insert(id, RecordEntry::Deleted);
    }

    /// Physically erases `id`, returning its previous entry.
    ///
    /// Only garbage collection and optimistic rollback erase entries; every
    /// other writer goes through [`RecordSource::set`] or [`RecordSource::delete`].
    pub fn remove(&mut self, id: &DataId) -> Option<RecordEntry> {
        self.records.remove(id)
    }

    /// Returns `true` if `id` has an entry (existent or deleted).
    #[must_use]
    pub fn has(&self, id: &DataId) -> bool {
        self.records.contains_key(id)
    }

    /// Iterates over all `(id, entry)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&DataId, &RecordEntry)> {
        self.records.iter()
    }

    /// Iterates over all ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &DataId> {
        self.records.keys()
    }

    /// Number of entries, deleted sentinels included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when the source holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl ReadSource for RecordSource {
    fn entry(&self, id: &DataId) -> Option<&RecordEntry> {
        self.records.get(id)
    }
}

/// Pending writes layered over a [`RecordSource`] during a publish.
///
/// Unlike a plain source, an overlay can also say "this id becomes unknown"
/// (`None`), which optimistic rollback needs to undo a client-side creation.
#[derive(Clone, Debug, Default)]
pub struct RecordOverlay {
    entries: BTreeMap<DataId, Option<RecordEntry>>,
}

impl RecordOverlay {
    /// Creates an empty overlay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending state for `id`: `Some(Some(_))` written, `Some(None)` erased,
    /// `None` untouched.
    #[must_use]
    pub fn get(&self, id: &DataId) -> Option<Option<&RecordEntry>> {
        self.entries.get(id).map(Option::as_ref)
    }

    /// Returns `true` if `id` has a staged write or erasure.
    #[must_use]
    pub fn contains(&self, id: &DataId) -> bool {
        self.entries.contains_key(id)
    }

    /// Stages an entry for `id`.
    pub fn set_entry(&mut self, id: DataId, entry: RecordEntry) {
        self.entries.insert(id, Some(entry));
    }

    /// Stages erasure of `id`.
    pub fn erase(&mut self, id: DataId) {
        self.entries.insert(id, None);
    }

    /// Iterates over staged writes in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&DataId, Option<&RecordEntry>)> {
        self.entries.iter().map(|(id, entry)| (id, entry.as_ref()))
    }

    /// Consumes the overlay, yielding staged writes in id order.
    pub fn into_entries(self) -> impl Iterator<Item = (DataId, Option<RecordEntry>)> {
        self.entries.into_iter()
    }

    /// Number of staged ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read-only view of an overlay stacked on a base source.
#[derive(Clone, Copy)]
pub struct OverlayView<'a> {
    base: &'a dyn ReadSource,
    overlay: &'a RecordOverlay,
}

impl<'a> OverlayView<'a> {
    /// Stacks `overlay` on `base`.
    #[must_use]
    pub fn new(base: &'a dyn ReadSource, overlay: &'a RecordOverlay) -> Self {
        Self { base, overlay }
    }
}

impl ReadSource for OverlayView<'_> {
    fn entry(&self, id: &DataId) -> Option<&RecordEntry> {
        match self.overlay.get(id) {
            Some(staged) => staged,
            None => self.base.entry(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str) -> Arc<Record> {
        Arc::new(Record::new(DataId::from(id), Some("User".into())))
    }

    #[test]
    fn three_states_are_distinguishable() {
        let mut source = RecordSource::new();
        source.set(rec("1"));
        source.delete(DataId::from("2"));

        assert_eq!(source.status(&DataId::from("1")), RecordStatus::Existent);
        assert_eq!(source.status(&DataId::from("2")), RecordStatus::Nonexistent);
        assert_eq!(source.status(&DataId::from("3")), RecordStatus::Unknown);
        assert!(source.has(&DataId::from("2")));
        assert!(!source.has(&DataId::from("3")));
    }

    #[test]
    fn remove_returns_to_unknown() {
        let mut source = RecordSource::new();
        source.delete(DataId::from("2"));
        assert!(matches!(
            source.remove(&DataId::from("2")),
            Some(RecordEntry::Deleted)
        ));
        assert_eq!(source.status(&DataId::from("2")), RecordStatus::Unknown);
        assert!(source.is_empty());
    }

    #[test]
    fn overlay_shadows_base_including_erasure() {
        let mut base = RecordSource::new();
        base.set(rec("1"));
        base.set(rec("2"));

        let mut overlay = RecordOverlay::new();
        overlay.set_entry(DataId::from("1"), RecordEntry::Deleted);
        overlay.erase(DataId::from("2"));
        overlay.set_entry(DataId::from("3"), RecordEntry::Existent(rec("3")));

        let view = OverlayView::new(&base, &overlay);
        assert_eq!(view.status(&DataId::from("1")), RecordStatus::Nonexistent);
        assert_eq!(view.status(&DataId::from("2")), RecordStatus::Unknown);
        assert_eq!(view.status(&DataId::from("3")), RecordStatus::Existent);
    }

    #[test]
    fn entry_equality_is_by_value() {
        let a = RecordEntry::Existent(rec("1"));
        let b = RecordEntry::Existent(rec("1"));
        assert_eq!(a, b);
        assert_ne!(a, RecordEntry::Deleted);
    }
}
