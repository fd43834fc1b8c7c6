// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Copy-on-write writer over a read-only base.
//!
//! [`RecordSourceMutator`] is the only capability that stages record writes.
//! Reads see staged writes first, then the base. The first write to an id
//! copies the base record, updates the copy and stages it; the base is never
//! touched. Updaters (optimistic or not) receive a mutator and nothing else.
//!
//! With a backup attached, the first write to an id also records that id's
//! prior entry (or its absence) so an optimistic layer can be rolled back.
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::ident::DataId;
use crate::record::{FieldValue, Record};
use crate::source::{ReadSource, RecordEntry, RecordOverlay, RecordSource};

/// Errors raised by mutator writes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutatorError {
    /// A field write or copy targeted a record that is not existent.
    #[error("record not found: {0}")]
    RecordNotFound(DataId),
    /// `create` targeted an id that already holds a record.
    #[error("record already exists: {0}")]
    AlreadyExists(DataId),
}

/// Function that edits records through a mutator.
///
/// Optimistic updaters may run several times (once per rebase), so they must
/// be deterministic in the state they observe.
pub type Updater = Box<dyn Fn(&mut RecordSourceMutator<'_>) -> Result<(), MutatorError>>;

/// Copy-on-write writer staging into a [`RecordOverlay`].
pub struct RecordSourceMutator<'a> {
    base: &'a dyn ReadSource,
    sink: &'a mut RecordOverlay,
    backup: Option<&'a mut RecordOverlay>,
}

impl<'a> RecordSourceMutator<'a> {
    /// Creates a mutator reading `base` and staging into `sink`.
    pub fn new(base: &'a dyn ReadSource, sink: &'a mut RecordOverlay) -> Self {
        Self {
            base,
            sink,
            backup: None,
        }
    }

    /// Like [`RecordSourceMutator::new`], recording prior base entries into `backup`.
    ///
    /// Ids already present in `backup` keep their recorded entry.
    pub fn with_backup(
        base: &'a dyn ReadSource,
        sink: &'a mut RecordOverlay,
        backup: &'a mut RecordOverlay,
    ) -> Self {
        Self {
            base,
            sink,
            backup: Some(backup),
        }
    }

    fn stage(&mut self, id: DataId, entry: RecordEntry) {
        if let Some(backup) = self.backup.as_deref_mut() {
            if !backup.contains(&id) {
                match self.base.entry(&id) {
                    Some(prior) => backup.set_entry(id.clone(), prior.clone()),
                    None => backup.erase(id.clone()),
                }
            }
        }
        self.sink.set_entry(id, entry);
    }

    fn existing(&self, id: &DataId) -> Result<Arc<Record>, MutatorError> {
        self.record(id)
            .cloned()
            .ok_or_else(|| MutatorError::RecordNotFound(id.clone()))
    }

    /// Scalar value of `id.storage_key`.
    pub fn get_value(&self, id: &DataId, storage_key: &str) -> Option<Value> {
        self.record(id)?.get_value(storage_key).cloned()
    }

    /// Linked id of `id.storage_key`.
    pub fn get_link(&self, id: &DataId, storage_key: &str) -> Option<DataId> {
        self.record(id)?.get_link(storage_key).cloned()
    }

    /// Linked ids of `id.storage_key`.
    pub fn get_links(&self, id: &DataId, storage_key: &str) -> Option<Vec<Option<DataId>>> {
        self.record(id)?.get_links(storage_key).map(<[_]>::to_vec)
    }

    /// Typename of `id`.
    pub fn get_typename(&self, id: &DataId) -> Option<String> {
        self.record(id)?.typename().map(str::to_owned)
    }

    /// Creates an empty record.
    ///
    /// # Errors
    /// [`MutatorError::AlreadyExists`] if `id` already holds a record. Deleted
    /// and unknown ids can be (re)created.
    pub fn create(&mut self, id: DataId, typename: impl Into<String>) -> Result<(), MutatorError> {
        if self.record(&id).is_some() {
            return Err(MutatorError::AlreadyExists(id));
        }
        let record = Record::new(id.clone(), Some(typename.into()));
        self.stage(id, RecordEntry::Existent(Arc::new(record)));
        Ok(())
    }

    /// Marks `id` deleted.
    pub fn delete(&mut self, id: DataId) {
        self.stage(id, RecordEntry::Deleted);
    }

    fn write_field(
        &mut self,
        id: &DataId,
        storage_key: &str,
        value: FieldValue,
    ) -> Result<(), MutatorError> {
        let current = self.existing(id)?;
        if current.get(storage_key) == Some(&value) {
            return Ok(());
        }
        let next = current.with_field(storage_key, value);
        self.stage(id.clone(), RecordEntry::Existent(Arc::new(next)));
        Ok(())
    }

    /// Sets a scalar field.
    ///
    /// # Errors
    /// [`MutatorError::RecordNotFound`] unless `id` holds a record.
    pub fn set_value(
        &mut self,
        id: &DataId,
        storage_key: &str,
        value: Value,
    ) -> Result<(), MutatorError> {
        self.write_field(id, storage_key, FieldValue::Scalar(value))
    }

    /// Sets a singular link.
    ///
    /// # Errors
    /// [`MutatorError::RecordNotFound`] unless `id` holds a record.
    pub fn set_link(
        &mut self,
        id: &DataId,
        storage_key: &str,
        target: DataId,
    ) -> Result<(), MutatorError> {
        self.write_field(id, storage_key, FieldValue::Link(target))
    }

    /// Sets a plural link.
    ///
    /// # Errors
    /// [`MutatorError::RecordNotFound`] unless `id` holds a record.
    pub fn set_links(
        &mut self,
        id: &DataId,
        storage_key: &str,
        targets: Vec<Option<DataId>>,
    ) -> Result<(), MutatorError> {
        self.write_field(id, storage_key, FieldValue::Links(targets))
    }

    /// Copies every field (and the typename) of `from` onto `to`.
    ///
    /// # Errors
    /// [`MutatorError::RecordNotFound`] unless both ids hold records.
    pub fn copy_fields(&mut self, from: &DataId, to: &DataId) -> Result<(), MutatorError> {
        let source = self.existing(from)?;
        let target = self.existing(to)?;
        let mut patch = Record::new(to.clone(), source.typename().map(str::to_owned));
        for (key, value) in source.fields() {
            patch.put(key.clone(), value.clone());
        }
        let merged = Record::update(&target, &patch);
        if !Arc::ptr_eq(&merged, &target) {
            self.stage(to.clone(), RecordEntry::Existent(merged));
        }
        Ok(())
    }

    /// Merges a normalized sink.
    ///
    /// Deleted entries delete. Records merge field-by-field onto the current
    /// record (keeping its identity when nothing changes) or are inserted
    /// whole when the current entry is deleted or unknown.
    pub fn publish_source(&mut self, source: &RecordSource) {
        for (id, entry) in source.iter() {
            match entry {
                RecordEntry::Deleted => self.delete(id.clone()),
                RecordEntry::Existent(next) => match self.record(id).cloned() {
                    Some(prev) => {
                        let merged = Record::update(&prev, next);
                        if !Arc::ptr_eq(&merged, &prev) {
                            self.stage(id.clone(), RecordEntry::Existent(merged));
                        }
                    }
                    None => self.stage(id.clone(), RecordEntry::Existent(Arc::clone(next))),
                },
            }
        }
    }
}

impl ReadSource for RecordSourceMutator<'_> {
    fn entry(&self, id: &DataId) -> Option<&RecordEntry> {
        match self.sink.get(id) {
            Some(staged) => staged,
            None => self.base.entry(id),
        }
    }
}
