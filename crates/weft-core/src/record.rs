// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Normalized record type.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::ident::DataId;

/// Reserved field holding a record's own identifier.
pub const ID_KEY: &str = "__id";
/// Reserved field holding a record's concrete typename.
pub const TYPENAME_KEY: &str = "__typename";

/// Value stored under one storage key of a [`Record`].
///
/// `null` is always `Scalar(Value::Null)`, whatever the field's kind; a key that
/// is not present at all means the field was never fetched.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// A scalar, a list of scalars, or a plain nested value that is not
    /// separately normalized.
    Scalar(Value),
    /// Reference to another record.
    Link(DataId),
    /// Ordered references; `None` entries are `null` list elements.
    Links(Vec<Option<DataId>>),
}

impl FieldValue {
    /// Returns `true` for an explicit `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(Value::Null))
    }
}

/// Materialised record for a single entity.
///
/// Records are values: every "mutation" builds a new `Record`, and the store
/// shares them as `Arc<Record>`. Readers rely on this to detect unchanged
/// records by pointer before falling back to value comparison.
///
/// Invariants
/// - `id` matches the key the record is stored under.
/// - `fields` never contains [`ID_KEY`] or [`TYPENAME_KEY`]; those live in
///   `id` and `typename`.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    id: DataId,
    typename: Option<String>,
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Creates an empty record.
    pub fn new(id: DataId, typename: Option<String>) -> Self {
        Self {
            id,
            typename,
            fields: BTreeMap::new(),
        }
    }

    /// Identifier of this record.
    #[must_use]
    pub fn id(&self) -> &DataId {
        &self.id
    }

    /// Concrete typename, when known.
    #[must_use]
    pub fn typename(&self) -> Option<&str> {
        self.typename.as_deref()
    }

    /// Raw field lookup.
    #[must_use]
    pub fn get(&self, storage_key: &str) -> Option<&FieldValue> {
        self.fields.get(storage_key)
    }

    /// Scalar value under `storage_key`.
    #[must_use]
    pub fn get_value(&self, storage_key: &str) -> Option<&Value> {
        match self.fields.get(storage_key) {
            Some(FieldValue::Scalar(value)) => Some(value),
            _ => None,
        }
    }

    /// Linked record id under `storage_key`.
    #[must_use]
    pub fn get_link(&self, storage_key: &str) -> Option<&DataId> {
        match self.fields.get(storage_key) {
            Some(FieldValue::Link(id)) => Some(id),
            _ => None,
        }
    }

    /// Linked record ids under `storage_key`.
    #[must_use]
    pub fn get_links(&self, storage_key: &str) -> Option<&[Option<DataId>]> {
        match self.fields.get(storage_key) {
            Some(FieldValue::Links(ids)) => Some(ids),
            _ => None,
        }
    }

    /// Iterates over `(storage_key, value)` pairs in key order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// Number of non-reserved fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Returns a copy with `storage_key` set to `value`.
    #[must_use]
    pub fn with_field(&self, storage_key: impl Into<String>, value: FieldValue) -> Self {
        let mut next = self.clone();
        next.put(storage_key.into(), value);
        next
    }

    /// Returns a copy with a scalar field set.
    #[must_use]
    pub fn with_value(&self, storage_key: impl Into<String>, value: Value) -> Self {
        self.with_field(storage_key, FieldValue::Scalar(value))
    }

    /// Returns a copy with a singular link set.
    #[must_use]
    pub fn with_link(&self, storage_key: impl Into<String>, target: DataId) -> Self {
        self.with_field(storage_key, FieldValue::Link(target))
    }

    /// Returns a copy with a plural link set.
    #[must_use]
    pub fn with_links(&self, storage_key: impl Into<String>, targets: Vec<Option<DataId>>) -> Self {
        self.with_field(storage_key, FieldValue::Links(targets))
    }

    /// Returns a copy with `typename` replaced.
    #[must_use]
    pub fn with_typename(&self, typename: Option<String>) -> Self {
        let mut next = self.clone();
        next.typename = typename;
        next
    }

    /// Builder-side field write, used while a record is still being assembled
    /// and not yet shared.
    pub(crate) fn put(&mut self, storage_key: String, value: FieldValue) {
        debug_assert!(
            storage_key != ID_KEY && storage_key != TYPENAME_KEY,
            "reserved keys are not stored as fields: {storage_key}"
        );
        self.fields.insert(storage_key, value);
    }

    pub(crate) fn set_typename(&mut self, typename: Option<String>) {
        self.typename = typename;
    }

    /// Overlays `next` onto `prev`, returning `prev` itself when nothing changed.
    ///
    /// Fields absent from `next` keep their `prev` value; a `None` typename in
    /// `next` keeps `prev`'s typename.
    pub fn update(prev: &Arc<Self>, next: &Self) -> Arc<Self> {
        let typename_changes = next.typename.is_some() && next.typename != prev.typename;
        let changes_field = next
            .fields
            .iter()
            .any(|(key, value)| prev.fields.get(key) != Some(value));
        if !typename_changes && !changes_field {
            return Arc::clone(prev);
        }
        let mut merged = (**prev).clone();
        if next.typename.is_some() {
            merged.typename.clone_from(&next.typename);
        }
        for (key, value) in &next.fields {
            merged.fields.insert(key.clone(), value.clone());
        }
        Arc::new(merged)
    }
}
