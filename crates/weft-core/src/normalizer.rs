// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Normalizer: writes hierarchical payload data into flat records.
//!
//! The payload is walked in lock-step with the selector's normalization
//! selections and written into a fresh sink. The sink only holds what the
//! payload said; merging onto existing records happens at publish time.
//!
//! Write rules
//! - Linked objects get their id from the configured identity field when the
//!   payload carries one, otherwise a client id derived from the parent id and
//!   storage key (plus the index for list elements).
//! - Lists of scalars and plain nested values are stored whole as scalars.
//! - A key missing from the payload writes nothing; `null` writes `null`.
//! - Repeated writes to one field in a pass: the last one wins. Repeated
//!   writes that disagree on a record's typename or identity are reported as
//!   [`Inconsistency`] and the last-seen value is kept.
//! - `null` in a field declared non-null is reported as a [`FieldError`] and
//!   the `null` is still written.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::ident::{make_client_id, make_client_list_id, DataId, ROOT_ID, ROOT_TYPE};
use crate::record::{FieldValue, Record, ID_KEY, TYPENAME_KEY};
use crate::selector::{LinkedField, ScalarField, Selection, Selector, Variables};
use crate::source::RecordSource;

/// Fatal payload shape errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// The payload root was not a JSON object.
    #[error("payload root for {0} must be an object")]
    RootNotObject(DataId),
}

/// A field-level problem found while normalizing. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Response-key path from the payload root.
    pub path: Vec<String>,
    /// Record the field belongs to.
    pub record: DataId,
    /// Storage key that was written.
    pub storage_key: String,
    /// Human-readable description.
    pub message: String,
}

/// Which reserved field disagreed across writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InconsistentField {
    /// The configured identity field.
    Identity,
    /// `__typename`.
    Typename,
}

/// Two writes to the same record disagreed on identity or typename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inconsistency {
    /// Affected record.
    pub record: DataId,
    /// Field that disagreed.
    pub field: InconsistentField,
    /// Value from the earlier write.
    pub previous: String,
    /// Value from the later write, which is the one kept.
    pub next: String,
}

/// Knobs for a normalization pass.
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Payload field holding a server-assigned record id.
    pub identity_field: String,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            identity_field: "id".to_owned(),
        }
    }
}

/// Sink plus the non-fatal problems found while filling it.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    /// Records written by the pass.
    pub source: RecordSource,
    /// Non-null violations and shape mismatches.
    pub field_errors: Vec<FieldError>,
    /// Identity/typename disagreements.
    pub inconsistencies: Vec<Inconsistency>,
}

/// Normalizes `payload` against `selector`'s normalization selections.
///
/// # Errors
/// Returns [`NormalizeError::RootNotObject`] when `payload` is not an object.
pub fn normalize(
    selector: &Selector,
    payload: &Value,
    options: &NormalizeOptions,
) -> Result<Normalized, NormalizeError> {
    let Value::Object(data) = payload else {
        return Err(NormalizeError::RootNotObject(selector.data_id().clone()));
    };
    let mut normalizer = Normalizer {
        variables: selector.variables(),
        options,
        records: BTreeMap::new(),
        path: Vec::new(),
        field_errors: Vec::new(),
        inconsistencies: Vec::new(),
    };
    let root = selector.data_id().clone();
    // A fragment's type may be abstract; only the payload names a concrete one.
    let root_type = if root.as_str() == ROOT_ID {
        Some(ROOT_TYPE)
    } else {
        data.get(TYPENAME_KEY).and_then(Value::as_str)
    };
    normalizer.ensure_record(&root, root_type);
    normalizer.traverse_selections(&root, selector.node().normalization_selections(), data);

    let mut source = RecordSource::new();
    for record in normalizer.records.into_values() {
        source.set(Arc::new(record));
    }
    debug!(
        records = source.len(),
        field_errors = normalizer.field_errors.len(),
        inconsistencies = normalizer.inconsistencies.len(),
        "normalized payload"
    );
    Ok(Normalized {
        source,
        field_errors: normalizer.field_errors,
        inconsistencies: normalizer.inconsistencies,
    })
}

struct Normalizer<'a> {
    variables: &'a Variables,
    options: &'a NormalizeOptions,
    /// Records written so far in this pass, keyed by id (the pass's visited set).
    records: BTreeMap<DataId, Record>,
    path: Vec<String>,
    field_errors: Vec<FieldError>,
    inconsistencies: Vec<Inconsistency>,
}

impl<'a> Normalizer<'a> {
    fn traverse_selections(
        &mut self,
        id: &DataId,
        selections: &'a [Selection],
        data: &Map<String, Value>,
    ) {
        for selection in selections {
            match selection {
                Selection::Scalar(field) => self.write_scalar(id, field, data),
                Selection::Linked(field) => self.write_linked(id, field, data),
                Selection::Condition(condition) => {
                    if condition.passes(self.variables) {
                        self.traverse_selections(id, &condition.selections, data);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    let typename = self
                        .records
                        .get(id)
                        .and_then(|r| r.typename().map(str::to_owned));
                    // Unknown typename: write whatever the payload carries.
                    if typename.is_none_or(|ty| ty == fragment.type_condition) {
                        self.traverse_selections(id, &fragment.selections, data);
                    }
                }
                Selection::FragmentSpread(spread) => {
                    self.traverse_selections(id, &spread.selections, data);
                }
            }
        }
    }

    fn write_scalar(&mut self, id: &DataId, field: &ScalarField, data: &Map<String, Value>) {
        let response_key = field.response_key();
        let Some(value) = data.get(response_key) else {
            debug!(record = %id, field = response_key, "payload omits selected field");
            return;
        };
        match field.name.as_str() {
            TYPENAME_KEY => {
                if let Value::String(ty) = value {
                    self.set_typename(id, ty);
                }
                return;
            }
            ID_KEY => return,
            _ => {}
        }
        let storage_key = field.storage_key(self.variables);
        if value.is_null() && field.non_null {
            self.report_null(id, response_key, &storage_key);
        }
        if field.name == self.options.identity_field && !id.is_client_id() {
            if let Some(declared) = identity_of(value) {
                if declared != id.as_str() {
                    self.report_inconsistency(
                        id,
                        InconsistentField::Identity,
                        id.to_string(),
                        declared,
                    );
                }
            }
        }
        self.put(id, storage_key, FieldValue::Scalar(value.clone()));
    }

    fn write_linked(&mut self, id: &DataId, field: &'a LinkedField, data: &Map<String, Value>) {
        let response_key = field.response_key();
        let Some(value) = data.get(response_key) else {
            debug!(record = %id, field = response_key, "payload omits selected field");
            return;
        };
        let storage_key = field.storage_key(self.variables);
        if value.is_null() {
            if field.non_null {
                self.report_null(id, response_key, &storage_key);
            }
            self.put(id, storage_key, FieldValue::Scalar(Value::Null));
            return;
        }

        self.path.push(response_key.to_owned());
        if field.plural {
            let Value::Array(items) = value else {
                self.report_shape(id, &storage_key, "expected a list of objects");
                self.path.pop();
                return;
            };
            let mut links = Vec::with_capacity(items.len());
            for (ix, item) in items.iter().enumerate() {
                match item {
                    Value::Null => links.push(None),
                    Value::Object(child) => {
                        let fallback = make_client_list_id(id, &storage_key, ix);
                        self.path.push(ix.to_string());
                        let child_id = self.write_child(field, child, fallback);
                        self.path.pop();
                        links.push(Some(child_id));
                    }
                    _ => {
                        self.report_shape(id, &storage_key, "expected an object list element");
                        links.push(None);
                    }
                }
            }
            self.put(id, storage_key, FieldValue::Links(links));
        } else {
            let Value::Object(child) = value else {
                self.report_shape(id, &storage_key, "expected an object");
                self.path.pop();
                return;
            };
            let fallback = make_client_id(id, &storage_key);
            let child_id = self.write_child(field, child, fallback);
            self.put(id, storage_key, FieldValue::Link(child_id));
        }
        self.path.pop();
    }

    fn write_child(
        &mut self,
        field: &'a LinkedField,
        child: &Map<String, Value>,
        fallback: DataId,
    ) -> DataId {
        let child_id = child
            .get(&self.options.identity_field)
            .and_then(identity_of)
            .map_or(fallback, DataId::from);
        let typename = child
            .get(TYPENAME_KEY)
            .and_then(Value::as_str)
            .or(field.concrete_type.as_deref());
        self.ensure_record(&child_id, typename);
        self.traverse_selections(&child_id, &field.selections, child);
        child_id
    }

    fn ensure_record(&mut self, id: &DataId, typename: Option<&str>) {
        if !self.records.contains_key(id) {
            self.records.insert(
                id.clone(),
                Record::new(id.clone(), typename.map(str::to_owned)),
            );
        } else if let Some(ty) = typename {
            self.set_typename(id, ty);
        }
    }

    fn set_typename(&mut self, id: &DataId, ty: &str) {
        let previous = self
            .records
            .get(id)
            .and_then(|r| r.typename().map(str::to_owned));
        if let Some(previous) = previous {
            if previous != ty {
                self.report_inconsistency(id, InconsistentField::Typename, previous, ty.to_owned());
            }
        }
        if let Some(record) = self.records.get_mut(id) {
            record.set_typename(Some(ty.to_owned()));
        }
    }

    fn put(&mut self, id: &DataId, storage_key: String, value: FieldValue) {
        if let Some(record) = self.records.get_mut(id) {
            record.put(storage_key, value);
        }
    }

    fn report_null(&mut self, id: &DataId, response_key: &str, storage_key: &str) {
        let mut path = self.path.clone();
        path.push(response_key.to_owned());
        warn!(record = %id, field = storage_key, "non-null field resolved to null");
        self.field_errors.push(FieldError {
            path,
            record: id.clone(),
            storage_key: storage_key.to_owned(),
            message: format!("non-null field `{storage_key}` resolved to null"),
        });
    }

    fn report_shape(&mut self, id: &DataId, storage_key: &str, expected: &str) {
        warn!(record = %id, field = storage_key, expected, "payload shape mismatch");
        self.field_errors.push(FieldError {
            path: self.path.clone(),
            record: id.clone(),
            storage_key: storage_key.to_owned(),
            message: format!("field `{storage_key}`: {expected}"),
        });
    }

    fn report_inconsistency(
        &mut self,
        id: &DataId,
        field: InconsistentField,
        previous: String,
        next: String,
    ) {
        warn!(record = %id, ?field, %previous, %next, "inconsistent record write");
        self.inconsistencies.push(Inconsistency {
            record: id.clone(),
            field,
            previous,
            next,
        });
    }
}

/// Reads a server identity out of a payload value: strings as-is, numbers
/// rendered in decimal.
fn identity_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
