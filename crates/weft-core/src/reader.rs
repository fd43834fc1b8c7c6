// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reader: materializes a selector's data from a record source.
//!
//! Read semantics
//! - Unknown record or unknown field: [`ReadValue::Undefined`] and the
//!   snapshot's missing-data flag is set.
//! - Deleted record: [`ReadValue::Null`]; the missing-data flag is untouched.
//! - Type refinement on a record whose typename is unknown: missing data.
//! - A `null` in a field declared non-null turns the enclosing object into
//!   `null`, and keeps bubbling through non-null parents.
//! - Fragment spreads produce a fragment reference
//!   `{"__id": .., "__fragments": {name: variables}}` instead of inlining data.
//!
//! Each `(record id, selection list)` pair is read once per pass; repeats reuse
//! the memoized value, which also makes the repeats share identity.
use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::{Map, Value};

use crate::ident::DataId;
use crate::record::{FieldValue, Record, ID_KEY, TYPENAME_KEY};
use crate::selector::{LinkedField, ScalarField, Selection, Selector, Variables};
use crate::snapshot::{recycle, ReadObject, ReadValue, Snapshot};
use crate::source::{ReadSource, RecordEntry};

/// Key of the fragment-reference map in read results.
pub const FRAGMENTS_KEY: &str = "__fragments";

/// Reads `selector` from `source`.
pub fn read<S: ReadSource + ?Sized>(source: &S, selector: &Selector) -> Snapshot {
    let mut reader = Reader {
        source,
        variables: selector.variables(),
        seen: BTreeSet::new(),
        missing: false,
        memo: FxHashMap::default(),
    };
    let data = reader.traverse(selector.data_id(), selector.node().selections());
    Snapshot {
        selector: selector.clone(),
        data,
        seen_records: reader.seen,
        is_missing_data: reader.missing,
    }
}

/// Reads `selector` and folds the result into `previous` for structural sharing.
///
/// `previous` should come from the same selector; when the data is deeply
/// equal, the returned snapshot's data is the previous allocation.
pub fn read_with_previous<S: ReadSource + ?Sized>(
    source: &S,
    selector: &Selector,
    previous: Option<&Snapshot>,
) -> Snapshot {
    let mut snapshot = read(source, selector);
    if let Some(previous) = previous {
        snapshot.data = recycle(&previous.data, snapshot.data);
    }
    snapshot
}

/// A non-null field resolved to `null`; the enclosing object becomes `null`.
struct NullBubble;

struct Reader<'a, S: ?Sized> {
    source: &'a S,
    variables: &'a Variables,
    seen: BTreeSet<DataId>,
    missing: bool,
    memo: FxHashMap<(DataId, usize), ReadValue>,
}

impl<'a, S: ReadSource + ?Sized> Reader<'a, S> {
    fn traverse(&mut self, id: &DataId, selections: &'a [Selection]) -> ReadValue {
        self.seen.insert(id.clone());
        let memo_key = (id.clone(), selections.as_ptr() as usize);
        if let Some(value) = self.memo.get(&memo_key) {
            return value.clone();
        }
        let source = self.source;
        let value = match source.entry(id) {
            None => {
                self.missing = true;
                ReadValue::Undefined
            }
            Some(RecordEntry::Deleted) => ReadValue::Null,
            Some(RecordEntry::Existent(record)) => {
                let mut data = ReadObject::new();
                match self.traverse_selections(record, selections, &mut data) {
                    Ok(()) => ReadValue::Object(Arc::new(data)),
                    Err(NullBubble) => ReadValue::Null,
                }
            }
        };
        self.memo.insert(memo_key, value.clone());
        value
    }

    fn traverse_selections(
        &mut self,
        record: &'a Record,
        selections: &'a [Selection],
        data: &mut ReadObject,
    ) -> Result<(), NullBubble> {
        for selection in selections {
            match selection {
                Selection::Scalar(field) => self.read_scalar(record, field, data)?,
                Selection::Linked(field) => self.read_linked(record, field, data)?,
                Selection::Condition(condition) => {
                    if condition.passes(self.variables) {
                        self.traverse_selections(record, &condition.selections, data)?;
                    }
                }
                Selection::InlineFragment(fragment) => match record.typename() {
                    Some(ty) if ty == fragment.type_condition => {
                        self.traverse_selections(record, &fragment.selections, data)?;
                    }
                    Some(_) => {}
                    None => self.missing = true,
                },
                Selection::FragmentSpread(spread) => {
                    self.write_fragment_ref(record, &spread.name, data);
                }
            }
        }
        Ok(())
    }

    fn read_scalar(
        &mut self,
        record: &Record,
        field: &ScalarField,
        data: &mut ReadObject,
    ) -> Result<(), NullBubble> {
        let value = match field.name.as_str() {
            TYPENAME_KEY => record
                .typename()
                .map(|ty| ReadValue::Scalar(Value::String(ty.to_owned()))),
            ID_KEY => Some(ReadValue::Scalar(Value::String(record.id().to_string()))),
            _ => match record.get(&field.storage_key(self.variables)) {
                Some(FieldValue::Scalar(value)) => Some(ReadValue::from_scalar(value)),
                // A link stored where a scalar is selected cannot be projected.
                Some(_) | None => None,
            },
        };
        let value = value.unwrap_or_else(|| {
            self.missing = true;
            ReadValue::Undefined
        });
        if field.non_null && matches!(value, ReadValue::Null) {
            return Err(NullBubble);
        }
        data.insert(field.response_key().to_owned(), value);
        Ok(())
    }

    fn read_linked(
        &mut self,
        record: &'a Record,
        field: &'a LinkedField,
        data: &mut ReadObject,
    ) -> Result<(), NullBubble> {
        let key = field.storage_key(self.variables);
        let value = match (record.get(&key), field.plural) {
            (Some(stored), _) if stored.is_null() => ReadValue::Null,
            (Some(FieldValue::Link(id)), false) => self.traverse(id, &field.selections),
            (Some(FieldValue::Links(ids)), true) => {
                let items = ids
                    .iter()
                    .map(|id| match id {
                        Some(id) => self.traverse(id, &field.selections),
                        None => ReadValue::Null,
                    })
                    .collect();
                ReadValue::List(Arc::new(items))
            }
            _ => {
                self.missing = true;
                ReadValue::Undefined
            }
        };
        if field.non_null && matches!(value, ReadValue::Null) {
            return Err(NullBubble);
        }
        data.insert(field.response_key().to_owned(), value);
        Ok(())
    }

    fn write_fragment_ref(&self, record: &Record, name: &str, data: &mut ReadObject) {
        data.insert(
            ID_KEY.to_owned(),
            ReadValue::Scalar(Value::String(record.id().to_string())),
        );
        let mut fragments = match data.remove(FRAGMENTS_KEY) {
            Some(ReadValue::Object(existing)) => {
                Arc::try_unwrap(existing).unwrap_or_else(|shared| (*shared).clone())
            }
            _ => ReadObject::new(),
        };
        let variables: Map<String, Value> = self
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        fragments.insert(name.to_owned(), ReadValue::Scalar(Value::Object(variables)));
        data.insert(FRAGMENTS_KEY.to_owned(), ReadValue::Object(Arc::new(fragments)));
    }
}
