// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Read results and structural sharing.
//!
//! A [`Snapshot`] is plain data: once returned it never changes, regardless of
//! later commits or retain-handle disposal.
//!
//! Identity contract
//! - Objects and lists are shared through `Arc`; [`ReadValue::same`] compares
//!   them by pointer and compares scalars by value.
//! - [`recycle`] folds a fresh result into a previous one, returning the
//!   previous `Arc` for every subtree that is deeply equal. Consumers can then
//!   use [`ReadValue::same`] to skip work for unchanged subtrees.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::ident::DataId;
use crate::selector::Selector;

/// Object node of a read result, keyed by response key.
pub type ReadObject = BTreeMap<String, ReadValue>;

/// Denormalized value produced by the reader.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadValue {
    /// The data was never fetched.
    Undefined,
    /// An explicit `null`, or a deleted record.
    Null,
    /// A non-null scalar, list of scalars, or plain nested value.
    Scalar(Value),
    /// A record (or fragment reference) projected through a selection list.
    Object(Arc<ReadObject>),
    /// A plural linked field.
    List(Arc<Vec<ReadValue>>),
}

impl ReadValue {
    /// Wraps a stored scalar, mapping JSON `null` to [`ReadValue::Null`].
    #[must_use]
    pub fn from_scalar(value: &Value) -> Self {
        if value.is_null() {
            Self::Null
        } else {
            Self::Scalar(value.clone())
        }
    }

    /// Reference equality: pointer comparison for objects and lists, value
    /// comparison for everything else.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Scalar(a), Self::Scalar(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Field lookup on an object value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Object(object) => object.get(key),
            _ => None,
        }
    }

    /// Returns the object when this value is one.
    #[must_use]
    pub fn as_object(&self) -> Option<&Arc<ReadObject>> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Returns the list when this value is one.
    #[must_use]
    pub fn as_list(&self) -> Option<&Arc<Vec<Self>>> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Converts to JSON. Undefined object fields are omitted; undefined list
    /// elements become `null`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Undefined | Self::Null => Value::Null,
            Self::Scalar(value) => value.clone(),
            Self::Object(object) => {
                let mut out = Map::new();
                for (key, value) in object.iter() {
                    if !matches!(value, Self::Undefined) {
                        out.insert(key.clone(), value.to_json());
                    }
                }
                Value::Object(out)
            }
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

/// Folds `next` into `prev`, reusing `prev`'s allocations for equal subtrees.
///
/// Returns a value deeply equal to `next`. When `next` is deeply equal to
/// `prev` as a whole, the result is [`ReadValue::same`] as `prev`.
#[must_use]
pub fn recycle(prev: &ReadValue, next: ReadValue) -> ReadValue {
    match (prev, next) {
        (ReadValue::Object(old), ReadValue::Object(new)) => {
            if Arc::ptr_eq(old, &new) {
                return ReadValue::Object(new);
            }
            let new = Arc::try_unwrap(new).unwrap_or_else(|shared| (*shared).clone());
            let mut unchanged = old.len() == new.len();
            let mut merged = ReadObject::new();
            for (key, value) in new {
                let value = match old.get(&key) {
                    Some(old_value) => {
                        let value = recycle(old_value, value);
                        unchanged &= old_value.same(&value);
                        value
                    }
                    None => {
                        unchanged = false;
                        value
                    }
                };
                merged.insert(key, value);
            }
            if unchanged {
                prev.clone()
            } else {
                ReadValue::Object(Arc::new(merged))
            }
        }
        (ReadValue::List(old), ReadValue::List(new)) => {
            if Arc::ptr_eq(old, &new) {
                return ReadValue::List(new);
            }
            let new = Arc::try_unwrap(new).unwrap_or_else(|shared| (*shared).clone());
            let mut unchanged = old.len() == new.len();
            let mut merged = Vec::with_capacity(new.len());
            for (ix, value) in new.into_iter().enumerate() {
                let value = match old.get(ix) {
                    Some(old_value) => {
                        let value = recycle(old_value, value);
                        unchanged &= old_value.same(&value);
                        value
                    }
                    None => value,
                };
                merged.push(value);
            }
            if unchanged {
                prev.clone()
            } else {
                ReadValue::List(Arc::new(merged))
            }
        }
        (_, next) => {
            if prev.same(&next) {
                prev.clone()
            } else {
                next
            }
        }
    }
}

/// Output of reading a selector against a record source.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Selector that produced this snapshot.
    pub selector: Selector,
    /// Denormalized data.
    pub data: ReadValue,
    /// Every record id the read touched (its dependency set).
    pub seen_records: BTreeSet<DataId>,
    /// `true` if any selected field or record was unknown to the source.
    pub is_missing_data: bool,
}

impl Snapshot {
    /// Returns `true` if any of `ids` is a dependency of this snapshot.
    pub fn depends_on_any<'a>(&self, ids: impl IntoIterator<Item = &'a DataId>) -> bool {
        ids.into_iter().any(|id| self.seen_records.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn obj(entries: Vec<(&str, ReadValue)>) -> ReadValue {
        ReadValue::Object(Arc::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
        ))
    }

    fn user(name: &str) -> ReadValue {
        obj(vec![
            ("id", ReadValue::Scalar(json!("1"))),
            ("name", ReadValue::Scalar(json!(name))),
        ])
    }

    #[test]
    fn equal_trees_collapse_to_previous() {
        let prev = obj(vec![("me", user("Alice"))]);
        let next = obj(vec![("me", user("Alice"))]);
        let out = recycle(&prev, next);
        assert!(out.same(&prev));
    }

    #[test]
    fn unchanged_siblings_keep_identity() {
        let prev = obj(vec![("a", user("Alice")), ("b", user("Bob"))]);
        let next = obj(vec![("a", user("Alice")), ("b", user("Bobby"))]);
        let out = recycle(&prev, next.clone());
        assert!(!out.same(&prev));
        assert_eq!(out, next);
        assert!(out.get("a").unwrap().same(prev.get("a").unwrap()));
        assert!(!out.get("b").unwrap().same(prev.get("b").unwrap()));
    }

    #[test]
    fn list_identity_requires_same_length() {
        let prev = ReadValue::List(Arc::new(vec![user("Alice")]));
        let longer = ReadValue::List(Arc::new(vec![user("Alice"), user("Bob")]));
        let out = recycle(&prev, longer);
        assert!(!out.same(&prev));
        let first = out.as_list().unwrap()[0].clone();
        assert!(first.same(&prev.as_list().unwrap()[0]));
    }

    #[test]
    fn to_json_omits_undefined_fields() {
        let value = obj(vec![
            ("a", ReadValue::Undefined),
            ("b", ReadValue::Null),
            ("c", ReadValue::List(Arc::new(vec![ReadValue::Undefined]))),
        ]);
        assert_eq!(value.to_json(), json!({"b": null, "c": [null]}));
    }
}
