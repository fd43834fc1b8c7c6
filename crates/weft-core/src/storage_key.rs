// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Storage keys and canonical JSON encoding.
//!
//! A record stores each field under a *storage key*: the field name plus a
//! deterministic rendering of its resolved arguments. Two selections that read
//! the same field with the same argument values must land on the same key, no
//! matter how the arguments were ordered in the selection or whether they came
//! from literals or variables.
//!
//! Encoding contract
//! - No arguments, or only arguments that resolve to `null`: the bare name.
//! - Otherwise `name(a:<json>,b:<json>)`, arguments sorted by name.
//! - `<json>` is the canonical encoding from [`canonical_json`]: object keys
//!   sorted, no insignificant whitespace.
use std::fmt::Write as _;

use serde_json::Value;

use crate::selector::{Argument, ArgumentValue, Variables};

static NULL: Value = Value::Null;

/// Resolves an argument against `variables`.
///
/// Unbound variables resolve to `null`, which in turn drops the argument from
/// the storage key.
pub fn resolve_argument<'a>(argument: &'a Argument, variables: &'a Variables) -> &'a Value {
    match &argument.value {
        ArgumentValue::Literal(value) => value,
        ArgumentValue::Variable(name) => variables.get(name).unwrap_or(&NULL),
    }
}

/// Computes the storage key for field `name` with `args` under `variables`.
pub fn storage_key(name: &str, args: &[Argument], variables: &Variables) -> String {
    let mut resolved: Vec<(&str, &Value)> = args
        .iter()
        .map(|arg| (arg.name.as_str(), resolve_argument(arg, variables)))
        .filter(|(_, value)| !value.is_null())
        .collect();
    if resolved.is_empty() {
        return name.to_owned();
    }
    resolved.sort_by(|a, b| a.0.cmp(b.0));

    let mut key = String::with_capacity(name.len() + 16);
    key.push_str(name);
    key.push('(');
    for (ix, (arg_name, value)) in resolved.iter().enumerate() {
        if ix > 0 {
            key.push(',');
        }
        key.push_str(arg_name);
        key.push(':');
        write_canonical(&mut key, value);
    }
    key.push(')');
    key
}

/// Encodes `value` as JSON with object keys sorted.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(&mut out, value);
    out
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            // Scalars have exactly one serde_json rendering.
            let _ = write!(out, "{value}");
        }
        Value::Array(items) => {
            out.push('[');
            for (ix, item) in items.iter().enumerate() {
                if ix > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (ix, (key, item)) in entries.into_iter().enumerate() {
                if ix > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", Value::String(key.clone()));
                out.push(':');
                write_canonical(out, item);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn var_map(value: Value) -> Variables {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => Variables::new(),
        }
    }

    #[test]
    fn bare_name_without_arguments() {
        assert_eq!(storage_key("name", &[], &Variables::new()), "name");
    }

    #[test]
    fn arguments_are_sorted_and_canonical() {
        let args = vec![
            Argument::variable("first", "count"),
            Argument::literal("after", json!("cursor")),
        ];
        let vars = var_map(json!({"count": 10}));
        assert_eq!(
            storage_key("friends", &args, &vars),
            r#"friends(after:"cursor",first:10)"#
        );
    }

    #[test]
    fn null_and_unbound_arguments_are_dropped() {
        let args = vec![
            Argument::literal("a", Value::Null),
            Argument::variable("b", "missing"),
        ];
        assert_eq!(storage_key("field", &args, &Variables::new()), "field");
    }

    #[test]
    fn canonical_json_sorts_nested_object_keys() {
        let value = json!({"z": [1, {"b": true, "a": null}], "a": "x"});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":"x","z":[1,{"a":null,"b":true}]}"#
        );
    }
}
