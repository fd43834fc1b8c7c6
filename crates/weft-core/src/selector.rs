// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Selection trees and selectors.
//!
//! Selection trees arrive pre-compiled from an external code generator; this
//! module only models them. Abstract-type dispatch is explicit: an
//! [`InlineFragment`] names the concrete type it applies to and traversals
//! compare that against the record's `__typename`.
//!
//! Identity contract
//! - A [`SelectorNode`] fingerprint is a BLAKE3 digest over a canonical,
//!   tag-prefixed encoding of its read and normalization selections. It is
//!   computed once at construction.
//! - A [`Selector`] is identified by [`SelectorId`] = digest of (root id,
//!   node fingerprint, canonical variables). `Eq`/`Hash` go through the id, so
//!   structurally identical selectors built independently collapse together.
use std::collections::BTreeMap;
use std::hash::{Hash as StdHash, Hasher as StdHasher};
use std::sync::Arc;

use blake3::Hasher;
use serde_json::Value;

use crate::ident::{make_selector_id, DataId, Hash, SelectorId, ROOT_TYPE};
use crate::storage_key::{canonical_json, storage_key};

/// Variable bindings substituted into a selection tree.
pub type Variables = BTreeMap<String, Value>;

/// Value side of a field argument.
#[derive(Clone, Debug, PartialEq)]
pub enum ArgumentValue {
    /// A literal JSON value baked into the selection.
    Literal(Value),
    /// A reference to a variable resolved at read/write time.
    Variable(String),
}

/// A named field argument.
#[derive(Clone, Debug, PartialEq)]
pub struct Argument {
    /// Argument name.
    pub name: String,
    /// Literal value or variable reference.
    pub value: ArgumentValue,
}

impl Argument {
    /// Builds a literal argument.
    pub fn literal(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value: ArgumentValue::Literal(value),
        }
    }

    /// Builds an argument bound to variable `variable`.
    pub fn variable(name: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ArgumentValue::Variable(variable.into()),
        }
    }
}

/// A field holding a scalar, a list of scalars, or a plain nested value.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarField {
    /// Schema field name.
    pub name: String,
    /// Response key override.
    pub alias: Option<String>,
    /// Field arguments.
    pub args: Vec<Argument>,
    /// Whether the schema declares the field non-nullable.
    pub non_null: bool,
}

impl ScalarField {
    /// Builds a nullable scalar field without arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            args: Vec::new(),
            non_null: false,
        }
    }

    /// Key under which the field appears in payloads and read results.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Storage key of this field under `variables`.
    pub fn storage_key(&self, variables: &Variables) -> String {
        storage_key(&self.name, &self.args, variables)
    }
}

/// A field whose value is normalized into its own record(s).
#[derive(Clone, Debug, PartialEq)]
pub struct LinkedField {
    /// Schema field name.
    pub name: String,
    /// Response key override.
    pub alias: Option<String>,
    /// Field arguments.
    pub args: Vec<Argument>,
    /// `true` for list-of-objects fields.
    pub plural: bool,
    /// Concrete typename when statically known; `None` for interfaces and unions.
    pub concrete_type: Option<String>,
    /// Whether the schema declares the field non-nullable.
    pub non_null: bool,
    /// Selections applied to the linked record(s).
    pub selections: Vec<Selection>,
}

impl LinkedField {
    /// Builds a singular, nullable linked field of unknown concrete type.
    pub fn new(name: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            args: Vec::new(),
            plural: false,
            concrete_type: None,
            non_null: false,
            selections,
        }
    }

    /// Key under which the field appears in payloads and read results.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Storage key of this field under `variables`.
    pub fn storage_key(&self, variables: &Variables) -> String {
        storage_key(&self.name, &self.args, variables)
    }
}

/// `@include` / `@skip` guard around a group of selections.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    /// Variable that controls the guard.
    pub variable: String,
    /// Value the variable must take for the selections to apply
    /// (`true` for `@include`, `false` for `@skip`).
    pub passing_value: bool,
    /// Guarded selections.
    pub selections: Vec<Selection>,
}

impl Condition {
    /// Returns `true` when the guarded selections apply under `variables`.
    ///
    /// Unbound and `null` variables are falsy.
    pub fn passes(&self, variables: &Variables) -> bool {
        let truthy = match variables.get(&self.variable) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => true,
        };
        truthy == self.passing_value
    }
}

/// Type refinement: selections that apply only to records of one concrete type.
#[derive(Clone, Debug, PartialEq)]
pub struct InlineFragment {
    /// Concrete typename the selections apply to.
    pub type_condition: String,
    /// Refined selections.
    pub selections: Vec<Selection>,
}

/// A named fragment included by reference.
///
/// The reader does not inline fragment data; it emits a fragment reference
/// that the owning view resolves with its own selector. The marker and the
/// normalizer descend into `selections`.
#[derive(Clone, Debug, PartialEq)]
pub struct FragmentSpread {
    /// Fragment name.
    pub name: String,
    /// The fragment's selections.
    pub selections: Vec<Selection>,
}

/// One node of a selection tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    /// Scalar-valued field.
    Scalar(ScalarField),
    /// Record-valued field.
    Linked(LinkedField),
    /// Conditional group.
    Condition(Condition),
    /// Type refinement.
    InlineFragment(InlineFragment),
    /// Fragment reference.
    FragmentSpread(FragmentSpread),
}

/// A compiled query or fragment: the selection tree rooted at one type.
#[derive(Debug)]
pub struct SelectorNode {
    name: String,
    type_name: String,
    selections: Vec<Selection>,
    normalization: Option<Vec<Selection>>,
    fingerprint: Hash,
}

impl SelectorNode {
    /// Builds a node whose selections serve both reading and normalization.
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        selections: Vec<Selection>,
    ) -> Self {
        let mut node = Self {
            name: name.into(),
            type_name: type_name.into(),
            selections,
            normalization: None,
            fingerprint: [0; 32],
        };
        node.fingerprint = node.compute_fingerprint();
        node
    }

    /// Builds a query node rooted at the synthetic root type.
    pub fn query(name: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self::new(name, ROOT_TYPE, selections)
    }

    /// Replaces the normalization selections (e.g. with extra discriminator fields).
    #[must_use]
    pub fn with_normalization(mut self, selections: Vec<Selection>) -> Self {
        self.normalization = Some(selections);
        self.fingerprint = self.compute_fingerprint();
        self
    }

    /// Query or fragment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Typename of the record the node is rooted at.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Selections used by the reader and the reference marker.
    #[must_use]
    pub fn selections(&self) -> &[Selection] {
        &self.selections
    }

    /// Selections used by the normalizer.
    #[must_use]
    pub fn normalization_selections(&self) -> &[Selection] {
        self.normalization.as_deref().unwrap_or(&self.selections)
    }

    /// Canonical digest of the node's structure.
    #[must_use]
    pub fn fingerprint(&self) -> &Hash {
        &self.fingerprint
    }

    fn compute_fingerprint(&self) -> Hash {
        let mut hasher = Hasher::new();
        hasher.update(b"selector-node:");
        hash_str(&mut hasher, &self.name);
        hash_str(&mut hasher, &self.type_name);
        hash_selections(&mut hasher, &self.selections);
        match &self.normalization {
            None => {
                hasher.update(&[0]);
            }
            Some(selections) => {
                hasher.update(&[1]);
                hash_selections(&mut hasher, selections);
            }
        }
        hasher.finalize().into()
    }
}

fn hash_str(hasher: &mut Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_opt_str(hasher: &mut Hasher, s: Option<&str>) {
    match s {
        None => {
            hasher.update(&[0]);
        }
        Some(s) => {
            hasher.update(&[1]);
            hash_str(hasher, s);
        }
    }
}

fn hash_args(hasher: &mut Hasher, args: &[Argument]) {
    hasher.update(&(args.len() as u64).to_le_bytes());
    for arg in args {
        hash_str(hasher, &arg.name);
        match &arg.value {
            ArgumentValue::Literal(value) => {
                hasher.update(b"L");
                hash_str(hasher, &canonical_json(value));
            }
            ArgumentValue::Variable(name) => {
                hasher.update(b"V");
                hash_str(hasher, name);
            }
        }
    }
}

fn hash_selections(hasher: &mut Hasher, selections: &[Selection]) {
    hasher.update(&(selections.len() as u64).to_le_bytes());
    for selection in selections {
        match selection {
            Selection::Scalar(field) => {
                hasher.update(b"S");
                hash_str(hasher, &field.name);
                hash_opt_str(hasher, field.alias.as_deref());
                hash_args(hasher, &field.args);
                hasher.update(&[u8::from(field.non_null)]);
            }
            Selection::Linked(field) => {
                hasher.update(b"K");
                hash_str(hasher, &field.name);
                hash_opt_str(hasher, field.alias.as_deref());
                hash_args(hasher, &field.args);
                hasher.update(&[u8::from(field.plural), u8::from(field.non_null)]);
                hash_opt_str(hasher, field.concrete_type.as_deref());
                hash_selections(hasher, &field.selections);
            }
            Selection::Condition(condition) => {
                hasher.update(b"C");
                hash_str(hasher, &condition.variable);
                hasher.update(&[u8::from(condition.passing_value)]);
                hash_selections(hasher, &condition.selections);
            }
            Selection::InlineFragment(fragment) => {
                hasher.update(b"I");
                hash_str(hasher, &fragment.type_condition);
                hash_selections(hasher, &fragment.selections);
            }
            Selection::FragmentSpread(spread) => {
                hasher.update(b"F");
                hash_str(hasher, &spread.name);
                hash_selections(hasher, &spread.selections);
            }
        }
    }
}

/// A root record id, a selection tree and the variables substituted into it.
///
/// Selectors are pure data. Cloning is cheap: the tree is shared.
#[derive(Clone, Debug)]
pub struct Selector {
    data_id: DataId,
    node: Arc<SelectorNode>,
    variables: Variables,
    id: SelectorId,
}

impl Selector {
    /// Builds a selector reading `node` from record `data_id`.
    pub fn new(data_id: DataId, node: Arc<SelectorNode>, variables: Variables) -> Self {
        let vars_json = canonical_json(&Value::Object(
            variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ));
        let id = make_selector_id(&data_id, node.fingerprint(), &vars_json);
        Self {
            data_id,
            node,
            variables,
            id,
        }
    }

    /// Builds a selector for a query node, rooted at the synthetic root record.
    pub fn query(node: Arc<SelectorNode>, variables: Variables) -> Self {
        Self::new(DataId::root(), node, variables)
    }

    /// Root record id.
    #[must_use]
    pub fn data_id(&self) -> &DataId {
        &self.data_id
    }

    /// Selection tree.
    #[must_use]
    pub fn node(&self) -> &Arc<SelectorNode> {
        &self.node
    }

    /// Variable bindings.
    #[must_use]
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    /// Identity used for deduplication.
    #[must_use]
    pub fn id(&self) -> SelectorId {
        self.id
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Selector {}

impl StdHash for Selector {
    fn hash<H: StdHasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
