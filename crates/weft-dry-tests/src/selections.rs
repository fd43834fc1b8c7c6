// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Terse selection-tree builders.

use serde_json::Value;
use weft_core::{
    Argument, Condition, FragmentSpread, InlineFragment, LinkedField, ScalarField, Selection,
};

/// Nullable scalar field.
pub fn scalar(name: &str) -> Selection {
    Selection::Scalar(ScalarField::new(name))
}

/// Scalar field declared non-null.
pub fn non_null_scalar(name: &str) -> Selection {
    Selection::Scalar(ScalarField {
        non_null: true,
        ..ScalarField::new(name)
    })
}

/// Singular linked field.
pub fn linked(name: &str, selections: Vec<Selection>) -> Selection {
    Selection::Linked(LinkedField::new(name, selections))
}

/// Plural linked field with optional arguments.
pub fn plural(name: &str, args: Vec<Argument>, selections: Vec<Selection>) -> Selection {
    Selection::Linked(LinkedField {
        plural: true,
        args,
        ..LinkedField::new(name, selections)
    })
}

/// Literal argument.
pub fn arg(name: &str, value: Value) -> Argument {
    Argument::literal(name, value)
}

/// Variable-bound argument.
pub fn var_arg(name: &str, variable: &str) -> Argument {
    Argument::variable(name, variable)
}

/// `@include(if: $variable)` group.
pub fn include_if(variable: &str, selections: Vec<Selection>) -> Selection {
    Selection::Condition(Condition {
        variable: variable.to_owned(),
        passing_value: true,
        selections,
    })
}

/// `... on Type { .. }` refinement.
pub fn inline(type_condition: &str, selections: Vec<Selection>) -> Selection {
    Selection::InlineFragment(InlineFragment {
        type_condition: type_condition.to_owned(),
        selections,
    })
}

/// `...Fragment` spread.
pub fn spread(name: &str, selections: Vec<Selection>) -> Selection {
    Selection::FragmentSpread(FragmentSpread {
        name: name.to_owned(),
        selections,
    })
}
