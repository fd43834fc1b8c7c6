// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Canned queries and fragments.

use std::sync::Arc;

use serde_json::Value;
use weft_core::{DataId, LinkedField, Selection, Selector, SelectorNode, Variables};

use crate::selections::{arg, linked, plural, scalar, var_arg};

/// Name of [`me_query`].
pub const ME_QUERY: &str = "MeQuery";
/// Name of [`friends_query`].
pub const FRIENDS_QUERY: &str = "FriendsQuery";

/// `query MeQuery { me { id name } }`
pub fn me_query() -> Selector {
    Selector::query(
        Arc::new(SelectorNode::query(
            ME_QUERY,
            vec![linked("me", vec![scalar("id"), scalar("name")])],
        )),
        Variables::new(),
    )
}

/// `query FriendsQuery($count) { me { id name friends(first: $count) { id name } } }`
pub fn friends_query(count: u64) -> Selector {
    let mut variables = Variables::new();
    variables.insert("count".to_owned(), Value::from(count));
    Selector::query(
        Arc::new(SelectorNode::query(
            FRIENDS_QUERY,
            vec![linked(
                "me",
                vec![
                    scalar("id"),
                    scalar("name"),
                    plural(
                        "friends",
                        vec![var_arg("first", "count")],
                        vec![scalar("id"), scalar("name")],
                    ),
                ],
            )],
        )),
        variables,
    )
}

/// `query NodeQuery { node(id: <id>) { id name } }`
pub fn node_query(id: &str) -> Selector {
    Selector::query(
        Arc::new(SelectorNode::query(
            "NodeQuery",
            vec![Selection::Linked(LinkedField {
                args: vec![arg("id", Value::from(id))],
                ..LinkedField::new("node", vec![scalar("id"), scalar("name")])
            })],
        )),
        Variables::new(),
    )
}

/// Fragment on `type_name` rooted at `id`.
pub fn fragment_on(id: &str, type_name: &str, selections: Vec<Selection>) -> Selector {
    Selector::new(
        DataId::from(id),
        Arc::new(SelectorNode::new(
            format!("{type_name}Fragment"),
            type_name,
            selections,
        )),
        Variables::new(),
    )
}

/// `fragment UserFragment on User { id name }` rooted at `id`.
pub fn user_fragment(id: &str) -> Selector {
    fragment_on(id, "User", vec![scalar("id"), scalar("name")])
}
