// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use std::sync::Arc;

use serde_json::json;
use weft_core::{
    DataId, Environment, ReadSource, Selector, SelectorNode, Variables, ROOT_ID,
};
use weft_dry_tests::{
    fragment_on, friends_query, include_if, inline, linked, me_query, node_query,
    non_null_scalar, plural, scalar, spread, user_fragment, RecordingCallback,
};

fn query(name: &str, selections: Vec<weft_core::Selection>, variables: Variables) -> Selector {
    Selector::query(Arc::new(SelectorNode::query(name, selections)), variables)
}

#[test]
fn rename_notifies_once_and_identical_commit_is_silent() {
    let mut env = Environment::default();
    let q = me_query();
    env.commit_payload(&q, &json!({"me": {"id": "1", "name": "Alice"}}))
        .unwrap();
    let snapshot = env.lookup(&q);
    assert_eq!(
        snapshot.data.to_json(),
        json!({"me": {"id": "1", "name": "Alice"}})
    );
    assert!(!snapshot.is_missing_data);

    let recorder = RecordingCallback::new();
    env.subscribe(&q, recorder.callback());

    let outcome = env
        .commit_payload(&q, &json!({"me": {"id": "1", "name": "Alicia"}}))
        .unwrap();
    assert_eq!(outcome.report.unwrap().notified.len(), 1);
    assert_eq!(recorder.count(), 1);
    assert_eq!(
        recorder.last().unwrap().data.to_json(),
        json!({"me": {"id": "1", "name": "Alicia"}})
    );

    let outcome = env
        .commit_payload(&q, &json!({"me": {"id": "1", "name": "Alicia"}}))
        .unwrap();
    let report = outcome.report.unwrap();
    assert!(report.changed.is_empty());
    assert!(report.notified.is_empty());
    assert_eq!(recorder.count(), 1);
}

#[test]
fn repeated_lookup_is_reference_equal() {
    let mut env = Environment::default();
    let q = friends_query(2);
    env.commit_payload(
        &q,
        &json!({"me": {"id": "1", "name": "Alice", "friends": [
            {"id": "2", "name": "Bob"},
            {"id": "3", "name": "Carol"}
        ]}}),
    )
    .unwrap();
    let first = env.lookup(&q);
    let second = env.lookup(&q);
    assert!(first.data.same(&second.data));
}

#[test]
fn unrelated_change_does_not_notify() {
    let mut env = Environment::default();
    env.commit_payload(
        &friends_query(2),
        &json!({"me": {"id": "1", "name": "Alice", "friends": [
            {"id": "2", "name": "Bob"},
            {"id": "3", "name": "Carol"}
        ]}}),
    )
    .unwrap();
    let bob = RecordingCallback::new();
    let carol = RecordingCallback::new();
    env.subscribe(&user_fragment("2"), bob.callback());
    env.subscribe(&user_fragment("3"), carol.callback());

    let report = env
        .commit_update(Box::new(|m| {
            m.set_value(&DataId::from("3"), "name", json!("Caroline"))
        }))
        .unwrap();
    assert_eq!(report.changed.len(), 1);
    assert_eq!(report.notified.len(), 1);
    assert_eq!(bob.count(), 0);
    assert_eq!(carol.count(), 1);
}

#[test]
fn unchanged_sibling_keeps_identity_across_updates() {
    let mut env = Environment::default();
    let q = friends_query(2);
    env.commit_payload(
        &q,
        &json!({"me": {"id": "1", "name": "Alice", "friends": [
            {"id": "2", "name": "Bob"},
            {"id": "3", "name": "Carol"}
        ]}}),
    )
    .unwrap();
    let before = env.lookup(&q);
    env.commit_update(Box::new(|m| {
        m.set_value(&DataId::from("3"), "name", json!("Caroline"))
    }))
    .unwrap();
    let after = env.lookup(&q);

    let friends = |s: &weft_core::Snapshot| {
        s.data.get("me").and_then(|me| me.get("friends")).cloned().unwrap()
    };
    let (old, new) = (friends(&before), friends(&after));
    assert!(!old.same(&new));
    assert!(old.as_list().unwrap()[0].same(&new.as_list().unwrap()[0]));
    assert!(!old.as_list().unwrap()[1].same(&new.as_list().unwrap()[1]));
}

#[test]
fn deleted_reads_null_and_absent_reads_missing() {
    let mut env = Environment::default();
    let q = me_query();
    env.commit_payload(&q, &json!({"me": {"id": "1", "name": "Alice"}}))
        .unwrap();
    env.commit_update(Box::new(|m| {
        m.delete(DataId::from("1"));
        Ok(())
    }))
    .unwrap();
    let deleted = env.lookup(&q);
    assert_eq!(deleted.data.to_json(), json!({"me": null}));
    assert!(!deleted.is_missing_data);

    let mut env = Environment::default();
    env.commit_update(Box::new(|m| {
        m.create(DataId::root(), weft_core::ROOT_TYPE)?;
        m.set_link(&DataId::root(), "me", DataId::from("42"))
    }))
    .unwrap();
    let absent = env.lookup(&q);
    assert!(absent.is_missing_data);
    assert!(!env.check(&q));
}

#[test]
fn non_null_violation_is_reported_and_bubbles() {
    let mut env = Environment::default();
    let q = query(
        "StrictMe",
        vec![linked("me", vec![scalar("id"), non_null_scalar("name")])],
        Variables::new(),
    );
    let outcome = env
        .commit_payload(&q, &json!({"me": {"id": "1", "name": null}}))
        .unwrap();
    assert_eq!(outcome.field_errors.len(), 1);
    assert_eq!(outcome.field_errors[0].record, DataId::from("1"));
    let snapshot = env.lookup(&q);
    assert_eq!(snapshot.data.to_json(), json!({"me": null}));
    assert!(!snapshot.is_missing_data);
}

#[test]
fn fragment_spread_reads_as_reference() {
    let mut env = Environment::default();
    let q = query(
        "SpreadQuery",
        vec![linked(
            "me",
            vec![spread("UserFragment", vec![scalar("id"), scalar("name")])],
        )],
        Variables::new(),
    );
    env.commit_payload(&q, &json!({"me": {"id": "1", "name": "Alice"}}))
        .unwrap();
    assert_eq!(
        env.lookup(&q).data.to_json(),
        json!({"me": {"__id": "1", "__fragments": {"UserFragment": {}}}})
    );
    assert_eq!(
        env.lookup(&user_fragment("1")).data.to_json(),
        json!({"id": "1", "name": "Alice"})
    );
}

#[test]
fn conditions_follow_variables() {
    let mut env = Environment::default();
    let selections = || {
        vec![linked(
            "me",
            vec![scalar("id"), include_if("withName", vec![scalar("name")])],
        )]
    };
    let without = query(
        "Conditional",
        selections(),
        Variables::from([("withName".to_owned(), json!(false))]),
    );
    let with = query(
        "Conditional",
        selections(),
        Variables::from([("withName".to_owned(), json!(true))]),
    );
    assert_ne!(without, with);

    env.commit_payload(&without, &json!({"me": {"id": "1", "name": "ignored"}}))
        .unwrap();
    assert_eq!(env.lookup(&without).data.to_json(), json!({"me": {"id": "1"}}));
    assert!(env.lookup(&with).is_missing_data);
}

#[test]
fn arguments_are_part_of_the_storage_key() {
    let mut env = Environment::default();
    env.commit_payload(&node_query("7"), &json!({"node": {"id": "7", "name": "Seven"}}))
        .unwrap();
    let root = env.source().record(&DataId::from(ROOT_ID)).unwrap();
    assert_eq!(root.get_link(r#"node(id:"7")"#), Some(&DataId::from("7")));
    assert!(env.lookup(&node_query("8")).is_missing_data);
}

#[test]
fn objects_without_identity_get_client_ids() {
    let mut env = Environment::default();
    env.commit_payload(&me_query(), &json!({"me": {"name": "Anon"}}))
        .unwrap();
    let id = DataId::from("client:root:me");
    assert!(id.is_client_id());
    assert_eq!(
        env.source().record(&id).unwrap().get_value("name"),
        Some(&json!("Anon"))
    );
}

#[test]
fn identity_conflicts_are_reported_not_fatal() {
    let mut env = Environment::default();
    let q = query(
        "Typed",
        vec![linked(
            "me",
            vec![scalar("id"), scalar("__typename"), linked("best", vec![scalar("id"), scalar("__typename")])],
        )],
        Variables::new(),
    );
    let outcome = env
        .commit_payload(
            &q,
            &json!({"me": {"id": "1", "__typename": "User", "best": {"id": "1", "__typename": "Admin"}}}),
        )
        .unwrap();
    assert_eq!(outcome.inconsistencies.len(), 1);
    assert_eq!(
        env.source().record(&DataId::from("1")).unwrap().typename(),
        Some("Admin")
    );
}

#[test]
fn interface_fragment_keeps_the_concrete_typename() {
    let mut env = Environment::default();
    let typed_me = query(
        "TypedMe",
        vec![linked("me", vec![scalar("id"), scalar("__typename"), scalar("name")])],
        Variables::new(),
    );
    env.commit_payload(&typed_me, &json!({"me": {"id": "1", "__typename": "User", "name": "Alice"}}))
        .unwrap();

    env.commit_payload(&fragment_on("1", "Node", vec![scalar("name")]), &json!({"name": "Alicia"}))
        .unwrap();
    assert_eq!(
        env.source().record(&DataId::from("1")).unwrap().typename(),
        Some("User")
    );

    let refined = fragment_on("1", "Node", vec![inline("User", vec![scalar("name")])]);
    let snapshot = env.lookup(&refined);
    assert!(!snapshot.is_missing_data);
    assert_eq!(snapshot.data.to_json(), json!({"name": "Alicia"}));
}

#[test]
fn union_members_read_back_through_their_refinements() {
    let mut env = Environment::default();
    let search = query(
        "Search",
        vec![plural(
            "search",
            vec![],
            vec![
                scalar("__typename"),
                scalar("id"),
                inline("User", vec![scalar("name")]),
                inline("Page", vec![scalar("title")]),
            ],
        )],
        Variables::new(),
    );
    let payload = json!({"search": [
        {"__typename": "User", "id": "u1", "name": "Ann"},
        {"__typename": "Page", "id": "p1", "title": "Home"}
    ]});
    env.commit_payload(&search, &payload).unwrap();

    let snapshot = env.lookup(&search);
    assert!(!snapshot.is_missing_data);
    assert_eq!(snapshot.data.to_json(), payload);
    assert!(env.source().record(&DataId::from("u1")).unwrap().get("title").is_none());
}

#[test]
fn refinement_on_an_untyped_record_reads_as_missing() {
    let mut env = Environment::default();
    env.commit_payload(&me_query(), &json!({"me": {"id": "1", "name": "Alice"}}))
        .unwrap();
    let refined = fragment_on("1", "Node", vec![inline("User", vec![scalar("name")])]);
    assert!(env.lookup(&refined).is_missing_data);
}
