// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use serde_json::{json, Value};
use weft_core::{DataId, Disposable, Environment, StoreConfig, ROOT_ID};
use weft_dry_tests::{friends_query, me_query, user_fragment};

fn with_alice() -> Environment {
    let mut env = Environment::default();
    env.commit_payload(&me_query(), &json!({"me": {"id": "1", "name": "Alice"}}))
        .unwrap();
    env
}

fn friends_payload(ids: &[&str]) -> Value {
    let friends: Vec<Value> = ids
        .iter()
        .map(|id| json!({"id": id, "name": format!("friend {id}")}))
        .collect();
    json!({"me": {"id": "1", "name": "Alice", "friends": friends}})
}

#[test]
fn two_handles_on_one_root_then_collect() {
    let mut env = with_alice();
    let one = DataId::from("1");
    let fragment = user_fragment("1");

    let h1 = env.retain(&fragment);
    assert_eq!(env.retain_count(&one), 1);
    let h2 = env.retain(&fragment);
    assert_eq!(env.retain_count(&one), 2);

    assert!(env.dispose(h1).unwrap());
    assert_eq!(env.retain_count(&one), 1);
    env.schedule_collection(10);
    env.flush().unwrap();
    assert!(env.source().has(&one));

    assert!(env.dispose(h2).unwrap());
    assert!(!env.dispose(h2).unwrap());
    assert_eq!(env.retain_count(&one), 0);
    env.schedule_collection(10);
    env.flush().unwrap();
    assert!(!env.source().has(&one));
    assert!(env.lookup(&fragment).is_missing_data);
}

#[test]
fn retained_query_keeps_its_whole_tree() {
    let mut env = Environment::default();
    let q = friends_query(2);
    env.commit_payload(&q, &friends_payload(&["2", "3"])).unwrap();
    let handle = env.retain(&q);
    for id in [ROOT_ID, "1", "2", "3"] {
        assert_eq!(env.retain_count(&DataId::from(id)), 1, "{id}");
    }
    assert_eq!(env.schedule_collection(10), 0);

    env.dispose(handle).unwrap();
    env.flush().unwrap();
    assert!(env.source().is_empty());
}

#[test]
fn collection_runs_in_bounded_batches() {
    let mut env = Environment::default();
    env.commit_payload(&friends_query(5), &friends_payload(&["f1", "f2", "f3", "f4", "f5"]))
        .unwrap();
    assert_eq!(env.source().len(), 7);

    assert_eq!(env.schedule_collection(2), 7);
    assert!(env.tick().unwrap());
    assert_eq!(env.source().len(), 5);
    assert_eq!(env.pending_tasks(), 1);

    // Retained between batches: the pending batch must skip it.
    let _keep = env.retain(&user_fragment("f5"));
    env.flush().unwrap();
    let left: Vec<&DataId> = env.source().ids().collect();
    assert_eq!(left, vec![&DataId::from("f5")]);
}

#[test]
fn holds_pause_batches_until_released() {
    let mut env = with_alice();
    let hold = env.hold_gc();
    env.schedule_collection(10);
    env.flush().unwrap();
    assert_eq!(env.source().len(), 2);

    assert!(env.dispose(hold).unwrap());
    assert!(!env.dispose(hold).unwrap());
    assert_eq!(env.pending_tasks(), 1);
    env.flush().unwrap();
    assert!(env.source().is_empty());
}

#[test]
fn release_buffer_keeps_recent_roots() {
    let config = StoreConfig {
        gc_release_buffer_size: 1,
        ..StoreConfig::default()
    };
    let mut env = Environment::new(config);
    env.commit_payload(&me_query(), &json!({"me": {"id": "1", "name": "Alice"}}))
        .unwrap();
    let one = DataId::from("1");

    let handle = env.retain(&user_fragment("1"));
    env.dispose(handle).unwrap();
    env.schedule_collection(10);
    env.flush().unwrap();
    assert!(env.source().has(&one));

    let other = env.retain(&user_fragment("elsewhere"));
    env.dispose(other).unwrap();
    assert_eq!(env.retain_count(&one), 0);
    env.schedule_collection(10);
    env.flush().unwrap();
    assert!(!env.source().has(&one));
}

#[test]
fn records_arriving_after_retain_are_counted() {
    let mut env = Environment::default();
    let q = me_query();
    let _handle = env.retain(&q);
    assert!(env.lookup(&q).is_missing_data);

    env.commit_payload(&q, &json!({"me": {"id": "1", "name": "Alice"}}))
        .unwrap();
    assert_eq!(env.retain_count(&DataId::from("1")), 1);
    env.schedule_collection(10);
    env.flush().unwrap();
    assert!(!env.lookup(&q).is_missing_data);
}

#[test]
fn relinking_moves_the_count() {
    let mut env = with_alice();
    let q = me_query();
    let _handle = env.retain(&q);
    env.commit_payload(&q, &json!({"me": {"id": "2", "name": "Bob"}}))
        .unwrap();
    assert_eq!(env.retain_count(&DataId::from("1")), 0);
    assert_eq!(env.retain_count(&DataId::from("2")), 1);
    env.schedule_collection(10);
    env.flush().unwrap();
    assert!(!env.source().has(&DataId::from("1")));
    assert!(env.source().has(&DataId::from("2")));
}

#[test]
fn disabled_collection_never_schedules() {
    let config = StoreConfig {
        gc_enabled: false,
        ..StoreConfig::default()
    };
    let mut env = Environment::new(config);
    env.commit_payload(&me_query(), &json!({"me": {"id": "1", "name": "Alice"}}))
        .unwrap();
    let handle = env.retain(&me_query());
    assert_eq!(env.retain_count(&DataId::from("1")), 1);
    assert!(matches!(handle, Disposable::Retain(_)));
    env.dispose(handle).unwrap();
    assert_eq!(env.schedule_collection(10), 0);
    assert_eq!(env.flush().unwrap(), 0);
    assert_eq!(env.source().len(), 2);
}
