// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use proptest::prelude::*;
use serde_json::{json, Value};
use weft_core::{DataId, Environment, Selector};
use weft_dry_tests::{friends_query, me_query, user_fragment};

fn friends_payload(names: &[String]) -> Value {
    let friends: Vec<Value> = names
        .iter()
        .enumerate()
        .map(|(i, name)| json!({"id": format!("f{i}"), "name": name}))
        .collect();
    json!({"me": {"id": "1", "name": "Alice", "friends": friends}})
}

fn pick(choice: u8, friends: usize) -> Selector {
    match choice % 3 {
        0 => me_query(),
        1 => user_fragment("1"),
        _ => friends_query(friends as u64),
    }
}

proptest! {
    #[test]
    fn committed_payload_reads_back(names in prop::collection::vec("[a-z]{1,8}", 0..6)) {
        let mut env = Environment::default();
        let q = friends_query(names.len() as u64);
        let payload = friends_payload(&names);
        env.commit_payload(&q, &payload).unwrap();

        let snapshot = env.lookup(&q);
        prop_assert!(!snapshot.is_missing_data);
        prop_assert_eq!(snapshot.data.to_json(), payload);
        prop_assert_eq!(snapshot.seen_records.len(), names.len() + 2);
    }

    #[test]
    fn retains_and_releases_balance(
        choices in prop::collection::vec(any::<u8>(), 1..8),
        friends in 0usize..4,
    ) {
        let mut env = Environment::default();
        let names: Vec<String> = (0..friends).map(|i| format!("n{i}")).collect();
        env.commit_payload(&friends_query(friends as u64), &friends_payload(&names)).unwrap();

        let handles: Vec<_> = choices.iter().map(|c| env.retain(&pick(*c, friends))).collect();
        let one = DataId::from("1");
        prop_assert_eq!(env.retain_count(&one), handles.len());

        for handle in handles.into_iter().rev() {
            prop_assert!(env.dispose(handle).unwrap());
        }
        for id in env.source().ids() {
            prop_assert_eq!(env.retain_count(id), 0);
        }
    }

    #[test]
    fn collection_spares_retained_records(
        keep in prop::collection::vec(any::<bool>(), 1..6),
        step_budget in 1usize..4,
    ) {
        let mut env = Environment::default();
        let names: Vec<String> = (0..keep.len()).map(|i| format!("n{i}")).collect();
        env.commit_payload(&friends_query(keep.len() as u64), &friends_payload(&names)).unwrap();

        let _handles: Vec<_> = keep
            .iter()
            .enumerate()
            .filter(|(_, kept)| **kept)
            .map(|(i, _)| env.retain(&user_fragment(&format!("f{i}"))))
            .collect();
        env.schedule_collection(step_budget);
        env.flush().unwrap();

        for (i, kept) in keep.iter().enumerate() {
            prop_assert_eq!(env.source().has(&DataId::from(format!("f{i}"))), *kept);
        }
        prop_assert!(!env.source().has(&DataId::from("1")));
    }
}
