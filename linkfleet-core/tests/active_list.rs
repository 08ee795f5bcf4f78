/*
    active_list.rs - active list properties

    The list behaves as a set: marking in any order, with repeats, yields
    every identifier exactly once and survives a reload from disk.
*/

use linkfleet_core::{AccountId, SessionStore};
use proptest::prelude::*;
use std::collections::BTreeSet;
use tempfile::TempDir;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_mark_active_is_set_insertion(raw in prop::collection::vec("[0-9]{3,6}", 0..12)) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"), dir.path().join("active.json"));
        let ids: Vec<AccountId> = raw.iter().map(|r| AccountId::new(r).unwrap()).collect();

        let loaded = runtime().block_on(async {
            for id in &ids {
                store.mark_active(id).await.unwrap();
            }
            // Second pass changes nothing
            for id in &ids {
                assert!(!store.mark_active(id).await.unwrap());
            }
            SessionStore::new(dir.path().join("sessions"), dir.path().join("active.json"))
                .load_active()
                .await
                .unwrap()
        });

        let expected: BTreeSet<AccountId> = ids.iter().cloned().collect();
        let actual: BTreeSet<AccountId> = loaded.iter().cloned().collect();
        prop_assert_eq!(loaded.len(), expected.len());
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn prop_replace_then_load_preserves_order(raw in prop::collection::btree_set("[0-9]{3,6}", 0..12)) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"), dir.path().join("active.json"));
        let mut ids: Vec<AccountId> = raw.iter().map(|r| AccountId::new(r).unwrap()).collect();
        ids.reverse();

        let loaded = runtime().block_on(async {
            store.replace_active(&ids).await.unwrap();
            store.load_active().await.unwrap()
        });

        prop_assert_eq!(loaded, ids);
    }
}
