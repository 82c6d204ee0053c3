//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check keys, pattern expansion, storage and statistics
//! against arbitrary inputs.

use proptest::prelude::*;
use serde_json::{json, Value};
use tokio_test::block_on;

use crate::backends::{CacheBackend, MemoryBackend};
use crate::cache::{
    build_key, pattern, CacheManager, CallArgs, InvalidationEngine, KeyParams, MAX_PARAMS_LENGTH,
};
use crate::config::CacheConfig;

// == Strategies ==
fn param_name_strategy() -> impl Strategy<Value = String> {
    "[a-z_]{1,12}"
}

fn param_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9._]{0,40}".prop_map(Value::from),
    ]
}

/// Values biased towards the characters that structure a key.
fn tricky_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-20i64..20).prop_map(Value::from),
        "[a-z0-9:=,*%\\[\\]{}\" .-]{0,10}".prop_map(Value::from),
        prop::collection::vec("[a-z0-9:=,\\[\\]]{0,4}", 0..3).prop_map(Value::from),
    ]
}

fn key_strategy() -> impl Strategy<Value = String> {
    "(entities|devices|services):(state|list|registry):[a-z0-9=.]{1,16}"
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: i64 },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (key_strategy(), any::<i64>()).prop_map(|(key, value)| CacheOp::Set { key, value }),
        key_strategy().prop_map(|key| CacheOp::Get { key }),
        key_strategy().prop_map(|key| CacheOp::Delete { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Keys depend only on the set of arguments, never on insertion order.
    #[test]
    fn prop_key_is_order_independent(
        params in prop::collection::btree_map(param_name_strategy(), param_value_strategy(), 0..8)
    ) {
        let forward = params
            .iter()
            .fold(CallArgs::new(), |args, (k, v)| args.with(k.clone(), v.clone()));
        let backward = params
            .iter()
            .rev()
            .fold(CallArgs::new(), |args, (k, v)| args.with(k.clone(), v.clone()));

        let all = KeyParams::all();
        prop_assert_eq!(
            build_key("entities", "state", &forward, &all),
            build_key("entities", "state", &backward, &all)
        );
    }

    // The params segment never exceeds the digest threshold.
    #[test]
    fn prop_key_params_are_bounded(
        params in prop::collection::btree_map(param_name_strategy(), param_value_strategy(), 0..16)
    ) {
        let args = params
            .into_iter()
            .fold(CallArgs::new(), |args, (k, v)| args.with(k, v));

        let key = build_key("entities", "search", &args, &KeyParams::all());
        let encoded = key.strip_prefix("entities:search:").unwrap();
        prop_assert!(encoded.len() <= MAX_PARAMS_LENGTH);
    }

    // Argument sets that differ once nulls are dropped never share a key.
    #[test]
    fn prop_distinct_args_get_distinct_keys(
        a in prop::collection::btree_map("[a-c]", tricky_value_strategy(), 0..4),
        b in prop::collection::btree_map("[a-c]", tricky_value_strategy(), 0..4)
    ) {
        let non_null = |m: &std::collections::BTreeMap<String, Value>| {
            m.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Vec<_>>()
        };
        prop_assume!(non_null(&a) != non_null(&b));

        let to_args = |m: &std::collections::BTreeMap<String, Value>| {
            m.iter().fold(CallArgs::new(), |args, (k, v)| args.with(k.clone(), v.clone()))
        };
        let all = KeyParams::all();
        prop_assert_ne!(
            build_key("entities", "search", &to_args(&a), &all),
            build_key("entities", "search", &to_args(&b), &all)
        );
    }

    // Set-valued arguments are insensitive to member order and duplicates.
    #[test]
    fn prop_set_args_are_canonical(mut members in prop::collection::vec("[a-z.]{1,10}", 0..10)) {
        let first = CallArgs::new().with_set("ids", members.clone());
        members.reverse();
        let repeated = members.clone();
        members.extend(repeated);
        let second = CallArgs::new().with_set("ids", members);

        let all = KeyParams::all();
        prop_assert_eq!(
            build_key("entities", "list", &first, &all),
            build_key("entities", "list", &second, &all)
        );
    }

    // Expansion keeps the inputs, adds no duplicates, and every generated
    // pattern is well formed.
    #[test]
    fn prop_expansion_is_superset(
        patterns in prop::collection::vec(
            prop_oneof![
                Just("entities:*".to_string()),
                Just("automations:*".to_string()),
                Just("devices:list:*".to_string()),
                key_strategy(),
            ],
            1..6
        )
    ) {
        let engine = InvalidationEngine::default();
        let expanded = engine.expand(&patterns);

        for p in &patterns {
            prop_assert!(expanded.contains(p));
        }
        let mut deduped = expanded.clone();
        deduped.dedup();
        prop_assert_eq!(deduped.len(), expanded.len());
        prop_assert!(expanded.iter().all(|p| pattern::is_valid(p)));
    }

    // Every matching key is removed and nothing else is touched.
    #[test]
    fn prop_invalidation_removes_exactly_matches(
        keys in prop::collection::btree_set(key_strategy(), 1..20),
        target in key_strategy().prop_map(|k| format!("{}*", &k[..k.len().min(12)]))
    ) {
        block_on(async {
            let backend = MemoryBackend::default();
            for key in &keys {
                backend.set(key, json!(1), 60).await.unwrap();
            }

            let engine = InvalidationEngine::empty();
            let report = engine.execute(&backend, &[target.as_str()]).await.unwrap();

            let expected = keys.iter().filter(|k| pattern::matches(&target, k)).count();
            assert_eq!(report.keys_removed, expected);
            assert_eq!(backend.size().await.unwrap(), keys.len() - expected);
        });
    }

    // Every read is counted exactly once as a hit or a miss, and the counts
    // agree with a model of the store.
    #[test]
    fn prop_statistics_consistency(ops in prop::collection::vec(cache_op_strategy(), 1..50)) {
        block_on(async {
            let manager = CacheManager::new(CacheConfig::default());
            let mut model = std::collections::HashMap::new();
            let mut expected_hits = 0u64;
            let mut expected_misses = 0u64;

            for op in ops {
                match op {
                    CacheOp::Set { key, value } => {
                        manager.set(&key, json!(value), 300).await;
                        model.insert(key, value);
                    }
                    CacheOp::Get { key } => {
                        let got = manager.get(&key).await;
                        match model.get(&key) {
                            Some(value) => {
                                expected_hits += 1;
                                assert_eq!(got, Some(json!(value)));
                            }
                            None => {
                                expected_misses += 1;
                                assert_eq!(got, None);
                            }
                        }
                    }
                    CacheOp::Delete { key } => {
                        manager.delete(&key).await;
                        model.remove(&key);
                    }
                }
            }

            let stats = manager.get_statistics().await;
            assert_eq!(stats.hits, expected_hits);
            assert_eq!(stats.misses, expected_misses);
            assert_eq!(stats.size, model.len());
        });
    }
}

// Fewer cases for capacity checks over larger inputs
proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    // The memory backend never holds more than its cap.
    #[test]
    fn prop_capacity_enforcement(keys in prop::collection::vec(key_strategy(), 1..200)) {
        block_on(async {
            let max_entries = 50;
            let backend = MemoryBackend::new(max_entries);

            for key in keys {
                backend.set(&key, json!(0), 300).await.unwrap();
                assert!(backend.size().await.unwrap() <= max_entries);
            }
        });
    }
}
