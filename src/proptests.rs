use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::{BTreeMap, BTreeSet};

/// Multiset model: key -> outstanding references.
type Model = BTreeMap<Vec<u8>, u32>;

fn validate_tree(t: &RadixTree, m: &Model) {
    if let Err(err) = t.validate() {
        panic!("malformed tree: {err}");
    }
    assert_eq!(t.size(), m.len(), "size must count distinct live keys");

    let mut seen = BTreeSet::new();
    t.apply(|key| {
        assert!(seen.insert(key.to_vec()), "apply visited {key:?} twice");
    });
    let expected: BTreeSet<Vec<u8>> = m.keys().cloned().collect();
    assert_eq!(seen, expected, "apply must visit exactly the live keys");

    for (key, &count) in m {
        assert_eq!(t.refcount(key), count, "refcount of {key:?}");
    }
}

fn model_matches(m: &Model, topic: &[u8]) -> bool {
    m.keys().any(|key| topic.starts_with(key))
}

fn symbol() -> impl Strategy<Value = u8> + Clone {
    prop::sample::select(vec![0x00u8, b'a', b'b', b'c', 0xff])
}

/// Few symbols and mostly short keys, so that prefixes collide constantly.
/// The extreme byte values are included on purpose. Long keys repeat one
/// symbol before a short tail, so they share long prefixes with each other
/// and their records run to several hundred bytes.
fn key_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    let short = prop::collection::vec(symbol(), 0..=8);
    let long = (symbol(), 250usize..=320, prop::collection::vec(symbol(), 0..=4)).prop_map(
        |(fill, len, tail)| {
            let mut key = vec![fill; len];
            key.extend(tail);
            key
        },
    );
    prop_oneof![
        9 => short,
        1 => long,
    ]
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 40)]
    Add(#[proptest(strategy = "key_strategy()")] Vec<u8>),
    #[proptest(weight = 35)]
    Remove(#[proptest(strategy = "key_strategy()")] Vec<u8>),
    #[proptest(weight = 12)]
    Check(#[proptest(strategy = "key_strategy()")] Vec<u8>),
    #[proptest(weight = 12)]
    Matches(#[proptest(strategy = "key_strategy()")] Vec<u8>),
    #[proptest(weight = 1)]
    Compact,
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(any::<Op>(), 0..=1000)
}

fn apply_op(t: &mut RadixTree, m: &mut Model, op: Op) {
    match op {
        Op::Add(key) => {
            let count = m.entry(key.clone()).or_insert(0);
            *count += 1;
            assert_eq!(t.add(&key), *count == 1, "add({key:?})");
        }
        Op::Remove(key) => {
            let expected = match m.get_mut(&key) {
                Some(count) => {
                    *count -= 1;
                    if *count == 0 {
                        m.remove(&key);
                    }
                    true
                }
                None => false,
            };
            assert_eq!(t.remove(&key), expected, "remove({key:?})");
        }
        Op::Check(key) => {
            assert_eq!(t.check(&key), m.contains_key(&key), "check({key:?})");
        }
        Op::Matches(topic) => {
            assert_eq!(t.matches(&topic), model_matches(m, &topic), "matches({topic:?})");
        }
        Op::Compact => {
            t.compact();
            assert_eq!(t.stats().released_bytes, 0);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_with_multiset(ops in ops_strategy()) {
        let mut t = RadixTree::new();
        let mut m = Model::new();

        for op in ops {
            apply_op(&mut t, &mut m, op);
            prop_assert_eq!(t.size(), m.len());
        }
        validate_tree(&t, &m);
    }

    #[test]
    fn prop_invariants_hold_after_every_op(ops in prop::collection::vec(any::<Op>(), 0..=200)) {
        let mut t = RadixTree::new();
        let mut m = Model::new();

        for op in ops {
            apply_op(&mut t, &mut m, op);
            validate_tree(&t, &m);
        }
    }

    #[test]
    fn prop_auto_compact_is_transparent(ops in ops_strategy()) {
        let config = Config {
            auto_compact: true,
            compaction_threshold: 128,
            ..Config::default()
        };
        let mut t = RadixTree::with_config(config);
        let mut m = Model::new();

        for op in ops {
            apply_op(&mut t, &mut m, op);
            prop_assert!(t.stats().released_bytes < 128);
        }
        validate_tree(&t, &m);
    }

    #[test]
    fn prop_churn_keeps_arena_flat(key in key_strategy(), rounds in 1usize..50) {
        let config = Config {
            auto_compact: false,
            ..Config::default()
        };
        let mut t = RadixTree::with_config(config);
        t.add(b"\x01anchor");
        t.add(&key);
        t.remove(&key);
        let settled = t.stats().arena_bytes;

        for _ in 0..rounds {
            prop_assert!(t.add(&key));
            prop_assert!(t.remove(&key));
        }
        prop_assert_eq!(t.stats().arena_bytes, settled);
    }

    #[test]
    fn prop_add_then_remove_restores(
        base in prop::collection::vec(key_strategy(), 0..=50),
        extra in key_strategy(),
    ) {
        let mut t: RadixTree = base.iter().collect();
        let mut m = Model::new();
        for key in &base {
            *m.entry(key.clone()).or_insert(0) += 1;
        }
        let before = t.refcount(&extra);

        t.add(&extra);
        prop_assert!(t.check(&extra));
        prop_assert!(t.remove(&extra));
        prop_assert_eq!(t.refcount(&extra), before);
        validate_tree(&t, &m);
    }

    #[test]
    fn prop_clone_and_compact_preserve_keys(keys in prop::collection::vec(key_strategy(), 0..=100)) {
        let mut t: RadixTree = keys.iter().collect();
        for key in keys.iter().step_by(3) {
            t.remove(key);
        }
        let before: BTreeSet<Vec<u8>> = t.iter().collect();

        let mut copy = t.clone();
        copy.compact();
        let after: BTreeSet<Vec<u8>> = copy.iter().collect();
        prop_assert_eq!(&before, &after);
        for key in &before {
            prop_assert_eq!(t.refcount(key), copy.refcount(key));
        }
        prop_assert!(copy.validate().is_ok());
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

fn small_set() -> Vec<Vec<u8>> {
    vec![
        b"".to_vec(),
        b"a".to_vec(),
        b"ab".to_vec(),
        b"abc".to_vec(),
        b"abd".to_vec(),
        b"b".to_vec(),
        b"ba".to_vec(),
    ]
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys = small_set();

    for_each_permutation(&keys, |perm| {
        let mut t = RadixTree::new();
        let mut m = Model::new();

        for k in perm {
            assert!(t.add(&k));
            m.insert(k, 1);
        }

        validate_tree(&t, &m);
        // The shape is canonical whatever the insertion order.
        assert_eq!(t.stats().nodes, 7);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys = small_set();

    // Insert in a fixed order, then remove in all permutations.
    let mut base_tree = RadixTree::new();
    let mut base_model = Model::new();
    for k in &keys {
        assert!(base_tree.add(k));
        base_model.insert(k.clone(), 1);
    }

    for_each_permutation(&keys, |perm| {
        let mut t = base_tree.clone();
        let mut m = base_model.clone();

        for k in perm {
            assert!(t.remove(&k));
            m.remove(&k);
            validate_tree(&t, &m);
        }
        assert!(t.is_empty());
        assert_eq!(t.stats().nodes, 1);
    });
}

#[test]
fn exhaustive_remove_order_with_repeats() {
    let keys: Vec<Vec<u8>> = vec![b"x".to_vec(), b"xy".to_vec(), b"xy".to_vec(), b"xz".to_vec(), b"y".to_vec()];

    let mut base_tree = RadixTree::new();
    let mut base_model = Model::new();
    for k in &keys {
        base_tree.add(k);
        *base_model.entry(k.clone()).or_insert(0) += 1;
    }

    for_each_permutation(&keys, |perm| {
        let mut t = base_tree.clone();
        let mut m = base_model.clone();

        for k in perm {
            assert!(t.remove(&k));
            let count = m.get_mut(&k).unwrap();
            *count -= 1;
            if *count == 0 {
                m.remove(&k);
            }
            validate_tree(&t, &m);
        }
        assert!(t.is_empty());
    });
}
