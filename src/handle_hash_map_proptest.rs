#![cfg(test)]

// Property tests for HandleHashMap, kept inside the crate so they can reach
// the structural layer without widening its visibility.

use crate::handle_hash_map::{Handle, HandleHashMap, InsertError};
use proptest::prelude::*;
use std::collections::hash_map::RandomState;
use std::collections::{BTreeSet, HashMap};
use std::hash::{BuildHasher, Hasher};

#[derive(Clone, Debug)]
enum Op {
    Insert(usize, i32),
    RemoveHandle(usize),
    RemoveKey(usize),
    Find(usize),
    Contains(String),
    Drain,
    Reserve(usize),
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<Op>)> {
    proptest::collection::vec("[a-z]{0,4}", 1..=8).prop_flat_map(|pool| {
        let idx = proptest::sample::select((0..pool.len()).collect::<Vec<_>>());
        let op = prop_oneof![
            4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| Op::Insert(i, v)),
            2 => idx.clone().prop_map(Op::RemoveHandle),
            2 => idx.clone().prop_map(Op::RemoveKey),
            2 => idx.clone().prop_map(Op::Find),
            2 => "[a-z]{0,4}".prop_map(Op::Contains),
            1 => Just(Op::Drain),
            1 => (0usize..64).prop_map(Op::Reserve),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
    })
}

// State-machine equivalence against std::collections::HashMap:
// - duplicates are rejected, successful inserts return a stable handle;
// - handles of removed or drained entries never resolve again;
// - `len`/`is_empty` and the key set match the model after every step.
fn run_state_machine<S>(
    mut sut: HandleHashMap<String, i32, S>,
    pool: &[String],
    ops: Vec<Op>,
) -> Result<(), TestCaseError>
where
    S: BuildHasher + Clone + Default,
{
    let mut model: HashMap<String, i32> = HashMap::new();
    let mut live: HashMap<String, Handle> = HashMap::new();
    let mut stale: Vec<Handle> = Vec::new();

    for op in ops {
        match op {
            Op::Insert(i, v) => {
                let k = pool[i].clone();
                let already = model.contains_key(&k);
                match sut.insert(k.clone(), v) {
                    Ok(h) => {
                        prop_assert!(!already, "insert must fail on duplicate");
                        live.insert(k.clone(), h);
                        model.insert(k, v);
                    }
                    Err(InsertError::DuplicateKey) => prop_assert!(already),
                }
            }
            Op::RemoveHandle(i) => {
                let k = &pool[i];
                match live.remove(k) {
                    Some(h) => {
                        let (kk, vv) = sut.remove(h).expect("live handle removes");
                        prop_assert_eq!(&kk, k);
                        prop_assert_eq!(Some(vv), model.remove(k));
                        stale.push(h);
                    }
                    None => prop_assert!(sut.find(k.as_str()).is_none()),
                }
            }
            Op::RemoveKey(i) => {
                let k = &pool[i];
                let removed = sut.remove_key(k.as_str());
                prop_assert_eq!(removed.map(|(_, v)| v), model.remove(k));
                if let Some(h) = live.remove(k) {
                    stale.push(h);
                }
            }
            Op::Find(i) => {
                let k = &pool[i];
                let found = sut.find(k.as_str());
                prop_assert_eq!(found, live.get(k).copied());
                if let Some(h) = found {
                    prop_assert_eq!(h.value(&sut), model.get(k));
                }
            }
            Op::Contains(s) => {
                prop_assert_eq!(sut.find(s.as_str()).is_some(), model.contains_key(&s));
            }
            Op::Drain => {
                let drained: BTreeSet<String> = sut.drain().into_iter().map(|(k, _)| k).collect();
                let expected: BTreeSet<String> = model.drain().map(|(k, _)| k).collect();
                prop_assert_eq!(drained, expected);
                stale.extend(live.drain().map(|(_, h)| h));
            }
            Op::Reserve(n) => sut.reserve(n),
        }

        for &h in &stale {
            prop_assert!(h.value(&sut).is_none());
        }
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
        let keys: BTreeSet<&String> = sut.iter().map(|(_, k, _)| k).collect();
        prop_assert_eq!(keys, model.keys().collect::<BTreeSet<_>>());
    }
    Ok(())
}

#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_state_machine(
            HandleHashMap::with_capacity_and_hasher(0, RandomState::new()),
            &pool,
            ops,
        )?;
    }

    // Worst-case collisions stress equality probing and unlinking.
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        run_state_machine(
            HandleHashMap::with_capacity_and_hasher(0, ConstBuildHasher),
            &pool,
            ops,
        )?;
    }
}
