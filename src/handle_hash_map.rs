//! HandleHashMap: structural layer with stable generational handles.

use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};

/// Stable reference to an entry. A handle carries the slot generation, so a
/// handle to a removed entry never resolves to a later entry in the same slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(DefaultKey);

impl Handle {
    pub(crate) fn new(k: DefaultKey) -> Self {
        Handle(k)
    }
    pub(crate) fn raw_handle(&self) -> DefaultKey {
        self.0
    }

    pub fn value<'a, K, V, S>(&self, map: &'a HandleHashMap<K, V, S>) -> Option<&'a V>
    where
        K: Eq + Hash,
        S: BuildHasher + Clone + Default,
    {
        map.handle_value(*self)
    }

    pub fn value_mut<'a, K, V, S>(&self, map: &'a mut HandleHashMap<K, V, S>) -> Option<&'a mut V>
    where
        K: Eq + Hash,
        S: BuildHasher + Clone + Default,
    {
        map.handle_value_mut(*self)
    }
}

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    hash: u64,
}

pub struct HandleHashMap<K, V, S> {
    hasher: S,
    index: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Entry<K, V>>, // storage using generational keys
}

#[derive(Debug, thiserror::Error)]
pub enum InsertError {
    #[error("an entry with this key already exists")]
    DuplicateKey,
}

/// Iterator over immutable entries in `HandleHashMap`.
pub struct Iter<'a, K, V> {
    it: slotmap::basic::Iter<'a, DefaultKey, Entry<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (Handle, &'a K, &'a V);
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.it
            .next()
            .map(|(k, e)| (Handle::new(k), &e.key, &e.value))
    }
}

impl<K, V, S> HandleHashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Clone + Default,
{
    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            index: HashTable::with_capacity(capacity),
            hasher,
            slots: SlotMap::with_capacity_and_key(capacity),
        }
    }

    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Capacity hint for at least `additional` more entries.
    pub fn reserve(&mut self, additional: usize) {
        let slots = &self.slots;
        self.index.reserve(additional, |&k| {
            slots.get(k).map(|e| e.hash).unwrap_or(0)
        });
        self.slots.reserve(additional);
    }

    pub fn find<Q>(&self, q: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.make_hash(q);
        self.index
            .find(hash, |&k| {
                self.slots
                    .get(k)
                    .map(|e| e.key.borrow() == q)
                    .unwrap_or(false)
            })
            .map(|&k| Handle::new(k))
    }

    pub fn insert(&mut self, key: K, value: V) -> Result<Handle, InsertError> {
        self.insert_with(key, || value)
    }

    /// Insert using a lazy value constructor; `default` only runs when the
    /// key is absent.
    pub fn insert_with<F>(&mut self, key: K, default: F) -> Result<Handle, InsertError>
    where
        F: FnOnce() -> V,
    {
        let hash = self.make_hash(&key);
        match self.index.entry(
            hash,
            |&kk| self.slots.get(kk).map(|e| e.key == key).unwrap_or(false),
            |&kk| self.slots.get(kk).map(|e| e.hash).unwrap_or(0),
        ) {
            hashbrown::hash_table::Entry::Occupied(_) => Err(InsertError::DuplicateKey),
            hashbrown::hash_table::Entry::Vacant(v) => {
                let value = default();
                let entry = Entry { key, value, hash };
                let k = self.slots.insert(entry);
                let _ = v.insert(k);
                Ok(Handle::new(k))
            }
        }
    }

    pub fn remove(&mut self, handle: Handle) -> Option<(K, V)> {
        let k = handle.raw_handle();

        let entry = self.slots.remove(k)?;

        // Unlink from the index; the slot and index are always in sync.
        let unlinked = self
            .index
            .find_entry(entry.hash, |&kk| kk == k)
            .map(|occupied| {
                let _ = occupied.remove();
            });
        debug_assert!(unlinked.is_ok(), "index out of sync with slots");

        Some((entry.key, entry.value))
    }

    pub fn remove_key<Q>(&mut self, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let handle = self.find(q)?;
        self.remove(handle)
    }

    /// Remove every entry, returning them in unspecified order.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        self.index.clear();
        self.slots.drain().map(|(_, e)| (e.key, e.value)).collect()
    }

    pub(crate) fn handle_value(&self, h: Handle) -> Option<&V> {
        self.slots.get(h.raw_handle()).map(|e| &e.value)
    }

    pub(crate) fn handle_value_mut(&mut self, h: Handle) -> Option<&mut V> {
        self.slots.get_mut(h.raw_handle()).map(|e| &mut e.value)
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            it: self.slots.iter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::hash_map::RandomState;
    use std::collections::BTreeSet;

    fn map<K: Eq + Hash, V>() -> HandleHashMap<K, V, RandomState> {
        HandleHashMap::with_capacity_and_hasher(0, RandomState::new())
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
    impl core::hash::Hasher for ConstHasher {
        fn write(&mut self, _bytes: &[u8]) {}
        fn finish(&self) -> u64 {
            0
        } // every key lands in the same bucket
    }

    /// Invariant: Duplicate keys are rejected and the map remains unchanged.
    #[test]
    fn duplicate_insert_rejected() {
        let mut m: HandleHashMap<String, i32, _> = map();
        let handle = m.insert("dup".to_string(), 1).unwrap();
        match m.insert("dup".to_string(), 2) {
            Err(InsertError::DuplicateKey) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(*handle.value(&m).unwrap(), 1);
        assert_eq!(m.len(), 1);
    }

    /// Invariant: Borrowed lookup works (store `String`, query with `&str`).
    #[test]
    fn borrowed_lookup_with_str() {
        let mut m: HandleHashMap<String, i32, _> = map();
        m.insert("hello".to_string(), 1).unwrap();
        assert!(m.find("hello").is_some());
        assert!(m.find("world").is_none());
    }

    /// Invariant: A removed entry's handle does not alias an entry inserted
    /// afterward, even when the physical slot is reused.
    #[test]
    fn stale_handle_does_not_alias_new_entry() {
        let mut m: HandleHashMap<String, i32, _> = map();
        let h1 = m.insert("old".to_string(), 1).unwrap();
        let (_k, _v) = m.remove(h1).unwrap();
        let h2 = m.insert("new".to_string(), 2).unwrap();
        assert_ne!(h1, h2, "handles must differ across generations");
        assert!(h1.value(&m).is_none(), "stale handle must not resolve");
        assert!(m.remove(h1).is_none());
        assert!(m.find("new").is_some());
        assert!(m.find("old").is_none());
    }

    /// Invariant: `remove_key` unlinks by key and a second call is a no-op.
    #[test]
    fn remove_key_then_reinsert() {
        let mut m: HandleHashMap<String, i32, _> = map();
        m.insert("k".to_string(), 1).unwrap();
        assert_eq!(m.remove_key("k"), Some(("k".to_string(), 1)));
        assert_eq!(m.remove_key("k"), None);
        assert!(m.is_empty());

        let h = m.insert("k".to_string(), 2).expect("reinsert allowed");
        assert_eq!(m.find("k"), Some(h));
        assert_eq!(h.value(&m), Some(&2));
    }

    /// Invariant: Lookups and removals stay correct when every key collides.
    #[test]
    fn collision_handling_with_const_hasher() {
        let mut m: HandleHashMap<String, i32, ConstBuildHasher> =
            HandleHashMap::with_capacity_and_hasher(0, ConstBuildHasher);
        let ha = m.insert("a".to_string(), 1).unwrap();
        let hb = m.insert("b".to_string(), 2).unwrap();
        m.insert("c".to_string(), 3).unwrap();

        assert_eq!(m.find("a"), Some(ha));
        assert_eq!(m.find("b"), Some(hb));

        m.remove(hb).unwrap();
        assert!(m.find("b").is_none());
        assert_eq!(m.find("a").and_then(|h| h.value(&m)), Some(&1));
        assert_eq!(m.find("c").and_then(|h| h.value(&m)), Some(&3));
    }

    /// Invariant: Iteration yields each entry once; `value_mut` updates are
    /// visible to later iteration.
    #[test]
    fn iteration_and_mutation() {
        let mut m: HandleHashMap<String, i32, _> = map();
        let keys = ["k1", "k2", "k3"];
        for (i, k) in keys.iter().enumerate() {
            m.insert((*k).to_string(), i as i32).unwrap();
        }

        let seen: BTreeSet<String> = m.iter().map(|(_h, k, _v)| k.clone()).collect();
        let expected: BTreeSet<String> = keys.iter().map(|s| (*s).to_string()).collect();
        assert_eq!(seen, expected);

        let handles: Vec<Handle> = m.iter().map(|(h, _, _)| h).collect();
        for h in handles {
            *h.value_mut(&mut m).unwrap() += 10;
        }
        let total: i32 = m.iter().map(|(_, _, v)| *v).sum();
        assert_eq!(total, 10 + 11 + 12);
    }

    /// Invariant: `insert_with` only runs the constructor on a successful insert.
    #[test]
    fn insert_with_is_lazy_and_deduplicates() {
        let mut m: HandleHashMap<String, String, _> = map();
        let calls = Cell::new(0);

        let r = m.insert_with("k".to_string(), || {
            calls.set(calls.get() + 1);
            "v".to_string()
        });
        assert!(r.is_ok());
        let r2 = m.insert_with("k".to_string(), || {
            calls.set(calls.get() + 1);
            "v2".to_string()
        });
        assert!(matches!(r2, Err(InsertError::DuplicateKey)));
        assert_eq!(calls.get(), 1, "constructor must not run on duplicate");

        let h = m.find("k").unwrap();
        assert_eq!(h.value(&m), Some(&"v".to_string()));
    }

    /// Invariant: `drain` empties both the slots and the index.
    #[test]
    fn drain_returns_everything_and_empties() {
        let mut m: HandleHashMap<u32, u32, _> =
            HandleHashMap::with_capacity_and_hasher(8, RandomState::new());
        let handles: Vec<_> = (0..5).map(|i| m.insert(i, i * 10).unwrap()).collect();

        let mut drained = m.drain();
        drained.sort();
        assert_eq!(drained, vec![(0, 0), (1, 10), (2, 20), (3, 30), (4, 40)]);
        assert!(m.is_empty());
        for (i, h) in handles.iter().enumerate() {
            assert!(h.value(&m).is_none());
            assert!(m.find(&(i as u32)).is_none());
        }

        m.insert(3, 33).unwrap();
        assert_eq!(m.len(), 1);
    }

    /// Invariant: `reserve` has no observable effect on contents.
    #[test]
    fn reserve_keeps_entries() {
        let mut m: HandleHashMap<u32, &'static str, _> = map();
        let h = m.insert(1, "one").unwrap();
        m.reserve(1024);
        assert_eq!(m.len(), 1);
        assert_eq!(m.find(&1), Some(h));
        *h.value_mut(&mut m).unwrap() = "uno";
        assert_eq!(h.value(&m), Some(&"uno"));
    }
}
