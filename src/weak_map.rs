//! WeakHashMap: liveness-aware slots atop HandleHashMap.
//!
//! Each slot holds a `Weak<V>` and, when retained, an extra `Arc<V>`. A slot
//! whose weak handle no longer upgrades is logically absent; it stays in the
//! map until a purge or a replacing insert removes it.

use crate::handle_hash_map::HandleHashMap;
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use std::collections::hash_map::RandomState;
use std::sync::{Arc, Weak};

/// Whether the cache keeps its own strong reference to an entry.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Retention {
    /// The entry lives only as long as some caller holds an `Arc`.
    #[default]
    Weak,
    /// The cache holds an `Arc` too; the entry lives until erased or cleared.
    Retained,
}

pub(crate) struct Slot<V: ?Sized> {
    weak: Weak<V>,
    retained: Option<Arc<V>>,
}

impl<V: ?Sized> Slot<V> {
    pub(crate) fn new(value: &Arc<V>, retention: Retention) -> Self {
        Self {
            weak: Arc::downgrade(value),
            retained: match retention {
                Retention::Weak => None,
                Retention::Retained => Some(Arc::clone(value)),
            },
        }
    }

    #[inline]
    pub(crate) fn upgrade(&self) -> Option<Arc<V>> {
        self.weak.upgrade()
    }

    #[inline]
    pub(crate) fn is_live(&self) -> bool {
        self.weak.strong_count() > 0
    }

    #[inline]
    pub(crate) fn is_retained(&self) -> bool {
        self.retained.is_some()
    }
}

/// Outcome of a liveness probe for a single key.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Liveness {
    Absent,
    Live,
    Expired,
}

pub(crate) struct WeakHashMap<K, V: ?Sized, S = RandomState> {
    inner: HandleHashMap<K, Slot<V>, S>,
}

impl<K, V, S> WeakHashMap<K, V, S>
where
    K: Eq + Hash,
    V: ?Sized,
    S: BuildHasher + Clone + Default,
{
    pub(crate) fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            inner: HandleHashMap::with_capacity_and_hasher(capacity, hasher),
        }
    }

    /// Raw slot count, dead slots included.
    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(crate) fn live_len(&self) -> usize {
        self.inner.iter().filter(|(_, _, s)| s.is_live()).count()
    }

    pub(crate) fn reserve(&mut self, additional: usize) {
        self.inner.reserve(additional);
    }

    pub(crate) fn get<Q>(&self, q: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.inner
            .find(q)
            .and_then(|h| h.value(&self.inner))
            .and_then(Slot::upgrade)
    }

    pub(crate) fn liveness<Q>(&self, q: &Q) -> Liveness
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        match self.inner.find(q).and_then(|h| h.value(&self.inner)) {
            None => Liveness::Absent,
            Some(slot) if slot.is_live() => Liveness::Live,
            Some(_) => Liveness::Expired,
        }
    }

    /// Point `key` at `value`, returning the slot it displaced, if any.
    pub(crate) fn insert(&mut self, key: K, value: &Arc<V>, retention: Retention) -> Option<Slot<V>> {
        let slot = Slot::new(value, retention);
        if let Some(existing) = self
            .inner
            .find(&key)
            .and_then(|h| h.value_mut(&mut self.inner))
        {
            return Some(core::mem::replace(existing, slot));
        }
        let inserted = self.inner.insert(key, slot);
        debug_assert!(inserted.is_ok(), "key was just probed absent");
        None
    }

    /// Make the cache hold a strong reference to the live entry at `q`.
    /// Returns true if the slot was promoted, false if it was already
    /// retained or is missing.
    pub(crate) fn hold<Q>(&mut self, q: &Q, value: &Arc<V>) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        match self.inner.find(q).and_then(|h| h.value_mut(&mut self.inner)) {
            Some(slot) if !slot.is_retained() => {
                debug_assert!(Weak::ptr_eq(&slot.weak, &Arc::downgrade(value)));
                slot.retained = Some(Arc::clone(value));
                true
            }
            _ => false,
        }
    }

    pub(crate) fn remove<Q>(&mut self, q: &Q) -> Option<(K, Slot<V>)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.inner.remove_key(q)
    }

    /// Remove the slot at `q` only if it has expired.
    pub(crate) fn purge_key<Q>(&mut self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        match self.inner.find(q) {
            Some(h) if h.value(&self.inner).is_some_and(|s| !s.is_live()) => {
                self.inner.remove(h).is_some()
            }
            _ => false,
        }
    }

    /// Remove every expired slot and return how many were removed.
    pub(crate) fn purge(&mut self) -> usize {
        let dead: Vec<_> = self
            .inner
            .iter()
            .filter(|(_, _, s)| !s.is_live())
            .map(|(h, _, _)| h)
            .collect();
        dead.into_iter()
            .filter(|&h| self.inner.remove(h).is_some())
            .count()
    }

    pub(crate) fn live_keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.inner
            .iter()
            .filter(|(_, _, s)| s.is_live())
            .map(|(_, k, _)| k.clone())
            .collect()
    }

    pub(crate) fn live_values(&self) -> Vec<Arc<V>> {
        self.inner.iter().filter_map(|(_, _, s)| s.upgrade()).collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<(K, Slot<V>)> {
        self.inner.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> WeakHashMap<String, u32> {
        WeakHashMap::with_capacity_and_hasher(0, RandomState::new())
    }

    #[test]
    fn weak_slot_expires_with_last_arc() {
        let mut m = map();
        let v = Arc::new(7);
        assert!(m.insert("a".to_string(), &v, Retention::Weak).is_none());
        assert_eq!(m.get("a").as_deref(), Some(&7));
        assert_eq!(m.liveness("a"), Liveness::Live);

        drop(v);
        assert!(m.get("a").is_none());
        assert_eq!(m.liveness("a"), Liveness::Expired);
        assert_eq!(m.liveness("b"), Liveness::Absent);
        // Dead slot still counts until purged.
        assert_eq!(m.len(), 1);
        assert_eq!(m.live_len(), 0);
    }

    #[test]
    fn retained_slot_outlives_callers() {
        let mut m = map();
        let v = Arc::new(1);
        m.insert("a".to_string(), &v, Retention::Retained);
        drop(v);
        assert_eq!(m.get("a").as_deref(), Some(&1));

        let (_, slot) = m.remove("a").expect("slot present");
        assert!(slot.is_retained());
        let weak = slot.weak.clone();
        drop(slot);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn insert_replaces_expired_slot_in_place() {
        let mut m = map();
        let old = Arc::new(1);
        m.insert("a".to_string(), &old, Retention::Weak);
        drop(old);

        let new = Arc::new(2);
        let displaced = m.insert("a".to_string(), &new, Retention::Weak);
        assert!(displaced.is_some_and(|s| !s.is_live()));
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("a").as_deref(), Some(&2));
    }

    #[test]
    fn hold_promotes_once() {
        let mut m = map();
        let v = Arc::new(3);
        m.insert("a".to_string(), &v, Retention::Weak);
        assert!(m.hold("a", &v));
        assert!(!m.hold("a", &v), "already retained");
        assert!(!m.hold("missing", &v));
        drop(v);
        assert_eq!(m.get("a").as_deref(), Some(&3));
    }

    #[test]
    fn purge_removes_only_dead_slots() {
        let mut m = map();
        let keep = Arc::new(0);
        m.insert("keep".to_string(), &keep, Retention::Weak);
        for i in 0..4 {
            let v = Arc::new(i);
            m.insert(format!("gone{i}"), &v, Retention::Weak);
        }
        assert_eq!(m.len(), 5);
        assert!(!m.purge_key("keep"));
        assert!(m.purge_key("gone0"));
        assert!(!m.purge_key("gone0"));
        assert_eq!(m.purge(), 3);
        assert_eq!(m.len(), 1);
        assert_eq!(m.live_keys(), vec!["keep".to_string()]);
        assert_eq!(m.live_values().len(), 1);
    }

    #[test]
    fn unsized_values_are_supported() {
        let mut m: WeakHashMap<u32, str> = WeakHashMap::with_capacity_and_hasher(4, RandomState::new());
        let s: Arc<str> = Arc::from("hello");
        m.insert(1, &s, Retention::Weak);
        assert_eq!(m.get(&1).as_deref(), Some("hello"));
        assert_eq!(m.drain().len(), 1);
        assert!(m.is_empty());
    }
}
