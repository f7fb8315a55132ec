//! SmartCache: thread-safe get-or-create over weakly held `Arc` values.

use crate::reentrancy::CreateLock;
use crate::weak_map::{Liveness, Retention, WeakHashMap};
use core::borrow::Borrow;
use core::convert::Infallible;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::collections::hash_map::RandomState;
use std::sync::Arc;
use tracing::{debug, trace};

/// A keyed pool of shared values that disappear once nothing references them.
///
/// `create` returns the live value for a key or builds it with the supplied
/// factory. The cache only keeps a [`Weak`](std::sync::Weak) reference, so a
/// value is dropped as soon as the last caller-held `Arc` goes away, unless it
/// was inserted with [`Retention::Retained`].
///
/// # Concurrency
///
/// All `create*` calls share one creation lock, held for the duration of the
/// factory. For any key the factory runs at most once per generation and
/// concurrent callers all receive the winner's value. A slow factory delays
/// construction for every other key as well.
///
/// The slot map sits behind a separate reader-writer lock that is never held
/// while a factory runs, so `at`/`contains` observe either no value or a fully
/// built one.
///
/// A factory must not call `create*` on the same cache: that deadlocks (debug
/// builds panic instead). Lookups such as `at` are fine.
///
/// # Examples
///
/// ```
/// use smart_cache::SmartCache;
/// use std::sync::Arc;
///
/// let cache: SmartCache<&str, String> = SmartCache::new();
/// let a = cache.create("greeting", || Arc::new("hello".to_string()));
/// let b = cache.create("greeting", || unreachable!());
/// assert!(Arc::ptr_eq(&a, &b));
///
/// drop((a, b));
/// assert!(cache.at("greeting").is_none());
/// ```
pub struct SmartCache<K, V: ?Sized, S = RandomState> {
    create_lock: CreateLock,
    slots: RwLock<WeakHashMap<K, V, S>>,
}

impl<K, V> SmartCache<K, V>
where
    K: Eq + Hash,
    V: ?Sized,
{
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, Default::default())
    }
}

impl<K, V> Default for SmartCache<K, V>
where
    K: Eq + Hash,
    V: ?Sized,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> SmartCache<K, V, S>
where
    K: Eq + Hash,
    V: ?Sized,
    S: BuildHasher + Clone + Default,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(0, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        Self {
            create_lock: CreateLock::new(),
            slots: RwLock::new(WeakHashMap::with_capacity_and_hasher(capacity, hasher)),
        }
    }

    /// Return the live value for `key`, or build one with `factory`.
    pub fn create<F>(&self, key: K, factory: F) -> Arc<V>
    where
        F: FnOnce() -> Arc<V>,
    {
        self.create_with(key, Retention::Weak, factory)
    }

    /// Like [`create`](Self::create), but the cache also keeps the value
    /// alive until [`erase`](Self::erase) or [`clear`](Self::clear).
    pub fn create_retained<F>(&self, key: K, factory: F) -> Arc<V>
    where
        F: FnOnce() -> Arc<V>,
    {
        self.create_with(key, Retention::Retained, factory)
    }

    pub fn create_with<F>(&self, key: K, retention: Retention, factory: F) -> Arc<V>
    where
        F: FnOnce() -> Arc<V>,
    {
        match self.try_create(key, retention, || Ok::<_, Infallible>(factory())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Get-or-create with a fallible factory.
    ///
    /// On `Err` nothing is stored and the error is returned as is. Asking for
    /// [`Retention::Retained`] on a key that is already live promotes the
    /// existing entry without calling the factory.
    pub fn try_create<F, E>(&self, key: K, retention: Retention, factory: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<Arc<V>, E>,
    {
        let _create = self.create_lock.lock();

        let existing = self.slots.read().get(&key);
        if let Some(value) = existing {
            if retention == Retention::Retained && self.slots.write().hold(&key, &value) {
                debug!("promoted cache entry to retained");
            } else {
                trace!("cache hit");
            }
            return Ok(value);
        }

        let value = factory()?;
        let displaced = self.slots.write().insert(key, &value, retention);
        debug_assert!(
            displaced.as_ref().map_or(true, |s| !s.is_live()),
            "creation replaced a live slot"
        );
        debug!(
            replaced_stale = displaced.is_some(),
            retained = retention == Retention::Retained,
            "constructed cache entry"
        );
        drop(displaced);
        Ok(value)
    }

    /// The live value for `q`, if any. Never calls a factory.
    pub fn at<Q>(&self, q: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.slots.read().get(q)
    }

    /// Whether `q` has a live value. Drops the slot if it has expired.
    pub fn contains<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let slots = self.slots.upgradable_read();
        let liveness = slots.liveness(q);
        match liveness {
            Liveness::Live => true,
            Liveness::Absent => false,
            Liveness::Expired => {
                let mut slots = RwLockUpgradableReadGuard::upgrade(slots);
                if slots.purge_key(q) {
                    trace!("purged expired slot");
                }
                false
            }
        }
    }

    /// `1` if `q` has a live value, else `0`.
    pub fn count<Q>(&self, q: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        usize::from(self.contains(q))
    }

    /// Remove the slot for `q`, live or not. Returns whether a slot existed.
    ///
    /// If the cache retained the value and no caller holds it, the value is
    /// dropped here, after the internal lock has been released.
    pub fn erase<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let removed = self.slots.write().remove(q);
        match removed {
            Some((_key, slot)) => {
                debug!(
                    live = slot.is_live(),
                    retained = slot.is_retained(),
                    "erased cache entry"
                );
                true
            }
            None => false,
        }
    }

    /// Remove every slot. Retained values with no outside holders are
    /// dropped after the internal lock has been released.
    pub fn clear(&self) {
        let drained = self.slots.write().drain();
        debug!(removed = drained.len(), "cleared cache");
        drop(drained);
    }

    /// Keys whose values are live, in unspecified order. Expired slots met
    /// along the way are removed.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        let mut slots = self.slots.write();
        let purged = slots.purge();
        if purged > 0 {
            debug!(purged, "purged expired slots");
        }
        slots.live_keys()
    }

    /// A strong handle to every live value, in unspecified order.
    pub fn items(&self) -> Vec<Arc<V>> {
        self.slots.read().live_values()
    }

    /// Number of tracked slots, including expired ones not yet purged.
    /// Use [`live_len`](Self::live_len) for the number of live values.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether no slots are tracked. Expired slots count as present.
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Number of slots whose values are currently live.
    pub fn live_len(&self) -> usize {
        self.slots.read().live_len()
    }

    /// Remove all expired slots; returns how many were removed.
    pub fn purge(&self) -> usize {
        let purged = self.slots.write().purge();
        if purged > 0 {
            debug!(purged, "purged expired slots");
        }
        purged
    }

    /// Capacity hint. Has no observable effect on contents.
    pub fn reserve(&self, additional: usize) {
        self.slots.write().reserve(additional);
    }
}

impl<K, V, S> fmt::Debug for SmartCache<K, V, S>
where
    K: Eq + Hash,
    V: ?Sized,
    S: BuildHasher + Clone + Default,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.read();
        f.debug_struct("SmartCache")
            .field("slots", &slots.len())
            .field("live", &slots.live_len())
            .finish()
    }
}
