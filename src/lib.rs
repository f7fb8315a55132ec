//! smart-cache: a keyed cache of weakly held `Arc` values with
//! single-flight construction.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: deduplicate expensive shared objects by logical identity (a path,
//!   a content hash) without ever keeping them alive longer than their users
//!   do.
//! - Layers:
//!   - HandleHashMap<K, V, S>: structural map that returns stable
//!     generational handles; a hashbrown index over slotmap storage.
//!   - WeakHashMap<K, V, S>: stores a `Slot` per key (a `Weak<V>` plus an
//!     optional retained `Arc<V>`) and answers liveness questions.
//!   - SmartCache<K, V, S>: public, thread-safe API with get-or-create.
//!
//! Constraints
//! - At most one live value per key at any instant.
//! - `create*` calls are serialized by one creation lock that is held while
//!   the factory runs; the factory runs at most once per key generation.
//! - Slots expire lazily. Nothing sweeps in the background; `contains`,
//!   `keys`, `erase` and `purge` drop expired slots they touch, and a new
//!   `create` for the key reuses the stale slot.
//! - `len()` counts raw slots, expired ones included; `live_len()` counts
//!   live values.
//!
//! Locking
//! - The creation lock (`parking_lot::Mutex`) and the slot map lock
//!   (`parking_lot::RwLock`) are distinct. The slot map lock is never held
//!   while user code runs, other than `K: Eq/Hash`.
//! - Values released by `erase`/`clear` are dropped after the slot map lock
//!   is released, so their `Drop` may use the cache.
//! - A factory must not call `create*` on its own cache. Release builds
//!   deadlock; debug builds panic with "reentrant create".
//!
//! Hasher invariants
//! - Each entry stores a precomputed `u64` hash and indexing always uses
//!   the stored hash; `K: Hash` is never invoked after insertion.
//!
//! Notes and non-goals
//! - No capacity bound or TTL. Retained entries live until erased or
//!   cleared.
//! - Staleness of cached artifacts (e.g. a file changed on disk) is the
//!   caller's policy; see [`metadata`] for a helper and use `erase`.

pub mod error;
mod handle_hash_map;
mod handle_hash_map_proptest;
#[cfg(unix)]
pub mod metadata;
mod reentrancy;
mod smart_cache;
mod weak_map;

// Public surface
pub use error::{Error, Result};
pub use smart_cache::SmartCache;
pub use weak_map::Retention;
