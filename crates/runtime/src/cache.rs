//! The specialization cache.
//!
//! A concurrent map from cache keys to entry state. Entries move
//! `Pending → Ready` exactly once and are never evicted or demoted.
//! `dashmap` shards the map, so the fast path never contends on a global
//! lock; mutations hold only the owning shard.

use std::ffi::c_void;

use dashmap::DashMap;
use tracing::warn;

/// `{prototype id, run-value fingerprint}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub prototype: u64,
    pub values: u64,
}

/// A caller-owned slot the runtime publishes a resolved address into.
///
/// The pointee lives on the dispatching caller's stack. Callers clear
/// their registrations (null-slot dispatch) before the frame dies, and
/// the shutdown barrier drains the worker pool before teardown, so a
/// registered slot is always writable when a completion fans out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPtr(*mut *const c_void);

unsafe impl Send for CheckpointPtr {}
unsafe impl Sync for CheckpointPtr {}

impl CheckpointPtr {
    pub fn new(slot: *mut *const c_void) -> Self {
        debug_assert!(!slot.is_null());
        Self(slot)
    }

    /// # Safety
    ///
    /// The slot must still be registered, see the type-level contract.
    pub unsafe fn write(&self, address: usize) {
        self.0.write(address as *const c_void);
    }
}

#[derive(Debug)]
enum EntryState {
    Pending {
        waiters: Vec<CheckpointPtr>,
        /// A build task for this key is queued or running. Reset on
        /// failure so a later dispatch can retry.
        in_flight: bool,
    },
    Ready {
        address: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Found {
    Ready(usize),
    Pending,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterOutcome {
    Added,
    /// The entry became ready between the lookup and the registration.
    Ready(usize),
}

#[derive(Debug, Default)]
pub struct SpecializationCache {
    entries: DashMap<CacheKey, EntryState>,
}

impl SpecializationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, key: CacheKey) -> Found {
        match self.entries.get(&key).as_deref() {
            Some(EntryState::Ready { address }) => Found::Ready(*address),
            Some(EntryState::Pending { .. }) => Found::Pending,
            None => Found::Absent,
        }
    }

    /// Atomically install a pending entry with one initial waiter.
    /// Returns `true` if this call created the entry; the caller then owns
    /// submitting the build task.
    pub fn insert_if_absent(&self, key: CacheKey, waiter: CheckpointPtr) -> bool {
        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(EntryState::Pending {
                    waiters: vec![waiter],
                    in_flight: true,
                });
                true
            }
        }
    }

    pub fn add_waiter(&self, key: CacheKey, waiter: CheckpointPtr) -> WaiterOutcome {
        match self.entries.get_mut(&key).as_deref_mut() {
            Some(EntryState::Pending { waiters, .. }) => {
                if !waiters.contains(&waiter) {
                    waiters.push(waiter);
                }
                WaiterOutcome::Added
            }
            Some(EntryState::Ready { address }) => WaiterOutcome::Ready(*address),
            None => unreachable!("cache entries are never removed"),
        }
    }

    /// Drop every waiter registration under `key`. An in-flight build
    /// still completes and publishes `Ready`, but writes to no slot.
    pub fn remove_waiters(&self, key: CacheKey) {
        if let Some(EntryState::Pending { waiters, .. }) =
            self.entries.get_mut(&key).as_deref_mut()
        {
            waiters.clear();
        }
    }

    /// Claim the retry of a failed build. Returns `true` at most once per
    /// failure window.
    pub fn claim_build(&self, key: CacheKey) -> bool {
        match self.entries.get_mut(&key).as_deref_mut() {
            Some(EntryState::Pending { in_flight, .. }) if !*in_flight => {
                *in_flight = true;
                true
            }
            _ => false,
        }
    }

    /// `Pending → Ready`: publish `address` to every registered waiter.
    /// Duplicate completions are idempotent; the first address wins.
    pub fn complete(&self, key: CacheKey, address: usize) {
        let mut entry = self
            .entries
            .entry(key)
            .or_insert(EntryState::Ready { address });

        let state = entry.value_mut();
        match state {
            EntryState::Pending { waiters, .. } => {
                let drained = std::mem::take(waiters);
                *state = EntryState::Ready { address };
                for waiter in drained {
                    unsafe { waiter.write(address) };
                }
            }
            EntryState::Ready { address: existing } => {
                if *existing != address {
                    warn!(key = ?key, "duplicate completion with a different address; keeping the first");
                }
            }
        }
    }

    /// The build for `key` failed; keep the entry pending so a later
    /// dispatch retries.
    pub fn mark_failed(&self, key: CacheKey) {
        if let Some(EntryState::Pending { in_flight, .. }) =
            self.entries.get_mut(&key).as_deref_mut()
        {
            *in_flight = false;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(values: u64) -> CacheKey {
        CacheKey {
            prototype: 42,
            values,
        }
    }

    #[test]
    fn insert_if_absent_is_single_winner() {
        let cache = SpecializationCache::new();
        let mut slot_a: *const c_void = std::ptr::null();
        let mut slot_b: *const c_void = std::ptr::null();

        assert!(cache.insert_if_absent(key(1), CheckpointPtr::new(&mut slot_a)));
        assert!(!cache.insert_if_absent(key(1), CheckpointPtr::new(&mut slot_b)));
        assert_eq!(cache.find(key(1)), Found::Pending);
    }

    #[test]
    fn complete_fans_out_to_all_waiters() {
        let cache = SpecializationCache::new();
        let mut slot_a: *const c_void = std::ptr::null();
        let mut slot_b: *const c_void = std::ptr::null();

        cache.insert_if_absent(key(1), CheckpointPtr::new(&mut slot_a));
        cache.add_waiter(key(1), CheckpointPtr::new(&mut slot_b));
        cache.complete(key(1), 0xbeef);

        assert_eq!(slot_a as usize, 0xbeef);
        assert_eq!(slot_b as usize, 0xbeef);
        assert_eq!(cache.find(key(1)), Found::Ready(0xbeef));
    }

    #[test]
    fn completion_is_monotone_and_idempotent() {
        let cache = SpecializationCache::new();
        let mut slot: *const c_void = std::ptr::null();

        cache.insert_if_absent(key(1), CheckpointPtr::new(&mut slot));
        cache.complete(key(1), 0x1000);
        cache.complete(key(1), 0x2000);
        assert_eq!(cache.find(key(1)), Found::Ready(0x1000));
    }

    #[test]
    fn removed_waiters_are_not_written() {
        let cache = SpecializationCache::new();
        let mut slot: *const c_void = std::ptr::null();

        cache.insert_if_absent(key(1), CheckpointPtr::new(&mut slot));
        cache.remove_waiters(key(1));
        cache.complete(key(1), 0xbeef);

        assert!(slot.is_null());
        assert_eq!(cache.find(key(1)), Found::Ready(0xbeef));
    }

    #[test]
    fn failed_builds_can_be_reclaimed_once() {
        let cache = SpecializationCache::new();
        let mut slot: *const c_void = std::ptr::null();

        cache.insert_if_absent(key(1), CheckpointPtr::new(&mut slot));
        // Queued build: nothing to claim.
        assert!(!cache.claim_build(key(1)));

        cache.mark_failed(key(1));
        assert!(cache.claim_build(key(1)));
        assert!(!cache.claim_build(key(1)));
    }
}
