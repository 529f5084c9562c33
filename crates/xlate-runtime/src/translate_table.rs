//! The L1 (per-thread) and L2 (address-space-wide) translate tables
//! (`spec.md` §4.1 "Dispatcher"): open-addressed, linear-probed maps from
//! guest `Location` to a compiled block handle, keyed by
//! `(pc >> 2) XOR ((pc >> 2) >> HASH_BITS)`.
//!
//! `TranslateTable` itself is a plain, unsynchronized hash table -- the
//! shape L1 needs, since each `Runtime` owns its L1 exclusively
//! (`spec.md` §5). `SharedTranslateTable` wraps one behind a `Mutex` and adds
//! `get_or_put`, the atomic insert-if-absent L2 needs when two threads race
//! to compile the same block (`SPEC_FULL.md` §D.2).

use std::sync::Mutex;

use xlate_types::Location;

const HASH_BITS: u32 = 10;

fn hash(loc: Location) -> u64 {
    let shifted = loc.value() >> 2;
    shifted ^ (shifted >> HASH_BITS)
}

#[derive(Clone, Copy)]
struct Slot<V> {
    key: Location,
    value: V,
}

/// Fixed-capacity open-addressed map, linear probing on collision. Capacity
/// is always a power of two so the probe index can be masked instead of
/// modulo'd.
pub struct TranslateTable<V> {
    slots: Vec<Option<Slot<V>>>,
    len: usize,
    mask: u64,
}

impl<V: Copy> TranslateTable<V> {
    #[must_use]
    pub fn with_capacity(capacity_pow2: usize) -> Self {
        let capacity = capacity_pow2.next_power_of_two().max(16);
        TranslateTable {
            slots: vec![None; capacity],
            len: 0,
            mask: (capacity - 1) as u64,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn probe(&self, key: Location) -> usize {
        (hash(key) & self.mask) as usize
    }

    #[must_use]
    pub fn get(&self, key: Location) -> Option<V> {
        let start = self.probe(key);
        for step in 0..self.slots.len() {
            let idx = (start + step) & self.mask as usize;
            match &self.slots[idx] {
                Some(slot) if slot.key == key => return Some(slot.value),
                Some(_) => continue,
                None => return None,
            }
        }
        None
    }

    #[must_use]
    pub fn contains(&self, key: Location) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or overwrites. Grows (rebuilding from scratch) once the table
    /// is more than three-quarters full.
    pub fn put(&mut self, key: Location, value: V) {
        if self.len * 4 >= self.slots.len() * 3 {
            self.grow();
        }
        self.put_no_grow(key, value);
    }

    fn put_no_grow(&mut self, key: Location, value: V) {
        let start = self.probe(key);
        for step in 0..self.slots.len() {
            let idx = (start + step) & self.mask as usize;
            match &self.slots[idx] {
                Some(slot) if slot.key == key => {
                    self.slots[idx] = Some(Slot { key, value });
                    return;
                }
                Some(_) => continue,
                None => {
                    self.slots[idx] = Some(Slot { key, value });
                    self.len += 1;
                    return;
                }
            }
        }
        unreachable!("table grown before becoming full");
    }

    fn grow(&mut self) {
        let old = std::mem::replace(&mut self.slots, vec![None; self.slots.len() * 2]);
        self.mask = (self.slots.len() - 1) as u64;
        self.len = 0;
        for slot in old.into_iter().flatten() {
            self.put_no_grow(slot.key, slot.value);
        }
    }

    /// Removes every entry whose key matches `pred`, e.g. all blocks in a
    /// module being unmapped or flushed (`spec.md` §4.2 "Flush").
    pub fn retain(&mut self, mut keep: impl FnMut(Location, &V) -> bool) {
        for slot in &mut self.slots {
            if let Some(s) = slot {
                if !keep(s.key, &s.value) {
                    *slot = None;
                    self.len -= 1;
                }
            }
        }
        // Linear probing correctness after a removal in the middle of a
        // cluster requires a full rehash, not a hole punch.
        let entries: Vec<Slot<V>> = self.slots.iter().flatten().copied().collect();
        self.slots.iter_mut().for_each(|s| *s = None);
        self.len = 0;
        for e in entries {
            self.put_no_grow(e.key, e.value);
        }
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.len = 0;
    }
}

/// `Mutex`-guarded `TranslateTable`, the shape `AddressSpace`'s L2 needs:
/// multiple `Runtime`s racing to publish a translation for the same
/// `Location` must agree on exactly one winner (`spec.md` §5 "cache
/// installs are Release; lookups racing a publish are Acquire").
pub struct SharedTranslateTable<V> {
    inner: Mutex<TranslateTable<V>>,
}

impl<V: Copy> SharedTranslateTable<V> {
    #[must_use]
    pub fn with_capacity(capacity_pow2: usize) -> Self {
        SharedTranslateTable {
            inner: Mutex::new(TranslateTable::with_capacity(capacity_pow2)),
        }
    }

    #[must_use]
    pub fn get(&self, key: Location) -> Option<V> {
        self.inner.lock().expect("translate table poisoned").get(key)
    }

    pub fn put(&self, key: Location, value: V) {
        self.inner.lock().expect("translate table poisoned").put(key, value);
    }

    /// Returns the existing entry if present, otherwise installs `make()`'s
    /// result and returns it. `make` may run even when another thread wins
    /// the race (the loser's freshly-built value is simply dropped); callers
    /// that compile before calling this should treat that as wasted, not
    /// wrong, work.
    pub fn get_or_put(&self, key: Location, make: impl FnOnce() -> V) -> V {
        let mut guard = self.inner.lock().expect("translate table poisoned");
        if let Some(v) = guard.get(key) {
            return v;
        }
        let v = make();
        guard.put(key, v);
        v
    }

    pub fn retain(&self, keep: impl FnMut(Location, &V) -> bool) {
        self.inner.lock().expect("translate table poisoned").retain(keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let mut t = TranslateTable::with_capacity(16);
        t.put(Location::new(0x1000), 7u32);
        t.put(Location::new(0x2000), 9u32);
        assert_eq!(t.get(Location::new(0x1000)), Some(7));
        assert_eq!(t.get(Location::new(0x2000)), Some(9));
        assert_eq!(t.get(Location::new(0x3000)), None);
    }

    #[test]
    fn overwrite_keeps_len_stable() {
        let mut t = TranslateTable::with_capacity(16);
        t.put(Location::new(0x1000), 1u32);
        t.put(Location::new(0x1000), 2u32);
        assert_eq!(t.len(), 1);
        assert_eq!(t.get(Location::new(0x1000)), Some(2));
    }

    #[test]
    fn grows_past_load_factor() {
        let mut t = TranslateTable::with_capacity(16);
        for i in 0..64u64 {
            t.put(Location::new(i * 4), i as u32);
        }
        assert!(t.capacity() > 16);
        for i in 0..64u64 {
            assert_eq!(t.get(Location::new(i * 4)), Some(i as u32));
        }
    }

    #[test]
    fn retain_drops_matching_entries_and_keeps_the_rest_reachable() {
        let mut t = TranslateTable::with_capacity(16);
        for i in 0..8u64 {
            t.put(Location::new(i * 4), i as u32);
        }
        t.retain(|_, v| *v % 2 == 0);
        assert_eq!(t.len(), 4);
        assert_eq!(t.get(Location::new(0)), Some(0));
        assert_eq!(t.get(Location::new(4)), None);
    }

    #[test]
    fn get_or_put_only_builds_once_per_key() {
        let table = SharedTranslateTable::with_capacity(16);
        let mut builds = 0;
        let v1 = table.get_or_put(Location::new(0x10), || {
            builds += 1;
            42u32
        });
        let v2 = table.get_or_put(Location::new(0x10), || {
            builds += 1;
            99u32
        });
        assert_eq!(v1, 42);
        assert_eq!(v2, 42);
        assert_eq!(builds, 1);
    }
}
