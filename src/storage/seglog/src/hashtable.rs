// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The object map: a chained bucket hash table from `(table_id, object_id)`
//! to the live entry for that object in the log. Sized at construction in
//! cache-line multiples; it does not resize. At most one live entry exists
//! per key, and it always points at the highest version ever installed for
//! that key.

use crate::entry::EntryRef;

use ahash::RandomState;

use core::hash::{BuildHasher, Hasher};

/// Nominal size of one bucket, used to translate a byte budget into a
/// bucket count.
const BUCKET_BYTES: usize = 64;

#[derive(Clone, Default)]
struct Bucket {
    slots: Vec<(u64, u64, EntryRef)>,
}

pub struct ObjectMap {
    hash_builder: RandomState,
    mask: u64,
    buckets: Box<[Bucket]>,
}

impl ObjectMap {
    /// Create a map with at least `buckets` buckets, rounded up to a power
    /// of two.
    pub fn new(buckets: usize) -> Self {
        let count = buckets.next_power_of_two().max(1);
        Self {
            hash_builder: RandomState::new(),
            mask: (count - 1) as u64,
            buckets: vec![Bucket::default(); count].into_boxed_slice(),
        }
    }

    /// Create a map sized to a byte budget, the way it is configured.
    pub fn with_capacity_bytes(bytes: usize) -> Self {
        Self::new((bytes / BUCKET_BYTES).max(1))
    }

    fn bucket_index(&self, table_id: u64, object_id: u64) -> usize {
        let mut hasher = self.hash_builder.build_hasher();
        hasher.write_u64(table_id);
        hasher.write_u64(object_id);
        (hasher.finish() & self.mask) as usize
    }

    /// The live entry for a key, if any.
    pub fn lookup(&self, table_id: u64, object_id: u64) -> Option<EntryRef> {
        let bucket = &self.buckets[self.bucket_index(table_id, object_id)];
        bucket
            .slots
            .iter()
            .find(|(t, k, _)| *t == table_id && *k == object_id)
            .map(|(_, _, entry)| *entry)
    }

    /// Install the entry for a key, returning the previous entry if the key
    /// was present. From a reader's perspective the swap is atomic: a
    /// lookup sees either the old or the new entry, never neither.
    pub fn replace(&mut self, table_id: u64, object_id: u64, entry: EntryRef) -> Option<EntryRef> {
        let index = self.bucket_index(table_id, object_id);
        let bucket = &mut self.buckets[index];
        for slot in bucket.slots.iter_mut() {
            if slot.0 == table_id && slot.1 == object_id {
                return Some(std::mem::replace(&mut slot.2, entry));
            }
        }
        bucket.slots.push((table_id, object_id, entry));
        None
    }

    /// Remove a key, returning the entry it pointed at.
    pub fn remove(&mut self, table_id: u64, object_id: u64) -> Option<EntryRef> {
        let index = self.bucket_index(table_id, object_id);
        let bucket = &mut self.buckets[index];
        let position = bucket
            .slots
            .iter()
            .position(|(t, k, _)| *t == table_id && *k == object_id)?;
        Some(bucket.slots.swap_remove(position).2)
    }

    /// Warm the bucket for an imminent lookup of this key.
    pub fn prefetch(&self, table_id: u64, object_id: u64) {
        let bucket = &self.buckets[self.bucket_index(table_id, object_id)];
        std::hint::black_box(bucket.slots.len());
    }

    /// Visit every entry. Iteration order is unspecified.
    pub fn for_each<F: FnMut(u64, u64, EntryRef)>(&self, mut f: F) {
        for bucket in self.buckets.iter() {
            for (table_id, object_id, entry) in &bucket.slots {
                f(*table_id, *object_id, *entry);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.slots.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(segment_id: u64, offset: u32) -> EntryRef {
        EntryRef { segment_id, offset }
    }

    #[test]
    fn lookup_replace_remove() {
        let mut map = ObjectMap::new(64);
        assert_eq!(map.lookup(1, 2), None);

        assert_eq!(map.replace(1, 2, entry(0, 10)), None);
        assert_eq!(map.lookup(1, 2), Some(entry(0, 10)));

        assert_eq!(map.replace(1, 2, entry(3, 20)), Some(entry(0, 10)));
        assert_eq!(map.lookup(1, 2), Some(entry(3, 20)));

        assert_eq!(map.remove(1, 2), Some(entry(3, 20)));
        assert_eq!(map.lookup(1, 2), None);
        assert_eq!(map.remove(1, 2), None);
    }

    #[test]
    fn keys_are_distinguished_by_both_halves() {
        let mut map = ObjectMap::new(64);
        map.replace(1, 2, entry(0, 1));
        map.replace(2, 1, entry(0, 2));
        assert_eq!(map.lookup(1, 2), Some(entry(0, 1)));
        assert_eq!(map.lookup(2, 1), Some(entry(0, 2)));
    }

    #[test]
    fn survives_heavy_collisions() {
        // a single bucket forces every key onto one chain
        let mut map = ObjectMap::new(1);
        for i in 0..100 {
            map.replace(7, i, entry(0, i as u32));
        }
        assert_eq!(map.len(), 100);
        for i in 0..100 {
            assert_eq!(map.lookup(7, i), Some(entry(0, i as u32)));
        }
        for i in (0..100).step_by(2) {
            assert!(map.remove(7, i).is_some());
        }
        assert_eq!(map.len(), 50);
        assert_eq!(map.lookup(7, 1), Some(entry(0, 1)));
        assert_eq!(map.lookup(7, 2), None);
    }

    #[test]
    fn for_each_visits_everything_once() {
        let mut map = ObjectMap::new(16);
        for i in 0..32 {
            map.replace(1, i, entry(0, i as u32));
        }
        let mut seen = Vec::new();
        map.for_each(|t, k, _| seen.push((t, k)));
        seen.sort();
        assert_eq!(seen.len(), 32);
        seen.dedup();
        assert_eq!(seen.len(), 32);
    }

    #[test]
    fn sizing_rounds_to_power_of_two() {
        let map = ObjectMap::new(3);
        assert_eq!(map.mask, 3); // 4 buckets
        let map = ObjectMap::with_capacity_bytes(1000);
        assert_eq!(map.mask, 15); // 1000 / 64 = 15 -> 16 buckets
    }
}
