use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

use parking_lot::Mutex;

/// A bucket holding up to `bucket_size` entries. Several directory slots
/// may reference the same bucket; the slots referencing a bucket of local
/// depth `d` are exactly those agreeing on the low `d` bits.
struct Bucket<K, V> {
    depth: usize,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            items: Vec::new(),
        }
    }
}

/// Directory state guarded by the table latch. Buckets live in an arena;
/// directory slots hold arena indices so a bucket can be shared by many
/// slots without reference counting.
struct Directory<K, V> {
    global_depth: usize,
    num_buckets: usize,
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

/// In-memory extendible hash table mapping K to V.
///
/// The directory doubles when a full bucket's local depth has caught up
/// with the global depth. A split partitions the bucket's entries by the
/// next hash bit and rewrites every directory slot that referenced it.
/// A single latch covers the directory and all buckets.
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    bucket_size: usize,
    hash_builder: S,
    inner: Mutex<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V, RandomState>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a table with global depth 0 and a single empty bucket.
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, RandomState::new())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BuildHasher,
{
    /// Creates a table using the supplied hasher. Tests inject a
    /// deterministic hasher to pin down directory shapes.
    pub fn with_hasher(bucket_size: usize, hash_builder: S) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            bucket_size,
            hash_builder,
            inner: Mutex::new(Directory {
                global_depth: 0,
                num_buckets: 1,
                dir: vec![0],
                buckets: vec![Bucket::new(0)],
            }),
        }
    }

    fn hash_of(&self, key: &K) -> u64 {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn slot_of(hash: u64, global_depth: usize) -> usize {
        let mask = (1u64 << global_depth) - 1;
        (hash & mask) as usize
    }

    /// Looks up the value for `key`, if present.
    pub fn find(&self, key: &K) -> Option<V> {
        let hash = self.hash_of(key);
        let inner = self.inner.lock();
        let bucket = &inner.buckets[inner.dir[Self::slot_of(hash, inner.global_depth)]];
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Inserts the key-value pair, overwriting an existing entry for the
    /// same key. Never fails; the directory grows as needed.
    pub fn insert(&self, key: K, value: V) {
        let hash = self.hash_of(&key);
        let mut inner = self.inner.lock();

        loop {
            let slot = Self::slot_of(hash, inner.global_depth);
            let bucket_idx = inner.dir[slot];

            if let Some(entry) = inner.buckets[bucket_idx]
                .items
                .iter_mut()
                .find(|(k, _)| *k == key)
            {
                entry.1 = value;
                return;
            }

            if inner.buckets[bucket_idx].items.len() < self.bucket_size {
                inner.buckets[bucket_idx].items.push((key, value));
                return;
            }

            // Bucket full: split it, doubling the directory first if its
            // local depth has reached the global depth.
            let local_depth = inner.buckets[bucket_idx].depth;
            if local_depth == inner.global_depth {
                inner.dir.extend_from_within(..);
                inner.global_depth += 1;
            }

            // The old arena slot is reused for the zero-bit half; the
            // one-bit half gets a fresh slot.
            let old_items = std::mem::take(&mut inner.buckets[bucket_idx].items);
            inner.buckets[bucket_idx].depth = local_depth + 1;
            let one_idx = inner.buckets.len();
            inner.buckets.push(Bucket::new(local_depth + 1));
            inner.num_buckets += 1;

            let bit = 1u64 << local_depth;
            for (k, v) in old_items {
                if self.hash_of(&k) & bit != 0 {
                    inner.buckets[one_idx].items.push((k, v));
                } else {
                    inner.buckets[bucket_idx].items.push((k, v));
                }
            }

            for s in 0..inner.dir.len() {
                if inner.dir[s] == bucket_idx && (s >> local_depth) & 1 == 1 {
                    inner.dir[s] = one_idx;
                }
            }
            // Retry: the key's slot may now reference either half.
        }
    }

    /// Removes the entry for `key`. Returns false if it was not present.
    /// Buckets are never coalesced.
    pub fn remove(&self, key: &K) -> bool {
        let hash = self.hash_of(key);
        let mut inner = self.inner.lock();
        let bucket_idx = inner.dir[Self::slot_of(hash, inner.global_depth)];
        let items = &mut inner.buckets[bucket_idx].items;
        if let Some(pos) = items.iter().position(|(k, _)| k == key) {
            items.swap_remove(pos);
            true
        } else {
            false
        }
    }

    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    /// Local depth of the bucket referenced by the given directory slot.
    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.lock();
        inner.buckets[inner.dir[dir_index]].depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().num_buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_find() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(4);

        for i in 0..100u32 {
            table.insert(i, i * 10);
        }
        for i in 0..100u32 {
            assert_eq!(table.find(&i), Some(i * 10));
        }
        assert_eq!(table.find(&100), None);
    }

    #[test]
    fn test_insert_overwrites() {
        let table: ExtendibleHashTable<u32, &str> = ExtendibleHashTable::new(2);

        table.insert(1, "a");
        table.insert(1, "b");
        assert_eq!(table.find(&1), Some("b"));
    }

    #[test]
    fn test_remove() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(4);

        table.insert(7, 70);
        assert!(table.remove(&7));
        assert!(!table.remove(&7));
        assert_eq!(table.find(&7), None);
    }

    #[test]
    fn test_directory_growth() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(2);
        assert_eq!(table.global_depth(), 0);
        assert_eq!(table.num_buckets(), 1);

        for i in 0..64u32 {
            table.insert(i, i);
        }
        assert!(table.global_depth() > 0);
        assert!(table.num_buckets() > 1);

        for i in 0..64u32 {
            assert_eq!(table.find(&i), Some(i), "lost key {} after splits", i);
        }
    }
}
