//! Integration tests for the extendible hash directory

use std::hash::{BuildHasher, Hasher};

use basalt::container::ExtendibleHashTable;

/// Hashes a u64 key to itself, pinning down directory shapes.
#[derive(Default, Clone)]
struct IdentityHasher(u64);

impl Hasher for IdentityHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        let mut buf = [0u8; 8];
        buf[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);
        self.0 = u64::from_le_bytes(buf);
    }

    fn write_u64(&mut self, i: u64) {
        self.0 = i;
    }
}

#[derive(Default, Clone)]
struct IdentityState;

impl BuildHasher for IdentityState {
    type Hasher = IdentityHasher;

    fn build_hasher(&self) -> IdentityHasher {
        IdentityHasher::default()
    }
}

#[test]
fn test_basic_insert_find_remove() {
    let table: ExtendibleHashTable<u64, u64> = ExtendibleHashTable::new(4);

    for i in 0..500u64 {
        table.insert(i, i * 2);
    }
    for i in 0..500u64 {
        assert_eq!(table.find(&i), Some(i * 2), "lost key {}", i);
    }

    assert!(table.remove(&123));
    assert_eq!(table.find(&123), None);
    assert!(!table.remove(&123));

    // Other keys unaffected by the removal.
    assert_eq!(table.find(&122), Some(244));
    assert_eq!(table.find(&124), Some(248));
}

#[test]
fn test_insert_overwrites_existing_key() {
    let table: ExtendibleHashTable<u64, &str> = ExtendibleHashTable::new(2);

    table.insert(1, "one");
    table.insert(1, "uno");
    assert_eq!(table.find(&1), Some("uno"));
}

#[test]
fn test_directory_split_shape() {
    // Bucket size 2, global depth 0. Keys hash to 0b000, 0b010 and 0b100.
    // All three share the low bit, so inserting the third key forces two
    // splits: the directory doubles twice and ends at global depth 2.
    let table: ExtendibleHashTable<u64, u64, IdentityState> =
        ExtendibleHashTable::with_hasher(2, IdentityState);

    assert_eq!(table.global_depth(), 0);

    table.insert(0b000, 0);
    table.insert(0b010, 1);
    assert_eq!(table.global_depth(), 0);

    table.insert(0b100, 2);
    assert_eq!(table.global_depth(), 2);

    // Slot 0b01 still references the depth-1 bucket produced by the first
    // split; the slots for even keys reference depth-2 buckets.
    assert_eq!(table.local_depth(0b01), 1);
    assert_eq!(table.local_depth(0b00), 2);
    assert_eq!(table.local_depth(0b10), 2);
    assert_eq!(table.num_buckets(), 3);

    assert_eq!(table.find(&0b000), Some(0));
    assert_eq!(table.find(&0b010), Some(1));
    assert_eq!(table.find(&0b100), Some(2));
}

#[test]
fn test_shared_slots_after_split() {
    // With identity hashing and bucket size 2, keys 0 and 2 fill the
    // initial bucket; key 1 splits it once and lands in the odd bucket.
    let table: ExtendibleHashTable<u64, u64, IdentityState> =
        ExtendibleHashTable::with_hasher(2, IdentityState);

    table.insert(0, 0);
    table.insert(2, 2);
    table.insert(1, 1);
    assert_eq!(table.global_depth(), 1);
    assert_eq!(table.num_buckets(), 2);

    assert_eq!(table.find(&0), Some(0));
    assert_eq!(table.find(&1), Some(1));
    assert_eq!(table.find(&2), Some(2));
}

#[test]
fn test_concurrent_inserts_and_finds() {
    use std::sync::Arc;
    use std::thread;

    let table: Arc<ExtendibleHashTable<u64, u64>> = Arc::new(ExtendibleHashTable::new(4));
    let mut handles = Vec::new();

    for t in 0..4u64 {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            for i in 0..250u64 {
                let key = t * 250 + i;
                table.insert(key, key + 1);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for key in 0..1000u64 {
        assert_eq!(table.find(&key), Some(key + 1), "lost key {}", key);
    }
}
