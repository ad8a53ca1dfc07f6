use std::sync::Arc;

use basalt::buffer::BufferPoolManager;
use basalt::common::{PageId, RecordId, SlotId};
use basalt::concurrency::Transaction;
use basalt::index::{BPlusTree, IntegerComparator};
use basalt::storage::disk::DiskManager;

fn main() {
    env_logger::init();

    println!("Basalt - a disk-oriented storage engine core");
    println!("============================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("Failed to create disk manager"));
    println!("Created disk manager for: {}", db_path);

    // Buffer pool with 64 frames and LRU-2 replacement
    let bpm = Arc::new(BufferPoolManager::new(64, 2, Arc::clone(&disk_manager)));
    println!("Created buffer pool manager with 64 frames\n");

    let tree = BPlusTree::with_max_sizes("demo_index", Arc::clone(&bpm), IntegerComparator, 8, 8)
        .expect("Failed to open index");

    // Insert a batch of keys
    for key in (0..200u64).rev() {
        let rid = RecordId::new(PageId::new(key as u32), SlotId::new(0));
        let mut txn = Transaction::new();
        tree.insert(key, rid, &mut txn).expect("insert failed");
    }
    println!("Inserted 200 keys (reverse order)");
    println!("Root page: {}", tree.root_page_id());

    // Point lookups
    for key in [0u64, 77, 199] {
        let values = tree.get_value(key).expect("lookup failed");
        println!("get_value({}) -> {:?}", key, values);
    }

    // Range scan from 190 upward
    print!("Keys >= 190:");
    let mut iter = tree.begin_at(190).expect("begin failed");
    while let Some((key, _)) = iter.current() {
        print!(" {}", key);
        iter.advance().expect("advance failed");
    }
    println!();

    // Remove every even key
    for key in (0..200u64).filter(|k| k % 2 == 0) {
        let mut txn = Transaction::new();
        tree.remove(key, &mut txn).expect("remove failed");
    }
    let remaining = tree.begin().expect("begin failed").count();
    println!("After removing even keys, {} keys remain", remaining);

    bpm.flush_all_pages().expect("flush failed");
    println!(
        "\nDisk stats: {} reads, {} writes",
        disk_manager.num_reads(),
        disk_manager.num_writes()
    );

    std::fs::remove_file(db_path).ok();
    println!("Demo completed successfully!");
}
