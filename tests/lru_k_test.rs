//! Integration tests for the LRU-K replacer

use basalt::buffer::LruKReplacer;
use basalt::common::FrameId;

#[test]
fn test_lru_k_eviction_order() {
    let replacer = LruKReplacer::new(2, 10);

    for i in 0..5 {
        replacer.record_access(FrameId::new(i));
        replacer.set_evictable(FrameId::new(i), true);
    }

    assert_eq!(replacer.size(), 5);

    // All frames have a single access (< k=2), so eviction follows the
    // first-access order.
    for i in 0..5 {
        assert_eq!(replacer.evict(), Some(FrameId::new(i)));
    }

    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_respects_k_distance() {
    let replacer = LruKReplacer::new(2, 10);

    // Frame 0: accessed once (+inf k-distance)
    replacer.record_access(FrameId::new(0));

    // Frames 1 and 2: accessed twice (finite k-distance)
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(2));
    replacer.record_access(FrameId::new(2));

    replacer.set_evictable(FrameId::new(0), true);
    replacer.set_evictable(FrameId::new(1), true);
    replacer.set_evictable(FrameId::new(2), true);

    // +inf first, then the larger finite distance.
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
}

#[test]
fn test_lru_k_scan_resistance() {
    let replacer = LruKReplacer::new(2, 10);

    // A frequently re-read frame...
    replacer.record_access(FrameId::new(0));
    replacer.record_access(FrameId::new(0));

    // ...followed by a burst of single-access frames (a scan).
    for i in 1..5 {
        replacer.record_access(FrameId::new(i));
    }

    for i in 0..5 {
        replacer.set_evictable(FrameId::new(i), true);
    }

    // The scanned-once frames go first even though frame 0 is older.
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    assert_eq!(replacer.evict(), Some(FrameId::new(3)));
    assert_eq!(replacer.evict(), Some(FrameId::new(4)));
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
}

#[test]
fn test_lru_k_pinned_frames_not_evicted() {
    let replacer = LruKReplacer::new(2, 10);

    replacer.record_access(FrameId::new(0));
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(2));

    replacer.set_evictable(FrameId::new(1), true);
    replacer.set_evictable(FrameId::new(2), true);

    assert_eq!(replacer.size(), 2);

    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_toggle_evictable() {
    let replacer = LruKReplacer::new(2, 10);

    replacer.record_access(FrameId::new(0));
    replacer.set_evictable(FrameId::new(0), true);
    assert_eq!(replacer.size(), 1);

    replacer.set_evictable(FrameId::new(0), false);
    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);

    replacer.set_evictable(FrameId::new(0), true);
    assert_eq!(replacer.size(), 1);
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
}

#[test]
fn test_lru_k_remove_unknown_is_noop() {
    let replacer = LruKReplacer::new(2, 10);

    replacer.record_access(FrameId::new(0));
    replacer.set_evictable(FrameId::new(0), true);

    replacer.remove(FrameId::new(7));
    assert_eq!(replacer.size(), 1);

    replacer.remove(FrameId::new(0));
    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_set_evictable_unknown_is_noop() {
    let replacer = LruKReplacer::new(2, 10);

    replacer.set_evictable(FrameId::new(3), true);
    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);
}

#[test]
#[should_panic]
fn test_lru_k_set_evictable_out_of_range_aborts() {
    let replacer = LruKReplacer::new(2, 8);
    replacer.set_evictable(FrameId::new(8), true);
}

#[test]
fn test_lru_k_interleaved_workload() {
    let replacer = LruKReplacer::new(2, 10);

    // Classic access sequence: [1,2,3,4,1,5].
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(2));
    replacer.record_access(FrameId::new(3));
    replacer.record_access(FrameId::new(4));
    replacer.record_access(FrameId::new(1));
    replacer.record_access(FrameId::new(5));

    for i in 1..=5 {
        replacer.set_evictable(FrameId::new(i), true);
    }

    // Frames 2,3,4,5 have +inf distance in access order; frame 1 has a
    // finite distance and goes last.
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    assert_eq!(replacer.evict(), Some(FrameId::new(3)));
    assert_eq!(replacer.evict(), Some(FrameId::new(4)));
    assert_eq!(replacer.evict(), Some(FrameId::new(5)));
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), None);
}
