use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, Timestamp};

/// Tracks access history for a single frame
#[derive(Debug)]
struct FrameRecord {
    /// Ring of the K most recent access timestamps (most recent at back)
    history: VecDeque<Timestamp>,
    /// Whether this frame is currently evictable
    is_evictable: bool,
}

impl FrameRecord {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }
}

/// State guarded by the replacer latch. Two ordered structures drive
/// eviction: a FIFO queue of frames with fewer than K accesses (earliest
/// first access at the front) and a map of the remaining frames keyed by
/// their K-th most recent access timestamp.
struct ReplacerInner {
    records: HashMap<FrameId, FrameRecord>,
    fifo: VecDeque<FrameId>,
    lru: BTreeMap<Timestamp, FrameId>,
    /// Number of evictable frames
    curr_size: usize,
    /// Logical clock, advanced on every recorded access
    current_timestamp: Timestamp,
}

/// LRU-K Replacement Policy
///
/// Evicts the frame whose backward k-distance is the maximum over all
/// evictable frames. Backward k-distance is the difference between the
/// current timestamp and the timestamp of the k-th previous access.
///
/// A frame with fewer than k accesses has +inf backward k-distance; among
/// those, the frame with the earliest overall access timestamp is evicted
/// first (classic FIFO among the +inf set).
pub struct LruKReplacer {
    k: usize,
    /// Maximum number of frames the replacer can track
    capacity: usize,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    pub fn new(k: usize, capacity: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            k,
            capacity,
            inner: Mutex::new(ReplacerInner {
                records: HashMap::new(),
                fifo: VecDeque::new(),
                lru: BTreeMap::new(),
                curr_size: 0,
                current_timestamp: 0,
            }),
        }
    }

    /// Evicts the frame with the largest backward k-distance.
    /// Returns None if there are no evictable frames.
    pub fn evict(&self) -> Option<FrameId> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.curr_size == 0 {
            return None;
        }

        // The +inf set first, in first-access order.
        let records = &inner.records;
        if let Some(pos) = inner.fifo.iter().position(|f| records[f].is_evictable) {
            let frame_id = inner.fifo.remove(pos).unwrap();
            inner.records.remove(&frame_id);
            inner.curr_size -= 1;
            return Some(frame_id);
        }

        // Then the finite set: smallest k-th-recent timestamp means
        // largest backward k-distance.
        let victim = inner
            .lru
            .iter()
            .map(|(ts, f)| (*ts, *f))
            .find(|(_, f)| records[f].is_evictable);
        if let Some((ts, frame_id)) = victim {
            inner.lru.remove(&ts);
            inner.records.remove(&frame_id);
            inner.curr_size -= 1;
            return Some(frame_id);
        }

        None
    }

    /// Records an access to the given frame at the current timestamp.
    /// Aborts if the frame id is outside the replacer's capacity.
    pub fn record_access(&self, frame_id: FrameId) {
        assert!(
            frame_id.as_usize() < self.capacity,
            "frame id {} out of range (capacity {})",
            frame_id,
            self.capacity
        );

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let timestamp = inner.current_timestamp;
        inner.current_timestamp += 1;

        let record = inner
            .records
            .entry(frame_id)
            .or_insert_with(FrameRecord::new);
        record.history.push_back(timestamp);
        let n_access = record.history.len();

        if n_access == 1 {
            inner.fifo.push_back(frame_id);
        } else if n_access == self.k {
            // Graduates from the FIFO queue to the LRU queue.
            let kth_recent = *record.history.front().unwrap();
            if let Some(pos) = inner.fifo.iter().position(|&f| f == frame_id) {
                inner.fifo.remove(pos);
            }
            inner.lru.insert(kth_recent, frame_id);
        } else if n_access > self.k {
            // Reposition: the old k-th-recent timestamp falls off the ring.
            let old_kth = record.history.pop_front().unwrap();
            let new_kth = *record.history.front().unwrap();
            inner.lru.remove(&old_kth);
            inner.lru.insert(new_kth, frame_id);
        }
    }

    /// Sets whether a frame is evictable. Unknown frames are a no-op.
    /// Aborts if the frame id is outside the replacer's capacity.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) {
        assert!(
            frame_id.as_usize() < self.capacity,
            "frame id {} out of range (capacity {})",
            frame_id,
            self.capacity
        );

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(record) = inner.records.get_mut(&frame_id) else {
            return;
        };
        if record.is_evictable != is_evictable {
            record.is_evictable = is_evictable;
            if is_evictable {
                inner.curr_size += 1;
            } else {
                inner.curr_size -= 1;
            }
        }
    }

    /// Drops a frame's record entirely. Unknown frames are a no-op;
    /// removing a non-evictable frame is a contract violation.
    pub fn remove(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(record) = inner.records.get(&frame_id) else {
            return;
        };
        assert!(
            record.is_evictable,
            "cannot remove non-evictable frame {}",
            frame_id
        );

        if record.history.len() < self.k {
            if let Some(pos) = inner.fifo.iter().position(|&f| f == frame_id) {
                inner.fifo.remove(pos);
            }
        } else {
            let kth_recent = *record.history.front().unwrap();
            inner.lru.remove(&kth_recent);
        }
        inner.records.remove(&frame_id);
        inner.curr_size -= 1;
    }

    /// Returns the number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }

    pub fn k(&self) -> usize {
        self.k
    }
}
