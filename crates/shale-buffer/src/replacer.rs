//! Page replacement policies for the buffer pool.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use shale_common::FrameId;

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Marks a frame as evictable or pinned.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Selects a victim frame for eviction and stops tracking it.
    ///
    /// Returns None if no frame is evictable.
    fn evict(&self) -> Option<FrameId>;

    /// Stops tracking a frame. Ignored if the frame is pinned or unknown.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// Which of the two replacer queues a frame currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Queue {
    /// Seen fewer than k times; FIFO order, oldest evicted first.
    History,
    /// Promoted at the k-th access; promotion order, oldest evicted first.
    Candidate,
}

#[derive(Debug)]
struct FrameEntry {
    access_count: usize,
    evictable: bool,
    queue: Queue,
}

/// Approximate LRU-K replacement policy.
///
/// Frames seen fewer than k times are considered cold and live in a FIFO
/// history queue; they are evicted first, oldest first. A frame's k-th
/// access promotes it to the candidate queue, where eviction order is the
/// order of promotion. Accesses after the k-th do not reorder the candidate
/// queue, which is where this diverges from textbook LRU-K (the k-th access
/// time is frozen at promotion).
pub struct LruKReplacer {
    num_frames: usize,
    k: usize,
    inner: Mutex<LruKInner>,
}

struct LruKInner {
    entries: HashMap<FrameId, FrameEntry>,
    /// Frames with access_count < k. Front is oldest.
    history: VecDeque<FrameId>,
    /// Promoted frames in promotion order. Front is oldest.
    candidates: VecDeque<FrameId>,
    /// Evictable frames in `history`.
    history_evictable: usize,
    /// Evictable frames in `candidates`.
    candidate_evictable: usize,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer tracking at most `num_frames` frames.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "LRU-K requires k >= 1");
        Self {
            num_frames,
            k,
            inner: Mutex::new(LruKInner {
                entries: HashMap::new(),
                history: VecDeque::new(),
                candidates: VecDeque::new(),
                history_evictable: 0,
                candidate_evictable: 0,
            }),
        }
    }

    /// Returns the maximum number of tracked frames.
    pub fn capacity(&self) -> usize {
        self.num_frames
    }

    fn check_frame_id(&self, frame_id: FrameId) {
        assert!(
            frame_id < self.num_frames,
            "frame id {} out of range for replacer of {} frames",
            frame_id,
            self.num_frames
        );
    }
}

impl LruKInner {
    fn detach(&mut self, frame_id: FrameId, queue: Queue) {
        let q = match queue {
            Queue::History => &mut self.history,
            Queue::Candidate => &mut self.candidates,
        };
        if let Some(pos) = q.iter().position(|&f| f == frame_id) {
            q.remove(pos);
        }
    }

    fn evictable_counter(&mut self, queue: Queue) -> &mut usize {
        match queue {
            Queue::History => &mut self.history_evictable,
            Queue::Candidate => &mut self.candidate_evictable,
        }
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&self, frame_id: FrameId) {
        self.check_frame_id(frame_id);
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(&frame_id) {
            inner.entries.insert(
                frame_id,
                FrameEntry {
                    access_count: 1,
                    evictable: false,
                    queue: Queue::History,
                },
            );
            inner.history.push_back(frame_id);
            return;
        }

        let mut promoted_evictable = None;
        if let Some(entry) = inner.entries.get_mut(&frame_id) {
            entry.access_count += 1;
            if entry.access_count >= self.k && entry.queue == Queue::History {
                entry.queue = Queue::Candidate;
                promoted_evictable = Some(entry.evictable);
            }
            // Accesses beyond the k-th leave the candidate order alone.
        }

        if let Some(evictable) = promoted_evictable {
            inner.detach(frame_id, Queue::History);
            inner.candidates.push_back(frame_id);
            if evictable {
                inner.history_evictable -= 1;
                inner.candidate_evictable += 1;
            }
        }
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        self.check_frame_id(frame_id);
        let mut inner = self.inner.lock();

        let queue = match inner.entries.get_mut(&frame_id) {
            Some(entry) if entry.evictable != evictable => {
                entry.evictable = evictable;
                entry.queue
            }
            _ => return,
        };
        let counter = inner.evictable_counter(queue);
        if evictable {
            *counter += 1;
        } else {
            *counter -= 1;
        }
    }

    fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.history_evictable + inner.candidate_evictable == 0 {
            return None;
        }

        for queue in [Queue::History, Queue::Candidate] {
            let q = match queue {
                Queue::History => &inner.history,
                Queue::Candidate => &inner.candidates,
            };
            let victim = q
                .iter()
                .copied()
                .find(|f| inner.entries[f].evictable);
            if let Some(frame_id) = victim {
                inner.detach(frame_id, queue);
                inner.entries.remove(&frame_id);
                *inner.evictable_counter(queue) -= 1;
                return Some(frame_id);
            }
        }
        None
    }

    fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let queue = match inner.entries.get(&frame_id) {
            Some(entry) if entry.evictable => entry.queue,
            _ => return,
        };
        inner.detach(frame_id, queue);
        inner.entries.remove(&frame_id);
        *inner.evictable_counter(queue) -= 1;
    }

    fn size(&self) -> usize {
        let inner = self.inner.lock();
        inner.history_evictable + inner.candidate_evictable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_k_new() {
        let replacer = LruKReplacer::new(10, 2);
        assert_eq!(replacer.capacity(), 10);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_k_evict_empty() {
        let replacer = LruKReplacer::new(10, 2);
        assert!(replacer.evict().is_none());
    }

    #[test]
    fn test_lru_k_new_frames_not_evictable() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(0);
        replacer.record_access(1);
        assert_eq!(replacer.size(), 0);
        assert!(replacer.evict().is_none());
    }

    #[test]
    fn test_lru_k_cold_frames_evicted_fifo() {
        let replacer = LruKReplacer::new(10, 2);

        for f in [3, 1, 4] {
            replacer.record_access(f);
            replacer.set_evictable(f, true);
        }
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(4));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_k_promotion_order() {
        // Accesses A,B,C,A,B with k = 2: C stays cold, A and B are promoted
        // in that order. Eviction order must be C, A, B.
        let (a, b, c) = (0, 1, 2);
        let replacer = LruKReplacer::new(10, 2);

        for f in [a, b, c, a, b] {
            replacer.record_access(f);
        }
        for f in [a, b, c] {
            replacer.set_evictable(f, true);
        }
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.evict(), Some(c));
        assert_eq!(replacer.evict(), Some(a));
        assert_eq!(replacer.evict(), Some(b));
    }

    #[test]
    fn test_lru_k_no_reorder_after_promotion() {
        // Once promoted, later accesses must not change the eviction order.
        let replacer = LruKReplacer::new(10, 2);

        for f in [0, 1, 0, 1] {
            replacer.record_access(f);
        }
        // Hammer frame 0 after its promotion.
        for _ in 0..5 {
            replacer.record_access(0);
        }
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);

        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_lru_k_pinned_frames_skipped() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(0);
        replacer.record_access(1);
        replacer.set_evictable(1, true);

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(1));
        assert!(replacer.evict().is_none());

        replacer.set_evictable(0, true);
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_lru_k_set_evictable_unknown_is_noop() {
        let replacer = LruKReplacer::new(10, 2);
        replacer.set_evictable(5, true);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_k_set_evictable_unchanged_is_noop() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(0);
        replacer.set_evictable(0, true);
        replacer.set_evictable(0, true);
        assert_eq!(replacer.size(), 1);

        replacer.set_evictable(0, false);
        replacer.set_evictable(0, false);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_k_remove_only_if_evictable() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(0);
        replacer.remove(0); // pinned, silently ignored
        replacer.set_evictable(0, true);
        assert_eq!(replacer.size(), 1);

        replacer.remove(0);
        assert_eq!(replacer.size(), 0);
        assert!(replacer.evict().is_none());
    }

    #[test]
    fn test_lru_k_remove_unknown_is_noop() {
        let replacer = LruKReplacer::new(10, 2);
        replacer.remove(7);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_k_failed_evict_keeps_size() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(0);
        assert!(replacer.evict().is_none());
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_k_reinserted_frame_starts_cold() {
        let replacer = LruKReplacer::new(10, 2);

        // Promote frame 0, then evict it.
        replacer.record_access(0);
        replacer.record_access(0);
        replacer.set_evictable(0, true);
        assert_eq!(replacer.evict(), Some(0));

        // Re-tracked frames start with a fresh history.
        replacer.record_access(0);
        replacer.record_access(1);
        replacer.record_access(1);
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);

        // 0 is cold (one access), 1 is promoted: 0 goes first.
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_lru_k_interleaved_pin_unpin() {
        let replacer = LruKReplacer::new(8, 2);

        for f in 0..4 {
            replacer.record_access(f);
            replacer.set_evictable(f, true);
        }
        assert_eq!(replacer.size(), 4);

        replacer.set_evictable(0, false);
        assert_eq!(replacer.size(), 3);

        // Oldest evictable history frame is now 1.
        assert_eq!(replacer.evict(), Some(1));

        replacer.set_evictable(0, true);
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert!(replacer.evict().is_none());
    }

    #[test]
    #[should_panic]
    fn test_lru_k_record_access_out_of_range_panics() {
        let replacer = LruKReplacer::new(5, 2);
        replacer.record_access(5);
    }

    #[test]
    #[should_panic]
    fn test_lru_k_set_evictable_out_of_range_panics() {
        let replacer = LruKReplacer::new(5, 2);
        replacer.set_evictable(100, true);
    }
}
