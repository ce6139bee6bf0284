use super::replacer::{FrameId, Replacer};
use parking_lot::Mutex;

const BITS_PER_WORD: usize = 64;
const NIL: u32 = u32::MAX;

/// Per-frame position in the unpinned queue. Frame ids are dense, so this
/// array doubles as the frame-to-position index.
#[derive(Debug, Clone, Copy)]
struct Link {
    prev: u32,
    next: u32,
}

#[derive(Debug)]
struct LruState {
    /// One bit per frame, 1 = pinned. Answers the pin test without
    /// touching the queue.
    pin_bits: Vec<u64>,
    links: Vec<Link>,
    head: u32,
    tail: u32,
    /// Count of currently unpinned frames; equals the queue length.
    unpinned: usize,
}

impl LruState {
    fn pin_bit(&self, frame_id: FrameId) -> bool {
        let idx = frame_id as usize;
        self.pin_bits[idx / BITS_PER_WORD] & (1u64 << (idx % BITS_PER_WORD)) != 0
    }

    fn set_pin_bit(&mut self, frame_id: FrameId) {
        let idx = frame_id as usize;
        self.pin_bits[idx / BITS_PER_WORD] |= 1u64 << (idx % BITS_PER_WORD);
    }

    fn clear_pin_bit(&mut self, frame_id: FrameId) {
        let idx = frame_id as usize;
        self.pin_bits[idx / BITS_PER_WORD] &= !(1u64 << (idx % BITS_PER_WORD));
    }

    fn unlink(&mut self, frame_id: FrameId) {
        let Link { prev, next } = self.links[frame_id as usize];
        match prev {
            NIL => self.head = next,
            p => self.links[p as usize].next = next,
        }
        match next {
            NIL => self.tail = prev,
            n => self.links[n as usize].prev = prev,
        }
        self.links[frame_id as usize] = Link {
            prev: NIL,
            next: NIL,
        };
    }

    fn push_tail(&mut self, frame_id: FrameId) {
        self.links[frame_id as usize] = Link {
            prev: self.tail,
            next: NIL,
        };
        match self.tail {
            NIL => self.head = frame_id,
            t => self.links[t as usize].next = frame_id,
        }
        self.tail = frame_id;
    }
}

/// Strict LRU replacer: the frame whose most recent unpin is oldest is
/// evicted first. The unpinned queue is an intrusive doubly-linked list
/// threaded through a dense per-frame link array, giving O(1) victim,
/// arbitrary-position removal, and tail insertion.
#[derive(Debug)]
pub struct LruReplacer {
    state: Mutex<LruState>,
    num_frames: usize,
}

impl LruReplacer {
    /// Every frame starts conceptually pinned (all pin bits set) with an
    /// empty queue.
    pub fn new(num_frames: usize) -> Self {
        let words = num_frames.div_ceil(BITS_PER_WORD);
        Self {
            state: Mutex::new(LruState {
                pin_bits: vec![u64::MAX; words.max(1)],
                links: vec![
                    Link {
                        prev: NIL,
                        next: NIL
                    };
                    num_frames
                ],
                head: NIL,
                tail: NIL,
                unpinned: 0,
            }),
            num_frames,
        }
    }
}

impl Replacer for LruReplacer {
    fn victim(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.unpinned == 0 {
            return None;
        }
        let frame_id = state.head;
        state.unlink(frame_id);
        state.set_pin_bit(frame_id);
        state.unpinned -= 1;
        Some(frame_id)
    }

    fn pin(&self, frame_id: FrameId) {
        assert!((frame_id as usize) < self.num_frames, "frame id out of range");
        let mut state = self.state.lock();
        if state.pin_bit(frame_id) {
            return;
        }
        state.unlink(frame_id);
        state.set_pin_bit(frame_id);
        state.unpinned -= 1;
    }

    fn unpin(&self, frame_id: FrameId) {
        assert!((frame_id as usize) < self.num_frames, "frame id out of range");
        let mut state = self.state.lock();
        if !state.pin_bit(frame_id) {
            return;
        }
        state.clear_pin_bit(frame_id);
        state.push_tail(frame_id);
        state.unpinned += 1;
    }

    fn size(&self) -> usize {
        self.state.lock().unpinned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_lru_order() {
        let replacer = LruReplacer::new(8);

        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.victim(), None);

        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_pin_removes_from_queue() {
        let replacer = LruReplacer::new(8);

        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);

        replacer.pin(2);
        assert_eq!(replacer.size(), 2);

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_pin_is_idempotent() {
        let replacer = LruReplacer::new(4);

        // Pinning a never-unpinned frame is a pure bit test.
        replacer.pin(3);
        assert_eq!(replacer.size(), 0);

        replacer.unpin(3);
        replacer.pin(3);
        replacer.pin(3);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn test_unpin_is_idempotent() {
        let replacer = LruReplacer::new(4);

        replacer.unpin(1);
        replacer.unpin(1);
        assert_eq!(replacer.size(), 1);

        // The queue position must not change on a duplicate unpin.
        replacer.unpin(2);
        replacer.unpin(1);
        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
    }

    #[test]
    fn test_victim_follows_unpin_recency() {
        let replacer = LruReplacer::new(8);

        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);

        // Re-pinning and unpinning frame 1 moves it to the queue tail.
        replacer.pin(1);
        replacer.unpin(1);

        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), Some(1));
    }

    #[test]
    fn test_victim_frame_is_pinned_again() {
        let replacer = LruReplacer::new(4);

        replacer.unpin(0);
        assert_eq!(replacer.victim(), Some(0));

        // The evicted frame went back to the pinned state, so it can be
        // unpinned afresh.
        replacer.unpin(0);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(0));
    }

    #[test]
    fn test_interleaved_accounting() {
        let replacer = LruReplacer::new(16);

        for id in 0..10 {
            replacer.unpin(id);
        }
        for id in (0..10).step_by(2) {
            replacer.pin(id);
        }
        assert_eq!(replacer.size(), 5);

        let mut victims = Vec::new();
        while let Some(id) = replacer.victim() {
            victims.push(id);
        }
        assert_eq!(victims, vec![1, 3, 5, 7, 9]);
    }
}
