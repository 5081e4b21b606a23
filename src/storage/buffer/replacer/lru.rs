use std::collections::VecDeque;
use crate::common::types::FrameId;

/// Simple LRU (Least Recently Used) page replacement policy.
/// Only unpinned frames are tracked.
pub struct LRUReplacer {
    lru_list: VecDeque<FrameId>,
}

impl LRUReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            lru_list: VecDeque::with_capacity(pool_size),
        }
    }

    /// Record that a frame became evictable (most recently used)
    pub fn record_access(&mut self, frame_id: FrameId) {
        self.remove(frame_id);
        self.lru_list.push_front(frame_id);
    }

    /// Remove a frame from the replacer
    pub fn remove(&mut self, frame_id: FrameId) {
        if let Some(pos) = self.lru_list.iter().position(|&id| id == frame_id) {
            self.lru_list.remove(pos);
        }
    }

    /// Victim selection: get the least recently used frame
    pub fn victim(&mut self) -> Option<FrameId> {
        self.lru_list.pop_back()
    }

    pub fn len(&self) -> usize {
        self.lru_list.len()
    }
}
