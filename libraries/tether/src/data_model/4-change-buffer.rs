//! # ChangeBuffer
//! Consumers drain changes at a fixed rate (a batch per window) rather than as fast as they arrive.
//! The buffer in between is bounded: when it is full, the oldest buffered change is evicted.

use std::collections::VecDeque;

use crate::data_model::ChangeEvent;

#[derive(Debug)]
pub struct ChangeBuffer {
    queue: VecDeque<ChangeEvent>,
    capacity: usize,
    dropped: u64,
}

impl ChangeBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Returns the evicted change, if the buffer was full.
    pub fn push(&mut self, change: ChangeEvent) -> Option<ChangeEvent> {
        let evicted = if self.queue.len() >= self.capacity {
            self.queue.pop_front()
        } else {
            None
        };
        if let Some(evicted) = &evicted {
            self.dropped += 1;
            log::warn!(
                "Change buffer full ({} entries), dropping change for {:?}",
                self.capacity,
                evicted.key
            );
        }
        self.queue.push_back(change);
        evicted
    }

    /// Removes up to `max` changes, oldest first.
    pub fn drain(&mut self, max: usize) -> Vec<ChangeEvent> {
        let n = max.min(self.queue.len());
        self.queue.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of changes evicted since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
