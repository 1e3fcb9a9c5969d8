//! Bounded, arrival-ordered sample history.

use crate::domain::Sample;
use std::collections::VecDeque;

/// Strict FIFO ring of recent samples.
///
/// Order is arrival order, not timestamp order. Duplicates are kept.
#[derive(Debug, Clone)]
pub struct History {
    buf: VecDeque<Sample>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, then drop the oldest entries until within capacity.
    pub fn push(&mut self, sample: Sample) {
        self.buf.push_back(sample);
        while self.buf.len() > self.capacity {
            self.buf.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.buf.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.buf.iter()
    }

    pub fn to_vec(&self) -> Vec<Sample> {
        self.buf.iter().cloned().collect()
    }
}
