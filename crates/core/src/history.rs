//! Bounded rolling history of recent temperature samples.
//!
//! Owned exclusively by the monitor loop; never shared across tasks. The
//! alert composer receives point-in-time snapshots, not the buffer itself.

use std::collections::VecDeque;

/// Number of samples the monitor loop retains by default.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Fixed-capacity FIFO of the most recent temperature samples.
///
/// Appending past capacity evicts the oldest sample, so the buffer always
/// holds the last `capacity` values in arrival order.
#[derive(Debug, Clone)]
pub struct History {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl History {
    /// Create an empty history retaining at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest if the buffer is full.
    pub fn push(&mut self, temp_c: f64) {
        self.samples.push_back(temp_c);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Point-in-time copy of the retained samples, oldest first.
    pub fn snapshot(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
