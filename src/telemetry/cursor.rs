//! Per-frame cursor tracking.
//!
//! The frame thread is the only writer. The predictor works on an owned snapshot, so a
//! prediction in flight never observes the ring being mutated.

use std::collections::VecDeque;

use crate::models::cursor::CursorSample;
use crate::models::geometry::{Point, Velocity};

/// ~1s of history at 60fps.
pub const HISTORY_CAPACITY: usize = 60;

/// Fixed-capacity ring; the oldest sample is evicted first.
#[derive(Debug, Clone)]
pub struct CursorHistory {
    samples: VecDeque<CursorSample>,
    capacity: usize,
}

impl Default for CursorHistory {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl CursorHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn update_history(&mut self, sample: CursorSample) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn clear_history(&mut self) {
        self.samples.clear();
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

    pub fn latest(&self) -> Option<&CursorSample> {
        self.samples.back()
    }

    /// Owned copy, oldest first.
    pub fn snapshot(&self) -> Vec<CursorSample> {
        self.samples.iter().copied().collect()
    }
}

/// Builds a [`CursorSample`] per captured frame and keeps the history ring.
#[derive(Debug, Default)]
pub struct CursorTracker {
    history: CursorHistory,
}

impl CursorTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: CursorHistory::with_capacity(capacity),
        }
    }

    /// Velocity comes from the delta against the previous sample; zero for the first one or
    /// when time did not advance.
    pub fn record(&mut self, position: Point, timestamp: f64) -> CursorSample {
        let velocity = match self.history.latest() {
            Some(previous) => Velocity::between(
                previous.position,
                position,
                timestamp - previous.timestamp,
            ),
            None => Velocity::ZERO,
        };
        let sample = CursorSample::new(position, timestamp, velocity);
        self.history.update_history(sample);
        sample
    }

    pub fn history(&self) -> &CursorHistory {
        &self.history
    }

    pub fn snapshot(&self) -> Vec<CursorSample> {
        self.history.snapshot()
    }

    pub fn clear(&mut self) {
        self.history.clear_history();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_keeps_most_recent_sixty_in_order() {
        let mut history = CursorHistory::default();
        for i in 0..75 {
            history.update_history(CursorSample::at_rest(Point::new(i as f64, 0.0), i as f64));
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
        let snapshot = history.snapshot();
        assert_eq!(snapshot.first().map(|s| s.timestamp), Some(15.0));
        assert_eq!(snapshot.last().map(|s| s.timestamp), Some(74.0));
        assert!(snapshot
            .windows(2)
            .all(|pair| pair[0].timestamp < pair[1].timestamp));
    }

    #[test]
    fn tracker_derives_velocity_from_previous_sample() {
        let mut tracker = CursorTracker::default();
        let first = tracker.record(Point::new(0.0, 0.0), 1.0);
        assert_eq!(first.velocity, Velocity::ZERO);

        let second = tracker.record(Point::new(50.0, -20.0), 1.1);
        assert!((second.velocity.vx - 500.0).abs() < 1e-6);
        assert!((second.velocity.vy + 200.0).abs() < 1e-6);

        // Duplicate timestamp.
        let third = tracker.record(Point::new(60.0, -20.0), 1.1);
        assert_eq!(third.velocity, Velocity::ZERO);
        assert_eq!(tracker.history().len(), 3);
    }

    #[test]
    fn snapshot_is_detached_from_the_ring() {
        let mut tracker = CursorTracker::default();
        tracker.record(Point::new(1.0, 1.0), 0.0);
        let snapshot = tracker.snapshot();
        tracker.record(Point::new(2.0, 2.0), 0.016);
        tracker.clear();
        assert_eq!(snapshot.len(), 1);
        assert!(tracker.history().is_empty());
    }
}
