//! Cursor samples recorded once per captured frame.

use serde::{Deserialize, Serialize};

use super::geometry::{Point, Velocity};

/// One cursor observation. Immutable once built by the cursor tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorSample {
    pub position: Point,
    /// Monotonic capture time in seconds.
    pub timestamp: f64,
    /// px/sec, derived from the delta against the previous sample.
    pub velocity: Velocity,
}

impl CursorSample {
    pub fn new(position: Point, timestamp: f64, velocity: Velocity) -> Self {
        Self {
            position,
            timestamp,
            velocity,
        }
    }

    pub fn at_rest(position: Point, timestamp: f64) -> Self {
        Self::new(position, timestamp, Velocity::ZERO)
    }
}
