//! Observable pipeline events.
//!
//! Delivered through a bounded channel so observers (UI, diagnostics) can follow camera
//! motion and degradations without polling. A slow observer loses events; it never stalls
//! the frame thread.

use serde::{Deserialize, Serialize};

use super::geometry::Rect;
use super::prediction::TransitionKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEvent {
    SessionStarted {
        #[serde(rename = "sessionId", alias = "session_id")]
        session_id: String,
        width: u32,
        height: u32,
    },
    /// Camera started moving toward a new committed target.
    TransitionStarted {
        kind: TransitionKind,
        #[serde(rename = "targetZone", alias = "target_zone")]
        target_zone: Rect,
        #[serde(rename = "targetZoom", alias = "target_zoom")]
        target_zoom: f64,
    },
    TransitionProgress {
        /// Eased progress in `[0, 1]`.
        progress: f64,
    },
    TransitionCompleted {
        zone: Rect,
        zoom: f64,
    },
    PredictionApplied {
        generation: u64,
        confidence: f64,
    },
    /// A prediction lost the "latest wins" race or arrived after teardown.
    PredictionDiscarded {
        generation: u64,
    },
    InferenceOverrun {
        generation: u64,
        #[serde(rename = "elapsedMs", alias = "elapsed_ms")]
        elapsed_ms: u64,
    },
    /// A frame was forwarded untransformed after a recoverable failure.
    FrameFallback {
        #[serde(rename = "frameIndex", alias = "frame_index")]
        frame_index: u64,
        reason: String,
    },
    PoolExhausted {
        capacity: usize,
        /// True when a one-off buffer was allocated outside the pool.
        fallback: bool,
    },
    PoolReconfigured {
        width: u32,
        height: u32,
        capacity: usize,
    },
    SessionStopped {
        #[serde(rename = "sessionId", alias = "session_id")]
        session_id: String,
        frames: u64,
    },
}
