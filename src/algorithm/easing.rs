//! Quadratic easing curves used by camera transitions.

use crate::models::prediction::TransitionKind;

/// Maps linear progress `p` to eased progress. `p` is clamped to `[0, 1]` first.
pub fn ease(kind: TransitionKind, p: f64) -> f64 {
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
    match kind {
        TransitionKind::Instant => 1.0,
        TransitionKind::EaseIn => p * p,
        TransitionKind::EaseOut => 1.0 - (1.0 - p) * (1.0 - p),
        TransitionKind::EaseInOut => {
            if p < 0.5 {
                2.0 * p * p
            } else {
                let q = -2.0 * p + 2.0;
                1.0 - q * q / 2.0
            }
        }
    }
}
