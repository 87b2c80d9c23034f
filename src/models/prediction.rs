//! Output of a trajectory prediction and the transition styles it can suggest.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::geometry::Rect;

/// Easing style used to animate the camera toward a new target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionKind {
    Instant,
    EaseIn,
    EaseOut,
    #[default]
    EaseInOut,
}

/// Where attention is expected to be shortly, plus how to frame it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusZonePrediction {
    pub zone: Rect,
    /// In `[0, 1]`.
    pub confidence: f64,
    /// Always `>= 1.0`.
    pub suggested_zoom: f64,
    pub suggested_transition: TransitionKind,
    pub valid_for: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_kind_uses_kebab_case() {
        let json = serde_json::to_string(&TransitionKind::EaseInOut).expect("serialize kind");
        assert_eq!(json, "\"ease-in-out\"");
        let kind: TransitionKind = serde_json::from_str("\"ease-in\"").expect("deserialize kind");
        assert_eq!(kind, TransitionKind::EaseIn);
    }
}
