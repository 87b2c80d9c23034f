//! Cursor trajectory prediction.
//!
//! A predictor turns recent cursor history into a [`FocusZonePrediction`]: where attention
//! will be in a short horizon, how tightly to frame it and how to animate there. The heuristic
//! baseline extrapolates average velocity; a learned model plugs in behind the same trait.

use std::time::Duration;

use thiserror::Error;

use crate::models::cursor::CursorSample;
use crate::models::geometry::{Point, Rect, Velocity};
use crate::models::prediction::{FocusZonePrediction, TransitionKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PredictionError {
    #[error("invalid prediction input: {0}")]
    InvalidInput(String),

    #[error("prediction model failed to load: {0}")]
    ModelLoadFailed(String),
}

/// Pure computation over a history snapshot. Implementations never block on I/O.
pub trait TrajectoryPredictor: Send + Sync {
    fn name(&self) -> &str;

    /// Called once at session start, before the first `predict`.
    fn warm_up(&self) -> Result<(), PredictionError> {
        Ok(())
    }

    /// `history` is ordered oldest first; `bounds` is the source-frame extent.
    fn predict(
        &self,
        history: &[CursorSample],
        current: Point,
        bounds: Rect,
    ) -> Result<FocusZonePrediction, PredictionError>;
}

#[derive(Debug, Clone)]
pub struct HeuristicConfig {
    pub horizon_secs: f64,
    pub velocity_window: usize,
    pub base_zone_px: f64,
    pub zone_growth_px: f64,
    pub speed_normalization_px_per_s: f64,
    pub slow_speed_px_per_s: f64,
    pub min_samples_for_confidence: usize,
    pub default_confidence: f64,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            horizon_secs: 0.3,
            velocity_window: 10,
            base_zone_px: 400.0,
            zone_growth_px: 200.0,
            speed_normalization_px_per_s: 500.0,
            slow_speed_px_per_s: 50.0,
            min_samples_for_confidence: 5,
            default_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeuristicPredictor {
    config: HeuristicConfig,
}

impl HeuristicPredictor {
    pub fn new(config: HeuristicConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HeuristicConfig {
        &self.config
    }

    fn window<'a>(&self, history: &'a [CursorSample]) -> &'a [CursorSample] {
        let take = self.config.velocity_window.max(2).min(history.len());
        &history[history.len() - take..]
    }

    fn suggested_zoom(&self, speed: f64) -> f64 {
        let slow = self.config.slow_speed_px_per_s;
        if speed < slow {
            1.6
        } else if speed < slow * 3.0 {
            1.4
        } else {
            1.2
        }
    }

    fn suggested_transition(&self, speed: f64) -> TransitionKind {
        let slow = self.config.slow_speed_px_per_s;
        if speed < slow {
            TransitionKind::EaseInOut
        } else if speed < slow * 2.0 {
            TransitionKind::EaseOut
        } else {
            TransitionKind::EaseIn
        }
    }

    fn confidence(&self, velocities: &[Velocity], sample_count: usize) -> f64 {
        if sample_count < self.config.min_samples_for_confidence || velocities.is_empty() {
            return self.config.default_confidence;
        }
        let mean = average(velocities);
        let variance = velocities
            .iter()
            .map(|v| {
                let dx = v.vx - mean.vx;
                let dy = v.vy - mean.vy;
                dx * dx + dy * dy
            })
            .sum::<f64>()
            / velocities.len() as f64;
        let norm = self.config.speed_normalization_px_per_s;
        let normalized = (variance / (norm * norm)).clamp(0.0, 1.0);
        (1.0 - 0.5 * normalized).clamp(0.0, 1.0)
    }
}

impl TrajectoryPredictor for HeuristicPredictor {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn predict(
        &self,
        history: &[CursorSample],
        current: Point,
        bounds: Rect,
    ) -> Result<FocusZonePrediction, PredictionError> {
        if !current.is_finite() {
            return Err(PredictionError::InvalidInput(format!(
                "cursor position is not finite: {current:?}"
            )));
        }
        if !bounds.is_finite() || bounds.width <= 0.0 || bounds.height <= 0.0 {
            return Err(PredictionError::InvalidInput(format!(
                "frame bounds are empty: {}x{}",
                bounds.width, bounds.height
            )));
        }

        let window = self.window(history);
        let velocities = interval_velocities(window);
        let velocity = if velocities.is_empty() {
            Velocity::ZERO
        } else {
            average(&velocities)
        };
        let speed = velocity.speed();

        let predicted = current.offset(velocity, self.config.horizon_secs);
        let growth = (speed / self.config.speed_normalization_px_per_s).clamp(0.0, 1.0);
        let side = self.config.base_zone_px + self.config.zone_growth_px * growth;
        let zone = Rect::from_center(predicted, side, side).clamp_within(bounds);

        Ok(FocusZonePrediction {
            zone,
            confidence: self.confidence(&velocities, window.len()),
            suggested_zoom: self.suggested_zoom(speed),
            suggested_transition: self.suggested_transition(speed),
            valid_for: Duration::from_secs_f64(self.config.horizon_secs.max(0.0)),
        })
    }
}

/// Velocity across each consecutive pair; pairs with a non-positive time step are skipped.
fn interval_velocities(samples: &[CursorSample]) -> Vec<Velocity> {
    samples
        .windows(2)
        .filter(|pair| pair[1].timestamp > pair[0].timestamp)
        .map(|pair| {
            Velocity::between(
                pair[0].position,
                pair[1].position,
                pair[1].timestamp - pair[0].timestamp,
            )
        })
        .filter(|v| v.vx.is_finite() && v.vy.is_finite())
        .collect()
}

fn average(velocities: &[Velocity]) -> Velocity {
    let n = velocities.len().max(1) as f64;
    let (sx, sy) = velocities
        .iter()
        .fold((0.0, 0.0), |(sx, sy), v| (sx + v.vx, sy + v.vy));
    Velocity::new(sx / n, sy / n)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Rect = Rect::new(0.0, 0.0, 1_920.0, 1_080.0);

    fn sample(x: f64, y: f64, t: f64) -> CursorSample {
        CursorSample::at_rest(Point::new(x, y), t)
    }

    #[test]
    fn scenario_1_fast_motion_leads_along_velocity() {
        let history = vec![sample(0.0, 500.0, 10.0), sample(100.0, 500.0, 10.1)];
        let current = Point::new(100.0, 500.0);
        let prediction = HeuristicPredictor::default()
            .predict(&history, current, FRAME)
            .expect("prediction");

        let lead = prediction.zone.center().x - current.x;
        assert!((lead - 300.0).abs() < 1e-6, "lead was {lead}");
        assert!((prediction.zone.center().y - 500.0).abs() < 1e-6);
        assert!(prediction.suggested_zoom <= 1.2);
        assert_eq!(prediction.suggested_transition, TransitionKind::EaseIn);
        // Fewer than five samples.
        assert_eq!(prediction.confidence, 0.5);
        // Full speed normalization: 400 + 200.
        assert!((prediction.zone.width - 600.0).abs() < 1e-9);
    }

    #[test]
    fn scenario_2_stationary_cursor_zooms_in_gently() {
        let history: Vec<CursorSample> = (0..12)
            .map(|i| sample(640.0, 360.0, i as f64 / 60.0))
            .collect();
        let prediction = HeuristicPredictor::default()
            .predict(&history, Point::new(640.0, 360.0), FRAME)
            .expect("prediction");

        assert_eq!(prediction.suggested_zoom, 1.6);
        assert_eq!(prediction.suggested_transition, TransitionKind::EaseInOut);
        assert!(prediction.confidence >= 0.9);
        assert_eq!(prediction.zone, Rect::new(440.0, 160.0, 400.0, 400.0));
    }

    #[test]
    fn medium_speed_picks_middle_zoom_and_ease_out() {
        // 60px/s along y.
        let history: Vec<CursorSample> = (0..6)
            .map(|i| sample(500.0, 300.0 + i as f64 * 6.0, i as f64 * 0.1))
            .collect();
        let prediction = HeuristicPredictor::default()
            .predict(&history, Point::new(500.0, 330.0), FRAME)
            .expect("prediction");
        assert_eq!(prediction.suggested_zoom, 1.4);
        assert_eq!(prediction.suggested_transition, TransitionKind::EaseOut);
    }

    #[test]
    fn empty_or_single_sample_history_predicts_in_place() {
        let predictor = HeuristicPredictor::default();
        let current = Point::new(900.0, 500.0);
        for history in [vec![], vec![sample(10.0, 10.0, 1.0)]] {
            let prediction = predictor
                .predict(&history, current, FRAME)
                .expect("prediction");
            assert_eq!(prediction.zone.center(), current);
            assert_eq!(prediction.confidence, 0.5);
        }
    }

    #[test]
    fn erratic_motion_lowers_confidence() {
        let history: Vec<CursorSample> = (0..10)
            .map(|i| {
                let x = if i % 2 == 0 { 400.0 } else { 480.0 };
                sample(x, 400.0, i as f64 * 0.1)
            })
            .collect();
        let prediction = HeuristicPredictor::default()
            .predict(&history, Point::new(480.0, 400.0), FRAME)
            .expect("prediction");
        assert!(prediction.confidence < 0.9);
        assert!(prediction.confidence >= 0.5);
    }

    #[test]
    fn only_the_most_recent_window_drives_velocity() {
        // Old fast samples followed by ten stationary ones.
        let mut history: Vec<CursorSample> = (0..20)
            .map(|i| sample(i as f64 * 50.0, 200.0, i as f64 * 0.1))
            .collect();
        let t0 = 2.0;
        history.extend((0..10).map(|i| sample(1_000.0, 200.0, t0 + i as f64 * 0.1)));
        let prediction = HeuristicPredictor::default()
            .predict(&history, Point::new(1_000.0, 200.0), FRAME)
            .expect("prediction");
        assert_eq!(prediction.suggested_zoom, 1.6);
    }

    #[test]
    fn zone_stays_inside_frame_near_edges() {
        let history = vec![sample(1_800.0, 1_000.0, 0.0), sample(1_900.0, 1_070.0, 0.1)];
        let prediction = HeuristicPredictor::default()
            .predict(&history, Point::new(1_900.0, 1_070.0), FRAME)
            .expect("prediction");
        let zone = prediction.zone;
        assert!(zone.x >= 0.0 && zone.y >= 0.0);
        assert!(zone.right() <= FRAME.width + 1e-9);
        assert!(zone.bottom() <= FRAME.height + 1e-9);
    }

    #[test]
    fn rejects_invalid_input() {
        let predictor = HeuristicPredictor::default();
        let err = predictor
            .predict(&[], Point::new(f64::NAN, 0.0), FRAME)
            .expect_err("nan position");
        assert!(matches!(err, PredictionError::InvalidInput(_)));
        let err = predictor
            .predict(&[], Point::new(0.0, 0.0), Rect::new(0.0, 0.0, 0.0, 720.0))
            .expect_err("empty frame");
        assert!(matches!(err, PredictionError::InvalidInput(_)));
    }

    #[test]
    fn prediction_is_valid_for_the_horizon() {
        let prediction = HeuristicPredictor::default()
            .predict(&[], Point::new(100.0, 100.0), FRAME)
            .expect("prediction");
        assert!((prediction.valid_for.as_secs_f64() - 0.3).abs() < 1e-6);
    }
}
