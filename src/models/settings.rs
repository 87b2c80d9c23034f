//! Session configuration. Set once at session start, immutable afterwards.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::rendering::buffer::PixelFormat;

pub const MIN_POOL_CAPACITY: usize = 3;
pub const MAX_POOL_CAPACITY: usize = 5;

/// What the buffer pool does when every pooled buffer is checked out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustionPolicy {
    /// Hand out a one-off heap buffer outside the pool.
    #[default]
    FallbackAllocate,
    /// Fail with `Exhausted` and let the orchestrator pass the raw frame through.
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    /// 0 = take the dimensions of the first captured frame.
    pub source_width: u32,
    /// 0 = take the dimensions of the first captured frame.
    pub source_height: u32,
    pub target_fps: u32,
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub transition_duration_secs: f64,
    /// Fraction of the previous target kept on every new prediction.
    pub damping_factor: f64,
    /// Run the predictor every N captured frames.
    pub prediction_interval: u32,
    pub pool_capacity: usize,
    pub pixel_format: PixelFormat,
    pub exhaustion_policy: ExhaustionPolicy,
    /// false = frames are forwarded untransformed.
    pub cinematic_enabled: bool,
    /// Soft deadline; overruns are logged, never cancelled.
    pub inference_budget_ms: u64,
    pub frame_queue_depth: usize,
    pub prediction_queue_depth: usize,
    pub event_queue_depth: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            source_width: 0,
            source_height: 0,
            target_fps: 60,
            min_zoom: 1.0,
            max_zoom: 2.0,
            transition_duration_secs: 0.3,
            damping_factor: 0.8,
            prediction_interval: 5,
            pool_capacity: 4,
            pixel_format: PixelFormat::Bgra8,
            exhaustion_policy: ExhaustionPolicy::FallbackAllocate,
            cinematic_enabled: true,
            inference_budget_ms: 100,
            frame_queue_depth: 4,
            prediction_queue_depth: 2,
            event_queue_depth: 64,
        }
    }
}

impl PipelineSettings {
    pub fn from_json_str(raw: &str) -> Result<Self, PipelineError> {
        let settings: PipelineSettings = serde_json::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |reason: String| Err(PipelineError::InvalidConfig(reason));

        if (self.source_width == 0) != (self.source_height == 0) {
            return invalid(format!(
                "source dimensions must both be set or both be 0, got {}x{}",
                self.source_width, self.source_height
            ));
        }
        if self.target_fps == 0 || self.target_fps > 240 {
            return invalid(format!("targetFps must be in 1..=240, got {}", self.target_fps));
        }
        if !self.min_zoom.is_finite() || self.min_zoom < 1.0 {
            return invalid(format!("minZoom must be >= 1.0, got {}", self.min_zoom));
        }
        if !self.max_zoom.is_finite() || self.max_zoom < self.min_zoom {
            return invalid(format!(
                "maxZoom must be >= minZoom ({}), got {}",
                self.min_zoom, self.max_zoom
            ));
        }
        if !self.transition_duration_secs.is_finite() || self.transition_duration_secs < 0.0 {
            return invalid(format!(
                "transitionDurationSecs must be >= 0, got {}",
                self.transition_duration_secs
            ));
        }
        if !(0.0..1.0).contains(&self.damping_factor) {
            return invalid(format!(
                "dampingFactor must be in [0, 1), got {}",
                self.damping_factor
            ));
        }
        if self.prediction_interval == 0 {
            return invalid("predictionInterval must be at least 1 frame".to_string());
        }
        if !(MIN_POOL_CAPACITY..=MAX_POOL_CAPACITY).contains(&self.pool_capacity) {
            return invalid(format!(
                "poolCapacity must be in {MIN_POOL_CAPACITY}..={MAX_POOL_CAPACITY}, got {}",
                self.pool_capacity
            ));
        }
        if self.frame_queue_depth == 0
            || self.prediction_queue_depth == 0
            || self.event_queue_depth == 0
        {
            return invalid("queue depths must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn transition_duration(&self) -> Duration {
        Duration::from_secs_f64(self.transition_duration_secs.max(0.0))
    }

    pub fn inference_budget(&self) -> Duration {
        Duration::from_millis(self.inference_budget_ms)
    }

    /// Time available to produce one output frame.
    pub fn frame_budget(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }

    pub fn has_fixed_source(&self) -> bool {
        self.source_width > 0 && self.source_height > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = PipelineSettings::default();
        settings.validate().expect("defaults must validate");
        assert_eq!(settings.prediction_interval, 5);
        assert!((settings.damping_factor - 0.8).abs() < f64::EPSILON);
        assert_eq!(settings.frame_budget(), Duration::from_secs_f64(1.0 / 60.0));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let raw = r#"{
            "sourceWidth": 1920,
            "sourceHeight": 1080,
            "maxZoom": 2.5,
            "exhaustionPolicy": "fail-fast"
        }"#;
        let settings = PipelineSettings::from_json_str(raw).expect("parse settings");
        assert_eq!(settings.source_width, 1_920);
        assert!((settings.max_zoom - 2.5).abs() < f64::EPSILON);
        assert_eq!(settings.exhaustion_policy, ExhaustionPolicy::FailFast);
        assert_eq!(settings.pool_capacity, 4);
        assert_eq!(settings.pixel_format, PixelFormat::Bgra8);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let cases = [
            PipelineSettings {
                pool_capacity: 8,
                ..PipelineSettings::default()
            },
            PipelineSettings {
                damping_factor: 1.0,
                ..PipelineSettings::default()
            },
            PipelineSettings {
                min_zoom: 0.5,
                ..PipelineSettings::default()
            },
            PipelineSettings {
                max_zoom: 0.9,
                ..PipelineSettings::default()
            },
            PipelineSettings {
                source_width: 1_920,
                ..PipelineSettings::default()
            },
            PipelineSettings {
                prediction_interval: 0,
                ..PipelineSettings::default()
            },
        ];

        for settings in cases {
            let err = settings.validate().expect_err("settings should be rejected");
            assert!(matches!(err, PipelineError::InvalidConfig(_)), "{err:?}");
        }
    }

    #[test]
    fn malformed_json_is_a_configuration_error() {
        let err = PipelineSettings::from_json_str("{\"targetFps\": \"sixty\"}")
            .expect_err("malformed settings");
        assert!(matches!(err, PipelineError::SettingsParse(_)));
    }
}
