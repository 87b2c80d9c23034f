use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use super::easing::ease;
use crate::models::events::PipelineEvent;
use crate::models::geometry::{lerp, Rect};
use crate::models::prediction::{FocusZonePrediction, TransitionKind};
use crate::models::settings::PipelineSettings;
use crate::telemetry::events::EventEmitter;

/// Side of the focus zone used after `reset`.
pub const DEFAULT_ZONE_SIDE: f64 = 400.0;

/// Damped targets closer than this (px) to the raw target snap onto it.
const SNAP_EPSILON_PX: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct CameraConfig {
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub damping_factor: f64,
    pub transition_duration_secs: f64,
    /// Source-frame extent; zones are clamped inside it.
    pub extent: Rect,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            min_zoom: 1.0,
            max_zoom: 2.0,
            damping_factor: 0.8,
            transition_duration_secs: 0.3,
            extent: Rect::extent(1_920, 1_080),
        }
    }
}

impl CameraConfig {
    pub fn from_settings(settings: &PipelineSettings, width: u32, height: u32) -> Self {
        Self {
            min_zoom: settings.min_zoom,
            max_zoom: settings.max_zoom,
            damping_factor: settings.damping_factor,
            transition_duration_secs: settings.transition_duration_secs,
            extent: Rect::extent(width, height),
        }
    }
}

/// Snapshot of the authoritative camera state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraState {
    pub current_zone: Rect,
    pub current_zoom: f64,
    pub target_zone: Rect,
    pub target_zoom: f64,
    pub transition_start: Option<f64>,
    pub transition_duration: Duration,
    pub transition_kind: TransitionKind,
}

/// What the transformer renders for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraFrame {
    pub zone: Rect,
    pub zoom: f64,
    pub is_transitioning: bool,
    /// Linear transition progress in `[0, 1]`; 1.0 when idle.
    pub progress: f64,
}

/// Sole writer of the session's camera state.
///
/// States: idle (no transition) and transitioning. `set_target` with a genuinely different
/// target starts a transition from wherever the camera currently is on screen;
/// `interpolate` reaching progress 1.0 commits the target and returns to idle.
#[derive(Debug)]
pub struct CameraStateMachine {
    config: CameraConfig,
    current_zone: Rect,
    current_zoom: f64,
    target_zone: Rect,
    target_zoom: f64,
    transition_start: Option<f64>,
    transition_kind: TransitionKind,
    /// Latest timestamp seen; earlier timestamps are treated as this one.
    last_observed: f64,
    /// Last quarter of eased progress reported through events.
    reported_quarter: u8,
    events: EventEmitter,
}

impl CameraStateMachine {
    pub fn new(config: CameraConfig, events: EventEmitter) -> Self {
        let mut machine = Self {
            config,
            current_zone: Rect::default(),
            current_zoom: 1.0,
            target_zone: Rect::default(),
            target_zoom: 1.0,
            transition_start: None,
            transition_kind: TransitionKind::default(),
            last_observed: 0.0,
            reported_quarter: 0,
            events,
        };
        machine.reset();
        machine
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn is_transitioning(&self) -> bool {
        self.transition_start.is_some()
    }

    pub fn state(&self) -> CameraState {
        CameraState {
            current_zone: self.current_zone,
            current_zoom: self.current_zoom,
            target_zone: self.target_zone,
            target_zoom: self.target_zoom,
            transition_start: self.transition_start,
            transition_duration: Duration::from_secs_f64(
                self.config.transition_duration_secs.max(0.0),
            ),
            transition_kind: self.transition_kind,
        }
    }

    /// Re-centers on a 400x400 zone at zoom 1.0 (clamped to the zoom range) and drops any
    /// transition in flight.
    pub fn reset(&mut self) {
        let extent = self.config.extent;
        let zone = Rect::from_center(extent.center(), DEFAULT_ZONE_SIDE, DEFAULT_ZONE_SIDE)
            .clamp_within(extent);
        let zoom = self.clamp_zoom(1.0);
        self.current_zone = zone;
        self.current_zoom = zoom;
        self.target_zone = zone;
        self.target_zoom = zoom;
        self.transition_start = None;
        self.reported_quarter = 0;
    }

    /// Switches to a new source extent (resolution change) and resets.
    pub fn set_extent(&mut self, extent: Rect) {
        self.config.extent = extent;
        self.reset();
    }

    /// Damps `zone` against the committed target, clamps `zoom` and starts a transition when
    /// the result differs from the committed target. Returns whether a transition started.
    pub fn set_target(&mut self, zone: Rect, zoom: f64, kind: TransitionKind, now: f64) -> bool {
        if !zone.is_finite() || !zoom.is_finite() {
            log::warn!("camera: ignoring non-finite target zone={zone:?} zoom={zoom}");
            return false;
        }
        let now = self.observe(now);
        let damped = self.damp(zone.clamp_within(self.config.extent));
        let zoom = self.clamp_zoom(zoom);

        if damped == self.target_zone && zoom == self.target_zoom {
            return false;
        }

        self.rebase(now);
        self.target_zone = damped;
        self.target_zoom = zoom;
        self.begin_transition(kind, now);
        true
    }

    /// Clamps `value` into the zoom range and stores it as the target zoom. Returns the
    /// stored value. A transition in flight restarts from the visible position.
    pub fn set_zoom_intensity(&mut self, value: f64) -> f64 {
        if !value.is_finite() {
            log::warn!("camera: ignoring non-finite zoom {value}");
            return self.target_zoom;
        }
        let zoom = self.clamp_zoom(value);
        if zoom == self.target_zoom {
            return zoom;
        }
        let now = self.last_observed;
        self.rebase(now);
        self.target_zoom = zoom;
        self.begin_transition(self.transition_kind, now);
        zoom
    }

    pub fn interpolate(&mut self, now: f64) -> CameraFrame {
        let now = self.observe(now);
        if self.transition_start.is_none() {
            return self.idle_frame();
        }

        let progress = self.progress(now);
        let eased = ease(self.transition_kind, progress);
        if progress >= 1.0 || eased >= 1.0 {
            self.current_zone = self.target_zone;
            self.current_zoom = self.target_zoom;
            self.transition_start = None;
            self.events.emit(PipelineEvent::TransitionCompleted {
                zone: self.current_zone,
                zoom: self.current_zoom,
            });
            return self.idle_frame();
        }

        let quarter = (eased * 4.0).floor() as u8;
        if quarter > self.reported_quarter {
            self.reported_quarter = quarter;
            self.events
                .emit(PipelineEvent::TransitionProgress { progress: eased });
        }

        CameraFrame {
            zone: self.current_zone.lerp(self.target_zone, eased),
            zoom: lerp(self.current_zoom, self.target_zoom, eased),
            is_transitioning: true,
            progress,
        }
    }

    fn idle_frame(&self) -> CameraFrame {
        CameraFrame {
            zone: self.current_zone,
            zoom: self.current_zoom,
            is_transitioning: false,
            progress: 1.0,
        }
    }

    /// Interpolated position at `now` without committing anything.
    fn sample(&self, now: f64) -> CameraFrame {
        let progress = self.progress(now);
        let eased = ease(self.transition_kind, progress);
        let zoom = if eased >= 1.0 {
            self.target_zoom
        } else {
            lerp(self.current_zoom, self.target_zoom, eased)
        };
        CameraFrame {
            zone: self.current_zone.lerp(self.target_zone, eased),
            zoom,
            is_transitioning: eased < 1.0,
            progress,
        }
    }

    /// Moves the transition origin to where the camera is visually at `now`.
    fn rebase(&mut self, now: f64) {
        if self.transition_start.is_none() {
            return;
        }
        let frame = self.sample(now);
        self.current_zone = frame.zone;
        self.current_zoom = frame.zoom;
    }

    fn progress(&self, now: f64) -> f64 {
        let Some(start) = self.transition_start else {
            return 1.0;
        };
        let duration = self.config.transition_duration_secs;
        if duration <= 0.0 {
            return 1.0;
        }
        ((now - start) / duration).clamp(0.0, 1.0)
    }

    fn begin_transition(&mut self, kind: TransitionKind, now: f64) {
        self.transition_start = Some(now);
        self.transition_kind = kind;
        self.reported_quarter = 0;
        self.events.emit(PipelineEvent::TransitionStarted {
            kind,
            target_zone: self.target_zone,
            target_zoom: self.target_zoom,
        });
    }

    fn damp(&self, zone: Rect) -> Rect {
        let keep = self.config.damping_factor.clamp(0.0, 1.0);
        let damped = self.target_zone.lerp(zone, 1.0 - keep);
        if damped.max_delta(zone) < SNAP_EPSILON_PX {
            zone
        } else {
            damped
        }
    }

    fn clamp_zoom(&self, zoom: f64) -> f64 {
        let min = self.config.min_zoom;
        let max = self.config.max_zoom.max(min);
        zoom.clamp(min, max)
    }

    fn observe(&mut self, now: f64) -> f64 {
        if now.is_finite() && now > self.last_observed {
            self.last_observed = now;
        }
        self.last_observed
    }
}

/// Outcome of handing a prediction to [`SharedCamera::apply_prediction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// A newer generation was already applied.
    Stale,
    /// The session is shutting down.
    Closed,
}

struct Guarded {
    machine: CameraStateMachine,
    last_generation: u64,
    closed: bool,
}

/// Camera handle shared by the frame thread (reader) and the prediction worker (writer).
///
/// Predictions are applied "latest wins": a result whose generation is not newer than the
/// last applied one is discarded.
#[derive(Clone)]
pub struct SharedCamera {
    inner: Arc<Mutex<Guarded>>,
}

impl SharedCamera {
    pub fn new(machine: CameraStateMachine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Guarded {
                machine,
                last_generation: 0,
                closed: false,
            })),
        }
    }

    pub fn apply_prediction(
        &self,
        generation: u64,
        prediction: &FocusZonePrediction,
        now: f64,
    ) -> ApplyOutcome {
        let mut guard = self.inner.lock();
        if guard.closed {
            log::debug!("camera: session closed, discarding prediction generation={generation}");
            return ApplyOutcome::Closed;
        }
        if generation <= guard.last_generation {
            log::debug!(
                "camera: stale prediction generation={generation} last={}",
                guard.last_generation
            );
            guard
                .machine
                .events()
                .emit(PipelineEvent::PredictionDiscarded { generation });
            return ApplyOutcome::Stale;
        }
        guard.last_generation = generation;
        guard.machine.set_target(
            prediction.zone,
            prediction.suggested_zoom,
            prediction.suggested_transition,
            now,
        );
        guard.machine.set_zoom_intensity(prediction.suggested_zoom);
        guard.machine.events().emit(PipelineEvent::PredictionApplied {
            generation,
            confidence: prediction.confidence,
        });
        ApplyOutcome::Applied
    }

    pub fn interpolate(&self, now: f64) -> CameraFrame {
        self.inner.lock().machine.interpolate(now)
    }

    pub fn set_extent(&self, extent: Rect) {
        self.inner.lock().machine.set_extent(extent);
    }

    pub fn reset(&self) {
        self.inner.lock().machine.reset();
    }

    pub fn state(&self) -> CameraState {
        self.inner.lock().machine.state()
    }

    pub fn extent(&self) -> Rect {
        self.inner.lock().machine.config().extent
    }

    pub fn last_generation(&self) -> u64 {
        self.inner.lock().last_generation
    }

    /// After closing, every incoming prediction is discarded.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl std::fmt::Debug for SharedCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.lock();
        f.debug_struct("SharedCamera")
            .field("state", &guard.machine.state())
            .field("last_generation", &guard.last_generation)
            .field("closed", &guard.closed)
            .finish()
    }
}
