//! Per-frame pipeline: cursor tracking, throttled prediction, camera interpolation,
//! transform and hand-off to the encoder.
//!
//! Runs on the frame-delivery thread. Frames leave in capture order, one output frame per
//! input frame. Recoverable failures forward the raw frame; only fatal errors propagate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::algorithm::camera_engine::{
    CameraConfig, CameraFrame, CameraStateMachine, SharedCamera,
};
use crate::algorithm::prediction_worker::{DispatchOutcome, PredictionWorker, WorkerStats};
use crate::algorithm::trajectory::{HeuristicPredictor, TrajectoryPredictor};
use crate::error::{PipelineError, PipelineResult};
use crate::models::events::PipelineEvent;
use crate::models::geometry::{Point, Rect};
use crate::models::settings::PipelineSettings;
use crate::rendering::buffer::{BufferFormat, FrameBuffer, PixelBuffer};
use crate::rendering::context::{CpuBackend, RenderBackend};
use crate::rendering::pool::{BufferPool, PooledBuffer};
use crate::rendering::transform::{FrameTransformer, TransformError};
use crate::telemetry::cursor::{CursorTracker, HISTORY_CAPACITY};
use crate::telemetry::events::EventEmitter;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("encoder is closed")]
    Closed,

    #[error("encoder failed: {0}")]
    Failed(String),
}

/// Encoder side of the pipeline.
pub trait FrameSink: Send {
    fn submit(&mut self, frame: OutputFrame) -> Result<(), SinkError>;

    /// Called once after the last frame, before the buffer pool is torn down.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// One frame from the capture collaborator.
#[derive(Debug)]
pub struct CapturedFrame {
    pub buffer: FrameBuffer,
    /// Monotonic seconds.
    pub capture_ts: f64,
    pub cursor: Point,
}

impl CapturedFrame {
    pub fn new(buffer: FrameBuffer, capture_ts: f64, cursor: Point) -> Self {
        Self {
            buffer,
            capture_ts,
            cursor,
        }
    }
}

#[derive(Debug)]
pub enum OutputBuffer {
    /// Rendered into a pool buffer; dropping it returns the buffer to the pool.
    Transformed(PooledBuffer),
    Passthrough(FrameBuffer),
}

impl OutputBuffer {
    pub fn is_transformed(&self) -> bool {
        matches!(self, OutputBuffer::Transformed(_))
    }
}

impl PixelBuffer for OutputBuffer {
    fn format(&self) -> BufferFormat {
        match self {
            OutputBuffer::Transformed(buffer) => buffer.format(),
            OutputBuffer::Passthrough(buffer) => buffer.format(),
        }
    }

    fn data(&self) -> &[u8] {
        match self {
            OutputBuffer::Transformed(buffer) => buffer.data(),
            OutputBuffer::Passthrough(buffer) => buffer.data(),
        }
    }

    fn data_mut(&mut self) -> &mut [u8] {
        match self {
            OutputBuffer::Transformed(buffer) => buffer.data_mut(),
            OutputBuffer::Passthrough(buffer) => buffer.data_mut(),
        }
    }
}

#[derive(Debug)]
pub struct OutputFrame {
    pub buffer: OutputBuffer,
    /// Relative to the first captured frame of the session.
    pub presentation_ts: Duration,
    pub frame_index: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub frames: u64,
    pub transformed: u64,
    pub passthrough: u64,
    pub fallbacks: u64,
    pub over_budget: u64,
    pub predictions_dispatched: u64,
    pub predictions_skipped: u64,
    pub predictions_applied: u64,
    pub inference_overruns: u64,
    pub reconfigurations: u64,
}

impl SessionStats {
    fn absorb_worker(&mut self, worker: WorkerStats) {
        self.predictions_applied = worker.applied;
        self.inference_overruns = worker.overruns;
    }
}

/// Collaborators injected at session start.
pub struct SessionDeps {
    pub backend: Arc<dyn RenderBackend>,
    pub predictor: Arc<dyn TrajectoryPredictor>,
    pub sink: Box<dyn FrameSink>,
}

impl SessionDeps {
    /// CPU rendering with the heuristic predictor.
    pub fn with_defaults(sink: Box<dyn FrameSink>) -> Self {
        Self {
            backend: Arc::new(CpuBackend),
            predictor: Arc::new(HeuristicPredictor::default()),
            sink,
        }
    }
}

pub struct FrameOrchestrator {
    settings: Arc<PipelineSettings>,
    backend: Arc<dyn RenderBackend>,
    sink: Box<dyn FrameSink>,
    pool: BufferPool,
    transformer: Option<FrameTransformer>,
    camera: SharedCamera,
    tracker: CursorTracker,
    worker: Option<PredictionWorker>,
    events: EventEmitter,
    frame_counter: u64,
    first_capture_ts: Option<f64>,
    in_exhaustion: bool,
    stats: SessionStats,
}

impl FrameOrchestrator {
    /// Warms the predictor up and starts its worker. With fixed source dimensions the pool
    /// and render context are created here, otherwise on the first frame.
    pub fn new(
        settings: Arc<PipelineSettings>,
        deps: SessionDeps,
        events: EventEmitter,
    ) -> PipelineResult<Self> {
        settings.validate()?;
        deps.predictor.warm_up().map_err(|err| {
            log::error!(
                "orchestrator: predictor {} failed to warm up: {err}",
                deps.predictor.name()
            );
            PipelineError::from(err)
        })?;

        let camera = SharedCamera::new(CameraStateMachine::new(
            CameraConfig::from_settings(&settings, settings.source_width, settings.source_height),
            events.clone(),
        ));
        let worker = PredictionWorker::spawn(
            deps.predictor,
            camera.clone(),
            events.clone(),
            settings.inference_budget(),
            settings.prediction_queue_depth,
        )?;

        let mut orchestrator = Self {
            pool: BufferPool::with_policy(settings.exhaustion_policy),
            settings,
            backend: deps.backend,
            sink: deps.sink,
            transformer: None,
            camera,
            tracker: CursorTracker::new(HISTORY_CAPACITY),
            worker: Some(worker),
            events,
            frame_counter: 0,
            first_capture_ts: None,
            in_exhaustion: false,
            stats: SessionStats::default(),
        };

        if orchestrator.settings.has_fixed_source() {
            let (width, height) = (
                orchestrator.settings.source_width,
                orchestrator.settings.source_height,
            );
            orchestrator.configure(width, height)?;
        }
        Ok(orchestrator)
    }

    pub fn camera(&self) -> &SharedCamera {
        &self.camera
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_counter
    }

    /// (Re)allocates the pool for `width` x `height`, resets the camera to the new extent and
    /// drops cursor history recorded at the old resolution.
    pub fn configure(&mut self, width: u32, height: u32) -> PipelineResult<()> {
        let capacity = self.settings.pool_capacity;
        self.pool
            .configure(width, height, self.settings.pixel_format, capacity)?;
        self.camera.set_extent(Rect::extent(width, height));
        self.tracker.clear();
        self.in_exhaustion = false;

        if self.settings.cinematic_enabled {
            match self.transformer.as_mut() {
                Some(transformer) => transformer.rebind()?,
                None => {
                    self.transformer = Some(FrameTransformer::new(
                        self.backend.clone(),
                        self.pool.clone(),
                    )?)
                }
            }
        }

        self.stats.reconfigurations += 1;
        self.events.emit(PipelineEvent::PoolReconfigured {
            width,
            height,
            capacity,
        });
        log::info!("orchestrator: configured {width}x{height} pool_capacity={capacity}");
        Ok(())
    }

    /// Processes one captured frame. `Err` means the session cannot continue.
    pub fn process_frame(&mut self, frame: CapturedFrame) -> PipelineResult<()> {
        let frame_index = self.frame_counter;
        self.frame_counter += 1;
        self.stats.frames += 1;

        let CapturedFrame {
            buffer,
            capture_ts,
            cursor,
        } = frame;

        let format = buffer.format();
        let current = self.pool.format();
        if !format.is_empty()
            && current.map(|f| (f.width, f.height)) != Some((format.width, format.height))
        {
            if let Some(previous) = current {
                log::info!(
                    "orchestrator: source resolution changed {}x{} -> {}x{}",
                    previous.width,
                    previous.height,
                    format.width,
                    format.height
                );
            }
            self.configure(format.width, format.height)?;
        }

        let first = *self.first_capture_ts.get_or_insert(capture_ts);
        let elapsed = capture_ts - first;
        let presentation_ts = if elapsed.is_finite() && elapsed > 0.0 {
            Duration::from_secs_f64(elapsed)
        } else {
            Duration::ZERO
        };

        self.tracker.record(cursor, capture_ts);
        self.maybe_dispatch_prediction(frame_index, cursor, capture_ts);

        let output = if self.settings.cinematic_enabled {
            let view = self.camera.interpolate(capture_ts);
            self.render(buffer, &view, frame_index)?
        } else {
            OutputBuffer::Passthrough(buffer)
        };

        if output.is_transformed() {
            self.stats.transformed += 1;
        } else {
            self.stats.passthrough += 1;
        }

        self.sink
            .submit(OutputFrame {
                buffer: output,
                presentation_ts,
                frame_index,
            })
            .map_err(|source| {
                log::error!("orchestrator: encoder rejected frame {frame_index}: {source}");
                PipelineError::Encoder {
                    frame_index,
                    source,
                }
            })
    }

    /// Ends the session: stops prediction, closes the camera and tears the pool down.
    pub fn finish(mut self) -> PipelineResult<SessionStats> {
        let sink_result = self.sink.finish();

        let worker_result = match self.worker.take() {
            Some(worker) => worker.stop(),
            None => Ok(WorkerStats::default()),
        };
        self.camera.close();
        self.transformer = None;
        self.pool.teardown();

        let worker_stats = worker_result?;
        self.stats.absorb_worker(worker_stats);
        sink_result.map_err(|source| PipelineError::Encoder {
            frame_index: self.frame_counter,
            source,
        })?;
        Ok(self.stats)
    }

    fn maybe_dispatch_prediction(&mut self, frame_index: u64, cursor: Point, capture_ts: f64) {
        let interval = u64::from(self.settings.prediction_interval.max(1));
        if frame_index % interval != 0 {
            return;
        }
        let Some(worker) = self.worker.as_mut() else {
            return;
        };
        let bounds = self.camera.extent();
        match worker.dispatch(self.tracker.snapshot(), cursor, bounds, capture_ts) {
            DispatchOutcome::Queued { .. } => self.stats.predictions_dispatched += 1,
            DispatchOutcome::Skipped => self.stats.predictions_skipped += 1,
            DispatchOutcome::Closed => {
                self.stats.predictions_skipped += 1;
                self.worker = None;
            }
        }
    }

    fn render(
        &mut self,
        source: FrameBuffer,
        view: &CameraFrame,
        frame_index: u64,
    ) -> PipelineResult<OutputBuffer> {
        let Some(transformer) = self.transformer.as_mut() else {
            return Ok(OutputBuffer::Passthrough(source));
        };

        let started = Instant::now();
        match transformer.apply(&source, view) {
            Ok(output) => {
                let elapsed = started.elapsed();
                if elapsed > self.settings.frame_budget() {
                    self.stats.over_budget += 1;
                    log::debug!(
                        "orchestrator: frame {frame_index} transform took {}us, over budget",
                        elapsed.as_micros()
                    );
                }
                if output.is_pooled() {
                    self.in_exhaustion = false;
                } else if !self.in_exhaustion {
                    self.in_exhaustion = true;
                    self.events.emit(PipelineEvent::PoolExhausted {
                        capacity: self.pool.capacity(),
                        fallback: true,
                    });
                }
                Ok(OutputBuffer::Transformed(output))
            }
            Err(err) if err.is_fatal() => {
                log::error!("orchestrator: recording stopped at frame {frame_index}: {err}");
                Err(err.into())
            }
            Err(err) => {
                if err == TransformError::BufferPoolExhausted && !self.in_exhaustion {
                    self.in_exhaustion = true;
                    self.events.emit(PipelineEvent::PoolExhausted {
                        capacity: self.pool.capacity(),
                        fallback: false,
                    });
                }
                log::warn!("orchestrator: frame {frame_index} forwarded untransformed: {err}");
                self.stats.fallbacks += 1;
                self.events.emit(PipelineEvent::FrameFallback {
                    frame_index,
                    reason: err.to_string(),
                });
                Ok(OutputBuffer::Passthrough(source))
            }
        }
    }
}
