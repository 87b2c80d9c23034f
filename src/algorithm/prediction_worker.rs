//! Throttled trajectory prediction off the frame thread.
//!
//! The frame thread hands a history snapshot to [`PredictionWorker::dispatch`], which never
//! blocks: when the queue is full the prediction is skipped. The worker applies each result
//! through [`SharedCamera`], tagged with a generation so a slow result never overwrites a
//! newer one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::camera_engine::{ApplyOutcome, SharedCamera};
use super::trajectory::{PredictionError, TrajectoryPredictor};
use crate::error::{PipelineError, PipelineResult};
use crate::models::cursor::CursorSample;
use crate::models::events::PipelineEvent;
use crate::models::geometry::{Point, Rect};
use crate::telemetry::events::EventEmitter;

pub struct PredictionJob {
    pub generation: u64,
    pub history: Vec<CursorSample>,
    pub current: Point,
    pub bounds: Rect,
    /// Capture timestamp of the frame that triggered the job.
    pub captured_at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Queued { generation: u64 },
    /// Queue full; the frame thread moves on without a prediction.
    Skipped,
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub applied: u64,
    pub stale: u64,
    pub discarded: u64,
    pub overruns: u64,
    pub failed: u64,
}

pub struct PredictionWorker {
    tx: Option<SyncSender<PredictionJob>>,
    handle: Option<JoinHandle<WorkerStats>>,
    stopping: Arc<AtomicBool>,
    next_generation: u64,
}

impl PredictionWorker {
    pub fn spawn(
        predictor: Arc<dyn TrajectoryPredictor>,
        camera: SharedCamera,
        events: EventEmitter,
        budget: Duration,
        queue_depth: usize,
    ) -> PipelineResult<Self> {
        let (tx, rx) = sync_channel::<PredictionJob>(queue_depth.max(1));
        let stopping = Arc::new(AtomicBool::new(false));
        let worker_stopping = stopping.clone();

        let handle = std::thread::Builder::new()
            .name("cinecam-predictor".to_string())
            .spawn(move || {
                run_worker(
                    rx,
                    predictor.as_ref(),
                    &camera,
                    &events,
                    budget,
                    &worker_stopping,
                )
            })
            .map_err(|e| PipelineError::Thread(format!("failed to spawn predictor thread: {e}")))?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            stopping,
            next_generation: 0,
        })
    }

    pub fn dispatch(
        &mut self,
        history: Vec<CursorSample>,
        current: Point,
        bounds: Rect,
        captured_at: f64,
    ) -> DispatchOutcome {
        let Some(tx) = self.tx.as_ref() else {
            return DispatchOutcome::Closed;
        };
        let generation = self.next_generation + 1;
        let job = PredictionJob {
            generation,
            history,
            current,
            bounds,
            captured_at,
        };
        match tx.try_send(job) {
            Ok(()) => {
                self.next_generation = generation;
                DispatchOutcome::Queued { generation }
            }
            Err(TrySendError::Full(_)) => {
                log::debug!("predictor: queue full, skipping prediction generation={generation}");
                DispatchOutcome::Skipped
            }
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("predictor: worker thread is gone, prediction disabled");
                self.tx = None;
                DispatchOutcome::Closed
            }
        }
    }

    /// Abandons queued jobs, waits for the one in flight and discards its result.
    pub fn stop(mut self) -> PipelineResult<WorkerStats> {
        self.stopping.store(true, Ordering::SeqCst);
        self.tx.take();
        let Some(handle) = self.handle.take() else {
            return Ok(WorkerStats::default());
        };
        handle
            .join()
            .map_err(|_| PipelineError::Thread("predictor thread panicked".to_string()))
    }
}

impl Drop for PredictionWorker {
    fn drop(&mut self) {
        // Detach: the thread exits once the channel drains.
        self.stopping.store(true, Ordering::SeqCst);
        self.tx.take();
    }
}

/// Soft deadline: an overrun degrades camera responsiveness but the result is still used.
fn check_budget(elapsed: Duration, budget: Duration) -> PipelineResult<()> {
    if elapsed > budget {
        return Err(PipelineError::InferenceTimeout {
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }
    Ok(())
}

fn run_worker(
    rx: Receiver<PredictionJob>,
    predictor: &dyn TrajectoryPredictor,
    camera: &SharedCamera,
    events: &EventEmitter,
    budget: Duration,
    stopping: &AtomicBool,
) -> WorkerStats {
    let mut stats = WorkerStats::default();

    for job in rx {
        if stopping.load(Ordering::SeqCst) {
            stats.discarded += 1;
            continue;
        }

        let started = Instant::now();
        let result = predictor.predict(&job.history, job.current, job.bounds);
        let elapsed = started.elapsed();
        stats.completed += 1;

        if let Err(degraded) = check_budget(elapsed, budget) {
            stats.overruns += 1;
            log::warn!(
                "predictor: {degraded} generation={} budget_ms={} kind={:?}",
                job.generation,
                budget.as_millis(),
                degraded.kind()
            );
            events.emit(PipelineEvent::InferenceOverrun {
                generation: job.generation,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        let prediction = match result {
            Ok(prediction) => prediction,
            Err(PredictionError::InvalidInput(reason)) => {
                stats.failed += 1;
                log::warn!(
                    "predictor: invalid input generation={}: {reason}",
                    job.generation
                );
                continue;
            }
            Err(err) => {
                stats.failed += 1;
                log::error!(
                    "predictor: {} failed generation={}: {err}",
                    predictor.name(),
                    job.generation
                );
                continue;
            }
        };

        if stopping.load(Ordering::SeqCst) {
            log::debug!(
                "predictor: session stopping, discarding generation={}",
                job.generation
            );
            stats.discarded += 1;
            continue;
        }

        let applied_at = job.captured_at + elapsed.as_secs_f64();
        match camera.apply_prediction(job.generation, &prediction, applied_at) {
            ApplyOutcome::Applied => stats.applied += 1,
            ApplyOutcome::Stale => stats.stale += 1,
            ApplyOutcome::Closed => stats.discarded += 1,
        }
    }

    log::debug!(
        "predictor: worker exiting completed={} applied={} overruns={}",
        stats.completed,
        stats.applied,
        stats.overruns
    );
    stats
}
