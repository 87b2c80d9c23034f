//! Recording session lifecycle: a dedicated frame-delivery thread driving the
//! [`FrameOrchestrator`], fed by the capture collaborator through a bounded queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use serde::Serialize;

use super::orchestrator::{CapturedFrame, FrameOrchestrator, SessionDeps, SessionStats};
use crate::algorithm::camera_engine::SharedCamera;
use crate::error::{PipelineError, PipelineResult};
use crate::models::events::PipelineEvent;
use crate::models::settings::PipelineSettings;
use crate::telemetry::events::EventEmitter;

type FrameSlot = Arc<Mutex<Option<SyncSender<CapturedFrame>>>>;

/// Handle given to the capture collaborator. Cheap to clone; never blocks.
#[derive(Clone)]
pub struct FrameFeeder {
    slot: FrameSlot,
    stop_flag: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl FrameFeeder {
    /// Queues a frame for the frame thread. `Ok(false)` means the queue was full and the
    /// frame was dropped before entering the pipeline.
    pub fn push(&self, frame: CapturedFrame) -> PipelineResult<bool> {
        if self.stop_flag.load(Ordering::Relaxed) {
            return Err(PipelineError::NotRecording);
        }
        // Clone the sender under the lock and release it right away.
        let tx = {
            let guard = self.slot.lock();
            match guard.as_ref() {
                Some(tx) => tx.clone(),
                None => return Err(PipelineError::NotRecording),
            }
        };
        match tx.try_send(frame) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("recorder: frame queue full, dropped capture frame (total {dropped})");
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(PipelineError::NotRecording),
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// What a finished frame thread hands back.
struct FrameThreadExit {
    orchestrator: FrameOrchestrator,
    failure: Option<PipelineError>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: String,
    pub stats: SessionStats,
    pub dropped_frames: u64,
    /// Fatal error that ended the session early, if any.
    pub failure: Option<PipelineError>,
}

pub struct RecorderSession {
    session_id: String,
    slot: FrameSlot,
    stop_flag: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    frame_thread: Option<JoinHandle<FrameThreadExit>>,
    camera: SharedCamera,
    events: EventEmitter,
}

impl RecorderSession {
    /// Announces the session, builds the orchestrator (predictor warm-up, pool, render
    /// context) and starts the frame-delivery thread.
    pub fn start(
        session_id: String,
        settings: Arc<PipelineSettings>,
        deps: SessionDeps,
        events: EventEmitter,
    ) -> PipelineResult<Self> {
        settings.validate()?;
        events.emit(PipelineEvent::SessionStarted {
            session_id: session_id.clone(),
            width: settings.source_width,
            height: settings.source_height,
        });

        let orchestrator = match FrameOrchestrator::new(settings.clone(), deps, events.clone()) {
            Ok(orchestrator) => orchestrator,
            Err(err) => {
                log::error!("recorder: session id={session_id} failed to start: {err}");
                events.emit(PipelineEvent::SessionStopped {
                    session_id,
                    frames: 0,
                });
                return Err(err);
            }
        };
        let camera = orchestrator.camera().clone();

        let (tx, rx) = sync_channel::<CapturedFrame>(settings.frame_queue_depth.max(1));
        let stop_flag = Arc::new(AtomicBool::new(false));

        let thread_id = session_id.clone();
        let frame_thread = std::thread::Builder::new()
            .name("cinecam-frames".to_string())
            .spawn(move || run_frame_loop(thread_id, orchestrator, rx))
            .map_err(|e| {
                events.emit(PipelineEvent::SessionStopped {
                    session_id: session_id.clone(),
                    frames: 0,
                });
                PipelineError::Thread(format!("failed to spawn frame thread: {e}"))
            })?;

        log::info!(
            "recorder: session started id={session_id} source={}x{} pool_capacity={} cinematic={}",
            settings.source_width,
            settings.source_height,
            settings.pool_capacity,
            settings.cinematic_enabled
        );

        Ok(Self {
            session_id,
            slot: Arc::new(Mutex::new(Some(tx))),
            stop_flag,
            dropped: Arc::new(AtomicU64::new(0)),
            frame_thread: Some(frame_thread),
            camera,
            events,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn feeder(&self) -> FrameFeeder {
        FrameFeeder {
            slot: self.slot.clone(),
            stop_flag: self.stop_flag.clone(),
            dropped: self.dropped.clone(),
        }
    }

    pub fn camera(&self) -> &SharedCamera {
        &self.camera
    }

    /// False once the frame thread has exited, e.g. after a fatal error.
    pub fn is_running(&self) -> bool {
        self.frame_thread
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop sequence: refuse new frames, close the queue, join the frame thread after it
    /// drains, then stop prediction, close the camera and tear the pool down.
    pub fn stop(mut self) -> PipelineResult<SessionReport> {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.slot.lock().take();

        let handle = self
            .frame_thread
            .take()
            .ok_or_else(|| PipelineError::Thread("frame thread already joined".to_string()))?;
        let exit = handle
            .join()
            .map_err(|_| PipelineError::Thread("frame thread panicked".to_string()))?;

        let frames = exit.orchestrator.frame_count();
        let partial_stats = exit.orchestrator.stats();
        let finished = exit.orchestrator.finish();
        let dropped_frames = self.dropped.load(Ordering::Relaxed);

        self.events.emit(PipelineEvent::SessionStopped {
            session_id: self.session_id.clone(),
            frames,
        });

        let stats = match (finished, &exit.failure) {
            (Ok(stats), _) => stats,
            // The frame-thread failure is the cause worth reporting.
            (Err(teardown), Some(_)) => {
                log::warn!(
                    "recorder: session id={} teardown after fatal error also failed: {teardown}",
                    self.session_id
                );
                partial_stats
            }
            (Err(teardown), None) => {
                log::error!(
                    "recorder: session id={} teardown failed: {}",
                    self.session_id,
                    teardown.reason()
                );
                return Err(teardown);
            }
        };

        match &exit.failure {
            Some(err) => log::error!(
                "recorder: session id={} stopped: {}",
                self.session_id,
                err.reason()
            ),
            None => log::info!(
                "recorder: session stopped id={} frames={} transformed={} fallbacks={} dropped={}",
                self.session_id,
                stats.frames,
                stats.transformed,
                stats.fallbacks,
                dropped_frames
            ),
        }

        Ok(SessionReport {
            session_id: self.session_id.clone(),
            stats,
            dropped_frames,
            failure: exit.failure,
        })
    }
}

impl Drop for RecorderSession {
    fn drop(&mut self) {
        // Unstopped session: let the frame thread drain and exit on its own.
        self.stop_flag.store(true, Ordering::SeqCst);
        self.slot.lock().take();
    }
}

fn run_frame_loop(
    session_id: String,
    mut orchestrator: FrameOrchestrator,
    rx: Receiver<CapturedFrame>,
) -> FrameThreadExit {
    let mut failure = None;
    for frame in rx {
        if let Err(err) = orchestrator.process_frame(frame) {
            log::error!(
                "recorder: session id={session_id} frame {} failed: {err}",
                orchestrator.frame_count().saturating_sub(1)
            );
            failure = Some(err);
            break;
        }
    }
    log::debug!(
        "recorder: frame thread exiting id={session_id} frames={}",
        orchestrator.frame_count()
    );
    FrameThreadExit {
        orchestrator,
        failure,
    }
}
