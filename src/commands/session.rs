//! Async recording controls for the embedding UI layer.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::capture::orchestrator::SessionDeps;
use crate::capture::recorder::{FrameFeeder, RecorderSession, SessionReport};
use crate::capture::state::{ActiveSession, RecorderState};
use crate::error::{PipelineError, PipelineResult};
use crate::models::events::PipelineEvent;
use crate::models::settings::PipelineSettings;
use crate::telemetry::events::EventEmitter;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
}

/// Returned by [`start_recording`]: the capture side pushes frames through `feeder`, the
/// observer drains `events`.
pub struct StartedRecording {
    pub info: SessionInfo,
    pub feeder: FrameFeeder,
    pub events: Receiver<PipelineEvent>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub report: SessionReport,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub active: bool,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    /// False when the frame thread ended early on a fatal error.
    pub running: bool,
    pub cinematic_enabled: bool,
}

pub async fn start_recording(
    state: &RecorderState,
    settings: PipelineSettings,
    deps: SessionDeps,
) -> PipelineResult<StartedRecording> {
    let mut guard = state.0.lock().await;

    if guard.is_some() {
        return Err(PipelineError::AlreadyRecording);
    }
    settings.validate()?;

    let session_id = uuid::Uuid::new_v4().to_string();
    log::info!(
        "start_recording: id={session_id} source={}x{}",
        settings.source_width,
        settings.source_height
    );

    let (events, event_rx) = EventEmitter::channel(settings.event_queue_depth);
    let settings = Arc::new(settings);
    let session = RecorderSession::start(session_id.clone(), settings.clone(), deps, events)?;
    let started_at = Utc::now();
    let feeder = session.feeder();

    *guard = Some(ActiveSession {
        session,
        started_at,
        width: settings.source_width,
        height: settings.source_height,
        cinematic_enabled: settings.cinematic_enabled,
    });

    Ok(StartedRecording {
        info: SessionInfo {
            session_id,
            started_at,
        },
        feeder,
        events: event_rx,
    })
}

pub async fn stop_recording(
    state: &RecorderState,
    session_id: &str,
) -> PipelineResult<SessionSummary> {
    let active = {
        let mut guard = state.0.lock().await;
        let active = guard.take().ok_or(PipelineError::NotRecording)?;
        if active.session_id() != session_id {
            let active_id = active.session_id().to_string();
            *guard = Some(active);
            return Err(PipelineError::SessionMismatch {
                active: active_id,
                requested: session_id.to_string(),
            });
        }
        active
    };

    log::info!("stop_recording: id={session_id}");
    let started_at = active.started_at;
    let session = active.session;

    let report = tokio::task::spawn_blocking(move || session.stop())
        .await
        .map_err(|e| PipelineError::Thread(format!("stop task join error: {e}")))??;

    let stopped_at = Utc::now();
    let duration_ms = (stopped_at - started_at).num_milliseconds().max(0) as u64;
    log::info!(
        "stop_recording: id={session_id} duration={duration_ms}ms frames={}",
        report.stats.frames
    );

    Ok(SessionSummary {
        started_at,
        stopped_at,
        duration_ms,
        report,
    })
}

pub async fn recording_status(state: &RecorderState) -> RecordingStatus {
    let guard = state.0.lock().await;
    match guard.as_ref() {
        Some(active) => RecordingStatus {
            active: true,
            session_id: Some(active.session_id().to_string()),
            started_at: Some(active.started_at),
            running: active.session.is_running(),
            cinematic_enabled: active.cinematic_enabled,
        },
        None => RecordingStatus {
            active: false,
            session_id: None,
            started_at: None,
            running: false,
            cinematic_enabled: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::channel;

    use super::*;
    use crate::capture::orchestrator::{CapturedFrame, FrameSink, OutputFrame, SinkError};
    use crate::error::ErrorKind;
    use crate::models::geometry::Point;
    use crate::rendering::buffer::{BufferFormat, FrameBuffer, PixelFormat};

    struct CountingSink(std::sync::mpsc::Sender<u64>);

    impl FrameSink for CountingSink {
        fn submit(&mut self, frame: OutputFrame) -> Result<(), SinkError> {
            self.0.send(frame.frame_index).map_err(|_| SinkError::Closed)
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            source_width: 24,
            source_height: 16,
            frame_queue_depth: 32,
            ..PipelineSettings::default()
        }
    }

    fn captured(ts: f64) -> CapturedFrame {
        CapturedFrame::new(
            FrameBuffer::new(BufferFormat::new(24, 16, PixelFormat::Bgra8)),
            ts,
            Point::new(12.0, 8.0),
        )
    }

    #[tokio::test]
    async fn start_status_stop_roundtrip() {
        let state = RecorderState::new();
        let (tx, rx) = channel();
        let started = start_recording(
            &state,
            settings(),
            SessionDeps::with_defaults(Box::new(CountingSink(tx))),
        )
        .await
        .expect("start recording");
        let session_id = started.info.session_id.clone();

        let status = recording_status(&state).await;
        assert!(status.active);
        assert_eq!(status.session_id.as_deref(), Some(session_id.as_str()));

        for i in 0..6 {
            started
                .feeder
                .push(captured(i as f64 / 60.0))
                .expect("push frame");
        }

        let summary = stop_recording(&state, &session_id)
            .await
            .expect("stop recording");
        assert_eq!(summary.report.session_id, session_id);
        assert_eq!(summary.report.stats.frames, 6);
        assert_eq!(rx.try_iter().count(), 6);
        assert!(!recording_status(&state).await.active);

        let json = serde_json::to_string(&summary).expect("serialize summary");
        assert!(json.contains("\"sessionId\""));
        assert!(json.contains("\"durationMs\""));
    }

    #[tokio::test]
    async fn refuses_a_second_concurrent_session() {
        let state = RecorderState::new();
        let (tx, _rx) = channel();
        let started = start_recording(
            &state,
            settings(),
            SessionDeps::with_defaults(Box::new(CountingSink(tx.clone()))),
        )
        .await
        .expect("first session");

        let err = start_recording(
            &state,
            settings(),
            SessionDeps::with_defaults(Box::new(CountingSink(tx))),
        )
        .await
        .err()
        .expect("second session must be refused");
        assert!(matches!(err, PipelineError::AlreadyRecording));

        stop_recording(&state, &started.info.session_id)
            .await
            .expect("stop first session");
    }

    #[tokio::test]
    async fn stop_with_wrong_id_keeps_the_session() {
        let state = RecorderState::new();
        let (tx, _rx) = channel();
        let started = start_recording(
            &state,
            settings(),
            SessionDeps::with_defaults(Box::new(CountingSink(tx))),
        )
        .await
        .expect("start recording");

        let err = stop_recording(&state, "not-this-one")
            .await
            .expect_err("mismatched id");
        assert!(matches!(err, PipelineError::SessionMismatch { .. }));
        assert!(recording_status(&state).await.active);

        stop_recording(&state, &started.info.session_id)
            .await
            .expect("stop");
        let err = stop_recording(&state, &started.info.session_id)
            .await
            .expect_err("already stopped");
        assert!(matches!(err, PipelineError::NotRecording));
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected_before_start() {
        let state = RecorderState::new();
        let (tx, _rx) = channel();
        let err = start_recording(
            &state,
            PipelineSettings {
                damping_factor: 1.5,
                ..settings()
            },
            SessionDeps::with_defaults(Box::new(CountingSink(tx))),
        )
        .await
        .err()
        .expect("invalid damping");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!recording_status(&state).await.active);
    }
}
