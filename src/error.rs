//! Crate-level error type and its classification.
//!
//! Per-frame failures are handled inside the orchestrator and never reach this type's
//! callers as session errors; everything surfaced here either ends a session or rejects a
//! request before one starts.

use serde::ser::SerializeStruct;
use serde::Serialize;
use thiserror::Error;

use crate::algorithm::trajectory::PredictionError;
use crate::capture::orchestrator::SinkError;
use crate::rendering::pool::PoolError;
use crate::rendering::transform::TransformError;

/// How a failure affects the running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Skip or pass through one frame, keep recording.
    RecoverablePerFrame,
    /// Keep recording with a stale or default camera target.
    DegradedQuality,
    /// The session cannot produce further frames.
    SessionFatal,
    /// Rejected before a session started.
    Configuration,
    /// Invalid call sequence from the embedding layer.
    Usage,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("graphics context unavailable: {0}")]
    ContextCreationFailed(String),

    #[error("prediction model failed to load: {0}")]
    ModelLoadFailed(String),

    #[error("buffer pool exhausted")]
    BufferPoolExhausted,

    #[error("frame transform failed: {0}")]
    TransformFailed(String),

    #[error("inference exceeded its budget ({elapsed_ms}ms)")]
    InferenceTimeout { elapsed_ms: u64 },

    #[error("invalid prediction input: {0}")]
    InvalidInput(String),

    #[error("buffer pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("encoder rejected frame {frame_index}: {source}")]
    Encoder {
        frame_index: u64,
        #[source]
        source: SinkError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("settings parse error: {0}")]
    SettingsParse(#[from] serde_json::Error),

    #[error("worker thread failed: {0}")]
    Thread(String),

    #[error("a recording session is already active")]
    AlreadyRecording,

    #[error("no recording session is active")]
    NotRecording,

    #[error("session id mismatch: active={active}, requested={requested}")]
    SessionMismatch { active: String, requested: String },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::BufferPoolExhausted | PipelineError::TransformFailed(_) => {
                ErrorKind::RecoverablePerFrame
            }
            PipelineError::InferenceTimeout { .. } | PipelineError::InvalidInput(_) => {
                ErrorKind::DegradedQuality
            }
            PipelineError::ContextCreationFailed(_)
            | PipelineError::ModelLoadFailed(_)
            | PipelineError::Pool(_)
            | PipelineError::Encoder { .. }
            | PipelineError::Thread(_) => ErrorKind::SessionFatal,
            PipelineError::InvalidConfig(_) | PipelineError::SettingsParse(_) => {
                ErrorKind::Configuration
            }
            PipelineError::AlreadyRecording
            | PipelineError::NotRecording
            | PipelineError::SessionMismatch { .. } => ErrorKind::Usage,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::SessionFatal
    }

    /// Human-readable cause, e.g. for "recording stopped: {reason}".
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl From<TransformError> for PipelineError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::ContextCreationFailed(reason) => {
                PipelineError::ContextCreationFailed(reason)
            }
            TransformError::BufferPoolExhausted => PipelineError::BufferPoolExhausted,
            TransformError::TransformFailed(reason) => PipelineError::TransformFailed(reason),
        }
    }
}

impl From<PredictionError> for PipelineError {
    fn from(err: PredictionError) -> Self {
        match err {
            PredictionError::InvalidInput(reason) => PipelineError::InvalidInput(reason),
            PredictionError::ModelLoadFailed(reason) => PipelineError::ModelLoadFailed(reason),
        }
    }
}

/// Serialized as `{ "kind": ..., "message": ... }` for the presentation layer.
impl Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("PipelineError", 2)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_error_taxonomy() {
        assert_eq!(
            PipelineError::BufferPoolExhausted.kind(),
            ErrorKind::RecoverablePerFrame
        );
        assert_eq!(
            PipelineError::TransformFailed("nan".to_string()).kind(),
            ErrorKind::RecoverablePerFrame
        );
        assert_eq!(
            PipelineError::InferenceTimeout { elapsed_ms: 140 }.kind(),
            ErrorKind::DegradedQuality
        );
        assert!(PipelineError::ContextCreationFailed("no device".to_string()).is_fatal());
        assert!(PipelineError::ModelLoadFailed("missing weights".to_string()).is_fatal());
        assert_eq!(
            PipelineError::InvalidConfig("bad".to_string()).kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn transform_errors_keep_their_meaning() {
        let err: PipelineError = TransformError::ContextCreationFailed("lost".to_string()).into();
        assert!(matches!(err, PipelineError::ContextCreationFailed(_)));
        let err: PipelineError = TransformError::BufferPoolExhausted.into();
        assert_eq!(err.kind(), ErrorKind::RecoverablePerFrame);
    }

    #[test]
    fn serializes_kind_and_message() {
        let err = PipelineError::ContextCreationFailed("graphics device removed".to_string());
        let json = serde_json::to_string(&err).expect("serialize error");
        assert!(json.contains("\"kind\":\"session-fatal\""));
        assert!(json.contains("graphics context unavailable: graphics device removed"));
    }
}
