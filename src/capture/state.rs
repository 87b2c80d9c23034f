//! Active recording-session state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::recorder::RecorderSession;

/// Data for one active recording session.
pub struct ActiveSession {
    pub session: RecorderSession,
    pub started_at: DateTime<Utc>,
    /// Configured source size; 0x0 when negotiated from the first frame.
    pub width: u32,
    pub height: u32,
    pub cinematic_enabled: bool,
}

impl ActiveSession {
    pub fn session_id(&self) -> &str {
        self.session.session_id()
    }
}

/// Single-slot recorder state shared with the embedding layer.
#[derive(Clone, Default)]
pub struct RecorderState(pub Arc<Mutex<Option<ActiveSession>>>);

impl RecorderState {
    pub fn new() -> Self {
        Self::default()
    }
}
