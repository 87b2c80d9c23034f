//! Non-blocking delivery of [`PipelineEvent`]s to an observer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use crate::models::events::PipelineEvent;

/// Cloneable sending half shared by every pipeline stage.
///
/// Uses `try_send` only: when the observer falls behind, events are counted and dropped.
#[derive(Clone, Default)]
pub struct EventEmitter {
    tx: Option<SyncSender<PipelineEvent>>,
    dropped: Arc<AtomicU64>,
}

impl EventEmitter {
    pub fn channel(depth: usize) -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = sync_channel(depth.max(1));
        (
            Self {
                tx: Some(tx),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Emitter with no observer; every event is discarded.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: PipelineEvent) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::trace!("events: observer queue full, dropped {event:?} (total {dropped})");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("connected", &self.tx.is_some())
            .field("dropped", &self.dropped())
            .finish()
    }
}
