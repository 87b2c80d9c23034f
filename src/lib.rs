//! Cursor-driven virtual camera for screen recordings.
//!
//! Captured frames flow through [`capture::orchestrator::FrameOrchestrator`]: cursor
//! tracking, throttled trajectory prediction, a damped camera state machine and an affine
//! zoom transform rendered into pooled buffers, then on to the encoder.

pub mod algorithm;
pub mod capture;
pub mod commands;
pub mod error;
pub mod models;
pub mod rendering;
pub mod telemetry;

pub use error::{ErrorKind, PipelineError, PipelineResult};

/// Installs the `env_logger` backend (honors `RUST_LOG`). Safe to call more than once.
pub fn init_logging() {
    if env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init()
        .is_err()
    {
        log::debug!("init_logging: logger already installed");
    }
}
