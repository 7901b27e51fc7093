//! Error taxonomy for the acquisition engine
//!
//! Failures local to one activity (a sweep pass or a TDOA job) never take
//! down the control loop; they are logged and the loop keeps serving
//! commands.

use thiserror::Error;

/// Hardware receiver failures. Aborts the current activity and tears down
/// the device session.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to open device {index}: {reason}")]
    Open { index: u32, reason: String },

    #[error("failed to tune to {freq_hz} Hz: {reason}")]
    Tune { freq_hz: u64, reason: String },

    #[error("sample read failed: {0}")]
    Read(String),
}

/// External acquisition tool failures. The job fails, no retry.
#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("failed to launch acquisition tool '{tool}': {reason}")]
    Launch { tool: String, reason: String },

    #[error("acquisition tool produced no output")]
    EmptyOutput,

    #[error("error reading acquisition tool output: {0}")]
    Output(String),
}

/// Invalid or missing settings for a requested capture. The capture is
/// skipped before any hardware is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TDOA capture requires both target and reference frequency")]
    MissingFrequency,
}

/// Transport send failures. Caught locally and dropped; losing a telemetry
/// frame is not fatal to the node.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("data channel not open")]
    ChannelClosed,

    #[error("transport write failed: {0}")]
    Io(String),
}
