//! Configuration loaded from environment variables

use std::path::PathBuf;

/// Encoding used for spectrogram results on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectroFormat {
    /// 2-D dB matrix, rows x 512 floats
    Matrix,
    /// Grayscale PNG raster
    Png,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// RTL-SDR device index
    pub device_index: u32,

    /// Tuner gain in dB (manual, applied as tenths of dB)
    pub gain_db: f32,

    /// PPM frequency correction
    pub ppm_error: i32,

    /// Device sample rate in Hz
    pub sample_rate: f64,

    /// Path to the dual-frequency acquisition tool used for TDOA capture
    pub tdoa_tool_path: PathBuf,

    /// How spectrogram results are encoded for the transport
    pub spectro_format: SpectroFormat,

    /// Liveness heartbeat interval in seconds
    pub heartbeat_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            device_index: std::env::var("DEVICE_INDEX")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),

            gain_db: std::env::var("DEVICE_GAIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30.0),

            ppm_error: std::env::var("PPM_ERROR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),

            sample_rate: std::env::var("SAMPLE_RATE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2.4e6),

            tdoa_tool_path: std::env::var("TDOA_TOOL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./.librtlsdr-2freq/build/src/rtl_sdr")),

            spectro_format: match std::env::var("SPECTRO_FORMAT").as_deref() {
                Ok("matrix") => SpectroFormat::Matrix,
                _ => SpectroFormat::Png,
            },

            heartbeat_secs: std::env::var("HEARTBEAT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        }
    }
}
