//! Signal processing: per-hop PSD estimation, the wideband hop scanner,
//! trigger detection and the short-time-FFT spectrogram capturer.

pub mod psd;
pub mod scanner;
pub mod spectrogram;
pub mod trigger;

pub use psd::PsdSegment;
pub use scanner::{ScanConfig, SweepOutcome, SweepPlan, HOP_WIDTH, MAX_PSD_LEN};
pub use trigger::TriggerConfig;
