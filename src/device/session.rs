//! RTL-SDR device session
//!
//! One session owns one open receiver handle. Sessions are only ever
//! reached through the arbiter's permit, so at most one handle exists
//! process-wide.

use rtlsdr_rs::RtlSdr;
use tracing::{debug, info};

use crate::error::DeviceError;

/// Samples discarded after every retune while the tuner PLL settles.
pub const SETTLE_SAMPLES: usize = 2048;

/// Receiver settings applied once when a session opens.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub device_index: u32,
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Manual tuner gain in dB (the tuner takes tenths of dB)
    pub gain_db: f32,
    /// PPM frequency correction, 0 = none
    pub ppm_error: i32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            sample_rate: 2.4e6,
            gain_db: 30.0,
            ppm_error: 0,
        }
    }
}

/// Anything that can be tuned and read like a receiver. The scanner and
/// spectrogram capturer are written against this so they can run against a
/// synthetic source in tests.
pub trait SampleSource: Send {
    /// Retune to a center frequency in Hz.
    fn tune(&mut self, freq_hz: u64) -> Result<(), DeviceError>;

    /// Sample rate the source is running at, in Hz.
    fn sample_rate(&self) -> f64;

    /// Blocking read of `count` complex samples as interleaved unsigned
    /// 8-bit I/Q bytes (2 bytes per sample).
    fn read_samples(&mut self, count: usize) -> Result<Vec<u8>, DeviceError>;

    /// Read and discard `count` samples (tuner settling).
    fn settle(&mut self, count: usize) -> Result<(), DeviceError> {
        self.read_samples(count).map(|_| ())
    }

    /// Release the hardware handle.
    fn close(&mut self);
}

/// An open RTL-SDR receiver.
pub struct DeviceSession {
    dev: RtlSdr,
    config: DeviceConfig,
}

impl DeviceSession {
    /// Open and configure the receiver. Gain is fixed manual (AGC stays
    /// off), the sample rate is applied for the session's lifetime.
    pub fn open(config: &DeviceConfig) -> Result<Self, DeviceError> {
        let open_err = |reason: String| DeviceError::Open {
            index: config.device_index,
            reason,
        };

        let mut dev = RtlSdr::open(config.device_index as usize)
            .map_err(|e| open_err(format!("{e:?}")))?;

        dev.set_tuner_gain(rtlsdr_rs::TunerGain::Manual(
            (config.gain_db * 10.0) as i32,
        ))
        .map_err(|e| open_err(format!("{e:?}")))?;
        dev.set_bias_tee(false)
            .map_err(|e| open_err(format!("{e:?}")))?;
        dev.set_sample_rate(config.sample_rate as u32)
            .map_err(|e| open_err(format!("{e:?}")))?;
        // Reset the endpoint before the first read (mandatory)
        dev.reset_buffer().map_err(|e| open_err(format!("{e:?}")))?;

        info!(
            "Opened RTL-SDR {} at {:.1} MSPS, gain {:.1} dB",
            config.device_index,
            config.sample_rate / 1e6,
            config.gain_db
        );

        Ok(Self {
            dev,
            config: config.clone(),
        })
    }

    /// Frequency actually programmed after PPM correction.
    fn corrected(&self, freq_hz: u64) -> u64 {
        if self.config.ppm_error == 0 {
            return freq_hz;
        }
        let scale = 1.0 + self.config.ppm_error as f64 / 1e6;
        (freq_hz as f64 * scale) as u64
    }
}

impl SampleSource for DeviceSession {
    fn tune(&mut self, freq_hz: u64) -> Result<(), DeviceError> {
        let corrected = self.corrected(freq_hz);
        debug!("Tuning to {:.3} MHz", freq_hz as f64 / 1e6);
        self.dev
            .set_center_freq(corrected as u32)
            .map_err(|e| DeviceError::Tune {
                freq_hz,
                reason: format!("{e:?}"),
            })
    }

    fn sample_rate(&self) -> f64 {
        self.config.sample_rate
    }

    fn read_samples(&mut self, count: usize) -> Result<Vec<u8>, DeviceError> {
        let mut buf = vec![0u8; count * 2];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .dev
                .read_sync(&mut buf[filled..])
                .map_err(|e| DeviceError::Read(format!("{e:?}")))?;
            if n == 0 {
                return Err(DeviceError::Read("short read from device".into()));
            }
            filled += n;
        }
        Ok(buf)
    }

    fn close(&mut self) {
        debug!("Closing RTL-SDR {}", self.config.device_index);
        let _ = self.dev.close();
    }
}

/// Synthetic source for tests: replays bytes from a generator closure and
/// records every tune.
#[cfg(test)]
pub struct MockSource {
    pub rate: f64,
    pub tuned: Vec<u64>,
    pub closed: bool,
    pub gen: Box<dyn FnMut(u64, usize) -> Vec<u8> + Send>,
}

#[cfg(test)]
impl MockSource {
    /// Source that returns centered (zero-signal) samples everywhere.
    pub fn silent(rate: f64) -> Self {
        Self {
            rate,
            tuned: Vec::new(),
            closed: false,
            gen: Box::new(|_, count| vec![128u8; count * 2]),
        }
    }

    pub fn with_gen(rate: f64, gen: Box<dyn FnMut(u64, usize) -> Vec<u8> + Send>) -> Self {
        Self {
            rate,
            tuned: Vec::new(),
            closed: false,
            gen,
        }
    }
}

#[cfg(test)]
impl SampleSource for MockSource {
    fn tune(&mut self, freq_hz: u64) -> Result<(), DeviceError> {
        self.tuned.push(freq_hz);
        Ok(())
    }

    fn sample_rate(&self) -> f64 {
        self.rate
    }

    fn read_samples(&mut self, count: usize) -> Result<Vec<u8>, DeviceError> {
        let freq = self.tuned.last().copied().unwrap_or(0);
        Ok((self.gen)(freq, count))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
