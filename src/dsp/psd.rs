//! Power-spectral-density estimation for one hop
//!
//! Raw receiver bytes go through Hann windowing and a normalized FFT into a
//! dB spectrum ordered lowest-frequency-first, then the anti-alias roll-off
//! outside the hop width is cropped from both edges. Output length is a
//! pure function of (N, hop, sample rate, crop_top), which the scanner
//! relies on when stitching hops.

use rustfft::num_complex::Complex32;
use rustfft::FftPlanner;

/// Smallest FFT size used for a hop.
pub const MIN_SPEC_SIZE: usize = 1024;

/// Keeps log10 finite on empty bins; the floor works out to -120 dB.
const PSD_EPSILON: f32 = 1e-12;

/// One hop's PSD estimate and the crops applied to it.
#[derive(Debug, Clone)]
pub struct PsdSegment {
    /// dB magnitudes, index 0 = lowest frequency in the hop
    pub bins: Vec<f32>,
    /// bins removed from each edge for filter roll-off
    pub crop_bins: usize,
    /// extra bins removed from the top edge for span overshoot
    pub crop_top_bins: usize,
}

/// Convert interleaved unsigned 8-bit I/Q bytes to normalized complex
/// samples: ((I-128)/128) + j((Q-128)/128).
pub fn iq_to_complex(raw: &[u8]) -> Vec<Complex32> {
    raw.chunks_exact(2)
        .map(|pair| {
            Complex32::new(
                (pair[0] as f32 - 128.0) / 128.0,
                (pair[1] as f32 - 128.0) / 128.0,
            )
        })
        .collect()
}

/// Symmetric Hann window of length n.
pub fn hann_window(n: usize) -> Vec<f32> {
    if n <= 1 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|k| {
            let x = 2.0 * std::f32::consts::PI * k as f32 / (n - 1) as f32;
            0.5 * (1.0 - x.cos())
        })
        .collect()
}

/// FFT size for a hop, scaled so per-Hz resolution stays roughly constant
/// over the whole span: next power of two of `hop/span * 2048`, floored at
/// `MIN_SPEC_SIZE`.
pub fn spec_size(hop_width: u64, span: u64) -> usize {
    if span == 0 {
        return MIN_SPEC_SIZE;
    }
    let scaled = (hop_width as f64 / span as f64) * 2048.0;
    (scaled as usize).next_power_of_two().max(MIN_SPEC_SIZE)
}

/// Windowed, normalized PSD of one hop in dB, edge-cropped.
///
/// `crop_top` is the fraction of the (roll-off-cropped) hop that overshot
/// the sweep's stop frequency and gets removed from the top edge.
pub fn psd_segment(raw: &[u8], sample_rate: f64, hop_hz: u64, crop_top: f64) -> PsdSegment {
    let mut samples = iq_to_complex(raw);
    let n = samples.len();

    let window = hann_window(n);
    for (s, w) in samples.iter_mut().zip(&window) {
        *s *= *w;
    }

    FftPlanner::new().plan_fft_forward(n).process(&mut samples);

    let norm = n as f32 * window.iter().map(|w| w * w).sum::<f32>();
    let mut db = Vec::with_capacity(n);
    for i in 0..n {
        // fftshift: index 0 becomes the lowest frequency bin
        let v = samples[(i + n / 2) % n];
        let power = (v.re * v.re + v.im * v.im) / norm;
        db.push(10.0 * (power + PSD_EPSILON).log10());
    }

    // Fraction of the spectrum outside the requested hop width
    let crop_fraction = (sample_rate - hop_hz as f64) / sample_rate;
    let crop_bins = ((crop_fraction * n as f64) / 2.0) as usize;
    let crop_top_bins = (crop_top * (n - 2 * crop_bins) as f64) as usize;

    let end = n - crop_bins - crop_top_bins;
    PsdSegment {
        bins: db[crop_bins..end].to_vec(),
        crop_bins,
        crop_top_bins,
    }
}
