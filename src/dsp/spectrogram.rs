//! Focused short-time-FFT capture around a trigger frequency
//!
//! Reads a one-second burst at the target frequency and folds it into a
//! 512x512 time-by-frequency dB matrix. The matrix goes out either as raw
//! floats or rendered to a grayscale PNG, depending on node configuration.

use rustfft::num_complex::Complex32;
use rustfft::FftPlanner;
use tracing::{debug, warn};

use crate::device::{SampleSource, SETTLE_SAMPLES};
use crate::dsp::psd::iq_to_complex;
use crate::error::DeviceError;

/// Time rows in the output matrix.
pub const NUM_ROWS: usize = 512;
/// Frequency bins kept per row, centered on the tuned frequency.
pub const NUM_BINS: usize = 512;
/// Burst length in seconds when the caller does not supply a count.
const RECORD_SECS: f64 = 1.0;

const EPSILON: f32 = 1e-12;

/// Capture a burst at `center_freq` and return the spectrogram matrix.
/// The caller holds the arbiter permit; read and FFT run on the blocking
/// worker like a sweep hop does.
pub async fn capture_spectrogram<S>(
    slot: &mut Option<S>,
    center_freq: f64,
    span: f64,
    sample_count: Option<usize>,
) -> Result<Vec<Vec<f32>>, DeviceError>
where
    S: SampleSource + 'static,
{
    let mut sess = match slot.take() {
        Some(s) => s,
        None => return Err(DeviceError::Read("session missing".into())),
    };

    let (sess, matrix) = tokio::task::spawn_blocking(move || {
        let result: Result<Vec<Vec<f32>>, DeviceError> = (|| {
            let rate = sess.sample_rate();
            let total = sample_count.unwrap_or((rate * RECORD_SECS) as usize);

            sess.tune(center_freq as u64)?;
            sess.settle(SETTLE_SAMPLES)?;
            let raw = sess.read_samples(total)?;

            debug!(
                "Spectrogram burst: {} samples at {:.3} MHz, span {:.3} MHz",
                total,
                center_freq / 1e6,
                span / 1e6
            );
            Ok(compute_spectrogram(&iq_to_complex(&raw), rate, span))
        })();
        (sess, result)
    })
    .await
    .map_err(|e| DeviceError::Read(format!("capture worker failed: {e}")))?;

    *slot = Some(sess);
    matrix
}

/// Short-time FFT over a DC-removed burst. FFT length is chosen so the
/// kept `NUM_BINS` central bins cover `span` Hz; rows that would overrun
/// the burst stay at the zero fill.
pub fn compute_spectrogram(samples: &[Complex32], sample_rate: f64, span: f64) -> Vec<Vec<f32>> {
    let total = samples.len();
    let mut matrix = vec![vec![0.0f32; NUM_BINS]; NUM_ROWS];
    if total == 0 {
        return matrix;
    }

    // remove the DC offset before slicing into windows
    let mean = samples.iter().sum::<Complex32>() / total as f32;
    let x: Vec<Complex32> = samples.iter().map(|s| *s - mean).collect();

    let bin_width = span.max(1.0) / NUM_BINS as f64;
    let fft_size = ((sample_rate / bin_width).round() as usize).max(NUM_BINS);
    let hop = (total / NUM_ROWS).max(1);

    let fft = FftPlanner::new().plan_fft_forward(fft_size);
    let mut row_buf = vec![Complex32::default(); fft_size];

    for (r, row) in matrix.iter_mut().enumerate() {
        let start = r * hop;
        if start + fft_size > total {
            break;
        }
        row_buf.copy_from_slice(&x[start..start + fft_size]);
        fft.process(&mut row_buf);

        for (b, out) in row.iter_mut().enumerate() {
            // fftshift folded into the index: NUM_BINS centered on DC
            let v = row_buf[(fft_size - NUM_BINS / 2 + b) % fft_size];
            let power = v.re * v.re + v.im * v.im;
            *out = 10.0 * (power + EPSILON).log10();
        }
    }

    matrix
}

/// Render the matrix to a grayscale PNG, black = quietest bin. Returns an
/// empty buffer if encoding fails.
pub fn render_png(matrix: &[Vec<f32>]) -> Vec<u8> {
    let rows = matrix.len();
    let cols = matrix.first().map(|r| r.len()).unwrap_or(0);
    if rows == 0 || cols == 0 {
        return Vec::new();
    }

    let mut lo = f32::MAX;
    let mut hi = f32::MIN;
    for row in matrix {
        for &v in row {
            lo = lo.min(v);
            hi = hi.max(v);
        }
    }
    let range = (hi - lo).max(1e-6);

    let mut img = image::GrayImage::new(cols as u32, rows as u32);
    for (y, row) in matrix.iter().enumerate() {
        for (x, &v) in row.iter().enumerate() {
            let level = ((v - lo) / range * 255.0) as u8;
            img.put_pixel(x as u32, y as u32, image::Luma([level]));
        }
    }

    let mut bytes = Vec::new();
    if let Err(e) = img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageOutputFormat::Png,
    ) {
        warn!("Failed to encode spectrogram raster: {}", e);
        return Vec::new();
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::session::MockSource;

    fn tone(total: usize, cycle: usize) -> Vec<Complex32> {
        (0..total)
            .map(|k| {
                let phase = 2.0 * std::f32::consts::PI * (k % cycle) as f32 / cycle as f32;
                Complex32::new(phase.cos(), phase.sin())
            })
            .collect()
    }

    #[test]
    fn test_matrix_shape_is_fixed() {
        let rate = 512_000.0;
        let samples = tone(51_200, 8);
        let matrix = compute_spectrogram(&samples, rate, rate);
        assert_eq!(matrix.len(), NUM_ROWS);
        for row in &matrix {
            assert_eq!(row.len(), NUM_BINS);
        }
    }

    #[test]
    fn test_tone_peaks_above_center() {
        // span == rate makes fft_size == NUM_BINS, so a tone at +rate/8
        // peaks NUM_BINS/8 bins above the center column
        let rate = 512_000.0;
        let samples = tone(51_200, 8);
        let matrix = compute_spectrogram(&samples, rate, rate);

        let row = &matrix[0];
        let peak = row
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!(
            (peak as i64 - (NUM_BINS / 2 + NUM_BINS / 8) as i64).abs() <= 1,
            "peak at {}",
            peak
        );
    }

    #[test]
    fn test_short_burst_leaves_zero_rows() {
        let rate = 512_000.0;
        // only enough samples for a handful of rows
        let samples = tone(2048, 8);
        let matrix = compute_spectrogram(&samples, rate, rate);
        assert!(matrix[NUM_ROWS - 1].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_render_png_magic() {
        let matrix = vec![vec![-80.0f32; 64]; 64];
        let png = render_png(&matrix);
        assert!(png.len() > 8);
        assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn test_capture_tunes_and_returns_session() {
        let mut slot = Some(MockSource::silent(64_000.0));
        let matrix = capture_spectrogram(&mut slot, 433.92e6, 64_000.0, Some(4096))
            .await
            .unwrap();
        assert_eq!(matrix.len(), NUM_ROWS);
        let sess = slot.as_ref().unwrap();
        assert_eq!(sess.tuned, vec![433_920_000]);
    }
}
