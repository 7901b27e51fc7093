//! Wideband hop scanner
//!
//! Sweeps the configured span in fixed-width hops, computing one PSD
//! segment per hop and stitching them into a single full-band vector in
//! increasing-frequency order. Each hop's tune+read+FFT runs on a blocking
//! worker so the control loop stays responsive; the cancellation token is
//! polled before every hop.

use tracing::{debug, info};

use crate::device::{CancelToken, SampleSource, SETTLE_SAMPLES};

use super::psd::{psd_segment, spec_size};
use super::trigger::ArmedTrigger;

/// Fixed hop width for the sweep.
pub const HOP_WIDTH: u64 = 1_700_000;

/// Cap on the stitched PSD vector delivered to the transport.
pub const MAX_PSD_LEN: usize = 20_000;

/// Sweep span settings. Mutable via the console; snapshot at the start of
/// each pass.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Span center in Hz
    pub center_freq: f64,
    /// Span width in Hz
    pub bandwidth: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            center_freq: 850e6,
            bandwidth: 5e6,
        }
    }
}

/// One hop of a sweep pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hop {
    /// Tune frequency in Hz
    pub center: u64,
    /// Hz of the hop's top edge past the sweep stop frequency
    pub crop_hz: u64,
    /// `crop_hz` as a fraction of the hop width
    pub crop_top: f64,
}

/// A resolved sweep pass: start/stop edges, hop list and per-hop FFT size.
#[derive(Debug, Clone)]
pub struct SweepPlan {
    pub start: u64,
    pub stop: u64,
    pub hop_width: u64,
    pub fft_size: usize,
}

impl SweepPlan {
    pub fn new(config: &ScanConfig) -> Self {
        let start = (config.center_freq - config.bandwidth / 2.0) as u64;
        let stop = (config.center_freq + config.bandwidth / 2.0) as u64;
        let span = stop.saturating_sub(start);
        Self {
            start,
            stop,
            hop_width: HOP_WIDTH,
            fft_size: spec_size(HOP_WIDTH, span),
        }
    }

    /// Hop centers from `start + hop/2` up to (excluding) `stop + hop/2`,
    /// in increasing order. The last hop overshoots the stop frequency
    /// whenever the span is not an exact multiple of the hop width; the
    /// overshoot is recorded for top-edge cropping.
    pub fn hops(&self) -> Vec<Hop> {
        let mut hops = Vec::new();
        let mut center = self.start + self.hop_width / 2;
        while center < self.stop + self.hop_width / 2 {
            let crop_hz = (center + self.hop_width / 2).saturating_sub(self.stop);
            hops.push(Hop {
                center,
                crop_hz,
                crop_top: crop_hz as f64 / self.hop_width as f64,
            });
            center += self.hop_width;
        }
        hops
    }
}

/// How a sweep pass ended.
#[derive(Debug)]
pub enum SweepOutcome {
    /// Full pass completed; stitched, decimated PSD vector.
    Psd(Vec<f32>),
    /// Trigger fired mid-pass; capture should follow at these settings.
    Triggered { target_freq: f64, bandwidth: f64 },
    /// Cancellation observed at a hop boundary; the session was closed.
    Cancelled,
}

/// Run one sweep pass over an open session. The caller holds the arbiter
/// permit; the session only leaves the slot to visit the blocking worker.
///
/// `trigger_snapshot` is re-read every hop so console changes apply at the
/// next hop boundary, never mid-hop.
pub async fn run_sweep_pass<S, F>(
    slot: &mut Option<S>,
    plan: &SweepPlan,
    trigger_snapshot: F,
    cancel: &CancelToken,
) -> Result<SweepOutcome, crate::error::DeviceError>
where
    S: SampleSource + 'static,
    F: Fn() -> Option<ArmedTrigger>,
{
    let hops = plan.hops();
    debug!(
        "Sweep pass: {:.3}-{:.3} MHz, {} hops, fft {}",
        plan.start as f64 / 1e6,
        plan.stop as f64 / 1e6,
        hops.len(),
        plan.fft_size
    );

    let mut psd: Vec<f32> = Vec::new();

    for hop in hops {
        if cancel.is_cancelled() {
            if let Some(mut sess) = slot.take() {
                sess.close();
            }
            info!("Sweep cancelled at {:.3} MHz", hop.center as f64 / 1e6);
            return Ok(SweepOutcome::Cancelled);
        }

        let mut sess = match slot.take() {
            Some(s) => s,
            None => return Err(crate::error::DeviceError::Read("session missing".into())),
        };

        let fft_size = plan.fft_size;
        let hop_width = plan.hop_width;
        let (sess, segment) = tokio::task::spawn_blocking(move || {
            let segment = scan_hop(&mut sess, hop, hop_width, fft_size);
            (sess, segment)
        })
        .await
        .map_err(|e| crate::error::DeviceError::Read(format!("hop worker failed: {e}")))?;
        *slot = Some(sess);

        let segment = segment?;
        debug!(
            "Hop {:.3} MHz: {} bins ({} cropped per edge, {} off the top)",
            hop.center as f64 / 1e6,
            segment.bins.len(),
            segment.crop_bins,
            segment.crop_top_bins
        );

        if let Some(trigger) = trigger_snapshot() {
            if trigger.overlaps_hop(hop.center, plan.hop_width)
                && trigger.fires(&segment, hop.center, plan.hop_width, hop.crop_hz)
            {
                info!(
                    "TRIGGERED at {:.3} MHz (threshold {} dB)",
                    trigger.target_freq / 1e6,
                    trigger.threshold_db
                );
                return Ok(SweepOutcome::Triggered {
                    target_freq: trigger.target_freq,
                    bandwidth: trigger.bandwidth,
                });
            }
        }

        psd.extend_from_slice(&segment.bins);
    }

    Ok(SweepOutcome::Psd(decimate(psd, MAX_PSD_LEN)))
}

/// Tune, settle, read and estimate one hop. Runs on the blocking worker.
fn scan_hop<S: SampleSource>(
    sess: &mut S,
    hop: Hop,
    hop_width: u64,
    fft_size: usize,
) -> Result<super::psd::PsdSegment, crate::error::DeviceError> {
    sess.tune(hop.center)?;
    sess.settle(SETTLE_SAMPLES)?;
    let raw = sess.read_samples(fft_size)?;
    Ok(psd_segment(&raw, sess.sample_rate(), hop_width, hop.crop_top))
}

/// Cap the stitched vector by keeping every k-th sample,
/// `k = ceil(len/max_len)`. A naive pick, not an averaging filter; good
/// enough for the console's canvas width.
pub fn decimate(psd: Vec<f32>, max_len: usize) -> Vec<f32> {
    if max_len == 0 || psd.len() < max_len {
        return psd;
    }
    let k = psd.len().div_ceil(max_len);
    psd.into_iter().step_by(k).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::session::MockSource;
    use crate::dsp::trigger::TriggerConfig;

    fn five_mhz_plan() -> SweepPlan {
        SweepPlan::new(&ScanConfig {
            center_freq: 850e6,
            bandwidth: 5e6,
        })
    }

    #[test]
    fn test_five_mhz_span_is_three_hops() {
        let plan = five_mhz_plan();
        let hops = plan.hops();
        assert_eq!(hops.len(), 3);

        // hops are stitched in increasing-frequency order
        for pair in hops.windows(2) {
            assert!(pair[0].center < pair[1].center);
        }

        // span is not a hop multiple, so the last hop overshoots
        assert_eq!(hops[0].crop_hz, 0);
        assert_eq!(hops[1].crop_hz, 0);
        assert!(hops[2].crop_top > 0.0);
        assert_eq!(
            hops[2].crop_hz,
            hops[2].center + plan.hop_width / 2 - plan.stop
        );
    }

    #[test]
    fn test_decimate_never_exceeds_max() {
        for len in [0usize, 1, 7, 19_999, 20_000, 20_001, 61_440, 100_001] {
            for max in [1usize, 7, 20_000] {
                let out = decimate(vec![0.0; len], max);
                assert!(
                    out.len() <= max,
                    "len {} max {} -> {}",
                    len,
                    max,
                    out.len()
                );
            }
        }
    }

    #[test]
    fn test_decimate_below_cap_is_identity() {
        let psd: Vec<f32> = (0..100).map(|i| i as f32).collect();
        assert_eq!(decimate(psd.clone(), 20_000), psd);
    }

    #[tokio::test]
    async fn test_full_pass_stitches_all_hops() {
        let plan = five_mhz_plan();
        let mut slot = Some(MockSource::silent(2.4e6));
        let cancel = CancelToken::new();

        let outcome = run_sweep_pass(&mut slot, &plan, || None, &cancel)
            .await
            .unwrap();

        match outcome {
            SweepOutcome::Psd(psd) => {
                // two full hops plus one top-cropped hop
                let n = plan.fft_size;
                let crop = (((2.4e6 - HOP_WIDTH as f64) / 2.4e6 * n as f64) / 2.0) as usize;
                let full = n - 2 * crop;
                let last_top = (plan.hops()[2].crop_top * full as f64) as usize;
                assert_eq!(psd.len(), 3 * full - last_top);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(slot.is_some(), "session returned to the slot");
    }

    #[tokio::test]
    async fn test_cancelled_pass_closes_session() {
        let plan = five_mhz_plan();
        let mut slot = Some(MockSource::silent(2.4e6));
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = run_sweep_pass(&mut slot, &plan, || None, &cancel)
            .await
            .unwrap();
        assert!(matches!(outcome, SweepOutcome::Cancelled));
        assert!(slot.is_none(), "cancelled pass must close the session");
    }

    #[tokio::test]
    async fn test_first_firing_hop_wins() {
        let plan = five_mhz_plan();
        // strong DC spike everywhere: any armed hop fires
        let mut slot = Some(MockSource::with_gen(
            2.4e6,
            Box::new(|_, count| vec![255u8; count * 2]),
        ));
        let cancel = CancelToken::new();

        let trigger = TriggerConfig {
            target_freq: Some(plan.hops()[1].center as f64),
            bandwidth: Some(400e3),
            threshold_db: -30.0,
            active: true,
        };

        let outcome = run_sweep_pass(&mut slot, &plan, || trigger.armed(), &cancel)
            .await
            .unwrap();

        match outcome {
            SweepOutcome::Triggered { target_freq, .. } => {
                assert_eq!(target_freq, plan.hops()[1].center as f64);
            }
            other => panic!("expected trigger, got {:?}", other),
        }
        // the pass aborted with the session still open for the capture
        assert!(slot.is_some());
    }
}
