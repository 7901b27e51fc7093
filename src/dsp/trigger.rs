//! Trigger detection against a configured sub-band
//!
//! Each hop whose neighborhood overlaps the armed sub-band has the band's
//! absolute frequency edges mapped into bin indices of the (cropped) hop
//! segment; any bin above the threshold fires the trigger and flips the
//! node from sweeping to focused capture.

use super::psd::PsdSegment;

/// Trigger settings as configured from the console. Mutable at any time;
/// the scanner takes a snapshot per hop.
#[derive(Debug, Clone, Default)]
pub struct TriggerConfig {
    /// Sub-band center in Hz
    pub target_freq: Option<f64>,
    /// Sub-band width in Hz
    pub bandwidth: Option<f64>,
    /// Fire when any bin in the sub-band exceeds this
    pub threshold_db: f32,
    pub active: bool,
}

/// A fully-specified trigger: active with both frequencies resolved.
#[derive(Debug, Clone, Copy)]
pub struct ArmedTrigger {
    pub target_freq: f64,
    pub bandwidth: f64,
    pub threshold_db: f32,
}

impl TriggerConfig {
    /// Snapshot usable for detection, or None while inactive/incomplete.
    pub fn armed(&self) -> Option<ArmedTrigger> {
        if !self.active {
            return None;
        }
        match (self.target_freq, self.bandwidth) {
            (Some(target_freq), Some(bandwidth)) => Some(ArmedTrigger {
                target_freq,
                bandwidth,
                threshold_db: self.threshold_db,
            }),
            _ => None,
        }
    }
}

impl ArmedTrigger {
    fn band_start(&self) -> f64 {
        self.target_freq - self.bandwidth / 2.0
    }

    fn band_stop(&self) -> f64 {
        self.target_freq + self.bandwidth / 2.0
    }

    /// Whether a hop's +-1-hop-width neighborhood overlaps the sub-band.
    pub fn overlaps_hop(&self, center_hz: u64, hop_width: u64) -> bool {
        let center = center_hz as f64;
        let hop = hop_width as f64;
        (center - hop) < self.band_stop() && (center + hop) > self.band_start()
    }

    /// Map the sub-band into the segment and test it against the
    /// threshold. `crop_hz` is how much of the hop's top edge was cropped
    /// for span overshoot.
    pub fn fires(
        &self,
        segment: &PsdSegment,
        center_hz: u64,
        hop_width: u64,
        crop_hz: u64,
    ) -> bool {
        let len = segment.bins.len();
        if len == 0 || hop_width <= crop_hz {
            return false;
        }

        let cropped_hop = (hop_width - crop_hz) as f64;
        let bins_per_hz = len as f64 / cropped_hop;

        let scan_start = center_hz as f64 - hop_width as f64 / 2.0;
        let scan_stop = center_hz as f64 + hop_width as f64 / 2.0 - crop_hz as f64;

        let start_diff = ((self.band_start() - scan_start) * bins_per_hz) as i64;
        let stop_diff = ((self.band_stop() - scan_stop) * bins_per_hz) as i64;

        let start_bin = start_diff.max(0) as usize;
        let stop_bin = if stop_diff < 0 {
            (len as i64 + stop_diff).max(0) as usize
        } else {
            len
        };

        if start_bin >= stop_bin.min(len) {
            return false;
        }

        segment.bins[start_bin..stop_bin.min(len)]
            .iter()
            .any(|&db| db > self.threshold_db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOP: u64 = 1_700_000;
    const CENTER: u64 = 100_000_000;

    fn flat_segment(len: usize, floor_db: f32) -> PsdSegment {
        PsdSegment {
            bins: vec![floor_db; len],
            crop_bins: 0,
            crop_top_bins: 0,
        }
    }

    fn armed(target: f64, bw: f64, threshold: f32) -> ArmedTrigger {
        TriggerConfig {
            target_freq: Some(target),
            bandwidth: Some(bw),
            threshold_db: threshold,
            active: true,
        }
        .armed()
        .unwrap()
    }

    #[test]
    fn test_inactive_or_incomplete_is_not_armed() {
        let mut cfg = TriggerConfig {
            target_freq: Some(100e6),
            bandwidth: Some(200e3),
            threshold_db: -40.0,
            active: false,
        };
        assert!(cfg.armed().is_none());

        cfg.active = true;
        cfg.bandwidth = None;
        assert!(cfg.armed().is_none());
    }

    #[test]
    fn test_spike_inside_band_fires() {
        let trig = armed(CENTER as f64, 200e3, -40.0);
        assert!(trig.overlaps_hop(CENTER, HOP));

        let mut seg = flat_segment(1000, -80.0);
        // segment spans [center - hop/2, center + hop/2]; the band center
        // sits at the middle bin
        seg.bins[500] = -20.0;
        assert!(trig.fires(&seg, CENTER, HOP, 0));
    }

    #[test]
    fn test_spike_outside_band_does_not_fire() {
        let trig = armed(CENTER as f64, 200e3, -40.0);

        let mut seg = flat_segment(1000, -80.0);
        // well below the band's lower edge
        seg.bins[100] = -20.0;
        assert!(!trig.fires(&seg, CENTER, HOP, 0));
    }

    #[test]
    fn test_fires_iff_above_threshold() {
        let trig = armed(CENTER as f64, 200e3, -40.0);

        let mut seg = flat_segment(1000, -80.0);
        seg.bins[500] = -41.0;
        assert!(!trig.fires(&seg, CENTER, HOP, 0));
        seg.bins[500] = -39.0;
        assert!(trig.fires(&seg, CENTER, HOP, 0));
    }

    #[test]
    fn test_band_clamped_to_segment_bounds() {
        // band wider than the hop: slice clamps to the whole segment
        let trig = armed(CENTER as f64, 10e6, -40.0);
        let mut seg = flat_segment(1000, -80.0);
        seg.bins[0] = -10.0;
        assert!(trig.fires(&seg, CENTER, HOP, 0));
    }

    #[test]
    fn test_distant_hop_skipped_by_overlap_check() {
        let trig = armed(200e6, 200e3, -40.0);
        assert!(!trig.overlaps_hop(CENTER, HOP));
    }
}
