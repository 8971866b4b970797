//! Sub-sample timing calibration.
//!
//! The eight sub-sample taps of the device are not spaced exactly 1 ns apart.
//! Counting how often edges land on each tap gives the relative width of
//! every tap without a reference signal; [`Calibrator::smooth_time`] maps an
//! integer timestamp onto that measured scale and dithers inside the tap.
//!
//! The result is advisory. Ordering and `dt_ns` always use the integer time.

use crate::types::{Event, COARSE_STEP_NS, N_CHANNELS, SAMPLE_BITS};
use rand::Rng;

/// Edges recorded across all channels before the histogram freezes.
pub const CALIBRATION_BUDGET: u32 = 100_000;

const TAPS: usize = SAMPLE_BITS as usize;

/// Per-channel histogram of edge sub-sample positions.
///
/// The sample budget is shared by all channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calibrator {
    histogram: [[u32; TAPS]; N_CHANNELS],
    total: u32,
    budget: u32,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Calibrator {
    pub fn new() -> Self {
        Self::with_budget(CALIBRATION_BUDGET)
    }

    pub fn with_budget(budget: u32) -> Self {
        Self {
            histogram: [[0; TAPS]; N_CHANNELS],
            total: 0,
            budget,
        }
    }

    /// Counts one edge at `position` on `channel`.
    ///
    /// Returns `false` once the budget is spent or for out-of-range input.
    pub fn record(&mut self, channel: usize, position: usize) -> bool {
        if self.is_saturated() || channel >= N_CHANNELS || position >= TAPS {
            return false;
        }
        self.histogram[channel][position] += 1;
        self.total += 1;
        true
    }

    pub fn histogram(&self, channel: usize) -> Option<&[u32; TAPS]> {
        self.histogram.get(channel)
    }

    /// Edges recorded so far across all channels.
    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn is_saturated(&self) -> bool {
        self.total >= self.budget
    }

    pub fn reset(&mut self) {
        self.histogram = [[0; TAPS]; N_CHANNELS];
        self.total = 0;
    }

    /// Calibrated, dithered timestamp of `event` in nanoseconds.
    pub fn smooth_time(&self, event: &Event) -> f64 {
        self.smooth_time_with(event, &mut rand::thread_rng())
    }

    /// Same as [`smooth_time`](Self::smooth_time) with a caller-supplied RNG.
    pub fn smooth_time_with<R: Rng + ?Sized>(&self, event: &Event, rng: &mut R) -> f64 {
        let Some(bins) = self.histogram.get(event.channel as usize) else {
            return event.time_ns as f64;
        };
        if self.total == 0 {
            return event.time_ns as f64;
        }

        let position = event.sub_sample();
        let total = self.total as f64;
        let step = COARSE_STEP_NS as f64;

        let mut time = (event.time_ns - position as u64) as f64;
        for &count in &bins[..position] {
            time += step * count as f64 / total;
        }
        time += step * bins[position] as f64 / total * rng.gen::<f64>();
        time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Edge;
    use rand::rngs::mock::StepRng;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn uniform(channel: usize, per_tap: u32) -> Calibrator {
        let mut cal = Calibrator::new();
        for position in 0..TAPS {
            for _ in 0..per_tap {
                cal.record(channel, position);
            }
        }
        cal
    }

    #[test]
    fn test_budget_is_shared_across_channels() {
        let mut cal = Calibrator::with_budget(3);
        assert!(cal.record(0, 1));
        assert!(cal.record(1, 2));
        assert!(cal.record(3, 7));
        assert!(!cal.record(2, 0));
        assert_eq!(cal.total(), 3);
        assert_eq!(cal.histogram(2).unwrap(), &[0; TAPS]);
        assert!(cal.is_saturated());
    }

    #[test]
    fn test_record_rejects_out_of_range() {
        let mut cal = Calibrator::new();
        assert!(!cal.record(4, 0));
        assert!(!cal.record(0, 8));
        assert_eq!(cal.total(), 0);
    }

    #[test]
    fn test_empty_histogram_returns_integer_time() {
        let cal = Calibrator::new();
        let event = Event::new(1, 1234, Edge::Rising, 0x0F, 0);
        assert_eq!(cal.smooth_time(&event), 1234.0);
    }

    #[test]
    fn test_uniform_taps_keep_the_nominal_scale() {
        let cal = uniform(0, 10);
        let event = Event::new(0, 8 * 500 + 3, Edge::Falling, 0xE0, 0);

        let mut zero = StepRng::new(0, 0);
        assert!((cal.smooth_time_with(&event, &mut zero) - 4003.0).abs() < 1e-9);

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let t = cal.smooth_time_with(&event, &mut rng);
            assert!((4003.0..4004.0).contains(&t), "{t} outside tap 3");
        }
    }

    #[test]
    fn test_skewed_taps_shift_the_estimate() {
        let mut cal = Calibrator::new();
        // Tap 0 is three times wider than tap 1.
        for _ in 0..3 {
            cal.record(2, 0);
        }
        cal.record(2, 1);
        let event = Event::new(2, 16 + 1, Edge::Rising, 0x7F, 0);
        let mut zero = StepRng::new(0, 0);
        assert!((cal.smooth_time_with(&event, &mut zero) - 22.0).abs() < 1e-9);
    }
}
