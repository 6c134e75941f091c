//! Pitch period estimation via the average magnitude difference function.

use crate::{error::Error, samples::SampleBuffer};

use super::{AMDF_FREQ, MAX_PITCH, MIN_PITCH};

// -------------------------------------------------------------------------------------------------

/// Estimates the dominant pitch period of buffered speech frames.
///
/// The detector searches the period `p` in `[sample_rate / MAX_PITCH,
/// sample_rate / MIN_PITCH]` that minimizes the average magnitude difference
/// `sum(|s[i] - s[i + p]|) / p` over a window of two maximum periods. To keep the
/// search cheap at high sample rates, the window is first averaged down to roughly
/// `AMDF_FREQ` Hz (mixing all channels into one), then the winning period is refined
/// with a full-resolution search around the coarse estimate. At abrupt ends of voiced
/// words the minimum can wander; a hysteresis on the previous estimate suppresses the
/// resulting artifacts.
pub(crate) struct PitchDetector {
    channels: usize,
    min_period: usize,
    max_period: usize,
    /// Down-sampling step derived from the sample rate; 1 disables down-sampling.
    sample_skip: usize,
    /// When set, the coarse down-sampled pass is skipped entirely.
    quality: bool,
    prev_period: usize,
    prev_min_diff: u64,
    /// Mono scratch holding the down-mixed search window.
    down_sample: SampleBuffer,
}

impl PitchDetector {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        let sample_rate = sample_rate as usize;
        let min_period = sample_rate / MAX_PITCH;
        let max_period = sample_rate / MIN_PITCH;
        let sample_skip = if sample_rate > AMDF_FREQ {
            sample_rate / AMDF_FREQ
        } else {
            1
        };
        let scratch_size = (2 * max_period + sample_skip - 1) / sample_skip;
        Self {
            channels,
            min_period,
            max_period,
            sample_skip,
            quality: false,
            prev_period: 0,
            prev_min_diff: 0,
            down_sample: SampleBuffer::new(1, scratch_size),
        }
    }

    #[inline]
    pub fn max_period(&self) -> usize {
        self.max_period
    }

    pub fn quality(&self) -> bool {
        self.quality
    }

    pub fn set_quality(&mut self, quality: bool) {
        self.quality = quality;
    }

    /// Forgets the previous period estimate.
    pub fn reset(&mut self) {
        self.prev_period = 0;
        self.prev_min_diff = 0;
        self.down_sample.reset();
    }

    /// Finds the pitch period of the first `2 * max_period` frames of `input`.
    ///
    /// `prefer_new` selects the hysteresis mode: pitch-skipping callers prefer a
    /// fresh estimate and fall back to the previous period only on a clearly
    /// degenerate match, while other callers keep the previous period whenever the
    /// current match is worse.
    pub fn find_period(&mut self, input: &SampleBuffer, prefer_new: bool) -> Result<usize, Error> {
        let skip = self.skip();

        let (period, min_diff, max_diff) = if self.channels == 1 && skip == 1 {
            let window = input.get_slice(2 * self.max_period)?;
            find_period_in_range(window, self.min_period, self.max_period)
        } else {
            self.down_sample_input(input, skip)?;
            let window = self.down_sample.get_slice(2 * (self.max_period / skip))?;
            let coarse =
                find_period_in_range(window, self.min_period / skip, self.max_period / skip);
            if skip == 1 {
                coarse
            } else {
                // Refine the coarse estimate with a full-resolution search in a
                // narrow range around it.
                let center = coarse.0 * skip;
                let min_period = center.saturating_sub(skip << 2).max(self.min_period);
                let max_period = (center + (skip << 2)).min(self.max_period);
                if self.channels == 1 {
                    let window = input.get_slice(2 * max_period)?;
                    find_period_in_range(window, min_period, max_period)
                } else {
                    self.down_sample_input(input, 1)?;
                    let window = self.down_sample.get_slice(2 * max_period)?;
                    find_period_in_range(window, min_period, max_period)
                }
            }
        };

        let best = if self.prev_period_better(min_diff, max_diff, prefer_new) {
            self.prev_period
        } else {
            period
        };
        self.prev_min_diff = min_diff;
        self.prev_period = period;
        Ok(best)
    }

    /// Effective down-sampling step for the coarse search pass.
    fn skip(&self) -> usize {
        if self.quality {
            1
        } else {
            self.sample_skip
        }
    }

    /// Averages `skip` frames (all channels mixed) into one mono sample each, filling
    /// the down-sample scratch with the search window.
    fn down_sample_input(&mut self, input: &SampleBuffer, skip: usize) -> Result<(), Error> {
        let window = 2 * self.max_period;
        self.down_sample.truncate(0);
        let samples = input.get_slice(window)?;
        let group = skip * self.channels;
        for chunk in samples.chunks_exact(group).take(window / skip) {
            let sum: i32 = chunk.iter().map(|&sample| i32::from(sample)).sum();
            self.down_sample.write_slice(&[(sum / group as i32) as i16])?;
        }
        Ok(())
    }

    /// Decides whether the previous period estimate approximates this window better
    /// than the freshly found one.
    fn prev_period_better(&self, min_diff: u64, max_diff: u64, prefer_new: bool) -> bool {
        if min_diff == 0 || self.prev_period == 0 {
            return false;
        }
        if prefer_new {
            if max_diff > min_diff * 3 {
                // got a reasonable match this window
                return false;
            }
            if min_diff * 2 <= self.prev_min_diff * 3 {
                // mismatch is not that much greater this window
                return false;
            }
        } else if min_diff <= self.prev_min_diff {
            return false;
        }
        true
    }
}

// -------------------------------------------------------------------------------------------------

/// Searches `[min_period, max_period]` for the period with the best per-sample AMDF
/// match over `window`, which must span at least `2 * max_period` samples.
///
/// Returns `(best_period, min_diff / best_period, max_diff / worst_period)`; the two
/// normalized diffs give callers a discrimination ratio between the best and worst
/// match. Products are taken in 64 bits so periods up to `sample_rate / 65` cannot
/// overflow the comparisons at any practical sample rate.
fn find_period_in_range(window: &[i16], min_period: usize, max_period: usize) -> (usize, u64, u64) {
    let mut best_period = 0usize;
    let mut worst_period = 255usize;
    let mut min_diff = 1u64;
    let mut max_diff = 0u64;

    for period in min_period..=max_period {
        let mut diff = 0u64;
        for i in 0..period {
            let delta = i32::from(window[i]) - i32::from(window[i + period]);
            diff += u64::from(delta.unsigned_abs());
        }
        if best_period == 0 || diff * (best_period as u64) < min_diff * period as u64 {
            min_diff = diff;
            best_period = period;
        }
        if diff * worst_period as u64 > max_diff * period as u64 {
            max_diff = diff;
            worst_period = period;
        }
    }

    (
        best_period,
        min_diff / best_period as u64,
        max_diff / worst_period as u64,
    )
}

// -------------------------------------------------------------------------------------------------
