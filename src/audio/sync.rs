use static_assertions::const_assert;

use crate::buffer::{AudioBuffer, AudioSpec};

// beyond this drift, nudging sample counts can't catch up, so we stop
// averaging and wait for the drift to come back into range
const NOSYNC_THRESHOLD: f64 = 1.0;

/// Number of blocks averaged before any correction is applied.
pub const DIFF_AVG_NB: u32 = 20;

// these are usize so they multiply directly against byte sizes
const MIN_CORRECTION_PERCENT: usize = 90;
const MAX_CORRECTION_PERCENT: usize = 110;

const_assert!(DIFF_AVG_NB > 0);
const_assert!(MIN_CORRECTION_PERCENT < 100 && MAX_CORRECTION_PERCENT > 100);

/// Pulls audio toward the master clock by shrinking or stretching each
/// decoded block by up to 10% before it reaches the device.
pub struct AudioSync {
    spec: AudioSpec,
    diff_cum: f64,
    diff_avg_coef: f64,
    diff_threshold: f64,
    diff_avg_count: u32,
}

impl AudioSync {
    /// `callback_samples` is the device callback period in sample frames.
    /// Averaged drift below two periods is left alone.
    pub fn new(spec: AudioSpec, callback_samples: usize) -> Self {
        AudioSync {
            spec,
            diff_cum: 0.0,
            diff_avg_coef: (0.01f64.ln() / f64::from(DIFF_AVG_NB)).exp(),
            diff_threshold: 2.0 * callback_samples as f64 / f64::from(spec.sample_rate),
            diff_avg_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.diff_cum = 0.0;
        self.diff_avg_count = 0;
    }

    pub fn average_diff(&self) -> f64 {
        self.diff_cum * (1.0 - self.diff_avg_coef)
    }

    /// Size in bytes the block of `size` bytes should be played at, given
    /// `drift` = audio clock minus master clock. `None` means audio is the
    /// master and is never corrected.
    pub fn wanted_size(&mut self, size: usize, drift: Option<f64>) -> usize {
        let Some(diff) = drift else {
            return size;
        };

        if diff >= NOSYNC_THRESHOLD {
            // difference is too big for sample correction, start over
            self.reset();
            return size;
        }

        self.diff_cum = diff + self.diff_avg_coef * self.diff_cum;

        if self.diff_avg_count < DIFF_AVG_NB {
            // not enough measures for a reliable estimate yet
            self.diff_avg_count += 1;
            return size;
        }

        if self.average_diff().abs() < self.diff_threshold {
            return size;
        }

        let frame_size = self.spec.frame_size() as i64;
        if size % frame_size as usize != 0 {
            // partial frames can't be resized by whole frames
            return size;
        }

        let frames = (diff * f64::from(self.spec.sample_rate)) as i64;
        let wanted = size as i64 + frames * frame_size;

        // clamp bounds are aligned inward so that the block stays made of
        // whole frames and never leaves the 90%..110% window
        let min = align_up((size * MIN_CORRECTION_PERCENT).div_ceil(100), frame_size as usize);
        let max = align_down(size * MAX_CORRECTION_PERCENT / 100, frame_size as usize);

        wanted.clamp(min as i64, max as i64) as usize
    }

    /// Applies [`AudioSync::wanted_size`] to `block` in place, truncating or
    /// padding with its final frame. Returns the new size.
    pub fn correct(&mut self, block: &mut AudioBuffer, drift: Option<f64>) -> usize {
        let size = block.len();
        let wanted = self.wanted_size(size, drift);

        if wanted < size {
            block.truncate(wanted);
        } else if wanted > size {
            block.pad_with_last_frame(wanted);
        }

        block.len()
    }
}

fn align_down(value: usize, align: usize) -> usize {
    value - value % align
}

fn align_up(value: usize, align: usize) -> usize {
    align_down(value + align - 1, align)
}
