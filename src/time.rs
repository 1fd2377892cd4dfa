use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use nix::time::ClockId;

/// Source of monotonic wall time, in seconds.
///
/// Every clock in the engine is expressed as floating point seconds. The
/// actors read wall time through this trait so that tests can drive the
/// scheduler and clocks deterministically.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> f64 {
        monotonic_seconds()
    }
}

pub fn monotonic_seconds() -> f64 {
    let timespec = nix::time::clock_gettime(ClockId::CLOCK_MONOTONIC)
        .expect("clock_gettime(CLOCK_MONOTONIC) failed");

    timespec.tv_sec() as f64 + timespec.tv_nsec() as f64 / 1_000_000_000.0
}

/// A time source that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualTime {
    bits: AtomicU64,
}

impl ManualTime {
    pub fn new(start: f64) -> Self {
        ManualTime { bits: AtomicU64::new(start.to_bits()) }
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, duration: Duration) {
        self.set(self.now() + duration.as_secs_f64());
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// A rational time base, ie. the length of one tick of a stream timestamp
/// in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TimeBase {
    pub num: i64,
    pub den: i64,
}

impl TimeBase {
    /// Seek positions are always expressed in microseconds.
    pub const MICROS: TimeBase = TimeBase { num: 1, den: 1_000_000 };

    pub const fn new(num: i64, den: i64) -> Self {
        TimeBase { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    pub fn to_seconds(&self, ts: i64) -> f64 {
        ts as f64 * self.as_f64()
    }

    pub fn from_seconds(&self, seconds: f64) -> i64 {
        (seconds * self.den as f64 / self.num as f64).round() as i64
    }

    /// Rescale `ts` expressed in `self` into `to`, rounding to nearest.
    pub fn rescale(&self, ts: i64, to: TimeBase) -> i64 {
        let num = i128::from(ts) * i128::from(self.num) * i128::from(to.den);
        let den = i128::from(self.den) * i128::from(to.num);

        if den == 0 {
            return 0;
        }

        // round half away from zero
        let quotient = (num.abs() + den.abs() / 2) / den.abs();
        let rounded = if (num < 0) != (den < 0) { -quotient } else { quotient };

        i64::try_from(rounded).unwrap_or(if rounded < 0 { i64::MIN } else { i64::MAX })
    }
}

impl std::fmt::Display for TimeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

pub fn seconds_to_duration(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds)
    } else {
        Duration::ZERO
    }
}
