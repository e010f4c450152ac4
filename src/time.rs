//! Time bases and timestamp rescaling

use std::fmt;

/// A time base: `num / den` seconds per timestamp unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Time base with one unit per frame at `fps`
    pub const fn per_frame(fps: u32) -> Self {
        Self { num: 1, den: fps }
    }

    /// Both terms non-zero
    pub const fn is_valid(&self) -> bool {
        self.num != 0 && self.den != 0
    }

    /// Rescale `ts` from this time base to `to`.
    ///
    /// Computes `ts * self / to` exactly in 128-bit arithmetic and rounds
    /// halfway cases away from zero, matching FFmpeg's `av_rescale_q`.
    /// Like FFmpeg, returns `i64::MIN` if either time base has a zero term.
    pub fn rescale(self, ts: i64, to: Rational) -> i64 {
        if !self.is_valid() || !to.is_valid() {
            return i64::MIN;
        }
        if self == to {
            return ts;
        }
        let num = ts as i128 * self.num as i128 * to.den as i128;
        let den = self.den as i128 * to.num as i128;
        let half = den / 2;
        let rounded = if num >= 0 {
            (num + half) / den
        } else {
            (num - half) / den
        };
        rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}
