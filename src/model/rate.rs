use std::fmt;

use serde::{Deserialize, Serialize};

const MILLIS_PER_UNIT: u64 = 1_000;
const MAX_RATE_PER_SEC: f64 = 1.0e12;

/// Session arrival rate, stored as milli-sessions per second so a rate can
/// be split across agents and integrated over time without floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArrivalRate(u64);

impl ArrivalRate {
    #[must_use]
    pub const fn from_millis(millis_per_sec: u64) -> Self {
        Self(millis_per_sec)
    }

    #[must_use]
    pub const fn per_sec(sessions: u64) -> Self {
        Self(sessions.saturating_mul(MILLIS_PER_UNIT))
    }

    /// Converts a decimal rate from a benchmark file. Returns `None` for
    /// negative, non-finite or absurdly large values.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "decimal rates from configuration are converted to fixed point once"
    )]
    pub fn from_per_sec(rate: f64) -> Option<Self> {
        if !rate.is_finite() || rate < 0.0 || rate > MAX_RATE_PER_SEC {
            return None;
        }
        let millis = (rate * 1_000.0).round();
        Some(Self(millis as u64))
    }

    #[must_use]
    pub const fn millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Portion of this rate driven by agent `index` out of `count`.
    #[must_use]
    pub fn share(self, index: usize, count: usize) -> Self {
        Self(split_evenly(self.0, index, count))
    }
}

impl fmt::Display for ArrivalRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0.checked_div(MILLIS_PER_UNIT).unwrap_or(0);
        let fraction = self.0.checked_rem(MILLIS_PER_UNIT).unwrap_or(0);
        write!(f, "{whole}.{fraction:03}/s")
    }
}

/// Splits `total` across `count` participants; the remainder goes to the
/// lowest indices so the shares always sum back to `total`.
#[must_use]
pub fn split_evenly(total: u64, index: usize, count: usize) -> u64 {
    let count = u64::try_from(count.max(1)).unwrap_or(u64::MAX);
    let index = u64::try_from(index).unwrap_or(u64::MAX);
    let base = total.checked_div(count).unwrap_or(total);
    let remainder = total.checked_rem(count).unwrap_or(0);
    if index < remainder {
        base.saturating_add(1)
    } else {
        base
    }
}
