use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::duration_ms;

const PPM: u64 = 1_000_000;

/// A rule checked against a phase's aggregated statistics once the phase
/// terminates. Without a `sequence` it applies to every sequence of the
/// phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sla {
    pub phase: String,
    #[serde(default)]
    pub sequence: Option<String>,
    pub rule: SlaRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlaRule {
    MaxMean {
        #[serde(with = "duration_ms")]
        limit: Duration,
    },
    MaxPercentile {
        percentile: f64,
        #[serde(with = "duration_ms")]
        limit: Duration,
    },
    MaxErrorRatio { ratio: ErrorRatio },
    MinRequests { count: u64 },
}

impl fmt::Display for SlaRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxMean { limit } => write!(f, "mean <= {}ms", limit.as_millis()),
            Self::MaxPercentile { percentile, limit } => {
                write!(f, "p{percentile} <= {}ms", limit.as_millis())
            }
            Self::MaxErrorRatio { ratio } => write!(f, "error ratio <= {ratio}"),
            Self::MinRequests { count } => write!(f, "requests >= {count}"),
        }
    }
}

/// Error ratio in parts per million.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorRatio(u64);

impl ErrorRatio {
    #[must_use]
    pub const fn from_ppm(ppm: u64) -> Self {
        Self(if ppm > PPM { PPM } else { ppm })
    }

    /// Returns `None` unless `ratio` lies in `[0, 1]`.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "decimal ratios from configuration are converted to fixed point once"
    )]
    pub fn from_fraction(ratio: f64) -> Option<Self> {
        if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
            return None;
        }
        Some(Self((ratio * 1_000_000.0).round() as u64))
    }

    #[must_use]
    pub const fn ppm(self) -> u64 {
        self.0
    }

    /// `errors / total` in parts per million; zero when nothing was sent.
    #[must_use]
    pub fn observed(errors: u64, total: u64) -> Self {
        let scaled = u128::from(errors).saturating_mul(u128::from(PPM));
        let ppm = scaled.checked_div(u128::from(total)).unwrap_or(0);
        Self::from_ppm(u64::try_from(ppm).unwrap_or(PPM))
    }

    /// True when `errors / total` exceeds this ratio. Compared by
    /// cross-multiplication so no precision is lost.
    #[must_use]
    pub fn is_exceeded_by(self, errors: u64, total: u64) -> bool {
        let lhs = u128::from(errors).saturating_mul(u128::from(PPM));
        let rhs = u128::from(self.0).saturating_mul(u128::from(total));
        lhs > rhs
    }
}

impl fmt::Display for ErrorRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let percent_whole = self.0.checked_div(10_000).unwrap_or(0);
        let percent_fraction = self.0.checked_rem(10_000).unwrap_or(0);
        write!(f, "{percent_whole}.{percent_fraction:04}%")
    }
}
