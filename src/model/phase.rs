use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::benchmark::Scenario;
use super::duration_ms;
use super::rate::{ArrivalRate, split_evenly};

/// How sessions are started while a phase is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoadShape {
    /// Start `users` sessions at once and never replace them.
    AtOnce { users: u32 },
    /// Keep exactly `users` sessions alive until the phase finishes.
    Always { users: u32 },
    /// Arrival rate changes linearly from `initial_rate` to `target_rate`
    /// over the phase duration.
    RampPerSec {
        initial_rate: ArrivalRate,
        target_rate: ArrivalRate,
        max_sessions_estimate: u32,
    },
    ConstantPerSec {
        rate: ArrivalRate,
        max_sessions_estimate: u32,
    },
    /// Run a single session `repeats` times back to back.
    Sequentially { repeats: u32 },
    /// Starts nothing; used to group dependencies.
    Noop,
}

impl LoadShape {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::AtOnce { .. } => "at_once",
            Self::Always { .. } => "always",
            Self::RampPerSec { .. } => "ramp_per_sec",
            Self::ConstantPerSec { .. } => "constant_per_sec",
            Self::Sequentially { .. } => "sequentially",
            Self::Noop => "noop",
        }
    }

    #[must_use]
    pub const fn is_noop(&self) -> bool {
        matches!(self, Self::Noop)
    }

    /// Number of session slots worth reserving up front.
    #[must_use]
    pub fn session_estimate(&self) -> usize {
        let estimate = match self {
            Self::AtOnce { users } | Self::Always { users } => *users,
            Self::RampPerSec {
                max_sessions_estimate,
                ..
            }
            | Self::ConstantPerSec {
                max_sessions_estimate,
                ..
            } => *max_sessions_estimate,
            Self::Sequentially { .. } => 1,
            Self::Noop => 0,
        };
        usize::try_from(estimate).unwrap_or(usize::MAX)
    }

    /// The part of this load that agent `index` of `count` drives.
    #[must_use]
    pub fn share(&self, index: usize, count: usize) -> Self {
        match self {
            Self::AtOnce { users } => Self::AtOnce {
                users: split_u32(*users, index, count),
            },
            Self::Always { users } => Self::Always {
                users: split_u32(*users, index, count),
            },
            Self::RampPerSec {
                initial_rate,
                target_rate,
                max_sessions_estimate,
            } => Self::RampPerSec {
                initial_rate: initial_rate.share(index, count),
                target_rate: target_rate.share(index, count),
                max_sessions_estimate: split_u32(*max_sessions_estimate, index, count).max(1),
            },
            Self::ConstantPerSec {
                rate,
                max_sessions_estimate,
            } => Self::ConstantPerSec {
                rate: rate.share(index, count),
                max_sessions_estimate: split_u32(*max_sessions_estimate, index, count).max(1),
            },
            Self::Sequentially { repeats } => Self::Sequentially {
                repeats: split_u32(*repeats, index, count),
            },
            Self::Noop => Self::Noop,
        }
    }
}

fn split_u32(total: u32, index: usize, count: usize) -> u32 {
    u32::try_from(split_evenly(u64::from(total), index, count)).unwrap_or(total)
}

/// One named stage of a benchmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub scenario: Scenario,
    pub load: LoadShape,
    /// Earliest start, relative to the run start.
    #[serde(default, with = "duration_ms::option")]
    pub start_time: Option<Duration>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Hard deadline after which the phase is terminated, relative to its
    /// own start.
    #[serde(default, with = "duration_ms::option")]
    pub max_duration: Option<Duration>,
    /// Start once all of these phases have finished.
    #[serde(default)]
    pub start_after: BTreeSet<String>,
    /// Start once all of these phases have terminated.
    #[serde(default)]
    pub start_after_strict: BTreeSet<String>,
    /// Do not terminate before all of these phases have terminated.
    #[serde(default)]
    pub terminate_after_strict: BTreeSet<String>,
    #[serde(default)]
    pub shared_resources: Option<String>,
}

impl Phase {
    #[must_use]
    pub fn noop(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            scenario: Scenario::default(),
            load: LoadShape::Noop,
            start_time: None,
            duration: Duration::ZERO,
            max_duration: None,
            start_after: BTreeSet::new(),
            start_after_strict: BTreeSet::new(),
            terminate_after_strict: BTreeSet::new(),
            shared_resources: None,
        }
    }

    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.load.is_noop()
    }

    /// Copy of this phase scaled down to one agent's share of the load.
    #[must_use]
    pub fn share(&self, index: usize, count: usize) -> Self {
        Self {
            load: self.load.share(index, count),
            ..self.clone()
        }
    }
}
