use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ValidationError;
use crate::model::HttpMethod;

/// One benchmark definition file, as written by the user.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkFile {
    /// Defaults to the file stem when loaded from disk.
    pub name: Option<String>,
    pub target: Option<String>,
    pub agents: Option<usize>,
    pub statistics_period: Option<DurationValue>,
    pub percentiles: Option<Vec<f64>>,
    #[serde(default)]
    pub scenarios: BTreeMap<String, ScenarioConfig>,
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,
    #[serde(default)]
    pub slas: Vec<SlaConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub sequences: Vec<SequenceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceConfig {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    pub method: Option<HttpMethod>,
    pub path: String,
    /// `Name: Value` pairs.
    #[serde(default)]
    pub headers: Vec<String>,
    pub body: Option<String>,
    pub think_time: Option<DurationValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    pub name: String,
    pub scenario: Option<String>,
    #[serde(default)]
    pub load: LoadConfig,
    pub start_time: Option<DurationValue>,
    pub duration: Option<DurationValue>,
    pub max_duration: Option<DurationValue>,
    #[serde(default)]
    pub start_after: Vec<String>,
    #[serde(default)]
    pub start_after_strict: Vec<String>,
    #[serde(default)]
    pub terminate_after_strict: Vec<String>,
    pub shared_resources: Option<String>,
}

/// Load shape as written in a benchmark file. Rates are sessions per
/// second and may be fractional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum LoadConfig {
    AtOnce {
        users: u32,
    },
    Always {
        users: u32,
    },
    RampPerSec {
        initial_rate: f64,
        target_rate: f64,
        max_sessions: Option<u32>,
    },
    ConstantPerSec {
        rate: f64,
        max_sessions: Option<u32>,
    },
    Sequentially {
        repeats: u32,
    },
    #[default]
    Noop,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlaConfig {
    pub phase: String,
    pub sequence: Option<String>,
    #[serde(flatten)]
    pub rule: SlaRuleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlaRuleConfig {
    MaxMean { limit: DurationValue },
    MaxPercentile { percentile: f64, limit: DurationValue },
    MaxErrorRatio { ratio: f64 },
    MinRequests { count: u64 },
}

/// Integer milliseconds or a string with a `ms`, `s`, `m` or `h` unit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Millis(i64),
    Text(String),
}

impl DurationValue {
    /// # Errors
    ///
    /// Returns an error for negative values and malformed strings.
    pub fn to_duration(&self) -> Result<Duration, ValidationError> {
        match self {
            Self::Millis(millis) => u64::try_from(*millis)
                .ok()
                .map(Duration::from_millis)
                .ok_or(ValidationError::DurationNegative { value: *millis }),
            Self::Text(text) => super::parse_duration_value(text),
        }
    }
}
