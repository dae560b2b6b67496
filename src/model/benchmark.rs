use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::duration_ms;
use super::phase::Phase;
use super::sla::Sla;

pub const DEFAULT_PERCENTILES: [f64; 5] = [0.5, 0.9, 0.99, 0.999, 0.9999];
pub const DEFAULT_STATISTICS_PERIOD: Duration = Duration::from_secs(1);

/// A complete, validated benchmark definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    pub name: String,
    /// Base URL that relative request paths resolve against.
    #[serde(default)]
    pub target: Option<String>,
    /// Exact number of agents a run uses. Starting fails with fewer
    /// available agents, extra agents stay idle, and autostart waits for at
    /// least this many.
    #[serde(default)]
    pub agents: Option<usize>,
    #[serde(with = "duration_ms")]
    pub statistics_period: Duration,
    pub percentiles: Vec<f64>,
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub slas: Vec<Sla>,
}

impl Benchmark {
    #[must_use]
    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|phase| phase.name == name)
    }

    pub fn slas_for<'bench>(&'bench self, phase: &'bench str) -> impl Iterator<Item = &'bench Sla> {
        self.slas.iter().filter(move |sla| sla.phase == phase)
    }

    /// Copy of the benchmark with every phase scaled to one agent's share.
    #[must_use]
    pub fn share(&self, index: usize, count: usize) -> Self {
        Self {
            phases: self
                .phases
                .iter()
                .map(|phase| phase.share(index, count))
                .collect(),
            ..self.clone()
        }
    }
}

/// Ordered list of sequences executed by every session of a phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub sequences: Vec<Sequence>,
}

impl Scenario {
    pub fn sequence_names(&self) -> impl Iterator<Item = &str> {
        self.sequences.iter().map(|sequence| sequence.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    pub steps: Vec<RequestStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStep {
    pub method: HttpMethod,
    pub path: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<String>,
    /// Pause after the response before the next step.
    #[serde(default, with = "duration_ms::option")]
    pub think_time: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
