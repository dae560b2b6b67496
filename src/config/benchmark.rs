use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use url::Url;

use crate::error::{DefinitionError, DependencyKind, ValidationError};
use crate::model::{
    ArrivalRate, Benchmark, DEFAULT_PERCENTILES, DEFAULT_STATISTICS_PERIOD, ErrorRatio,
    LoadShape, Phase, RequestStep, Scenario, Sequence, Sla, SlaRule,
};

use super::types::{
    BenchmarkFile, DurationValue, LoadConfig, PhaseConfig, ScenarioConfig, SlaConfig,
    SlaRuleConfig, StepConfig,
};

/// Turn a parsed definition into a validated benchmark.
///
/// Every phase must name an existing scenario (noop phases may omit it),
/// set a non-negative duration and a sensible load shape. Dependencies must
/// name other existing phases and may not form a cycle; start dependencies
/// (`start_after`, `start_after_strict`) and `terminate_after_strict` are
/// checked as separate graphs.
///
/// # Errors
///
/// Returns the first definition error found.
pub fn build_benchmark(file: BenchmarkFile) -> Result<Benchmark, DefinitionError> {
    let BenchmarkFile {
        name,
        target,
        agents,
        statistics_period,
        percentiles,
        scenarios,
        phases,
        slas,
    } = file;

    let name = name
        .map(|name| name.trim().to_owned())
        .filter(|name| !name.is_empty())
        .ok_or(DefinitionError::EmptyName)?;
    if let Some(target) = target.as_deref() {
        Url::parse(target).map_err(|err| DefinitionError::InvalidTarget {
            value: target.to_owned(),
            source: err,
        })?;
    }
    let statistics_period = match statistics_period {
        Some(value) => {
            let period = value
                .to_duration()
                .map_err(|source| DefinitionError::InvalidStatisticsPeriod { source })?;
            if period.is_zero() {
                return Err(DefinitionError::InvalidStatisticsPeriod {
                    source: ValidationError::DurationZero,
                });
            }
            period
        }
        None => DEFAULT_STATISTICS_PERIOD,
    };
    let percentiles = match percentiles {
        Some(values) => {
            for value in &values {
                check_percentile(*value)?;
            }
            values
        }
        None => DEFAULT_PERCENTILES.to_vec(),
    };

    if phases.is_empty() {
        return Err(DefinitionError::NoPhases { benchmark: name });
    }
    let scenarios = build_scenarios(&scenarios)?;
    let mut built: Vec<Phase> = Vec::with_capacity(phases.len());
    let mut names = BTreeSet::new();
    for config in &phases {
        let phase = build_phase(config, &scenarios)?;
        if !names.insert(phase.name.clone()) {
            return Err(DefinitionError::DuplicatePhase { phase: phase.name });
        }
        built.push(phase);
    }
    check_dependencies(&built)?;
    let slas = slas
        .iter()
        .map(|sla| build_sla(sla, &built))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Benchmark {
        name,
        target,
        agents: agents.filter(|count| *count > 0),
        statistics_period,
        percentiles,
        phases: built,
        slas,
    })
}

fn check_percentile(value: f64) -> Result<(), DefinitionError> {
    if !value.is_finite() || value <= 0.0 || value > 1.0 {
        return Err(DefinitionError::InvalidPercentile { value });
    }
    Ok(())
}

fn build_scenarios(
    scenarios: &BTreeMap<String, ScenarioConfig>,
) -> Result<BTreeMap<String, Scenario>, DefinitionError> {
    let mut built = BTreeMap::new();
    for (name, config) in scenarios {
        if config.sequences.is_empty() {
            return Err(DefinitionError::EmptyScenario {
                scenario: name.clone(),
            });
        }
        let mut seen = BTreeSet::new();
        let mut sequences = Vec::with_capacity(config.sequences.len());
        for sequence in &config.sequences {
            if !seen.insert(sequence.name.as_str()) {
                return Err(DefinitionError::DuplicateSequence {
                    scenario: name.clone(),
                    sequence: sequence.name.clone(),
                });
            }
            let steps = sequence
                .steps
                .iter()
                .map(|step| build_step(&sequence.name, step))
                .collect::<Result<Vec<_>, _>>()?;
            sequences.push(Sequence {
                name: sequence.name.clone(),
                steps,
            });
        }
        built.insert(name.clone(), Scenario { sequences });
    }
    Ok(built)
}

fn build_step(sequence: &str, step: &StepConfig) -> Result<RequestStep, DefinitionError> {
    let invalid = |reason: &'static str| DefinitionError::InvalidStep {
        sequence: sequence.to_owned(),
        reason,
    };
    let path = step.path.trim();
    if path.is_empty() {
        return Err(invalid("path must not be empty"));
    }
    let mut headers = Vec::with_capacity(step.headers.len());
    for header in &step.headers {
        let (key, value) = header
            .split_once(':')
            .ok_or_else(|| invalid("headers must look like 'Name: Value'"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(invalid("header name must not be empty"));
        }
        headers.push((key.to_owned(), value.trim().to_owned()));
    }
    let think_time = step
        .think_time
        .as_ref()
        .map(DurationValue::to_duration)
        .transpose()
        .map_err(|_err| invalid("think_time is not a valid duration"))?;
    Ok(RequestStep {
        method: step.method.unwrap_or_default(),
        path: path.to_owned(),
        headers,
        body: step.body.clone(),
        think_time,
    })
}

fn build_phase(
    config: &PhaseConfig,
    scenarios: &BTreeMap<String, Scenario>,
) -> Result<Phase, DefinitionError> {
    let name = config.name.trim();
    if name.is_empty() {
        return Err(DefinitionError::EmptyPhaseName);
    }
    let load = build_load(name, &config.load)?;
    let scenario = match config.scenario.as_deref() {
        Some(scenario) => scenarios.get(scenario).cloned().ok_or_else(|| {
            DefinitionError::UnknownScenario {
                phase: name.to_owned(),
                scenario: scenario.to_owned(),
            }
        })?,
        None if load.is_noop() => Scenario::default(),
        None => {
            return Err(DefinitionError::MissingScenario {
                phase: name.to_owned(),
            });
        }
    };
    let duration = match config.duration.as_ref() {
        Some(value) => phase_duration(name, "duration", value)?,
        None if load.is_noop() => Duration::ZERO,
        None => {
            return Err(DefinitionError::MissingDuration {
                phase: name.to_owned(),
            });
        }
    };
    let start_time = config
        .start_time
        .as_ref()
        .map(|value| phase_duration(name, "start_time", value))
        .transpose()?;
    let max_duration = config
        .max_duration
        .as_ref()
        .map(|value| phase_duration(name, "max_duration", value))
        .transpose()?;

    Ok(Phase {
        name: name.to_owned(),
        scenario,
        load,
        start_time,
        duration,
        max_duration,
        start_after: config.start_after.iter().cloned().collect(),
        start_after_strict: config.start_after_strict.iter().cloned().collect(),
        terminate_after_strict: config.terminate_after_strict.iter().cloned().collect(),
        shared_resources: config
            .shared_resources
            .clone()
            .filter(|key| !key.is_empty()),
    })
}

fn phase_duration(
    phase: &str,
    field: &'static str,
    value: &DurationValue,
) -> Result<Duration, DefinitionError> {
    match value {
        DurationValue::Millis(millis) if *millis < 0 => Err(DefinitionError::NegativeDuration {
            phase: phase.to_owned(),
            value: *millis,
        }),
        DurationValue::Millis(_) | DurationValue::Text(_) => {
            value
                .to_duration()
                .map_err(|source| DefinitionError::InvalidDuration {
                    phase: phase.to_owned(),
                    field,
                    source,
                })
        }
    }
}

fn build_load(phase: &str, config: &LoadConfig) -> Result<LoadShape, DefinitionError> {
    let invalid = |reason: &'static str| DefinitionError::InvalidLoadShape {
        phase: phase.to_owned(),
        reason,
    };
    let to_rate = |field: &'static str, value: f64| {
        ArrivalRate::from_per_sec(value).ok_or_else(|| DefinitionError::InvalidRate {
            phase: phase.to_owned(),
            field,
            value,
        })
    };
    match config {
        LoadConfig::AtOnce { users } => {
            if *users == 0 {
                return Err(invalid("users must be > 0"));
            }
            Ok(LoadShape::AtOnce { users: *users })
        }
        LoadConfig::Always { users } => {
            if *users == 0 {
                return Err(invalid("users must be > 0"));
            }
            Ok(LoadShape::Always { users: *users })
        }
        LoadConfig::RampPerSec {
            initial_rate,
            target_rate,
            max_sessions,
        } => {
            let initial_rate = to_rate("initial_rate", *initial_rate)?;
            let target_rate = to_rate("target_rate", *target_rate)?;
            if initial_rate.is_zero() && target_rate.is_zero() {
                return Err(invalid("initial_rate or target_rate must be > 0"));
            }
            Ok(LoadShape::RampPerSec {
                initial_rate,
                target_rate,
                max_sessions_estimate: sessions_estimate(
                    *max_sessions,
                    initial_rate.max(target_rate),
                )
                .ok_or_else(|| invalid("max_sessions must be > 0"))?,
            })
        }
        LoadConfig::ConstantPerSec { rate: value, max_sessions } => {
            let rate = to_rate("rate", *value)?;
            if rate.is_zero() {
                return Err(invalid("rate must be > 0"));
            }
            Ok(LoadShape::ConstantPerSec {
                rate,
                max_sessions_estimate: sessions_estimate(*max_sessions, rate)
                    .ok_or_else(|| invalid("max_sessions must be > 0"))?,
            })
        }
        LoadConfig::Sequentially { repeats } => {
            if *repeats == 0 {
                return Err(invalid("repeats must be > 0"));
            }
            Ok(LoadShape::Sequentially { repeats: *repeats })
        }
        LoadConfig::Noop => Ok(LoadShape::Noop),
    }
}

/// An explicit estimate must be positive; without one, reserve a second's
/// worth of sessions at the peak rate.
fn sessions_estimate(explicit: Option<u32>, peak: ArrivalRate) -> Option<u32> {
    match explicit {
        Some(0) => None,
        Some(count) => Some(count),
        None => Some(
            u32::try_from(peak.millis().div_ceil(1_000))
                .unwrap_or(u32::MAX)
                .max(1),
        ),
    }
}

fn dependency_lists(phase: &Phase) -> [(DependencyKind, &BTreeSet<String>); 3] {
    [
        (DependencyKind::StartAfter, &phase.start_after),
        (DependencyKind::StartAfterStrict, &phase.start_after_strict),
        (DependencyKind::TerminateAfterStrict, &phase.terminate_after_strict),
    ]
}

fn check_dependencies(phases: &[Phase]) -> Result<(), DefinitionError> {
    let names: BTreeSet<&str> = phases.iter().map(|phase| phase.name.as_str()).collect();
    for phase in phases {
        for (kind, dependencies) in dependency_lists(phase) {
            for dependency in dependencies {
                if *dependency == phase.name {
                    return Err(DefinitionError::SelfDependency {
                        phase: phase.name.clone(),
                        kind,
                    });
                }
                if !names.contains(dependency.as_str()) {
                    return Err(DefinitionError::UnknownDependency {
                        phase: phase.name.clone(),
                        dependency: dependency.clone(),
                        kind,
                    });
                }
            }
        }
    }
    check_cycles(
        phases,
        &[DependencyKind::StartAfter, DependencyKind::StartAfterStrict],
    )?;
    check_cycles(phases, &[DependencyKind::TerminateAfterStrict])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

type DependencyGraph<'def> = BTreeMap<&'def str, Vec<(&'def str, DependencyKind)>>;

fn check_cycles(phases: &[Phase], kinds: &[DependencyKind]) -> Result<(), DefinitionError> {
    let mut graph: DependencyGraph<'_> = BTreeMap::new();
    for phase in phases {
        let edges = graph.entry(phase.name.as_str()).or_default();
        for (kind, dependencies) in dependency_lists(phase) {
            if kinds.contains(&kind) {
                edges.extend(dependencies.iter().map(|dependency| (dependency.as_str(), kind)));
            }
        }
    }
    let mut marks = BTreeMap::new();
    for phase in phases {
        if !marks.contains_key(phase.name.as_str()) {
            visit(phase.name.as_str(), &graph, &mut marks)?;
        }
    }
    Ok(())
}

fn visit<'def>(
    node: &'def str,
    graph: &DependencyGraph<'def>,
    marks: &mut BTreeMap<&'def str, Mark>,
) -> Result<(), DefinitionError> {
    marks.insert(node, Mark::Visiting);
    for (next, kind) in graph.get(node).map(Vec::as_slice).unwrap_or_default() {
        match marks.get(next) {
            Some(Mark::Visiting) => {
                return Err(DefinitionError::DependencyCycle {
                    phase: (*next).to_owned(),
                    kind: *kind,
                });
            }
            Some(Mark::Done) => {}
            None => visit(next, graph, marks)?,
        }
    }
    marks.insert(node, Mark::Done);
    Ok(())
}

fn build_sla(config: &SlaConfig, phases: &[Phase]) -> Result<Sla, DefinitionError> {
    let phase = phases
        .iter()
        .find(|phase| phase.name == config.phase)
        .ok_or_else(|| DefinitionError::SlaUnknownPhase {
            phase: config.phase.clone(),
        })?;
    if let Some(sequence) = config.sequence.as_deref()
        && !phase.scenario.sequence_names().any(|name| name == sequence)
    {
        return Err(DefinitionError::SlaUnknownSequence {
            phase: config.phase.clone(),
            sequence: sequence.to_owned(),
        });
    }
    let limit = |value: &DurationValue| {
        value
            .to_duration()
            .map_err(|source| DefinitionError::InvalidSlaLimit { source })
    };
    let rule = match &config.rule {
        SlaRuleConfig::MaxMean { limit: value } => SlaRule::MaxMean {
            limit: limit(value)?,
        },
        SlaRuleConfig::MaxPercentile {
            percentile,
            limit: value,
        } => {
            check_percentile(*percentile)?;
            SlaRule::MaxPercentile {
                percentile: *percentile,
                limit: limit(value)?,
            }
        }
        SlaRuleConfig::MaxErrorRatio { ratio } => SlaRule::MaxErrorRatio {
            ratio: ErrorRatio::from_fraction(*ratio)
                .ok_or(DefinitionError::InvalidErrorRatio { value: *ratio })?,
        },
        SlaRuleConfig::MinRequests { count } => SlaRule::MinRequests { count: *count },
    };
    Ok(Sla {
        phase: config.phase.clone(),
        sequence: config.sequence.clone(),
        rule,
    })
}
