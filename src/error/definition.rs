use super::ValidationError;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    #[error("start_after")]
    StartAfter,
    #[error("start_after_strict")]
    StartAfterStrict,
    #[error("terminate_after_strict")]
    TerminateAfterStrict,
}

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Benchmark name must not be empty.")]
    EmptyName,
    #[error("Benchmark '{benchmark}' has no phases.")]
    NoPhases { benchmark: String },
    #[error("Phase name must not be empty.")]
    EmptyPhaseName,
    #[error("Phase '{phase}' is defined more than once.")]
    DuplicatePhase { phase: String },
    #[error("Duration was not set for phase '{phase}'.")]
    MissingDuration { phase: String },
    #[error("Duration of phase '{phase}' must not be negative (got {value}ms).")]
    NegativeDuration { phase: String, value: i64 },
    #[error("Invalid {field} for phase '{phase}': {source}")]
    InvalidDuration {
        phase: String,
        field: &'static str,
        #[source]
        source: ValidationError,
    },
    #[error("Scenario was not set for phase '{phase}'.")]
    MissingScenario { phase: String },
    #[error("Phase '{phase}' references unknown scenario '{scenario}'.")]
    UnknownScenario { phase: String, scenario: String },
    #[error("Scenario '{scenario}' has no sequences.")]
    EmptyScenario { scenario: String },
    #[error("Scenario '{scenario}' defines sequence '{sequence}' more than once.")]
    DuplicateSequence { scenario: String, sequence: String },
    #[error("Phase '{phase}' has an invalid load shape: {reason}")]
    InvalidLoadShape { phase: String, reason: &'static str },
    #[error("Phase '{phase}' has an invalid {field} ({value}).")]
    InvalidRate {
        phase: String,
        field: &'static str,
        value: f64,
    },
    #[error("Phase '{phase}' references unknown phase '{dependency}' in {kind}.")]
    UnknownDependency {
        phase: String,
        dependency: String,
        kind: DependencyKind,
    },
    #[error("Phase '{phase}' references itself in {kind}.")]
    SelfDependency { phase: String, kind: DependencyKind },
    #[error("Phases form a {kind} cycle through '{phase}'.")]
    DependencyCycle { phase: String, kind: DependencyKind },
    #[error("SLA references unknown phase '{phase}'.")]
    SlaUnknownPhase { phase: String },
    #[error("SLA for phase '{phase}' references unknown sequence '{sequence}'.")]
    SlaUnknownSequence { phase: String, sequence: String },
    #[error("Invalid percentile {value}; expected a value in (0, 1].")]
    InvalidPercentile { value: f64 },
    #[error("Invalid error ratio {value}; expected a value in [0, 1].")]
    InvalidErrorRatio { value: f64 },
    #[error("Invalid SLA limit: {source}")]
    InvalidSlaLimit {
        #[source]
        source: ValidationError,
    },
    #[error("Invalid statistics period: {source}")]
    InvalidStatisticsPeriod {
        #[source]
        source: ValidationError,
    },
    #[error("Invalid target URL '{value}': {source}")]
    InvalidTarget {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid step in sequence '{sequence}': {reason}")]
    InvalidStep {
        sequence: String,
        reason: &'static str,
    },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
