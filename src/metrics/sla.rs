use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::warn;

use super::snapshot::StatisticsSnapshot;
use crate::model::{ErrorRatio, SlaRule};

/// A rule that failed for one (phase, sequence) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaViolation {
    pub phase: String,
    pub sequence: String,
    pub rule: SlaRule,
    pub observed: String,
}

/// Receives SLA failures as they are found.
pub trait SlaSink: Send {
    fn report(&mut self, violation: SlaViolation);
}

/// Logs every violation and keeps a shared copy for the run report.
#[derive(Debug, Clone, Default)]
pub struct RecordingSlaSink {
    violations: Arc<Mutex<Vec<SlaViolation>>>,
}

impl RecordingSlaSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn violations(&self) -> Vec<SlaViolation> {
        match self.violations.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl SlaSink for RecordingSlaSink {
    fn report(&mut self, violation: SlaViolation) {
        warn!(
            "SLA violated for phase '{}' sequence '{}': {} (observed {})",
            violation.phase, violation.sequence, violation.rule, violation.observed
        );
        match self.violations.lock() {
            Ok(mut guard) => guard.push(violation),
            Err(poisoned) => poisoned.into_inner().push(violation),
        }
    }
}

/// Checks one rule. Returns the observed value when the rule fails.
#[must_use]
pub fn evaluate_rule(rule: &SlaRule, snapshot: &StatisticsSnapshot) -> Option<String> {
    match rule {
        SlaRule::MaxMean { limit } => {
            let mean = snapshot.mean_us();
            (u128::from(mean) > limit.as_micros()).then(|| format!("mean {}us", mean))
        }
        SlaRule::MaxPercentile { percentile, limit } => {
            let value = snapshot.histogram.value_at_quantile(*percentile);
            (u128::from(value) > limit.as_micros())
                .then(|| format!("p{} {}us", percentile, value))
        }
        SlaRule::MaxErrorRatio { ratio } => {
            let errors = snapshot.errors();
            ratio
                .is_exceeded_by(errors, snapshot.requests)
                .then(|| {
                    format!(
                        "{} errors in {} requests ({})",
                        errors,
                        snapshot.requests,
                        ErrorRatio::observed(errors, snapshot.requests)
                    )
                })
        }
        SlaRule::MinRequests { count } => (snapshot.requests < *count)
            .then(|| format!("{} requests", snapshot.requests)),
    }
}
