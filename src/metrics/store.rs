use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, error};

use super::export::{ExportedRow, StatisticsExport, write_statistics};
use super::sla::{SlaSink, SlaViolation, evaluate_rule};
use super::snapshot::StatisticsSnapshot;
use crate::error::{AppResult, MetricsError};
use crate::model::{Benchmark, Sla};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StatisticsKey {
    pub phase: String,
    pub sequence: String,
}

impl StatisticsKey {
    #[must_use]
    pub fn new(phase: &str, sequence: &str) -> Self {
        Self {
            phase: phase.to_owned(),
            sequence: sequence.to_owned(),
        }
    }
}

#[derive(Debug)]
struct AgentEntry {
    report_seq: u64,
    snapshot: StatisticsSnapshot,
}

/// Controller-side statistics for one run.
///
/// Agents report cumulative snapshots, so the store keeps only the newest
/// report per (agent, phase, sequence) and merges across agents on demand.
pub struct StatisticsStore {
    percentiles: Vec<f64>,
    slas: Vec<Sla>,
    declared: BTreeMap<String, Vec<String>>,
    entries: BTreeMap<StatisticsKey, BTreeMap<String, AgentEntry>>,
    sink: Box<dyn SlaSink>,
}

impl fmt::Debug for StatisticsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatisticsStore")
            .field("percentiles", &self.percentiles)
            .field("keys", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl StatisticsStore {
    #[must_use]
    pub fn new(benchmark: &Benchmark, sink: Box<dyn SlaSink>) -> Self {
        let declared = benchmark
            .phases
            .iter()
            .map(|phase| {
                (
                    phase.name.clone(),
                    phase.scenario.sequence_names().map(str::to_owned).collect(),
                )
            })
            .collect();
        Self {
            percentiles: benchmark.percentiles.clone(),
            slas: benchmark.slas.clone(),
            declared,
            entries: BTreeMap::new(),
            sink,
        }
    }

    /// Store a report. Returns `false` when an equal or newer report from
    /// the same agent was already stored.
    pub fn record(
        &mut self,
        agent: &str,
        phase: &str,
        sequence: &str,
        report_seq: u64,
        snapshot: StatisticsSnapshot,
    ) -> bool {
        let per_agent = self
            .entries
            .entry(StatisticsKey::new(phase, sequence))
            .or_default();
        if let Some(existing) = per_agent.get(agent)
            && existing.report_seq >= report_seq
        {
            debug!(
                "Dropping stale statistics from {} for {}/{} (seq {} <= {})",
                agent, phase, sequence, report_seq, existing.report_seq
            );
            return false;
        }
        per_agent.insert(
            agent.to_owned(),
            AgentEntry {
                report_seq,
                snapshot,
            },
        );
        true
    }

    /// Drop everything an agent reported. Returns the number of entries
    /// removed.
    pub fn discard_agent(&mut self, agent: &str) -> usize {
        let mut removed = 0usize;
        for per_agent in self.entries.values_mut() {
            if per_agent.remove(agent).is_some() {
                removed = removed.saturating_add(1);
            }
        }
        removed
    }

    /// Merge of the latest report of every agent for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if histograms cannot be merged.
    pub fn aggregate(&self, key: &StatisticsKey) -> Result<Option<StatisticsSnapshot>, MetricsError> {
        let Some(per_agent) = self.entries.get(key) else {
            return Ok(None);
        };
        let mut iter = per_agent.values();
        let Some(first) = iter.next() else {
            return Ok(None);
        };
        let mut total = first.snapshot.clone();
        for entry in iter {
            total.merge(&entry.snapshot)?;
        }
        Ok(Some(total))
    }

    fn aggregate_or_empty(&self, key: &StatisticsKey) -> Result<StatisticsSnapshot, MetricsError> {
        match self.aggregate(key)? {
            Some(snapshot) => Ok(snapshot),
            None => StatisticsSnapshot::new(),
        }
    }

    /// Declared sequences of a phase plus any sequence that reported.
    #[must_use]
    pub fn sequences(&self, phase: &str) -> Vec<String> {
        let mut names: BTreeSet<String> = self
            .declared
            .get(phase)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default();
        names.extend(
            self.entries
                .keys()
                .filter(|key| key.phase == phase)
                .map(|key| key.sequence.clone()),
        );
        names.into_iter().collect()
    }

    /// Evaluate every SLA of `phase` against the aggregated statistics.
    /// Each failure goes to the sink; returns `true` when all rules pass.
    pub fn validate_slas(&mut self, phase: &str) -> bool {
        let mut violations = Vec::new();
        for sla in self.slas.iter().filter(|sla| sla.phase == phase) {
            let sequences = match &sla.sequence {
                Some(sequence) => vec![sequence.clone()],
                None => self.sequences(phase),
            };
            for sequence in sequences {
                let key = StatisticsKey::new(phase, &sequence);
                let snapshot = match self.aggregate_or_empty(&key) {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        error!("Failed to aggregate {}/{} for SLA check: {}", phase, sequence, err);
                        continue;
                    }
                };
                if let Some(observed) = evaluate_rule(&sla.rule, &snapshot) {
                    violations.push(SlaViolation {
                        phase: phase.to_owned(),
                        sequence,
                        rule: sla.rule.clone(),
                        observed,
                    });
                }
            }
        }
        let passed = violations.is_empty();
        for violation in violations {
            self.sink.report(violation);
        }
        passed
    }

    /// Owned copy of the aggregated and per-agent summaries.
    ///
    /// # Errors
    ///
    /// Returns an error if histograms cannot be merged.
    pub fn export(&self) -> Result<StatisticsExport, MetricsError> {
        let mut totals = Vec::with_capacity(self.entries.len());
        let mut agents: BTreeMap<String, Vec<ExportedRow>> = BTreeMap::new();
        for (key, per_agent) in &self.entries {
            if let Some(total) = self.aggregate(key)? {
                totals.push(ExportedRow::new(key, total.summary(&self.percentiles)));
            }
            for (agent, entry) in per_agent {
                agents
                    .entry(agent.clone())
                    .or_default()
                    .push(ExportedRow::new(key, entry.snapshot.summary(&self.percentiles)));
            }
        }
        Ok(StatisticsExport {
            percentiles: self.percentiles.clone(),
            totals,
            agents,
        })
    }

    /// Write the statistics under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if aggregation or any write fails.
    pub fn persist(&self, dir: &Path) -> AppResult<()> {
        let export = self.export()?;
        write_statistics(&export, dir)
    }
}
