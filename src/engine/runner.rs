use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::concurrency::SessionLauncher;
use super::instance::PhaseInstance;
use crate::error::AppResult;
use crate::metrics::{StatisticsKey, StatisticsSnapshot};
use crate::model::{Benchmark, PhaseCommand, PhaseStatus};
use crate::session::{SessionEvent, SessionFailure, SessionId};

/// Cumulative statistics for one (phase, sequence) pair.
#[derive(Debug, Clone)]
pub struct StatisticsReport {
    pub phase: String,
    pub sequence: String,
    pub report_seq: u64,
    pub snapshot: StatisticsSnapshot,
}

/// Something the agent has to tell the controller.
#[derive(Debug, Clone)]
pub enum AgentOutput {
    Status { phase: String, status: PhaseStatus },
    Statistics(Box<StatisticsReport>),
}

/// All phases of one run on this agent.
#[derive(Debug)]
pub struct SimulationRunner<L> {
    benchmark: Benchmark,
    instances: BTreeMap<String, PhaseInstance>,
    launcher: L,
    statistics: BTreeMap<StatisticsKey, StatisticsSnapshot>,
    dirty: BTreeSet<StatisticsKey>,
    report_seq: u64,
}

impl<L: SessionLauncher> SimulationRunner<L> {
    /// `benchmark` is this agent's share of the load.
    #[must_use]
    pub const fn new(benchmark: Benchmark, launcher: L) -> Self {
        Self {
            benchmark,
            instances: BTreeMap::new(),
            launcher,
            statistics: BTreeMap::new(),
            dirty: BTreeSet::new(),
            report_seq: 0,
        }
    }

    #[must_use]
    pub const fn benchmark(&self) -> &Benchmark {
        &self.benchmark
    }

    #[cfg(test)]
    pub(crate) const fn launcher(&self) -> &L {
        &self.launcher
    }

    #[must_use]
    pub fn status(&self, phase: &str) -> PhaseStatus {
        self.instances
            .get(phase)
            .map_or(PhaseStatus::NotStarted, PhaseInstance::status)
    }

    /// True once every phase of the benchmark has terminated here.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.benchmark
            .phases
            .iter()
            .all(|phase| self.status(&phase.name) == PhaseStatus::Terminated)
    }

    /// True when no phase that was ever started is still alive. A run that
    /// was killed before some phases started is idle but not terminated.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.instances
            .values()
            .all(|instance| instance.status() == PhaseStatus::Terminated)
    }

    /// Apply a controller command.
    pub fn handle_command(
        &mut self,
        command: PhaseCommand,
        phase: &str,
        now: Instant,
    ) -> Vec<AgentOutput> {
        if command == PhaseCommand::Run && !self.instances.contains_key(phase) {
            let Some(definition) = self.benchmark.phase(phase) else {
                warn!("Run requested for unknown phase '{}'", phase);
                return Vec::new();
            };
            self.instances.insert(
                phase.to_owned(),
                PhaseInstance::new(Arc::new(definition.clone())),
            );
        }
        let Some(instance) = self.instances.get_mut(phase) else {
            warn!("{} requested for phase '{}' that never ran here", command, phase);
            return Vec::new();
        };
        let transitions = match command {
            PhaseCommand::Run => instance.run(now, &mut self.launcher),
            PhaseCommand::Finish => instance.finish(),
            PhaseCommand::TryTerminate => instance.try_terminate(),
            PhaseCommand::Terminate => instance.terminate(&mut self.launcher),
        };
        self.emit(phase, transitions)
    }

    /// Account for a session event. Events from cancelled or unknown
    /// sessions are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if statistics cannot be recorded.
    pub fn handle_session_event(&mut self, event: SessionEvent) -> AppResult<Vec<AgentOutput>> {
        match event {
            SessionEvent::Request {
                phase,
                session,
                sequence,
                record,
            } => {
                if !self.owns(&phase, session) {
                    trace!("Dropping request from inactive session {} of '{}'", session, phase);
                    return Ok(Vec::new());
                }
                self.snapshot_mut(StatisticsKey::new(&phase, &sequence))?
                    .record(&record)?;
                Ok(Vec::new())
            }
            SessionEvent::Finished {
                phase,
                session,
                failure,
            } => {
                self.launcher.completed(&phase, session);
                if !self.owns(&phase, session) {
                    return Ok(Vec::new());
                }
                if let Some(failure) = failure {
                    self.record_failure(&phase, session, &failure)?;
                }
                let transitions = match self.instances.get_mut(&*phase) {
                    Some(instance) => instance
                        .session_finished(session, &mut self.launcher)
                        .unwrap_or_default(),
                    None => Vec::new(),
                };
                Ok(self.emit(&phase, transitions))
            }
        }
    }

    /// Scheduling tick: start rate-based sessions that are due and complete
    /// pending terminations.
    pub fn tick(&mut self, now: Instant) -> Vec<AgentOutput> {
        let mut pending = Vec::new();
        for (name, instance) in &mut self.instances {
            let transitions = instance.tick(now, &mut self.launcher);
            if !transitions.is_empty() {
                pending.push((name.clone(), transitions));
            }
        }
        let mut outputs = Vec::new();
        for (phase, transitions) in pending {
            outputs.extend(self.emit(&phase, transitions));
        }
        outputs
    }

    /// Cumulative snapshots of every (phase, sequence) that changed since
    /// the last collection.
    pub fn collect_statistics(&mut self) -> Vec<AgentOutput> {
        let keys: Vec<StatisticsKey> = std::mem::take(&mut self.dirty).into_iter().collect();
        keys.into_iter()
            .filter_map(|key| self.report(key))
            .collect()
    }

    fn owns(&self, phase: &str, session: SessionId) -> bool {
        self.instances
            .get(phase)
            .is_some_and(|instance| instance.is_session_active(session))
    }

    fn snapshot_mut(&mut self, key: StatisticsKey) -> AppResult<&mut StatisticsSnapshot> {
        self.dirty.insert(key.clone());
        let snapshot = match self.statistics.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(StatisticsSnapshot::new()?),
        };
        Ok(snapshot)
    }

    fn record_failure(
        &mut self,
        phase: &str,
        session: SessionId,
        failure: &SessionFailure,
    ) -> AppResult<()> {
        debug!("Session {} of '{}' failed: {}", session, phase, failure.message);
        let sequence = failure.sequence.clone().or_else(|| {
            self.benchmark
                .phase(phase)
                .and_then(|definition| definition.scenario.sequences.first())
                .map(|sequence| sequence.name.clone())
        });
        let Some(sequence) = sequence else {
            return Ok(());
        };
        self.snapshot_mut(StatisticsKey::new(phase, &sequence))?
            .record_failed_session();
        Ok(())
    }

    fn report(&mut self, key: StatisticsKey) -> Option<AgentOutput> {
        let snapshot = self.statistics.get(&key)?.clone();
        self.report_seq = self.report_seq.saturating_add(1);
        Some(AgentOutput::Statistics(Box::new(StatisticsReport {
            phase: key.phase,
            sequence: key.sequence,
            report_seq: self.report_seq,
            snapshot,
        })))
    }

    /// Turn transitions into outputs. A final statistics flush for the
    /// phase always precedes its TERMINATED status.
    fn emit(&mut self, phase: &str, transitions: Vec<PhaseStatus>) -> Vec<AgentOutput> {
        let mut outputs = Vec::with_capacity(transitions.len());
        for status in transitions {
            if status == PhaseStatus::Terminated {
                let keys: Vec<StatisticsKey> = self
                    .statistics
                    .keys()
                    .filter(|key| key.phase == phase)
                    .cloned()
                    .collect();
                for key in keys {
                    self.dirty.remove(&key);
                    outputs.extend(self.report(key));
                }
                if let Some(instance) = self.instances.get(phase) {
                    let definition = Arc::clone(instance.phase());
                    self.launcher.release(&definition);
                }
            }
            outputs.push(AgentOutput::Status {
                phase: phase.to_owned(),
                status,
            });
        }
        outputs
    }
}
