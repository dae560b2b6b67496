use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::metrics::{RecordingSlaSink, SlaViolation, StatisticsStore};
use crate::model::{Benchmark, ControllerPhaseStatus, Phase};

use super::registry::{AgentRegistry, AgentStatus};
use crate::distributed::utils::format_timestamp_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Waiting for the run it replaces to be finalized.
    Queued,
    Initializing,
    Running,
    Finalizing,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Killed { reason: String },
}

/// Final account of a run, written as `report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub benchmark: String,
    pub started_at: Option<String>,
    pub terminated_at: Option<String>,
    pub duration_ms: Option<u64>,
    pub outcome: RunOutcome,
    pub phases: Vec<PhaseReport>,
    pub agents: Vec<AgentReport>,
    pub sla_violations: Vec<SlaViolation>,
}

impl RunReport {
    #[must_use]
    pub const fn is_killed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Killed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub name: String,
    pub status: ControllerPhaseStatus,
    pub started_at: Option<String>,
    /// `None` when the phase never terminated through its agents.
    pub sla_passed: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentReport {
    pub agent_id: String,
    pub status: AgentStatus,
    pub failure: Option<String>,
}

/// Controller-side view of one phase.
#[derive(Debug)]
pub(super) struct ControllerPhase {
    pub(super) definition: Phase,
    pub(super) status: ControllerPhaseStatus,
    pub(super) absolute_start_ms: Option<u64>,
    pub(super) try_terminate_sent: bool,
    pub(super) sla_passed: Option<bool>,
}

impl ControllerPhase {
    const fn new(definition: Phase) -> Self {
        Self {
            definition,
            status: ControllerPhaseStatus::NotStarted,
            absolute_start_ms: None,
            try_terminate_sent: false,
            sla_passed: None,
        }
    }

    /// Move forward to `status`; never backwards.
    pub(super) fn advance(&mut self, status: ControllerPhaseStatus) -> bool {
        if status > self.status {
            self.status = status;
            return true;
        }
        false
    }
}

#[derive(Debug)]
pub(super) struct Run {
    pub(super) id: String,
    pub(super) benchmark: Benchmark,
    pub(super) state: RunState,
    pub(super) created_ms: u64,
    pub(super) start_time_ms: Option<u64>,
    pub(super) terminate_time_ms: Option<u64>,
    pub(super) phases: BTreeMap<String, ControllerPhase>,
    /// Agents still taking part; failed agents are removed.
    pub(super) participants: BTreeSet<String>,
    /// Agents that left the run, with the reason.
    pub(super) dropped: BTreeMap<String, String>,
    pub(super) statistics: StatisticsStore,
    pub(super) sla_sink: RecordingSlaSink,
    pub(super) kill_reason: Option<String>,
}

impl Run {
    pub(super) fn new(
        id: String,
        benchmark: Benchmark,
        participants: BTreeSet<String>,
        now_ms: u64,
    ) -> Self {
        let sla_sink = RecordingSlaSink::new();
        let statistics = StatisticsStore::new(&benchmark, Box::new(sla_sink.clone()));
        let phases = benchmark
            .phases
            .iter()
            .map(|phase| (phase.name.clone(), ControllerPhase::new(phase.clone())))
            .collect();
        Self {
            id,
            benchmark,
            state: RunState::Initializing,
            created_ms: now_ms,
            start_time_ms: None,
            terminate_time_ms: None,
            phases,
            participants,
            dropped: BTreeMap::new(),
            statistics,
            sla_sink,
            kill_reason: None,
        }
    }

    pub(super) const fn is_active(&self) -> bool {
        matches!(self.state, RunState::Initializing | RunState::Running)
    }

    #[cfg(test)]
    pub(super) fn status_of(&self, phase: &str) -> Option<ControllerPhaseStatus> {
        self.phases.get(phase).map(|phase| phase.status)
    }

    pub(super) fn all_terminated(&self) -> bool {
        self.phases
            .values()
            .all(|phase| phase.status.is_terminated())
    }

    pub(super) fn outcome(&self) -> RunOutcome {
        match &self.kill_reason {
            Some(reason) => RunOutcome::Killed {
                reason: reason.clone(),
            },
            None => RunOutcome::Completed,
        }
    }

    pub(super) fn report(&self, agents: &AgentRegistry) -> RunReport {
        let phases = self
            .benchmark
            .phases
            .iter()
            .filter_map(|phase| self.phases.get(&phase.name))
            .map(|phase| PhaseReport {
                name: phase.definition.name.clone(),
                status: phase.status,
                started_at: phase.absolute_start_ms.and_then(format_timestamp_ms),
                sla_passed: phase.sla_passed,
            })
            .collect();
        let mut reported: Vec<AgentReport> = self
            .participants
            .iter()
            .map(|agent_id| AgentReport {
                agent_id: agent_id.clone(),
                status: agents
                    .get(agent_id)
                    .map_or(AgentStatus::Failed, |agent| agent.status),
                failure: agents.get(agent_id).and_then(|agent| agent.failure.clone()),
            })
            .collect();
        reported.extend(self.dropped.iter().map(|(agent_id, reason)| AgentReport {
            agent_id: agent_id.clone(),
            status: AgentStatus::Failed,
            failure: Some(reason.clone()),
        }));
        let duration_ms = match (self.start_time_ms, self.terminate_time_ms) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            (Some(_) | None, None) | (None, Some(_)) => None,
        };
        RunReport {
            run_id: self.id.clone(),
            benchmark: self.benchmark.name.clone(),
            started_at: self.start_time_ms.and_then(format_timestamp_ms),
            terminated_at: self.terminate_time_ms.and_then(format_timestamp_ms),
            duration_ms,
            outcome: self.outcome(),
            phases,
            agents: reported,
            sla_violations: self.sla_sink.violations(),
        }
    }
}
