use crate::model::PhaseStatus;

use super::registry::AgentInfo;

/// Minimum reported status of `phase` across `agents`. `None` while any
/// agent has not reported the phase yet, or when there are no agents.
pub(super) fn aggregate_status<'agent, I>(agents: I, phase: &str) -> Option<PhaseStatus>
where
    I: IntoIterator<Item = &'agent AgentInfo>,
{
    let mut aggregate: Option<PhaseStatus> = None;
    for agent in agents {
        let status = *agent.phases.get(phase)?;
        aggregate = Some(aggregate.map_or(status, |current| current.min(status)));
    }
    aggregate
}
