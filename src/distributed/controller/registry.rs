use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::DistributedError;
use crate::model::PhaseStatus;

use super::events::AgentRef;
use crate::distributed::protocol::{HelloMessage, WireMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Registered,
    Initializing,
    Initialized,
    Failed,
}

#[derive(Debug)]
pub(super) struct AgentInfo {
    pub(super) agent_id: String,
    pub(super) hostname: String,
    pub(super) cpu_cores: usize,
    pub(super) connection: u64,
    pub(super) status: AgentStatus,
    pub(super) connected: bool,
    pub(super) last_seen_ms: u64,
    pub(super) init_deadline_ms: Option<u64>,
    pub(super) failure: Option<String>,
    /// Last status reported per phase of the current run.
    pub(super) phases: BTreeMap<String, PhaseStatus>,
    sender: Option<mpsc::UnboundedSender<WireMessage>>,
}

impl AgentInfo {
    pub(super) fn send(&self, message: WireMessage) -> bool {
        match self.sender.as_ref() {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Record a phase status. Statuses never move backwards, so duplicated
    /// or stale reports leave the entry untouched.
    pub(super) fn update_phase(&mut self, phase: &str, status: PhaseStatus) -> bool {
        match self.phases.get_mut(phase) {
            Some(current) if *current >= status => false,
            Some(current) => {
                *current = status;
                true
            }
            None => {
                self.phases.insert(phase.to_owned(), status);
                true
            }
        }
    }

    pub(super) fn fail(&mut self, reason: &str) {
        warn!("Agent {} failed: {}", self.agent_id, reason);
        self.status = AgentStatus::Failed;
        self.failure = Some(reason.to_owned());
        self.init_deadline_ms = None;
    }

    pub(super) fn disconnect(&mut self) {
        self.connected = false;
        self.sender = None;
    }

    /// Back to the idle pool after a run.
    pub(super) fn reset(&mut self) {
        if self.status != AgentStatus::Failed {
            self.status = AgentStatus::Registered;
        }
        self.init_deadline_ms = None;
        self.phases.clear();
    }

    pub(super) const fn is_available(&self) -> bool {
        self.connected && matches!(self.status, AgentStatus::Registered)
    }
}

/// Connected and remembered agents, keyed by agent id.
#[derive(Debug, Default)]
pub(super) struct AgentRegistry {
    agents: BTreeMap<String, AgentInfo>,
}

impl AgentRegistry {
    /// Register a newly connected agent. An id that is still connected is
    /// refused; a disconnected or failed entry is replaced.
    pub(super) fn register(
        &mut self,
        agent: &AgentRef,
        hello: &HelloMessage,
        sender: mpsc::UnboundedSender<WireMessage>,
        now_ms: u64,
    ) -> Result<(), DistributedError> {
        if let Some(existing) = self.agents.get(&agent.agent_id)
            && existing.connected
            && existing.status != AgentStatus::Failed
        {
            return Err(DistributedError::AgentAlreadyPresent);
        }
        info!(
            "Agent {} registered ({} cores on {})",
            agent.agent_id, hello.cpu_cores, hello.hostname
        );
        self.agents.insert(
            agent.agent_id.clone(),
            AgentInfo {
                agent_id: agent.agent_id.clone(),
                hostname: hello.hostname.clone(),
                cpu_cores: hello.cpu_cores,
                connection: agent.connection,
                status: AgentStatus::Registered,
                connected: true,
                last_seen_ms: now_ms,
                init_deadline_ms: None,
                failure: None,
                phases: BTreeMap::new(),
                sender: Some(sender),
            },
        );
        Ok(())
    }

    /// The entry for this exact connection, if it is still the live one.
    pub(super) fn current_mut(&mut self, agent: &AgentRef) -> Option<&mut AgentInfo> {
        let entry = self.agents.get_mut(&agent.agent_id)?;
        if entry.connection != agent.connection {
            debug!(
                "Dropping event from stale connection {} of agent {}",
                agent.connection, agent.agent_id
            );
            return None;
        }
        Some(entry)
    }

    pub(super) fn get(&self, agent_id: &str) -> Option<&AgentInfo> {
        self.agents.get(agent_id)
    }

    pub(super) fn get_mut(&mut self, agent_id: &str) -> Option<&mut AgentInfo> {
        self.agents.get_mut(agent_id)
    }

    pub(super) fn available(&self) -> Vec<String> {
        self.agents
            .values()
            .filter(|agent| agent.is_available())
            .map(|agent| agent.agent_id.clone())
            .collect()
    }

    pub(super) fn connected_count(&self) -> usize {
        self.agents.values().filter(|agent| agent.connected).count()
    }

    pub(super) fn iter(&self) -> impl Iterator<Item = &AgentInfo> {
        self.agents.values()
    }

    /// Forget agents that are gone and not needed for any report.
    pub(super) fn prune_disconnected(&mut self) {
        self.agents.retain(|_, agent| agent.connected);
    }
}
