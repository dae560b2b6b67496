use tokio::sync::{mpsc, oneshot};

use crate::error::DistributedError;
use crate::metrics::StatisticsSnapshot;
use crate::model::PhaseStatus;

use crate::distributed::protocol::{HelloMessage, WireMessage};

/// One agent connection. A reconnecting agent keeps its id but gets a new
/// connection number, so events from a stale socket can be told apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct AgentRef {
    pub(super) agent_id: String,
    pub(super) connection: u64,
}

#[derive(Debug)]
pub(super) struct AgentStatistics {
    pub(super) run_id: String,
    pub(super) phase: String,
    pub(super) sequence: String,
    pub(super) report_seq: u64,
    pub(super) snapshot: StatisticsSnapshot,
}

/// Everything the connection tasks hand to the controller loop.
#[derive(Debug)]
pub(super) enum ControllerEvent {
    Connected {
        agent: AgentRef,
        hello: HelloMessage,
        sender: mpsc::UnboundedSender<WireMessage>,
        respond_to: oneshot::Sender<Result<(), DistributedError>>,
    },
    Heartbeat {
        agent: AgentRef,
    },
    InitAck {
        agent: AgentRef,
        run_id: String,
    },
    InitFailed {
        agent: AgentRef,
        run_id: String,
        message: String,
    },
    Status {
        agent: AgentRef,
        run_id: String,
        phase: String,
        status: PhaseStatus,
    },
    Stats {
        agent: AgentRef,
        statistics: Box<AgentStatistics>,
    },
    Error {
        agent: AgentRef,
        message: String,
    },
    Disconnected {
        agent: AgentRef,
        message: String,
    },
}

impl ControllerEvent {
    pub(super) const fn agent(&self) -> &AgentRef {
        match self {
            Self::Connected { agent, .. }
            | Self::Heartbeat { agent }
            | Self::InitAck { agent, .. }
            | Self::InitFailed { agent, .. }
            | Self::Status { agent, .. }
            | Self::Stats { agent, .. }
            | Self::Error { agent, .. }
            | Self::Disconnected { agent, .. } => agent,
        }
    }
}
