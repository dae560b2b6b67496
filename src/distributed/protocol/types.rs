use serde::{Deserialize, Serialize};

use super::stats::WireStatistics;
use crate::model::{Benchmark, PhaseCommand, PhaseStatus};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(in crate::distributed) enum WireMessage {
    Hello(HelloMessage),
    Registered(RegisteredMessage),
    Init(Box<InitMessage>),
    InitAck(InitAckMessage),
    InitFailed(InitFailedMessage),
    Control(ControlMessage),
    Status(StatusMessage),
    Stats(Box<StatsMessage>),
    Heartbeat(HeartbeatMessage),
    Error(ErrorMessage),
}

#[derive(Debug, Serialize, Deserialize)]
pub(in crate::distributed) struct HelloMessage {
    pub(in crate::distributed) agent_id: String,
    pub(in crate::distributed) hostname: String,
    pub(in crate::distributed) cpu_cores: usize,
    pub(in crate::distributed) auth_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(in crate::distributed) struct RegisteredMessage {
    pub(in crate::distributed) agent_id: String,
}

/// Benchmark for a new run. Agents scale the load down to their share
/// using `agent_index` out of `agent_count`.
#[derive(Debug, Serialize, Deserialize)]
pub(in crate::distributed) struct InitMessage {
    pub(in crate::distributed) run_id: String,
    pub(in crate::distributed) agent_index: usize,
    pub(in crate::distributed) agent_count: usize,
    pub(in crate::distributed) benchmark: Benchmark,
}

#[derive(Debug, Serialize, Deserialize)]
pub(in crate::distributed) struct InitAckMessage {
    pub(in crate::distributed) run_id: String,
    pub(in crate::distributed) agent_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(in crate::distributed) struct InitFailedMessage {
    pub(in crate::distributed) run_id: String,
    pub(in crate::distributed) agent_id: String,
    pub(in crate::distributed) message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(in crate::distributed) struct ControlMessage {
    pub(in crate::distributed) run_id: String,
    pub(in crate::distributed) command: PhaseCommand,
    pub(in crate::distributed) phase: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(in crate::distributed) struct StatusMessage {
    pub(in crate::distributed) run_id: String,
    pub(in crate::distributed) agent_id: String,
    pub(in crate::distributed) phase: String,
    pub(in crate::distributed) status: PhaseStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub(in crate::distributed) struct StatsMessage {
    pub(in crate::distributed) run_id: String,
    pub(in crate::distributed) agent_id: String,
    pub(in crate::distributed) phase: String,
    pub(in crate::distributed) sequence: String,
    pub(in crate::distributed) report_seq: u64,
    pub(in crate::distributed) statistics: WireStatistics,
}

#[derive(Debug, Serialize, Deserialize)]
pub(in crate::distributed) struct HeartbeatMessage {
    pub(in crate::distributed) sent_at_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(in crate::distributed) struct ErrorMessage {
    pub(in crate::distributed) message: String,
}
