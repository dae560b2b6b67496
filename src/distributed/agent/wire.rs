use tokio::sync::mpsc;
use tracing::warn;

use crate::engine::AgentOutput;
use crate::error::{AppError, AppResult, DistributedError};

use super::AgentOptions;
use crate::distributed::protocol::{
    HelloMessage, StatsMessage, StatusMessage, WireMessage, WireStatistics,
};

pub(super) fn send_wire(
    tx: &mpsc::UnboundedSender<WireMessage>,
    message: WireMessage,
) -> AppResult<()> {
    tx.send(message)
        .map_err(|_err| AppError::distributed(DistributedError::ControllerConnectionClosed))
}

/// Forward runner outputs to the controller. Statistics that fail to
/// encode are dropped with a warning; the next report carries them again
/// since reports are cumulative.
pub(super) fn send_outputs(
    tx: &mpsc::UnboundedSender<WireMessage>,
    run_id: &str,
    agent_id: &str,
    outputs: Vec<AgentOutput>,
) -> AppResult<()> {
    for output in outputs {
        let message = match output {
            AgentOutput::Status { phase, status } => WireMessage::Status(StatusMessage {
                run_id: run_id.to_owned(),
                agent_id: agent_id.to_owned(),
                phase,
                status,
            }),
            AgentOutput::Statistics(report) => {
                let statistics = match WireStatistics::from_snapshot(&report.snapshot) {
                    Ok(statistics) => statistics,
                    Err(err) => {
                        warn!(
                            "Dropping statistics for {}/{}: {}",
                            report.phase, report.sequence, err
                        );
                        continue;
                    }
                };
                WireMessage::Stats(Box::new(StatsMessage {
                    run_id: run_id.to_owned(),
                    agent_id: agent_id.to_owned(),
                    phase: report.phase,
                    sequence: report.sequence,
                    report_seq: report.report_seq,
                    statistics,
                }))
            }
        };
        send_wire(tx, message)?;
    }
    Ok(())
}

pub(super) fn build_hello(options: &AgentOptions, agent_id: &str) -> HelloMessage {
    HelloMessage {
        agent_id: agent_id.to_owned(),
        hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_owned()),
        cpu_cores: std::thread::available_parallelism()
            .map(|value| value.get())
            .unwrap_or(1),
        auth_token: options.auth_token.clone(),
    }
}

pub(super) fn build_agent_id(options: &AgentOptions) -> String {
    if let Some(id) = options.agent_id.as_ref() {
        return id.clone();
    }
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "agent".to_owned());
    format!("{}-{}", host, std::process::id())
}
