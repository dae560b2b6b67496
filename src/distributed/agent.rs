mod command;
mod run_exec;
mod session;
mod wire;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::AppResult;
use crate::session::RuntimeFactory;

/// How an agent reaches its controller and paces its local work.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Controller address, `host:port`.
    pub join: String,
    pub agent_id: Option<String>,
    pub auth_token: Option<String>,
    /// Reconnect after the session ends instead of exiting.
    pub standby: bool,
    pub reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
    pub registration_timeout: Duration,
    /// Period of the arrival-rate and terminate-retry tick.
    pub scheduling_tick: Duration,
    /// Overrides the benchmark's statistics period when set.
    pub statistics_period: Option<Duration>,
}

impl AgentOptions {
    #[must_use]
    pub fn new(join: impl Into<String>) -> Self {
        Self {
            join: join.into(),
            agent_id: None,
            auth_token: None,
            standby: false,
            reconnect_delay: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(1),
            registration_timeout: Duration::from_secs(10),
            scheduling_tick: Duration::from_millis(50),
            statistics_period: None,
        }
    }
}

/// Runs the distributed agent loop.
///
/// # Errors
///
/// Returns an error if the agent cannot connect or register, or loses the
/// controller while standby is disabled.
pub async fn run_agent(options: AgentOptions, factory: Arc<dyn RuntimeFactory>) -> AppResult<()> {
    let standby = options.standby;
    let reconnect_delay = options.reconnect_delay;
    info!(
        "Agent starting (standby={}, reconnect={}ms)",
        standby,
        reconnect_delay.as_millis()
    );

    loop {
        let result = session::run_agent_session(&options, &factory).await;
        match result {
            Ok(()) => {
                if !standby {
                    return Ok(());
                }
            }
            Err(err) => {
                if !standby {
                    return Err(err);
                }
                warn!("Agent session error: {}", err);
            }
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}
