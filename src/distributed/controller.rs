mod agent;
mod aggregation;
mod connections;
mod control;
mod control_http;
mod coordinator;
mod event_loop;
mod events;
mod finalize;
mod http;
mod registry;
mod run;

#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{AppError, AppResult, DistributedError};
use crate::model::Benchmark;
use crate::shutdown::ShutdownReceiver;

use connections::{accept_agents, accept_control_connections};
use coordinator::{CoordinatorSettings, RunCoordinator};
use event_loop::{LoopChannels, run_event_loop};

pub use registry::AgentStatus;
pub use run::{AgentReport, PhaseReport, RunOutcome, RunReport, RunState};

/// Start a benchmark without the admin surface once enough agents joined.
#[derive(Debug, Clone)]
pub struct AutoStart {
    pub benchmark: String,
    pub min_agents: usize,
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Address agents connect to.
    pub listen: String,
    /// Address of the admin HTTP surface; disabled when `None`.
    pub control_listen: Option<String>,
    /// Shared secret agents send in their hello; also the admin bearer token.
    pub auth_token: Option<String>,
    pub run_dir: PathBuf,
    /// Directory uploaded benchmark definitions are written to.
    pub benchmark_dir: Option<PathBuf>,
    pub heartbeat_timeout: Duration,
    pub init_timeout: Duration,
    pub liveness_interval: Duration,
    pub abort_on_agent_failure: bool,
    pub autostart: Option<AutoStart>,
}

impl ControllerOptions {
    #[must_use]
    pub fn new(listen: impl Into<String>, run_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen: listen.into(),
            control_listen: None,
            auth_token: None,
            run_dir: run_dir.into(),
            benchmark_dir: None,
            heartbeat_timeout: Duration::from_secs(5),
            init_timeout: Duration::from_secs(30),
            liveness_interval: Duration::from_secs(1),
            abort_on_agent_failure: false,
            autostart: None,
        }
    }
}

/// Bind the listeners and run the controller.
///
/// # Errors
///
/// Returns an error if a listener cannot be bound, or the autostarted run
/// cannot be started.
pub async fn run_controller(
    options: ControllerOptions,
    benchmarks: Vec<Benchmark>,
    shutdown: ShutdownReceiver,
) -> AppResult<Option<RunReport>> {
    let listener = bind(&options.listen).await?;
    let control_listener = match options.control_listen.as_deref() {
        Some(addr) => Some(bind(addr).await?),
        None => None,
    };
    run_controller_on(listener, control_listener, options, benchmarks, shutdown).await
}

/// Run the controller on already bound listeners. Returns the report of the
/// autostarted run, or `None` when stopped by shutdown.
///
/// # Errors
///
/// Returns an error if the autostart benchmark is unknown or cannot be
/// started, or shutdown arrives before the autostarted run completes.
pub async fn run_controller_on(
    listener: TcpListener,
    control_listener: Option<TcpListener>,
    options: ControllerOptions,
    benchmarks: Vec<Benchmark>,
    shutdown: ShutdownReceiver,
) -> AppResult<Option<RunReport>> {
    let autostart = match options.autostart.clone() {
        Some(auto) => {
            let benchmark = benchmarks
                .iter()
                .find(|benchmark| benchmark.name == auto.benchmark)
                .ok_or_else(|| {
                    AppError::distributed(DistributedError::BenchmarkNotFound {
                        name: auto.benchmark.clone(),
                    })
                })?;
            let min_agents = auto.min_agents.max(benchmark.agents.unwrap_or(1)).max(1);
            Some(AutoStart {
                benchmark: auto.benchmark,
                min_agents,
            })
        }
        None => None,
    };

    if let Ok(addr) = listener.local_addr() {
        info!("Controller listening for agents on {}", addr);
    }
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let agent_task = tokio::spawn(accept_agents(
        listener,
        options.auth_token.clone(),
        event_tx,
    ));
    let control_task = control_listener.map(|control_listener| {
        if let Ok(addr) = control_listener.local_addr() {
            info!("Controller admin surface on http://{}", addr);
        }
        tokio::spawn(accept_control_connections(
            control_listener,
            options.auth_token.clone(),
            control_tx,
        ))
    });

    let coordinator = RunCoordinator::new(
        CoordinatorSettings {
            run_dir: options.run_dir,
            benchmark_dir: options.benchmark_dir,
            heartbeat_timeout: options.heartbeat_timeout,
            init_timeout: options.init_timeout,
            abort_on_agent_failure: options.abort_on_agent_failure,
        },
        benchmarks,
    );
    let result = run_event_loop(
        coordinator,
        LoopChannels {
            events: event_rx,
            control: control_rx,
            shutdown,
        },
        options.liveness_interval,
        autostart,
    )
    .await;

    agent_task.abort();
    if let Some(task) = control_task {
        task.abort();
    }
    result
}

async fn bind(addr: &str) -> AppResult<TcpListener> {
    TcpListener::bind(addr).await.map_err(|err| {
        AppError::distributed(DistributedError::Bind {
            addr: addr.to_owned(),
            source: err,
        })
    })
}
