use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use super::parsers::{parse_duration_arg, parse_positive_usize};

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Distributed HTTP load generator - a controller coordinates phased benchmarks across any number of agents and merges their statistics."
)]
pub struct FleetArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging (overridden by FLEETLOAD_LOG / RUST_LOG)
    #[arg(long = "verbose", short = 'v', global = true)]
    pub verbose: bool,

    /// Disable colored log output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the controller: accept agents and coordinate benchmark runs
    Controller(ControllerArgs),
    /// Run an agent that joins a controller and executes sessions
    Agent(AgentArgs),
    /// Load benchmark definitions and report problems without running them
    Validate(ValidateArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ControllerArgs {
    /// Address agents connect to
    #[arg(
        long = "listen",
        default_value = "0.0.0.0:9009",
        env = "FLEETLOAD_LISTEN"
    )]
    pub listen: String,

    /// Address of the admin HTTP surface (disabled when unset)
    #[arg(long = "admin-listen", env = "FLEETLOAD_ADMIN_LISTEN")]
    pub admin_listen: Option<String>,

    /// Directory run artifacts are written to
    #[arg(long = "run-dir", default_value = "runs")]
    pub run_dir: PathBuf,

    /// Directory of benchmark definitions (*.toml, *.json)
    #[arg(long = "benchmark-dir")]
    pub benchmark_dir: Option<PathBuf>,

    /// Benchmark definition file (repeatable)
    #[arg(long = "benchmark", short = 'b')]
    pub benchmarks: Vec<PathBuf>,

    /// Start this benchmark once enough agents joined, then exit with its outcome
    #[arg(long = "start")]
    pub start: Option<String>,

    /// Agents required before --start begins the run
    #[arg(long = "min-agents", default_value = "1", value_parser = parse_positive_usize)]
    pub min_agents: usize,

    /// Shared secret for agents and the admin surface
    #[arg(long = "auth-token", env = "FLEETLOAD_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Agents silent for longer than this are considered failed (supports ms/s/m/h)
    #[arg(long = "heartbeat-timeout", default_value = "5s", value_parser = parse_duration_arg)]
    pub heartbeat_timeout: Duration,

    /// Time agents get to acknowledge a run (supports ms/s/m/h)
    #[arg(long = "init-timeout", default_value = "30s", value_parser = parse_duration_arg)]
    pub init_timeout: Duration,

    /// Kill the run as soon as any participating agent fails
    #[arg(long = "abort-on-agent-failure")]
    pub abort_on_agent_failure: bool,
}

#[derive(Debug, Args, Clone)]
pub struct AgentArgs {
    /// Controller address (host:port)
    #[arg(long = "join", env = "FLEETLOAD_JOIN")]
    pub join: String,

    /// Agent id announced to the controller (defaults to hostname and pid)
    #[arg(long = "agent-id")]
    pub agent_id: Option<String>,

    /// Shared secret expected by the controller
    #[arg(long = "auth-token", env = "FLEETLOAD_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Reconnect after a run or a lost controller instead of exiting
    #[arg(long = "standby")]
    pub standby: bool,

    /// Delay between reconnect attempts in standby mode (supports ms/s/m/h)
    #[arg(long = "reconnect-delay", default_value = "1s", value_parser = parse_duration_arg)]
    pub reconnect_delay: Duration,

    /// Heartbeat period (supports ms/s/m/h)
    #[arg(long = "heartbeat-interval", default_value = "1s", value_parser = parse_duration_arg)]
    pub heartbeat_interval: Duration,

    /// Time to wait for the controller's registration reply (supports ms/s/m/h)
    #[arg(long = "registration-timeout", default_value = "10s", value_parser = parse_duration_arg)]
    pub registration_timeout: Duration,

    /// Period of the session scheduler (supports ms/s/m/h)
    #[arg(long = "scheduling-tick", default_value = "50ms", value_parser = parse_duration_arg)]
    pub scheduling_tick: Duration,

    /// Per-request timeout (supports ms/s/m/h)
    #[arg(long = "request-timeout", default_value = "30s", value_parser = parse_duration_arg)]
    pub request_timeout: Duration,

    /// Override the benchmark's statistics period (supports ms/s/m/h)
    #[arg(long = "statistics-period", value_parser = parse_duration_arg)]
    pub statistics_period: Option<Duration>,
}

#[derive(Debug, Args, Clone)]
pub struct ValidateArgs {
    /// Benchmark files or directories to check
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}
