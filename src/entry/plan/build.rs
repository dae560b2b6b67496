use crate::args::{AgentArgs, Command, ControllerArgs, FleetArgs};
use crate::config::load_benchmarks;
use crate::distributed::{AgentOptions, AutoStart, ControllerOptions};
use crate::error::AppResult;

use super::types::{AgentPlan, ControllerPlan, RunPlan};

pub(crate) fn build_plan(args: FleetArgs) -> AppResult<RunPlan> {
    match args.command {
        Command::Controller(controller) => Ok(RunPlan::Controller(controller_plan(controller)?)),
        Command::Agent(agent) => Ok(RunPlan::Agent(agent_plan(agent))),
        Command::Validate(validate) => Ok(RunPlan::Validate(validate.paths)),
    }
}

fn controller_plan(args: ControllerArgs) -> AppResult<ControllerPlan> {
    // Definitions are validated before any listener is bound.
    let benchmarks = load_benchmarks(args.benchmark_dir.as_deref(), &args.benchmarks)?;

    let mut options = ControllerOptions::new(args.listen, args.run_dir);
    options.control_listen = args.admin_listen;
    options.benchmark_dir = args.benchmark_dir;
    options.auth_token = args.auth_token;
    options.heartbeat_timeout = args.heartbeat_timeout;
    options.init_timeout = args.init_timeout;
    options.abort_on_agent_failure = args.abort_on_agent_failure;
    options.autostart = args.start.map(|benchmark| AutoStart {
        benchmark,
        min_agents: args.min_agents,
    });
    if options.autostart.is_none() && options.control_listen.is_none() {
        tracing::warn!(
            "Neither --start nor --admin-listen is set; agents can join but no run can be started."
        );
    }

    Ok(ControllerPlan {
        options,
        benchmarks,
    })
}

fn agent_plan(args: AgentArgs) -> AgentPlan {
    let mut options = AgentOptions::new(args.join);
    options.agent_id = args.agent_id;
    options.auth_token = args.auth_token;
    options.standby = args.standby;
    options.reconnect_delay = args.reconnect_delay;
    options.heartbeat_interval = args.heartbeat_interval;
    options.registration_timeout = args.registration_timeout;
    options.scheduling_tick = args.scheduling_tick;
    options.statistics_period = args.statistics_period;
    AgentPlan {
        options,
        request_timeout: args.request_timeout,
    }
}
