use std::path::PathBuf;
use std::time::Duration;

use crate::distributed::{AgentOptions, ControllerOptions};
use crate::model::Benchmark;

pub(in crate::entry) struct ControllerPlan {
    pub(super) options: ControllerOptions,
    pub(super) benchmarks: Vec<Benchmark>,
}

pub(in crate::entry) struct AgentPlan {
    pub(super) options: AgentOptions,
    pub(super) request_timeout: Duration,
}

pub(in crate::entry) enum RunPlan {
    Controller(ControllerPlan),
    Agent(AgentPlan),
    Validate(Vec<PathBuf>),
}
