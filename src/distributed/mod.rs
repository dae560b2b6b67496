//! Controller/agent distribution: a newline-delimited JSON protocol over
//! TCP, the controller's run coordinator and the agent's session loop.
mod agent;
mod controller;
mod protocol;
mod utils;

pub use agent::{AgentOptions, run_agent};
pub use controller::{
    AgentReport, AgentStatus, AutoStart, ControllerOptions, PhaseReport, RunOutcome, RunReport,
    RunState, run_controller, run_controller_on,
};

#[cfg(test)]
mod tests;
