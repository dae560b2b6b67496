//! Agent-side phase execution.
//!
//! [`ConcurrencyEngine`] decides when sessions start, [`PhaseInstance`]
//! walks a phase through its lifecycle and [`SimulationRunner`] ties the
//! phases of one run together and turns everything into status and
//! statistics messages for the controller.
mod concurrency;
mod instance;
mod runner;


pub use concurrency::{ConcurrencyEngine, SessionCompletion, SessionLauncher, sessions_due};
pub use instance::PhaseInstance;
pub use runner::{AgentOutput, SimulationRunner, StatisticsReport};
