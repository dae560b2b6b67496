//! Benchmark definition types shared by the controller and the agents.
//!
//! Everything here is plain data: it is built once by the configuration
//! loader, shipped to agents inside the init message and never mutated
//! afterwards.

mod benchmark;
pub(crate) mod duration_ms;
mod phase;
mod rate;
mod sla;
mod status;


pub use benchmark::{
    Benchmark, DEFAULT_PERCENTILES, DEFAULT_STATISTICS_PERIOD, HttpMethod, RequestStep, Scenario,
    Sequence,
};
pub use phase::{LoadShape, Phase};
pub use rate::{ArrivalRate, split_evenly};
pub use sla::{ErrorRatio, Sla, SlaRule};
pub use status::{ControllerPhaseStatus, PhaseCommand, PhaseStatus};
