//! Session execution: the runtime that drives one user through a scenario,
//! and the launcher that turns engine decisions into tokio tasks.
mod http;
mod launcher;
mod runtime;
mod shared;


pub use http::{HttpRuntimeFactory, HttpSessionRuntime};
pub use launcher::TaskLauncher;
pub use runtime::{
    RuntimeFactory, SessionContext, SessionEvent, SessionFailure, SessionId, SessionRuntime,
};
pub use shared::SharedResources;
