//! Core library for the `fleetload` CLI.
//!
//! A controller loads benchmark definitions, hands phases to connected
//! agents and merges the statistics they stream back; agents run the
//! sessions with the load engine. The `fleetload` binary is a thin wrapper
//! over [`entry::run`]; the modules are public so the distributed pieces
//! can be driven in-process (see the integration tests).
pub mod args;
pub mod config;
pub mod distributed;
pub mod engine;
pub mod entry;
pub mod error;
pub mod logger;
pub mod metrics;
pub mod model;
pub mod session;
pub mod shutdown;
