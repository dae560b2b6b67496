mod app;
mod config;
mod definition;
mod distributed;
mod metrics;
mod persistence;
mod session;
mod validation;

#[cfg(test)]
mod test_support;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use definition::{DefinitionError, DependencyKind};
pub use distributed::DistributedError;
pub use metrics::MetricsError;
pub use persistence::PersistenceError;
pub use session::SessionError;
pub use validation::ValidationError;
