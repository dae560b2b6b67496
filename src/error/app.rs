use thiserror::Error;

use super::{
    ConfigError, DefinitionError, DistributedError, MetricsError, PersistenceError,
    SessionError, ValidationError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("CLI error: {source}")]
    Clap {
        #[from]
        source: clap::Error,
    },
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("Join error: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Benchmark definition error: {0}")]
    Definition(#[from] DefinitionError),
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),
    #[error("Distributed error: {0}")]
    Distributed(#[from] DistributedError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation<E>(error: E) -> Self
    where
        E: Into<ValidationError>,
    {
        error.into().into()
    }

    pub fn config<E>(error: E) -> Self
    where
        E: Into<ConfigError>,
    {
        error.into().into()
    }

    pub fn definition<E>(error: E) -> Self
    where
        E: Into<DefinitionError>,
    {
        error.into().into()
    }

    pub fn metrics<E>(error: E) -> Self
    where
        E: Into<MetricsError>,
    {
        error.into().into()
    }

    pub fn distributed<E>(error: E) -> Self
    where
        E: Into<DistributedError>,
    {
        error.into().into()
    }

    pub fn session<E>(error: E) -> Self
    where
        E: Into<SessionError>,
    {
        error.into().into()
    }

    pub fn persistence<E>(error: E) -> Self
    where
        E: Into<PersistenceError>,
    {
        error.into().into()
    }
}
