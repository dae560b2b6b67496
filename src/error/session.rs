use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid request URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Request step needs an absolute path or a benchmark target: '{path}'.")]
    MissingTarget { path: String },
    #[error("Failed to build HTTP client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },
    #[error("Sequence '{sequence}' aborted: {message}")]
    Aborted { sequence: String, message: String },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}

impl SessionError {
    #[must_use]
    pub fn sequence(&self) -> Option<&str> {
        match self {
            Self::Aborted { sequence, .. } => Some(sequence),
            Self::InvalidUrl { .. } | Self::MissingTarget { .. } | Self::Client { .. } => None,
            #[cfg(test)]
            Self::TestExpectation { .. } | Self::TestExpectationValue { .. } => None,
        }
    }
}
