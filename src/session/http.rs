use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use tokio::time::Instant;

use super::runtime::{RuntimeFactory, SessionContext, SessionRuntime};
use crate::error::{AppError, AppResult, SessionError};
use crate::metrics::{RequestOutcome, RequestRecord};
use crate::model::{Benchmark, HttpMethod, Phase};

/// Runs scenario steps as HTTP requests against the benchmark target.
#[derive(Debug, Clone)]
pub struct HttpSessionRuntime {
    client: Client,
    target: Option<Url>,
}

impl HttpSessionRuntime {
    /// # Errors
    ///
    /// Returns an error if the target is not a valid URL or the client
    /// cannot be built.
    pub fn new(target: Option<&str>, request_timeout: Duration) -> Result<Self, SessionError> {
        let target = target
            .map(|value| {
                Url::parse(value).map_err(|err| SessionError::InvalidUrl {
                    url: value.to_owned(),
                    source: err,
                })
            })
            .transpose()?;
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| SessionError::Client { source: err })?;
        Ok(Self { client, target })
    }

    fn resolve(&self, path: &str) -> Result<Url, SessionError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path).map_err(|err| SessionError::InvalidUrl {
                url: path.to_owned(),
                source: err,
            });
        }
        let Some(target) = &self.target else {
            return Err(SessionError::MissingTarget {
                path: path.to_owned(),
            });
        };
        target.join(path).map_err(|err| SessionError::InvalidUrl {
            url: path.to_owned(),
            source: err,
        })
    }
}

fn method(value: HttpMethod) -> Method {
    match value {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

fn classify_error(err: &reqwest::Error) -> RequestOutcome {
    if err.is_timeout() {
        RequestOutcome::Timeout
    } else if err.is_connect() {
        RequestOutcome::ConnectFailure
    } else {
        RequestOutcome::Reset
    }
}

#[async_trait]
impl SessionRuntime for HttpSessionRuntime {
    async fn run_session(&self, context: &SessionContext) -> Result<(), SessionError> {
        for sequence in &context.phase().scenario.sequences {
            for step in &sequence.steps {
                let url = self.resolve(&step.path).map_err(|err| SessionError::Aborted {
                    sequence: sequence.name.clone(),
                    message: err.to_string(),
                })?;
                let mut request = self.client.request(method(step.method), url);
                for (name, value) in &step.headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                if let Some(body) = &step.body {
                    request = request.body(body.clone());
                }

                let started = Instant::now();
                let outcome = match request.send().await {
                    Ok(response) => {
                        let status = response.status().as_u16();
                        match response.bytes().await {
                            Ok(_) => RequestOutcome::Response { status },
                            Err(err) => classify_error(&err),
                        }
                    }
                    Err(err) => classify_error(&err),
                };
                context.record(
                    &sequence.name,
                    RequestRecord {
                        outcome,
                        latency: started.elapsed(),
                    },
                );

                if let Some(think_time) = step.think_time {
                    tokio::time::sleep(think_time).await;
                }
            }
        }
        Ok(())
    }
}

/// Builds one [`HttpSessionRuntime`] per phase, or per shared resource.
#[derive(Debug, Clone, Copy)]
pub struct HttpRuntimeFactory {
    request_timeout: Duration,
}

impl HttpRuntimeFactory {
    #[must_use]
    pub const fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl RuntimeFactory for HttpRuntimeFactory {
    fn create(&self, benchmark: &Benchmark, _phase: &Phase) -> AppResult<Arc<dyn SessionRuntime>> {
        let runtime = HttpSessionRuntime::new(benchmark.target.as_deref(), self.request_timeout)
            .map_err(AppError::session)?;
        Ok(Arc::new(runtime))
    }
}
