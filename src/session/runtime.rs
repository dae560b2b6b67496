use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{AppResult, SessionError};
use crate::metrics::RequestRecord;
use crate::model::{Benchmark, Phase};

pub type SessionId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub sequence: Option<String>,
    pub message: String,
}

/// Reported by running sessions back to the agent's event loop.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Request {
        phase: Arc<str>,
        session: SessionId,
        sequence: String,
        record: RequestRecord,
    },
    Finished {
        phase: Arc<str>,
        session: SessionId,
        failure: Option<SessionFailure>,
    },
}

/// Handle given to a session while it runs.
#[derive(Debug)]
pub struct SessionContext {
    phase: Arc<Phase>,
    phase_name: Arc<str>,
    session: SessionId,
    target: Option<Arc<str>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionContext {
    #[must_use]
    pub fn new(
        phase: Arc<Phase>,
        session: SessionId,
        target: Option<Arc<str>>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let phase_name = Arc::from(phase.name.as_str());
        Self {
            phase,
            phase_name,
            session,
            target,
            events,
        }
    }

    #[must_use]
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session
    }

    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Report one finished request. Dropped silently once the agent has
    /// gone away.
    pub fn record(&self, sequence: &str, record: RequestRecord) {
        let event = SessionEvent::Request {
            phase: Arc::clone(&self.phase_name),
            session: self.session,
            sequence: sequence.to_owned(),
            record,
        };
        if self.events.send(event).is_err() {
            tracing::trace!("Session event receiver closed");
        }
    }

    pub fn finish(self, result: Result<(), SessionError>) {
        let failure = result.err().map(|err| SessionFailure {
            sequence: err.sequence().map(str::to_owned),
            message: err.to_string(),
        });
        let event = SessionEvent::Finished {
            phase: self.phase_name,
            session: self.session,
            failure,
        };
        if self.events.send(event).is_err() {
            tracing::trace!("Session event receiver closed");
        }
    }
}

/// Executes one session: every sequence of the phase's scenario in order.
#[async_trait]
pub trait SessionRuntime: Send + Sync {
    async fn run_session(&self, context: &SessionContext) -> Result<(), SessionError>;
}

/// Builds the runtime a phase uses. Phases that name the same shared
/// resource get a single runtime.
pub trait RuntimeFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be built.
    fn create(&self, benchmark: &Benchmark, phase: &Phase) -> AppResult<Arc<dyn SessionRuntime>>;
}
