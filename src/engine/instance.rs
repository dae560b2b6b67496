use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;

use super::concurrency::{ConcurrencyEngine, SessionCompletion, SessionLauncher};
use crate::model::{Phase, PhaseStatus};
use crate::session::SessionId;

/// One phase running on this agent.
///
/// Every transition method returns the statuses the phase passed through,
/// in order, so the caller can report each intermediate state.
#[derive(Debug)]
pub struct PhaseInstance {
    phase: Arc<Phase>,
    status: PhaseStatus,
    engine: ConcurrencyEngine,
    started_at: Option<Instant>,
    terminate_requested: bool,
}

impl PhaseInstance {
    #[must_use]
    pub fn new(phase: Arc<Phase>) -> Self {
        Self {
            engine: ConcurrencyEngine::new(Arc::clone(&phase)),
            phase,
            status: PhaseStatus::NotStarted,
            started_at: None,
            terminate_requested: false,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> &Arc<Phase> {
        &self.phase
    }

    #[must_use]
    pub const fn status(&self) -> PhaseStatus {
        self.status
    }

    #[must_use]
    pub fn is_session_active(&self, session: SessionId) -> bool {
        self.engine.is_active(session)
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.engine.active_sessions()
    }

    #[must_use]
    pub const fn started_sessions(&self) -> u64 {
        self.engine.started_sessions()
    }

    pub fn run<L: SessionLauncher>(&mut self, now: Instant, launcher: &mut L) -> Vec<PhaseStatus> {
        if self.status != PhaseStatus::NotStarted {
            debug!("Phase '{}' already {}; ignoring run", self.phase.name, self.status);
            return Vec::new();
        }
        self.status = PhaseStatus::Running;
        self.started_at = Some(now);
        let mut transitions = vec![PhaseStatus::Running];
        if self.engine.start(launcher) {
            transitions.extend(self.finish());
            transitions.extend(self.settle());
        }
        transitions
    }

    /// Stop starting sessions. Sessions already running carry on.
    pub fn finish(&mut self) -> Vec<PhaseStatus> {
        match self.status {
            PhaseStatus::Running => {
                self.engine.stop_accepting();
                self.status = PhaseStatus::Finished;
                vec![PhaseStatus::Finished]
            }
            PhaseStatus::NotStarted
            | PhaseStatus::Finished
            | PhaseStatus::Terminating
            | PhaseStatus::Terminated => Vec::new(),
        }
    }

    /// Terminate once no session is active. Finishes a running phase
    /// first; the request stays pending until the last session completes.
    pub fn try_terminate(&mut self) -> Vec<PhaseStatus> {
        match self.status {
            PhaseStatus::Running | PhaseStatus::Finished => {
                self.terminate_requested = true;
                let mut transitions = self.finish();
                transitions.extend(self.settle());
                transitions
            }
            PhaseStatus::NotStarted => {
                debug!("Phase '{}' not started; ignoring try-terminate", self.phase.name);
                Vec::new()
            }
            PhaseStatus::Terminating | PhaseStatus::Terminated => Vec::new(),
        }
    }

    /// Cancel all sessions and terminate now.
    pub fn terminate<L: SessionLauncher>(&mut self, launcher: &mut L) -> Vec<PhaseStatus> {
        let mut transitions = Vec::new();
        match self.status {
            PhaseStatus::NotStarted | PhaseStatus::Terminated => return transitions,
            PhaseStatus::Running => transitions.extend(self.finish()),
            PhaseStatus::Finished | PhaseStatus::Terminating => {}
        }
        if self.status == PhaseStatus::Finished {
            self.status = PhaseStatus::Terminating;
            transitions.push(PhaseStatus::Terminating);
        }
        let cancelled = self.engine.cancel_all(launcher);
        if cancelled > 0 {
            debug!("Cancelled {} sessions of phase '{}'", cancelled, self.phase.name);
        }
        self.status = PhaseStatus::Terminated;
        transitions.push(PhaseStatus::Terminated);
        transitions
    }

    pub fn tick<L: SessionLauncher>(&mut self, now: Instant, launcher: &mut L) -> Vec<PhaseStatus> {
        if self.status == PhaseStatus::Running
            && let Some(started_at) = self.started_at
        {
            self.engine
                .tick(now.saturating_duration_since(started_at), launcher);
        }
        self.settle()
    }

    /// Returns `None` when the session does not belong to this phase or was
    /// already cancelled.
    pub fn session_finished<L: SessionLauncher>(
        &mut self,
        session: SessionId,
        launcher: &mut L,
    ) -> Option<Vec<PhaseStatus>> {
        match self.engine.session_finished(session, launcher) {
            SessionCompletion::Unknown => None,
            SessionCompletion::Completed => Some(self.settle()),
            SessionCompletion::Exhausted => {
                let mut transitions = self.finish();
                transitions.extend(self.settle());
                Some(transitions)
            }
        }
    }

    fn settle(&mut self) -> Vec<PhaseStatus> {
        if !self.terminate_requested
            || self.status != PhaseStatus::Finished
            || self.engine.active_sessions() > 0
        {
            return Vec::new();
        }
        self.status = PhaseStatus::Terminated;
        vec![PhaseStatus::Terminating, PhaseStatus::Terminated]
    }
}
