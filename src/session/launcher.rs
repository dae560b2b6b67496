use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::runtime::{
    RuntimeFactory, SessionContext, SessionEvent, SessionFailure, SessionId, SessionRuntime,
};
use super::shared::SharedResources;
use crate::engine::SessionLauncher;
use crate::error::AppResult;
use crate::model::{Benchmark, Phase};

/// Spawns each session as a tokio task and keeps its abort handle so the
/// engine can cancel it.
pub struct TaskLauncher {
    target: Option<Arc<str>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    shared: SharedResources<dyn SessionRuntime>,
    runtimes: HashMap<String, Arc<dyn SessionRuntime>>,
    tasks: HashMap<String, HashMap<SessionId, AbortHandle>>,
}

impl TaskLauncher {
    /// Build the runtimes of every phase up front so a broken benchmark is
    /// rejected at init rather than mid-run.
    ///
    /// # Errors
    ///
    /// Returns an error if a runtime cannot be created.
    pub fn new(
        benchmark: &Benchmark,
        factory: &dyn RuntimeFactory,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> AppResult<Self> {
        let mut shared: SharedResources<dyn SessionRuntime> = SharedResources::new();
        let mut runtimes = HashMap::with_capacity(benchmark.phases.len());
        for phase in benchmark.phases.iter().filter(|phase| !phase.is_noop()) {
            let runtime = match &phase.shared_resources {
                Some(key) => shared.acquire(key, &phase.name, || factory.create(benchmark, phase))?,
                None => factory.create(benchmark, phase)?,
            };
            runtimes.insert(phase.name.clone(), runtime);
        }
        Ok(Self {
            target: benchmark.target.as_deref().map(Arc::from),
            events,
            shared,
            runtimes,
            tasks: HashMap::new(),
        })
    }

    #[must_use]
    pub fn running_tasks(&self) -> usize {
        self.tasks.values().map(HashMap::len).sum()
    }
}

impl SessionLauncher for TaskLauncher {
    fn launch(&mut self, phase: &Arc<Phase>, session: SessionId) {
        let Some(runtime) = self.runtimes.get(&phase.name).cloned() else {
            warn!("No session runtime for phase '{}'", phase.name);
            let event = SessionEvent::Finished {
                phase: Arc::from(phase.name.as_str()),
                session,
                failure: Some(SessionFailure {
                    sequence: None,
                    message: format!("no session runtime for phase '{}'", phase.name),
                }),
            };
            if self.events.send(event).is_err() {
                debug!("Session event receiver closed");
            }
            return;
        };
        let context = SessionContext::new(
            Arc::clone(phase),
            session,
            self.target.clone(),
            self.events.clone(),
        );
        let handle = tokio::spawn(async move {
            let result = runtime.run_session(&context).await;
            context.finish(result);
        });
        self.tasks
            .entry(phase.name.clone())
            .or_default()
            .insert(session, handle.abort_handle());
    }

    fn cancel(&mut self, phase: &str, session: SessionId) {
        if let Some(handle) = self
            .tasks
            .get_mut(phase)
            .and_then(|sessions| sessions.remove(&session))
        {
            handle.abort();
        }
    }

    fn completed(&mut self, phase: &str, session: SessionId) {
        if let Some(sessions) = self.tasks.get_mut(phase) {
            sessions.remove(&session);
        }
    }

    fn release(&mut self, phase: &Phase) {
        if let Some(sessions) = self.tasks.remove(&phase.name) {
            for handle in sessions.into_values() {
                handle.abort();
            }
        }
        self.runtimes.remove(&phase.name);
        if let Some(key) = &phase.shared_resources
            && self.shared.release(key, &phase.name)
        {
            debug!("Released shared resources '{}'", key);
        }
    }
}

impl Drop for TaskLauncher {
    fn drop(&mut self) {
        for sessions in self.tasks.values() {
            for handle in sessions.values() {
                handle.abort();
            }
        }
    }
}
