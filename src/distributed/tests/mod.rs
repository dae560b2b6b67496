use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppResult, SessionError};
use crate::metrics::{RequestOutcome, RequestRecord};
use crate::model::{Benchmark, DEFAULT_PERCENTILES, LoadShape, Phase, Scenario, Sequence};
use crate::session::{RuntimeFactory, SessionContext, SessionRuntime};


fn run_async_test<F>(future: F) -> Result<(), String>
where
    F: std::future::Future<Output = Result<(), String>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("Failed to build runtime: {}", err))?;
    runtime.block_on(future)
}

/// Answers every request instantly with a 200.
struct ScriptedRuntime {
    sessions: Arc<AtomicUsize>,
}

#[async_trait]
impl SessionRuntime for ScriptedRuntime {
    async fn run_session(&self, context: &SessionContext) -> Result<(), SessionError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        for sequence in &context.phase().scenario.sequences {
            context.record(
                &sequence.name,
                RequestRecord {
                    outcome: RequestOutcome::Response { status: 200 },
                    latency: Duration::from_millis(2),
                },
            );
        }
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedFactory {
    sessions: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

impl RuntimeFactory for ScriptedFactory {
    fn create(&self, _benchmark: &Benchmark, _phase: &Phase) -> AppResult<Arc<dyn SessionRuntime>> {
        Ok(Arc::new(ScriptedRuntime {
            sessions: Arc::clone(&self.sessions),
        }))
    }
}

fn loopback_benchmark() -> Benchmark {
    let mut warmup = Phase::noop("warmup");
    warmup.load = LoadShape::AtOnce { users: 4 };
    warmup.duration = Duration::from_millis(100);
    warmup.scenario = Scenario {
        sequences: vec![Sequence {
            name: "main".to_owned(),
            steps: Vec::new(),
        }],
    };
    let mut done = Phase::noop("done");
    done.start_after = BTreeSet::from(["warmup".to_owned()]);
    Benchmark {
        name: "loopback".to_owned(),
        target: None,
        agents: None,
        statistics_period: Duration::from_millis(50),
        percentiles: DEFAULT_PERCENTILES.to_vec(),
        phases: vec![warmup, done],
        slas: Vec::new(),
    }
}
