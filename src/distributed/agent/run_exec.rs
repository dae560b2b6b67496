use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::SimulationRunner;
use crate::error::{AppResult, DistributedError};
use crate::session::{RuntimeFactory, SessionEvent, TaskLauncher};

use super::wire::{send_outputs, send_wire};
use crate::distributed::protocol::{
    ControlMessage, InitAckMessage, InitFailedMessage, InitMessage, WireMessage,
};

const MIN_TICK: Duration = Duration::from_millis(1);

/// What the agent needs to serve the controller's run requests.
pub(super) struct RunContext<'ctx> {
    pub(super) agent_id: &'ctx str,
    pub(super) out_tx: &'ctx mpsc::UnboundedSender<WireMessage>,
    pub(super) factory: &'ctx dyn RuntimeFactory,
    pub(super) scheduling_tick: Duration,
    pub(super) statistics_period: Option<Duration>,
}

pub(super) enum RunSignal {
    Session(SessionEvent),
    Schedule,
    Statistics,
}

/// One initialized run on this agent.
pub(super) struct ActiveRun {
    run_id: String,
    runner: SimulationRunner<TaskLauncher>,
    session_rx: mpsc::UnboundedReceiver<SessionEvent>,
    scheduling: Interval,
    statistics: Interval,
}

impl ActiveRun {
    fn start(init: InitMessage, ctx: &RunContext<'_>) -> AppResult<Self> {
        let InitMessage {
            run_id,
            agent_index,
            agent_count,
            benchmark,
        } = init;
        let share = benchmark.share(agent_index, agent_count);
        let (session_tx, session_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let launcher = TaskLauncher::new(&share, ctx.factory, session_tx)?;
        let statistics_period = ctx
            .statistics_period
            .unwrap_or(share.statistics_period)
            .max(MIN_TICK);
        Ok(Self {
            run_id,
            runner: SimulationRunner::new(share, launcher),
            session_rx,
            scheduling: ticker(ctx.scheduling_tick.max(MIN_TICK)),
            statistics: ticker(statistics_period),
        })
    }

    fn is_idle(&self) -> bool {
        self.runner.is_idle()
    }

    async fn next_signal(&mut self) -> RunSignal {
        tokio::select! {
            Some(event) = self.session_rx.recv() => RunSignal::Session(event),
            _ = self.scheduling.tick() => RunSignal::Schedule,
            _ = self.statistics.tick() => RunSignal::Statistics,
        }
    }

    pub(super) fn handle_signal(&mut self, signal: RunSignal, ctx: &RunContext<'_>) -> AppResult<()> {
        let outputs = match signal {
            RunSignal::Session(event) => self.runner.handle_session_event(event)?,
            RunSignal::Schedule => self.runner.tick(Instant::now()),
            RunSignal::Statistics => self.runner.collect_statistics(),
        };
        send_outputs(ctx.out_tx, &self.run_id, ctx.agent_id, outputs)
    }

    pub(super) fn handle_control(
        &mut self,
        control: &ControlMessage,
        ctx: &RunContext<'_>,
    ) -> AppResult<()> {
        if control.run_id != self.run_id {
            warn!(
                "Ignoring {} for run {} while serving run {}",
                control.command, control.run_id, self.run_id
            );
            return Ok(());
        }
        debug!("{} phase '{}'", control.command, control.phase);
        let outputs = self
            .runner
            .handle_command(control.command, &control.phase, Instant::now());
        send_outputs(ctx.out_tx, &self.run_id, ctx.agent_id, outputs)
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Accept an initialization unless a run is still alive here.
pub(super) fn handle_init(
    active: &mut Option<ActiveRun>,
    init: InitMessage,
    ctx: &RunContext<'_>,
) -> AppResult<()> {
    let run_id = init.run_id.clone();
    let busy = active
        .as_ref()
        .is_some_and(|run| run.run_id == run_id || !run.is_idle());
    if busy {
        warn!("Rejecting init for run {}: agent already initialized", run_id);
        return send_wire(
            ctx.out_tx,
            WireMessage::InitFailed(InitFailedMessage {
                run_id,
                agent_id: ctx.agent_id.to_owned(),
                message: DistributedError::AgentAlreadyInitialized.to_string(),
            }),
        );
    }

    match ActiveRun::start(init, ctx) {
        Ok(run) => {
            info!(
                "Initialized run {} for benchmark '{}'",
                run_id,
                run.runner.benchmark().name
            );
            *active = Some(run);
            send_wire(
                ctx.out_tx,
                WireMessage::InitAck(InitAckMessage {
                    run_id,
                    agent_id: ctx.agent_id.to_owned(),
                }),
            )
        }
        Err(err) => {
            warn!("Init for run {} failed: {}", run_id, err);
            send_wire(
                ctx.out_tx,
                WireMessage::InitFailed(InitFailedMessage {
                    run_id,
                    agent_id: ctx.agent_id.to_owned(),
                    message: err.to_string(),
                }),
            )
        }
    }
}

/// Wait for the next thing the active run needs to react to. Resolves
/// never while no live run is present.
pub(super) async fn next_run_signal(active: &mut Option<ActiveRun>) -> RunSignal {
    match active {
        Some(run) if !run.is_idle() => run.next_signal().await,
        Some(_) | None => std::future::pending().await,
    }
}
