use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult, DistributedError};
use crate::shutdown::ShutdownReceiver;

use super::AutoStart;
use super::control::ControlCommand;
use super::coordinator::RunCoordinator;
use super::events::ControllerEvent;
use super::run::RunReport;
use crate::distributed::utils::current_time_ms;

pub(super) struct LoopChannels {
    pub(super) events: mpsc::UnboundedReceiver<ControllerEvent>,
    pub(super) control: mpsc::UnboundedReceiver<ControlCommand>,
    pub(super) shutdown: ShutdownReceiver,
}

struct Persisted {
    report: RunReport,
    result: AppResult<()>,
}

/// Drive the coordinator: agent events, admin commands, scheduling ticks,
/// liveness checks and run persistence all funnel through here, one at a
/// time. With `autostart` the loop returns the report of that run once it
/// is persisted; otherwise it runs until shutdown.
pub(super) async fn run_event_loop(
    mut coordinator: RunCoordinator,
    channels: LoopChannels,
    liveness_interval: Duration,
    autostart: Option<AutoStart>,
) -> AppResult<Option<RunReport>> {
    let LoopChannels {
        mut events,
        mut control,
        mut shutdown,
    } = channels;
    let (persist_tx, mut persist_rx) = mpsc::unbounded_channel::<Persisted>();
    let mut liveness = tokio::time::interval(liveness_interval);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut next_tick: Option<Instant> = None;
    let mut control_open = true;
    let mut shutdown_open = true;
    let mut autostarted: Option<String> = None;

    loop {
        let tick_at = next_tick;
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    return Err(AppError::distributed(DistributedError::AgentEventChannelClosed));
                };
                if coordinator.handle_event(event, current_time_ms()) {
                    next_tick = Some(Instant::now());
                }
                if let Some(auto) = autostart.as_ref()
                    && autostarted.is_none()
                    && coordinator.available_agents() >= auto.min_agents
                {
                    let run_id = coordinator
                        .start_benchmark(&auto.benchmark, current_time_ms())
                        .map_err(AppError::distributed)?;
                    info!("Started run {} of '{}'", run_id, auto.benchmark);
                    autostarted = Some(run_id);
                    next_tick = Some(Instant::now());
                }
            }
            command = control.recv(), if control_open => {
                let Some(ControlCommand { request, respond_to }) = command else {
                    control_open = false;
                    continue;
                };
                debug!("Control request {:?}", request);
                let (reply, changed) = coordinator.handle_control(request, current_time_ms());
                if changed {
                    next_tick = Some(Instant::now());
                }
                if respond_to.send(reply).is_err() {
                    debug!("Control client went away before the reply");
                }
                for write in coordinator.take_definition_writes() {
                    tokio::spawn(async move {
                        let path = write.path.clone();
                        let result = tokio::task::spawn_blocking(move || write.persist())
                            .await
                            .map_err(AppError::from)
                            .and_then(|result| result);
                        if let Err(err) = result {
                            error!("Failed to store benchmark {}: {}", path.display(), err);
                        }
                    });
                }
            }
            () = wait_until(tick_at) => {
                let outcome = coordinator.tick(current_time_ms());
                next_tick = outcome
                    .next_delay
                    .and_then(|delay| Instant::now().checked_add(delay));
                if let Some(job) = outcome.finalized {
                    let persist_tx = persist_tx.clone();
                    tokio::spawn(async move {
                        let report = job.report.clone();
                        let result = tokio::task::spawn_blocking(move || job.persist())
                            .await
                            .map_err(AppError::from)
                            .and_then(|result| result);
                        drop(persist_tx.send(Persisted { report, result }));
                    });
                }
            }
            _ = liveness.tick() => {
                if coordinator.check_liveness(current_time_ms()) {
                    next_tick = Some(Instant::now());
                }
            }
            persisted = persist_rx.recv() => {
                let Some(Persisted { report, result }) = persisted else {
                    continue;
                };
                if let Err(err) = result {
                    error!("Failed to persist run {}: {}", report.run_id, err);
                }
                coordinator.mark_persisted(&report.run_id);
                if autostarted.as_deref() == Some(report.run_id.as_str()) {
                    return Ok(Some(report));
                }
            }
            signal = shutdown.recv(), if shutdown_open => {
                if matches!(signal, Err(broadcast::error::RecvError::Closed)) {
                    shutdown_open = false;
                    continue;
                }
                if autostarted.is_some() {
                    warn!("Controller stopped before the run completed");
                    return Err(AppError::distributed(DistributedError::ControllerStopped));
                }
                info!("Controller shutting down");
                return Ok(None);
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
