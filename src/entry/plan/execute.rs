use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use crate::config::load_benchmarks;
use crate::distributed::{RunOutcome, RunReport, run_agent, run_controller};
use crate::error::{AppError, AppResult, DistributedError};
use crate::session::{HttpRuntimeFactory, RuntimeFactory};
use crate::shutdown::{setup_signal_shutdown_handler, shutdown_channel};

use super::types::{AgentPlan, ControllerPlan, RunPlan};

pub(crate) async fn execute_plan(plan: RunPlan) -> AppResult<()> {
    match plan {
        RunPlan::Controller(controller) => execute_controller(controller).await,
        RunPlan::Agent(agent) => execute_agent(agent).await,
        RunPlan::Validate(paths) => validate(&paths),
    }
}

async fn execute_controller(plan: ControllerPlan) -> AppResult<()> {
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let signal_handle = setup_signal_shutdown_handler(&shutdown_tx);

    let result = run_controller(plan.options, plan.benchmarks, shutdown_rx).await;
    drop(shutdown_tx.send(()));
    signal_handle.abort();

    match result? {
        Some(report) => finish_report(&report),
        None => {
            info!("Controller stopped");
            Ok(())
        }
    }
}

fn finish_report(report: &RunReport) -> AppResult<()> {
    for violation in &report.sla_violations {
        error!(
            "SLA violated in {}/{}: {} (observed {})",
            violation.phase, violation.sequence, violation.rule, violation.observed
        );
    }
    match &report.outcome {
        RunOutcome::Completed => {
            info!(
                "Run {} of '{}' completed in {}ms",
                report.run_id,
                report.benchmark,
                report.duration_ms.unwrap_or(0)
            );
            Ok(())
        }
        RunOutcome::Killed { reason } => Err(AppError::distributed(DistributedError::RunKilled {
            run_id: report.run_id.clone(),
            reason: reason.clone(),
        })),
    }
}

async fn execute_agent(plan: AgentPlan) -> AppResult<()> {
    let (shutdown_tx, mut shutdown_rx) = shutdown_channel();
    let signal_handle = setup_signal_shutdown_handler(&shutdown_tx);
    let factory: Arc<dyn RuntimeFactory> = Arc::new(HttpRuntimeFactory::new(plan.request_timeout));

    let result = tokio::select! {
        result = run_agent(plan.options, factory) => result,
        _ = shutdown_rx.recv() => {
            info!("Agent stopped");
            Ok(())
        }
    };
    signal_handle.abort();
    result
}

fn validate(paths: &[PathBuf]) -> AppResult<()> {
    let benchmarks = load_benchmarks(None, paths)?;
    for benchmark in &benchmarks {
        println!(
            "{}: {} phases, {} SLAs, statistics every {}ms",
            benchmark.name,
            benchmark.phases.len(),
            benchmark.slas.len(),
            benchmark.statistics_period.as_millis()
        );
        for phase in &benchmark.phases {
            println!("  {} ({:?})", phase.name, phase.load);
        }
    }
    Ok(())
}
