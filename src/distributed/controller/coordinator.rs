use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::{DefinitionFormat, parse_benchmark_definition};
use crate::error::DistributedError;
use crate::model::{Benchmark, ControllerPhaseStatus, PhaseCommand, PhaseStatus};

use super::aggregation::aggregate_status;
use super::control::{ControlError, ControlReply, ControlRequest};
use super::events::{AgentStatistics, ControllerEvent};
use super::finalize::{DefinitionWrite, FinalizeJob};
use super::registry::{AgentRegistry, AgentStatus};
use super::run::{Run, RunState};
use crate::distributed::protocol::{ControlMessage, InitMessage, WireMessage};
use crate::distributed::utils::{duration_to_ms, format_run_id};

/// Upper bound on the wait between two scheduling ticks.
const MAX_TICK_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub(super) struct CoordinatorSettings {
    pub(super) run_dir: PathBuf,
    /// Where uploaded definitions are stored; kept in memory only when unset.
    pub(super) benchmark_dir: Option<PathBuf>,
    pub(super) heartbeat_timeout: Duration,
    pub(super) init_timeout: Duration,
    pub(super) abort_on_agent_failure: bool,
}

#[derive(Debug, Default)]
pub(super) struct TickOutcome {
    /// When to tick again; `None` while no run is in progress.
    pub(super) next_delay: Option<Duration>,
    pub(super) finalized: Option<FinalizeJob>,
}

/// Controller state: benchmarks, agents and runs. Every method is
/// synchronous and takes the current wall-clock time in milliseconds; the
/// event loop owns the coordinator and decides when to call it. Methods
/// returning `bool` report whether run state moved, in which case the
/// caller ticks right away.
#[derive(Debug)]
pub(super) struct RunCoordinator {
    settings: CoordinatorSettings,
    benchmarks: BTreeMap<String, Benchmark>,
    agents: AgentRegistry,
    runs: BTreeMap<String, Run>,
    current: Option<String>,
    /// Run waiting for the killed current run to be finalized.
    queued: Option<String>,
    run_counter: u32,
    definition_writes: Vec<DefinitionWrite>,
}

impl RunCoordinator {
    pub(super) fn new(settings: CoordinatorSettings, benchmarks: Vec<Benchmark>) -> Self {
        Self {
            settings,
            benchmarks: benchmarks
                .into_iter()
                .map(|benchmark| (benchmark.name.clone(), benchmark))
                .collect(),
            agents: AgentRegistry::default(),
            runs: BTreeMap::new(),
            current: None,
            queued: None,
            run_counter: 0,
            definition_writes: Vec::new(),
        }
    }

    pub(super) fn agent_count(&self) -> usize {
        self.agents.connected_count()
    }

    pub(super) fn available_agents(&self) -> usize {
        self.agents.available().len()
    }

    pub(super) fn run(&self, run_id: &str) -> Option<&Run> {
        self.runs.get(run_id)
    }

    pub(super) fn runs(&self) -> impl Iterator<Item = &Run> {
        self.runs.values()
    }

    fn active_run(&self) -> Option<&Run> {
        let run_id = self.current.as_ref()?;
        self.runs.get(run_id).filter(|run| run.is_active())
    }

    fn is_participant(&self, run_id: &str, agent_id: &str) -> bool {
        self.active_run()
            .is_some_and(|run| run.id == run_id && run.participants.contains(agent_id))
    }

    pub(super) fn handle_event(&mut self, event: ControllerEvent, now_ms: u64) -> bool {
        if let ControllerEvent::Connected {
            agent,
            hello,
            sender,
            respond_to,
        } = event
        {
            let result = self.agents.register(&agent, &hello, sender, now_ms);
            if respond_to.send(result).is_err() {
                debug!("Connection of agent {} went away during registration", agent.agent_id);
            }
            return false;
        }

        let agent = event.agent().clone();
        let Some(info) = self.agents.current_mut(&agent) else {
            return false;
        };
        info.last_seen_ms = now_ms;
        let agent_id = agent.agent_id;

        match event {
            ControllerEvent::Connected { .. } | ControllerEvent::Heartbeat { .. } => false,
            ControllerEvent::InitAck { run_id, .. } => {
                self.on_init_reply(&agent_id, &run_id, None, now_ms)
            }
            ControllerEvent::InitFailed {
                run_id, message, ..
            } => self.on_init_reply(&agent_id, &run_id, Some(message), now_ms),
            ControllerEvent::Status {
                run_id,
                phase,
                status,
                ..
            } => self.on_status(&agent_id, &run_id, &phase, status, now_ms),
            ControllerEvent::Stats { statistics, .. } => {
                self.on_stats(&agent_id, *statistics);
                false
            }
            ControllerEvent::Error { message, .. } => {
                warn!("Agent {} reported: {}", agent_id, message);
                false
            }
            ControllerEvent::Disconnected { message, .. } => {
                info!("Agent {} disconnected: {}", agent_id, message);
                self.on_agent_failed(&agent_id, &format!("disconnected: {message}"), now_ms)
            }
        }
    }

    /// Create a run of `name`. Without a run in progress it initializes on
    /// the available agents right away. Otherwise the run in progress is
    /// killed and the new run stays queued until that one is finalized; a
    /// run still queued from an earlier start is dropped.
    pub(super) fn start_benchmark(
        &mut self,
        name: &str,
        now_ms: u64,
    ) -> Result<String, DistributedError> {
        let benchmark = self
            .benchmarks
            .get(name)
            .cloned()
            .ok_or_else(|| DistributedError::BenchmarkNotFound {
                name: name.to_owned(),
            })?;
        let active = self.active_run().map(|run| run.id.clone());
        let participants = match active {
            Some(_) if self.agents.connected_count() == 0 => {
                return Err(DistributedError::NoAgents {
                    benchmark: benchmark.name,
                });
            }
            Some(_) => BTreeSet::new(),
            None => self.select_participants(&benchmark)?,
        };

        let run_id = format_run_id(self.run_counter);
        self.run_counter = self.run_counter.saturating_add(1);
        let mut run = Run::new(run_id.clone(), benchmark, participants, now_ms);
        match active {
            Some(active_id) => {
                let reason = format!("replaced by run {run_id}");
                self.drop_queued(&reason);
                self.kill(&active_id, &reason)?;
                info!("Run {} queued until run {} is finalized", run_id, active_id);
                run.state = RunState::Queued;
                self.runs.insert(run_id.clone(), run);
                self.queued = Some(run_id.clone());
            }
            None => {
                self.runs.insert(run_id.clone(), run);
                self.launch(&run_id, now_ms);
            }
        }
        Ok(run_id)
    }

    /// Available agents, cut to the benchmark's `agents` count.
    fn select_participants(&self, benchmark: &Benchmark) -> Result<BTreeSet<String>, DistributedError> {
        let mut available = self.agents.available();
        if available.is_empty() {
            return Err(DistributedError::NoAgents {
                benchmark: benchmark.name.clone(),
            });
        }
        if let Some(required) = benchmark.agents {
            if available.len() < required {
                return Err(DistributedError::NotEnoughAgents {
                    benchmark: benchmark.name.clone(),
                    required,
                    available: available.len(),
                });
            }
            available.truncate(required);
        }
        Ok(available.into_iter().collect())
    }

    /// Make `run_id` the current run and send each participant its
    /// initialization.
    fn launch(&mut self, run_id: &str, now_ms: u64) {
        let Some(run) = self.runs.get_mut(run_id) else {
            return;
        };
        run.state = RunState::Initializing;
        let agent_count = run.participants.len();
        let init_deadline_ms = now_ms.saturating_add(duration_to_ms(self.settings.init_timeout));
        let mut unreachable = Vec::new();
        for (agent_index, agent_id) in run.participants.iter().enumerate() {
            let Some(agent) = self.agents.get_mut(agent_id) else {
                continue;
            };
            agent.status = AgentStatus::Initializing;
            agent.init_deadline_ms = Some(init_deadline_ms);
            agent.failure = None;
            agent.phases.clear();
            let sent = agent.send(WireMessage::Init(Box::new(InitMessage {
                run_id: run_id.to_owned(),
                agent_index,
                agent_count,
                benchmark: run.benchmark.clone(),
            })));
            if !sent {
                unreachable.push(agent_id.clone());
            }
        }
        info!(
            "Run {} of benchmark '{}' initializing on {} agents",
            run_id, run.benchmark.name, agent_count
        );
        self.current = Some(run_id.to_owned());
        for agent_id in unreachable {
            self.on_agent_failed(&agent_id, "connection closed before init", now_ms);
        }
    }

    fn launch_queued(&mut self, now_ms: u64) {
        let Some(run_id) = self.queued.take() else {
            return;
        };
        let Some(run) = self.runs.get(&run_id) else {
            return;
        };
        match self.select_participants(&run.benchmark) {
            Ok(participants) => {
                if let Some(run) = self.runs.get_mut(&run_id) {
                    run.participants = participants;
                }
                self.launch(&run_id, now_ms);
            }
            Err(err) => {
                warn!("Queued run {} cannot start: {}", run_id, err);
                if let Some(run) = self.runs.get_mut(&run_id) {
                    run.kill_reason = Some(err.to_string());
                    run.state = RunState::Completed;
                }
            }
        }
    }

    fn drop_queued(&mut self, reason: &str) {
        let Some(run) = self
            .queued
            .take()
            .and_then(|run_id| self.runs.get_mut(&run_id))
        else {
            return;
        };
        info!("Queued run {} dropped: {}", run.id, reason);
        run.kill_reason = Some(reason.to_owned());
        run.state = RunState::Completed;
    }

    fn on_init_reply(
        &mut self,
        agent_id: &str,
        run_id: &str,
        failure: Option<String>,
        now_ms: u64,
    ) -> bool {
        if !self.is_participant(run_id, agent_id) {
            debug!("Ignoring init reply of agent {} for run {}", agent_id, run_id);
            return false;
        }
        let Some(agent) = self.agents.get_mut(agent_id) else {
            return false;
        };
        if agent.status != AgentStatus::Initializing {
            return false;
        }
        if let Some(message) = failure {
            return self.on_agent_failed(
                agent_id,
                &format!("initialization failed: {message}"),
                now_ms,
            );
        }
        agent.status = AgentStatus::Initialized;
        agent.init_deadline_ms = None;
        debug!("Agent {} initialized for run {}", agent_id, run_id);
        self.maybe_start(now_ms)
    }

    /// Start the run once every remaining participant is initialized.
    fn maybe_start(&mut self, now_ms: u64) -> bool {
        let Some(run_id) = self.current.as_ref() else {
            return false;
        };
        let Some(run) = self.runs.get_mut(run_id) else {
            return false;
        };
        if run.state != RunState::Initializing || run.kill_reason.is_some() {
            return false;
        }
        let ready = run.participants.iter().all(|agent_id| {
            self.agents
                .get(agent_id)
                .is_some_and(|agent| agent.status == AgentStatus::Initialized)
        });
        if !ready {
            return false;
        }
        run.state = RunState::Running;
        run.start_time_ms = Some(now_ms);
        info!(
            "Run {} started with {} agents",
            run.id,
            run.participants.len()
        );
        true
    }

    fn on_status(
        &mut self,
        agent_id: &str,
        run_id: &str,
        phase: &str,
        status: PhaseStatus,
        now_ms: u64,
    ) -> bool {
        if !self.is_participant(run_id, agent_id) {
            debug!(
                "Ignoring status {} of phase '{}' from agent {} for run {}",
                status, phase, agent_id, run_id
            );
            return false;
        }
        if self
            .active_run()
            .is_none_or(|run| !run.phases.contains_key(phase))
        {
            warn!("Agent {} reported unknown phase '{}'", agent_id, phase);
            return false;
        }
        let Some(agent) = self.agents.get_mut(agent_id) else {
            return false;
        };
        if !agent.update_phase(phase, status) {
            return false;
        }
        self.reaggregate(phase)
    }

    fn on_stats(&mut self, agent_id: &str, statistics: AgentStatistics) {
        if !self.is_participant(&statistics.run_id, agent_id) {
            debug!(
                "Ignoring statistics from agent {} for run {}",
                agent_id, statistics.run_id
            );
            return;
        }
        let Some(run) = self.current.as_ref().and_then(|id| self.runs.get_mut(id)) else {
            return;
        };
        let accepted = run.statistics.record(
            agent_id,
            &statistics.phase,
            &statistics.sequence,
            statistics.report_seq,
            statistics.snapshot,
        );
        if !accepted {
            debug!(
                "Dropped stale statistics #{} of {}/{} from agent {}",
                statistics.report_seq, statistics.phase, statistics.sequence, agent_id
            );
        }
    }

    /// Recompute the controller status of `phase` from the participants'
    /// reports. A phase reaching TERMINATED gets its SLAs validated; a
    /// failed validation kills the run.
    fn reaggregate(&mut self, phase: &str) -> bool {
        let Some(run) = self.current.as_ref().and_then(|id| self.runs.get_mut(id)) else {
            return false;
        };
        let agents = &self.agents;
        let participants = run
            .participants
            .iter()
            .filter_map(|agent_id| agents.get(agent_id));
        let Some(aggregate) = aggregate_status(participants, phase) else {
            return false;
        };
        let Some(controller_phase) = run.phases.get_mut(phase) else {
            return false;
        };
        if !controller_phase.advance(ControllerPhaseStatus::from_agent(aggregate)) {
            return false;
        }
        debug!(
            "Run {} phase '{}' is {}",
            run.id, phase, controller_phase.status
        );
        if !controller_phase.status.is_terminated() {
            return true;
        }
        let passed = run.statistics.validate_slas(phase);
        controller_phase.sla_passed = Some(passed);
        if !passed {
            let run_id = run.id.clone();
            let reason = format!("SLA violated in phase '{phase}'");
            if let Err(err) = self.kill(&run_id, &reason) {
                warn!("Failed to kill run {}: {}", run_id, err);
            }
        }
        true
    }

    /// Mark an agent FAILED and take it out of the active run. Its
    /// statistics are discarded and the remaining agents decide the phase
    /// statuses from now on.
    fn on_agent_failed(&mut self, agent_id: &str, reason: &str, now_ms: u64) -> bool {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            if agent.status != AgentStatus::Failed {
                agent.fail(reason);
            }
            agent.disconnect();
        }
        let Some(run) = self.current.as_ref().and_then(|id| self.runs.get_mut(id)) else {
            return false;
        };
        if !run.is_active() || !run.participants.remove(agent_id) {
            return false;
        }
        let discarded = run.statistics.discard_agent(agent_id);
        debug!(
            "Discarded {} statistics entries of agent {}",
            discarded, agent_id
        );
        run.dropped.insert(agent_id.to_owned(), reason.to_owned());
        let run_id = run.id.clone();
        let no_agents_left = run.participants.is_empty();
        let phases: Vec<String> = run.phases.keys().cloned().collect();

        if no_agents_left || self.settings.abort_on_agent_failure {
            let reason = if no_agents_left {
                "no live agents".to_owned()
            } else {
                format!("agent {agent_id} failed: {reason}")
            };
            if let Err(err) = self.kill(&run_id, &reason) {
                warn!("Failed to kill run {}: {}", run_id, err);
            }
        }
        if no_agents_left {
            self.force_terminate(&run_id);
            return true;
        }
        for phase in &phases {
            self.reaggregate(phase);
        }
        self.maybe_start(now_ms);
        true
    }

    /// Nobody is left to report; close every phase on the controller side.
    fn force_terminate(&mut self, run_id: &str) {
        let Some(run) = self.runs.get_mut(run_id) else {
            return;
        };
        for phase in run.phases.values_mut() {
            phase.advance(ControllerPhaseStatus::Terminated);
        }
    }

    /// Kill a run: started phases are terminated on the agents, phases that
    /// never started are closed on the controller only. A queued run is
    /// dropped. Returns whether the run was still in progress.
    pub(super) fn kill(&mut self, run_id: &str, reason: &str) -> Result<bool, DistributedError> {
        if self.queued.as_deref() == Some(run_id) {
            self.drop_queued(reason);
            return Ok(true);
        }
        let run = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| DistributedError::RunNotFound {
                run_id: run_id.to_owned(),
            })?;
        if !run.is_active() {
            return Ok(false);
        }
        if run.kill_reason.is_none() {
            warn!("Killing run {}: {}", run_id, reason);
            run.kill_reason = Some(reason.to_owned());
        }
        let mut commands = Vec::new();
        for phase in run.phases.values_mut() {
            if !phase.status.is_started() {
                phase.advance(ControllerPhaseStatus::Terminated);
            } else if phase.advance(ControllerPhaseStatus::Terminating) {
                commands.push((PhaseCommand::Terminate, phase.definition.name.clone()));
            }
        }
        self.broadcast(run_id, commands);
        Ok(true)
    }

    pub(super) fn check_liveness(&mut self, now_ms: u64) -> bool {
        let heartbeat_timeout_ms = duration_to_ms(self.settings.heartbeat_timeout);
        let failures: Vec<(String, String)> = self
            .agents
            .iter()
            .filter(|agent| agent.connected && agent.status != AgentStatus::Failed)
            .filter_map(|agent| {
                let silent_ms = now_ms.saturating_sub(agent.last_seen_ms);
                if silent_ms > heartbeat_timeout_ms {
                    return Some((
                        agent.agent_id.clone(),
                        format!("no heartbeat for {silent_ms}ms"),
                    ));
                }
                match agent.init_deadline_ms {
                    Some(deadline)
                        if agent.status == AgentStatus::Initializing && now_ms > deadline =>
                    {
                        Some((agent.agent_id.clone(), "initialization timed out".to_owned()))
                    }
                    Some(_) | None => None,
                }
            })
            .collect();
        let mut changed = false;
        for (agent_id, reason) in failures {
            if self.on_agent_failed(&agent_id, &reason, now_ms) {
                changed = true;
            }
        }
        changed
    }

    /// Advance the active run: finish phases whose duration elapsed,
    /// terminate phases past their max duration, try-terminate finished
    /// phases whose strict terminate dependencies are done, and start every
    /// phase whose start conditions hold. Completes the run once all phases
    /// are terminated.
    pub(super) fn tick(&mut self, now_ms: u64) -> TickOutcome {
        let Some(run_id) = self.current.clone() else {
            return TickOutcome::default();
        };
        let Some(run) = self.runs.get_mut(&run_id) else {
            return TickOutcome::default();
        };
        if !run.is_active() {
            return TickOutcome::default();
        }
        if run.all_terminated() {
            let finalized = self.finalize(&run_id, now_ms);
            self.launch_queued(now_ms);
            return TickOutcome {
                next_delay: None,
                finalized,
            };
        }
        let Some(start_ms) = run.start_time_ms.filter(|_| run.state == RunState::Running) else {
            return TickOutcome::default();
        };

        let statuses: BTreeMap<String, ControllerPhaseStatus> = run
            .phases
            .iter()
            .map(|(name, phase)| (name.clone(), phase.status))
            .collect();
        let finished = |name: &String| statuses.get(name).is_some_and(|status| status.is_finished());
        let terminated =
            |name: &String| statuses.get(name).is_some_and(|status| status.is_terminated());

        let mut commands = Vec::new();
        let mut next_deadline: Option<u64> = None;
        let mut consider = |deadline: u64| {
            if deadline > now_ms {
                next_deadline = Some(next_deadline.map_or(deadline, |next| next.min(deadline)));
            }
        };

        for phase in run.phases.values_mut() {
            let name = phase.definition.name.clone();
            let Some(phase_start) = phase.absolute_start_ms else {
                continue;
            };
            if let Some(max_duration) = phase.definition.max_duration {
                let deadline = phase_start.saturating_add(duration_to_ms(max_duration));
                if phase.status < ControllerPhaseStatus::Terminating {
                    if now_ms >= deadline {
                        phase.advance(ControllerPhaseStatus::Terminating);
                        commands.push((PhaseCommand::Terminate, name));
                        continue;
                    }
                    consider(deadline);
                }
            }
            let finish_at = phase_start.saturating_add(duration_to_ms(phase.definition.duration));
            if phase.status == ControllerPhaseStatus::Running {
                if now_ms >= finish_at {
                    phase.advance(ControllerPhaseStatus::Finishing);
                    commands.push((PhaseCommand::Finish, name));
                } else {
                    consider(finish_at);
                }
            } else if phase.status == ControllerPhaseStatus::Finished
                && !phase.try_terminate_sent
                && phase.definition.terminate_after_strict.iter().all(terminated)
            {
                phase.try_terminate_sent = true;
                commands.push((PhaseCommand::TryTerminate, name));
            }
        }

        if run.kill_reason.is_none() {
            for phase in run.phases.values_mut() {
                if phase.status != ControllerPhaseStatus::NotStarted {
                    continue;
                }
                let start_at = start_ms.saturating_add(
                    phase.definition.start_time.map_or(0, duration_to_ms),
                );
                let dependencies_met = phase.definition.start_after.iter().all(finished)
                    && phase.definition.start_after_strict.iter().all(terminated);
                if !dependencies_met {
                    continue;
                }
                if now_ms < start_at {
                    consider(start_at);
                    continue;
                }
                phase.advance(ControllerPhaseStatus::Starting);
                phase.absolute_start_ms = Some(now_ms);
                info!("Run {} starting phase '{}'", run_id, phase.definition.name);
                commands.push((PhaseCommand::Run, phase.definition.name.clone()));
            }
        }

        let delay_ms = next_deadline.map_or(MAX_TICK_DELAY_MS, |deadline| {
            deadline.saturating_sub(now_ms).min(MAX_TICK_DELAY_MS)
        });
        self.broadcast(&run_id, commands);
        TickOutcome {
            next_delay: Some(Duration::from_millis(delay_ms)),
            finalized: None,
        }
    }

    fn broadcast(&self, run_id: &str, commands: Vec<(PhaseCommand, String)>) {
        let Some(run) = self.runs.get(run_id) else {
            return;
        };
        for (command, phase) in commands {
            debug!("Run {}: {} phase '{}'", run_id, command, phase);
            let message = ControlMessage {
                run_id: run_id.to_owned(),
                command,
                phase,
            };
            for agent_id in &run.participants {
                let sent = self
                    .agents
                    .get(agent_id)
                    .is_some_and(|agent| agent.send(WireMessage::Control(message.clone())));
                if !sent {
                    debug!("Could not send {} to agent {}", message.command, agent_id);
                }
            }
        }
    }

    fn finalize(&mut self, run_id: &str, now_ms: u64) -> Option<FinalizeJob> {
        let dir = self.settings.run_dir.join(run_id);
        let run = self.runs.get_mut(run_id)?;
        run.state = RunState::Finalizing;
        run.terminate_time_ms = Some(now_ms);
        let statistics = match run.statistics.export() {
            Ok(export) => Some(export),
            Err(err) => {
                warn!("Failed to export statistics of run {}: {}", run_id, err);
                None
            }
        };
        let report = run.report(&self.agents);
        let benchmark = run.benchmark.clone();
        let participants: Vec<String> = run.participants.iter().cloned().collect();
        match &run.kill_reason {
            Some(reason) => warn!("Run {} finished after kill: {}", run_id, reason),
            None => info!("Run {} completed", run_id),
        }
        for agent_id in participants {
            if let Some(agent) = self.agents.get_mut(&agent_id) {
                agent.reset();
            }
        }
        self.agents.prune_disconnected();
        Some(FinalizeJob {
            dir,
            benchmark,
            statistics,
            report,
        })
    }

    /// Register an uploaded definition. With a benchmark directory the
    /// definition is also queued for storage there.
    pub(super) fn create_benchmark(
        &mut self,
        definition: &str,
        format: DefinitionFormat,
    ) -> Result<String, ControlError> {
        let benchmark = parse_benchmark_definition(definition, format)
            .map_err(|err| ControlError::new(400, err.to_string()))?;
        let name = benchmark.name.clone();
        if !is_storable_name(&name) {
            return Err(DistributedError::InvalidBenchmarkName { name }.into());
        }
        if self.benchmarks.contains_key(&name) {
            return Err(DistributedError::BenchmarkExists { name }.into());
        }
        if let Some(dir) = self.settings.benchmark_dir.as_ref() {
            self.definition_writes.push(DefinitionWrite {
                path: dir.join(format!("{name}.{}", format.extension())),
                content: definition.to_owned(),
            });
        }
        info!("Benchmark '{}' added with {} phases", name, benchmark.phases.len());
        self.benchmarks.insert(name.clone(), benchmark);
        Ok(name)
    }

    pub(super) fn take_definition_writes(&mut self) -> Vec<DefinitionWrite> {
        std::mem::take(&mut self.definition_writes)
    }

    pub(super) fn mark_persisted(&mut self, run_id: &str) {
        if let Some(run) = self.runs.get_mut(run_id) {
            run.state = RunState::Completed;
        }
    }

    /// Serve one administrative request.
    pub(super) fn handle_control(
        &mut self,
        request: ControlRequest,
        now_ms: u64,
    ) -> (ControlReply, bool) {
        match request {
            ControlRequest::ListBenchmarks => {
                let names: Vec<&String> = self.benchmarks.keys().collect();
                (Ok(json!({ "benchmarks": names })), false)
            }
            ControlRequest::GetBenchmark { name } => {
                let reply = self
                    .benchmarks
                    .get(&name)
                    .ok_or_else(|| {
                        ControlError::from(DistributedError::BenchmarkNotFound { name })
                    })
                    .and_then(to_value);
                (reply, false)
            }
            ControlRequest::CreateBenchmark { definition, format } => {
                let reply = self
                    .create_benchmark(&definition, format)
                    .map(|name| json!({ "benchmark": name }));
                (reply, false)
            }
            ControlRequest::StartBenchmark { name } => match self.start_benchmark(&name, now_ms) {
                Ok(run_id) => {
                    let state = self.run(&run_id).map(|run| run.state);
                    (Ok(json!({ "run_id": run_id, "state": state })), true)
                }
                Err(err) => (Err(err.into()), false),
            },
            ControlRequest::ListAgents => {
                let agents: Vec<_> = self
                    .agents
                    .iter()
                    .map(|agent| {
                        json!({
                            "agent_id": agent.agent_id,
                            "hostname": agent.hostname,
                            "cpu_cores": agent.cpu_cores,
                            "status": agent.status,
                            "connected": agent.connected,
                        })
                    })
                    .collect();
                (
                    Ok(json!({ "count": self.agent_count(), "agents": agents })),
                    false,
                )
            }
            ControlRequest::ListRuns => {
                let runs: Vec<_> = self
                    .runs()
                    .map(|run| {
                        json!({
                            "run_id": run.id,
                            "benchmark": run.benchmark.name,
                            "state": run.state,
                        })
                    })
                    .collect();
                (Ok(json!({ "runs": runs })), false)
            }
            ControlRequest::GetRun { run_id } => {
                let reply = match self.run(&run_id) {
                    Some(run) => to_value(&run.report(&self.agents)).map(|report| {
                        json!({
                            "state": run.state,
                            "created_ms": run.created_ms,
                            "report": report,
                        })
                    }),
                    None => Err(DistributedError::RunNotFound { run_id }.into()),
                };
                (reply, false)
            }
            ControlRequest::KillRun { run_id } => {
                match self.kill(&run_id, "killed by request") {
                    Ok(killed) => (Ok(json!({ "run_id": run_id, "killed": killed })), killed),
                    Err(err) => (Err(err.into()), false),
                }
            }
        }
    }
}

/// Names double as file stems in the benchmark directory.
fn is_storable_name(name: &str) -> bool {
    !name.starts_with('.')
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

fn to_value<T: serde::Serialize>(value: &T) -> ControlReply {
    serde_json::to_value(value)
        .map_err(|err| ControlError::new(500, format!("Failed to encode response: {err}")))
}
