use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::control::{ControlError, ControlRequest, route};
use super::coordinator::{CoordinatorSettings, RunCoordinator};
use super::events::{AgentRef, AgentStatistics, ControllerEvent};
use super::http::{read_admin_request, write_reply};
use super::run::{RunOutcome, RunState};
use crate::config::DefinitionFormat;
use crate::distributed::protocol::{HelloMessage, WireMessage};
use crate::error::DistributedError;
use crate::metrics::{RequestOutcome, RequestRecord, StatisticsSnapshot};
use crate::model::{
    Benchmark, ControllerPhaseStatus, DEFAULT_PERCENTILES, Phase, PhaseCommand, PhaseStatus,
    Scenario, Sequence, Sla, SlaRule,
};

struct FakeAgent {
    agent: AgentRef,
    rx: mpsc::UnboundedReceiver<WireMessage>,
}

impl FakeAgent {
    fn drain(&mut self) -> Vec<WireMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn controls(&mut self) -> Vec<(PhaseCommand, String)> {
        self.drain()
            .into_iter()
            .filter_map(|message| match message {
                WireMessage::Control(control) => Some((control.command, control.phase)),
                WireMessage::Hello(_)
                | WireMessage::Registered(_)
                | WireMessage::Init(_)
                | WireMessage::InitAck(_)
                | WireMessage::InitFailed(_)
                | WireMessage::Status(_)
                | WireMessage::Stats(_)
                | WireMessage::Heartbeat(_)
                | WireMessage::Error(_) => None,
            })
            .collect()
    }
}

fn settings() -> CoordinatorSettings {
    CoordinatorSettings {
        run_dir: std::env::temp_dir().join("fleetload-controller-tests"),
        benchmark_dir: None,
        heartbeat_timeout: Duration::from_secs(5),
        init_timeout: Duration::from_secs(10),
        abort_on_agent_failure: false,
    }
}

fn phase(name: &str, duration_ms: u64) -> Phase {
    Phase {
        scenario: Scenario {
            sequences: vec![Sequence {
                name: "main".to_owned(),
                steps: Vec::new(),
            }],
        },
        duration: Duration::from_millis(duration_ms),
        ..Phase::noop(name)
    }
}

fn two_phases() -> Vec<Phase> {
    let first = phase("p1", 1000);
    let mut second = phase("p2", 1000);
    second.start_after = BTreeSet::from(["p1".to_owned()]);
    vec![first, second]
}

fn benchmark(phases: Vec<Phase>, slas: Vec<Sla>) -> Benchmark {
    Benchmark {
        name: "bench".to_owned(),
        target: None,
        agents: None,
        statistics_period: Duration::from_secs(1),
        percentiles: DEFAULT_PERCENTILES.to_vec(),
        phases,
        slas,
    }
}

fn connect(
    coordinator: &mut RunCoordinator,
    agent_id: &str,
    connection: u64,
) -> Result<Result<FakeAgent, DistributedError>, String> {
    let (sender, rx) = mpsc::unbounded_channel();
    let (respond_to, mut reply) = oneshot::channel();
    let agent = AgentRef {
        agent_id: agent_id.to_owned(),
        connection,
    };
    coordinator.handle_event(
        ControllerEvent::Connected {
            agent: agent.clone(),
            hello: HelloMessage {
                agent_id: agent_id.to_owned(),
                hostname: "localhost".to_owned(),
                cpu_cores: 1,
                auth_token: None,
            },
            sender,
            respond_to,
        },
        0,
    );
    match reply.try_recv() {
        Ok(Ok(())) => Ok(Ok(FakeAgent { agent, rx })),
        Ok(Err(err)) => Ok(Err(err)),
        Err(_) => Err("registration reply missing".to_owned()),
    }
}

fn connected(coordinator: &mut RunCoordinator, agent_id: &str) -> Result<FakeAgent, String> {
    connect(coordinator, agent_id, 0)?.map_err(|err| format!("registration failed: {err}"))
}

fn ack(coordinator: &mut RunCoordinator, agent: &FakeAgent, run_id: &str, now_ms: u64) -> bool {
    coordinator.handle_event(
        ControllerEvent::InitAck {
            agent: agent.agent.clone(),
            run_id: run_id.to_owned(),
        },
        now_ms,
    )
}

fn status(
    coordinator: &mut RunCoordinator,
    agent: &FakeAgent,
    run_id: &str,
    phase: &str,
    status: PhaseStatus,
) -> bool {
    coordinator.handle_event(
        ControllerEvent::Status {
            agent: agent.agent.clone(),
            run_id: run_id.to_owned(),
            phase: phase.to_owned(),
            status,
        },
        0,
    )
}

fn walk_to(
    coordinator: &mut RunCoordinator,
    agent: &FakeAgent,
    run_id: &str,
    phase: &str,
    target: PhaseStatus,
) {
    let mut next = Some(PhaseStatus::Running);
    while let Some(current) = next {
        status(coordinator, agent, run_id, phase, current);
        if current == target {
            break;
        }
        next = current.successor();
    }
}

fn phase_status(coordinator: &RunCoordinator, run_id: &str, phase: &str) -> Option<ControllerPhaseStatus> {
    coordinator.run(run_id).and_then(|run| run.status_of(phase))
}

fn started_run(
    phases: Vec<Phase>,
    slas: Vec<Sla>,
    agent_ids: &[&str],
) -> Result<(RunCoordinator, Vec<FakeAgent>, String), String> {
    let mut coordinator = RunCoordinator::new(settings(), vec![benchmark(phases, slas)]);
    let mut agents = Vec::new();
    for agent_id in agent_ids {
        agents.push(connected(&mut coordinator, agent_id)?);
    }
    let run_id = coordinator
        .start_benchmark("bench", 0)
        .map_err(|err| err.to_string())?;
    for agent in &mut agents {
        let inits = agent
            .drain()
            .into_iter()
            .filter(|message| matches!(message, WireMessage::Init(_)))
            .count();
        if inits != 1 {
            return Err(format!("agent {} got {} inits", agent.agent.agent_id, inits));
        }
    }
    for agent in &agents {
        ack(&mut coordinator, agent, &run_id, 0);
    }
    Ok((coordinator, agents, run_id))
}

#[test]
fn connected_agent_id_cannot_register_twice() -> Result<(), String> {
    let mut coordinator = RunCoordinator::new(settings(), Vec::new());
    let _first = connected(&mut coordinator, "a")?;
    match connect(&mut coordinator, "a", 1)? {
        Err(err) if err.to_string() == "Agent already present" => {}
        Err(err) => return Err(format!("unexpected error: {err}")),
        Ok(_) => return Err("duplicate registration accepted".to_owned()),
    }
    if coordinator.agent_count() != 1 {
        return Err(format!("expected 1 agent, got {}", coordinator.agent_count()));
    }
    Ok(())
}

fn init_runs(agent: &mut FakeAgent) -> Vec<String> {
    agent
        .drain()
        .into_iter()
        .filter_map(|message| match message {
            WireMessage::Init(init) => Some(init.run_id),
            WireMessage::Hello(_)
            | WireMessage::Registered(_)
            | WireMessage::InitAck(_)
            | WireMessage::InitFailed(_)
            | WireMessage::Control(_)
            | WireMessage::Status(_)
            | WireMessage::Stats(_)
            | WireMessage::Heartbeat(_)
            | WireMessage::Error(_) => None,
        })
        .collect()
}

fn run_state(coordinator: &RunCoordinator, run_id: &str) -> Option<RunState> {
    coordinator.run(run_id).map(|run| run.state)
}

#[test]
fn start_requires_agents_and_a_known_benchmark() -> Result<(), String> {
    let mut coordinator = RunCoordinator::new(settings(), vec![benchmark(two_phases(), Vec::new())]);
    match coordinator.start_benchmark("bench", 0) {
        Err(DistributedError::NoAgents { .. }) => {}
        other => return Err(format!("expected NoAgents, got {other:?}")),
    }
    match coordinator.start_benchmark("missing", 0) {
        Err(DistributedError::BenchmarkNotFound { .. }) => {}
        other => return Err(format!("expected BenchmarkNotFound, got {other:?}")),
    }
    let _agent = connected(&mut coordinator, "a")?;
    let run_id = coordinator
        .start_benchmark("bench", 0)
        .map_err(|err| err.to_string())?;
    if run_id != "0000" || run_state(&coordinator, &run_id) != Some(RunState::Initializing) {
        return Err(format!("unexpected first run {run_id}"));
    }
    Ok(())
}

#[test]
fn new_start_replaces_the_active_run() -> Result<(), String> {
    let (mut coordinator, mut agents, first) = started_run(two_phases(), Vec::new(), &["a"])?;
    let agent = agents.first_mut().ok_or("missing agent")?;
    coordinator.tick(0);
    status(&mut coordinator, agent, &first, "p1", PhaseStatus::Running);
    agent.drain();

    let second = coordinator
        .start_benchmark("bench", 100)
        .map_err(|err| err.to_string())?;
    if second != "0001" || run_state(&coordinator, &second) != Some(RunState::Queued) {
        return Err(format!("second run should be queued, got {second}"));
    }
    let replaced = coordinator.run(&first).ok_or("missing first run")?;
    if replaced.kill_reason.as_deref() != Some("replaced by run 0001") {
        return Err(format!("unexpected kill reason {:?}", replaced.kill_reason));
    }
    if agent.controls() != vec![(PhaseCommand::Terminate, "p1".to_owned())] {
        return Err("started phase of the replaced run should be terminated".to_owned());
    }

    // A third start while the second still waits drops the second.
    let third = coordinator
        .start_benchmark("bench", 150)
        .map_err(|err| err.to_string())?;
    let dropped = coordinator.run(&second).ok_or("missing second run")?;
    if dropped.state != RunState::Completed
        || dropped.kill_reason.as_deref() != Some("replaced by run 0002")
    {
        return Err(format!("queued run should be dropped, got {:?}", dropped.state));
    }
    if !init_runs(agent).is_empty() {
        return Err("no init may be sent while the old run drains".to_owned());
    }

    walk_to(&mut coordinator, agent, &first, "p1", PhaseStatus::Terminated);
    let outcome = coordinator.tick(200);
    let job = outcome.finalized.ok_or("replaced run should still finalize")?;
    if job.report.run_id != first || !job.report.is_killed() {
        return Err(format!("unexpected report for {}", job.report.run_id));
    }
    if init_runs(agent) != vec![third.clone()] {
        return Err("queued run should initialize once the old run is finalized".to_owned());
    }
    if run_state(&coordinator, &third) != Some(RunState::Initializing) {
        return Err("queued run should be initializing".to_owned());
    }
    ack(&mut coordinator, agent, &third, 210);
    coordinator.tick(210);
    if agent.controls() != vec![(PhaseCommand::Run, "p1".to_owned())] {
        return Err("replacement run should start its first phase".to_owned());
    }
    Ok(())
}

#[test]
fn killing_a_queued_run_drops_it() -> Result<(), String> {
    let (mut coordinator, mut agents, first) = started_run(two_phases(), Vec::new(), &["a"])?;
    let agent = agents.first_mut().ok_or("missing agent")?;
    coordinator.tick(0);
    status(&mut coordinator, agent, &first, "p1", PhaseStatus::Running);
    let queued = coordinator
        .start_benchmark("bench", 100)
        .map_err(|err| err.to_string())?;
    if !coordinator
        .kill(&queued, "killed by user")
        .map_err(|err| err.to_string())?
    {
        return Err("queued run should count as in progress".to_owned());
    }
    let dropped = coordinator.run(&queued).ok_or("missing queued run")?;
    if dropped.state != RunState::Completed
        || dropped.kill_reason.as_deref() != Some("killed by user")
    {
        return Err(format!("queued run should be dropped, got {:?}", dropped.state));
    }
    agent.drain();

    walk_to(&mut coordinator, agent, &first, "p1", PhaseStatus::Terminated);
    if coordinator.tick(200).finalized.is_none() {
        return Err("replaced run should finalize".to_owned());
    }
    if !init_runs(agent).is_empty() || coordinator.available_agents() != 1 {
        return Err("a dropped run must not initialize".to_owned());
    }
    Ok(())
}

#[test]
fn benchmark_agent_count_selects_participants() -> Result<(), String> {
    let mut definition = benchmark(two_phases(), Vec::new());
    definition.agents = Some(2);
    let mut coordinator = RunCoordinator::new(settings(), vec![definition]);
    let mut agents = vec![connected(&mut coordinator, "a")?];
    match coordinator.start_benchmark("bench", 0) {
        Err(DistributedError::NotEnoughAgents {
            required: 2,
            available: 1,
            ..
        }) => {}
        other => return Err(format!("expected NotEnoughAgents, got {other:?}")),
    }
    agents.push(connected(&mut coordinator, "b")?);
    agents.push(connected(&mut coordinator, "c")?);
    let run_id = coordinator
        .start_benchmark("bench", 0)
        .map_err(|err| err.to_string())?;
    let initialized = agents
        .iter_mut()
        .map(init_runs)
        .filter(|inits| !inits.is_empty())
        .count();
    let participants = coordinator
        .run(&run_id)
        .map(|run| run.participants.len());
    if initialized != 2 || participants != Some(2) || coordinator.available_agents() != 1 {
        return Err(format!(
            "expected two participants and one idle agent, got {initialized} initialized"
        ));
    }
    Ok(())
}

#[test]
fn max_duration_terminates_a_running_phase() -> Result<(), String> {
    let mut bounded = phase("p1", 1000);
    bounded.max_duration = Some(Duration::from_millis(600));
    let (mut coordinator, mut agents, run_id) = started_run(vec![bounded], Vec::new(), &["a"])?;
    let agent = agents.first_mut().ok_or("missing agent")?;
    coordinator.tick(0);
    status(&mut coordinator, agent, &run_id, "p1", PhaseStatus::Running);
    agent.drain();

    coordinator.tick(599);
    if !agent.controls().is_empty() {
        return Err("nothing is due before the max duration".to_owned());
    }
    coordinator.tick(600);
    if agent.controls() != vec![(PhaseCommand::Terminate, "p1".to_owned())] {
        return Err("phase past its max duration should be terminated".to_owned());
    }
    if phase_status(&coordinator, &run_id, "p1") != Some(ControllerPhaseStatus::Terminating) {
        return Err("phase should be TERMINATING".to_owned());
    }
    Ok(())
}

#[test]
fn start_time_delays_the_phase() -> Result<(), String> {
    let mut delayed = phase("a", 1000);
    delayed.start_time = Some(Duration::from_millis(300));
    let (mut coordinator, mut agents, _run_id) =
        started_run(vec![delayed, phase("c", 1000)], Vec::new(), &["x"])?;
    let agent = agents.first_mut().ok_or("missing agent")?;

    let outcome = coordinator.tick(0);
    if agent.controls() != vec![(PhaseCommand::Run, "c".to_owned())] {
        return Err("only the undelayed phase should start".to_owned());
    }
    if outcome.next_delay != Some(Duration::from_millis(300)) {
        return Err(format!("unexpected next delay {:?}", outcome.next_delay));
    }
    coordinator.tick(300);
    if agent.controls() != vec![(PhaseCommand::Run, "a".to_owned())] {
        return Err("delayed phase should start at its start time".to_owned());
    }
    Ok(())
}

#[test]
fn strict_dependencies_wait_for_termination() -> Result<(), String> {
    let first = phase("a", 100);
    let mut after_a = phase("b", 100);
    after_a.start_after_strict = BTreeSet::from(["a".to_owned()]);
    let mut outlives_b = phase("c", 100);
    outlives_b.terminate_after_strict = BTreeSet::from(["b".to_owned()]);
    let (mut coordinator, mut agents, run_id) =
        started_run(vec![first, after_a, outlives_b], Vec::new(), &["x"])?;
    let agent = agents.first_mut().ok_or("missing agent")?;

    coordinator.tick(0);
    let started = agent.controls();
    if started
        != vec![
            (PhaseCommand::Run, "a".to_owned()),
            (PhaseCommand::Run, "c".to_owned()),
        ]
    {
        return Err(format!("unexpected first commands {started:?}"));
    }
    for name in ["a", "c"] {
        status(&mut coordinator, agent, &run_id, name, PhaseStatus::Running);
    }
    coordinator.tick(100);
    agent.drain();
    for name in ["a", "c"] {
        status(&mut coordinator, agent, &run_id, name, PhaseStatus::Finished);
    }

    coordinator.tick(110);
    if agent.controls() != vec![(PhaseCommand::TryTerminate, "a".to_owned())] {
        return Err("c must not try-terminate while b is not terminated".to_owned());
    }
    coordinator.tick(115);
    if !agent.controls().is_empty() {
        return Err("b must wait until a is TERMINATED".to_owned());
    }

    walk_to(&mut coordinator, agent, &run_id, "a", PhaseStatus::Terminated);
    coordinator.tick(120);
    if agent.controls() != vec![(PhaseCommand::Run, "b".to_owned())] {
        return Err("b should start once a is terminated".to_owned());
    }

    walk_to(&mut coordinator, agent, &run_id, "b", PhaseStatus::Terminated);
    coordinator.tick(130);
    if !agent
        .controls()
        .contains(&(PhaseCommand::TryTerminate, "c".to_owned()))
    {
        return Err("c should try-terminate once b is terminated".to_owned());
    }
    Ok(())
}

#[test]
fn uploaded_benchmark_is_registered_and_stored() -> Result<(), String> {
    let dir = tempfile::tempdir().map_err(|err| format!("tempdir failed: {err}"))?;
    let mut with_dir = settings();
    with_dir.benchmark_dir = Some(dir.path().to_path_buf());
    let mut coordinator = RunCoordinator::new(with_dir, vec![benchmark(two_phases(), Vec::new())]);
    let definition = "name = \"upload\"\n[[phases]]\nname = \"gate\"\n";

    let name = coordinator
        .create_benchmark(definition, DefinitionFormat::Toml)
        .map_err(|err| err.message)?;
    if name != "upload" {
        return Err(format!("unexpected name {name}"));
    }
    let (listed, _) = coordinator.handle_control(ControlRequest::ListBenchmarks, 0);
    let listed = listed.map_err(|err| err.message)?;
    if listed != serde_json::json!({ "benchmarks": ["bench", "upload"] }) {
        return Err(format!("unexpected listing {listed}"));
    }

    let rejected = [
        (definition, 409),
        ("name = \"broken\"\n", 400),
        ("name = \"../escape\"\n[[phases]]\nname = \"gate\"\n", 400),
    ];
    for (body, expected) in rejected {
        match coordinator.create_benchmark(body, DefinitionFormat::Toml) {
            Err(err) if err.status == expected => {}
            Err(err) => return Err(format!("expected {expected}, got {}: {}", err.status, err.message)),
            Ok(name) => return Err(format!("{name} should be rejected")),
        }
    }

    let writes = coordinator.take_definition_writes();
    let [write] = writes.as_slice() else {
        return Err(format!("expected one stored definition, got {}", writes.len()));
    };
    if write.path != dir.path().join("upload.toml") {
        return Err(format!("unexpected path {}", write.path.display()));
    }
    write.persist().map_err(|err| err.to_string())?;
    let stored = std::fs::read_to_string(&write.path).map_err(|err| err.to_string())?;
    if stored != definition {
        return Err("definition should be stored verbatim".to_owned());
    }
    if write.persist().is_ok() {
        return Err("an existing definition file must not be replaced".to_owned());
    }
    Ok(())
}

#[test]
fn dependent_phase_waits_for_slowest_agent() -> Result<(), String> {
    let (mut coordinator, mut agents, run_id) = started_run(two_phases(), Vec::new(), &["a", "b"])?;
    let [a, b] = agents.as_mut_slice() else {
        return Err("expected two agents".to_owned());
    };

    let outcome = coordinator.tick(0);
    if outcome.next_delay != Some(Duration::from_millis(1000)) {
        return Err(format!("unexpected next delay {:?}", outcome.next_delay));
    }
    let expected_run = vec![(PhaseCommand::Run, "p1".to_owned())];
    if a.controls() != expected_run || b.controls() != expected_run {
        return Err("p1 should start on both agents, p2 should wait".to_owned());
    }

    status(&mut coordinator, a, &run_id, "p1", PhaseStatus::Running);
    if phase_status(&coordinator, &run_id, "p1") != Some(ControllerPhaseStatus::Starting) {
        return Err("p1 must wait for every agent before RUNNING".to_owned());
    }
    status(&mut coordinator, b, &run_id, "p1", PhaseStatus::Running);
    if phase_status(&coordinator, &run_id, "p1") != Some(ControllerPhaseStatus::Running) {
        return Err("p1 should be RUNNING".to_owned());
    }

    coordinator.tick(1000);
    let expected_finish = vec![(PhaseCommand::Finish, "p1".to_owned())];
    if a.controls() != expected_finish || b.controls() != expected_finish {
        return Err("p1 should be finished at its duration".to_owned());
    }

    status(&mut coordinator, a, &run_id, "p1", PhaseStatus::Finished);
    coordinator.tick(1100);
    if !a.controls().is_empty() {
        return Err("p2 must not start while agent b still runs p1".to_owned());
    }

    status(&mut coordinator, b, &run_id, "p1", PhaseStatus::Finished);
    coordinator.tick(1200);
    let commands = a.controls();
    if !commands.contains(&(PhaseCommand::TryTerminate, "p1".to_owned()))
        || !commands.contains(&(PhaseCommand::Run, "p2".to_owned()))
    {
        return Err(format!("unexpected commands {commands:?}"));
    }
    Ok(())
}

#[test]
fn duplicate_status_reports_change_nothing() -> Result<(), String> {
    let (mut coordinator, agents, run_id) = started_run(two_phases(), Vec::new(), &["a"])?;
    let agent = agents.first().ok_or("missing agent")?;
    coordinator.tick(0);
    if !status(&mut coordinator, agent, &run_id, "p1", PhaseStatus::Running) {
        return Err("first RUNNING report should advance the phase".to_owned());
    }
    if status(&mut coordinator, agent, &run_id, "p1", PhaseStatus::Running) {
        return Err("duplicate report must be a no-op".to_owned());
    }
    if status(&mut coordinator, agent, "other-run", "p1", PhaseStatus::Finished) {
        return Err("report for another run must be ignored".to_owned());
    }
    Ok(())
}

#[test]
fn completed_run_aggregates_statistics_and_finalizes() -> Result<(), String> {
    let phases = vec![phase("p1", 0)];
    let (mut coordinator, agents, run_id) = started_run(phases, Vec::new(), &["a", "b"])?;
    coordinator.tick(0);

    for agent in &agents {
        let mut snapshot = StatisticsSnapshot::new().map_err(|err| err.to_string())?;
        for _ in 0..3 {
            snapshot
                .record(&RequestRecord {
                    outcome: RequestOutcome::Response { status: 200 },
                    latency: Duration::from_millis(5),
                })
                .map_err(|err| err.to_string())?;
        }
        coordinator.handle_event(
            ControllerEvent::Stats {
                agent: agent.agent.clone(),
                statistics: Box::new(AgentStatistics {
                    run_id: run_id.clone(),
                    phase: "p1".to_owned(),
                    sequence: "main".to_owned(),
                    report_seq: 1,
                    snapshot,
                }),
            },
            0,
        );
        walk_to(&mut coordinator, agent, &run_id, "p1", PhaseStatus::Terminated);
    }

    let outcome = coordinator.tick(10);
    let job = outcome.finalized.ok_or("run should finalize")?;
    if job.report.outcome != RunOutcome::Completed {
        return Err(format!("unexpected outcome {:?}", job.report.outcome));
    }
    let statistics = job.statistics.ok_or("missing statistics")?;
    let total = statistics.totals.first().ok_or("missing totals")?;
    if total.summary.requests != 6 {
        return Err(format!("expected 6 requests, got {}", total.summary.requests));
    }
    if statistics.agents.len() != 2 {
        return Err(format!("expected 2 agent tables, got {}", statistics.agents.len()));
    }
    if job.report.phases.first().and_then(|phase| phase.sla_passed) != Some(true) {
        return Err("phase without rules should pass".to_owned());
    }
    if coordinator.available_agents() != 2 {
        return Err("agents should be available again".to_owned());
    }
    Ok(())
}

#[test]
fn failed_sla_kills_the_run() -> Result<(), String> {
    let slas = vec![Sla {
        phase: "p1".to_owned(),
        sequence: None,
        rule: SlaRule::MinRequests { count: 10 },
    }];
    let (mut coordinator, mut agents, run_id) = started_run(two_phases(), slas, &["a"])?;
    let agent = agents.first_mut().ok_or("missing agent")?;
    coordinator.tick(0);
    walk_to(&mut coordinator, agent, &run_id, "p1", PhaseStatus::Terminated);
    agent.drain();

    if phase_status(&coordinator, &run_id, "p2") != Some(ControllerPhaseStatus::Terminated) {
        return Err("unstarted phase should be closed by the kill".to_owned());
    }
    let outcome = coordinator.tick(100);
    if !agent.controls().is_empty() {
        return Err("no phase may start after a kill".to_owned());
    }
    let job = outcome.finalized.ok_or("killed run should finalize")?;
    if !job.report.is_killed() {
        return Err("run should be reported as killed".to_owned());
    }
    if job.report.sla_violations.len() != 1 {
        return Err(format!(
            "expected one violation, got {}",
            job.report.sla_violations.len()
        ));
    }
    let first = job.report.phases.first().ok_or("missing phase report")?;
    if first.sla_passed != Some(false) {
        return Err("p1 should fail its SLA".to_owned());
    }
    Ok(())
}

#[test]
fn lost_agent_no_longer_holds_back_the_phase() -> Result<(), String> {
    let (mut coordinator, agents, run_id) = started_run(two_phases(), Vec::new(), &["a", "b"])?;
    let [a, b] = agents.as_slice() else {
        return Err("expected two agents".to_owned());
    };
    coordinator.tick(0);
    status(&mut coordinator, a, &run_id, "p1", PhaseStatus::Running);
    let changed = coordinator.handle_event(
        ControllerEvent::Disconnected {
            agent: b.agent.clone(),
            message: "reset by peer".to_owned(),
        },
        0,
    );
    if !changed {
        return Err("losing a participant should trigger a tick".to_owned());
    }
    if phase_status(&coordinator, &run_id, "p1") != Some(ControllerPhaseStatus::Running) {
        return Err("remaining agent should decide the phase status".to_owned());
    }
    let run = coordinator.run(&run_id).ok_or("missing run")?;
    if run.kill_reason.is_some() {
        return Err("one lost agent must not kill the run by default".to_owned());
    }
    Ok(())
}

#[test]
fn losing_every_agent_kills_the_run() -> Result<(), String> {
    let (mut coordinator, agents, run_id) = started_run(two_phases(), Vec::new(), &["a"])?;
    let agent = agents.first().ok_or("missing agent")?;
    coordinator.tick(0);
    coordinator.handle_event(
        ControllerEvent::Disconnected {
            agent: agent.agent.clone(),
            message: "closed".to_owned(),
        },
        0,
    );
    let job = coordinator.tick(10).finalized.ok_or("run should finalize")?;
    match job.report.outcome {
        RunOutcome::Killed { reason } if reason == "no live agents" => Ok(()),
        other => Err(format!("unexpected outcome {other:?}")),
    }
}

#[test]
fn silent_agent_fails_on_liveness_check() -> Result<(), String> {
    let mut coordinator = RunCoordinator::new(settings(), Vec::new());
    let _agent = connected(&mut coordinator, "a")?;
    coordinator.check_liveness(4000);
    if coordinator.available_agents() != 1 {
        return Err("agent within the heartbeat timeout should stay".to_owned());
    }
    coordinator.check_liveness(6000);
    if coordinator.agent_count() != 0 {
        return Err("silent agent should be dropped".to_owned());
    }
    Ok(())
}

#[test]
fn stale_connection_events_are_ignored() -> Result<(), String> {
    let mut coordinator = RunCoordinator::new(settings(), Vec::new());
    let agent = connected(&mut coordinator, "a")?;
    coordinator.handle_event(
        ControllerEvent::Disconnected {
            agent: agent.agent.clone(),
            message: "closed".to_owned(),
        },
        0,
    );
    let _again = connect(&mut coordinator, "a", 7)?
        .map_err(|err| format!("reconnect refused: {err}"))?;
    coordinator.handle_event(
        ControllerEvent::Disconnected {
            agent: agent.agent.clone(),
            message: "late close of the old socket".to_owned(),
        },
        0,
    );
    if coordinator.available_agents() != 1 {
        return Err("reconnected agent should remain available".to_owned());
    }
    Ok(())
}

#[test]
fn kill_before_start_closes_every_phase() -> Result<(), String> {
    let mut coordinator = RunCoordinator::new(settings(), vec![benchmark(two_phases(), Vec::new())]);
    let _agent = connected(&mut coordinator, "a")?;
    let run_id = coordinator
        .start_benchmark("bench", 0)
        .map_err(|err| err.to_string())?;
    let (reply, changed) = coordinator.handle_control(
        ControlRequest::KillRun {
            run_id: run_id.clone(),
        },
        0,
    );
    if reply.is_err() || !changed {
        return Err("kill should succeed".to_owned());
    }
    let job = coordinator.tick(0).finalized.ok_or("run should finalize")?;
    if job
        .report
        .phases
        .iter()
        .any(|phase| phase.status != ControllerPhaseStatus::Terminated)
    {
        return Err("every phase should be terminated".to_owned());
    }
    Ok(())
}

#[test]
fn admin_routes_map_onto_requests() -> Result<(), String> {
    let definition = r#"{"name": "uploaded", "phases": [{"name": "gate"}]}"#;
    let upload = format!(
        "POST /benchmark HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{definition}",
        definition.len()
    );
    let cases = [
        ("GET /benchmark".to_owned(), Some(ControlRequest::ListBenchmarks)),
        (
            upload,
            Some(ControlRequest::CreateBenchmark {
                definition: definition.to_owned(),
                format: DefinitionFormat::Json,
            }),
        ),
        (
            "GET /benchmark/smoke".to_owned(),
            Some(ControlRequest::GetBenchmark {
                name: "smoke".to_owned(),
            }),
        ),
        (
            "POST /benchmark/smoke/start".to_owned(),
            Some(ControlRequest::StartBenchmark {
                name: "smoke".to_owned(),
            }),
        ),
        ("GET /agents".to_owned(), Some(ControlRequest::ListAgents)),
        ("GET /run?verbose=1".to_owned(), Some(ControlRequest::ListRuns)),
        (
            "GET /run/0001/kill".to_owned(),
            Some(ControlRequest::KillRun {
                run_id: "0001".to_owned(),
            }),
        ),
        ("POST /agents".to_owned(), None),
        ("DELETE /run/0001".to_owned(), None),
        ("GET /unknown".to_owned(), None),
    ];
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("Failed to build runtime: {}", err))?;
    runtime.block_on(async {
        for (head, expected) in cases {
            let raw = if head.contains("\r\n") {
                head.clone()
            } else {
                format!("{head} HTTP/1.1\r\nHost: x\r\n\r\n")
            };
            let mut reader = raw.as_bytes();
            let request = read_admin_request(&mut reader)
                .await
                .map_err(|err| format!("{head}: {}", err.message))?;
            let actual = route(&request);
            if actual != expected {
                return Err(format!("{head}: expected {expected:?}, got {actual:?}"));
            }
        }
        Ok(())
    })
}

#[test]
fn admin_request_head_is_parsed_and_authorized() -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("Failed to build runtime: {}", err))?;
    runtime.block_on(async {
        let mut raw: &[u8] =
            b"POST /benchmark/smoke/start HTTP/1.1\r\nHost: x\r\nAuthorization: Bearer s3cret\r\n\r\n";
        let request = read_admin_request(&mut raw)
            .await
            .map_err(|err| err.message)?;
        if request.method != "POST" || request.path != "/benchmark/smoke/start" {
            return Err("unexpected request line".to_owned());
        }
        if !request.body.is_empty() {
            return Err("request without a length has no body".to_owned());
        }
        if !request.is_authorized(Some("s3cret")) || !request.is_authorized(None) {
            return Err("matching bearer token should be accepted".to_owned());
        }
        if request.is_authorized(Some("other")) {
            return Err("wrong bearer token should be refused".to_owned());
        }

        let mut with_body: &[u8] =
            b"POST /run HTTP/1.1\r\nContent-Length: 4\r\nContent-Type: text/plain\r\n\r\nkill";
        let request = read_admin_request(&mut with_body)
            .await
            .map_err(|err| err.message)?;
        if request.body != "kill" || request.content_type() != Some("text/plain") {
            return Err(format!("unexpected body {:?}", request.body));
        }

        let rejected: [(&[u8], u16); 4] = [
            (
                b"POST /benchmark HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nkill\r\n0\r\n\r\n",
                411,
            ),
            (b"POST /benchmark HTTP/1.1\r\nContent-Length: 2097152\r\n\r\n", 413),
            (b"POST /benchmark HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort", 400),
            (b"GET /agents HTTP/1.1\r\n", 400),
        ];
        for (raw, expected) in rejected {
            let mut reader = raw;
            match read_admin_request(&mut reader).await {
                Err(err) if err.status == expected => {}
                Err(err) => return Err(format!("expected {expected}, got {}", err.status)),
                Ok(request) => return Err(format!("{} should be rejected", request.path)),
            }
        }
        Ok(())
    })
}

#[test]
fn finalize_writes_every_artifact_it_can() -> Result<(), String> {
    let (mut coordinator, mut agents, run_id) =
        started_run(vec![phase("p1", 0)], Vec::new(), &["a"])?;
    let agent = agents.first_mut().ok_or("missing agent")?;
    coordinator.tick(0);
    walk_to(&mut coordinator, agent, &run_id, "p1", PhaseStatus::Terminated);
    let mut job = coordinator.tick(10).finalized.ok_or("run should finalize")?;
    if job.statistics.is_none() {
        return Err("finished run should carry statistics".to_owned());
    }

    let dir = tempfile::tempdir().map_err(|err| format!("tempdir failed: {err}"))?;
    job.dir = dir.path().join(&run_id);
    std::fs::create_dir_all(&job.dir).map_err(|err| err.to_string())?;
    // A plain file where the statistics directory belongs.
    std::fs::write(job.dir.join("stats"), "blocked").map_err(|err| err.to_string())?;

    if job.persist().is_ok() {
        return Err("blocked statistics should fail the persist".to_owned());
    }
    for artifact in ["benchmark.json", "report.json"] {
        if !job.dir.join(artifact).exists() {
            return Err(format!("{artifact} should be written despite the failure"));
        }
    }
    Ok(())
}

#[test]
fn admin_errors_are_written_as_json() -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("Failed to build runtime: {}", err))?;
    runtime.block_on(async {
        let mut out: Vec<u8> = Vec::new();
        write_reply(&mut out, Err(ControlError::new(409, "Benchmark 'smoke' already exists.")))
            .await
            .map_err(|err| err.to_string())?;
        let text = String::from_utf8(out).map_err(|err| err.to_string())?;
        if !text.starts_with("HTTP/1.1 409 Conflict\r\n") {
            return Err(format!("unexpected status line in {}", text));
        }
        if !text.ends_with("{\"error\":\"Benchmark 'smoke' already exists.\"}") {
            return Err(format!("unexpected body in {}", text));
        }
        Ok(())
    })
}
