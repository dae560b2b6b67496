use std::time::Duration;

use super::{
    LatencyHistogram, RecordingSlaSink, RequestOutcome, RequestRecord, StatisticsKey,
    StatisticsSnapshot, StatisticsStore, percentile_label,
};
use crate::error::{AppError, AppResult};
use crate::model::{
    Benchmark, ErrorRatio, HttpMethod, LoadShape, Phase, RequestStep, Scenario, Sequence, Sla,
    SlaRule,
};

fn response(status: u16, millis: u64) -> RequestRecord {
    RequestRecord {
        outcome: RequestOutcome::Response { status },
        latency: Duration::from_millis(millis),
    }
}

fn snapshot_with(records: &[RequestRecord]) -> AppResult<StatisticsSnapshot> {
    let mut snapshot = StatisticsSnapshot::new()?;
    for record in records {
        snapshot.record(record)?;
    }
    Ok(snapshot)
}

fn benchmark_with_slas(slas: Vec<Sla>) -> Benchmark {
    let mut phase = Phase::noop("steady");
    phase.load = LoadShape::AtOnce { users: 1 };
    phase.duration = Duration::from_secs(1);
    phase.scenario = Scenario {
        sequences: vec![Sequence {
            name: "browse".to_owned(),
            steps: vec![RequestStep {
                method: HttpMethod::Get,
                path: "/".to_owned(),
                headers: vec![],
                body: None,
                think_time: None,
            }],
        }],
    };
    Benchmark {
        name: "bench".to_owned(),
        target: None,
        agents: None,
        statistics_period: Duration::from_secs(1),
        percentiles: vec![0.5, 0.99],
        phases: vec![phase],
        slas,
    }
}

#[test]
fn snapshot_classifies_outcomes() -> AppResult<()> {
    let snapshot = snapshot_with(&[
        response(200, 10),
        response(302, 10),
        response(404, 10),
        response(503, 10),
        response(99, 10),
        RequestRecord {
            outcome: RequestOutcome::ConnectFailure,
            latency: Duration::from_millis(1),
        },
        RequestRecord {
            outcome: RequestOutcome::Timeout,
            latency: Duration::from_secs(5),
        },
    ])?;
    if snapshot.requests != 7 || snapshot.responses != 5 {
        return Err(AppError::metrics(format!(
            "Unexpected request/response counts: {}/{}",
            snapshot.requests, snapshot.responses
        )));
    }
    if snapshot.errors() != 5 {
        return Err(AppError::metrics(format!(
            "Unexpected error count: {}",
            snapshot.errors()
        )));
    }
    if snapshot.histogram.count() != 5 {
        return Err(AppError::metrics("Only responses should be in the histogram"));
    }
    if snapshot.mean_us() != 10_000 {
        return Err(AppError::metrics(format!(
            "Unexpected mean: {}",
            snapshot.mean_us()
        )));
    }
    Ok(())
}

#[test]
fn merge_is_commutative() -> AppResult<()> {
    let left = snapshot_with(&[response(200, 5), response(500, 40)])?;
    let right = snapshot_with(&[response(201, 12), response(204, 900), response(404, 3)])?;

    let mut left_first = left.clone();
    left_first.merge(&right)?;
    let mut right_first = right.clone();
    right_first.merge(&left)?;

    let percentiles = [0.5, 0.9, 0.99];
    if left_first.summary(&percentiles) != right_first.summary(&percentiles) {
        return Err(AppError::metrics("Merge order changed the result"));
    }
    if left_first.requests != 5 || left_first.status_2xx != 3 {
        return Err(AppError::metrics("Merged counters are wrong"));
    }
    Ok(())
}

#[test]
fn merge_order_of_three_snapshots_does_not_matter() -> AppResult<()> {
    let snapshots = [
        snapshot_with(&[response(200, 5), response(500, 40)])?,
        snapshot_with(&[response(201, 12), response(404, 3)])?,
        snapshot_with(&[
            RequestRecord {
                outcome: RequestOutcome::Reset,
                latency: Duration::from_millis(7),
            },
            response(204, 900),
        ])?,
    ];
    let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    let percentiles = [0.5, 0.9, 0.99, 0.999];

    let mut merged = Vec::new();
    for order in orders {
        let mut total = StatisticsSnapshot::new()?;
        for index in order {
            let part = snapshots
                .get(index)
                .ok_or_else(|| AppError::metrics("Snapshot index out of range"))?;
            total.merge(part)?;
        }
        merged.push(total);
    }
    // (A + B) + C against A + (B + C).
    let [first, second, third] = &snapshots;
    let mut right = second.clone();
    right.merge(third)?;
    let mut grouped = first.clone();
    grouped.merge(&right)?;
    merged.push(grouped);

    let expected = merged
        .first()
        .ok_or_else(|| AppError::metrics("No merged snapshot"))?;
    for total in &merged {
        if total.summary(&percentiles) != expected.summary(&percentiles)
            || total.histogram.count() != expected.histogram.count()
        {
            return Err(AppError::metrics("Merge order changed the result"));
        }
    }
    if expected.requests != 6 || expected.errors() != 3 {
        return Err(AppError::metrics(format!(
            "Merged counters are wrong: {} requests, {} errors",
            expected.requests,
            expected.errors()
        )));
    }
    Ok(())
}

#[test]
fn histogram_survives_base64_transport() -> AppResult<()> {
    let mut histogram = LatencyHistogram::new()?;
    histogram.record(Duration::from_millis(3))?;
    histogram.record(Duration::from_millis(7))?;
    let decoded = LatencyHistogram::decode_base64(&histogram.encode_base64()?)?;
    if decoded.count() != 2 || decoded.max() != histogram.max() {
        return Err(AppError::metrics("Decoded histogram differs"));
    }
    Ok(())
}

#[test]
fn store_keeps_newest_report_per_agent() -> AppResult<()> {
    let mut store = StatisticsStore::new(
        &benchmark_with_slas(vec![]),
        Box::new(RecordingSlaSink::new()),
    );
    let newer = snapshot_with(&[response(200, 1), response(200, 1)])?;
    let older = snapshot_with(&[response(200, 1)])?;
    if !store.record("a1", "steady", "browse", 2, newer) {
        return Err(AppError::metrics("First report rejected"));
    }
    if store.record("a1", "steady", "browse", 1, older.clone()) {
        return Err(AppError::metrics("Stale report accepted"));
    }
    store.record("a2", "steady", "browse", 1, older);

    let total = store
        .aggregate(&StatisticsKey::new("steady", "browse"))?
        .ok_or(AppError::metrics("Missing aggregate"))?;
    if total.requests != 3 {
        return Err(AppError::metrics(format!(
            "Unexpected total: {}",
            total.requests
        )));
    }

    if store.discard_agent("a2") != 1 {
        return Err(AppError::metrics("Expected one discarded entry"));
    }
    Ok(())
}

#[test]
fn error_ratio_sla_reports_one_violation() -> AppResult<()> {
    let ratio = ErrorRatio::from_fraction(0.01).ok_or(AppError::metrics("Bad ratio"))?;
    let sink = RecordingSlaSink::new();
    let mut store = StatisticsStore::new(
        &benchmark_with_slas(vec![Sla {
            phase: "steady".to_owned(),
            sequence: None,
            rule: SlaRule::MaxErrorRatio { ratio },
        }]),
        Box::new(sink.clone()),
    );
    let failing: Vec<RequestRecord> = (0..10).map(|_| response(503, 2)).collect();
    store.record("a1", "steady", "browse", 1, snapshot_with(&failing)?);

    if store.validate_slas("steady") {
        return Err(AppError::metrics("Expected SLA failure"));
    }
    let violations = sink.violations();
    if violations.len() != 1 {
        return Err(AppError::metrics(format!(
            "Expected one violation, got {}",
            violations.len()
        )));
    }
    if violations.first().map(|violation| violation.sequence.as_str()) != Some("browse") {
        return Err(AppError::metrics("Violation attributed to the wrong sequence"));
    }
    Ok(())
}

#[test]
fn sla_checks_declared_sequences_without_reports() -> AppResult<()> {
    let sink = RecordingSlaSink::new();
    let mut store = StatisticsStore::new(
        &benchmark_with_slas(vec![Sla {
            phase: "steady".to_owned(),
            sequence: Some("browse".to_owned()),
            rule: SlaRule::MinRequests { count: 1 },
        }]),
        Box::new(sink.clone()),
    );
    if store.validate_slas("steady") {
        return Err(AppError::metrics("Missing traffic should fail min_requests"));
    }
    if !store.validate_slas("unrelated") {
        return Err(AppError::metrics("Phase without SLAs must pass"));
    }
    Ok(())
}

#[test]
fn percentile_labels_match_csv_header() -> AppResult<()> {
    let labels: Vec<String> = [0.5, 0.9, 0.99, 0.999, 0.9999]
        .iter()
        .map(|p| percentile_label(*p))
        .collect();
    if labels != ["p50.0", "p90.0", "p99.0", "p99.9", "p99.99"] {
        return Err(AppError::metrics(format!("Unexpected labels: {:?}", labels)));
    }
    Ok(())
}

#[test]
fn persist_writes_total_agent_and_summary_files() -> AppResult<()> {
    let dir = tempfile::tempdir()?;
    let mut store = StatisticsStore::new(
        &benchmark_with_slas(vec![]),
        Box::new(RecordingSlaSink::new()),
    );
    store.record("agent one", "steady", "browse", 1, snapshot_with(&[response(200, 4)])?);
    let stats_dir = dir.path().join("stats");
    store.persist(&stats_dir)?;

    let total = std::fs::read_to_string(stats_dir.join("total.csv"))?;
    let mut lines = total.lines();
    let header = lines.next().unwrap_or_default();
    if !header.starts_with("Phase,Sequence,Requests,Responses,Mean,Min,p50.0,p99.0,Max") {
        return Err(AppError::metrics(format!("Unexpected header: {}", header)));
    }
    if !lines.next().unwrap_or_default().starts_with("steady,browse,1,1,") {
        return Err(AppError::metrics("Missing total row"));
    }
    if !stats_dir.join("agents").join("agent_one.csv").exists() {
        return Err(AppError::metrics("Missing per-agent CSV"));
    }
    if !stats_dir.join("summary.json").exists() {
        return Err(AppError::metrics("Missing summary.json"));
    }
    Ok(())
}
