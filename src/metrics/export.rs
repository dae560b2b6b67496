use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::snapshot::StatisticsSummary;
use super::store::StatisticsKey;
use crate::error::{AppError, AppResult, MetricsError, PersistenceError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedRow {
    pub phase: String,
    pub sequence: String,
    pub summary: StatisticsSummary,
}

impl ExportedRow {
    #[must_use]
    pub fn new(key: &StatisticsKey, summary: StatisticsSummary) -> Self {
        Self {
            phase: key.phase.clone(),
            sequence: key.sequence.clone(),
            summary,
        }
    }
}

/// Everything written to a run's `stats/` directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsExport {
    pub percentiles: Vec<f64>,
    pub totals: Vec<ExportedRow>,
    pub agents: BTreeMap<String, Vec<ExportedRow>>,
}

/// `0.999` becomes `p99.9`, `0.5` becomes `p50.0`.
#[must_use]
#[expect(
    clippy::float_arithmetic,
    reason = "percentiles are scaled to fixed point once for labelling"
)]
pub fn percentile_label(percentile: f64) -> String {
    let scaled = (percentile.clamp(0.0, 1.0) * 1_000_000.0).round() as u64;
    let whole = scaled.checked_div(10_000).unwrap_or(0);
    let fraction = format!("{:04}", scaled.checked_rem(10_000).unwrap_or(0));
    let trimmed = fraction.trim_end_matches('0');
    if trimmed.is_empty() {
        format!("p{whole}.0")
    } else {
        format!("p{whole}.{trimmed}")
    }
}

fn render_csv(rows: &[ExportedRow], percentiles: &[f64]) -> Result<String, MetricsError> {
    let mut out = String::new();
    let labels: Vec<String> = percentiles.iter().map(|p| percentile_label(*p)).collect();
    let mut header = vec!["Phase", "Sequence", "Requests", "Responses", "Mean", "Min"];
    header.extend(labels.iter().map(String::as_str));
    header.extend([
        "Max",
        "ConnFailure",
        "Reset",
        "Timeouts",
        "2xx",
        "3xx",
        "4xx",
        "5xx",
        "Other",
        "FailedSessions",
    ]);
    writeln!(out, "{}", header.join(",")).map_err(|err| MetricsError::Format { source: err })?;

    for row in rows {
        let summary = &row.summary;
        let percentile_values: Vec<String> = summary
            .percentiles
            .iter()
            .map(|value| value.value_us.to_string())
            .collect();
        let mut fields = vec![
            csv_field(&row.phase),
            csv_field(&row.sequence),
            summary.requests.to_string(),
            summary.responses.to_string(),
            summary.mean_us.to_string(),
            summary.min_us.to_string(),
        ];
        fields.extend(percentile_values);
        fields.extend([
            summary.max_us.to_string(),
            summary.connect_failures.to_string(),
            summary.resets.to_string(),
            summary.timeouts.to_string(),
            summary.status_2xx.to_string(),
            summary.status_3xx.to_string(),
            summary.status_4xx.to_string(),
            summary.status_5xx.to_string(),
            summary.status_other.to_string(),
            summary.failed_sessions.to_string(),
        ]);
        writeln!(out, "{}", fields.join(",")).map_err(|err| MetricsError::Format { source: err })?;
    }
    Ok(out)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}

fn write_file(path: PathBuf, contents: &str) -> AppResult<()> {
    std::fs::write(&path, contents)
        .map_err(|err| AppError::persistence(PersistenceError::Write { path, source: err }))
}

fn create_dir(path: &Path) -> AppResult<()> {
    std::fs::create_dir_all(path).map_err(|err| {
        AppError::persistence(PersistenceError::CreateDir {
            path: path.to_path_buf(),
            source: err,
        })
    })
}

/// Write `total.csv`, one CSV per agent under `agents/` and `summary.json`
/// into `dir`. Blocking; call it off the event loop.
///
/// # Errors
///
/// Returns an error if a directory or file cannot be written.
pub fn write_statistics(export: &StatisticsExport, dir: &Path) -> AppResult<()> {
    create_dir(dir)?;
    write_file(
        dir.join("total.csv"),
        &render_csv(&export.totals, &export.percentiles)?,
    )?;

    let agents_dir = dir.join("agents");
    if !export.agents.is_empty() {
        create_dir(&agents_dir)?;
    }
    for (agent, rows) in &export.agents {
        let file_name = format!("{}.csv", sanitize_file_name(agent));
        write_file(
            agents_dir.join(file_name),
            &render_csv(rows, &export.percentiles)?,
        )?;
    }

    let json = serde_json::to_string_pretty(export).map_err(|err| {
        AppError::persistence(PersistenceError::Serialize {
            context: "statistics summary",
            source: err,
        })
    })?;
    write_file(dir.join("summary.json"), &json)
}

fn sanitize_file_name(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
