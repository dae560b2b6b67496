//! Request statistics: per-sequence counters with a latency histogram,
//! cross-agent aggregation and SLA evaluation.
mod export;
mod histogram;
mod sla;
mod snapshot;
mod store;

#[cfg(test)]
mod tests;

pub use export::{ExportedRow, StatisticsExport, percentile_label, write_statistics};
pub use histogram::LatencyHistogram;
pub use sla::{RecordingSlaSink, SlaSink, SlaViolation, evaluate_rule};
pub use snapshot::{
    PercentileValue, RequestOutcome, RequestRecord, StatisticsSnapshot, StatisticsSummary,
};
pub use store::{StatisticsKey, StatisticsStore};
