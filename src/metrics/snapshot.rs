use std::time::Duration;

use serde::Serialize;

use super::histogram::LatencyHistogram;
use crate::error::MetricsError;

/// How a single request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Response { status: u16 },
    ConnectFailure,
    Reset,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRecord {
    pub outcome: RequestOutcome,
    pub latency: Duration,
}

/// Cumulative counters for one (phase, sequence) pair.
#[derive(Debug, Clone)]
pub struct StatisticsSnapshot {
    pub requests: u64,
    pub responses: u64,
    pub status_2xx: u64,
    pub status_3xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub status_other: u64,
    pub connect_failures: u64,
    pub resets: u64,
    pub timeouts: u64,
    pub failed_sessions: u64,
    pub latency_sum_us: u128,
    pub histogram: LatencyHistogram,
}

impl StatisticsSnapshot {
    /// Empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the histogram cannot be created.
    pub fn new() -> Result<Self, MetricsError> {
        Ok(Self {
            requests: 0,
            responses: 0,
            status_2xx: 0,
            status_3xx: 0,
            status_4xx: 0,
            status_5xx: 0,
            status_other: 0,
            connect_failures: 0,
            resets: 0,
            timeouts: 0,
            failed_sessions: 0,
            latency_sum_us: 0,
            histogram: LatencyHistogram::new()?,
        })
    }

    /// Account for one request. Only requests that produced a response
    /// contribute to the latency figures.
    ///
    /// # Errors
    ///
    /// Returns an error if the latency cannot be recorded.
    pub fn record(&mut self, record: &RequestRecord) -> Result<(), MetricsError> {
        self.requests = self.requests.saturating_add(1);
        match record.outcome {
            RequestOutcome::Response { status } => {
                self.responses = self.responses.saturating_add(1);
                let bucket = match status {
                    200..=299 => &mut self.status_2xx,
                    300..=399 => &mut self.status_3xx,
                    400..=499 => &mut self.status_4xx,
                    500..=599 => &mut self.status_5xx,
                    _ => &mut self.status_other,
                };
                *bucket = bucket.saturating_add(1);
                self.latency_sum_us = self
                    .latency_sum_us
                    .saturating_add(record.latency.as_micros());
                self.histogram.record(record.latency)?;
            }
            RequestOutcome::ConnectFailure => {
                self.connect_failures = self.connect_failures.saturating_add(1);
            }
            RequestOutcome::Reset => {
                self.resets = self.resets.saturating_add(1);
            }
            RequestOutcome::Timeout => {
                self.timeouts = self.timeouts.saturating_add(1);
            }
        }
        Ok(())
    }

    pub const fn record_failed_session(&mut self) {
        self.failed_sessions = self.failed_sessions.saturating_add(1);
    }

    /// Add another snapshot's counters and histogram into this one.
    ///
    /// # Errors
    ///
    /// Returns an error if the histograms cannot be merged.
    pub fn merge(&mut self, other: &Self) -> Result<(), MetricsError> {
        self.requests = self.requests.saturating_add(other.requests);
        self.responses = self.responses.saturating_add(other.responses);
        self.status_2xx = self.status_2xx.saturating_add(other.status_2xx);
        self.status_3xx = self.status_3xx.saturating_add(other.status_3xx);
        self.status_4xx = self.status_4xx.saturating_add(other.status_4xx);
        self.status_5xx = self.status_5xx.saturating_add(other.status_5xx);
        self.status_other = self.status_other.saturating_add(other.status_other);
        self.connect_failures = self.connect_failures.saturating_add(other.connect_failures);
        self.resets = self.resets.saturating_add(other.resets);
        self.timeouts = self.timeouts.saturating_add(other.timeouts);
        self.failed_sessions = self.failed_sessions.saturating_add(other.failed_sessions);
        self.latency_sum_us = self.latency_sum_us.saturating_add(other.latency_sum_us);
        self.histogram.merge(&other.histogram)
    }

    /// Requests that did not end in a 2xx or 3xx response.
    #[must_use]
    pub const fn errors(&self) -> u64 {
        self.status_4xx
            .saturating_add(self.status_5xx)
            .saturating_add(self.status_other)
            .saturating_add(self.connect_failures)
            .saturating_add(self.resets)
            .saturating_add(self.timeouts)
    }

    #[must_use]
    pub fn mean_us(&self) -> u64 {
        let mean = self
            .latency_sum_us
            .checked_div(u128::from(self.histogram.count()))
            .unwrap_or(0);
        u64::try_from(mean).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn summary(&self, percentiles: &[f64]) -> StatisticsSummary {
        StatisticsSummary {
            requests: self.requests,
            responses: self.responses,
            mean_us: self.mean_us(),
            min_us: self.histogram.min(),
            max_us: self.histogram.max(),
            percentiles: percentiles
                .iter()
                .map(|percentile| PercentileValue {
                    percentile: *percentile,
                    value_us: self.histogram.value_at_quantile(*percentile),
                })
                .collect(),
            connect_failures: self.connect_failures,
            resets: self.resets,
            timeouts: self.timeouts,
            status_2xx: self.status_2xx,
            status_3xx: self.status_3xx,
            status_4xx: self.status_4xx,
            status_5xx: self.status_5xx,
            status_other: self.status_other,
            failed_sessions: self.failed_sessions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value_us: u64,
}

/// Flattened, serializable view of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsSummary {
    pub requests: u64,
    pub responses: u64,
    pub mean_us: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub percentiles: Vec<PercentileValue>,
    pub connect_failures: u64,
    pub resets: u64,
    pub timeouts: u64,
    pub status_2xx: u64,
    pub status_3xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub status_other: u64,
    pub failed_sessions: u64,
}
