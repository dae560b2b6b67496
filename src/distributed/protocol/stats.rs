use serde::{Deserialize, Serialize};

use crate::error::MetricsError;
use crate::metrics::{LatencyHistogram, StatisticsSnapshot};

/// Statistics snapshot as sent over the wire; the histogram travels as
/// base64-encoded HdrHistogram V2.
#[derive(Debug, Serialize, Deserialize)]
pub(in crate::distributed) struct WireStatistics {
    pub(in crate::distributed) requests: u64,
    pub(in crate::distributed) responses: u64,
    pub(in crate::distributed) status_2xx: u64,
    pub(in crate::distributed) status_3xx: u64,
    pub(in crate::distributed) status_4xx: u64,
    pub(in crate::distributed) status_5xx: u64,
    pub(in crate::distributed) status_other: u64,
    pub(in crate::distributed) connect_failures: u64,
    pub(in crate::distributed) resets: u64,
    pub(in crate::distributed) timeouts: u64,
    pub(in crate::distributed) failed_sessions: u64,
    #[serde(with = "serde_u128")]
    pub(in crate::distributed) latency_sum_us: u128,
    pub(in crate::distributed) histogram_b64: String,
}

impl WireStatistics {
    pub(in crate::distributed) fn from_snapshot(
        snapshot: &StatisticsSnapshot,
    ) -> Result<Self, MetricsError> {
        Ok(Self {
            requests: snapshot.requests,
            responses: snapshot.responses,
            status_2xx: snapshot.status_2xx,
            status_3xx: snapshot.status_3xx,
            status_4xx: snapshot.status_4xx,
            status_5xx: snapshot.status_5xx,
            status_other: snapshot.status_other,
            connect_failures: snapshot.connect_failures,
            resets: snapshot.resets,
            timeouts: snapshot.timeouts,
            failed_sessions: snapshot.failed_sessions,
            latency_sum_us: snapshot.latency_sum_us,
            histogram_b64: snapshot.histogram.encode_base64()?,
        })
    }

    pub(in crate::distributed) fn into_snapshot(self) -> Result<StatisticsSnapshot, MetricsError> {
        Ok(StatisticsSnapshot {
            requests: self.requests,
            responses: self.responses,
            status_2xx: self.status_2xx,
            status_3xx: self.status_3xx,
            status_4xx: self.status_4xx,
            status_5xx: self.status_5xx,
            status_other: self.status_other,
            connect_failures: self.connect_failures,
            resets: self.resets,
            timeouts: self.timeouts,
            failed_sessions: self.failed_sessions,
            latency_sum_us: self.latency_sum_us,
            histogram: LatencyHistogram::decode_base64(&self.histogram_b64)?,
        })
    }
}

mod serde_u128 {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S>(value: &u128, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse::<u128>().map_err(de::Error::custom)
    }
}
