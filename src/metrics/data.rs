//! Data structures for node snapshots, flattened samples and nodes.

use crate::error::{Result, TelemetryError};
use crate::metrics::labels::Labels;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Dotted metric names emitted by the normalizer.
pub mod names {
    pub const CPU_TEMP_C: &str = "cpu.temp_c";
    pub const CPU_USAGE_PCT: &str = "cpu.usage_pct";
    pub const CPU_LOAD_AVG: &str = "cpu.load_avg";
    pub const CPU_FREQ_MHZ: &str = "cpu.freq_mhz";
    pub const CPU_CORES: &str = "cpu.cores";
    pub const GPU_TEMP_C: &str = "gpu.temp_c";
    pub const GPU_USAGE_PCT: &str = "gpu.usage_pct";
    pub const GPU_MEM_USED_MB: &str = "gpu.mem_used_mb";
    pub const GPU_POWER_W: &str = "gpu.power_w";

    /// Label key carrying the GPU name on `gpu.*` samples.
    pub const GPU_LABEL: &str = "gpu";
}

/// One node's measurement bundle at one instant, before flattening.
///
/// This is also the wire shape accepted by the ingest endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Stable identity of the reporting machine
    #[serde(default)]
    pub node_id: String,
    /// RFC 3339 instant the measurements describe; ingest time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// CPU block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuBlock>,
    /// Zero or more GPU entries
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub gpus: Vec<GpuBlock>,
    /// Tags applied to every derived sample and stored as node metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Labels>,
}

/// CPU measurements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuBlock {
    /// Package temperature in Celsius
    #[serde(default)]
    pub temp_c: f64,
    /// Usage percentage (0.0 to 100.0 expected, not enforced)
    #[serde(default)]
    pub usage_pct: f64,
    /// Load average
    #[serde(default)]
    pub load_avg: f64,
    /// Current frequency in MHz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freq_mhz: Option<f64>,
    /// Logical core count; collectors may send zero or a negative value
    /// when unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<i64>,
}

/// Measurements for one GPU.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuBlock {
    /// Display name, used as the `gpu` label value
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub temp_c: f64,
    #[serde(default)]
    pub usage_pct: f64,
    #[serde(default)]
    pub mem_used_mb: f64,
    #[serde(default)]
    pub power_w: f64,
}

/// One flattened, immutable, labeled time-series point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub time: DateTime<Utc>,
    pub metric: String,
    pub value: f64,
    #[serde(default)]
    pub labels: Labels,
}

/// A monitored machine and its liveness record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub meta: Labels,
}

impl Snapshot {
    /// Create an empty snapshot for a node.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    /// Set the measurement instant.
    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true));
        self
    }

    /// Set the CPU block.
    pub fn with_cpu(mut self, cpu: CpuBlock) -> Self {
        self.cpu = Some(cpu);
        self
    }

    /// Append a GPU entry.
    pub fn with_gpu(mut self, gpu: GpuBlock) -> Self {
        self.gpus.push(gpu);
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.get_or_insert_with(Labels::new).insert(key, value);
        self
    }

    /// The instant this snapshot describes: its own timestamp if present,
    /// `now` otherwise. A malformed timestamp is a validation error.
    pub fn resolve_timestamp(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self.timestamp.as_deref().map(str::trim) {
            None | Some("") => Ok(now),
            Some(raw) => parse_rfc3339(raw),
        }
    }
}

impl GpuBlock {
    /// Create a GPU entry with only a name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Parse an RFC 3339 instant and normalize it to UTC.
pub fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| TelemetryError::validation(format!("invalid RFC 3339 timestamp {raw:?}: {e}")))
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_snapshot_wire_shape() {
        let json = r#"{
            "node_id": "rig-1",
            "timestamp": "2024-01-01T00:00:00Z",
            "cpu": {"temp_c": 55.0, "usage_pct": 42.5, "load_avg": 1.5, "cores": 16},
            "gpus": [{"name": "RTX4090", "usage_pct": 80}],
            "tags": {"room": "office"}
        }"#;
        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.node_id, "rig-1");
        let cpu = snapshot.cpu.as_ref().unwrap();
        assert_eq!(cpu.usage_pct, 42.5);
        assert_eq!(cpu.freq_mhz, None);
        assert_eq!(cpu.cores, Some(16));
        assert_eq!(snapshot.gpus[0].name, "RTX4090");
        assert_eq!(snapshot.gpus[0].power_w, 0.0);
        assert_eq!(snapshot.tags.as_ref().unwrap().get("room"), Some("office"));
    }

    #[test]
    fn test_null_gpus_and_tags_are_accepted() {
        let snapshot: Snapshot =
            serde_json::from_str(r#"{"node_id": "a", "gpus": null, "tags": null}"#).unwrap();
        assert!(snapshot.gpus.is_empty());
        assert!(snapshot.tags.is_none());
    }

    #[test]
    fn test_resolve_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        let absent = Snapshot::new("a");
        assert_eq!(absent.resolve_timestamp(now).unwrap(), now);

        let mut blank = Snapshot::new("a");
        blank.timestamp = Some(String::new());
        assert_eq!(blank.resolve_timestamp(now).unwrap(), now);

        let mut offset = Snapshot::new("a");
        offset.timestamp = Some("2024-01-01T02:00:00+02:00".to_string());
        assert_eq!(
            offset.resolve_timestamp(now).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );

        let mut malformed = Snapshot::new("a");
        malformed.timestamp = Some("yesterday".to_string());
        assert!(matches!(
            malformed.resolve_timestamp(now),
            Err(TelemetryError::Validation(_))
        ));
    }

    #[test]
    fn test_sample_serializes_empty_labels() {
        let sample = MetricSample {
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            metric: names::CPU_USAGE_PCT.to_string(),
            value: 42.5,
            labels: Labels::new(),
        };
        let value = serde_json::to_value(&sample).unwrap();
        assert_eq!(value["time"], "2024-01-01T00:00:00Z");
        assert_eq!(value["labels"], serde_json::json!({}));
    }
}
