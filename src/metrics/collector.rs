//! Local snapshot collection using sysinfo and `nvidia-smi`.

use crate::error::{Result, TelemetryError};
use crate::metrics::data::{CpuBlock, Snapshot};
use crate::metrics::labels::Labels;
use crate::metrics::nvidia;
use crate::metrics::traits::MetricsProvider;
use chrono::Utc;
use futures_util::stream::{self, BoxStream};
use std::time::Duration;
use sysinfo::{Components, System};
use tokio::time;
use tracing::warn;

/// Snapshot collector for the machine this process runs on.
pub struct SystemCollector {
    node_id: String,
    tags: Labels,
    collect_gpus: bool,
    system: System,
    components: Components,
    primed: bool,
}

impl SystemCollector {
    /// Create a collector reporting as `node_id`.
    pub fn new(node_id: impl Into<String>) -> Result<Self> {
        let node_id = node_id.into();
        if node_id.is_empty() {
            return Err(TelemetryError::config_error("collector node id must not be empty"));
        }

        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_cpu_frequency();
        let components = Components::new_with_refreshed_list();

        Ok(Self {
            node_id,
            tags: Labels::new(),
            collect_gpus: true,
            system,
            components,
            primed: false,
        })
    }

    /// Tags attached to every snapshot.
    pub fn with_tags(mut self, tags: Labels) -> Self {
        self.tags = tags;
        self
    }

    /// Enable or disable the `nvidia-smi` query.
    pub fn with_gpus(mut self, enabled: bool) -> Self {
        self.collect_gpus = enabled;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// A fresh collector with the same settings, for moving into a stream.
    fn fork(&self) -> Result<Self> {
        Ok(Self::new(self.node_id.clone())?
            .with_tags(self.tags.clone())
            .with_gpus(self.collect_gpus))
    }

    /// Collect the CPU block.
    fn collect_cpu(&mut self) -> Result<CpuBlock> {
        self.system.refresh_cpu_usage();
        self.system.refresh_cpu_frequency();
        self.components.refresh();

        let cpus = self.system.cpus();
        if cpus.is_empty() {
            return Err(TelemetryError::collector("No CPU information available"));
        }

        let cores = cpus.len();
        let usage_pct = cpus.iter().map(|cpu| cpu.cpu_usage() as f64).sum::<f64>() / cores as f64;
        let freq_mhz = cpus.iter().map(|cpu| cpu.frequency()).max().unwrap_or(0) as f64;
        let temp_c = hottest_cpu_temp(
            self.components
                .list()
                .iter()
                .map(|c| (c.label(), c.temperature())),
        )
        .unwrap_or(0.0);

        Ok(CpuBlock {
            temp_c: temp_c as f64,
            usage_pct,
            load_avg: System::load_average().one,
            freq_mhz: Some(freq_mhz),
            cores: Some(cores as i64),
        })
    }
}

/// Highest reading among CPU-looking temperature sensors.
pub fn hottest_cpu_temp<'a>(readings: impl Iterator<Item = (&'a str, f32)>) -> Option<f32> {
    const CPU_SENSOR_HINTS: [&str; 5] = ["cpu", "package", "tctl", "tdie", "core"];

    readings
        .filter(|(label, temp)| {
            let label = label.to_lowercase();
            temp.is_finite() && *temp > 0.0 && CPU_SENSOR_HINTS.iter().any(|h| label.contains(h))
        })
        .map(|(_, temp)| temp)
        .fold(None, |max: Option<f32>, t| Some(max.map_or(t, |m| m.max(t))))
}

/// Node id used when none is configured: the host name, or `node`.
pub fn default_node_id() -> String {
    System::host_name()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "node".to_string())
}

impl MetricsProvider for SystemCollector {
    async fn collect_snapshot(&mut self) -> Result<Snapshot> {
        if !self.primed {
            // usage is a delta between two refreshes
            time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
            self.primed = true;
        }

        let mut snapshot = Snapshot::new(self.node_id.clone())
            .with_timestamp(Utc::now())
            .with_cpu(self.collect_cpu()?);

        if self.collect_gpus {
            snapshot.gpus = tokio::task::spawn_blocking(nvidia::collect_gpus)
                .await
                .map_err(|e| TelemetryError::collector(format!("GPU query panicked: {}", e)))?;
        }
        if !self.tags.is_empty() {
            snapshot.tags = Some(self.tags.clone());
        }

        Ok(snapshot)
    }

    async fn start_stream(&mut self, interval_ms: u64) -> Result<BoxStream<'static, Snapshot>> {
        let interval = Duration::from_millis(interval_ms.max(1));
        let collector = self.fork()?;

        let stream = stream::unfold(
            (collector, time::interval(interval)),
            |(mut collector, mut interval)| async move {
                loop {
                    interval.tick().await;
                    match collector.collect_snapshot().await {
                        Ok(snapshot) => return Some((snapshot, (collector, interval))),
                        Err(err) => warn!("Failed to collect snapshot: {}", err),
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}
