//! Flattening of a [`Snapshot`] into labeled metric samples.

use crate::metrics::data::{names, MetricSample, Snapshot};
use crate::metrics::labels::Labels;
use chrono::{DateTime, Utc};

/// Turn a snapshot into its ordered sequence of samples, all stamped `ts`.
///
/// Emission order is fixed: the CPU block first (`cpu.temp_c`,
/// `cpu.usage_pct`, `cpu.load_avg` always; `cpu.freq_mhz` and `cpu.cores`
/// only when positive), then four `gpu.*` samples per GPU entry in input
/// order, each labeled `gpu=<name>`. Snapshot tags are merged into every
/// sample afterwards and win over colliding keys, including `gpu`.
pub fn normalize(snapshot: &Snapshot, ts: DateTime<Utc>) -> Vec<MetricSample> {
    let mut out = Vec::with_capacity(5 + snapshot.gpus.len() * 4);

    let mut push = |metric: &str, value: f64, labels: &Labels| {
        out.push(MetricSample {
            time: ts,
            metric: metric.to_string(),
            value,
            labels: labels.clone(),
        });
    };

    if let Some(cpu) = &snapshot.cpu {
        let none = Labels::new();
        push(names::CPU_TEMP_C, cpu.temp_c, &none);
        push(names::CPU_USAGE_PCT, cpu.usage_pct, &none);
        push(names::CPU_LOAD_AVG, cpu.load_avg, &none);
        if let Some(freq) = cpu.freq_mhz.filter(|f| *f > 0.0) {
            push(names::CPU_FREQ_MHZ, freq, &none);
        }
        if let Some(cores) = cpu.cores.filter(|c| *c > 0) {
            push(names::CPU_CORES, cores as f64, &none);
        }
    }

    for gpu in &snapshot.gpus {
        let labels = Labels::single(names::GPU_LABEL, gpu.name.as_str());
        push(names::GPU_TEMP_C, gpu.temp_c, &labels);
        push(names::GPU_USAGE_PCT, gpu.usage_pct, &labels);
        push(names::GPU_MEM_USED_MB, gpu.mem_used_mb, &labels);
        push(names::GPU_POWER_W, gpu.power_w, &labels);
    }

    if let Some(tags) = snapshot.tags.as_ref().filter(|t| !t.is_empty()) {
        for sample in &mut out {
            sample.labels.merge(tags);
        }
    }

    out
}
