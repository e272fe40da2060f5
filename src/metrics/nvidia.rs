//! NVIDIA GPU readings via `nvidia-smi`.

use crate::metrics::data::GpuBlock;
use std::process::Command;
use tracing::debug;

/// Arguments asking `nvidia-smi` for one CSV line per GPU.
pub const NVIDIA_SMI_ARGS: [&str; 2] = [
    "--query-gpu=name,temperature.gpu,utilization.gpu,memory.used,power.draw",
    "--format=csv,noheader,nounits",
];

/// Query all NVIDIA GPUs. A missing or failing tool means no GPUs.
pub fn collect_gpus() -> Vec<GpuBlock> {
    match Command::new("nvidia-smi").args(NVIDIA_SMI_ARGS).output() {
        Ok(output) if output.status.success() => {
            parse_nvidia_smi_csv(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            debug!("nvidia-smi exited with {}", output.status);
            Vec::new()
        }
        Err(e) => {
            debug!("nvidia-smi unavailable: {}", e);
            Vec::new()
        }
    }
}

/// Parse `name, temp, util, mem, power` lines. Lines with fewer than five
/// fields are skipped; unparsable numbers (e.g. `[N/A]`) read as zero.
pub fn parse_nvidia_smi_csv(output: &str) -> Vec<GpuBlock> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() < 5 {
                return None;
            }
            Some(GpuBlock {
                name: parts[0].trim().to_string(),
                temp_c: parse_number(parts[1]),
                usage_pct: parse_number(parts[2]),
                mem_used_mb: parse_number(parts[3]),
                power_w: parse_number(parts[4]),
            })
        })
        .collect()
}

fn parse_number(raw: &str) -> f64 {
    raw.trim().parse().unwrap_or(0.0)
}
