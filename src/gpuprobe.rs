//! GPU Probe (§4.B): launches `nvidia-smi` per sampling cycle and tolerates
//! its absence or slowness. Column indices for `pmon` output (`sm%` at index
//! 3, `fbmem` at index 9) and the two-line header skip are taken from
//! `examples/original_source/src/resource_tracker/nvidia.py`, which `spec.md`
//! itself leaves unspecified.
//!
//! Grounded in `command.rs`'s `safe_command`, which already implements the
//! "launch, wait bounded, kill on timeout" contract the probe needs.

use std::collections::HashSet;
use std::time::Duration;

use crate::command::{safe_command, CmdError};
use crate::snapshot::GpuCounters;

const GPU_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Per-process GPU utilisation for the pid set currently in the descendant
/// tree. `pids` is empty means "all processes" (used by the host sampler's
/// own sanity checks only; the pid-tree sampler always passes a concrete
/// set).
pub fn probe_pid_gpu(pids: &HashSet<usize>) -> GpuCounters {
    match safe_command("nvidia-smi pmon -c 1 -s um -d 1", GPU_PROBE_TIMEOUT) {
        Ok(stdout) => parse_pmon(&stdout, Some(pids)),
        Err(_) => GpuCounters::default(),
    }
}

/// Whole-host GPU utilisation, aggregated across every GPU `nvidia-smi`
/// reports for the machine.
pub fn probe_host_gpu() -> GpuCounters {
    let cmd = "nvidia-smi --query-gpu=index,utilization.gpu,memory.used --format=csv,noheader,nounits";
    match safe_command(cmd, GPU_PROBE_TIMEOUT) {
        Ok(stdout) => parse_query_gpu(&stdout),
        Err(_) => GpuCounters::default(),
    }
}

fn parse_pmon(output: &str, pids: Option<&HashSet<usize>>) -> GpuCounters {
    let mut counters = GpuCounters::default();
    for (index, line) in output.lines().enumerate() {
        if index < 2 {
            continue; // skip the two header lines
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() <= 9 {
            continue;
        }
        let pid: usize = match parts[1].parse() {
            Ok(p) => p,
            Err(_) => continue,
        };
        if let Some(pids) = pids {
            if !pids.contains(&pid) {
                continue;
            }
        }
        let gpu_index: usize = match parts[0].parse() {
            Ok(i) => i,
            Err(_) => continue,
        };
        let mut usage = 0.0;
        if parts[3] != "-" {
            if let Ok(sm) = parts[3].parse::<f64>() {
                usage = sm;
                counters.gpu_utilized_indexes.insert(gpu_index);
            }
        }
        counters.gpu_usage += usage / 100.0;
        if let Ok(vram) = parts[9].parse::<f64>() {
            counters.gpu_vram_mib += vram;
        }
    }
    counters
}

fn parse_query_gpu(output: &str) -> GpuCounters {
    let mut counters = GpuCounters::default();
    for line in output.lines() {
        let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
        if parts.len() < 3 {
            continue;
        }
        let gpu_index: usize = match parts[0].parse() {
            Ok(i) => i,
            Err(_) => continue,
        };
        let utilization: f64 = parts[1].parse().unwrap_or(0.0);
        let vram: f64 = parts[2].parse().unwrap_or(0.0);
        if utilization > 0.0 {
            counters.gpu_utilized_indexes.insert(gpu_index);
        }
        counters.gpu_usage += utilization / 100.0;
        counters.gpu_vram_mib += vram;
    }
    counters
}

/// Whether the binary itself is unavailable, used by server inventory to
/// decide `gpu_count == 0` without shelling out twice.
pub fn nvidia_smi_absent() -> bool {
    matches!(
        safe_command("nvidia-smi --query-gpu=count --format=csv,noheader", GPU_PROBE_TIMEOUT),
        Err(CmdError::CouldNotStart(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const PMON_SAMPLE: &str = "\
# gpu        pid  type    sm   mem   enc   dec   jpg   ofa    fb   command
# Idx          #   C/G     %     %     %     %     %     %    MB   name
    0       1234     C    42    10     -     -     -     -  1024   python
    0       5678     C     -     -     -     -     -     -     0   sleep
    1       1234     C    99     5     -     -     -     -   512   python
";

    #[test]
    fn pmon_skips_header_and_filters_by_pid() {
        let mut pids = HashSet::new();
        pids.insert(1234usize);
        let counters = parse_pmon(PMON_SAMPLE, Some(&pids));
        assert_eq!(counters.gpu_utilized_indexes.len(), 2);
        assert!((counters.gpu_usage - 1.41).abs() < 1e-9);
        assert_eq!(counters.gpu_vram_mib, 1536.0);
    }

    #[test]
    fn pmon_dash_usage_means_not_running_and_is_not_utilized() {
        let mut pids = HashSet::new();
        pids.insert(5678usize);
        let counters = parse_pmon(PMON_SAMPLE, Some(&pids));
        assert_eq!(counters.gpu_usage, 0.0);
        assert!(counters.gpu_utilized_indexes.is_empty());
    }

    #[test]
    fn query_gpu_aggregates_all_rows() {
        let sample = "0, 55, 2048\n1, 0, 0\n";
        let counters = parse_query_gpu(sample);
        assert_eq!(counters.gpu_utilized_indexes.len(), 1);
        assert!((counters.gpu_usage - 0.55).abs() < 1e-9);
        assert_eq!(counters.gpu_vram_mib, 2048.0);
    }
}
