//! Aggregation / Stats (§4.F): means/maxes over the pid-tree table, host
//! totals, the size recommendation, and the "Shared"/"Dedicated" allocation
//! label. Pure functions over `Table` so they can be tested without a real
//! sampling run.

use crate::artifact::{MeanMax, Recommendation, Traffic};
use crate::table::Table;
use crate::util::{round_memory, two_places};

fn mean_max(table: &Table, column: &str) -> MeanMax {
    let values: Vec<f64> = match table.column(column) {
        Ok(cells) => cells.iter().filter_map(|c| c.as_f64()).collect(),
        Err(_) => Vec::new(),
    };
    if values.is_empty() {
        return MeanMax::default();
    }
    let sum: f64 = values.iter().sum();
    let max = values.iter().cloned().fold(f64::MIN, f64::max);
    MeanMax {
        mean: two_places(sum / values.len() as f64),
        max: two_places(max),
    }
}

fn sum_column(table: &Table, column: &str) -> u64 {
    match table.column(column) {
        Ok(cells) => cells.iter().filter_map(|c| c.as_f64()).sum::<f64>() as u64,
        Err(_) => 0,
    }
}

fn max_column(table: &Table, column: &str) -> f64 {
    match table.column(column) {
        Ok(cells) => cells
            .iter()
            .filter_map(|c| c.as_f64())
            .fold(f64::MIN, f64::max),
        Err(_) => 0.0,
    }
    .max(0.0)
}

/// Recommendation string components (§4.F): `gpu`/`vram` are only present
/// when the corresponding mean/max is nonzero.
pub fn recommendation(cpu_usage: &MeanMax, memory: &MeanMax, gpu_usage: &MeanMax, gpu_vram: &MeanMax) -> Recommendation {
    let cpu = cpu_usage.mean.ceil().max(0.0) as u64;
    let memory_mb = round_memory(memory.max * 1.2);
    let gpu = if gpu_usage.mean > 0.0 {
        Some(gpu_usage.max.ceil().max(0.0) as u64)
    } else {
        None
    };
    let vram_gb = if gpu_vram.max > 0.0 {
        Some((gpu_vram.max / 1024.0).ceil().max(0.0) as u64)
    } else {
        None
    };
    Recommendation {
        cpu,
        memory_mb,
        gpu,
        vram_gb,
    }
}

/// "Shared" if the host column's mean exceeds the task column's mean by
/// either tolerance; "Dedicated" otherwise (§4.F "Server allocation label").
fn exceeds_tolerance(host_mean: f64, task_mean: f64, absolute: f64, multiplicative: f64) -> bool {
    host_mean > task_mean + absolute || host_mean > task_mean * multiplicative
}

pub fn allocation_label(
    task_cpu_usage: &MeanMax,
    host_cpu_usage: &MeanMax,
    task_memory: &MeanMax,
    host_memory: &MeanMax,
    task_gpu_usage: &MeanMax,
    host_gpu_usage: &MeanMax,
    task_gpu_vram: &MeanMax,
    host_gpu_vram: &MeanMax,
) -> &'static str {
    let shared = exceeds_tolerance(host_cpu_usage.mean, task_cpu_usage.mean, 0.25, 1.25)
        || exceeds_tolerance(host_memory.mean, task_memory.mean, 512.0 * 1024.0, 1.5)
        || exceeds_tolerance(host_gpu_usage.mean, task_gpu_usage.mean, 0.2, 1.25)
        || exceeds_tolerance(host_gpu_vram.mean, task_gpu_vram.mean, 512.0, 1.25);
    if shared {
        "Shared"
    } else {
        "Dedicated"
    }
}

pub struct StatsInput<'a> {
    pub pid_tracker: &'a Table,
    pub host_tracker: &'a Table,
    pub t_start: f64,
    pub t_end: f64,
}

pub fn compute(input: &StatsInput) -> (f64, MeanMax, MeanMax, MeanMax, MeanMax, MeanMax, f64, Traffic, Recommendation) {
    let duration = two_places(input.t_end - input.t_start);

    let cpu_usage = mean_max(input.pid_tracker, "cpu_usage");
    let memory = mean_max(input.pid_tracker, "memory");
    let gpu_usage = mean_max(input.pid_tracker, "gpu_usage");
    let gpu_vram = mean_max(input.pid_tracker, "gpu_vram");
    let gpu_utilized = mean_max(input.pid_tracker, "gpu_utilized");

    let disk_space_used_gb_max = max_column(input.host_tracker, "disk_space_used_gb");
    let traffic = Traffic {
        inbound: sum_column(input.host_tracker, "net_recv_bytes"),
        outbound: sum_column(input.host_tracker, "net_sent_bytes"),
    };

    let rec = recommendation(&cpu_usage, &memory, &gpu_usage, &gpu_vram);

    (
        duration,
        cpu_usage,
        memory,
        gpu_usage,
        gpu_vram,
        gpu_utilized,
        disk_space_used_gb_max,
        traffic,
        rec,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;

    fn column(values: &[f64]) -> Vec<Cell> {
        values.iter().map(|v| Cell::Number(*v)).collect()
    }

    #[test]
    fn mean_max_computes_expected_values() {
        let table = Table::from_columns(vec![("cpu_usage".to_string(), column(&[0.1, 0.2, 0.3]))]).unwrap();
        let result = mean_max(&table, "cpu_usage");
        assert_eq!(result.mean, 0.2);
        assert_eq!(result.max, 0.3);
    }

    #[test]
    fn recommendation_omits_gpu_and_vram_when_unused() {
        let cpu = MeanMax { mean: 0.4, max: 0.6 };
        let mem = MeanMax { mean: 500.0, max: 900.0 };
        let gpu = MeanMax::default();
        let vram = MeanMax::default();
        let rec = recommendation(&cpu, &mem, &gpu, &vram);
        assert_eq!(rec.cpu, 1);
        assert_eq!(rec.memory_mb, 1024);
        assert!(rec.gpu.is_none());
        assert!(rec.vram_gb.is_none());
    }

    #[test]
    fn recommendation_includes_gpu_and_vram_when_used() {
        let cpu = MeanMax::default();
        let mem = MeanMax::default();
        let gpu = MeanMax { mean: 0.5, max: 1.8 };
        let vram = MeanMax { mean: 1000.0, max: 4096.0 };
        let rec = recommendation(&cpu, &mem, &gpu, &vram);
        assert_eq!(rec.gpu, Some(2));
        assert_eq!(rec.vram_gb, Some(4));
    }

    #[test]
    fn allocation_is_shared_when_host_cpu_usage_exceeds_tolerance() {
        let task = MeanMax { mean: 0.2, max: 0.3 };
        let host = MeanMax { mean: 1.0, max: 1.0 };
        let zero = MeanMax::default();
        let label = allocation_label(&task, &host, &zero, &zero, &zero, &zero, &zero, &zero);
        assert_eq!(label, "Shared");
    }

    #[test]
    fn allocation_is_dedicated_when_host_matches_task_closely() {
        let task = MeanMax { mean: 0.5, max: 0.6 };
        let host = MeanMax { mean: 0.55, max: 0.6 };
        let zero = MeanMax::default();
        let label = allocation_label(&task, &host, &zero, &zero, &zero, &zero, &zero, &zero);
        assert_eq!(label, "Dedicated");
    }
}
