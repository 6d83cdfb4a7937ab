//! Sampler Supervisor (§4.D): orchestrates a measured task run around two
//! Sampler Loops running as isolated OS processes, not threads (§5 "a
//! GIL-like interpreter lock, signal handling, or SIGKILL in the user task
//! from starving the sampler" — Rust has no GIL, but a crashing user task
//! sharing this process's signal mask would still be enough reason to keep
//! the subprocess model, per §9's redesign note).

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};

use crate::artifact::{Artifact, ErrorDetail, MeanMax, Stats};
use crate::config::SupervisorConfig;
use crate::counter::Implementation;
use crate::external::{CloudMetadataProbe, HistoricalLookup, PricingLookup, ServerInventory};
use crate::stats;
use crate::table::{Cell, Table};

pub struct Supervisor<'a> {
    pub config: SupervisorConfig,
    pub cloud_probe: &'a dyn CloudMetadataProbe,
    pub server_inventory: &'a dyn ServerInventory,
    pub pricing_lookup: &'a dyn PricingLookup,
    pub historical_lookup: &'a dyn HistoricalLookup,
}

struct SamplerWorker {
    child: Child,
    output_path: std::path::PathBuf,
}

enum WorkerError {
    Crashed(String),
}

impl<'a> Supervisor<'a> {
    /// Run `task` (an external command) while sampling it and the host.
    /// `pid_to_watch` is the pid whose tree the pid-tree sampler follows —
    /// typically the task's own pid once spawned.
    pub fn run_task(&self, step_name: &str, mut task: Command) -> Artifact {
        let pid_output = unique_temp_path("taskgauge-pid");
        let host_output = unique_temp_path("taskgauge-host");
        let disk_space_anchor = "/";

        let (error_tx, error_rx) = bounded::<WorkerError>(2);

        let t_start = now_secs();
        let mut child = match task.stdout(Stdio::inherit()).stderr(Stdio::inherit()).spawn() {
            Ok(child) => child,
            Err(e) => return Artifact::error("TaskSpawnFailure", e.to_string()),
        };
        let task_pid = child.id() as usize;

        let interval_flag = format!("--interval={}", self.config.interval);
        let task_pid_string = task_pid.to_string();
        let pid_worker = spawn_sampler_worker(
            &["sample-pid", &task_pid_string],
            &pid_output,
            &[&interval_flag],
            error_tx.clone(),
        );
        let host_worker = spawn_sampler_worker(
            &["sample-host", disk_space_anchor],
            &host_output,
            &[&interval_flag],
            error_tx.clone(),
        );
        drop(error_tx);

        // The child is its own OS process, so probing cloud metadata here
        // genuinely overlaps with task execution without needing a Rust
        // thread of our own (§5 "lightweight cooperative worker").
        let cloud_probe_result = self.cloud_probe.detect_cloud();
        let server_info = self.server_inventory.server_info();
        let _ = child.wait();
        let t_end = now_secs();

        let pid_worker = match pid_worker {
            Ok(w) => w,
            Err(_) => return Self::crash_artifact(&error_rx, &host_output, &pid_output),
        };
        let mut host_worker = match host_worker {
            Ok(w) => w,
            Err(_) => return Self::crash_artifact(&error_rx, &host_output, &pid_output),
        };

        // The pid sampler self-terminates on memory == 0; wait briefly for
        // it, then stop the host sampler (§4.D "kills the host sampler after
        // artifact assembly").
        wait_for_exit(pid_worker.child, Duration::from_secs(5));
        terminate(&mut host_worker.child);

        if let Ok(WorkerError::Crashed(message)) = error_rx.try_recv() {
            cleanup(&[&pid_output, &host_output]);
            return Artifact::Error {
                error: ErrorDetail {
                    error_type: "SamplerWorkerCrash".to_string(),
                    error_message: message,
                    traceback: String::new(),
                },
            };
        }

        let mut pid_table = match Table::from_csv_source(&pid_worker.output_path.to_string_lossy()) {
            Ok(t) => t,
            Err(e) => {
                cleanup(&[&pid_output, &host_output]);
                return Artifact::error("TableOperationError", e);
            }
        };
        let mut host_table = match Table::from_csv_source(&host_worker.output_path.to_string_lossy()) {
            Ok(t) => t,
            Err(e) => {
                cleanup(&[&pid_output, &host_output]);
                return Artifact::error("TableOperationError", e);
            }
        };

        let n = pid_table.len().min(host_table.len());
        pid_table = pid_table.head(n);
        host_table = host_table.head(n);

        if let Err(e) = annotate_memory_usage_bytes(&mut host_table) {
            cleanup(&[&pid_output, &host_output]);
            return Artifact::error("TableOperationError", e.to_string());
        }

        let input = stats::StatsInput {
            pid_tracker: &pid_table,
            host_tracker: &host_table,
            t_start,
            t_end,
        };
        let (duration, cpu_usage, memory, gpu_usage, gpu_vram, gpu_utilized, disk_space_used_gb_max, traffic, recommendation) =
            stats::compute(&input);

        let host_cpu_usage = column_mean_max(&host_table, "cpu_usage");
        let host_memory = column_mean_max(&host_table, "memory_usage_bytes");
        let host_gpu_usage = column_mean_max(&host_table, "gpu_usage");
        let host_gpu_vram = column_mean_max(&host_table, "gpu_vram");
        let allocation = stats::allocation_label(
            &cpu_usage,
            &host_cpu_usage,
            &memory,
            &host_memory,
            &gpu_usage,
            &host_gpu_usage,
            &gpu_vram,
            &host_gpu_vram,
        );

        let historical_stats = self.historical_lookup.historical_stats(step_name);

        let hourly_price_usd = self.pricing_lookup.hourly_price_usd(
            &cloud_probe_result.vendor,
            &cloud_probe_result.region,
            &cloud_probe_result.instance_type,
        );

        let artifact = Artifact::Ok {
            resource_tracker: crate::artifact::ResourceTrackerInfo::new(Implementation::Procfs),
            pid_tracker: pid_table,
            system_tracker: host_table,
            cloud_info: cloud_probe_result,
            server_info,
            hourly_price_usd,
            stats: Stats {
                duration,
                cpu_usage,
                memory_usage: memory,
                gpu_usage,
                gpu_vram,
                gpu_utilized,
                disk_space_used_gb_max,
                traffic,
                recommendation,
                allocation,
            },
            historical_stats,
        };

        cleanup(&[&pid_output, &host_output]);
        artifact
    }

    fn crash_artifact(error_rx: &Receiver<WorkerError>, host_output: &std::path::Path, pid_output: &std::path::Path) -> Artifact {
        cleanup(&[pid_output, host_output]);
        let message = match error_rx.try_recv() {
            Ok(WorkerError::Crashed(m)) => m,
            Err(_) => "sampler worker could not be started".to_string(),
        };
        Artifact::error("SamplerWorkerCrash", message)
    }
}

fn spawn_sampler_worker(
    args: &[&str],
    output_path: &std::path::Path,
    extra_args: &[&str],
    error_tx: crossbeam_channel::Sender<WorkerError>,
) -> Result<SamplerWorker, String> {
    let exe = std::env::current_exe().map_err(|e| e.to_string())?;
    let mut command = Command::new(exe);
    command.args(args).arg(output_path).args(extra_args);
    command.stdout(Stdio::null());
    command.stderr(Stdio::piped());
    let mut child = command.spawn().map_err(|e| e.to_string())?;

    if let Some(mut stderr) = child.stderr.take() {
        std::thread::spawn(move || {
            let mut buf = String::new();
            use std::io::Read;
            let _ = stderr.read_to_string(&mut buf);
            if !buf.trim().is_empty() {
                let _ = error_tx.send(WorkerError::Crashed(buf));
            }
        });
    }

    Ok(SamplerWorker {
        child,
        output_path: output_path.to_path_buf(),
    })
}

fn wait_for_exit(mut child: Child, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return,
        }
    }
}

fn terminate(child: &mut Child) {
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return;
            }
            _ => std::thread::sleep(Duration::from_millis(50)),
        }
    }
}

fn cleanup(paths: &[&std::path::Path]) {
    for path in paths {
        crate::csvsink::remove_best_effort(path);
    }
}

fn unique_temp_path(tag: &str) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("{tag}-{}-{}.csv", std::process::id(), crate::procfsapi::unix_now()));
    path
}

fn now_secs() -> f64 {
    crate::procfsapi::unix_now() as f64
}

fn column_mean_max(table: &Table, column: &str) -> MeanMax {
    let values: Vec<f64> = table
        .column(column)
        .map(|cells| cells.iter().filter_map(|c| c.as_f64()).collect())
        .unwrap_or_default();
    if values.is_empty() {
        return MeanMax::default();
    }
    let sum: f64 = values.iter().sum();
    let max = values.iter().cloned().fold(f64::MIN, f64::max);
    MeanMax {
        mean: sum / values.len() as f64,
        max,
    }
}

fn annotate_memory_usage_bytes(host_table: &mut Table) -> Result<(), crate::table::TableError> {
    let active = host_table.column("memory_active_anon")?.to_vec();
    let inactive = host_table.column("memory_inactive_anon")?.to_vec();
    let values: Vec<Cell> = active
        .iter()
        .zip(inactive.iter())
        .map(|(a, i)| Cell::Number((a.as_f64().unwrap_or(0.0) + i.as_f64().unwrap_or(0.0)) * 1024.0))
        .collect();
    host_table.set_column("memory_usage_bytes", values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::CloudInfo;

    struct StubCloudProbe;
    impl CloudMetadataProbe for StubCloudProbe {
        fn detect_cloud(&self) -> CloudInfo {
            CloudInfo::unknown()
        }
    }

    #[test]
    fn annotate_memory_usage_bytes_sums_anon_columns_in_kib_to_bytes() {
        let mut table = Table::from_columns(vec![
            ("memory_active_anon".to_string(), vec![Cell::Number(100.0)]),
            ("memory_inactive_anon".to_string(), vec![Cell::Number(50.0)]),
        ])
        .unwrap();
        annotate_memory_usage_bytes(&mut table).unwrap();
        assert_eq!(table.column("memory_usage_bytes").unwrap(), &[Cell::Number(150.0 * 1024.0)]);
    }
}
