//! Cross-platform process-library Counter Source (§4.A, fallback provider).
//!
//! Grounded on `examples/original_source/src/resource_tracker/tracker_psutil.py`,
//! which builds on Python's `psutil`; the practical Rust analogue used
//! throughout the retrieval pack's other process/resource monitors is the
//! `sysinfo` crate (see SPEC_FULL.md's dependency-stack section). `sysinfo`
//! does not expose PSS/USS on Linux the way `psutil` does, so this provider
//! always falls through to RSS — the "reduced fidelity" the spec explicitly
//! allows for non-primary sources (§1 Non-goals). Likewise `sysinfo` reports
//! CPU usage as an instantaneous percentage rather than psutil's cumulative
//! `cpu_times()`, so this provider integrates that percentage over wall time
//! to synthesise a monotonically increasing tick counter compatible with the
//! same `(new - old) / dt` differencing the kernel provider uses.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::counter::{CounterSource, Implementation};
use crate::gpuprobe;
use crate::snapshot::{HostSnapshot, PidSnapshot};

const SYNTHETIC_CLOCK_TICKS_PER_SEC: usize = 100;

struct CpuIntegrator {
    last_t: f64,
    ticks: u64,
}

pub struct PsutilSource {
    system: RefCell<System>,
    pid_integrators: RefCell<HashMap<usize, CpuIntegrator>>,
    host_integrator: RefCell<Option<CpuIntegrator>>,
}

impl PsutilSource {
    pub fn new() -> PsutilSource {
        let mut system = System::new();
        system.refresh_all();
        PsutilSource {
            system: RefCell::new(system),
            pid_integrators: RefCell::new(HashMap::new()),
            host_integrator: RefCell::new(None),
        }
    }

    fn now() -> f64 {
        crate::procfsapi::unix_now() as f64
    }

    fn integrate(
        store: &mut HashMap<usize, CpuIntegrator>,
        pid: usize,
        now: f64,
        cpu_usage_percent: f64,
    ) -> u64 {
        let entry = store.entry(pid).or_insert(CpuIntegrator { last_t: now, ticks: 0 });
        let dt = (now - entry.last_t).max(0.0);
        let added = (cpu_usage_percent / 100.0) * dt * SYNTHETIC_CLOCK_TICKS_PER_SEC as f64;
        entry.ticks += added.max(0.0) as u64;
        entry.last_t = now;
        entry.ticks
    }
}

impl Default for PsutilSource {
    fn default() -> Self {
        PsutilSource::new()
    }
}

impl CounterSource for PsutilSource {
    fn implementation(&self) -> Implementation {
        Implementation::Psutil
    }

    fn pid_snapshot(&self, pid: usize, include_children: bool) -> PidSnapshot {
        let t = Self::now();
        let mut system = self.system.borrow_mut();
        system.refresh_processes_specifics(ProcessesToUpdate::All, ProcessRefreshKind::everything());

        let target_pid = Pid::from_u32(pid as u32);
        let mut tree: Vec<Pid> = vec![target_pid];
        if include_children {
            for (candidate_pid, process) in system.processes() {
                if *candidate_pid == target_pid {
                    continue;
                }
                if let Some(parent) = process.parent() {
                    if is_descendant(&system, parent, target_pid) {
                        tree.push(*candidate_pid);
                    }
                }
            }
        }
        let children_count = tree.len().saturating_sub(1);

        let mut memory_kib = 0u64;
        let mut read_bytes = 0u64;
        let mut write_bytes = 0u64;
        let mut cpu_usage_percent = 0.0;
        let mut pids_for_gpu = HashSet::new();
        for p in &tree {
            pids_for_gpu.insert(p.as_u32() as usize);
            if let Some(process) = system.process(*p) {
                memory_kib += process.memory() / 1024;
                let disk = process.disk_usage();
                read_bytes += disk.total_read_bytes;
                write_bytes += disk.total_written_bytes;
                cpu_usage_percent += process.cpu_usage() as f64;
            }
        }

        let ticks = {
            let mut integrators = self.pid_integrators.borrow_mut();
            Self::integrate(&mut integrators, pid, t, cpu_usage_percent)
        };
        let gpu = gpuprobe::probe_pid_gpu(&pids_for_gpu);

        PidSnapshot {
            t,
            pid,
            children_count,
            utime_ticks: ticks,
            stime_ticks: 0,
            memory_kib,
            read_bytes,
            write_bytes,
            gpu,
        }
    }

    fn host_snapshot(&self, disk_space_anchor: &str) -> HostSnapshot {
        let t = Self::now();
        let mut system = self.system.borrow_mut();
        system.refresh_all();

        let process_count = system.processes().len();
        let mem_free_kib = system.free_memory() / 1024;
        let mem_used_kib = system.used_memory() / 1024;
        // sysinfo does not break out buffers/cache portably; only the
        // kernel-pseudo-filesystem provider can see them precisely.
        let mem_buffers_kib = 0;
        let mem_cached_kib = 0;
        let mem_active_anon_kib = 0;
        let mem_inactive_anon_kib = 0;

        let cpu_usage_percent: f64 = system.cpus().iter().map(|c| c.cpu_usage() as f64).sum::<f64>()
            / system.cpus().len().max(1) as f64;
        let ticks = {
            let mut guard = self.host_integrator.borrow_mut();
            let entry = guard.get_or_insert(CpuIntegrator { last_t: t, ticks: 0 });
            let dt = (t - entry.last_t).max(0.0);
            let added =
                (cpu_usage_percent / 100.0) * dt * SYNTHETIC_CLOCK_TICKS_PER_SEC as f64 * system.cpus().len() as f64;
            entry.ticks += added.max(0.0) as u64;
            entry.last_t = t;
            entry.ticks
        };

        let disks = sysinfo::Disks::new_with_refreshed_list();
        let (disk_space_total_gib, disk_space_used_gib, disk_space_free_gib) =
            disk_space_for_anchor(&disks, disk_space_anchor);

        let networks = sysinfo::Networks::new_with_refreshed_list();
        let mut net_recv_bytes = 0u64;
        let mut net_sent_bytes = 0u64;
        for (name, data) in &networks {
            if name == "lo" {
                continue;
            }
            net_recv_bytes += data.total_received();
            net_sent_bytes += data.total_transmitted();
        }

        let gpu = gpuprobe::probe_host_gpu();

        HostSnapshot {
            t,
            process_count,
            utime_ticks: ticks,
            stime_ticks: 0,
            mem_free_kib,
            mem_used_kib,
            mem_buffers_kib,
            mem_cached_kib,
            mem_active_anon_kib,
            mem_inactive_anon_kib,
            disk_space_total_gib,
            disk_space_used_gib,
            disk_space_free_gib,
            disks: HashMap::new(),
            net_recv_bytes,
            net_sent_bytes,
            gpu,
        }
    }

    fn clock_ticks_per_sec(&self) -> usize {
        SYNTHETIC_CLOCK_TICKS_PER_SEC
    }
}

fn is_descendant(system: &System, candidate_parent: Pid, target: Pid) -> bool {
    let mut current = Some(candidate_parent);
    let mut hops = 0;
    while let Some(pid) = current {
        if pid == target {
            return true;
        }
        hops += 1;
        if hops > 4096 {
            return false; // guard against a parent-pointer cycle
        }
        current = system.process(pid).and_then(|p| p.parent());
    }
    false
}

fn disk_space_for_anchor(disks: &sysinfo::Disks, anchor: &str) -> (f64, f64, f64) {
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    let anchor_path = std::path::Path::new(anchor);
    let mut best: Option<(&std::path::Path, u64, u64)> = None;
    for disk in disks {
        let mount = disk.mount_point();
        if anchor_path.starts_with(mount) {
            let better = match best {
                Some((current_mount, _, _)) => mount.as_os_str().len() > current_mount.as_os_str().len(),
                None => true,
            };
            if better {
                best = Some((mount, disk.total_space(), disk.available_space()));
            }
        }
    }
    match best {
        Some((_, total, available)) => {
            let used = total.saturating_sub(available);
            (total as f64 / GIB, used as f64 / GIB, available as f64 / GIB)
        }
        None => (0.0, 0.0, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_integration_is_monotonic_and_nonnegative() {
        let mut store = HashMap::new();
        let t0 = PsutilSource::integrate(&mut store, 1, 10.0, 50.0);
        let t1 = PsutilSource::integrate(&mut store, 1, 11.0, 50.0);
        assert!(t1 >= t0);
    }
}
