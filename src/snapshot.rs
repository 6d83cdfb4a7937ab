//! Immutable counter snapshots (§3) and the differencing logic that turns
//! two consecutive snapshots of the same kind into one `SampleRecord`.
//!
//! All cumulative counters are clamped at zero when differenced: a pid or
//! network interface can disappear and come back with a lower counter, and
//! we must never let that show up as a negative delta (§9 "Counter resets
//! and pid disappearance").

use std::collections::HashMap;
use std::collections::HashSet;

/// GPU fields shared by the pid-tree and host snapshots. `gpu_usage` is the
/// sum, across GPUs, of instantaneous utilisation fractions (so it can
/// exceed 1.0 when more than one GPU is in use); `gpu_utilized_indexes` is
/// the set of GPU indices seen busy. Per §9, this set is a running union
/// across the whole run and is deliberately never differenced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuCounters {
    pub gpu_usage: f64,
    pub gpu_vram_mib: f64,
    pub gpu_utilized_indexes: HashSet<usize>,
}

impl GpuCounters {
    pub fn union_from(&mut self, other: &GpuCounters) {
        self.gpu_usage += other.gpu_usage;
        self.gpu_vram_mib += other.gpu_vram_mib;
        for ix in &other.gpu_utilized_indexes {
            self.gpu_utilized_indexes.insert(*ix);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PidSnapshot {
    pub t: f64,
    pub pid: usize,
    pub children_count: usize,
    pub utime_ticks: u64,
    pub stime_ticks: u64,
    pub memory_kib: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub gpu: GpuCounters,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskCounters {
    pub read_sectors: u64,
    pub write_sectors: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostSnapshot {
    pub t: f64,
    pub process_count: usize,
    pub utime_ticks: u64,
    pub stime_ticks: u64,
    pub mem_free_kib: u64,
    pub mem_used_kib: u64,
    pub mem_buffers_kib: u64,
    pub mem_cached_kib: u64,
    pub mem_active_anon_kib: u64,
    pub mem_inactive_anon_kib: u64,
    pub disk_space_total_gib: f64,
    pub disk_space_used_gib: f64,
    pub disk_space_free_gib: f64,
    pub disks: HashMap<String, DiskCounters>,
    pub net_recv_bytes: u64,
    pub net_sent_bytes: u64,
    pub gpu: GpuCounters,
}

/// Result of differencing two consecutive pid-tree snapshots (§3
/// SampleRecord). `cpu_usage` is instantaneous for the interval; the byte
/// fields are deltas, clamped to zero.
#[derive(Debug, Clone, PartialEq)]
pub struct PidSampleRecord {
    pub t: f64,
    pub children_count: usize,
    pub utime_ticks: u64,
    pub stime_ticks: u64,
    pub cpu_usage: f64,
    pub memory_kib: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub gpu_usage: f64,
    pub gpu_vram_mib: f64,
    pub gpu_utilized: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostSampleRecord {
    pub t: f64,
    pub process_count: usize,
    pub utime_ticks: u64,
    pub stime_ticks: u64,
    pub cpu_usage: f64,
    pub memory_free_kib: u64,
    pub memory_used_kib: u64,
    pub memory_buffers_kib: u64,
    pub memory_cached_kib: u64,
    pub memory_active_anon_kib: u64,
    pub memory_inactive_anon_kib: u64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub disk_space_total_gib: f64,
    pub disk_space_used_gib: f64,
    pub disk_space_free_gib: f64,
    pub net_recv_bytes: u64,
    pub net_sent_bytes: u64,
    pub gpu_usage: f64,
    pub gpu_vram_mib: f64,
    pub gpu_utilized: usize,
}

fn clamp_delta(new: u64, old: u64) -> u64 {
    new.saturating_sub(old)
}

/// `delta = max(0, new - old)` for counters, CPU usage derived from the
/// ticks delta divided by elapsed wall time and `SC_CLK_TCK` (§4.A).
///
/// `accumulated_gpu_indexes` is the Sampler Loop's running union of GPU
/// indices seen busy since the loop started (§9: accumulated, never
/// differenced); this call folds the current snapshot's indices into it and
/// reports the resulting size as `gpu_utilized`. `gpu_usage`/`gpu_vram_mib`
/// themselves stay instantaneous, taken straight from `cur`.
pub fn diff_pid(
    prev: &PidSnapshot,
    cur: &PidSnapshot,
    clock_ticks_per_sec: usize,
    accumulated_gpu_indexes: &mut HashSet<usize>,
) -> PidSampleRecord {
    let dt = (cur.t - prev.t).max(0.0);
    let dutime = clamp_delta(cur.utime_ticks, prev.utime_ticks);
    let dstime = clamp_delta(cur.stime_ticks, prev.stime_ticks);
    let cpu_usage = if dt > 0.0 && clock_ticks_per_sec > 0 {
        ((dutime + dstime) as f64 / (dt * clock_ticks_per_sec as f64)).max(0.0)
    } else {
        0.0
    };
    for ix in &cur.gpu.gpu_utilized_indexes {
        accumulated_gpu_indexes.insert(*ix);
    }

    PidSampleRecord {
        t: cur.t,
        children_count: cur.children_count,
        utime_ticks: cur.utime_ticks,
        stime_ticks: cur.stime_ticks,
        cpu_usage: crate::util::three_places(cpu_usage),
        memory_kib: cur.memory_kib,
        read_bytes: clamp_delta(cur.read_bytes, prev.read_bytes),
        write_bytes: clamp_delta(cur.write_bytes, prev.write_bytes),
        gpu_usage: cur.gpu.gpu_usage,
        gpu_vram_mib: cur.gpu.gpu_vram_mib,
        gpu_utilized: accumulated_gpu_indexes.len(),
    }
}

pub fn diff_host(
    prev: &HostSnapshot,
    cur: &HostSnapshot,
    clock_ticks_per_sec: usize,
    sector_size_bytes: impl Fn(&str) -> u64,
    accumulated_gpu_indexes: &mut HashSet<usize>,
) -> HostSampleRecord {
    let dt = (cur.t - prev.t).max(0.0);
    let dutime = clamp_delta(cur.utime_ticks, prev.utime_ticks);
    let dstime = clamp_delta(cur.stime_ticks, prev.stime_ticks);
    let cpu_usage = if dt > 0.0 && clock_ticks_per_sec > 0 {
        ((dutime + dstime) as f64 / (dt * clock_ticks_per_sec as f64)).max(0.0)
    } else {
        0.0
    };

    let mut disk_read_bytes: u64 = 0;
    let mut disk_write_bytes: u64 = 0;
    for (dev, counters) in &cur.disks {
        let sector_size = sector_size_bytes(dev);
        let prev_counters = prev.disks.get(dev).cloned().unwrap_or_default();
        disk_read_bytes += clamp_delta(counters.read_sectors, prev_counters.read_sectors) * sector_size;
        disk_write_bytes += clamp_delta(counters.write_sectors, prev_counters.write_sectors) * sector_size;
    }

    for ix in &cur.gpu.gpu_utilized_indexes {
        accumulated_gpu_indexes.insert(*ix);
    }

    HostSampleRecord {
        t: cur.t,
        process_count: cur.process_count,
        utime_ticks: cur.utime_ticks,
        stime_ticks: cur.stime_ticks,
        cpu_usage: crate::util::three_places(cpu_usage),
        memory_free_kib: cur.mem_free_kib,
        memory_used_kib: cur.mem_used_kib,
        memory_buffers_kib: cur.mem_buffers_kib,
        memory_cached_kib: cur.mem_cached_kib,
        memory_active_anon_kib: cur.mem_active_anon_kib,
        memory_inactive_anon_kib: cur.mem_inactive_anon_kib,
        disk_read_bytes,
        disk_write_bytes,
        disk_space_total_gib: cur.disk_space_total_gib,
        disk_space_used_gib: cur.disk_space_used_gib,
        disk_space_free_gib: cur.disk_space_free_gib,
        net_recv_bytes: clamp_delta(cur.net_recv_bytes, prev.net_recv_bytes),
        net_sent_bytes: clamp_delta(cur.net_sent_bytes, prev.net_sent_bytes),
        gpu_usage: cur.gpu.gpu_usage,
        gpu_vram_mib: cur.gpu.gpu_vram_mib,
        gpu_utilized: accumulated_gpu_indexes.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid_snap(t: f64, utime: u64, stime: u64, mem: u64, rb: u64, wb: u64) -> PidSnapshot {
        PidSnapshot {
            t,
            pid: 100,
            children_count: 0,
            utime_ticks: utime,
            stime_ticks: stime,
            memory_kib: mem,
            read_bytes: rb,
            write_bytes: wb,
            gpu: GpuCounters::default(),
        }
    }

    #[test]
    fn cpu_usage_is_nonnegative_and_deltas_clamp() {
        let prev = pid_snap(0.0, 100, 50, 1000, 200, 100);
        // Counters reset lower than before: must clamp to zero, not go negative.
        let cur = pid_snap(1.0, 90, 40, 1000, 150, 50);
        let mut acc = HashSet::new();
        let rec = diff_pid(&prev, &cur, 100, &mut acc);
        assert!(rec.cpu_usage >= 0.0);
        assert_eq!(rec.read_bytes, 0);
        assert_eq!(rec.write_bytes, 0);
    }

    #[test]
    fn cpu_usage_scales_with_ticks_over_interval() {
        let prev = pid_snap(0.0, 0, 0, 1000, 0, 0);
        let cur = pid_snap(1.0, 100, 0, 1000, 0, 0);
        let mut acc = HashSet::new();
        let rec = diff_pid(&prev, &cur, 100, &mut acc);
        assert_eq!(rec.cpu_usage, 1.0);
    }

    #[test]
    fn gpu_utilized_indexes_union_across_cycles() {
        let mut cur_gpu1 = GpuCounters::default();
        cur_gpu1.gpu_utilized_indexes.insert(0);
        let mut cur_gpu2 = GpuCounters::default();
        cur_gpu2.gpu_utilized_indexes.insert(1);

        let baseline = pid_snap(0.0, 0, 0, 1000, 0, 0);
        let cycle1 = PidSnapshot {
            gpu: cur_gpu1,
            ..pid_snap(1.0, 0, 0, 1000, 0, 0)
        };
        let cycle2 = PidSnapshot {
            gpu: cur_gpu2,
            ..pid_snap(2.0, 0, 0, 1000, 0, 0)
        };

        let mut acc = HashSet::new();
        let rec1 = diff_pid(&baseline, &cycle1, 100, &mut acc);
        assert_eq!(rec1.gpu_utilized, 1);
        // GPU 1 only appears this cycle, but GPU 0 stays counted: the
        // accumulated set is a union across the whole run, never reset.
        let rec2 = diff_pid(&cycle1, &cycle2, 100, &mut acc);
        assert_eq!(rec2.gpu_utilized, 2);
    }
}
