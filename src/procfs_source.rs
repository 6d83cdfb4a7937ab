//! Kernel pseudo-filesystem Counter Source (§4.A, primary provider).
//!
//! Field layout is grounded directly in
//! `examples/original_source/src/resource_tracker/tracker.py` for the
//! per-pid statistics (`/proc/<pid>/stat`, `/proc/<pid>/smaps_rollup`,
//! `/proc/<pid>/io`), and in `spec.md` §4.A for the host-wide statistics,
//! which the retrieval pack's Python original does not carry a procfs
//! implementation of (only its psutil-backed one is present).

use std::cell::RefCell;
use std::collections::HashMap;

use crate::counter::{CounterSource, Implementation};
use crate::gpuprobe;
use crate::pidtree;
use crate::procfsapi::{parse_u64_field, ProcfsAPI};
use crate::snapshot::{DiskCounters, HostSnapshot, PidSnapshot};

const DEFAULT_SECTOR_SIZE_BYTES: u64 = 512;

pub struct ProcfsSource<F: ProcfsAPI> {
    fs: F,
    sector_size_cache: RefCell<HashMap<String, u64>>,
}

impl<F: ProcfsAPI> ProcfsSource<F> {
    pub fn new(fs: F) -> ProcfsSource<F> {
        ProcfsSource {
            fs,
            sector_size_cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn sector_size_bytes(&self, device: &str) -> u64 {
        if let Some(cached) = self.sector_size_cache.borrow().get(device) {
            return *cached;
        }
        let path = format!("/sys/block/{device}/queue/hw_sector_size");
        let size = self
            .fs
            .read_absolute(&path)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_SECTOR_SIZE_BYTES);
        self.sector_size_cache.borrow_mut().insert(device.to_string(), size);
        size
    }

    fn pss_kib(&self, pid: usize) -> u64 {
        match self.fs.read_to_string(&format!("{pid}/smaps_rollup")) {
            Ok(contents) => contents
                .lines()
                .find(|l| l.starts_with("Pss:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    // https://docs.kernel.org/filesystems/proc.html -- utime is field 14,
    // stime is field 15 (1-indexed); the cumulative child fields 16/17 must
    // not be used for ongoing monitoring since they only flush on child
    // exit (§4.A). We therefore always read `children=false` here and sum
    // the descendant set's own times separately.
    fn proc_times(&self, pid: usize) -> (u64, u64) {
        match self.fs.read_to_string(&format!("{pid}/stat")) {
            Ok(contents) => {
                // comm can contain spaces/parens; skip past the last ')'.
                let after_comm = match contents.rfind(')') {
                    Some(ix) => &contents[ix + 1..],
                    None => return (0, 0),
                };
                let fields: Vec<&str> = after_comm.split_whitespace().collect();
                // fields[0] here is field 3 (state) in the full record, so
                // utime (field 14) is fields[11], stime (field 15) is fields[12].
                let utime = parse_u64_field(&fields, 11, &contents, "stat", "utime").unwrap_or(0);
                let stime = parse_u64_field(&fields, 12, &contents, "stat", "stime").unwrap_or(0);
                (utime, stime)
            }
            Err(_) => (0, 0),
        }
    }

    fn proc_io(&self, pid: usize) -> (u64, u64) {
        match self.fs.read_to_string(&format!("{pid}/io")) {
            Ok(contents) => {
                let mut read_bytes = 0;
                let mut write_bytes = 0;
                for line in contents.lines() {
                    if let Some((key, value)) = line.split_once(": ") {
                        let value: u64 = value.trim().parse().unwrap_or(0);
                        match key {
                            "read_bytes" => read_bytes = value,
                            "write_bytes" => write_bytes = value,
                            _ => {}
                        }
                    }
                }
                (read_bytes, write_bytes)
            }
            Err(_) => (0, 0),
        }
    }
}

impl<F: ProcfsAPI> CounterSource for ProcfsSource<F> {
    fn implementation(&self) -> Implementation {
        Implementation::Procfs
    }

    fn pid_snapshot(&self, pid: usize, include_children: bool) -> PidSnapshot {
        let t = self.fs.now_in_secs_since_epoch() as f64;
        let descendants = if include_children {
            pidtree::descendants(&self.fs, pid)
        } else {
            Default::default()
        };

        let mut pss = self.pss_kib(pid);
        let (mut utime, mut stime) = self.proc_times(pid);
        let (mut read_bytes, mut write_bytes) = self.proc_io(pid);
        for child in &descendants {
            pss += self.pss_kib(*child);
            let (cu, cs) = self.proc_times(*child);
            utime += cu;
            stime += cs;
            let (cr, cw) = self.proc_io(*child);
            read_bytes += cr;
            write_bytes += cw;
        }

        let mut all_pids = descendants.clone();
        all_pids.insert(pid);
        let gpu = gpuprobe::probe_pid_gpu(&all_pids);

        PidSnapshot {
            t,
            pid,
            children_count: descendants.len(),
            utime_ticks: utime,
            stime_ticks: stime,
            memory_kib: pss,
            read_bytes,
            write_bytes,
            gpu,
        }
    }

    fn host_snapshot(&self, disk_space_anchor: &str) -> HostSnapshot {
        let t = self.fs.now_in_secs_since_epoch() as f64;
        let (process_count, utime, stime) = self.read_proc_stat();
        let (mem_free, mem_used, mem_buffers, mem_cached, mem_active_anon, mem_inactive_anon) =
            self.read_meminfo();
        let disks = self.read_diskstats();
        let (net_recv, net_sent) = self.read_net_dev();
        let (disk_total_gib, disk_used_gib, disk_free_gib) = read_disk_space_gib(disk_space_anchor);
        let gpu = gpuprobe::probe_host_gpu();

        HostSnapshot {
            t,
            process_count,
            utime_ticks: utime,
            stime_ticks: stime,
            mem_free_kib: mem_free,
            mem_used_kib: mem_used,
            mem_buffers_kib: mem_buffers,
            mem_cached_kib: mem_cached,
            mem_active_anon_kib: mem_active_anon,
            mem_inactive_anon_kib: mem_inactive_anon,
            disk_space_total_gib: disk_total_gib,
            disk_space_used_gib: disk_used_gib,
            disk_space_free_gib: disk_free_gib,
            disks,
            net_recv_bytes: net_recv,
            net_sent_bytes: net_sent,
            gpu,
        }
    }

    fn clock_ticks_per_sec(&self) -> usize {
        self.fs.clock_ticks_per_sec()
    }

    fn sector_size_bytes(&self, device: &str) -> u64 {
        ProcfsSource::sector_size_bytes(self, device)
    }
}

impl<F: ProcfsAPI> ProcfsSource<F> {
    fn read_proc_stat(&self) -> (usize, u64, u64) {
        let contents = self.fs.read_to_string("stat").unwrap_or_default();
        let mut utime = 0;
        let mut stime = 0;
        let mut processes = 0;
        for line in contents.lines() {
            if let Some(rest) = line.strip_prefix("cpu ") {
                let fields: Vec<&str> = rest.split_whitespace().collect();
                let user: u64 = fields.first().and_then(|s| s.parse().ok()).unwrap_or(0);
                let nice: u64 = fields.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
                let system: u64 = fields.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);
                utime = user + nice;
                stime = system;
            } else if let Some(rest) = line.strip_prefix("processes ") {
                processes = rest.trim().parse().unwrap_or(0);
            }
        }
        (processes, utime, stime)
    }

    fn read_meminfo(&self) -> (u64, u64, u64, u64, u64, u64) {
        let contents = self.fs.read_to_string("meminfo").unwrap_or_default();
        let mut total = 0;
        let mut free = 0;
        let mut buffers = 0;
        let mut cached = 0;
        let mut active_anon = 0;
        let mut inactive_anon = 0;
        for line in contents.lines() {
            let (key, value) = match line.split_once(':') {
                Some(kv) => kv,
                None => continue,
            };
            let value: u64 = value.trim().split_whitespace().next().and_then(|v| v.parse().ok()).unwrap_or(0);
            match key {
                "MemTotal" => total = value,
                "MemFree" => free = value,
                "Buffers" => buffers = value,
                // Only the bare "Cached" line, not "SwapCached".
                "Cached" => cached = value,
                "Active(anon)" => active_anon = value,
                "Inactive(anon)" => inactive_anon = value,
                _ => {}
            }
        }
        let used = total.saturating_sub(free).saturating_sub(buffers).saturating_sub(cached);
        (free, used, buffers, cached, active_anon, inactive_anon)
    }

    fn read_diskstats(&self) -> HashMap<String, DiskCounters> {
        let contents = self.fs.read_to_string("diskstats").unwrap_or_default();
        let block_devices = self.fs.read_sys_block().unwrap_or_default();
        let mut disks = HashMap::new();
        for line in contents.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                continue;
            }
            let name = fields[2];
            if is_partition(name, &block_devices) {
                continue;
            }
            let read_sectors: u64 = fields[5].parse().unwrap_or(0);
            let write_sectors: u64 = fields[9].parse().unwrap_or(0);
            disks.insert(
                name.to_string(),
                DiskCounters {
                    read_sectors,
                    write_sectors,
                },
            );
        }
        disks
    }

    fn read_net_dev(&self) -> (u64, u64) {
        let contents = self.fs.read_to_string("net/dev").unwrap_or_default();
        let mut recv = 0;
        let mut sent = 0;
        for line in contents.lines().skip(2) {
            let (iface, rest) = match line.split_once(':') {
                Some(kv) => kv,
                None => continue,
            };
            let iface = iface.trim();
            if iface == "lo" {
                continue;
            }
            let fields: Vec<&str> = rest.split_whitespace().collect();
            if fields.len() < 9 {
                continue;
            }
            recv += fields[0].parse::<u64>().unwrap_or(0);
            sent += fields[8].parse::<u64>().unwrap_or(0);
        }
        (recv, sent)
    }
}

/// Whole-device names matching `(sd[a-z]+|nvme\d+n\d+|mmcblk\d+)p?\d+$` that
/// also have a parent whole device listed in `/sys/block` are partitions and
/// are skipped (§4.A, regex carried verbatim from
/// `examples/original_source/src/resource_tracker/helpers.py::is_partition`).
fn is_partition(name: &str, block_devices: &[String]) -> bool {
    if !matches_partition_pattern(name) {
        return false;
    }
    block_devices
        .iter()
        .any(|parent| name.starts_with(parent.as_str()) && name != parent)
}

fn matches_partition_pattern(name: &str) -> bool {
    let digits_suffix_start = match name.rfind(|c: char| !c.is_ascii_digit()) {
        Some(ix) => ix + 1,
        None => return false,
    };
    if digits_suffix_start == name.len() {
        return false; // no trailing digit run at all
    }
    let (stem, _digits) = name.split_at(digits_suffix_start);
    let stem = stem.strip_suffix('p').unwrap_or(stem);

    is_sd_stem(stem) || is_nvme_stem(stem) || is_mmcblk_stem(stem)
}

fn is_sd_stem(stem: &str) -> bool {
    stem.starts_with("sd") && stem.len() > 2 && stem[2..].chars().all(|c| c.is_ascii_lowercase())
}

fn is_nvme_stem(stem: &str) -> bool {
    match stem.strip_prefix("nvme") {
        Some(rest) => {
            let ix = match rest.find('n') {
                Some(ix) => ix,
                None => return false,
            };
            let (num, tail) = rest.split_at(ix);
            !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()) && tail.len() > 1
        }
        None => false,
    }
}

fn is_mmcblk_stem(stem: &str) -> bool {
    match stem.strip_prefix("mmcblk") {
        Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

fn read_disk_space_gib(anchor: &str) -> (f64, f64, f64) {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let cpath = match CString::new(anchor) {
        Ok(c) => c,
        Err(_) => return (0.0, 0.0, 0.0),
    };
    let mut stat: MaybeUninit<libc::statvfs> = MaybeUninit::uninit();
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return (0.0, 0.0, 0.0);
    }
    let stat = unsafe { stat.assume_init() };
    let block_size = stat.f_frsize as f64;
    let total = stat.f_blocks as f64 * block_size;
    let free = stat.f_bfree as f64 * block_size;
    let available = stat.f_bavail as f64 * block_size;
    let used = total - free;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    (total / GIB, used / GIB, available / GIB)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfsapi::MockFS;
    use std::collections::HashMap as Map;

    fn stat_line(comm: &str, utime: u64, stime: u64) -> String {
        // 52-field /proc/<pid>/stat line; only utime (14) and stime (15)
        // need real values, the rest are filler.
        let mut fields = vec!["0".to_string(); 49];
        fields[11] = utime.to_string(); // index 11 in post-comm split == field 14 (utime)
        fields[12] = stime.to_string(); // index 12 == field 15 (stime)
        format!("1 ({comm}) S {}", fields.join(" "))
    }

    #[test]
    fn pid_snapshot_sums_descendants() {
        let mut files = Map::new();
        files.insert("100/task/100/children".to_string(), "200".to_string());
        files.insert("200/task/200/children".to_string(), "".to_string());
        files.insert("100/smaps_rollup".to_string(), "Pss:    1000 kB\n".to_string());
        files.insert("200/smaps_rollup".to_string(), "Pss:     500 kB\n".to_string());
        files.insert("100/stat".to_string(), stat_line("proc", 10, 5));
        files.insert("200/stat".to_string(), stat_line("proc", 3, 2));
        files.insert("100/io".to_string(), "read_bytes: 100\nwrite_bytes: 50\n".to_string());
        files.insert("200/io".to_string(), "read_bytes: 20\nwrite_bytes: 10\n".to_string());
        let fs = MockFS::new(files, 1700000000);
        let source = ProcfsSource::new(fs);

        let snap = source.pid_snapshot(100, true);
        assert_eq!(snap.children_count, 1);
        assert_eq!(snap.memory_kib, 1500);
        assert_eq!(snap.utime_ticks, 13);
        assert_eq!(snap.stime_ticks, 7);
        assert_eq!(snap.read_bytes, 120);
        assert_eq!(snap.write_bytes, 60);
    }

    #[test]
    fn vanished_pid_is_neutral_zero() {
        let fs = MockFS::new(Map::new(), 0);
        let source = ProcfsSource::new(fs);
        let snap = source.pid_snapshot(404, false);
        assert_eq!(snap.memory_kib, 0);
        assert_eq!(snap.utime_ticks, 0);
        assert_eq!(snap.read_bytes, 0);
    }

    #[test]
    fn meminfo_used_excludes_buffers_and_cache() {
        let mut files = Map::new();
        files.insert(
            "meminfo".to_string(),
            "MemTotal:       16000000 kB\nMemFree:         2000000 kB\nBuffers:          500000 kB\nCached:          1500000 kB\nActive(anon):    3000000 kB\nInactive(anon):   200000 kB\n".to_string(),
        );
        let fs = MockFS::new(files, 0);
        let source = ProcfsSource::new(fs);
        let (free, used, buffers, cached, active_anon, inactive_anon) = source.read_meminfo();
        assert_eq!(free, 2_000_000);
        assert_eq!(used, 12_000_000);
        assert_eq!(buffers, 500_000);
        assert_eq!(cached, 1_500_000);
        assert_eq!(active_anon, 3_000_000);
        assert_eq!(inactive_anon, 200_000);
    }

    #[test]
    fn diskstats_skips_partitions() {
        let mut files = Map::new();
        files.insert(
            "diskstats".to_string(),
            "   8       0 sda 1 2 1000 3 4 5 2000 6 0 7 8\n   8       1 sda1 1 2 100 3 4 5 200 6 0 7 8\n".to_string(),
        );
        let fs = MockFS::new(files, 0).with_sys_block(vec!["sda"]);
        let source = ProcfsSource::new(fs);
        let disks = source.read_diskstats();
        assert!(disks.contains_key("sda"));
        assert!(!disks.contains_key("sda1"));
        assert_eq!(disks["sda"].read_sectors, 1000);
        assert_eq!(disks["sda"].write_sectors, 2000);
    }

    #[test]
    fn net_dev_skips_loopback_and_sums_rx_tx() {
        let mut files = Map::new();
        files.insert(
            "net/dev".to_string(),
            "Inter-|   Receive                                                |  Transmit\n face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n    lo:     100       1    0    0    0     0          0         0      100       1    0    0    0     0       0          0\n  eth0:    5000      10    0    0    0     0          0         0     2000      20    0    0    0     0       0          0\n".to_string(),
        );
        let fs = MockFS::new(files, 0);
        let source = ProcfsSource::new(fs);
        let (recv, sent) = source.read_net_dev();
        assert_eq!(recv, 5000);
        assert_eq!(sent, 2000);
    }
}
