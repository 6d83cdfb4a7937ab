//! Sampler Loop (§4.C): a long-running worker owning exactly one subject —
//! a pid-tree or the host — an interval, and an output sink. Each cycle
//! takes a snapshot, differences it against the stored one, writes a CSV
//! row, and sleeps a drift-corrected remainder so the average cadence stays
//! `I` seconds regardless of how long collection itself took.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::counter::CounterSource;
use crate::csvsink::{HostCsvSink, PidCsvSink};
use crate::interrupt;
use crate::snapshot::{diff_host, diff_pid, HostSnapshot, PidSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Running,
    Exited,
}

/// Run a pid-tree Sampler Loop to completion: samples `pid` (plus
/// descendants) every `interval` seconds into `output_path`, returning once
/// the target's memory reads exactly zero (the process has exited) or the
/// worker is asked to stop.
pub fn run_pid_loop(
    source: &dyn CounterSource,
    pid: usize,
    interval: f64,
    output_path: &Path,
) -> Result<LoopState, String> {
    let mut sink = PidCsvSink::create(output_path)?;
    let mut state = LoopState::Starting;
    let mut prev: PidSnapshot = source.pid_snapshot(pid, true);
    let mut accumulated_gpu_indexes: HashSet<usize> = HashSet::new();
    state = LoopState::Running;

    loop {
        let t0 = Instant::now();
        let cur = source.pid_snapshot(pid, true);
        let record = diff_pid(&prev, &cur, source.clock_ticks_per_sec(), &mut accumulated_gpu_indexes);
        prev = cur;
        sink.write_record(pid, &record)?;

        if record.memory_kib == 0 {
            state = LoopState::Exited;
            return Ok(state);
        }
        if interrupt::is_interrupted() {
            state = LoopState::Exited;
            return Ok(state);
        }

        let elapsed = t0.elapsed().as_secs_f64();
        let remaining = (interval - elapsed).max(0.0);
        std::thread::sleep(Duration::from_secs_f64(remaining));
    }
}

/// Run a host Sampler Loop. Unlike the pid-tree loop, there is no exit
/// condition of its own: it samples until `should_stop` reports true, which
/// the Supervisor drives by sending SIGTERM once the task and pid sampler
/// have both finished (§4.D).
pub fn run_host_loop(
    source: &dyn CounterSource,
    disk_space_anchor: &str,
    interval: f64,
    output_path: &Path,
    should_stop: impl Fn() -> bool,
) -> Result<LoopState, String> {
    let mut sink = HostCsvSink::create(output_path)?;
    let mut prev: HostSnapshot = source.host_snapshot(disk_space_anchor);
    let mut accumulated_gpu_indexes: HashSet<usize> = HashSet::new();

    loop {
        let t0 = Instant::now();
        let cur = source.host_snapshot(disk_space_anchor);
        let record = diff_host(
            &prev,
            &cur,
            source.clock_ticks_per_sec(),
            |dev| source.sector_size_bytes(dev),
            &mut accumulated_gpu_indexes,
        );
        prev = cur;
        sink.write_record(&record)?;

        if should_stop() || interrupt::is_interrupted() {
            return Ok(LoopState::Exited);
        }

        let elapsed = t0.elapsed().as_secs_f64();
        let remaining = (interval - elapsed).max(0.0);
        std::thread::sleep(Duration::from_secs_f64(remaining));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::Implementation;
    use crate::snapshot::GpuCounters;
    use std::cell::RefCell;

    /// A fixed sequence of snapshots, one per call, for driving the loop
    /// deterministically in tests instead of sleeping on a real clock.
    struct ScriptedSource {
        pid_snaps: RefCell<std::vec::IntoIter<PidSnapshot>>,
    }

    impl CounterSource for ScriptedSource {
        fn implementation(&self) -> Implementation {
            Implementation::Procfs
        }
        fn pid_snapshot(&self, _pid: usize, _include_children: bool) -> PidSnapshot {
            self.pid_snaps.borrow_mut().next().expect("scripted source exhausted")
        }
        fn host_snapshot(&self, _anchor: &str) -> HostSnapshot {
            unreachable!("not used in this test")
        }
        fn clock_ticks_per_sec(&self) -> usize {
            100
        }
    }

    fn snap(t: f64, mem: u64) -> PidSnapshot {
        PidSnapshot {
            t,
            pid: 1,
            children_count: 0,
            utime_ticks: 0,
            stime_ticks: 0,
            memory_kib: mem,
            read_bytes: 0,
            write_bytes: 0,
            gpu: GpuCounters::default(),
        }
    }

    #[test]
    fn pid_loop_exits_when_memory_reads_zero() {
        let source = ScriptedSource {
            pid_snaps: RefCell::new(vec![snap(0.0, 1000), snap(1.0, 1000), snap(2.0, 0)].into_iter()),
        };
        let mut path = std::env::temp_dir();
        path.push(format!("taskgauge-test-sampler-{}.csv", std::process::id()));
        let result = run_pid_loop(&source, 1, 0.0, &path).unwrap();
        assert_eq!(result, LoopState::Exited);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3); // header + 2 rows (cycle 1, cycle 2)
        std::fs::remove_file(&path).unwrap();
    }
}
