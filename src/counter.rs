//! The Counter Source capability (§4.A): one small trait with two
//! implementations (kernel pseudo-filesystem, process library) selected once
//! at startup, never by runtime type inspection (§9 "Two interchangeable
//! counter sources").

use crate::snapshot::{HostSnapshot, PidSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Implementation {
    Procfs,
    Psutil,
}

impl Implementation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Implementation::Procfs => "procfs",
            Implementation::Psutil => "psutil",
        }
    }
}

pub trait CounterSource {
    fn implementation(&self) -> Implementation;

    /// Take a snapshot of `pid` plus, if `include_children`, its full
    /// descendant set (§3 "Tree topology"). Never fails: a vanished pid or
    /// an unreadable field yields neutral zeros (§4.A "Failure semantics").
    fn pid_snapshot(&self, pid: usize, include_children: bool) -> PidSnapshot;

    /// Whole-host snapshot. `disk_space_anchor` is the single canonical
    /// mount point statfs'd for disk space totals (§4.A "Disk space").
    fn host_snapshot(&self, disk_space_anchor: &str) -> HostSnapshot;

    fn clock_ticks_per_sec(&self) -> usize;

    /// Bytes per sector for `device`, used to turn `/proc/diskstats` sector
    /// deltas into byte counts (§4.A). Providers that don't track devices
    /// individually (the process-library fallback) can use the default.
    fn sector_size_bytes(&self, _device: &str) -> u64 {
        512
    }
}

/// Fatal error raised at startup when neither provider is usable (§7
/// NoCounterSource).
#[derive(Debug, Clone, PartialEq)]
pub struct NoCounterSource;

impl std::fmt::Display for NoCounterSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no counter source available: /proc is unreadable and no process library fallback is usable"
        )
    }
}

impl std::error::Error for NoCounterSource {}
