//! Fixed-column-order CSV sink for the Sampler Loop (§4.C step 4, §6).
//! Numeric cells are unquoted, string cells are always quoted; the writer
//! flushes after every row so a crash never loses a sample. Grounded on
//! the `csv` crate's `ByteRecord`/`Writer` reuse-across-cycles shape seen in
//! `examples/other_examples/183e3277_elba-docker-radvisor__src-collection-collect-mod.rs.rs`.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use csv::Writer;
use lazy_static::lazy_static;

use crate::snapshot::{HostSampleRecord, PidSampleRecord};

lazy_static! {
    pub static ref PID_HEADER: Vec<&'static str> = vec![
        "timestamp",
        "pid",
        "children",
        "utime",
        "stime",
        "cpu_usage",
        "memory",
        "read_bytes",
        "write_bytes",
        "gpu_usage",
        "gpu_vram",
        "gpu_utilized",
    ];
    pub static ref HOST_HEADER: Vec<&'static str> = vec![
        "timestamp",
        "processes",
        "utime",
        "stime",
        "cpu_usage",
        "memory_free",
        "memory_used",
        "memory_buffers",
        "memory_cached",
        "memory_active_anon",
        "memory_inactive_anon",
        "disk_read_bytes",
        "disk_write_bytes",
        "disk_space_total_gb",
        "disk_space_used_gb",
        "disk_space_free_gb",
        "net_recv_bytes",
        "net_sent_bytes",
        "gpu_usage",
        "gpu_vram",
        "gpu_utilized",
    ];
}

pub struct PidCsvSink {
    writer: Writer<File>,
    wrote_header: bool,
}

impl PidCsvSink {
    pub fn create(path: &Path) -> Result<PidCsvSink, String> {
        let writer = Writer::from_path(path).map_err(|e| format!("Could not create {}: {e}", path.display()))?;
        Ok(PidCsvSink {
            writer,
            wrote_header: false,
        })
    }

    pub fn write_record(&mut self, pid: usize, r: &PidSampleRecord) -> Result<(), String> {
        if !self.wrote_header {
            self.writer
                .write_record(PID_HEADER.iter())
                .map_err(|e| e.to_string())?;
            self.wrote_header = true;
        }
        self.writer
            .write_record(&[
                r.t.to_string(),
                pid.to_string(),
                r.children_count.to_string(),
                r.utime_ticks.to_string(),
                r.stime_ticks.to_string(),
                r.cpu_usage.to_string(),
                r.memory_kib.to_string(),
                r.read_bytes.to_string(),
                r.write_bytes.to_string(),
                r.gpu_usage.to_string(),
                r.gpu_vram_mib.to_string(),
                r.gpu_utilized.to_string(),
            ])
            .map_err(|e| e.to_string())?;
        self.writer.flush().map_err(|e| e.to_string())
    }
}

pub struct HostCsvSink {
    writer: Writer<File>,
    wrote_header: bool,
}

impl HostCsvSink {
    pub fn create(path: &Path) -> Result<HostCsvSink, String> {
        let writer = Writer::from_path(path).map_err(|e| format!("Could not create {}: {e}", path.display()))?;
        Ok(HostCsvSink {
            writer,
            wrote_header: false,
        })
    }

    pub fn write_record(&mut self, r: &HostSampleRecord) -> Result<(), String> {
        if !self.wrote_header {
            self.writer
                .write_record(HOST_HEADER.iter())
                .map_err(|e| e.to_string())?;
            self.wrote_header = true;
        }
        self.writer
            .write_record(&[
                r.t.to_string(),
                r.process_count.to_string(),
                r.utime_ticks.to_string(),
                r.stime_ticks.to_string(),
                r.cpu_usage.to_string(),
                r.memory_free_kib.to_string(),
                r.memory_used_kib.to_string(),
                r.memory_buffers_kib.to_string(),
                r.memory_cached_kib.to_string(),
                r.memory_active_anon_kib.to_string(),
                r.memory_inactive_anon_kib.to_string(),
                r.disk_read_bytes.to_string(),
                r.disk_write_bytes.to_string(),
                r.disk_space_total_gib.to_string(),
                r.disk_space_used_gib.to_string(),
                r.disk_space_free_gib.to_string(),
                r.net_recv_bytes.to_string(),
                r.net_sent_bytes.to_string(),
                r.gpu_usage.to_string(),
                r.gpu_vram_mib.to_string(),
                r.gpu_utilized.to_string(),
            ])
            .map_err(|e| e.to_string())?;
        self.writer.flush().map_err(|e| e.to_string())
    }
}

/// Remove a sampler's output file. Errors are swallowed: the Supervisor's
/// cleanup is best-effort (§4.D "guaranteed-release scoped cleanup") and a
/// file that is already gone is not a failure.
pub fn remove_best_effort(path: &Path) {
    let _ = std::fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::PidSampleRecord;
    use tempfile_path::unique_temp_csv_path;

    mod tempfile_path {
        use std::path::PathBuf;
        pub fn unique_temp_csv_path(tag: &str) -> PathBuf {
            let mut p = std::env::temp_dir();
            p.push(format!("taskgauge-test-{tag}-{}.csv", std::process::id()));
            p
        }
    }

    #[test]
    fn pid_sink_writes_header_then_rows_and_flushes() {
        let path = unique_temp_csv_path("pid-sink");
        {
            let mut sink = PidCsvSink::create(&path).unwrap();
            let record = PidSampleRecord {
                t: 1.0,
                children_count: 0,
                utime_ticks: 1,
                stime_ticks: 1,
                cpu_usage: 0.02,
                memory_kib: 1000,
                read_bytes: 0,
                write_bytes: 0,
                gpu_usage: 0.0,
                gpu_vram_mib: 0.0,
                gpu_utilized: 0,
            };
            sink.write_record(42, &record).unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), PID_HEADER.join(","));
        assert!(lines.next().unwrap().starts_with("1,42,0,1,1,0.02,1000,0,0,0,0,0"));
        std::fs::remove_file(&path).unwrap();
    }
}
