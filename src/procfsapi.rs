// Thin virtualization layer over /proc, /sys/block, and the handful of libc
// calls the kernel-pseudo-filesystem Counter Source needs. Kept as its own
// trait so tests can feed canned file contents instead of touching a real
// machine.

extern crate libc;
extern crate page_size;

use std::fs;
use std::path;
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(test)]
use std::collections::HashMap;

pub trait ProcfsAPI {
    // Open /proc/<path> (which can have multiple path elements, eg
    // {pid}/stat), read it, and return its entire contents as a string.
    fn read_to_string(&self, path: &str) -> Result<String, String>;

    // Read an absolute path outside of /proc, eg
    // /sys/block/sda/queue/hw_sector_size.
    fn read_absolute(&self, path: &str) -> Result<String, String>;

    // List the device names under /sys/block.
    fn read_sys_block(&self) -> Result<Vec<String>, String>;

    // Return the value of CLK_TCK, or 0 on error.
    fn clock_ticks_per_sec(&self) -> usize;

    // Return the current time in seconds since Unix epoch.
    fn now_in_secs_since_epoch(&self) -> u64;

    // Whether /proc is present and readable, used by the startup Counter
    // Source selection policy.
    fn is_available(&self) -> bool;
}

// RealFS is used to actually access /proc, /sys, and the system clock.

pub struct RealFS {}

impl RealFS {
    pub fn new() -> RealFS {
        RealFS {}
    }
}

impl Default for RealFS {
    fn default() -> Self {
        RealFS::new()
    }
}

impl ProcfsAPI for RealFS {
    fn read_to_string(&self, path: &str) -> Result<String, String> {
        let filename = format!("/proc/{path}");
        match fs::read_to_string(path::Path::new(&filename)) {
            Ok(s) => Ok(s),
            Err(_) => Err(format!("Unable to read {filename}")),
        }
    }

    fn read_absolute(&self, path: &str) -> Result<String, String> {
        match fs::read_to_string(path::Path::new(path)) {
            Ok(s) => Ok(s),
            Err(_) => Err(format!("Unable to read {path}")),
        }
    }

    fn read_sys_block(&self) -> Result<Vec<String>, String> {
        let mut names = vec![];
        if let Ok(dir) = fs::read_dir("/sys/block") {
            for dirent in dir.flatten() {
                if let Some(name) = dirent.path().file_name() {
                    names.push(name.to_string_lossy().to_string());
                }
            }
        } else {
            return Err("Could not open /sys/block".to_string());
        }
        Ok(names)
    }

    fn clock_ticks_per_sec(&self) -> usize {
        unsafe { libc::sysconf(libc::_SC_CLK_TCK) as usize }
    }

    fn now_in_secs_since_epoch(&self) -> u64 {
        unix_now()
    }

    fn is_available(&self) -> bool {
        fs::metadata("/proc").map(|m| m.is_dir()).unwrap_or(false)
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

pub fn parse_usize_field(
    fields: &[&str],
    ix: usize,
    line: &str,
    file: &str,
    fieldname: &str,
) -> Result<usize, String> {
    if ix >= fields.len() {
        return Err(format!("Index out of range for {file}: {ix}: {line}"));
    }
    fields[ix]
        .parse::<usize>()
        .map_err(|_| format!("Could not parse {fieldname} in {file}: {line}"))
}

pub fn parse_u64_field(
    fields: &[&str],
    ix: usize,
    line: &str,
    file: &str,
    fieldname: &str,
) -> Result<u64, String> {
    if ix >= fields.len() {
        return Err(format!("Index out of range for {file}: {ix}: {line}"));
    }
    fields[ix]
        .parse::<u64>()
        .map_err(|_| format!("Could not parse {fieldname} in {file}: {line}"))
}

// MockFS is used for testing, it is instantiated with the values we want it
// to return.

#[cfg(test)]
pub struct MockFS {
    files: HashMap<String, String>,
    absolute: HashMap<String, String>,
    sys_block: Vec<String>,
    ticks_per_sec: usize,
    now: u64,
    available: bool,
}

#[cfg(test)]
impl MockFS {
    pub fn new(files: HashMap<String, String>, now: u64) -> MockFS {
        MockFS {
            files,
            absolute: HashMap::new(),
            sys_block: vec![],
            ticks_per_sec: 100,
            now,
            available: true,
        }
    }

    pub fn with_absolute(mut self, path: &str, contents: &str) -> MockFS {
        self.absolute.insert(path.to_string(), contents.to_string());
        self
    }

    pub fn with_sys_block(mut self, names: Vec<&str>) -> MockFS {
        self.sys_block = names.into_iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn unavailable() -> MockFS {
        MockFS {
            files: HashMap::new(),
            absolute: HashMap::new(),
            sys_block: vec![],
            ticks_per_sec: 100,
            now: 0,
            available: false,
        }
    }
}

#[cfg(test)]
impl ProcfsAPI for MockFS {
    fn read_to_string(&self, path: &str) -> Result<String, String> {
        match self.files.get(path) {
            Some(s) => Ok(s.clone()),
            None => Err(format!("Unable to read /proc/{path}")),
        }
    }

    fn read_absolute(&self, path: &str) -> Result<String, String> {
        match self.absolute.get(path) {
            Some(s) => Ok(s.clone()),
            None => Err(format!("Unable to read {path}")),
        }
    }

    fn read_sys_block(&self) -> Result<Vec<String>, String> {
        Ok(self.sys_block.clone())
    }

    fn clock_ticks_per_sec(&self) -> usize {
        self.ticks_per_sec
    }

    fn now_in_secs_since_epoch(&self) -> u64 {
        self.now
    }

    fn is_available(&self) -> bool {
        self.available
    }
}
