//! A trivial logging package for the handful of lines `taskgauge` itself
//! needs to print (step lifecycle, §7 `SamplerWorkerCrash`) — can be
//! replaced by something more interesting if necessary.

#![allow(dead_code)]

pub fn init() {
    // Currently nothing
}

// verbose() is for step-level chatter that's only interesting when a run
// misbehaves and someone is staring at the log; always printed, no flag
// gates it yet.
pub fn verbose(s: &str) {
    eprintln!("Info: taskgauge: {s}");
}

pub fn info(s: &str) {
    eprintln!("Info: taskgauge: {s}");
}

pub fn error(s: &str) {
    eprintln!("Error: taskgauge: {s}");
}
