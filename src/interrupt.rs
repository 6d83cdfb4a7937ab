#[cfg(debug_assertions)]
use crate::log;

use std::sync::atomic::{AtomicBool, Ordering};

// Signal handling for the host Sampler Loop worker. The Supervisor stops the
// host sampler with SIGTERM on task completion (§5); SIGHUP covers the case
// where the controlling terminal or session goes away. SIGINT/SIGQUIT are
// left to the default handler since they're user-interactive, not part of
// the lifecycle the Supervisor drives.

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn worker_signal_handler(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

pub fn handle_interruptions() {
    unsafe {
        let nomask: libc::sigset_t = std::mem::zeroed();
        let action = libc::sigaction {
            sa_sigaction: worker_signal_handler as usize,
            sa_mask: nomask,
            sa_flags: 0,
            sa_restorer: None,
        };
        libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGHUP, &action, std::ptr::null_mut());
    }
}

#[cfg(debug_assertions)]
pub fn is_interrupted() -> bool {
    if std::env::var("TASKGAUGE_TEST_WAIT_INTERRUPT").is_ok() {
        std::thread::sleep(std::time::Duration::new(10, 0));
    }
    let flag = INTERRUPTED.load(Ordering::Relaxed);
    if flag {
        log::info("sampler worker received interrupt");
    }
    flag
}

#[cfg(not(debug_assertions))]
pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}
