//! Signal disposition for the shell process and its children.
//!
//! Interrupt and stop keystrokes aimed at the shell are forwarded to whatever
//! process group holds the foreground handle, or absorbed when there is none.
//! The handlers never touch the job table.

use std::io;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::job_control::{self, ForegroundHandle};

static STOP_TARGET: OnceLock<Arc<AtomicI32>> = OnceLock::new();

/// Signals a child must see with their default action before it runs anything.
const CHILD_DEFAULTS: &[libc::c_int] = &[
    libc::SIGINT,
    libc::SIGTSTP,
    libc::SIGTTOU,
    libc::SIGTTIN,
    libc::SIGQUIT,
    libc::SIGPIPE,
];

/// Install the shell's own signal handling. Call once, before the first prompt.
pub fn install(foreground: &ForegroundHandle) -> io::Result<()> {
    let interrupt_target = foreground.clone();
    ctrlc::set_handler(move || {
        if let Some(pgid) = interrupt_target.get() {
            let _ = job_control::signal_group(pgid, libc::SIGINT);
        }
    })
    .map_err(io::Error::other)?;

    let _ = STOP_TARGET.set(Arc::clone(foreground.cell()));
    let stop_handler = forward_stop as extern "C" fn(libc::c_int);
    set_handler(libc::SIGTSTP, stop_handler as libc::sighandler_t)?;

    for signal in [libc::SIGTTOU, libc::SIGTTIN, libc::SIGPIPE] {
        set_handler(signal, libc::SIG_IGN)?;
    }
    Ok(())
}

/// Restore default dispositions in a freshly forked child. Only async-signal-safe
/// calls, so it is fine between `fork` and `exec`.
pub fn reset_for_child() {
    for &signal in CHILD_DEFAULTS {
        unsafe {
            libc::signal(signal, libc::SIG_DFL);
        }
    }
}

extern "C" fn forward_stop(_signal: libc::c_int) {
    if let Some(cell) = STOP_TARGET.get() {
        let pgid = cell.load(Ordering::SeqCst);
        if pgid > 0 {
            unsafe {
                libc::kill(-pgid, libc::SIGTSTP);
            }
        }
    }
}

fn set_handler(signal: libc::c_int, handler: libc::sighandler_t) -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
