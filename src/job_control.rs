use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::status::WaitEvent;

/// Sentinel stored in the foreground handle while the shell owns the terminal.
pub const NO_FOREGROUND: libc::pid_t = -1;

/// The process group currently granted the terminal, shared with the signal
/// forwarding paths. Only the foreground controller writes it; signal handlers
/// only read it.
#[derive(Debug, Clone)]
pub struct ForegroundHandle(Arc<AtomicI32>);

impl Default for ForegroundHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ForegroundHandle {
    pub fn new() -> Self {
        Self(Arc::new(AtomicI32::new(NO_FOREGROUND)))
    }

    pub fn set(&self, pgid: libc::pid_t) {
        self.0.store(pgid, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(NO_FOREGROUND, Ordering::SeqCst);
    }

    pub fn get(&self) -> Option<libc::pid_t> {
        let pgid = self.0.load(Ordering::SeqCst);
        (pgid > 0).then_some(pgid)
    }

    /// The raw cell, for the async-signal-safe SIGTSTP handler.
    pub(crate) fn cell(&self) -> &Arc<AtomicI32> {
        &self.0
    }
}

/// Result of a non-blocking `waitpid` on a process group.
#[derive(Debug, PartialEq, Eq)]
pub enum Poll {
    Event(libc::pid_t, WaitEvent),
    /// Members exist but none changed state.
    Quiet,
    /// No waitable children in the group (`ECHILD`).
    NoChild,
}

pub fn set_process_group(pid: libc::pid_t, pgid: libc::pid_t) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::setpgid(pid, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EINTR => continue,
            // The child already exec'd or exited; its own setpgid call won the race.
            Some(code) if code == libc::EACCES || code == libc::ESRCH => return Ok(()),
            _ => return Err(err),
        }
    }
}

/// Send `signal` to every member of `pgid`.
pub fn signal_group(pgid: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }
    signal_pid(-pgid, signal)
}

/// `kill(2)` with `EINTR` retried. `target` follows kill's sign convention.
pub fn signal_pid(target: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::kill(target, signal) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// Zero-signal existence probe: false only when the kernel reports `ESRCH`
/// for both the group and its leader.
pub fn group_exists(pgid: libc::pid_t) -> bool {
    let gone = |target| {
        matches!(signal_pid(target, 0), Err(e) if e.raw_os_error() == Some(libc::ESRCH))
    };
    !(gone(-pgid) && gone(pgid))
}

/// Block until some member of `pgid` exits, is killed, or stops.
/// `Ok(None)` means the group has no children left to wait for.
pub fn wait_for_group(pgid: libc::pid_t) -> io::Result<Option<(libc::pid_t, WaitEvent)>> {
    let mut raw_status: libc::c_int = 0;

    loop {
        let rc = unsafe { libc::waitpid(-pgid, &mut raw_status, libc::WUNTRACED) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == libc::EINTR => continue,
                Some(code) if code == libc::ECHILD => return Ok(None),
                _ => return Err(err),
            }
        }

        if let Some(event) = WaitEvent::from_raw(raw_status) {
            return Ok(Some((rc, event)));
        }
    }
}

/// Non-blocking wait on `pgid` that also reports stop and continue transitions.
pub fn poll_group(pgid: libc::pid_t) -> io::Result<Poll> {
    let mut raw_status: libc::c_int = 0;
    let flags = libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED;

    loop {
        let rc = unsafe { libc::waitpid(-pgid, &mut raw_status, flags) };
        if rc == 0 {
            return Ok(Poll::Quiet);
        }
        if rc < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == libc::EINTR => continue,
                Some(code) if code == libc::ECHILD => return Ok(Poll::NoChild),
                _ => return Err(err),
            }
        }

        match WaitEvent::from_raw(raw_status) {
            Some(event) => return Ok(Poll::Event(rc, event)),
            None => continue,
        }
    }
}

/// Reap every remaining child of the shell, blocking until there are none.
pub fn reap_all_children() {
    loop {
        let rc = unsafe { libc::waitpid(-1, std::ptr::null_mut(), 0) };
        if rc > 0 {
            continue;
        }
        if io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return;
    }
}

/// Hands the terminal to a process group and gives it back to the shell's own
/// group when dropped. Inert when the session has no controlling terminal.
pub struct ForegroundTerminalGuard {
    tty_fd: Option<libc::c_int>,
    shell_pgid: libc::pid_t,
}

impl ForegroundTerminalGuard {
    pub fn new(target_pgid: libc::pid_t, interactive: bool) -> io::Result<Self> {
        let tty_fd = (interactive && unsafe { libc::isatty(libc::STDIN_FILENO) } == 1)
            .then_some(libc::STDIN_FILENO);

        let shell_pgid = unsafe { libc::getpgrp() };
        let guard = Self { tty_fd, shell_pgid };

        if let Some(fd) = guard.tty_fd {
            set_terminal_foreground(fd, target_pgid)?;
        }

        Ok(guard)
    }
}

impl Drop for ForegroundTerminalGuard {
    fn drop(&mut self) {
        if let Some(fd) = self.tty_fd {
            if let Err(err) = set_terminal_foreground(fd, self.shell_pgid) {
                tracing::warn!(%err, "could not reclaim the terminal");
            }
        }
    }
}

struct SignalIgnoreGuard {
    signal: libc::c_int,
    previous: libc::sighandler_t,
}

impl SignalIgnoreGuard {
    fn ignore(signal: libc::c_int) -> io::Result<Self> {
        let previous = unsafe { libc::signal(signal, libc::SIG_IGN) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { signal, previous })
    }
}

impl Drop for SignalIgnoreGuard {
    fn drop(&mut self) {
        unsafe {
            libc::signal(self.signal, self.previous);
        }
    }
}

pub fn set_terminal_foreground(fd: libc::c_int, pgid: libc::pid_t) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    let _sigttou = SignalIgnoreGuard::ignore(libc::SIGTTOU)?;
    loop {
        let rc = unsafe { libc::tcsetpgrp(fd, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}
