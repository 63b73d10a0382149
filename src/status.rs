/// One state change reported by `waitpid` for a single child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitEvent {
    Exited(i32),
    Signaled(i32),
    Stopped(i32),
    Continued,
}

impl WaitEvent {
    /// Decode a raw wait status. Returns `None` for statuses that carry no
    /// job-control meaning.
    pub fn from_raw(raw_status: libc::c_int) -> Option<Self> {
        if libc::WIFEXITED(raw_status) {
            return Some(WaitEvent::Exited(libc::WEXITSTATUS(raw_status)));
        }
        if libc::WIFSIGNALED(raw_status) {
            return Some(WaitEvent::Signaled(libc::WTERMSIG(raw_status)));
        }
        if libc::WIFSTOPPED(raw_status) {
            return Some(WaitEvent::Stopped(libc::WSTOPSIG(raw_status)));
        }
        if libc::WIFCONTINUED(raw_status) {
            return Some(WaitEvent::Continued);
        }
        None
    }

    /// True once the process is gone for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, WaitEvent::Exited(_) | WaitEvent::Signaled(_))
    }

    /// Shell-style exit code: processes killed by a signal map to `128 + signal`.
    pub fn exit_code(self) -> i32 {
        match self {
            WaitEvent::Exited(code) => code,
            WaitEvent::Signaled(signal) | WaitEvent::Stopped(signal) => 128 + signal,
            WaitEvent::Continued => 0,
        }
    }
}
