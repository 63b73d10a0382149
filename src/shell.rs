use std::path::PathBuf;

use crate::config::Config;
use crate::history::HistoryLog;
use crate::job_control::ForegroundHandle;
use crate::jobs::JobTable;

/// Everything the shell mutates while running commands. One instance lives for
/// the whole session and is passed explicitly to each component; a forked child
/// works on its own copy.
pub struct Shell {
    pub jobs: JobTable,
    pub foreground: ForegroundHandle,
    pub history: HistoryLog,
    /// Target of `~` and of `hop` without arguments: the startup directory.
    pub home: PathBuf,
    /// Where `hop -` returns to.
    pub prev_dir: Option<PathBuf>,
    /// Stdin, stdout and stderr are all terminals.
    pub interactive: bool,
}

impl Shell {
    pub fn new(config: &Config, interactive: bool, home: PathBuf) -> Self {
        Self {
            jobs: JobTable::new(config.max_jobs, interactive),
            foreground: ForegroundHandle::new(),
            history: HistoryLog::load(config.history_path.clone(), config.history_size),
            home,
            prev_dir: None,
            interactive,
        }
    }

    /// Reap finished background jobs; notices print only in interactive mode.
    pub fn poll_jobs(&mut self) {
        self.jobs.poll_all();
    }

    /// Kill every tracked job and reap all children before the shell exits.
    pub fn shutdown(&mut self) {
        tracing::debug!(
            jobs = self.jobs.len(),
            untracked = self.jobs.untracked().len(),
            "shutting down"
        );
        self.jobs.terminate_all();
    }
}
