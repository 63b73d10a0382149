use std::path::PathBuf;

const DEFAULT_HISTORY_SIZE: usize = 15;
const DEFAULT_MAX_JOBS: usize = 256;
const HISTORY_FILE_NAME: &str = ".hopsh_history";

/// Longest job name kept in the job table, in bytes.
pub const MAX_JOB_NAME_LEN: usize = 255;

/// Startup configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the `log` ring buffer lives; `None` when no home is known.
    pub history_path: Option<PathBuf>,
    pub history_size: usize,
    pub max_jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history_path: None,
            history_size: DEFAULT_HISTORY_SIZE,
            max_jobs: DEFAULT_MAX_JOBS,
        }
    }
}

impl Config {
    /// `HOPSH_HISTORY` overrides the history file, otherwise `$HOME/.hopsh_history`.
    /// `HOPSH_HISTORY_SIZE` and `HOPSH_MAX_JOBS` override the two capacities.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let history_path = lookup("HOPSH_HISTORY")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .or_else(|| lookup("HOME").map(|home| PathBuf::from(home).join(HISTORY_FILE_NAME)));

        Self {
            history_path,
            history_size: positive(lookup("HOPSH_HISTORY_SIZE")).unwrap_or(DEFAULT_HISTORY_SIZE),
            max_jobs: positive(lookup("HOPSH_MAX_JOBS")).unwrap_or(DEFAULT_MAX_JOBS),
        }
    }
}

fn positive(value: Option<String>) -> Option<usize> {
    value?.trim().parse::<usize>().ok().filter(|n| *n > 0)
}
