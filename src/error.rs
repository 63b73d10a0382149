use std::io;

use thiserror::Error;

/// Everything that can go wrong while the shell itself (not a forked child)
/// processes a command. None of these end the read-eval loop.
#[derive(Debug, Error)]
pub enum ShellError {
    /// Rejected by the validator before anything ran.
    #[error("Invalid Syntax!")]
    InvalidSyntax,

    #[error("{0}")]
    Usage(&'static str),

    #[error("No such job")]
    NoSuchJob,

    #[error("Job already running")]
    JobAlreadyRunning,

    /// `fg`/`bg` without a controlling terminal to hand off.
    #[error("{0}: no job control")]
    NoJobControl(&'static str),

    #[error("hopsh: redirection is not supported for {0}")]
    UnsupportedRedirection(String),

    #[error("No such directory!")]
    NoSuchDirectory,

    #[error("No such process found")]
    NoSuchProcess,

    #[error("hopsh: {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ShellError {
    pub fn io(context: &'static str, source: io::Error) -> Self {
        ShellError::Io { context, source }
    }
}

pub type Result<T> = std::result::Result<T, ShellError>;
