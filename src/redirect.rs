use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;

use thiserror::Error;

use crate::parser::Token;

const NULL_DEVICE: &str = "/dev/null";

/// Where a stage's stdout goes when redirected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub path: String,
    pub append: bool,
}

/// One pipeline stage: its words plus at most one input and one output file.
/// The last redirection of each direction wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage {
    pub words: Vec<String>,
    pub input: Option<String>,
    pub output: Option<OutputTarget>,
}

/// Failures while wiring a stage's redirections. Each one ends the child with
/// status 1.
#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("Syntax error near `{0}`")]
    MissingFilename(String),
    #[error("No such file or directory")]
    OpenInput(#[source] std::io::Error),
    #[error("Unable to create file for writing")]
    OpenOutput(#[source] std::io::Error),
    #[error("hopsh: dup2: {0}")]
    Duplicate(#[source] std::io::Error),
}

/// True when a token slice carries any `<`, `>` or `>>`.
pub fn has_redirection(tokens: &[Token]) -> bool {
    tokens.iter().any(Token::is_redirection)
}

/// Separate redirection operators (and the filename after each) from the
/// stage's regular words.
pub fn extract_redirections(tokens: &[Token]) -> Result<Stage, RedirectError> {
    let mut stage = Stage::default();
    let mut iter = tokens.iter();

    while let Some(token) = iter.next() {
        match token {
            Token::Word(word) => stage.words.push(word.clone()),
            op if op.is_redirection() => {
                let path = match iter.next() {
                    Some(Token::Word(path)) => path.clone(),
                    _ => return Err(RedirectError::MissingFilename(op.to_string())),
                };
                match op {
                    Token::Input => stage.input = Some(path),
                    Token::Append => stage.output = Some(OutputTarget { path, append: true }),
                    _ => stage.output = Some(OutputTarget { path, append: false }),
                }
            }
            // Pipes and separators never reach a single stage.
            _ => {}
        }
    }

    Ok(stage)
}

impl Stage {
    /// Open the stage's files and move them onto stdin/stdout. With
    /// `detach_stdin` and no input file, stdin becomes the null device so a
    /// background job cannot take terminal input. Runs in the forked child only.
    pub fn apply(&self, detach_stdin: bool) -> Result<(), RedirectError> {
        let input = match (&self.input, detach_stdin) {
            (Some(path), _) => Some(File::open(path).map_err(RedirectError::OpenInput)?),
            (None, true) => File::open(NULL_DEVICE).ok(),
            (None, false) => None,
        };
        if let Some(file) = input {
            duplicate_onto(&file, libc::STDIN_FILENO)?;
        }

        if let Some(target) = &self.output {
            let mut options = OpenOptions::new();
            options.write(true).create(true).mode(0o666);
            if target.append {
                options.append(true);
            } else {
                options.truncate(true);
            }
            let file = options.open(&target.path).map_err(RedirectError::OpenOutput)?;
            duplicate_onto(&file, libc::STDOUT_FILENO)?;
        }
        Ok(())
    }
}

/// `dup2` the file onto `target`; the original descriptor closes when `file`
/// is dropped by the caller.
fn duplicate_onto(file: &File, target: libc::c_int) -> Result<(), RedirectError> {
    if unsafe { libc::dup2(file.as_raw_fd(), target) } < 0 {
        return Err(RedirectError::Duplicate(std::io::Error::last_os_error()));
    }
    Ok(())
}
