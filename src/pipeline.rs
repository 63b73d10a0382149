use std::io::{self, Write};
use std::os::fd::AsRawFd;

use os_pipe::{PipeReader, PipeWriter};

use crate::builtins::{self, BuiltinAction, BuiltinKind};
use crate::error::ShellError;
use crate::foreground::{self, Launched};
use crate::job_control;
use crate::launcher;
use crate::parser::{Segment, Token};
use crate::redirect;
use crate::shell::Shell;
use crate::signals;

/// Run one command segment (no top-level `;` or `&`) as a pipeline.
pub fn run(shell: &mut Shell, segment: &Segment) -> BuiltinAction {
    let background = segment.background;
    let stages: Vec<&[Token]> = segment.tokens.split(|t| *t == Token::Pipe).collect();

    if let [stage] = stages.as_slice() {
        if let Some(program) = stage.first().and_then(Token::as_word) {
            if builtins::classify(program) == BuiltinKind::Special {
                return run_special_in_shell(shell, program, stage);
            }
        }
    }

    let (launched, error) = launch(shell, &stages, background);
    if let Some(err) = error {
        eprintln!("{err}");
    }
    if launched.pids.is_empty() {
        return BuiltinAction::Continue;
    }
    foreground::settle(shell, launched, &segment.text, background);
    BuiltinAction::Continue
}

fn run_special_in_shell(shell: &mut Shell, program: &str, stage: &[Token]) -> BuiltinAction {
    if redirect::has_redirection(stage) {
        eprintln!("{}", ShellError::UnsupportedRedirection(program.to_string()));
        return BuiltinAction::Continue;
    }
    let args: Vec<String> = stage[1..]
        .iter()
        .filter_map(Token::as_word)
        .map(str::to_string)
        .collect();
    builtins::run_special(shell, program, &args)
}

/// Fork one child per stage into a single process group, wiring each stage's
/// stdout to the next stage's stdin.
///
/// Returns whatever was launched even when a pipe or fork fails part way, so
/// the controller can still wait for or track those stages.
fn launch(
    shell: &mut Shell,
    stages: &[&[Token]],
    background: bool,
) -> (Launched, Option<ShellError>) {
    let mut launched = Launched {
        pgid: 0,
        pids: Vec::with_capacity(stages.len()),
    };
    // Buffered output would otherwise be flushed twice, once by each process.
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();

    let mut input: Option<PipeReader> = None;
    for (index, stage) in stages.iter().enumerate() {
        let is_last = index + 1 == stages.len();
        let pipe = if is_last {
            None
        } else {
            match os_pipe::pipe() {
                Ok(pipe) => Some(pipe),
                Err(err) => return (launched, Some(ShellError::io("pipe", err))),
            }
        };

        let pid = unsafe { libc::fork() };
        if pid < 0 {
            let err = io::Error::last_os_error();
            return (launched, Some(ShellError::io("fork", err)));
        }

        if pid == 0 {
            let interactive = shell.interactive;
            prepare_child(launched.pgid, interactive && !background, input, pipe);
            launcher::run_stage(shell, stage, background && index == 0);
        }

        if launched.pgid == 0 {
            launched.pgid = pid;
        }
        if let Err(err) = job_control::set_process_group(pid, launched.pgid) {
            tracing::warn!(pid, pgid = launched.pgid, %err, "setpgid failed");
        }
        launched.pids.push(pid);
        tracing::debug!(pid, pgid = launched.pgid, stage = index, "forked stage");

        // Drops the previous read end and this stage's write end in the parent.
        input = pipe.map(|(reader, _writer)| reader);
    }

    (launched, None)
}

/// Child side of a fork: join the pipeline's group, take the terminal when in
/// the foreground, restore default signals, and wire stdin/stdout.
fn prepare_child(
    pgid: libc::pid_t,
    take_terminal: bool,
    input: Option<PipeReader>,
    pipe: Option<(PipeReader, PipeWriter)>,
) {
    let _ = job_control::set_process_group(0, pgid);
    if take_terminal && unsafe { libc::isatty(libc::STDIN_FILENO) } == 1 {
        let _ = job_control::set_terminal_foreground(libc::STDIN_FILENO, unsafe { libc::getpgrp() });
    }
    signals::reset_for_child();

    if let Some(reader) = input {
        if unsafe { libc::dup2(reader.as_raw_fd(), libc::STDIN_FILENO) } < 0 {
            eprintln!("hopsh: dup2: {}", io::Error::last_os_error());
            launcher::terminate(1);
        }
    }
    if let Some((_reader, writer)) = pipe {
        if unsafe { libc::dup2(writer.as_raw_fd(), libc::STDOUT_FILENO) } < 0 {
            eprintln!("hopsh: dup2: {}", io::Error::last_os_error());
            launcher::terminate(1);
        }
    }
}
