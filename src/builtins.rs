use std::io::Write;
use std::path::PathBuf;

use crate::error::{Result, ShellError};
use crate::executor;
use crate::foreground;
use crate::job_control;
use crate::shell::Shell;

/// Builtins that must run in the shell's own process: they change the working
/// directory, the job table, the history, or end the shell.
const SPECIAL_BUILTINS: &[&str] = &["hop", "exit", "fg", "bg", "log"];

/// Builtins that only print and are safe to run in a forked child.
const REGULAR_BUILTINS: &[&str] = &["reveal", "activities", "ping"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    NotBuiltin,
    Special,
    Regular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinAction {
    Continue,
    Exit,
}

pub fn classify(name: &str) -> BuiltinKind {
    if SPECIAL_BUILTINS.contains(&name) {
        BuiltinKind::Special
    } else if REGULAR_BUILTINS.contains(&name) {
        BuiltinKind::Regular
    } else {
        BuiltinKind::NotBuiltin
    }
}

/// Run a special builtin inside the shell process. Errors are reported here;
/// only `exit` (directly or through `log execute`) ends the session.
pub fn run_special(shell: &mut Shell, program: &str, args: &[String]) -> BuiltinAction {
    let stdout = &mut std::io::stdout();
    let result = match program {
        "exit" => {
            shell.shutdown();
            let _ = writeln!(stdout, "logout");
            return BuiltinAction::Exit;
        }
        "hop" => hop(shell, args),
        "fg" => foreground::fg(shell, args),
        "bg" => foreground::bg(shell, args, stdout),
        "log" => return log_command(shell, args, stdout),
        _ => Ok(()),
    };
    if let Err(err) = result {
        eprintln!("{err}");
    }
    BuiltinAction::Continue
}

/// Run a builtin inside a forked pipeline stage and return the child's exit
/// code. Special builtins act on the child's copy of the shell state, so their
/// effects end with the child.
pub fn run_in_child(
    shell: &mut Shell,
    program: &str,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let result = match program {
        "reveal" => reveal(shell, args, stdout),
        "activities" => activities(shell, stdout),
        "ping" => ping(args, stdout),
        "hop" => hop(shell, args),
        "log" => log_in_child(shell, args, stdout),
        "fg" => Err(ShellError::NoJobControl("fg")),
        "bg" => Err(ShellError::NoJobControl("bg")),
        _ => Ok(()),
    };
    match result {
        Ok(()) => 0,
        Err(err) => {
            let _ = writeln!(stderr, "{err}");
            1
        }
    }
}

// ── Directory builtins ──

fn hop(shell: &mut Shell, args: &[String]) -> Result<()> {
    let target = match args {
        [] => shell.home.clone(),
        [dash] if dash == "-" => match &shell.prev_dir {
            Some(prev) => prev.clone(),
            None => return Ok(()),
        },
        [path] => PathBuf::from(path),
        _ => return Err(ShellError::Usage("hop: too many arguments")),
    };

    let old = std::env::current_dir().map_err(|e| ShellError::io("getcwd", e))?;
    std::env::set_current_dir(&target).map_err(|_| ShellError::NoSuchDirectory)?;
    tracing::debug!(from = %old.display(), to = %target.display(), "hop");
    shell.prev_dir = Some(old);
    Ok(())
}

/// List a directory: `-a` includes dot entries, `-l` prints one per line.
fn reveal(shell: &Shell, args: &[String], stdout: &mut dyn Write) -> Result<()> {
    let mut show_all = false;
    let mut one_per_line = false;
    let mut path_arg: Option<&str> = None;

    for arg in args {
        match arg.strip_prefix('-') {
            Some(flags) if !flags.is_empty() => {
                show_all |= flags.contains('a');
                one_per_line |= flags.contains('l');
            }
            _ if path_arg.is_some() => return Err(ShellError::Usage("reveal: Invalid Syntax!")),
            _ => path_arg = Some(arg.as_str()),
        }
    }

    let target = match path_arg {
        None => std::env::current_dir().map_err(|e| ShellError::io("getcwd", e))?,
        Some("-") => shell.prev_dir.clone().ok_or(ShellError::NoSuchDirectory)?,
        Some(path) => PathBuf::from(path),
    };

    let mut names: Vec<String> = std::fs::read_dir(&target)
        .map_err(|_| ShellError::NoSuchDirectory)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| show_all || !name.starts_with('.'))
        .collect();
    if show_all {
        names.extend([".".to_string(), "..".to_string()]);
    }
    names.sort();

    let write = |stdout: &mut dyn Write| -> std::io::Result<()> {
        if one_per_line {
            for name in &names {
                writeln!(stdout, "{name}")?;
            }
        } else if !names.is_empty() {
            writeln!(stdout, "{}", names.join("  "))?;
        }
        Ok(())
    };
    write(stdout).map_err(|e| ShellError::io("reveal", e))
}

// ── Job builtins ──

/// `[pgid] : name - State` for every tracked job, sorted by name.
fn activities(shell: &Shell, stdout: &mut dyn Write) -> Result<()> {
    for job in shell.jobs.list_sorted() {
        writeln!(stdout, "[{}] : {} - {}", job.pgid, job.name, job.state)
            .map_err(|e| ShellError::io("activities", e))?;
    }
    Ok(())
}

/// `ping <pid> <signal>`: the signal number is reduced modulo 32 before delivery.
fn ping(args: &[String], stdout: &mut dyn Write) -> Result<()> {
    const USAGE: ShellError = ShellError::Usage("Syntax: ping <pid> <signal_number>");

    let [pid, signal] = args else {
        return Err(USAGE);
    };
    let pid: libc::pid_t = pid.parse().map_err(|_| USAGE)?;
    let requested: i64 = signal.parse().map_err(|_| USAGE)?;
    if pid <= 0 {
        return Err(USAGE);
    }

    let actual = requested.rem_euclid(32) as libc::c_int;
    match job_control::signal_pid(pid, actual) {
        Ok(()) => {
            writeln!(stdout, "Sent signal {requested} to process with pid {pid}")
                .map_err(|e| ShellError::io("ping", e))?;
            Ok(())
        }
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Err(ShellError::NoSuchProcess),
        Err(e) => Err(ShellError::io("kill", e)),
    }
}

// ── History builtin ──

/// `log`, `log purge`, `log execute <n>` in the shell process.
fn log_command(shell: &mut Shell, args: &[String], stdout: &mut dyn Write) -> BuiltinAction {
    let result = match args {
        [] => print_history(shell, stdout),
        [purge] if purge == "purge" => {
            shell.history.purge();
            Ok(())
        }
        [execute, index] if execute == "execute" => {
            let line = index
                .parse::<usize>()
                .ok()
                .and_then(|i| shell.history.nth_recent(i))
                .map(str::to_string);
            match line {
                Some(line) => return executor::execute_line(shell, &line),
                None => Err(ShellError::Usage("Invalid history index.")),
            }
        }
        _ => Err(ShellError::Usage("log: Invalid Syntax!")),
    };
    if let Err(err) = result {
        eprintln!("{err}");
    }
    BuiltinAction::Continue
}

/// A pipeline stage may only list the log. Purging would rewrite the history
/// file from a child and executing would run lines in it.
fn log_in_child(shell: &Shell, args: &[String], stdout: &mut dyn Write) -> Result<()> {
    match args {
        [] => print_history(shell, stdout),
        [sub, ..] if sub == "purge" || sub == "execute" => Err(ShellError::Usage(
            "log: purge and execute are only available outside pipelines",
        )),
        _ => Err(ShellError::Usage("log: Invalid Syntax!")),
    }
}

fn print_history(shell: &Shell, stdout: &mut dyn Write) -> Result<()> {
    for entry in shell.history.entries() {
        writeln!(stdout, "{entry}").map_err(|e| ShellError::io("log", e))?;
    }
    Ok(())
}
