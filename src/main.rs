#[cfg(not(unix))]
compile_error!("hopsh relies on POSIX process groups and only builds on Unix");

mod builtins;
mod config;
mod editor;
mod error;
mod executor;
mod foreground;
mod history;
mod job_control;
mod jobs;
mod launcher;
mod parser;
mod pipeline;
mod prompt;
mod redirect;
mod shell;
mod signals;
mod status;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use crate::builtins::BuiltinAction;
use crate::config::Config;
use crate::shell::Shell;

fn init_tracing() {
    let filter = EnvFilter::try_from_env("HOPSH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(is_terminal(libc::STDERR_FILENO))
        .with_target(false)
        .init();
}

fn is_terminal(fd: libc::c_int) -> bool {
    unsafe { libc::isatty(fd) == 1 }
}

fn main() -> ExitCode {
    init_tracing();

    let interactive = [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO]
        .into_iter()
        .all(is_terminal);
    let home = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("hopsh: cannot determine the working directory: {err}");
            PathBuf::from("/")
        }
    };
    let config = Config::from_env();
    tracing::debug!(interactive, ?config, "starting");

    let mut shell = Shell::new(&config, interactive, home);
    if let Err(err) = signals::install(&shell.foreground) {
        eprintln!("hopsh: failed to install signal handlers: {err}");
        return ExitCode::FAILURE;
    }

    loop {
        if shell.interactive {
            shell.poll_jobs();
        }
        let prompt = if shell.interactive {
            let cwd = std::env::current_dir().unwrap_or_else(|_| shell.home.clone());
            prompt::render(&shell.home, &cwd)
        } else {
            String::new()
        };

        match editor::read_line(&prompt, shell.history.entries()) {
            Ok(Some(line)) => {
                if executor::run_input(&mut shell, &line) == BuiltinAction::Exit {
                    return ExitCode::SUCCESS;
                }
            }
            Ok(None) => {
                shell.shutdown();
                if shell.interactive {
                    println!("\nlogout");
                }
                let _ = io::stdout().flush();
                return ExitCode::SUCCESS;
            }
            Err(err) => {
                eprintln!("hopsh: failed to read input: {err}");
                shell.shutdown();
                return ExitCode::FAILURE;
            }
        }
    }
}
