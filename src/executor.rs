use crate::builtins::BuiltinAction;
use crate::parser::{self, Segment};
use crate::pipeline;
use crate::shell::Shell;

/// Record a line typed at the prompt in the history, then run it.
pub fn run_input(shell: &mut Shell, line: &str) -> BuiltinAction {
    if line.trim().is_empty() {
        return BuiltinAction::Continue;
    }
    shell.history.record(line);
    execute_line(shell, line)
}

/// Tokenize and validate `line`, then run every segment in order. Nothing runs
/// when the line is rejected.
pub fn execute_line(shell: &mut Shell, line: &str) -> BuiltinAction {
    match parser::parse_line(line, &shell.home) {
        Ok(segments) => execute(shell, &segments),
        Err(err) => {
            eprintln!("{err}");
            BuiltinAction::Continue
        }
    }
}

/// Dispatch each `;`/`&` separated segment to the pipeline orchestrator,
/// stopping early only when a segment ends the shell.
pub fn execute(shell: &mut Shell, segments: &[Segment]) -> BuiltinAction {
    if shell.interactive {
        shell.poll_jobs();
    }

    for segment in segments {
        tracing::debug!(background = segment.background, segment = %segment.text, "dispatching");
        if pipeline::run(shell, segment) == BuiltinAction::Exit {
            return BuiltinAction::Exit;
        }
    }
    BuiltinAction::Continue
}
