//! Everything here runs inside a freshly forked pipeline stage and ends by
//! replacing or terminating that process. Nothing returns to the shell loop.

use std::ffi::CString;
use std::io::{self, Write};

use crate::builtins::{self, BuiltinKind};
use crate::parser::Token;
use crate::redirect;
use crate::shell::Shell;

/// Exit status for a command that could not be found or executed.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit status for a redirection syntax error or a file that could not be opened.
pub const EXIT_REDIRECT_FAILED: i32 = 1;

/// Apply the stage's redirections, then run a builtin or exec the program.
/// `detach_stdin` is set for the first stage of a background pipeline.
pub fn run_stage(shell: &mut Shell, tokens: &[Token], detach_stdin: bool) -> ! {
    let stage = match redirect::extract_redirections(tokens) {
        Ok(stage) => stage,
        Err(err) => {
            eprintln!("{err}");
            terminate(EXIT_REDIRECT_FAILED);
        }
    };
    if let Err(err) = stage.apply(detach_stdin) {
        eprintln!("{err}");
        terminate(EXIT_REDIRECT_FAILED);
    }

    let Some((program, args)) = stage.words.split_first() else {
        terminate(0);
    };

    match builtins::classify(program) {
        BuiltinKind::NotBuiltin => exec(&stage.words),
        _ if program == "exit" => terminate(0),
        _ => {
            let code = builtins::run_in_child(
                shell,
                program,
                args,
                &mut io::stdout(),
                &mut io::stderr(),
            );
            terminate(code)
        }
    }
}

/// Replace the process image; on failure report and exit 127.
fn exec(words: &[String]) -> ! {
    let program = &words[0];
    let argv: Result<Vec<CString>, _> = words.iter().map(|w| CString::new(w.as_bytes())).collect();

    if let Ok(argv) = argv {
        let mut pointers: Vec<*const libc::c_char> = argv.iter().map(|a| a.as_ptr()).collect();
        pointers.push(std::ptr::null());
        unsafe {
            libc::execvp(pointers[0], pointers.as_ptr());
        }
    }

    eprintln!("{program}: command not found");
    terminate(EXIT_NOT_FOUND)
}

/// Flush what the child printed and leave without running the parent's exit
/// handlers.
pub fn terminate(code: i32) -> ! {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    unsafe { libc::_exit(code) }
}
