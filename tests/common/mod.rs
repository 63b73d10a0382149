//! Shared harness: every test gets its own working directory, which is also
//! the shell's home and holds its history file.
#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

/// Created on construction, removed with its contents on drop.
pub struct TempDir(PathBuf);

impl TempDir {
    pub fn new(label: &str) -> Self {
        let unique = NEXT_DIR.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "hopsh_test_{label}_{}_{unique}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create temp dir");
        TempDir(dir)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn history_path(&self) -> PathBuf {
        self.0.join(".hopsh_history")
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.0.join(name);
        std::fs::write(&path, contents).expect("write fixture");
        path
    }

    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.0.join(name)).unwrap_or_default()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Start the shell in `dir` with piped standard streams.
pub fn spawn_shell(dir: &Path) -> Child {
    spawn_shell_with(dir, &[])
}

/// Like [`spawn_shell`], with extra environment variables.
pub fn spawn_shell_with(dir: &Path, env: &[(&str, &str)]) -> Child {
    let mut command = Command::new(env!("CARGO_BIN_EXE_hopsh"));
    command
        .current_dir(dir)
        .env("HOME", dir)
        .env("HOPSH_HISTORY", dir.join(".hopsh_history"))
        .env_remove("HOPSH_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env {
        command.env(key, value);
    }
    command.spawn().expect("spawn hopsh")
}

/// Feed `lines` followed by `exit` and collect everything the shell printed.
pub fn run_shell_in(dir: &Path, lines: &[&str]) -> Output {
    run_shell_with(dir, &[], lines)
}

/// Like [`run_shell_in`], with extra environment variables.
pub fn run_shell_with(dir: &Path, env: &[(&str, &str)], lines: &[&str]) -> Output {
    let mut child = spawn_shell_with(dir, env);
    {
        let stdin = child.stdin.as_mut().expect("stdin");
        for line in lines {
            writeln!(stdin, "{line}").expect("write line");
        }
        writeln!(stdin, "exit").expect("write exit");
    }
    child.wait_with_output().expect("wait output")
}

pub fn run_shell(lines: &[&str]) -> Output {
    let dir = TempDir::new("scratch");
    run_shell_in(dir.path(), lines)
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
