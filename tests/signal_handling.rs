mod common;

use std::io::Write;
use std::process::Command;
use std::time::Duration;

use common::{TempDir, spawn_shell, stdout_of};

fn send(signal: &str, pid: u32) {
    let status = Command::new("kill")
        .args([signal, &pid.to_string()])
        .status()
        .expect("run kill");
    assert!(status.success());
}

#[test]
fn interrupt_and_stop_at_the_prompt_are_absorbed() {
    let dir = TempDir::new("absorb");
    let mut child = spawn_shell(dir.path());
    let pid = child.id();
    let stdin = child.stdin.as_mut().expect("stdin");
    writeln!(stdin, "printf 'before\\n'").expect("write line");
    std::thread::sleep(Duration::from_millis(300));

    // The shell is now blocked reading its next line with no foreground job.
    send("-INT", pid);
    send("-TSTP", pid);
    send("-TTOU", pid);
    std::thread::sleep(Duration::from_millis(100));

    writeln!(stdin, "printf 'after\\n'").expect("write line");
    writeln!(stdin, "exit").expect("write line");
    let output = child.wait_with_output().expect("wait output");

    assert!(output.status.success());
    assert_eq!(stdout_of(&output), "before\nafter\nlogout\n");
}
