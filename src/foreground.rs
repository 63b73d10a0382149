use std::io::Write;

use crate::error::{Result, ShellError};
use crate::job_control::{self, ForegroundTerminalGuard};
use crate::jobs::JobState;
use crate::shell::Shell;
use crate::status::WaitEvent;

/// What the orchestrator hands over once every stage has been forked.
#[derive(Debug)]
pub struct Launched {
    pub pgid: libc::pid_t,
    /// Stage pids in pipeline order; the last one decides the outcome.
    pub pids: Vec<libc::pid_t>,
}

/// Lifecycle of one pipeline invocation while the shell is waiting on it.
///
/// `Dispatching` only ever moves to `Running`; `Running` ends in `Done` once
/// every member is reaped or in `Stopped` as soon as one member stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Dispatching,
    Running {
        members: Vec<libc::pid_t>,
        last_stage: libc::pid_t,
        outcome: Option<WaitEvent>,
    },
    Done(Option<WaitEvent>),
    /// Members that were still alive when the stop was seen.
    Stopped { members: Vec<libc::pid_t> },
}

impl PipelineState {
    fn start(self, members: Vec<libc::pid_t>) -> Self {
        match (self, members.last().copied()) {
            (PipelineState::Dispatching, Some(last_stage)) => PipelineState::Running {
                members,
                last_stage,
                outcome: None,
            },
            (PipelineState::Dispatching, None) => PipelineState::Done(None),
            (state, _) => state,
        }
    }

    fn advance(self, pid: libc::pid_t, event: WaitEvent) -> Self {
        let PipelineState::Running {
            mut members,
            last_stage,
            mut outcome,
        } = self
        else {
            return self;
        };

        match event {
            WaitEvent::Stopped(_) => PipelineState::Stopped { members },
            WaitEvent::Continued => PipelineState::Running {
                members,
                last_stage,
                outcome,
            },
            terminal => {
                members.retain(|&member| member != pid);
                if pid == last_stage {
                    outcome = Some(terminal);
                }
                if members.is_empty() {
                    PipelineState::Done(outcome)
                } else {
                    PipelineState::Running {
                        members,
                        last_stage,
                        outcome,
                    }
                }
            }
        }
    }

    /// The group has no waitable children left, so whatever is still listed
    /// was reaped elsewhere.
    fn finish(self) -> Self {
        match self {
            PipelineState::Running { outcome, .. } => PipelineState::Done(outcome),
            other => other,
        }
    }

    fn is_settled(&self) -> bool {
        matches!(self, PipelineState::Done(_) | PipelineState::Stopped { .. })
    }
}

/// Give `pgid` the terminal and block until it finishes or stops. With
/// `resume`, the group is sent `SIGCONT` after it owns the terminal.
fn wait_in_foreground(
    shell: &Shell,
    pgid: libc::pid_t,
    members: Vec<libc::pid_t>,
    resume: bool,
) -> PipelineState {
    let guard = match ForegroundTerminalGuard::new(pgid, shell.interactive) {
        Ok(guard) => Some(guard),
        Err(err) => {
            tracing::warn!(pgid, %err, "could not hand the terminal to the job");
            None
        }
    };
    shell.foreground.set(pgid);

    if resume {
        if let Err(err) = job_control::signal_group(pgid, libc::SIGCONT) {
            tracing::warn!(pgid, %err, "SIGCONT failed");
        }
    }

    let mut state = PipelineState::Dispatching.start(members);
    while !state.is_settled() {
        state = match job_control::wait_for_group(pgid) {
            Ok(Some((pid, event))) => {
                tracing::debug!(pgid, pid, ?event, "foreground member changed state");
                state.advance(pid, event)
            }
            Ok(None) => state.finish(),
            Err(err) => {
                tracing::warn!(pgid, %err, "waitpid failed in foreground");
                state.finish()
            }
        };
    }

    shell.foreground.clear();
    drop(guard);
    state
}

/// Hand a freshly launched pipeline to the job table (background) or wait on
/// it (foreground), recording it as stopped if it stops.
pub fn settle(shell: &mut Shell, launched: Launched, name: &str, background: bool) {
    let pgid = launched.pgid;
    if background {
        shell.jobs.insert(pgid, name, JobState::Running, launched.pids);
        return;
    }

    match wait_in_foreground(shell, pgid, launched.pids, false) {
        PipelineState::Stopped { members } => {
            match shell.jobs.insert(pgid, name, JobState::Stopped, members) {
                Some(number) => report_stopped(shell, number),
                None => {
                    eprintln!("hopsh: job table full, killed stopped job {name}");
                    shell.jobs.discard_untracked(pgid);
                }
            }
        }
        PipelineState::Done(outcome) => {
            let status = outcome.map(WaitEvent::exit_code);
            tracing::debug!(pgid, ?status, "foreground pipeline finished");
        }
        _ => {}
    }
}

fn report_stopped(shell: &Shell, number: usize) {
    if let Some(job) = shell.jobs.find_by_number(number) {
        eprintln!("\n[{number}] Stopped {}", job.name);
    }
}

/// `fg [n]`
pub fn fg(shell: &mut Shell, args: &[String]) -> Result<()> {
    if !shell.interactive {
        return Err(ShellError::NoJobControl("fg"));
    }
    let number = select_job(shell, args, "Syntax: fg [job_number]")?;
    bring_to_foreground(shell, number)
}

fn bring_to_foreground(shell: &mut Shell, number: usize) -> Result<()> {
    let job = shell
        .jobs
        .find_by_number(number)
        .cloned()
        .ok_or(ShellError::NoSuchJob)?;
    println!("{}", job.name);
    let _ = std::io::stdout().flush();

    let resume = job.state == JobState::Stopped;
    match wait_in_foreground(shell, job.pgid, job.members().to_vec(), resume) {
        PipelineState::Stopped { members } => {
            if let Some(entry) = shell.jobs.get_mut(number) {
                entry.state = JobState::Stopped;
            }
            shell.jobs.set_members(number, members);
            report_stopped(shell, number);
        }
        _ => {
            shell.jobs.remove_by_pgid(job.pgid);
        }
    }
    Ok(())
}

/// `bg [n]`
pub fn bg(shell: &mut Shell, args: &[String], stdout: &mut dyn Write) -> Result<()> {
    if !shell.interactive {
        return Err(ShellError::NoJobControl("bg"));
    }
    let number = select_job(shell, args, "Syntax: bg [job_number]")?;
    continue_in_background(shell, number, stdout)
}

fn continue_in_background(shell: &mut Shell, number: usize, stdout: &mut dyn Write) -> Result<()> {
    let job = shell.jobs.get_mut(number).ok_or(ShellError::NoSuchJob)?;
    if job.state == JobState::Running {
        return Err(ShellError::JobAlreadyRunning);
    }

    job_control::signal_group(job.pgid, libc::SIGCONT).map_err(|e| ShellError::io("bg", e))?;
    job.state = JobState::Running;
    tracing::debug!(number, pgid = job.pgid, "job continued in background");
    writeln!(stdout, "[{}] {} &", job.number, job.name).map_err(|e| ShellError::io("bg", e))
}

/// No argument picks the most recent job; otherwise the argument must name a
/// live job number.
fn select_job(shell: &Shell, args: &[String], usage: &'static str) -> Result<usize> {
    let number = match args {
        [] => shell.jobs.find_most_recent().map(|job| job.number),
        [arg] => arg
            .parse::<usize>()
            .ok()
            .filter(|&n| shell.jobs.find_by_number(n).is_some()),
        _ => return Err(ShellError::Usage(usage)),
    };
    number.ok_or(ShellError::NoSuchJob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    fn shell() -> Shell {
        Shell::new(&Config::default(), false, std::env::temp_dir())
    }

    fn spawn_group(script: &str) -> libc::pid_t {
        let child = Command::new("sh")
            .args(["-c", script])
            .process_group(0)
            .spawn()
            .expect("spawn sh");
        child.id() as libc::pid_t
    }

    /// Kill and reap one group without touching other tests' children.
    fn reap(pgid: libc::pid_t) {
        let _ = job_control::signal_group(pgid, libc::SIGKILL);
        while let Ok(Some(_)) = job_control::wait_for_group(pgid) {}
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn pipeline_runs_until_every_member_is_reaped() {
        let state = PipelineState::Dispatching.start(vec![10, 11, 12]);
        let state = state.advance(12, WaitEvent::Exited(0));
        assert!(!state.is_settled());
        let state = state.advance(10, WaitEvent::Signaled(libc::SIGPIPE));
        let state = state.advance(11, WaitEvent::Exited(1));
        assert_eq!(state, PipelineState::Done(Some(WaitEvent::Exited(0))));
    }

    #[test]
    fn a_single_stop_settles_the_pipeline() {
        let state = PipelineState::Dispatching
            .start(vec![20, 21])
            .advance(20, WaitEvent::Exited(0))
            .advance(21, WaitEvent::Stopped(libc::SIGTSTP));
        assert_eq!(state, PipelineState::Stopped { members: vec![21] });
        // Settled states ignore further events.
        assert_eq!(
            state.clone().advance(21, WaitEvent::Exited(0)),
            PipelineState::Stopped { members: vec![21] }
        );
    }

    #[test]
    fn lost_children_finish_the_pipeline() {
        assert_eq!(PipelineState::Dispatching.start(vec![]), PipelineState::Done(None));
        let state = PipelineState::Dispatching.start(vec![30]).finish();
        assert_eq!(state, PipelineState::Done(None));
    }

    #[test]
    fn background_launch_is_tracked_as_running() {
        let mut shell = shell();
        let pgid = spawn_group("sleep 30");
        settle(
            &mut shell,
            Launched { pgid, pids: vec![pgid] },
            "sleep 30",
            true,
        );
        let job = shell.jobs.find_most_recent().unwrap();
        assert_eq!((job.pgid, job.state), (pgid, JobState::Running));
        assert_eq!(shell.foreground.get(), None);
        reap(pgid);
    }

    #[test]
    fn foreground_stop_creates_one_stopped_job_then_bg_keeps_its_number() {
        let mut shell = shell();
        let pgid = spawn_group("kill -STOP $$; exit 0");
        settle(
            &mut shell,
            Launched { pgid, pids: vec![pgid] },
            "stopper",
            false,
        );

        assert_eq!(shell.jobs.len(), 1);
        let number = shell.jobs.find_most_recent().unwrap().number;
        assert_eq!(shell.jobs.find_by_number(number).unwrap().state, JobState::Stopped);
        assert_eq!(shell.foreground.get(), None);

        let mut out = Vec::new();
        continue_in_background(&mut shell, number, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), format!("[{number}] stopper &\n"));
        assert_eq!(shell.jobs.find_most_recent().unwrap().number, number);
        assert!(matches!(
            continue_in_background(&mut shell, number, &mut Vec::new()),
            Err(ShellError::JobAlreadyRunning)
        ));
        reap(pgid);
    }

    #[test]
    fn foreground_resume_waits_and_removes_the_job() {
        let mut shell = shell();
        let pgid = spawn_group("kill -STOP $$; exit 0");
        settle(&mut shell, Launched { pgid, pids: vec![pgid] }, "again", false);
        let number = shell.jobs.find_most_recent().unwrap().number;

        bring_to_foreground(&mut shell, number).unwrap();
        assert!(shell.jobs.is_empty());
        assert_eq!(shell.foreground.get(), None);
    }

    #[test]
    fn job_selection_rules() {
        let mut shell = shell();
        assert!(matches!(select_job(&shell, &[], "u"), Err(ShellError::NoSuchJob)));
        shell.jobs.insert(99_999_990, "a", JobState::Stopped, vec![]);
        shell.jobs.insert(99_999_991, "b", JobState::Stopped, vec![]);

        assert_eq!(select_job(&shell, &[], "u").unwrap(), 2);
        assert_eq!(select_job(&shell, &args(&["1"]), "u").unwrap(), 1);
        assert!(matches!(
            select_job(&shell, &args(&["7"]), "u"),
            Err(ShellError::NoSuchJob)
        ));
        assert!(matches!(
            select_job(&shell, &args(&["x"]), "u"),
            Err(ShellError::NoSuchJob)
        ));
        assert!(matches!(
            select_job(&shell, &args(&["1", "2"]), "Syntax: fg [job_number]"),
            Err(ShellError::Usage("Syntax: fg [job_number]"))
        ));
    }

    #[test]
    fn fg_and_bg_need_a_terminal() {
        let mut shell = shell();
        let err = fg(&mut shell, &[]).unwrap_err();
        assert_eq!(err.to_string(), "fg: no job control");
        let err = bg(&mut shell, &[], &mut Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "bg: no job control");
    }
}
