use std::collections::BTreeMap;
use std::fmt;

use crate::config::MAX_JOB_NAME_LEN;
use crate::job_control::{self, Poll};
use crate::status::WaitEvent;

/// The lifecycle state of a tracked job. Finished jobs leave the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobState::Running => "Running",
            JobState::Stopped => "Stopped",
        })
    }
}

/// One pipeline's process group known to the shell.
#[derive(Debug, Clone)]
pub struct Job {
    pub number: usize,
    pub pgid: libc::pid_t,
    pub name: String,
    pub state: JobState,
    /// Stage pids that have not been reaped yet.
    members: Vec<libc::pid_t>,
    /// Final stage of the pipeline; its status is the job's outcome.
    last_stage: libc::pid_t,
    outcome: Option<WaitEvent>,
}

impl Job {
    pub fn members(&self) -> &[libc::pid_t] {
        &self.members
    }
}

/// Completion report produced by [`JobTable::poll_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobNotice {
    ExitedNormally { name: String, pgid: libc::pid_t },
    ExitedAbnormally { name: String, pgid: libc::pid_t },
    Terminated { number: usize, name: String },
}

impl fmt::Display for JobNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobNotice::ExitedNormally { name, pgid } => {
                write!(f, "{name} with pid {pgid} exited normally")
            }
            JobNotice::ExitedAbnormally { name, pgid } => {
                write!(f, "{name} with pid {pgid} exited abnormally")
            }
            JobNotice::Terminated { number, name } => write!(f, "[{number}] Terminated {name}"),
        }
    }
}

impl JobNotice {
    fn emit(&self) {
        match self {
            JobNotice::Terminated { .. } => println!("{self}"),
            _ => eprintln!("{self}"),
        }
    }
}

/// The shell's job table: background and stopped process groups, ordered by
/// job number (which is also insertion order).
pub struct JobTable {
    jobs: BTreeMap<usize, Job>,
    /// Groups launched while the table was full. Reaped quietly and killed at exit.
    untracked: Vec<libc::pid_t>,
    next_number: usize,
    capacity: usize,
    interactive: bool,
}

impl JobTable {
    pub fn new(capacity: usize, interactive: bool) -> Self {
        Self {
            jobs: BTreeMap::new(),
            untracked: Vec::new(),
            next_number: 1,
            capacity,
            interactive,
        }
    }

    /// Track a process group. `members` lists the stage pids still alive, last
    /// stage last; an empty list means the leader is the only member.
    ///
    /// Returns the job number, or `None` when the table is full; the group is
    /// then only remembered for [`JobTable::terminate_all`]. A pgid that is
    /// already tracked keeps its number and only has its state updated.
    pub fn insert(
        &mut self,
        pgid: libc::pid_t,
        name: &str,
        state: JobState,
        members: Vec<libc::pid_t>,
    ) -> Option<usize> {
        if let Some(job) = self.jobs.values_mut().find(|j| j.pgid == pgid) {
            job.state = state;
            return Some(job.number);
        }
        if self.jobs.len() >= self.capacity {
            tracing::warn!(pgid, "job table full, not tracking process group");
            if !self.untracked.contains(&pgid) {
                self.untracked.push(pgid);
            }
            return None;
        }

        let members = if members.is_empty() { vec![pgid] } else { members };
        let number = self.next_number;
        self.next_number += 1;
        self.jobs.insert(
            number,
            Job {
                number,
                pgid,
                name: truncate_name(name),
                state,
                last_stage: *members.last().unwrap_or(&pgid),
                members,
                outcome: None,
            },
        );
        tracing::debug!(number, pgid, ?state, "job added");

        if self.interactive && state == JobState::Running {
            eprintln!("[{number}] {pgid}");
        }
        Some(number)
    }

    pub fn remove_by_pgid(&mut self, pgid: libc::pid_t) -> Option<Job> {
        let number = self.jobs.values().find(|j| j.pgid == pgid)?.number;
        tracing::debug!(number, pgid, "job removed");
        self.jobs.remove(&number)
    }

    pub fn find_by_number(&self, number: usize) -> Option<&Job> {
        self.jobs.get(&number)
    }

    pub fn get_mut(&mut self, number: usize) -> Option<&mut Job> {
        self.jobs.get_mut(&number)
    }

    /// The last inserted entry still present.
    pub fn find_most_recent(&self) -> Option<&Job> {
        self.jobs.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn untracked(&self) -> &[libc::pid_t] {
        &self.untracked
    }

    /// Kill and reap a group that stopped without a job entry; nothing could
    /// ever resume it.
    pub fn discard_untracked(&mut self, pgid: libc::pid_t) {
        if let Err(err) = job_control::signal_group(pgid, libc::SIGKILL) {
            tracing::debug!(pgid, %err, "kill of untracked group failed");
        }
        while let Ok(Some((pid, event))) = job_control::wait_for_group(pgid) {
            tracing::debug!(pgid, pid, ?event, "reaped untracked member");
        }
        self.untracked.retain(|&other| other != pgid);
    }

    /// Record state changes reported for members of `number` by the foreground
    /// wait. Used when `fg` stops again with some stages already gone.
    pub fn set_members(&mut self, number: usize, members: Vec<libc::pid_t>) {
        if let Some(job) = self.jobs.get_mut(&number) {
            if !members.is_empty() {
                job.members = members;
            }
        }
    }

    /// Non-blocking reap of every tracked job. Finished jobs are removed and
    /// their notices returned (and printed when interactive).
    pub fn poll_all(&mut self) -> Vec<JobNotice> {
        let mut notices = Vec::new();
        let numbers: Vec<usize> = self.jobs.keys().copied().collect();

        for number in numbers {
            let Some(job) = self.jobs.get_mut(&number) else {
                continue;
            };
            match poll_job(job) {
                PollResult::Alive => {}
                PollResult::Vanished => {
                    tracing::debug!(number, pgid = job.pgid, "job vanished");
                    self.jobs.remove(&number);
                }
                PollResult::Finished(event) => {
                    if let Some(job) = self.jobs.remove(&number) {
                        tracing::debug!(number, pgid = job.pgid, ?event, "job finished");
                        notices.push(notice_for(job, event));
                    }
                }
            }
        }

        self.untracked.retain(|&pgid| untracked_alive(pgid));

        if self.interactive {
            for notice in &notices {
                notice.emit();
            }
        }
        notices
    }

    /// Jobs ordered by name for display; ties keep job-number order.
    pub fn list_sorted(&self) -> impl Iterator<Item = &Job> + '_ {
        let mut list: Vec<&Job> = self.jobs.values().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list.into_iter()
    }

    /// Kill every group the shell launched, tracked or not, and reap all
    /// remaining children. Shell exit only.
    pub fn terminate_all(&mut self) {
        let groups = self.jobs.values().map(|job| job.pgid).chain(self.untracked.iter().copied());
        for pgid in groups {
            if let Err(err) = job_control::signal_group(pgid, libc::SIGKILL) {
                tracing::debug!(pgid, %err, "kill at exit failed");
            }
        }
        job_control::reap_all_children();
        self.jobs.clear();
        self.untracked.clear();
    }
}

/// Reap whatever an untracked group has finished; false once it is gone.
fn untracked_alive(pgid: libc::pid_t) -> bool {
    loop {
        match job_control::poll_group(pgid) {
            Ok(Poll::Event(..)) => continue,
            Ok(Poll::Quiet) => return true,
            Ok(Poll::NoChild) => return job_control::group_exists(pgid),
            Err(err) => {
                tracing::warn!(pgid, %err, "waitpid failed while polling");
                return true;
            }
        }
    }
}

enum PollResult {
    Alive,
    Vanished,
    Finished(WaitEvent),
}

fn poll_job(job: &mut Job) -> PollResult {
    loop {
        match job_control::poll_group(job.pgid) {
            Ok(Poll::Event(pid, event)) if event.is_terminal() => {
                job.members.retain(|&member| member != pid);
                if pid == job.last_stage || job.outcome.is_none() {
                    job.outcome = Some(event);
                }
                if job.members.is_empty() {
                    return PollResult::Finished(job.outcome.unwrap_or(event));
                }
            }
            Ok(Poll::Event(_, WaitEvent::Stopped(_))) => job.state = JobState::Stopped,
            Ok(Poll::Event(_, _)) => job.state = JobState::Running,
            Ok(Poll::Quiet) => return PollResult::Alive,
            Ok(Poll::NoChild) => {
                return if job_control::group_exists(job.pgid) {
                    PollResult::Alive
                } else {
                    PollResult::Vanished
                };
            }
            Err(err) => {
                tracing::warn!(pgid = job.pgid, %err, "waitpid failed while polling");
                return PollResult::Alive;
            }
        }
    }
}

fn notice_for(job: Job, event: WaitEvent) -> JobNotice {
    match event {
        WaitEvent::Exited(0) => JobNotice::ExitedNormally {
            name: job.name,
            pgid: job.pgid,
        },
        WaitEvent::Signaled(_) => JobNotice::Terminated {
            number: job.number,
            name: job.name,
        },
        _ => JobNotice::ExitedAbnormally {
            name: job.name,
            pgid: job.pgid,
        },
    }
}

fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_JOB_NAME_LEN {
        return name.to_string();
    }
    let mut end = MAX_JOB_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::Command;
    use std::time::Duration;

    fn spawn_group(script: &str) -> libc::pid_t {
        let child = Command::new("sh")
            .args(["-c", script])
            .process_group(0)
            .spawn()
            .expect("spawn sh");
        child.id() as libc::pid_t
    }

    /// Poll until `done` holds or about two seconds pass.
    fn poll_until(table: &mut JobTable, done: impl Fn(&JobTable) -> bool) -> Vec<JobNotice> {
        let mut notices = Vec::new();
        for _ in 0..200 {
            notices.extend(table.poll_all());
            if done(table) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        notices
    }

    #[test]
    fn job_numbers_increase_and_are_never_reused() {
        let mut table = JobTable::new(8, false);
        let first = table.insert(100_001, "a", JobState::Running, vec![]).unwrap();
        let second = table.insert(100_002, "b", JobState::Running, vec![]).unwrap();
        table.remove_by_pgid(100_002);
        let third = table.insert(100_003, "c", JobState::Running, vec![]).unwrap();
        assert_eq!((first, second, third), (1, 2, 3));
    }

    #[test]
    fn insert_is_a_no_op_when_full() {
        let mut table = JobTable::new(1, false);
        assert_eq!(table.insert(100_010, "a", JobState::Running, vec![]), Some(1));
        assert_eq!(table.insert(100_011, "b", JobState::Running, vec![]), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn groups_launched_while_full_are_reaped_and_forgotten() {
        let tracked = spawn_group("sleep 30");
        let overflow = spawn_group("sleep 30");
        let mut table = JobTable::new(1, false);
        table.insert(tracked, "sleep 30", JobState::Running, vec![tracked]);
        assert_eq!(table.insert(overflow, "sleep 30", JobState::Running, vec![overflow]), None);
        assert_eq!(table.untracked(), [overflow]);

        assert!(table.poll_all().is_empty());
        assert_eq!(table.untracked(), [overflow]);

        job_control::signal_group(overflow, libc::SIGKILL).unwrap();
        for _ in 0..200 {
            if table.poll_all().is_empty() && table.untracked().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(table.untracked().is_empty());
        assert_eq!(table.len(), 1);

        job_control::signal_group(tracked, libc::SIGKILL).unwrap();
        poll_until(&mut table, JobTable::is_empty);
    }

    #[test]
    fn stopped_untracked_group_is_killed_on_discard() {
        let tracked = spawn_group("sleep 30");
        let stopped = spawn_group("sleep 30");
        let mut table = JobTable::new(1, false);
        table.insert(tracked, "sleep 30", JobState::Running, vec![tracked]);
        assert_eq!(table.insert(stopped, "sleep 30", JobState::Stopped, vec![stopped]), None);
        job_control::signal_group(stopped, libc::SIGSTOP).unwrap();

        table.discard_untracked(stopped);
        assert!(table.untracked().is_empty());
        assert!(!job_control::group_exists(stopped));

        job_control::signal_group(tracked, libc::SIGKILL).unwrap();
        poll_until(&mut table, JobTable::is_empty);
    }

    #[test]
    fn reinserting_a_pgid_updates_in_place() {
        let mut table = JobTable::new(8, false);
        let number = table.insert(100_020, "vim", JobState::Running, vec![]).unwrap();
        let again = table.insert(100_020, "vim", JobState::Stopped, vec![]).unwrap();
        assert_eq!(number, again);
        assert_eq!(table.len(), 1);
        assert_eq!(table.find_by_number(number).unwrap().state, JobState::Stopped);
    }

    #[test]
    fn removal_preserves_order_and_most_recent() {
        let mut table = JobTable::new(8, false);
        table.insert(100_030, "one", JobState::Running, vec![]);
        table.insert(100_031, "two", JobState::Running, vec![]);
        table.insert(100_032, "three", JobState::Stopped, vec![]);
        assert_eq!(table.find_most_recent().unwrap().number, 3);

        table.remove_by_pgid(100_032);
        assert_eq!(table.find_most_recent().unwrap().name, "two");
        assert!(table.remove_by_pgid(100_032).is_none());
        assert!(table.find_by_number(3).is_none());
        assert_eq!(table.find_by_number(1).unwrap().pgid, 100_030);
    }

    #[test]
    fn list_sorted_orders_by_name_without_touching_table() {
        let mut table = JobTable::new(8, false);
        table.insert(100_040, "sleep 9", JobState::Running, vec![]);
        table.insert(100_041, "cat", JobState::Stopped, vec![]);
        table.insert(100_042, "make", JobState::Running, vec![]);

        let names: Vec<&str> = table.list_sorted().map(|j| j.name.as_str()).collect();
        assert_eq!(names, ["cat", "make", "sleep 9"]);
        assert_eq!(table.find_most_recent().unwrap().name, "make");
    }

    #[test]
    fn long_names_are_truncated_on_char_boundary() {
        let mut table = JobTable::new(8, false);
        let name = "é".repeat(200);
        let number = table.insert(100_050, &name, JobState::Running, vec![]).unwrap();
        let stored = &table.find_by_number(number).unwrap().name;
        assert!(stored.len() <= MAX_JOB_NAME_LEN);
        assert!(name.starts_with(stored.as_str()));
    }

    #[test]
    fn poll_is_idempotent_while_nothing_changes() {
        let pgid = spawn_group("sleep 30");
        let mut table = JobTable::new(8, false);
        table.insert(pgid, "sleep 30", JobState::Running, vec![pgid]);

        assert!(table.poll_all().is_empty());
        assert!(table.poll_all().is_empty());
        let job = table.find_by_number(1).unwrap();
        assert_eq!((job.pgid, job.state), (pgid, JobState::Running));

        job_control::signal_group(pgid, libc::SIGKILL).unwrap();
        poll_until(&mut table, JobTable::is_empty);
    }

    #[test]
    fn poll_tracks_stop_continue_and_exit() {
        let pgid = spawn_group("sleep 30");
        let mut table = JobTable::new(8, false);
        let number = table.insert(pgid, "sleep 30", JobState::Running, vec![pgid]).unwrap();

        job_control::signal_group(pgid, libc::SIGSTOP).unwrap();
        poll_until(&mut table, |t| {
            t.find_by_number(number).map(|j| j.state) == Some(JobState::Stopped)
        });
        assert_eq!(table.len(), 1);

        job_control::signal_group(pgid, libc::SIGCONT).unwrap();
        poll_until(&mut table, |t| {
            t.find_by_number(number).map(|j| j.state) == Some(JobState::Running)
        });
        assert_eq!(table.len(), 1);
        assert_eq!(table.find_most_recent().unwrap().number, number);

        job_control::signal_group(pgid, libc::SIGTERM).unwrap();
        let notices = poll_until(&mut table, JobTable::is_empty);
        assert_eq!(
            notices,
            vec![JobNotice::Terminated {
                number,
                name: "sleep 30".to_string()
            }]
        );
    }

    #[test]
    fn poll_distinguishes_normal_and_abnormal_exit() {
        let ok = spawn_group("exit 0");
        let bad = spawn_group("exit 4");
        let mut table = JobTable::new(8, false);
        table.insert(ok, "fine", JobState::Running, vec![ok]);
        table.insert(bad, "broken", JobState::Running, vec![bad]);

        let notices = poll_until(&mut table, JobTable::is_empty);
        assert!(notices.contains(&JobNotice::ExitedNormally {
            name: "fine".into(),
            pgid: ok
        }));
        assert!(notices.contains(&JobNotice::ExitedAbnormally {
            name: "broken".into(),
            pgid: bad
        }));
        assert_eq!(
            JobNotice::ExitedNormally { name: "fine".into(), pgid: 7 }.to_string(),
            "fine with pid 7 exited normally"
        );
    }

    #[test]
    fn poll_drops_groups_that_are_not_our_children() {
        let mut table = JobTable::new(8, false);
        // Far above any default pid_max, so nothing can exist there.
        table.insert(99_999_999, "ghost", JobState::Running, vec![]);
        assert!(table.poll_all().is_empty());
        assert!(table.is_empty());
    }
}
