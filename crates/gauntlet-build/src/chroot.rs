//! Run the build task inside the prepared root.
//!
//! The parent forks once. The child moves into its own process group,
//! changes root, changes directory to the new `/` and execs the task with
//! only `argv[0]`. If any of those steps fails the child writes the failing
//! stage and its errno into a close-on-exec pipe and exits; a successful exec
//! closes the pipe with nothing written. The parent reads the pipe to EOF,
//! then waits for exactly that child.

use std::ffi::{CStr, CString};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{chdir, chroot, fork, pipe2, setpgid, write, ForkResult, Pid};
use tracing::{debug, info, warn};

use crate::error::{BuildError, BuildResult};

const WAIT_POLL: Duration = Duration::from_millis(50);

/// Step of the child's startup that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecStage {
    ProcessGroup,
    Chroot,
    Chdir,
    Exec,
}

impl ExecStage {
    fn code(self) -> u8 {
        match self {
            Self::ProcessGroup => 1,
            Self::Chroot => 2,
            Self::Chdir => 3,
            Self::Exec => 4,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::ProcessGroup),
            2 => Some(Self::Chroot),
            3 => Some(Self::Chdir),
            4 => Some(Self::Exec),
            _ => None,
        }
    }
}

impl fmt::Display for ExecStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ProcessGroup => "setpgid",
            Self::Chroot => "chroot",
            Self::Chdir => "chdir",
            Self::Exec => "exec",
        })
    }
}

/// How the task ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Exited(i32),
    Signaled(Signal),
    /// Killed by the executor after the configured timeout.
    TimedOut(Duration),
}

impl TaskStatus {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Map a terminal wait status. Stops and continues are not terminal.
    pub fn from_wait(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(Self::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(Self::Signaled(signal)),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with status {code}"),
            Self::Signaled(signal) => write!(f, "killed by {}", signal.as_str()),
            Self::TimedOut(after) => write!(f, "timed out after {}s", after.as_secs()),
        }
    }
}

/// One task invocation.
#[derive(Clone, Debug)]
pub struct TaskRunner {
    root: Option<PathBuf>,
    task: String,
    timeout: Option<Duration>,
}

impl TaskRunner {
    /// Run `task` with `root` as its filesystem root.
    pub fn chrooted(root: impl Into<PathBuf>, task: impl Into<String>) -> Self {
        Self {
            root: Some(root.into()),
            task: task.into(),
            timeout: None,
        }
    }

    /// Run `task` without changing root.
    #[cfg(test)]
    pub(crate) fn unrooted(task: impl Into<String>) -> Self {
        Self {
            root: None,
            task: task.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fork, enter the root, exec the task and wait for it. Blocks the
    /// calling thread.
    pub fn run(&self) -> BuildResult<TaskStatus> {
        let root = match &self.root {
            Some(root) => Some(c_path(root)?),
            None => None,
        };
        let task = CString::new(self.task.as_bytes())
            .map_err(|_| BuildError::InvalidPath(self.task.clone()))?;
        let argv = [task.as_ptr(), std::ptr::null()];

        let (report_rx, report_tx) = pipe2(OFlag::O_CLOEXEC).map_err(BuildError::Process)?;

        // SAFETY: between fork and exec the child only calls async-signal-safe
        // functions on memory prepared before the fork.
        match unsafe { fork() }.map_err(BuildError::Process)? {
            ForkResult::Child => {
                drop(report_rx);
                let (stage, errno) = enter_and_exec(root.as_deref(), &task, &argv);
                let mut report = [0u8; 5];
                report[0] = stage.code();
                report[1..].copy_from_slice(&(errno as i32).to_be_bytes());
                let _ = write(&report_tx, &report);
                // SAFETY: terminate the child without running the parent's
                // atexit handlers or destructors.
                unsafe { nix::libc::_exit(127) }
            }
            ForkResult::Parent { child } => {
                drop(report_tx);
                // The child does this too; whichever runs first wins.
                let _ = setpgid(child, child);
                debug!(pid = child.as_raw(), task = %self.task, "forked task");

                let mut report = Vec::with_capacity(5);
                File::from(report_rx).read_to_end(&mut report)?;
                if let Some((stage, errno)) = decode_report(&report) {
                    let _ = waitpid(child, None);
                    warn!(task = %self.task, %stage, %errno, "task failed to start");
                    return Err(BuildError::Exec { stage, errno });
                }

                let status = wait_for(child, self.timeout)?;
                info!(task = %self.task, %status, "task exited");
                Ok(status)
            }
        }
    }
}

fn c_path(path: &Path) -> BuildResult<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| BuildError::InvalidPath(path.display().to_string()))
}

/// Child side. Only returns on failure.
fn enter_and_exec(
    root: Option<&CStr>,
    task: &CStr,
    argv: &[*const nix::libc::c_char; 2],
) -> (ExecStage, Errno) {
    if let Err(e) = setpgid(Pid::from_raw(0), Pid::from_raw(0)) {
        return (ExecStage::ProcessGroup, e);
    }
    if let Some(root) = root {
        if let Err(e) = chroot(root) {
            return (ExecStage::Chroot, e);
        }
    }
    if let Err(e) = chdir(c"/") {
        return (ExecStage::Chdir, e);
    }
    // SAFETY: `task` and `argv` are NUL-terminated and outlive the call.
    unsafe { nix::libc::execv(task.as_ptr(), argv.as_ptr()) };
    (ExecStage::Exec, Errno::last())
}

fn decode_report(report: &[u8]) -> Option<(ExecStage, Errno)> {
    if report.len() != 5 {
        return None;
    }
    let stage = ExecStage::from_code(report[0])?;
    let errno = i32::from_be_bytes([report[1], report[2], report[3], report[4]]);
    Some((stage, Errno::from_raw(errno)))
}

/// Wait for `child`; past `timeout`, kill its process group.
fn wait_for(child: Pid, timeout: Option<Duration>) -> BuildResult<TaskStatus> {
    let deadline = timeout.map(|t| (Instant::now() + t, t));
    let flags = deadline.map(|_| WaitPidFlag::WNOHANG);
    loop {
        match waitpid(child, flags) {
            Ok(WaitStatus::StillAlive) => {
                if let Some((at, after)) = deadline {
                    if Instant::now() >= at {
                        warn!(pid = child.as_raw(), "task timed out, killing process group");
                        if let Err(e) = killpg(child, Signal::SIGKILL) {
                            warn!(error = %e, "killpg failed");
                        }
                        let _ = waitpid(child, None);
                        return Ok(TaskStatus::TimedOut(after));
                    }
                }
                std::thread::sleep(WAIT_POLL);
            }
            Ok(status) => {
                if let Some(status) = TaskStatus::from_wait(status) {
                    return Ok(status);
                }
            }
            Err(Errno::EINTR) => {}
            Err(e) => return Err(BuildError::Process(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let pid = Pid::from_raw(1);
        assert_eq!(
            TaskStatus::from_wait(WaitStatus::Exited(pid, 0)),
            Some(TaskStatus::Exited(0))
        );
        assert_eq!(
            TaskStatus::from_wait(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            Some(TaskStatus::Signaled(Signal::SIGKILL))
        );
        assert_eq!(TaskStatus::from_wait(WaitStatus::StillAlive), None);
        assert!(TaskStatus::Exited(0).success());
        assert!(!TaskStatus::Exited(2).success());
        assert!(!TaskStatus::TimedOut(Duration::from_secs(1)).success());
    }

    #[test]
    fn status_display() {
        assert_eq!(TaskStatus::Exited(3).to_string(), "exited with status 3");
        assert_eq!(
            TaskStatus::Signaled(Signal::SIGKILL).to_string(),
            "killed by SIGKILL"
        );
    }

    #[test]
    fn report_decoding() {
        let mut report = vec![ExecStage::Chroot.code()];
        report.extend_from_slice(&(Errno::EPERM as i32).to_be_bytes());
        assert_eq!(decode_report(&report), Some((ExecStage::Chroot, Errno::EPERM)));
        assert_eq!(decode_report(&[]), None);
        assert_eq!(decode_report(&[9, 0, 0, 0, 1]), None);
    }

    #[test]
    fn exit_status_is_reported() {
        assert_eq!(TaskRunner::unrooted("/bin/true").run().unwrap(), TaskStatus::Exited(0));
        assert_eq!(TaskRunner::unrooted("/bin/false").run().unwrap(), TaskStatus::Exited(1));
    }

    #[test]
    fn missing_executable_is_an_exec_error() {
        let err = TaskRunner::unrooted("/nonexistent/task").run().unwrap_err();
        assert!(matches!(
            err,
            BuildError::Exec {
                stage: ExecStage::Exec,
                errno: Errno::ENOENT
            }
        ));
    }

    #[test]
    fn timeout_kills_the_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow.sh");
        std::fs::write(&script, "#!/bin/sh\n/bin/sleep 30 &\n/bin/sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::os::unix::fs::PermissionsExt::from_mode(0o755)).unwrap();

        let started = Instant::now();
        let status = TaskRunner::unrooted(script.to_str().unwrap())
            .with_timeout(Some(Duration::from_millis(300)))
            .run()
            .unwrap();
        assert_eq!(status, TaskStatus::TimedOut(Duration::from_millis(300)));
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn fast_task_finishes_before_timeout() {
        let status = TaskRunner::unrooted("/bin/true")
            .with_timeout(Some(Duration::from_secs(30)))
            .run()
            .unwrap();
        assert_eq!(status, TaskStatus::Exited(0));
    }

    #[test]
    fn empty_root_never_runs_the_task() {
        // Without privileges chroot fails; with them the task is missing.
        let dir = tempfile::tempdir().unwrap();
        let err = TaskRunner::chrooted(dir.path(), "/bin/true").run().unwrap_err();
        assert!(matches!(err, BuildError::Exec { .. }));
    }
}
