//! Device process launcher
//!
//! Spawns the device process as the leader of a fresh process group, with
//! dedicated pipes substituted for its stdin and stdout. Group leadership
//! is what lets teardown reach grandchildren with a single group kill.
//!
//! Both host-side pipe fds are switched to non-blocking mode immediately
//! after the spawn. That switch is load-bearing: every transport operation
//! promises to block only inside the readiness wait, which cannot hold if
//! a pipe fd would block in `read(2)`/`write(2)` itself. A child whose fds
//! cannot be made non-blocking is killed on the spot.

use crate::error::TransportError;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use tracing::debug;

/// Everything needed to start one device process.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchPlan {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Start the device process: own process group, piped stdin/stdout,
    /// both host-side pipe ends non-blocking. Stderr is inherited so the
    /// device's diagnostics land on the host's stderr.
    pub fn spawn(&self) -> Result<Child, TransportError> {
        debug!(
            program = %self.program.display(),
            args = ?self.args,
            "launching device process"
        );

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .process_group(0);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            TransportError::Setup(format!(
                "failed to launch device process '{}': {}",
                self.program.display(),
                e
            ))
        })?;

        let result = set_nonblocking_endpoints(&child);
        if let Err(err) = result {
            // The fds are unusable under the timeout contract; don't leave
            // a half-wired child behind. The launch helper may already
            // have spawned the simulator, so the whole group goes.
            kill_process_group(&mut child);
            return Err(err);
        }

        debug!(pid = child.id(), "device process started");
        Ok(child)
    }
}

/// Kill the child and its entire process group. The child was started as
/// its own group leader, so its pid doubles as the pgid.
fn kill_process_group(child: &mut Child) {
    let pid = Pid::from_raw(child.id() as i32);
    let _ = kill(pid, Signal::SIGKILL);
    let _ = child.wait();
    let _ = killpg(pid, Signal::SIGKILL);
}

fn set_nonblocking_endpoints(child: &Child) -> Result<(), TransportError> {
    let stdin_fd = child
        .stdin
        .as_ref()
        .ok_or_else(|| TransportError::Setup("child stdin was not piped".to_string()))?
        .as_raw_fd();
    let stdout_fd = child
        .stdout
        .as_ref()
        .ok_or_else(|| TransportError::Setup("child stdout was not piped".to_string()))?
        .as_raw_fd();

    set_nonblocking(stdin_fd)?;
    set_nonblocking(stdout_fd)?;
    Ok(())
}

/// Add `O_NONBLOCK` to the fd's status flags and read them back to confirm
/// the flag actually stuck.
fn set_nonblocking(fd: RawFd) -> Result<(), TransportError> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)
        .map_err(|e| TransportError::Setup(format!("F_GETFL on fd {} failed: {}", fd, e)))?;
    let wanted = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(wanted))
        .map_err(|e| TransportError::Setup(format!("F_SETFL on fd {} failed: {}", fd, e)))?;

    let applied = fcntl(fd, FcntlArg::F_GETFL)
        .map_err(|e| TransportError::Setup(format!("F_GETFL on fd {} failed: {}", fd, e)))?;
    if !OFlag::from_bits_truncate(applied).contains(OFlag::O_NONBLOCK) {
        return Err(TransportError::Setup(format!(
            "cannot set fd {} to non-blocking",
            fd
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_plan_builder() {
        let plan = LaunchPlan::new("/bin/cat")
            .with_args(vec!["-u".to_string()])
            .with_working_dir("/tmp");
        assert_eq!(plan.program, PathBuf::from("/bin/cat"));
        assert_eq!(plan.args, vec!["-u".to_string()]);
        assert_eq!(plan.working_dir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_spawn_nonexistent_program_fails_setup() {
        let plan = LaunchPlan::new("/nonexistent/device-binary");
        let err = plan.spawn().unwrap_err();
        assert!(matches!(err, TransportError::Setup(_)));
    }

    #[test]
    fn test_spawned_child_has_nonblocking_pipes() {
        let plan = LaunchPlan::new("/bin/cat");
        let mut child = plan.spawn().unwrap();

        for fd in [
            child.stdin.as_ref().unwrap().as_raw_fd(),
            child.stdout.as_ref().unwrap().as_raw_fd(),
        ] {
            let flags = fcntl(fd, FcntlArg::F_GETFL).unwrap();
            assert!(
                OFlag::from_bits_truncate(flags).contains(OFlag::O_NONBLOCK),
                "fd {} not non-blocking",
                fd
            );
        }

        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn test_kill_process_group_reaches_grandchildren() {
        use std::os::unix::fs::PermissionsExt;

        // Helper script that backgrounds a grandchild, records its pid,
        // then sits on stdin the way a device wrapper would.
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("wrapper.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30 &\necho $! > \"$1\"\nexec cat\n").unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let pid_file = dir.path().join("grandchild.pid");
        let plan = LaunchPlan::new(&script)
            .with_args(vec![pid_file.display().to_string()]);
        let mut child = plan.spawn().unwrap();

        let mut grandchild = None;
        for _ in 0..50 {
            if let Ok(contents) = std::fs::read_to_string(&pid_file) {
                if let Ok(pid) = contents.trim().parse::<i32>() {
                    grandchild = Some(Pid::from_raw(pid));
                    break;
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        let grandchild = grandchild.expect("grandchild pid was never recorded");

        kill_process_group(&mut child);

        // The group kill must have reached the backgrounded grandchild.
        // Dead means ESRCH, or a zombie still waiting on the init reaper.
        let mut gone = false;
        for _ in 0..50 {
            if kill(grandchild, None) == Err(nix::errno::Errno::ESRCH) {
                gone = true;
                break;
            }
            let stat = std::fs::read_to_string(format!("/proc/{}/stat", grandchild));
            match stat {
                Err(_) => {
                    gone = true;
                    break;
                }
                Ok(stat) => {
                    // State is the first field after the parenthesized comm.
                    if let Some(rest) = stat.rsplit(')').next() {
                        if rest.trim_start().starts_with('Z') {
                            gone = true;
                            break;
                        }
                    }
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        assert!(gone, "grandchild survived the group kill");
    }

    #[test]
    fn test_spawned_child_leads_own_process_group() {
        let plan = LaunchPlan::new("/bin/cat");
        let mut child = plan.spawn().unwrap();

        let pid = nix::unistd::Pid::from_raw(child.id() as i32);
        let pgid = nix::unistd::getpgid(Some(pid)).unwrap();
        assert_eq!(pgid, pid);

        let _ = child.kill();
        let _ = child.wait();
    }
}
