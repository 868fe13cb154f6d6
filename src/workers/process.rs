use std::io;
use std::process::ExitStatus;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, warn};

/// A spawned tool running in its own process group.
///
/// The whole group is killed on `terminate` and on drop, so helpers the tool
/// forks do not outlive the job.
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    reaped: bool,
}

impl ProcessHandle {
    pub fn spawn(command: &mut Command) -> io::Result<Self> {
        #[cfg(unix)]
        command.process_group(0);
        command.kill_on_drop(true);

        let child = command.spawn()?;
        let pid = child.id();
        debug!(?pid, "Spawned tool process");
        Ok(Self {
            child,
            pid,
            reaped: false,
        })
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.reaped = true;
        Ok(status)
    }

    /// Kills the process group and reaps the leader.
    pub async fn terminate(&mut self) {
        if self.reaped {
            return;
        }
        self.kill_group();
        if let Err(e) = self.child.kill().await {
            debug!("Tool process already gone: {}", e);
        }
        self.reaped = true;
    }

    #[cfg(unix)]
    fn kill_group(&self) {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return;
        };
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => warn!("Failed to kill process group {}: {}", pid, e),
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&self) {}
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.reaped {
            self.kill_group();
            let _ = self.child.start_kill();
        }
    }
}
