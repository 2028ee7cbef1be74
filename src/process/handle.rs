//! Thin wrapper around one spawned OS process.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use super::{ProcessError, Role};

/// How the spawned process exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Options controlling which child streams the handle keeps open.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpawnOptions {
    /// Keep stdout piped so the creator can read it (probe output).
    pub capture_stdout: bool,
    /// Pipe stderr into a background task that logs each line. Streams we
    /// neither drain nor close would eventually block the child.
    pub drain_stderr: bool,
}

/// One spawned OS process. Owned exclusively by its creator; stdin stays
/// open for cooperative shutdown signals.
#[derive(Debug)]
pub struct ProcHandle {
    role: Role,
    child: Child,
    stdin: Option<ChildStdin>,
    pid: Option<u32>,
}

impl ProcHandle {
    pub fn spawn(role: Role, command: &[String], options: SpawnOptions) -> Result<Self, ProcessError> {
        let program = command
            .first()
            .filter(|p| !p.is_empty())
            .ok_or(ProcessError::EmptyCommand { role })?;

        let mut cmd = Command::new(program);
        cmd.args(&command[1..])
            .stdin(Stdio::piped())
            .stdout(if options.capture_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(if options.drain_stderr {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        // Own process group so kill() can reclaim descendants spawned by a
        // shell wrapper.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|source| ProcessError::Spawn { role, source })?;

        let stdin = child.stdin.take();
        let pid = child.id();

        if options.drain_stderr {
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        debug!("[{} stderr] {}", role, line);
                    }
                });
            }
        }

        debug!("spawned {} process (pid {:?}): {:?}", role, pid, command);

        Ok(Self {
            role,
            child,
            stdin,
            pid,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Non-blocking exit check. Returns the exit info once the process has
    /// been reaped.
    pub fn try_wait(&mut self) -> Option<ExitInfo> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(ExitInfo::from_status(status)),
            Ok(None) => None,
            Err(e) => {
                warn!("try_wait failed for {} process: {}", self.role, e);
                None
            }
        }
    }

    pub fn is_alive(&mut self) -> bool {
        self.try_wait().is_none()
    }

    /// Wait for the process to exit. Blocks only the calling task.
    pub async fn wait(&mut self) -> ExitInfo {
        match self.child.wait().await {
            Ok(status) => ExitInfo::from_status(status),
            Err(e) => {
                warn!("wait failed for {} process: {}", self.role, e);
                ExitInfo::default()
            }
        }
    }

    /// Write bytes to the process's stdin and flush. Fails when stdin was
    /// never opened, was already taken, or the process is gone.
    pub async fn send_text(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "process stdin is closed")
        })?;
        stdin.write_all(bytes).await?;
        stdin.flush().await
    }

    /// Best-effort forced kill. On Unix the whole process group is signaled
    /// so descendants die with the leader; on Windows the process itself is
    /// terminated. The caller still reaps via `wait`.
    pub async fn kill(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }

        if let Err(e) = self.child.start_kill() {
            // InvalidInput means the child was already reaped.
            if e.kind() != std::io::ErrorKind::InvalidInput {
                warn!("kill failed for {} process: {}", self.role, e);
            }
        }
    }
}
