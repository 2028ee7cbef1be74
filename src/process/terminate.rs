//! Two-phase stop protocol for external processes.
//!
//! Roles that must finalize an output file (record) get a cooperative quit
//! signal on stdin and a bounded drain window before the forced kill; roles
//! with nothing to flush skip straight to the kill.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use super::handle::{ExitInfo, ProcHandle};
use super::ProcessError;

/// How a stop request resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process exited on its own within the drain window after the
    /// cooperative signal.
    Cooperative,
    /// The process had to be killed.
    Forced,
    /// The process was already gone when the stop was requested.
    AlreadyExited,
}

/// Stop `handle`, cooperatively when `quit_signal` is supplied, by force
/// otherwise. An I/O error writing the quit signal is treated the same as
/// having no signal and falls through to the forced phase. Always resolves
/// within `drain_timeout + kill_grace`; only a process that survives the
/// forced kill is an error.
pub async fn stop(
    handle: &mut ProcHandle,
    quit_signal: Option<&[u8]>,
    drain_timeout: Duration,
    kill_grace: Duration,
) -> Result<(StopOutcome, ExitInfo), ProcessError> {
    let role = handle.role();

    if let Some(info) = handle.try_wait() {
        debug!("{} process already exited", role);
        return Ok((StopOutcome::AlreadyExited, info));
    }

    if let Some(signal) = quit_signal {
        match handle.send_text(signal).await {
            Ok(()) => match timeout(drain_timeout, handle.wait()).await {
                Ok(info) => {
                    debug!("{} process exited cooperatively", role);
                    return Ok((StopOutcome::Cooperative, info));
                }
                Err(_) => {
                    warn!(
                        "{} process ignored quit signal for {:?}, killing it",
                        role, drain_timeout
                    );
                }
            },
            Err(e) => {
                warn!(
                    "failed to write quit signal to {} process ({}), killing it",
                    role, e
                );
            }
        }
    }

    handle.kill().await;
    match timeout(kill_grace, handle.wait()).await {
        Ok(info) => Ok((StopOutcome::Forced, info)),
        Err(_) => Err(ProcessError::Termination { role }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::handle::SpawnOptions;
    use crate::process::Role;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    const GRACE: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_already_exited() {
        let mut handle =
            ProcHandle::spawn(Role::Record, &cmd(&["true"]), SpawnOptions::default()).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let (outcome, info) = stop(&mut handle, Some(b"q"), Duration::from_secs(5), GRACE)
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::AlreadyExited);
        assert!(info.success());
    }

    #[tokio::test]
    async fn test_cooperative_stop() {
        let mut handle = ProcHandle::spawn(
            Role::Record,
            &cmd(&["sh", "-c", "read line; exit 0"]),
            SpawnOptions::default(),
        )
        .unwrap();

        let (outcome, info) = stop(&mut handle, Some(b"q\n"), Duration::from_secs(5), GRACE)
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::Cooperative);
        assert!(info.success());
    }

    #[tokio::test]
    async fn test_forced_stop_when_signal_ignored() {
        // sleep never reads stdin, so the quit signal is ignored.
        let mut handle =
            ProcHandle::spawn(Role::Record, &cmd(&["sleep", "30"]), SpawnOptions::default())
                .unwrap();

        let (outcome, _) = stop(&mut handle, Some(b"q\n"), Duration::from_millis(200), GRACE)
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::Forced);
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_forced_stop_without_signal() {
        let mut handle =
            ProcHandle::spawn(Role::Receive, &cmd(&["sleep", "30"]), SpawnOptions::default())
                .unwrap();

        let (outcome, _) = stop(&mut handle, None, Duration::from_secs(5), GRACE)
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::Forced);
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_stop_resolves_quickly_for_dead_stdin() {
        // Child closes stdin immediately and then lingers; the write error
        // must fall through to the forced phase instead of surfacing.
        let mut handle = ProcHandle::spawn(
            Role::Record,
            &cmd(&["sh", "-c", "exec 0<&-; sleep 30"]),
            SpawnOptions::default(),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let result = stop(&mut handle, Some(b"q\n"), Duration::from_millis(500), GRACE).await;
        let (outcome, _) = result.unwrap();
        assert!(matches!(
            outcome,
            StopOutcome::Forced | StopOutcome::Cooperative
        ));
        assert!(!handle.is_alive());
    }
}
