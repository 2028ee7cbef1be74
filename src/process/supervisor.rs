//! Per-role process supervisor.
//!
//! Owns the lifecycle of exactly one role at a time: start, observe exit,
//! stop. A background waiter task watches the child so a hung process never
//! blocks the caller; every exit, requested or not, is reported through
//! the exit-notice channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use super::handle::{ExitInfo, ProcHandle, SpawnOptions};
use super::terminate::{self, StopOutcome};
use super::{ProcessError, Role};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleState {
    Idle,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDisposition {
    Stopped(StopOutcome),
    NotRunning,
}

/// Delivered once per process exit. `requested` distinguishes "stopped by
/// the supervisor" from "died on its own".
#[derive(Debug, Clone, Copy)]
pub struct ExitNotice {
    pub role: Role,
    pub info: ExitInfo,
    pub requested: bool,
}

struct Inner {
    state: RoleState,
    handle: Option<ProcHandle>,
    // Bumped whenever the supervised process changes so a stale waiter
    // never touches a successor.
    generation: u64,
}

pub struct RoleSupervisor {
    role: Role,
    inner: Arc<Mutex<Inner>>,
    exits: mpsc::UnboundedSender<ExitNotice>,
    kill_grace: Duration,
}

impl RoleSupervisor {
    pub fn new(
        role: Role,
        exits: mpsc::UnboundedSender<ExitNotice>,
        kill_grace: Duration,
    ) -> Self {
        Self {
            role,
            inner: Arc::new(Mutex::new(Inner {
                state: RoleState::Idle,
                handle: None,
                generation: 0,
            })),
            exits,
            kill_grace,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub async fn state(&self) -> RoleState {
        self.inner.lock().await.state
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.state != RoleState::Idle
    }

    /// Start the role's process. A no-op returning `AlreadyRunning` unless
    /// the role is idle. Spawn failures surface synchronously and are never
    /// retried here.
    pub async fn start(
        &self,
        command: &[String],
        options: SpawnOptions,
    ) -> Result<StartOutcome, ProcessError> {
        let mut inner = self.inner.lock().await;
        if inner.state != RoleState::Idle {
            return Ok(StartOutcome::AlreadyRunning);
        }

        inner.state = RoleState::Starting;
        let handle = match ProcHandle::spawn(self.role, command, options) {
            Ok(handle) => handle,
            Err(e) => {
                inner.state = RoleState::Idle;
                return Err(e);
            }
        };

        info!("{} process started (pid {:?})", self.role, handle.id());
        inner.generation += 1;
        let generation = inner.generation;
        inner.handle = Some(handle);
        inner.state = RoleState::Running;
        drop(inner);

        self.spawn_waiter(generation);
        Ok(StartOutcome::Started)
    }

    /// Stop the role's process using the two-phase protocol. Returns
    /// `NotRunning` when there is nothing to stop. The role is back in
    /// `Idle` when this returns, even on a termination error.
    pub async fn stop(
        &self,
        quit_signal: Option<&[u8]>,
        drain_timeout: Duration,
    ) -> Result<StopDisposition, ProcessError> {
        let mut handle = {
            let mut inner = self.inner.lock().await;
            let Some(handle) = inner.handle.take() else {
                return Ok(StopDisposition::NotRunning);
            };
            inner.state = RoleState::Stopping;
            inner.generation += 1; // cancels the waiter
            handle
        };

        let result = terminate::stop(&mut handle, quit_signal, drain_timeout, self.kill_grace).await;

        self.inner.lock().await.state = RoleState::Idle;

        match result {
            Ok((outcome, info)) => {
                info!("{} process stopped ({:?})", self.role, outcome);
                let _ = self.exits.send(ExitNotice {
                    role: self.role,
                    info,
                    requested: true,
                });
                Ok(StopDisposition::Stopped(outcome))
            }
            Err(e) => {
                warn!("{} process failed to stop: {}", self.role, e);
                Err(e)
            }
        }
    }

    fn spawn_waiter(&self, generation: u64) {
        let inner = Arc::clone(&self.inner);
        let exits = self.exits.clone();
        let role = self.role;

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(EXIT_POLL_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let mut guard = inner.lock().await;
                if guard.generation != generation {
                    return; // stopped or replaced
                }
                let Some(handle) = guard.handle.as_mut() else {
                    return;
                };
                if let Some(info) = handle.try_wait() {
                    guard.handle = None;
                    guard.state = RoleState::Idle;
                    guard.generation += 1;
                    drop(guard);

                    info!("{} process exited on its own ({:?})", role, info);
                    let _ = exits.send(ExitNotice {
                        role,
                        info,
                        requested: false,
                    });
                    return;
                }
            }
        });
    }
}
