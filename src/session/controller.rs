//! Session controller: the single state machine coordinating the role
//! supervisors and the bitrate monitor.
//!
//! Every public operation runs under one controller-wide lock, so requests
//! arriving from API handlers and background timers are totally ordered.
//! Operations themselves are bounded (spawn either completes or fails, stops
//! resolve within their timeouts); callers that must stay responsive invoke
//! them from their own tasks.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::bitrate::{BitrateMonitor, BitrateSample};
use crate::process::handle::SpawnOptions;
use crate::process::{ExitNotice, Role, RoleSupervisor, StopDisposition, StopOutcome};
use crate::volume::VolumeControl;

use super::commands::SessionCommands;
use super::status::{
    PlayState, RecordState, SendState, SessionEvent, SessionState, SessionStatusHandle,
    StreamState,
};

/// The in-band quit request ffmpeg understands on stdin. The newline keeps
/// line-buffered readers from waiting on more input.
const QUIT_SIGNAL: &[u8] = b"q\n";

/// Everything the controller needs besides its collaborators. A plain
/// struct so tests can wire in stand-in commands.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub commands: SessionCommands,
    /// Playback source; `None` disables the existence check (tests).
    pub recording_file: Option<PathBuf>,
    pub timeouts: crate::config::TimeoutsConfig,
    pub monitor_interval: Duration,
    pub probe_timeout: Duration,
    /// Whether stopping receive also stops an in-progress recording.
    pub stop_record_with_receive: bool,
}

pub struct SessionController {
    ops: Mutex<()>,
    status: SessionStatusHandle,
    receive: RoleSupervisor,
    record: RoleSupervisor,
    send: RoleSupervisor,
    play: RoleSupervisor,
    monitor: BitrateMonitor,
    volume: Arc<dyn VolumeControl>,
    options: SessionOptions,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        options: SessionOptions,
        volume: Arc<dyn VolumeControl>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Arc<Self> {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let (sample_tx, sample_rx) = mpsc::unbounded_channel();
        let kill_grace = options.timeouts.kill_grace();

        let controller = Arc::new(Self {
            ops: Mutex::new(()),
            status: SessionStatusHandle::default(),
            receive: RoleSupervisor::new(Role::Receive, exit_tx.clone(), kill_grace),
            record: RoleSupervisor::new(Role::Record, exit_tx.clone(), kill_grace),
            send: RoleSupervisor::new(Role::Send, exit_tx.clone(), kill_grace),
            play: RoleSupervisor::new(Role::Play, exit_tx, kill_grace),
            monitor: BitrateMonitor::new(sample_tx, options.probe_timeout),
            volume,
            options,
            events,
        });

        Self::spawn_exit_loop(Arc::downgrade(&controller), exit_rx);
        Self::spawn_sample_loop(Arc::downgrade(&controller), sample_rx);

        controller
    }

    pub fn status(&self) -> SessionStatusHandle {
        self.status.clone()
    }

    pub fn volume(&self) -> Arc<dyn VolumeControl> {
        Arc::clone(&self.volume)
    }

    /// Start receiving the incoming stream and monitoring its bitrate.
    /// No-op when already receiving.
    pub async fn begin_receive(&self) -> Result<()> {
        let _guard = self.ops.lock().await;

        if self.status.get().await.stream == StreamState::Receiving {
            debug!("begin_receive: already receiving");
            return Ok(());
        }

        if let Err(e) = self
            .receive
            .start(
                &self.options.commands.receive,
                SpawnOptions {
                    capture_stdout: false,
                    drain_stderr: true,
                },
            )
            .await
        {
            self.report_error(format!("failed to start receiving: {e}")).await;
            return Err(e).context("failed to start receive process");
        }

        self.status
            .update(|s| {
                s.stream = StreamState::Receiving;
                s.monitoring = true;
                s.last_error = None;
            })
            .await;
        self.monitor
            .start_polling(
                self.options.commands.probe.clone(),
                self.options.monitor_interval,
            )
            .await;
        self.emit_state().await;
        info!("receive session started");
        Ok(())
    }

    /// Stop receiving. Depending on policy this also drains an in-progress
    /// recording first. The session is idle when this returns, whether the
    /// stops were cooperative or forced.
    pub async fn end_receive(&self) -> Result<()> {
        let _guard = self.ops.lock().await;

        if self.options.stop_record_with_receive && self.record.is_active().await {
            self.stop_record_locked().await;
        }

        if let Err(e) = self
            .receive
            .stop(None, self.options.timeouts.stop())
            .await
        {
            self.report_error(format!("failed to stop receiving: {e}")).await;
        }

        self.monitor.stop_polling().await;
        self.status
            .update(|s| {
                s.stream = StreamState::Idle;
                s.monitoring = false;
                s.bitrate = None;
            })
            .await;
        self.emit_state().await;
        info!("receive session stopped");
        Ok(())
    }

    /// Start recording the stream tap to the recording file. No-op when
    /// already recording.
    pub async fn begin_record(&self) -> Result<()> {
        let _guard = self.ops.lock().await;

        if self.status.get().await.record == RecordState::Recording {
            debug!("begin_record: already recording");
            return Ok(());
        }

        if let Some(file) = &self.options.recording_file {
            if let Some(dir) = file.parent() {
                std::fs::create_dir_all(dir).context("failed to create recordings directory")?;
            }
        }

        let command = self.options.commands.record.build();
        if let Err(e) = self
            .record
            .start(
                &command,
                SpawnOptions {
                    capture_stdout: false,
                    drain_stderr: true,
                },
            )
            .await
        {
            self.report_error(format!("failed to start recording: {e}")).await;
            return Err(e).context("failed to start record process");
        }

        self.status
            .update(|s| {
                s.record = RecordState::Recording;
                s.last_error = None;
            })
            .await;
        self.emit_state().await;
        info!("recording started");
        Ok(())
    }

    /// Stop the recording, giving the encoder its drain window to finalize
    /// the output file before any forced kill.
    pub async fn end_record(&self) -> Result<StopDisposition> {
        let _guard = self.ops.lock().await;
        let disposition = self.stop_record_locked().await;
        self.emit_state().await;
        Ok(disposition)
    }

    /// Start or stop playback of the recorded file. The play process exits
    /// by itself at end of file; that exit is observed and reflected without
    /// another toggle.
    pub async fn toggle_play(&self) -> Result<PlayState> {
        let _guard = self.ops.lock().await;

        if self.play.is_active().await {
            if let Err(e) = self.play.stop(None, self.options.timeouts.stop()).await {
                self.report_error(format!("failed to stop playback: {e}")).await;
            }
            self.status.update(|s| s.play = PlayState::Idle).await;
            self.emit_state().await;
            info!("playback stopped");
            return Ok(PlayState::Idle);
        }

        if let Some(file) = &self.options.recording_file {
            if !file.exists() {
                bail!("no recording available at {:?}", file);
            }
        }

        if let Err(e) = self
            .play
            .start(
                &self.options.commands.play,
                SpawnOptions {
                    capture_stdout: false,
                    drain_stderr: true,
                },
            )
            .await
        {
            self.report_error(format!("failed to start playback: {e}")).await;
            return Err(e).context("failed to start play process");
        }

        self.status.update(|s| s.play = PlayState::Playing).await;
        self.emit_state().await;
        info!("playback started");
        Ok(PlayState::Playing)
    }

    /// Flip the output mute through the volume collaborator. Mute is a
    /// cosmetic overlay; it does not touch any role process.
    pub async fn toggle_mute(&self) -> Result<bool> {
        let _guard = self.ops.lock().await;

        let muted = !self.volume.muted().await?;
        self.volume.set_muted(muted).await?;
        self.status.update(|s| s.muted = muted).await;
        self.emit_state().await;
        info!("output {}", if muted { "muted" } else { "unmuted" });
        Ok(muted)
    }

    /// Start streaming the capture device to `target_host`. An already
    /// running send session is stopped first, so the stream moves to the
    /// new target.
    pub async fn begin_send(&self, target_host: &str) -> Result<()> {
        let _guard = self.ops.lock().await;

        if self.send.is_active().await {
            if let Err(e) = self.send.stop(None, self.options.timeouts.stop()).await {
                self.report_error(format!("failed to stop previous send: {e}")).await;
            }
        }

        let command = self.options.commands.send.build(target_host);
        if let Err(e) = self
            .send
            .start(
                &command,
                SpawnOptions {
                    capture_stdout: false,
                    drain_stderr: true,
                },
            )
            .await
        {
            self.report_error(format!("failed to start sending: {e}")).await;
            return Err(e).context("failed to start send process");
        }

        self.status
            .update(|s| {
                s.send = SendState::Sending;
                s.last_error = None;
            })
            .await;
        self.emit_state().await;
        info!("send session started (target {})", target_host);
        Ok(())
    }

    pub async fn end_send(&self) -> Result<()> {
        let _guard = self.ops.lock().await;

        if let Err(e) = self.send.stop(None, self.options.timeouts.stop()).await {
            self.report_error(format!("failed to stop sending: {e}")).await;
        }
        self.status.update(|s| s.send = SendState::Idle).await;
        self.emit_state().await;
        info!("send session stopped");
        Ok(())
    }

    /// Stop every role and the bitrate monitor in parallel, bounded by the
    /// shutdown budget. The one operation allowed to block its caller.
    pub async fn shutdown(&self) -> Result<()> {
        let _guard = self.ops.lock().await;
        info!("shutting down session");

        let stops = async {
            let (record, receive, play, send, _) = tokio::join!(
                self.record
                    .stop(Some(QUIT_SIGNAL), self.options.timeouts.record_drain()),
                self.receive.stop(None, self.options.timeouts.stop()),
                self.play.stop(None, self.options.timeouts.stop()),
                self.send.stop(None, self.options.timeouts.stop()),
                self.monitor.stop_polling(),
            );
            for result in [record, receive, play, send] {
                if let Err(e) = result {
                    warn!("shutdown: {}", e);
                }
            }
        };

        if tokio::time::timeout(self.options.timeouts.shutdown(), stops)
            .await
            .is_err()
        {
            error!(
                "shutdown did not complete within {:?}",
                self.options.timeouts.shutdown()
            );
        }

        self.status
            .update(|s| {
                let muted = s.muted;
                *s = SessionState::default();
                s.muted = muted;
            })
            .await;
        self.emit_state().await;
        info!("session shut down");
        Ok(())
    }

    /// Record stop shared by `end_record` and the receive-stop policy.
    /// Callers hold the ops lock.
    async fn stop_record_locked(&self) -> StopDisposition {
        let disposition = match self
            .record
            .stop(Some(QUIT_SIGNAL), self.options.timeouts.record_drain())
            .await
        {
            Ok(disposition) => disposition,
            Err(e) => {
                self.report_error(format!("failed to stop recording: {e}")).await;
                StopDisposition::Stopped(StopOutcome::Forced)
            }
        };
        self.status.update(|s| s.record = RecordState::Idle).await;
        if matches!(disposition, StopDisposition::Stopped(_)) {
            info!("recording stopped ({:?})", disposition);
        }
        disposition
    }

    async fn report_error(&self, message: String) {
        error!("{}", message);
        self.status.set_error(message.clone()).await;
        let _ = self.events.send(SessionEvent::Error(message));
    }

    async fn emit_state(&self) {
        let state = self.status.get().await;
        let _ = self.events.send(SessionEvent::StateChanged(state));
    }

    /// Reflect unobserved process exits back into the session state.
    /// Requested stops already updated the state inside the operation that
    /// issued them.
    fn spawn_exit_loop(
        controller: Weak<SessionController>,
        mut exits: mpsc::UnboundedReceiver<ExitNotice>,
    ) {
        tokio::spawn(async move {
            while let Some(notice) = exits.recv().await {
                let Some(controller) = controller.upgrade() else {
                    return;
                };
                if notice.requested {
                    debug!("{} exit confirmed ({:?})", notice.role, notice.info);
                    continue;
                }
                controller.handle_unexpected_exit(notice).await;
            }
        });
    }

    async fn handle_unexpected_exit(&self, notice: ExitNotice) {
        let _guard = self.ops.lock().await;
        match notice.role {
            Role::Receive => {
                self.monitor.stop_polling().await;
                self.status
                    .update(|s| {
                        s.stream = StreamState::Idle;
                        s.monitoring = false;
                        s.bitrate = None;
                    })
                    .await;
                self.report_error(format!(
                    "receive process exited unexpectedly ({:?})",
                    notice.info
                ))
                .await;
            }
            Role::Record => {
                self.status.update(|s| s.record = RecordState::Idle).await;
                self.report_error(format!(
                    "record process exited unexpectedly ({:?})",
                    notice.info
                ))
                .await;
            }
            Role::Play => {
                // Reaching end of file is the normal way playback ends.
                self.status.update(|s| s.play = PlayState::Idle).await;
                info!("playback finished");
            }
            Role::Send => {
                self.status.update(|s| s.send = SendState::Idle).await;
                self.report_error(format!(
                    "send process exited unexpectedly ({:?})",
                    notice.info
                ))
                .await;
            }
            Role::Probe => {}
        }
        self.emit_state().await;
    }

    fn spawn_sample_loop(
        controller: Weak<SessionController>,
        mut samples: mpsc::UnboundedReceiver<BitrateSample>,
    ) {
        tokio::spawn(async move {
            while let Some(sample) = samples.recv().await {
                let Some(controller) = controller.upgrade() else {
                    return;
                };
                controller
                    .status
                    .update(|s| s.bitrate = Some(sample))
                    .await;
                let _ = controller.events.send(SessionEvent::Bitrate(sample));
            }
        });
    }
}
