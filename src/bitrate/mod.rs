//! Periodic bitrate monitoring via short-lived ffprobe processes.
//!
//! Every tick spawns one probe against the stream URL and reads the
//! `format=bit_rate` value it prints. Probe failures are expected while the
//! stream is quiet and degrade to `unavailable` samples; they never stop the
//! monitor. The outstanding probe handle is owned by a single lock shared
//! between the tick loop and `stop_polling`, so the two can never issue
//! conflicting spawn/kill operations on the same process.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::process::handle::SpawnOptions;
use crate::process::{terminate, ProcHandle, Role};

const PROBE_KILL_GRACE: Duration = Duration::from_secs(2);

/// One bitrate reading. `bits_per_second` is `None` when the probe timed
/// out, produced no output, or failed to spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BitrateSample {
    pub bits_per_second: Option<u64>,
    pub at: chrono::DateTime<chrono::Utc>,
}

struct ProbeSlot {
    probe: Option<ProcHandle>,
    generation: u64,
}

struct PollTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct BitrateMonitor {
    slot: Arc<Mutex<ProbeSlot>>,
    task: Mutex<Option<PollTask>>,
    samples: mpsc::UnboundedSender<BitrateSample>,
    probe_timeout: Duration,
}

impl BitrateMonitor {
    pub fn new(samples: mpsc::UnboundedSender<BitrateSample>, probe_timeout: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(ProbeSlot {
                probe: None,
                generation: 0,
            })),
            task: Mutex::new(None),
            samples,
            probe_timeout,
        }
    }

    pub async fn is_polling(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    /// Start the periodic probe loop. Idempotent: a second call while the
    /// loop is already running is a no-op.
    pub async fn start_polling(&self, probe_command: Vec<String>, interval: Duration) {
        let mut task = self.task.lock().await;
        if task.as_ref().map(|t| !t.handle.is_finished()).unwrap_or(false) {
            debug!("bitrate monitor already polling");
            return;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.slot),
            self.samples.clone(),
            probe_command,
            interval,
            self.probe_timeout,
            token.clone(),
        ));
        *task = Some(PollTask { token, handle });
        debug!("bitrate monitor started (interval {:?})", interval);
    }

    /// Stop the probe loop. Safe to call from any task; no probe process is
    /// left running once this returns.
    pub async fn stop_polling(&self) {
        {
            let mut task = self.task.lock().await;
            if let Some(task) = task.take() {
                task.token.cancel();
            }
        }

        // The loop checks the token inside this same lock before spawning,
        // so after this section no new probe can appear.
        let mut slot = self.slot.lock().await;
        slot.generation += 1;
        if let Some(mut probe) = slot.probe.take() {
            let _ = terminate::stop(&mut probe, None, Duration::ZERO, PROBE_KILL_GRACE).await;
        }
        debug!("bitrate monitor stopped");
    }

    #[cfg(test)]
    async fn has_outstanding_probe(&self) -> bool {
        self.slot.lock().await.probe.is_some()
    }
}

async fn poll_loop(
    slot: Arc<Mutex<ProbeSlot>>,
    samples: mpsc::UnboundedSender<BitrateSample>,
    probe_command: Vec<String>,
    interval: Duration,
    probe_timeout: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let (generation, stdout) = {
            let mut slot = slot.lock().await;
            if token.is_cancelled() {
                return;
            }

            // A probe still outstanding from the previous tick is slower
            // than the interval; reclaim it before spawning the next one.
            if let Some(mut stale) = slot.probe.take() {
                warn!("previous bitrate probe still running, killing it");
                let _ = terminate::stop(&mut stale, None, Duration::ZERO, PROBE_KILL_GRACE).await;
            }

            let mut handle = match ProcHandle::spawn(
                Role::Probe,
                &probe_command,
                SpawnOptions {
                    capture_stdout: true,
                    drain_stderr: false,
                },
            ) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("failed to spawn bitrate probe: {}", e);
                    let _ = samples.send(unavailable());
                    continue;
                }
            };

            let stdout = handle.take_stdout();
            slot.generation += 1;
            let generation = slot.generation;
            slot.probe = Some(handle);
            (generation, stdout)
        };

        // Read the probe's output without holding the slot lock so a
        // concurrent stop_polling can still reclaim the process.
        let value = match stdout {
            Some(mut out) => {
                let mut buf = String::new();
                match timeout(probe_timeout, out.read_to_string(&mut buf)).await {
                    Ok(Ok(_)) => buf.trim().parse::<u64>().ok(),
                    Ok(Err(e)) => {
                        debug!("failed to read bitrate probe output: {}", e);
                        None
                    }
                    Err(_) => {
                        debug!("bitrate probe timed out after {:?}", probe_timeout);
                        None
                    }
                }
            }
            None => None,
        };

        {
            let mut slot = slot.lock().await;
            // stop_polling may have reclaimed the probe while we were
            // reading; only reap what is still ours.
            if slot.generation == generation {
                if let Some(mut probe) = slot.probe.take() {
                    let _ =
                        terminate::stop(&mut probe, None, Duration::ZERO, PROBE_KILL_GRACE).await;
                }
            }
        }

        let _ = samples.send(BitrateSample {
            bits_per_second: value,
            at: chrono::Utc::now(),
        });
    }
}

fn unavailable() -> BitrateSample {
    BitrateSample {
        bits_per_second: None,
        at: chrono::Utc::now(),
    }
}

/// Run a single probe and return its sample. Used by the CLI.
pub async fn probe_once(
    probe_command: &[String],
    probe_timeout: Duration,
) -> Result<BitrateSample, crate::process::ProcessError> {
    let mut handle = ProcHandle::spawn(
        Role::Probe,
        probe_command,
        SpawnOptions {
            capture_stdout: true,
            drain_stderr: false,
        },
    )?;

    let value = match handle.take_stdout() {
        Some(mut out) => {
            let mut buf = String::new();
            match timeout(probe_timeout, out.read_to_string(&mut buf)).await {
                Ok(Ok(_)) => buf.trim().parse::<u64>().ok(),
                _ => None,
            }
        }
        None => None,
    };

    let _ = terminate::stop(&mut handle, None, Duration::ZERO, PROBE_KILL_GRACE).await;

    Ok(BitrateSample {
        bits_per_second: value,
        at: chrono::Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_probe_once_parses_value() {
        let sample = probe_once(&cmd(&["sh", "-c", "echo 128000"]), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(sample.bits_per_second, Some(128000));
    }

    #[tokio::test]
    async fn test_probe_once_empty_output_is_unavailable() {
        let sample = probe_once(&cmd(&["true"]), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(sample.bits_per_second, None);
    }

    #[tokio::test]
    async fn test_probe_once_garbage_output_is_unavailable() {
        let sample = probe_once(&cmd(&["sh", "-c", "echo N/A"]), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(sample.bits_per_second, None);
    }

    #[tokio::test]
    async fn test_samples_flow_while_polling() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = BitrateMonitor::new(tx, Duration::from_secs(2));

        monitor
            .start_polling(cmd(&["sh", "-c", "echo 96000"]), Duration::from_millis(50))
            .await;

        let sample = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("sample within deadline")
            .expect("channel open");
        assert_eq!(sample.bits_per_second, Some(96000));

        monitor.stop_polling().await;
        assert!(!monitor.has_outstanding_probe().await);
    }

    #[tokio::test]
    async fn test_start_polling_is_idempotent() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let monitor = BitrateMonitor::new(tx, Duration::from_secs(2));

        monitor
            .start_polling(cmd(&["sh", "-c", "echo 1"]), Duration::from_millis(50))
            .await;
        assert!(monitor.is_polling().await);

        // Second call must not replace the running loop.
        monitor
            .start_polling(cmd(&["sh", "-c", "echo 2"]), Duration::from_millis(50))
            .await;
        assert!(monitor.is_polling().await);

        monitor.stop_polling().await;
        assert!(!monitor.is_polling().await);
    }

    #[tokio::test]
    async fn test_slow_probe_times_out_as_unavailable() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = BitrateMonitor::new(tx, Duration::from_millis(100));

        monitor
            .start_polling(cmd(&["sleep", "30"]), Duration::from_millis(50))
            .await;

        let sample = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("sample within deadline")
            .expect("channel open");
        assert_eq!(sample.bits_per_second, None);

        monitor.stop_polling().await;
        assert!(!monitor.has_outstanding_probe().await);
    }

    #[tokio::test]
    async fn test_stop_reclaims_outstanding_probe() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let monitor = BitrateMonitor::new(tx, Duration::from_secs(30));

        // Probe outlives the interval, so one is always outstanding.
        monitor
            .start_polling(cmd(&["sleep", "30"]), Duration::from_millis(50))
            .await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        monitor.stop_polling().await;
        assert!(!monitor.has_outstanding_probe().await);
        assert!(!monitor.is_polling().await);
    }

    #[tokio::test]
    async fn test_repeated_stop_is_safe() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let monitor = BitrateMonitor::new(tx, Duration::from_secs(2));
        monitor.stop_polling().await;
        monitor.stop_polling().await;
        assert!(!monitor.is_polling().await);
    }
}
