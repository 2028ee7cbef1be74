//! Output volume and mute control.
//!
//! The session controller talks to a `VolumeControl` trait object so the
//! platform mixer integration stays behind one seam. `NullVolume` is the
//! in-memory implementation used when no mixer backend is configured and by
//! tests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::SessionEvent;

#[async_trait]
pub trait VolumeControl: Send + Sync {
    /// Current output level in percent (0 to 100).
    async fn level(&self) -> Result<u8>;
    async fn set_level(&self, percent: u8) -> Result<()>;
    async fn muted(&self) -> Result<bool>;
    async fn set_muted(&self, muted: bool) -> Result<()>;
    /// Identifier of the active output device.
    async fn device_id(&self) -> Result<String>;
    /// Re-bind to the current default device after a device change.
    async fn refresh(&self) -> Result<()>;
}

#[derive(Debug)]
struct NullVolumeState {
    level: u8,
    muted: bool,
}

/// In-memory volume backend. Remembers what it was told and never touches
/// the system mixer.
pub struct NullVolume {
    state: Mutex<NullVolumeState>,
}

impl NullVolume {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NullVolumeState {
                level: 100,
                muted: false,
            }),
        }
    }
}

impl Default for NullVolume {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VolumeControl for NullVolume {
    async fn level(&self) -> Result<u8> {
        Ok(self.state.lock().await.level)
    }

    async fn set_level(&self, percent: u8) -> Result<()> {
        self.state.lock().await.level = percent.min(100);
        Ok(())
    }

    async fn muted(&self) -> Result<bool> {
        Ok(self.state.lock().await.muted)
    }

    async fn set_muted(&self, muted: bool) -> Result<()> {
        self.state.lock().await.muted = muted;
        Ok(())
    }

    async fn device_id(&self) -> Result<String> {
        Ok("null".to_string())
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

/// Watch for default-device changes by polling the device identifier. On a
/// change the backend is refreshed and a `DeviceChanged` event is emitted.
pub fn spawn_device_watcher(
    volume: Arc<dyn VolumeControl>,
    events: mpsc::UnboundedSender<SessionEvent>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut current = match volume.device_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!("device watcher: failed to read device id: {}", e);
                String::new()
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("device watcher stopped");
                    return;
                }
                _ = interval.tick() => {}
            }

            let id = match volume.device_id().await {
                Ok(id) => id,
                Err(e) => {
                    warn!("device watcher: failed to read device id: {}", e);
                    continue;
                }
            };
            if id != current {
                info!("output device changed: {} -> {}", current, id);
                if let Err(e) = volume.refresh().await {
                    warn!("device watcher: refresh failed: {}", e);
                }
                current = id.clone();
                let _ = events.send(SessionEvent::DeviceChanged(id));
            }
        }
    })
}
