use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub stream: StreamConfig,
    pub monitor: MonitorConfig,
    pub timeouts: TimeoutsConfig,
    pub behavior: BehaviorConfig,
    pub api: ApiConfig,
}

/// Explicit paths to the ffmpeg tool binaries. When unset, each tool is
/// looked up on PATH at startup.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: Option<String>,
    pub ffplay: Option<String>,
    pub ffprobe: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Address the receive/record roles bind to.
    pub listen_host: String,
    /// Port carrying the playback stream.
    pub playback_port: u16,
    /// Port carrying the recording tap.
    pub record_port: u16,
    /// Port the bitrate probe samples.
    pub monitor_port: u16,
    /// Ports the send role fans the capture out to.
    pub send_ports: Vec<u16>,
    /// Capture input format passed to ffmpeg (`pulse`, `alsa`, `dshow`, ...).
    pub input_format: String,
    /// Capture device name for the send role.
    pub input_device: String,
    /// Encoder bitrate for the send role.
    pub send_bitrate: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            playback_port: 5005,
            record_port: 5006,
            monitor_port: 5004,
            send_ports: vec![5004, 5005, 5006],
            input_format: default_input_format(),
            input_device: "default".to_string(),
            send_bitrate: "192k".to_string(),
        }
    }
}

#[cfg(target_os = "windows")]
fn default_input_format() -> String {
    "dshow".to_string()
}

#[cfg(not(target_os = "windows"))]
fn default_input_format() -> String {
    "pulse".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between bitrate probes.
    pub interval_secs: u64,
    /// How long a single probe may run before it counts as unavailable.
    pub probe_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1,
            probe_timeout_secs: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// How long the record role gets to finalize its file after the quit
    /// signal before it is killed.
    pub record_drain_secs: u64,
    /// Stop budget for roles with no cooperative phase (receive/play/send).
    pub stop_secs: u64,
    /// Grace period between a forced kill and declaring termination failed.
    pub kill_grace_secs: u64,
    /// Overall budget for shutting every role down at exit.
    pub shutdown_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            record_drain_secs: 5,
            stop_secs: 3,
            kill_grace_secs: 2,
            shutdown_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Whether stopping the receive session also stops an in-progress
    /// recording. When false the recording keeps running on its own.
    pub stop_record_with_receive: bool,
    /// Seconds between output-device identity checks.
    pub device_poll_secs: u64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            stop_record_with_receive: true,
            device_poll_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 4555 }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl BehaviorConfig {
    pub fn device_poll(&self) -> Duration {
        Duration::from_secs(self.device_poll_secs)
    }
}

impl TimeoutsConfig {
    pub fn record_drain(&self) -> Duration {
        Duration::from_secs(self.record_drain_secs)
    }

    pub fn stop(&self) -> Duration {
        Duration::from_secs(self.stop_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
