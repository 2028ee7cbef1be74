//! Command-line construction for each role's external process.
//!
//! The lifecycle core treats these as opaque argument vectors; everything
//! stream-specific (ports, formats, tool paths) is decided here from config.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{StreamConfig, ToolsConfig};

/// Multi-target send command, resolved per target host at start time.
#[derive(Debug, Clone)]
pub struct SendTemplate {
    head: Vec<String>,
    ports: Vec<u16>,
}

impl SendTemplate {
    pub fn new(head: Vec<String>, ports: Vec<u16>) -> Self {
        Self { head, ports }
    }

    pub fn build(&self, target_host: &str) -> Vec<String> {
        let mut command = self.head.clone();
        for port in &self.ports {
            command.push("-f".to_string());
            command.push("mpegts".to_string());
            command.push(format!("udp://{}:{}", target_host, port));
        }
        command
    }
}

/// Record command, finalized per recording so the date metadata reflects
/// the actual start time.
#[derive(Debug, Clone)]
pub struct RecordTemplate {
    head: Vec<String>,
    output: Option<String>,
}

impl RecordTemplate {
    pub fn new(head: Vec<String>, output: Option<String>) -> Self {
        Self { head, output }
    }

    pub fn build(&self) -> Vec<String> {
        let mut command = self.head.clone();
        if let Some(output) = &self.output {
            let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            command.push("-metadata".to_string());
            command.push(format!("date={}", stamp));
            command.push(output.clone());
        }
        command
    }
}

/// The fully-resolved command lines for one session. A plain data bag so
/// tests can substitute their own processes.
#[derive(Debug, Clone)]
pub struct SessionCommands {
    pub receive: Vec<String>,
    pub record: RecordTemplate,
    pub play: Vec<String>,
    pub probe: Vec<String>,
    pub send: SendTemplate,
}

impl SessionCommands {
    pub fn from_config(
        tools: &ToolsConfig,
        stream: &StreamConfig,
        recording_file: &Path,
    ) -> Result<Self> {
        let ffmpeg = resolve_tool("ffmpeg", tools.ffmpeg.as_deref())?;
        let ffplay = resolve_tool("ffplay", tools.ffplay.as_deref())?;
        let ffprobe = resolve_tool("ffprobe", tools.ffprobe.as_deref())?;

        Ok(Self {
            receive: receive_command(&ffplay, stream),
            record: record_template(&ffmpeg, stream, recording_file),
            play: play_command(&ffplay, recording_file),
            probe: probe_command(&ffprobe, stream),
            send: send_template(&ffmpeg, stream),
        })
    }
}

fn resolve_tool(name: &str, configured: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = configured.filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    which::which(name).with_context(|| format!("{} not found on PATH; set [tools].{}", name, name))
}

fn receive_command(ffplay: &Path, stream: &StreamConfig) -> Vec<String> {
    vec![
        ffplay.to_string_lossy().to_string(),
        "-nodisp".to_string(),
        "-flags".to_string(),
        "low_delay".to_string(),
        "-fflags".to_string(),
        "nobuffer".to_string(),
        "-f".to_string(),
        "mpegts".to_string(),
        format!("udp://{}:{}", stream.listen_host, stream.playback_port),
    ]
}

fn record_template(ffmpeg: &Path, stream: &StreamConfig, output: &Path) -> RecordTemplate {
    let head = vec![
        ffmpeg.to_string_lossy().to_string(),
        "-y".to_string(),
        "-f".to_string(),
        "mpegts".to_string(),
        "-i".to_string(),
        format!("udp://{}:{}", stream.listen_host, stream.record_port),
    ];
    RecordTemplate::new(head, Some(output.to_string_lossy().to_string()))
}

fn play_command(ffplay: &Path, recording: &Path) -> Vec<String> {
    vec![
        ffplay.to_string_lossy().to_string(),
        "-nodisp".to_string(),
        "-autoexit".to_string(),
        recording.to_string_lossy().to_string(),
    ]
}

fn probe_command(ffprobe: &Path, stream: &StreamConfig) -> Vec<String> {
    vec![
        ffprobe.to_string_lossy().to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "format=bit_rate".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
        format!("udp://localhost:{}", stream.monitor_port),
    ]
}

fn send_template(ffmpeg: &Path, stream: &StreamConfig) -> SendTemplate {
    let head = vec![
        ffmpeg.to_string_lossy().to_string(),
        "-fflags".to_string(),
        "nobuffer".to_string(),
        "-f".to_string(),
        stream.input_format.clone(),
        "-i".to_string(),
        capture_input(stream),
        "-probesize".to_string(),
        "32".to_string(),
        "-analyzeduration".to_string(),
        "0".to_string(),
        "-bufsize".to_string(),
        "1000k".to_string(),
        "-acodec".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        stream.send_bitrate.clone(),
        "-fflags".to_string(),
        "+genpts+discardcorrupt".to_string(),
        "-flags".to_string(),
        "+global_header+low_delay".to_string(),
    ];
    SendTemplate::new(head, stream.send_ports.clone())
}

fn capture_input(stream: &StreamConfig) -> String {
    // dshow addresses devices as `audio=<name>`; the other capture formats
    // take the device name directly.
    if stream.input_format == "dshow" {
        format!("audio={}", stream.input_device)
    } else {
        stream.input_device.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_command_shape() {
        let stream = StreamConfig::default();
        let cmd = receive_command(Path::new("/usr/bin/ffplay"), &stream);
        assert_eq!(cmd[0], "/usr/bin/ffplay");
        assert!(cmd.contains(&"-nodisp".to_string()));
        assert_eq!(cmd.last().unwrap(), "udp://0.0.0.0:5005");
    }

    #[test]
    fn test_record_command_targets_record_port() {
        let stream = StreamConfig::default();
        let cmd = record_template(
            Path::new("ffmpeg"),
            &stream,
            Path::new("/tmp/recorded_audio.mp3"),
        )
        .build();
        assert!(cmd.contains(&"udp://0.0.0.0:5006".to_string()));
        assert!(cmd.iter().any(|a| a.starts_with("date=")));
        assert_eq!(cmd.last().unwrap(), "/tmp/recorded_audio.mp3");
    }

    #[test]
    fn test_record_template_without_output_is_passthrough() {
        let template = RecordTemplate::new(vec!["true".to_string()], None);
        assert_eq!(template.build(), vec!["true".to_string()]);
    }

    #[test]
    fn test_probe_command_uses_monitor_port() {
        let stream = StreamConfig::default();
        let cmd = probe_command(Path::new("ffprobe"), &stream);
        assert_eq!(cmd.last().unwrap(), "udp://localhost:5004");
        assert!(cmd.contains(&"format=bit_rate".to_string()));
    }

    #[test]
    fn test_send_template_fans_out_ports() {
        let stream = StreamConfig::default();
        let template = send_template(Path::new("ffmpeg"), &stream);
        let cmd = template.build("192.168.1.20");
        assert!(cmd.contains(&"udp://192.168.1.20:5004".to_string()));
        assert!(cmd.contains(&"udp://192.168.1.20:5005".to_string()));
        assert!(cmd.contains(&"udp://192.168.1.20:5006".to_string()));
    }

    #[test]
    fn test_dshow_input_addressing() {
        let mut stream = StreamConfig::default();
        stream.input_format = "dshow".to_string();
        stream.input_device = "CABLE Output (VB-Audio Virtual Cable)".to_string();
        assert_eq!(
            capture_input(&stream),
            "audio=CABLE Output (VB-Audio Virtual Cable)"
        );

        stream.input_format = "pulse".to_string();
        stream.input_device = "default".to_string();
        assert_eq!(capture_input(&stream), "default");
    }
}
