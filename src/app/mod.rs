use crate::api::{ApiServer, SessionCommand};
use crate::config::Config;
use crate::global;
use crate::history::EndpointHistory;
use crate::session::{SessionCommands, SessionController, SessionEvent, SessionOptions};
use crate::volume::{spawn_device_watcher, NullVolume, VolumeControl};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub async fn run_service() -> Result<()> {
    info!("Starting Streamcast service");

    let config = Config::load()?;
    let recording_file = global::recording_file()?;
    let commands = SessionCommands::from_config(&config.tools, &config.stream, &recording_file)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<SessionCommand>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();

    let volume: Arc<dyn VolumeControl> = Arc::new(NullVolume::new());
    let history = Arc::new(Mutex::new(EndpointHistory::load(&global::history_file()?)));

    let controller = SessionController::new(
        SessionOptions {
            commands,
            recording_file: Some(recording_file),
            timeouts: config.timeouts.clone(),
            monitor_interval: config.monitor.interval(),
            probe_timeout: config.monitor.probe_timeout(),
            stop_record_with_receive: config.behavior.stop_record_with_receive,
        },
        Arc::clone(&volume),
        event_tx.clone(),
    );

    let api_server = ApiServer::new(
        config.api.port,
        tx,
        controller.status(),
        Arc::clone(&volume),
        Arc::clone(&history),
    );
    tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            error!("API server failed: {}", e);
        }
    });

    let shutdown = CancellationToken::new();
    spawn_device_watcher(
        Arc::clone(&volume),
        event_tx,
        config.behavior.device_poll(),
        shutdown.clone(),
    );

    // Event logging keeps a trace of state transitions even with no UI
    // attached.
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SessionEvent::StateChanged(state) => info!("session is {}", state.display()),
                SessionEvent::Bitrate(sample) => match sample.bits_per_second {
                    Some(bps) => info!("stream bitrate: {} kbps", bps / 1000),
                    None => info!("stream bitrate unavailable"),
                },
                SessionEvent::DeviceChanged(id) => info!("output device changed to {}", id),
                SessionEvent::Error(message) => warn!("session error: {}", message),
            }
        }
    });

    info!("Streamcast is ready!");
    info!(
        "Test with: curl -X POST http://127.0.0.1:{}/receive/start",
        config.api.port
    );

    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else { break };
                apply_command(&controller, &history, command).await;
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    shutdown.cancel();
    controller.shutdown().await?;
    Ok(())
}

async fn apply_command(
    controller: &SessionController,
    history: &Mutex<EndpointHistory>,
    command: SessionCommand,
) {
    let result = match command {
        SessionCommand::BeginReceive => controller.begin_receive().await,
        SessionCommand::EndReceive => controller.end_receive().await,
        SessionCommand::BeginRecord => controller.begin_record().await,
        SessionCommand::EndRecord => controller.end_record().await.map(|_| ()),
        SessionCommand::TogglePlay => controller.toggle_play().await.map(|_| ()),
        SessionCommand::ToggleMute => controller.toggle_mute().await.map(|_| ()),
        SessionCommand::BeginSend { target, label } => {
            if let Err(e) = history.lock().await.remember(&target, label) {
                warn!("failed to persist send history: {}", e);
            }
            controller.begin_send(&target).await
        }
        SessionCommand::EndSend => controller.end_send().await,
    };
    if let Err(e) = result {
        error!("command failed: {:#}", e);
    }
}
