//! End-to-end lifecycle tests for the session controller.
//!
//! These drive the controller with plain shell commands standing in for the
//! ffmpeg tools, so they run anywhere with /bin/sh available. No listeners,
//! no real streams.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use streamcast::config::TimeoutsConfig;
use streamcast::process::{StopDisposition, StopOutcome};
use streamcast::session::{
    PlayState, RecordState, RecordTemplate, SendState, SendTemplate, SessionCommands,
    SessionController, SessionEvent, SessionOptions, SessionState, SessionStatusHandle,
    StreamState,
};
use streamcast::volume::NullVolume;

fn cmd(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn stub_commands() -> SessionCommands {
    SessionCommands {
        receive: cmd(&["sleep", "30"]),
        record: RecordTemplate::new(cmd(&["sh", "-c", "read line; exit 0"]), None),
        play: cmd(&["sh", "-c", "sleep 0.2"]),
        probe: cmd(&["sh", "-c", "echo 128000"]),
        send: SendTemplate::new(cmd(&["sleep", "30"]), vec![5004, 5005]),
    }
}

fn build_controller(
    commands: SessionCommands,
    stop_record_with_receive: bool,
) -> (
    Arc<SessionController>,
    mpsc::UnboundedReceiver<SessionEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let options = SessionOptions {
        commands,
        recording_file: None,
        timeouts: TimeoutsConfig {
            record_drain_secs: 5,
            stop_secs: 1,
            kill_grace_secs: 2,
            shutdown_secs: 10,
        },
        monitor_interval: Duration::from_millis(50),
        probe_timeout: Duration::from_secs(2),
        stop_record_with_receive,
    };
    let controller = SessionController::new(options, Arc::new(NullVolume::new()), tx);
    (controller, rx)
}

async fn wait_for<F>(status: &SessionStatusHandle, mut predicate: F)
where
    F: FnMut(&SessionState) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let state = status.get().await;
        if predicate(&state) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "state never matched: {:?}",
            state
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn full_receive_record_cycle() {
    let (controller, _events) = build_controller(stub_commands(), true);

    controller.begin_receive().await.unwrap();
    controller.begin_record().await.unwrap();

    let state = controller.status().get().await;
    assert_eq!(state.stream, StreamState::Receiving);
    assert_eq!(state.record, RecordState::Recording);
    assert!(state.monitoring);
    assert_eq!(state.display(), "recording");

    // Bitrate samples arrive while receiving.
    wait_for(&controller.status(), |s| {
        matches!(s.bitrate, Some(b) if b.bits_per_second == Some(128000))
    })
    .await;

    // Ending receive drains the recording first per policy.
    controller.end_receive().await.unwrap();
    let state = controller.status().get().await;
    assert_eq!(state.stream, StreamState::Idle);
    assert_eq!(state.record, RecordState::Idle);
    assert!(!state.monitoring);
    assert_eq!(state.display(), "idle");
}

#[tokio::test]
async fn begin_then_immediate_end_is_clean() {
    let (controller, _events) = build_controller(stub_commands(), true);

    controller.begin_receive().await.unwrap();
    controller.end_receive().await.unwrap();

    let state = controller.status().get().await;
    assert_eq!(state.stream, StreamState::Idle);
    assert!(!state.monitoring);
    assert!(state.bitrate.is_none());
}

#[tokio::test]
async fn operations_are_idempotent() {
    let (controller, _events) = build_controller(stub_commands(), true);

    controller.begin_receive().await.unwrap();
    controller.begin_receive().await.unwrap();
    controller.begin_record().await.unwrap();
    controller.begin_record().await.unwrap();

    // Stops on never-started or already-stopped roles are no-ops.
    controller.end_send().await.unwrap();
    controller.end_receive().await.unwrap();
    controller.end_receive().await.unwrap();
    assert_eq!(
        controller.end_record().await.unwrap(),
        StopDisposition::NotRunning
    );
}

#[tokio::test]
async fn stubborn_recorder_is_forced() {
    let mut commands = stub_commands();
    // Ignores the quit signal entirely.
    commands.record = RecordTemplate::new(cmd(&["sleep", "30"]), None);

    let (tx, _rx) = mpsc::unbounded_channel();
    let options = SessionOptions {
        commands,
        recording_file: None,
        // Zero drain so the quit-signal window elapses immediately.
        timeouts: TimeoutsConfig {
            record_drain_secs: 0,
            stop_secs: 1,
            kill_grace_secs: 2,
            shutdown_secs: 10,
        },
        monitor_interval: Duration::from_millis(50),
        probe_timeout: Duration::from_secs(2),
        stop_record_with_receive: true,
    };
    let controller = SessionController::new(options, Arc::new(NullVolume::new()), tx);

    controller.begin_record().await.unwrap();
    assert_eq!(
        controller.end_record().await.unwrap(),
        StopDisposition::Stopped(StopOutcome::Forced)
    );
    assert_eq!(controller.status().get().await.record, RecordState::Idle);
}

#[tokio::test]
async fn playback_finishes_on_its_own() {
    let (controller, _events) = build_controller(stub_commands(), true);

    assert_eq!(controller.toggle_play().await.unwrap(), PlayState::Playing);
    wait_for(&controller.status(), |s| s.play == PlayState::Idle).await;

    // A fresh toggle starts playback again after the natural exit.
    assert_eq!(controller.toggle_play().await.unwrap(), PlayState::Playing);
    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn recording_outlives_receive_when_policy_disabled() {
    let (controller, _events) = build_controller(stub_commands(), false);

    controller.begin_receive().await.unwrap();
    controller.begin_record().await.unwrap();
    controller.end_receive().await.unwrap();

    let state = controller.status().get().await;
    assert_eq!(state.stream, StreamState::Idle);
    assert_eq!(state.record, RecordState::Recording);

    assert_eq!(
        controller.end_record().await.unwrap(),
        StopDisposition::Stopped(StopOutcome::Cooperative)
    );
}

#[tokio::test]
async fn shutdown_leaves_nothing_running() {
    let (controller, _events) = build_controller(stub_commands(), true);

    controller.begin_receive().await.unwrap();
    controller.begin_record().await.unwrap();
    controller.begin_send("192.168.1.50").await.unwrap();
    controller.toggle_play().await.unwrap();

    controller.shutdown().await.unwrap();

    let state = controller.status().get().await;
    assert_eq!(state.stream, StreamState::Idle);
    assert_eq!(state.record, RecordState::Idle);
    assert_eq!(state.play, PlayState::Idle);
    assert_eq!(state.send, SendState::Idle);
    assert!(!state.monitoring);
}

#[tokio::test]
async fn receive_death_surfaces_as_error_event() {
    let mut commands = stub_commands();
    commands.receive = cmd(&["sh", "-c", "sleep 0.2; exit 1"]);
    let (controller, mut events) = build_controller(commands, true);

    controller.begin_receive().await.unwrap();
    wait_for(&controller.status(), |s| s.stream == StreamState::Idle).await;

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::Error(_)) {
            saw_error = true;
        }
    }
    assert!(saw_error);
    assert!(controller.status().get().await.last_error.is_some());
}

#[tokio::test]
async fn mute_overlays_display_state() {
    let (controller, _events) = build_controller(stub_commands(), true);

    controller.begin_receive().await.unwrap();
    controller.toggle_mute().await.unwrap();

    let state = controller.status().get().await;
    assert_eq!(state.stream, StreamState::Receiving);
    assert!(state.muted);
    assert_eq!(state.display(), "muted");

    controller.toggle_mute().await.unwrap();
    assert_eq!(controller.status().get().await.display(), "receiving");

    controller.end_receive().await.unwrap();
}
