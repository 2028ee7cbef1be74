//! Session state types and the shared status handle.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::bitrate::BitrateSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Idle,
    Receiving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    Idle,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    Idle,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendState {
    Idle,
    Sending,
}

/// The application's current streaming posture. Mutated only by the session
/// controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub stream: StreamState,
    pub record: RecordState,
    pub play: PlayState,
    pub send: SendState,
    /// Mute is an overlay on the stream state, not exclusive with receiving.
    pub muted: bool,
    pub monitoring: bool,
    pub bitrate: Option<BitrateSample>,
    pub last_error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            stream: StreamState::Idle,
            record: RecordState::Idle,
            play: PlayState::Idle,
            send: SendState::Idle,
            muted: false,
            monitoring: false,
            bitrate: None,
            last_error: None,
        }
    }
}

impl SessionState {
    /// Human-readable display state, mute overlay first.
    pub fn display(&self) -> &'static str {
        if self.muted {
            return "muted";
        }
        match (self.stream, self.record, self.play, self.send) {
            (StreamState::Receiving, RecordState::Recording, _, _) => "recording",
            (StreamState::Receiving, _, _, _) => "receiving",
            (_, RecordState::Recording, _, _) => "recording",
            (_, _, PlayState::Playing, _) => "playing",
            (_, _, _, SendState::Sending) => "sending",
            _ => "idle",
        }
    }
}

/// Thread-safe handle sharing the session state between the controller and
/// API handlers.
#[derive(Clone, Default)]
pub struct SessionStatusHandle {
    inner: Arc<Mutex<SessionState>>,
}

impl SessionStatusHandle {
    pub async fn get(&self) -> SessionState {
        self.inner.lock().await.clone()
    }

    pub async fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut SessionState),
    {
        let mut state = self.inner.lock().await;
        mutate(&mut state);
    }

    pub async fn set_error(&self, error: String) {
        let mut state = self.inner.lock().await;
        state.last_error = Some(error);
    }
}

/// Events delivered to the UI notification channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Bitrate(BitrateSample),
    DeviceChanged(String),
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_idle() {
        let state = SessionState::default();
        assert_eq!(state.stream, StreamState::Idle);
        assert_eq!(state.record, RecordState::Idle);
        assert_eq!(state.play, PlayState::Idle);
        assert_eq!(state.send, SendState::Idle);
        assert!(!state.muted);
        assert!(!state.monitoring);
        assert_eq!(state.display(), "idle");
    }

    #[test]
    fn test_display_overlays() {
        let mut state = SessionState::default();
        state.stream = StreamState::Receiving;
        assert_eq!(state.display(), "receiving");

        state.record = RecordState::Recording;
        assert_eq!(state.display(), "recording");

        // Mute wins over everything else.
        state.muted = true;
        assert_eq!(state.display(), "muted");
    }

    #[tokio::test]
    async fn test_status_handle_update() {
        let handle = SessionStatusHandle::default();
        handle
            .update(|s| {
                s.stream = StreamState::Receiving;
                s.monitoring = true;
            })
            .await;

        let state = handle.get().await;
        assert_eq!(state.stream, StreamState::Receiving);
        assert!(state.monitoring);
    }

    #[tokio::test]
    async fn test_status_handle_error() {
        let handle = SessionStatusHandle::default();
        handle.set_error("spawn failed".to_string()).await;
        assert_eq!(
            handle.get().await.last_error,
            Some("spawn failed".to_string())
        );
    }
}
