//! The streaming session: command construction, shared status, and the
//! controller that drives the role supervisors.

pub mod commands;
pub mod controller;
pub mod status;

pub use commands::{RecordTemplate, SendTemplate, SessionCommands};
pub use controller::{SessionController, SessionOptions};
pub use status::{
    PlayState, RecordState, SendState, SessionEvent, SessionState, SessionStatusHandle,
    StreamState,
};
