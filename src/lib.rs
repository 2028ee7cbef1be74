pub mod api;
pub mod app;
pub mod bitrate;
pub mod cli;
pub mod config;
pub mod global;
pub mod history;
pub mod process;
pub mod session;
pub mod volume;
