//! API route modules.

pub mod history;
pub mod session;
pub mod volume;
