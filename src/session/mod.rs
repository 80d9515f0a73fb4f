//! Recording session management
//!
//! This module provides:
//! - `SessionStore`: the guild -> session map
//! - the per-session segment loop (capture, rotate, transcode)
//! - `Watchdog`: periodic reconnect of dropped voice connections
//! - `SessionManager`: start/stop/status/test commands and membership events

mod config;
mod events;
mod manager;
mod segment_loop;
mod session;
mod stats;
mod store;
mod watchdog;

pub use config::SessionConfig;
pub use events::{SessionEvent, SessionEventKind, StopReason};
pub use manager::{CommandOrigin, SessionManager};
pub use session::Session;
pub use stats::{SessionStatus, StopSummary, TestRecordReport};
pub use store::SessionStore;
pub use watchdog::{SweepReport, Watchdog};
