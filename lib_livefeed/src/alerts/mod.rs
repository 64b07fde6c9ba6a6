//! # Alerts
//!
//! Out-of-band escalation when a feed keeps dropping.
//!
//! - **`command_alert`**: launches a configured notifier command (a mail script, a
//!   webhook caller, ...) without waiting for it.

/// Fire-and-forget notifier command.
pub mod command_alert;

pub use command_alert::{CommandAlert, LogOnlyAlert};
