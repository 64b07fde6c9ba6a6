//! # External Collaborators
//!
//! The engine talks to four components it does not own: a signing oracle, a room
//! resolver, a keyed log sink and an alert channel. They are declared here as traits so
//! the session and supervisor can be driven by fakes in tests; concrete implementations
//! live in the `retrieve`, `loggers` and `alerts` modules.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use thiserror::Error;

/// Failures reported by collaborators. None of them is fatal to the process.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("room resolution failed: {0}")]
    Resolve(String),

    #[error("log sink I/O error: {0}")]
    Sink(#[from] std::io::Error),
}

/// Result of resolving a human-facing live id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    /// Internal numeric room id used by the push channel.
    pub room_id: String,
    /// `ttwid` session cookie obtained while resolving.
    pub session_cookie: String,
}

/// Live state of a room as reported by the room-entry API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStatus {
    pub streamer_id: String,
    pub nickname: String,
    pub live: bool,
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.live { "live" } else { "ended" };
        write!(f, "[{}][{}] room {state}", self.nickname, self.streamer_id)
    }
}

/// Key of one log session: the local time of the first loggable event, at second precision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogSessionKey(NaiveDateTime);

impl LogSessionKey {
    pub fn from_datetime(at: &DateTime<Local>) -> Self {
        let naive = at.naive_local();
        Self(naive.with_nanosecond(0).unwrap_or(naive))
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.0
    }

    /// Filesystem-safe rendering, e.g. `2024-01-02_21-51-07`.
    pub fn file_stem(&self) -> String {
        self.0.format("%Y-%m-%d_%H-%M-%S").to_string()
    }
}

impl fmt::Display for LogSessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S"))
    }
}

/// Produces the signature token appended to the push URL.
#[async_trait]
pub trait SigningOracle: Send + Sync {
    async fn sign(&self, query: &BTreeMap<String, String>) -> Result<String, CollaboratorError>;
}

/// Maps a live id (as seen in the room's web address) to the internal room id.
#[async_trait]
pub trait RoomResolver: Send + Sync {
    async fn resolve(&self, live_id: &str) -> Result<RoomInfo, CollaboratorError>;

    /// Whether the room is still live. `Ok(None)` means the resolver cannot tell.
    async fn room_status(
        &self,
        _live_id: &str,
        _room: &RoomInfo,
    ) -> Result<Option<RoomStatus>, CollaboratorError> {
        Ok(None)
    }
}

/// Append-only sink for human-readable broadcast records.
///
/// Sessions are opened lazily on the first `append_line` for a key. `close_session`
/// must be idempotent.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append_line(&self, key: &LogSessionKey, line: &str) -> Result<(), CollaboratorError>;

    async fn close_session(&self, key: &LogSessionKey);
}

/// Out-of-band escalation. Must return promptly; delivery happens in the background.
pub trait AlertChannel: Send + Sync {
    fn notify(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn key_drops_subsecond_precision() {
        let at = Local.with_ymd_and_hms(2024, 1, 2, 21, 51, 7).unwrap()
            + chrono::Duration::milliseconds(640);
        let key = LogSessionKey::from_datetime(&at);
        assert_eq!(key.file_stem(), "2024-01-02_21-51-07");
        assert_eq!(key.to_string(), "2024-01-02 21:51:07");
        assert_eq!(key, LogSessionKey::from_datetime(&(at - chrono::Duration::milliseconds(600))));
    }

    #[test]
    fn room_status_renders_streamer_and_state() {
        let status = RoomStatus {
            streamer_id: "111".to_string(),
            nickname: "ann".to_string(),
            live: false,
        };
        assert_eq!(status.to_string(), "[ann][111] room ended");
    }
}
