//! # Core Engine Module
//!
//! Everything needed to keep one live-room feed flowing:
//!
//! - **`collaborators`**: traits for the external pieces the engine relies on (signing
//!   oracle, room resolver, log sink, alert channel).
//! - **`registry`**: the handler table keyed by message kind, plus the two naming
//!   vocabularies the push server uses for kinds.
//! - **`dispatcher`**: routes each decoded message to its handler and isolates handler
//!   failures.
//! - **`handlers`**: the default per-kind handlers producing broadcast log records.
//! - **`write_path`**: the single, serialized outbound path shared by acks and heartbeats.
//! - **`heartbeat`**: periodic keep-alive frames bound to one session.
//! - **`session`**: one connection attempt from endpoint preparation to teardown.
//! - **`supervisor`**: the reconnect loop with disconnect accounting and escalation.

/// External collaborator contracts.
pub mod collaborators;
/// Message routing with per-handler fault isolation.
pub mod dispatcher;
/// Default handlers for the known message kinds.
pub mod handlers;
/// Periodic keep-alive scheduler.
pub mod heartbeat;
/// Handler table and message-kind vocabularies.
pub mod registry;
/// A single connection attempt.
pub mod session;
/// Reconnect loop and escalation.
pub mod supervisor;
/// Serialized outbound writer.
pub mod write_path;

// --- Public API Re-exports ---
pub use collaborators::{
    AlertChannel, CollaboratorError, LogSessionKey, LogSink, RoomInfo, RoomResolver,
    RoomStatus, SigningOracle,
};
pub use dispatcher::{
    DispatchOutcome, Dispatcher, Directive, Disposition, EventRecord, HandlerError,
    HandlerOutput, MessageHandler,
};
pub use heartbeat::{HeartbeatMode, HeartbeatScheduler};
pub use registry::{HandlerRegistry, MessageKind, Vocabulary};
pub use session::{
    ConnectionSession, EndpointSource, SessionEndpoint, SessionError, SessionFactory,
    SessionOutcome, SessionSettings, SessionState, SessionStatus, StaticEndpoint,
};
pub use supervisor::{
    ConnectionSupervisor, SessionLauncher, SupervisorError, SupervisorPhase, SupervisorSettings,
};
pub use write_path::{WriteError, WritePath};
