//! # lib_livefeed
//!
//! A self-healing client for a live-room push channel. It keeps a WebSocket session to
//! the push server alive across failures, decodes the two-layer binary protocol,
//! acknowledges what must be acknowledged, and hands every typed event to a handler
//! that turns it into a broadcast log record.
//!
//! Modules are feature-gated so that consumers which only need the wire format can
//! depend on `codec` alone.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "alerts")]
pub mod alerts;
#[cfg(feature = "codec")]
pub mod codec;
#[cfg(feature = "core")]
pub mod core;
#[cfg(feature = "ingestors")]
pub mod ingestors;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "retrieve")]
pub mod retrieve;

#[cfg(feature = "codec")]
pub use codec::{CodecError, Envelope, Frame, FrameCodec, Message, PayloadType};
#[cfg(feature = "core")]
pub use crate::core::{
    ConnectionSession, ConnectionSupervisor, DispatchOutcome, Dispatcher, SessionOutcome,
    SupervisorPhase,
};
