//! # Message Dispatcher
//!
//! Routes every message of a decoded envelope to the handler registered for its kind.
//!
//! Handlers are pure: they read a payload and return an optional [`EventRecord`] plus a
//! [`Directive`] for the session. The dispatcher never lets a handler take the
//! connection down. Decode failures and even panics inside a handler are converted into
//! [`DispatchOutcome::Failed`], logged with the offending kind, and the batch moves on.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{debug, warn};

use crate::codec::Message;
use crate::core::registry::{HandlerRegistry, MessageKind};

/// Where a record produced by a handler should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Appended to the broadcast log.
    Persist,
    /// Emitted as a diagnostic trace only.
    Trace,
}

/// One human-readable line describing an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub line: String,
    pub disposition: Disposition,
}

/// Instruction from a handler to the session that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Directive {
    #[default]
    Continue,
    /// The room announced the end of the broadcast.
    EndBroadcast,
}

/// What a handler returns on success.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandlerOutput {
    pub record: Option<EventRecord>,
    pub directive: Directive,
}

impl HandlerOutput {
    pub fn persist(line: impl Into<String>) -> Self {
        Self::with_record(line.into(), Disposition::Persist)
    }

    pub fn trace(line: impl Into<String>) -> Self {
        Self::with_record(line.into(), Disposition::Trace)
    }

    /// No record and no directive.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn end_broadcast(mut self) -> Self {
        self.directive = Directive::EndBroadcast;
        self
    }

    fn with_record(line: String, disposition: Disposition) -> Self {
        Self {
            record: Some(EventRecord { line, disposition }),
            directive: Directive::Continue,
        }
    }
}

/// Why a handler could not process a message.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("payload decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("required field '{0}' is missing")]
    MissingField(&'static str),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

pub type HandlerResult = Result<HandlerOutput, HandlerError>;

/// Processes the payload of one message kind.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, payload: &[u8], now: &DateTime<Local>) -> HandlerResult;
}

impl<F> MessageHandler for F
where
    F: Fn(&[u8], &DateTime<Local>) -> HandlerResult + Send + Sync,
{
    fn handle(&self, payload: &[u8], now: &DateTime<Local>) -> HandlerResult {
        self(payload, now)
    }
}

/// Result of dispatching a single message.
#[derive(Debug)]
pub enum DispatchOutcome {
    Handled(HandlerOutput),
    /// No handler is registered for the kind.
    Unrecognized,
    Failed(HandlerError),
}

/// Kind-keyed router over a [`HandlerRegistry`].
#[derive(Debug, Default, Clone)]
pub struct Dispatcher {
    registry: HandlerRegistry,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `kind`. A later registration for the same kind replaces the
    /// earlier one.
    pub fn register<H>(&mut self, kind: impl Into<String>, handler: H)
    where
        H: MessageHandler + 'static,
    {
        self.registry.insert(kind.into(), Arc::new(handler));
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Routes `message` to its handler.
    pub fn dispatch(&self, message: &Message, now: &DateTime<Local>) -> DispatchOutcome {
        let Some(handler) = self.registry.get(&message.kind) else {
            match MessageKind::from_method(&message.kind) {
                Some((known, vocabulary)) => {
                    debug!(kind = %message.kind, ?known, ?vocabulary, "vocabulary not enabled; message ignored")
                }
                None => debug!(kind = %message.kind, "no handler registered; message ignored"),
            }
            return DispatchOutcome::Unrecognized;
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&message.payload, now)))
            .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload))));

        match result {
            Ok(output) => DispatchOutcome::Handled(output),
            Err(e) => {
                warn!(kind = %message.kind, error = %e, "handler failed; message skipped");
                DispatchOutcome::Failed(e)
            }
        }
    }

    /// Dispatches a batch in order. Every message is attempted regardless of earlier
    /// failures.
    pub fn dispatch_all(&self, messages: &[Message], now: &DateTime<Local>) -> Vec<DispatchOutcome> {
        messages.iter().map(|m| self.dispatch(m, now)).collect()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
