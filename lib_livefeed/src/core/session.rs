//! # Connection Session
//!
//! One connection attempt, from endpoint preparation to teardown. A session:
//!
//! 1. asks its [`EndpointSource`] for the signed push URL and headers,
//! 2. connects (bounded by a connect timeout) and splits the socket,
//! 3. starts a [`HeartbeatScheduler`] on the shared [`WritePath`],
//! 4. runs the receive loop: decode, ack when asked, dispatch in wire order, and hand
//!    records to the broadcast log,
//! 5. finalizes exactly once, whatever ended it.
//!
//! Malformed frames never end a session. It ends on a stop request, a broadcast-ended
//! directive, a peer close, a transport error, or inbound silence longer than the idle
//! timeout.
//!
//! A stop is honored even when the peer has stopped reading: pending acks are
//! abandoned, the heartbeat is stopped within its grace period and the closing
//! handshake gets at most [`CLOSE_GRACE`]. Dropping the write half afterwards tears
//! the transport down.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use futures_util::{Sink, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::{FrameCodec, PayloadType};
use crate::core::collaborators::{CollaboratorError, LogSessionKey, LogSink};
use crate::core::dispatcher::{DispatchOutcome, Dispatcher, Directive, Disposition, EventRecord};
use crate::core::heartbeat::{HeartbeatMode, HeartbeatScheduler};
use crate::core::supervisor::SessionLauncher;
use crate::core::write_path::{WriteError, WritePath};

/// Upper bound on the closing handshake of an engine-initiated close.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on [`EndpointSource::session_ended`].
const SESSION_ENDED_LIMIT: Duration = Duration::from_secs(10);

/// Why a session could not be established or kept.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("endpoint preparation failed: {0}")]
    Endpoint(#[from] CollaboratorError),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("connect failed: {0}")]
    Connect(#[source] WsError),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[source] WsError),

    #[error("no inbound traffic for {0:?}")]
    IdleTimeout(Duration),
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// A stop was requested.
    Stopped,
    /// The room announced the end of the broadcast.
    BroadcastEnded,
    /// The peer closed the connection or the stream ended.
    Closed { reason: String },
    Failed(SessionError),
}

impl SessionOutcome {
    /// Whether this outcome counts as a disconnect for the supervisor.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Failed(_))
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::BroadcastEnded => f.write_str("broadcast ended"),
            Self::Closed { reason } => write!(f, "closed ({reason})"),
            Self::Failed(e) => write!(f, "failed ({e})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Observable session state.
#[derive(Debug, Clone, Copy)]
pub struct SessionState {
    pub status: SessionStatus,
    /// Last time any inbound traffic was seen.
    pub last_activity: Instant,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub heartbeat_interval: Duration,
    pub heartbeat_mode: HeartbeatMode,
    /// `None` disables the inbound silence check.
    pub idle_timeout: Option<Duration>,
    pub connect_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_mode: HeartbeatMode::Ping,
            idle_timeout: Some(Duration::from_secs(60)),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// A fully prepared push endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEndpoint {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Prepares the endpoint for each new connection attempt.
#[async_trait]
pub trait EndpointSource: Send + Sync {
    async fn endpoint(&self) -> Result<SessionEndpoint, SessionError>;

    /// Runs after a session ended for any reason other than a stop request. Only
    /// reports; it cannot change the outcome.
    async fn session_ended(&self, _outcome: &SessionOutcome) {}
}

/// An endpoint that never changes. Handy for local servers and replays.
#[derive(Debug, Clone)]
pub struct StaticEndpoint(pub SessionEndpoint);

impl StaticEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self(SessionEndpoint {
            url: url.into(),
            headers: Vec::new(),
        })
    }
}

#[async_trait]
impl EndpointSource for StaticEndpoint {
    async fn endpoint(&self) -> Result<SessionEndpoint, SessionError> {
        Ok(self.0.clone())
    }
}

/// Tracks the log session for one connection. The key is taken from the first
/// persisted record and released when the connection finalizes.
#[derive(Default)]
struct BroadcastLog {
    key: Option<LogSessionKey>,
}

impl BroadcastLog {
    async fn record(&mut self, sink: &dyn LogSink, now: &DateTime<Local>, record: &EventRecord) {
        info!(target: "livefeed::events", "{}", record.line);
        if record.disposition != Disposition::Persist {
            return;
        }
        let key = self.key.get_or_insert_with(|| LogSessionKey::from_datetime(now));
        if let Err(e) = sink.append_line(key, &record.line).await {
            warn!(log_session = %key, error = %e, "failed to append broadcast record");
        }
    }

    async fn close(&mut self, sink: &dyn LogSink) {
        if let Some(key) = self.key.take() {
            sink.close_session(&key).await;
            debug!(log_session = %key, "log session closed");
        }
    }
}

enum Incoming {
    Message(WsMessage),
    Error(WsError),
    Ended,
    Idle(Duration),
}

/// One connection attempt. Consumed by [`run`](Self::run).
pub struct ConnectionSession {
    source: Arc<dyn EndpointSource>,
    dispatcher: Arc<Dispatcher>,
    sink: Arc<dyn LogSink>,
    settings: SessionSettings,
    stop: CancellationToken,
    state: watch::Sender<SessionState>,
    log: BroadcastLog,
}

impl ConnectionSession {
    pub fn new(
        source: Arc<dyn EndpointSource>,
        dispatcher: Arc<Dispatcher>,
        sink: Arc<dyn LogSink>,
        settings: SessionSettings,
        stop: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SessionState {
            status: SessionStatus::Connecting,
            last_activity: Instant::now(),
        });
        Self {
            source,
            dispatcher,
            sink,
            settings,
            stop,
            state,
            log: BroadcastLog::default(),
        }
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Token that ends the session when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    /// Prepares the endpoint, connects, and serves the connection until it ends.
    pub async fn run(mut self) -> SessionOutcome {
        let stop = self.stop.clone();

        let prepared = tokio::select! {
            biased;
            _ = stop.cancelled() => None,
            endpoint = self.source.endpoint() => Some(endpoint),
        };
        let request = match prepared {
            None => return self.conclude(SessionOutcome::Stopped).await,
            Some(Err(e)) => {
                warn!(error = %e, "could not prepare the push endpoint");
                return self.conclude(SessionOutcome::Failed(e)).await;
            }
            Some(Ok(endpoint)) => match build_request(&endpoint) {
                Ok(request) => request,
                Err(e) => return self.conclude(SessionOutcome::Failed(e)).await,
            },
        };

        debug!(uri = %request.uri().host().unwrap_or_default(), "connecting to push endpoint");
        let limit = self.settings.connect_timeout;
        let connected = tokio::select! {
            biased;
            _ = stop.cancelled() => None,
            result = tokio::time::timeout(limit, connect_async(request)) => Some(result),
        };
        let ws = match connected {
            None => return self.conclude(SessionOutcome::Stopped).await,
            Some(Err(_)) => {
                return self
                    .conclude(SessionOutcome::Failed(SessionError::ConnectTimeout(limit)))
                    .await
            }
            Some(Ok(Err(e))) => {
                return self
                    .conclude(SessionOutcome::Failed(SessionError::Connect(e)))
                    .await
            }
            Some(Ok(Ok((ws, _response)))) => ws,
        };

        info!("push connection established");
        let (writer, reader) = ws.split();
        self.run_on(writer, reader).await
    }

    /// Serves an already established connection given as its two halves.
    pub async fn run_on<W, R>(mut self, writer: W, mut reader: R) -> SessionOutcome
    where
        W: Sink<WsMessage> + Unpin + Send + 'static,
        W::Error: fmt::Display,
        R: Stream<Item = Result<WsMessage, WsError>> + Unpin,
    {
        self.state.send_modify(|s| {
            s.status = SessionStatus::Open;
            s.last_activity = Instant::now();
        });

        let writer = WritePath::new(writer);
        let heartbeat = HeartbeatScheduler::start(
            writer.clone(),
            self.settings.heartbeat_interval,
            self.settings.heartbeat_mode,
            &self.stop,
        );

        let outcome = self.receive_loop(&writer, &mut reader).await;

        self.state.send_modify(|s| s.status = SessionStatus::Closing);
        heartbeat.stop().await;

        let engine_initiated = matches!(
            outcome,
            SessionOutcome::Stopped
                | SessionOutcome::BroadcastEnded
                | SessionOutcome::Failed(SessionError::IdleTimeout(_))
        );
        if engine_initiated {
            if let Err(e) = writer.close_within(CLOSE_GRACE).await {
                debug!(error = %e, "close handshake did not complete");
            }
        }

        self.conclude(outcome).await
    }

    async fn receive_loop<W, R>(&mut self, writer: &WritePath<W>, reader: &mut R) -> SessionOutcome
    where
        W: Sink<WsMessage> + Unpin,
        W::Error: fmt::Display,
        R: Stream<Item = Result<WsMessage, WsError>> + Unpin,
    {
        let stop = self.stop.clone();
        let idle = self.settings.idle_timeout;

        loop {
            let incoming = tokio::select! {
                biased;
                _ = stop.cancelled() => return SessionOutcome::Stopped,
                incoming = next_incoming(reader, idle) => incoming,
            };

            match incoming {
                Incoming::Message(WsMessage::Binary(data)) => {
                    self.touch();
                    if self.process_frame(&data, writer).await == Directive::EndBroadcast {
                        info!("broadcast ended; closing session");
                        return SessionOutcome::BroadcastEnded;
                    }
                }
                Incoming::Message(WsMessage::Ping(_)) | Incoming::Message(WsMessage::Pong(_)) => {
                    self.touch();
                }
                Incoming::Message(WsMessage::Text(text)) => {
                    self.touch();
                    debug!(len = text.as_str().len(), "ignoring text frame");
                }
                Incoming::Message(WsMessage::Close(frame)) => {
                    let reason = frame
                        .map(|f| format!("{} {}", f.code, f.reason))
                        .unwrap_or_else(|| "no close frame".to_string());
                    info!(%reason, "peer closed the connection");
                    return SessionOutcome::Closed { reason };
                }
                Incoming::Message(WsMessage::Frame(_)) => {}
                Incoming::Error(e) => {
                    warn!(error = %e, "transport error");
                    return SessionOutcome::Failed(SessionError::Transport(e));
                }
                Incoming::Ended => {
                    info!("push stream ended");
                    return SessionOutcome::Closed {
                        reason: "stream ended".to_string(),
                    };
                }
                Incoming::Idle(limit) => {
                    warn!(timeout_secs = limit.as_secs(), "no inbound traffic; abandoning connection");
                    return SessionOutcome::Failed(SessionError::IdleTimeout(limit));
                }
            }
        }
    }

    async fn process_frame<W>(&mut self, raw: &[u8], writer: &WritePath<W>) -> Directive
    where
        W: Sink<WsMessage> + Unpin,
        W::Error: fmt::Display,
    {
        let frame = match FrameCodec::decode_frame(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(stage = e.stage(), error = %e, "dropping undecodable frame");
                return Directive::Continue;
            }
        };
        if frame.payload_type != PayloadType::Data {
            trace!(payload_type = frame.payload_type.tag(), "control frame received");
            return Directive::Continue;
        }

        let envelope = match FrameCodec::decode_envelope(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(stage = e.stage(), log_id = frame.log_id, error = %e, "dropping undecodable frame");
                return Directive::Continue;
            }
        };

        if envelope.need_ack {
            let ack = FrameCodec::encode_ack(&frame, &envelope);
            match writer.send_unless(WsMessage::Binary(ack.into()), &self.stop).await {
                Ok(()) => {}
                Err(WriteError::Cancelled) => debug!(log_id = frame.log_id, "ack abandoned on stop"),
                Err(e) => warn!(log_id = frame.log_id, error = %e, "failed to send ack"),
            }
        }

        let now = Local::now();
        let mut directive = Directive::Continue;
        for outcome in self.dispatcher.dispatch_all(&envelope.messages, &now) {
            if let DispatchOutcome::Handled(output) = outcome {
                if let Some(record) = &output.record {
                    self.log.record(self.sink.as_ref(), &now, record).await;
                }
                if output.directive == Directive::EndBroadcast {
                    directive = Directive::EndBroadcast;
                }
            }
        }
        directive
    }

    fn touch(&self) {
        self.state.send_modify(|s| s.last_activity = Instant::now());
    }

    async fn conclude(&mut self, outcome: SessionOutcome) -> SessionOutcome {
        self.log.close(self.sink.as_ref()).await;
        if !matches!(outcome, SessionOutcome::Stopped) {
            let stop = self.stop.clone();
            tokio::select! {
                biased;
                _ = stop.cancelled() => debug!("stop requested; skipping post-session report"),
                reported = tokio::time::timeout(SESSION_ENDED_LIMIT, self.source.session_ended(&outcome)) => {
                    if reported.is_err() {
                        debug!("post-session report timed out");
                    }
                }
            }
        }
        self.state.send_modify(|s| s.status = SessionStatus::Closed);
        debug!(%outcome, "session finalized");
        outcome
    }
}

async fn next_incoming<R>(reader: &mut R, idle: Option<Duration>) -> Incoming
where
    R: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    let next = match idle {
        Some(limit) => match tokio::time::timeout(limit, reader.next()).await {
            Ok(next) => next,
            Err(_) => return Incoming::Idle(limit),
        },
        None => reader.next().await,
    };
    match next {
        Some(Ok(message)) => Incoming::Message(message),
        Some(Err(e)) => Incoming::Error(e),
        None => Incoming::Ended,
    }
}

fn build_request(endpoint: &SessionEndpoint) -> Result<Request, SessionError> {
    let mut request = endpoint
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| SessionError::InvalidEndpoint(e.to_string()))?;
    for (name, value) in &endpoint.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| SessionError::InvalidEndpoint(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| SessionError::InvalidEndpoint(format!("header {name}: {e}")))?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

/// Builds a fresh [`ConnectionSession`] per attempt from shared parts.
#[derive(Clone)]
pub struct SessionFactory {
    source: Arc<dyn EndpointSource>,
    dispatcher: Arc<Dispatcher>,
    sink: Arc<dyn LogSink>,
    settings: SessionSettings,
}

impl SessionFactory {
    pub fn new(
        source: Arc<dyn EndpointSource>,
        dispatcher: Arc<Dispatcher>,
        sink: Arc<dyn LogSink>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            source,
            dispatcher,
            sink,
            settings,
        }
    }

    pub fn session(&self, stop: CancellationToken) -> ConnectionSession {
        ConnectionSession::new(
            Arc::clone(&self.source),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.sink),
            self.settings.clone(),
            stop,
        )
    }
}

#[async_trait]
impl SessionLauncher for SessionFactory {
    async fn run_session(&self, attempt: u64, stop: CancellationToken) -> SessionOutcome {
        debug!(attempt, "launching session");
        self.session(stop).run().await
    }
}
