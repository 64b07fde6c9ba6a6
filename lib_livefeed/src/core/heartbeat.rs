//! # Heartbeat Scheduler
//!
//! Keeps a session's socket warm by writing an encoded heartbeat frame through the
//! shared [`WritePath`] at a fixed period. The first beat goes out immediately.
//!
//! The scheduler is a child of its session: it observes a token derived from the
//! session's stop token, stops at the first failed write, and can be stopped and
//! awaited explicitly so no beat is ever written after the session finalizes. A beat
//! stuck on a stalled socket is abandoned on cancellation; a task that still does not
//! exit within [`STOP_GRACE`] is aborted.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use futures_util::Sink;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::FrameCodec;
use crate::core::write_path::{WriteError, WritePath};

const MIN_PERIOD: Duration = Duration::from_millis(10);

/// How long [`HeartbeatScheduler::stop`] waits before aborting the task.
pub const STOP_GRACE: Duration = Duration::from_secs(1);

/// WebSocket opcode used to carry heartbeat frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeartbeatMode {
    /// Encoded frame as the payload of a protocol-level ping.
    #[default]
    Ping,
    /// Encoded frame as an ordinary binary message.
    Binary,
}

impl HeartbeatMode {
    fn wrap(self, frame: Vec<u8>) -> WsMessage {
        match self {
            Self::Ping => WsMessage::Ping(frame.into()),
            Self::Binary => WsMessage::Binary(frame.into()),
        }
    }
}

impl fmt::Display for HeartbeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ping => f.write_str("ping"),
            Self::Binary => f.write_str("binary"),
        }
    }
}

impl FromStr for HeartbeatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ping" => Ok(Self::Ping),
            "binary" => Ok(Self::Binary),
            other => Err(format!("unknown heartbeat mode '{other}' (expected 'ping' or 'binary')")),
        }
    }
}

/// Handle to a running heartbeat task.
pub struct HeartbeatScheduler {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl HeartbeatScheduler {
    /// Spawns the heartbeat task. It ends when `parent` is cancelled, when
    /// [`stop`](Self::stop) is called, or after the first failed write.
    pub fn start<S>(
        writer: WritePath<S>,
        period: Duration,
        mode: HeartbeatMode,
        parent: &CancellationToken,
    ) -> Self
    where
        S: Sink<WsMessage> + Unpin + Send + 'static,
        S::Error: fmt::Display,
    {
        let token = parent.child_token();
        let period = period.max(MIN_PERIOD);
        let handle = tokio::spawn(beat(writer, period, mode, token.clone()));
        Self { token, handle }
    }

    #[cfg(test)]
    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the task and waits for it to exit, aborting it after [`STOP_GRACE`].
    pub async fn stop(self) {
        let Self { token, mut handle } = self;
        token.cancel();
        match tokio::time::timeout(STOP_GRACE, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "heartbeat task did not exit cleanly"),
            Err(_) => {
                warn!(grace_ms = STOP_GRACE.as_millis() as u64, "heartbeat task ignored stop; aborting");
                handle.abort();
            }
        }
    }
}

async fn beat<S>(writer: WritePath<S>, period: Duration, mode: HeartbeatMode, token: CancellationToken)
where
    S: Sink<WsMessage> + Unpin,
    S::Error: fmt::Display,
{
    let frame = FrameCodec::encode_heartbeat();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("heartbeat stopped");
                break;
            }
            _ = ticker.tick() => {
                match writer.send_unless(mode.wrap(frame.clone()), &token).await {
                    Ok(()) => trace!(%mode, "heartbeat sent"),
                    Err(WriteError::Cancelled) => {
                        debug!("heartbeat stopped during a pending write");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "heartbeat write failed; scheduler exiting");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PayloadType;
    use crate::core::write_path::Wedged;
    use futures_util::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn beats_immediately_then_every_period() {
        let (tx, mut rx) = futures_channel::mpsc::unbounded::<WsMessage>();
        let parent = CancellationToken::new();
        let hb = HeartbeatScheduler::start(
            WritePath::new(tx),
            Duration::from_secs(5),
            HeartbeatMode::Ping,
            &parent,
        );

        let Some(WsMessage::Ping(bytes)) = rx.next().await else {
            panic!("expected an immediate ping");
        };
        let frame = FrameCodec::decode_frame(&bytes).unwrap();
        assert_eq!(frame.payload_type, PayloadType::Heartbeat);

        tokio::time::sleep(Duration::from_secs(11)).await;
        hb.stop().await;

        let rest: Vec<_> = rx.collect().await;
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn binary_mode_uses_binary_messages() {
        let (tx, mut rx) = futures_channel::mpsc::unbounded::<WsMessage>();
        let parent = CancellationToken::new();
        let hb = HeartbeatScheduler::start(
            WritePath::new(tx),
            Duration::from_secs(10),
            HeartbeatMode::Binary,
            &parent,
        );
        assert!(matches!(rx.next().await, Some(WsMessage::Binary(_))));
        hb.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_stops_beats() {
        let (tx, mut rx) = futures_channel::mpsc::unbounded::<WsMessage>();
        let parent = CancellationToken::new();
        let hb = HeartbeatScheduler::start(
            WritePath::new(tx),
            Duration::from_secs(5),
            HeartbeatMode::Ping,
            &parent,
        );
        rx.next().await.unwrap();

        parent.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(hb.is_finished());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_ends_the_task() {
        let (tx, rx) = futures_channel::mpsc::unbounded::<WsMessage>();
        drop(rx);
        let parent = CancellationToken::new();
        let hb = HeartbeatScheduler::start(
            WritePath::new(tx),
            Duration::from_secs(5),
            HeartbeatMode::Ping,
            &parent,
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(hb.is_finished());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_returns_while_a_beat_is_stuck() {
        let parent = CancellationToken::new();
        let hb = HeartbeatScheduler::start(
            WritePath::new(Wedged),
            Duration::from_secs(5),
            HeartbeatMode::Ping,
            &parent,
        );
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!hb.is_finished());

        let before = tokio::time::Instant::now();
        hb.stop().await;
        assert!(before.elapsed() < STOP_GRACE);
    }

    #[test]
    fn mode_parses() {
        assert_eq!("Binary".parse::<HeartbeatMode>(), Ok(HeartbeatMode::Binary));
        assert_eq!("ping".parse::<HeartbeatMode>(), Ok(HeartbeatMode::Ping));
        assert!("text".parse::<HeartbeatMode>().is_err());
    }
}
