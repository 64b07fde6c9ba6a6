//! # Write Path
//!
//! The outbound half of a session's socket, shared by the receive loop (acks) and the
//! heartbeat task. A single async mutex serializes writers so frames never interleave.
//!
//! A peer that stops reading can leave a write pending forever, so callers on the
//! shutdown path use [`send_unless`](WritePath::send_unless) and
//! [`close_within`](WritePath::close_within) instead of the plain forms.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("socket write failed: {0}")]
    Sink(String),

    #[error("socket write abandoned on stop")]
    Cancelled,

    #[error("socket write timed out after {0:?}")]
    TimedOut(Duration),
}

/// Cloneable handle to the serialized outbound sink.
pub struct WritePath<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for WritePath<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> WritePath<S>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: fmt::Display,
{
    pub fn new(sink: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
        }
    }

    /// Sends and flushes one message while holding the write lock.
    pub async fn send(&self, message: WsMessage) -> Result<(), WriteError> {
        let mut sink = self.inner.lock().await;
        sink.send(message).await.map_err(|e| WriteError::Sink(e.to_string()))
    }

    /// Like [`send`](Self::send), but gives up as soon as `stop` is cancelled, whether
    /// still waiting for the lock or for the sink.
    pub async fn send_unless(&self, message: WsMessage, stop: &CancellationToken) -> Result<(), WriteError> {
        tokio::select! {
            biased;
            _ = stop.cancelled() => Err(WriteError::Cancelled),
            sent = self.send(message) => sent,
        }
    }

    /// Flushes and closes the sink. For a WebSocket this starts the close handshake.
    pub async fn close(&self) -> Result<(), WriteError> {
        let mut sink = self.inner.lock().await;
        sink.close().await.map_err(|e| WriteError::Sink(e.to_string()))
    }

    /// [`close`](Self::close) bounded by `limit`.
    pub async fn close_within(&self, limit: Duration) -> Result<(), WriteError> {
        tokio::time::timeout(limit, self.close())
            .await
            .map_err(|_| WriteError::TimedOut(limit))?
    }
}

/// Sink that never accepts anything, like a socket whose peer stopped reading.
#[cfg(test)]
pub(crate) struct Wedged;

#[cfg(test)]
impl Sink<WsMessage> for Wedged {
    type Error = std::io::Error;

    fn poll_ready(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Pending
    }

    fn start_send(self: std::pin::Pin<&mut Self>, _item: WsMessage) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Pending
    }

    fn poll_close(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn clones_share_one_ordered_sink() {
        let (tx, mut rx) = futures_channel::mpsc::unbounded::<WsMessage>();
        let path = WritePath::new(tx);
        let other = path.clone();

        path.send(WsMessage::Binary(vec![1u8].into())).await.unwrap();
        other.send(WsMessage::Binary(vec![2u8].into())).await.unwrap();
        path.close().await.unwrap();

        let received: Vec<_> = rx.by_ref().collect().await;
        assert_eq!(
            received,
            vec![WsMessage::Binary(vec![1u8].into()), WsMessage::Binary(vec![2u8].into())]
        );
        assert!(other.send(WsMessage::Binary(vec![3u8].into())).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_sink_yields_to_stop_and_close_deadline() {
        let path = WritePath::new(Wedged);
        let stop = CancellationToken::new();

        let pending = {
            let path = path.clone();
            let stop = stop.clone();
            tokio::spawn(async move { path.send_unless(WsMessage::Ping(vec![1u8].into()), &stop).await })
        };
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!pending.is_finished());

        stop.cancel();
        assert!(matches!(pending.await.unwrap(), Err(WriteError::Cancelled)));

        let limit = Duration::from_secs(2);
        assert!(matches!(path.close_within(limit).await, Err(WriteError::TimedOut(d)) if d == limit));
    }
}
