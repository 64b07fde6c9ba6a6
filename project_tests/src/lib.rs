//! # Loopback Push Server
//!
//! A scripted WebSocket server on `127.0.0.1` standing in for the live push
//! endpoint. Each accepted connection plays the next script in order; everything the
//! client sends is forwarded to the test together with the connection index. The
//! handshake request of every connection is kept for inspection.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use prost::Message as _;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use lib_livefeed::codec::events::{ChatMessage, ControlMessage, User};
use lib_livefeed::codec::proto_handler::{Response as PushResponse, WireMessage};
use lib_livefeed::codec::FrameCodec;
use lib_livefeed::core::handlers::BROADCAST_ENDED_STATUS;

/// One step of a connection script.
#[derive(Debug, Clone)]
pub enum Step {
    /// Send a binary frame.
    Send(Vec<u8>),
    Pause(Duration),
    /// Send a close frame, then drain the client until it hangs up.
    Close,
    /// Keep the connection open until the client hangs up.
    Hold,
}

/// What the server saw of one handshake.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub uri: String,
    pub cookie: Option<String>,
    pub user_agent: Option<String>,
}

/// A client message, tagged with the zero-based connection index.
#[derive(Debug)]
pub struct Received {
    pub connection: usize,
    pub message: Message,
}

pub struct PushServer {
    addr: SocketAddr,
    inbound: mpsc::UnboundedReceiver<Received>,
    handshakes: Arc<Mutex<Vec<Handshake>>>,
    acceptor: JoinHandle<()>,
}

impl PushServer {
    /// Binds an ephemeral port. Connections beyond the given scripts just hold.
    pub async fn start(scripts: Vec<Vec<Step>>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, inbound) = mpsc::unbounded_channel();
        let handshakes = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&handshakes);
        let acceptor = tokio::spawn(async move {
            let mut scripts = scripts.into_iter();
            let mut connection = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let script = scripts.next().unwrap_or_else(|| vec![Step::Hold]);
                tokio::spawn(serve(
                    connection,
                    stream,
                    script,
                    tx.clone(),
                    Arc::clone(&seen),
                ));
                connection += 1;
            }
        });

        Ok(Self {
            addr,
            inbound,
            handshakes,
            acceptor,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}/webcast/im/push/v2/", self.addr)
    }

    pub fn handshakes(&self) -> Vec<Handshake> {
        self.handshakes.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Next client message, or `None` if nothing arrives within `within`.
    pub async fn next_received(&mut self, within: Duration) -> Option<Received> {
        tokio::time::timeout(within, self.inbound.recv()).await.ok().flatten()
    }

    /// Next binary client message, skipping control frames.
    pub async fn next_binary(&mut self, within: Duration) -> Option<(usize, Vec<u8>)> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let received = self.next_received(left).await?;
            if let Message::Binary(bytes) = received.message {
                return Some((received.connection, bytes.to_vec()));
            }
        }
    }
}

impl Drop for PushServer {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn serve(
    connection: usize,
    stream: TcpStream,
    script: Vec<Step>,
    tx: mpsc::UnboundedSender<Received>,
    handshakes: Arc<Mutex<Vec<Handshake>>>,
) {
    let record = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        if let Ok(mut seen) = handshakes.lock() {
            seen.push(Handshake {
                uri: request.uri().to_string(),
                cookie: header("cookie"),
                user_agent: header("user-agent"),
            });
        }
        Ok(response)
    };
    let Ok(ws) = accept_hdr_async(stream, record).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = read.next().await {
            if tx.send(Received { connection, message }).is_err() {
                break;
            }
        }
    });

    for step in script {
        match step {
            Step::Send(bytes) => {
                if write.send(Message::Binary(bytes.into())).await.is_err() {
                    break;
                }
            }
            Step::Pause(pause) => tokio::time::sleep(pause).await,
            Step::Close => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            Step::Hold => break,
        }
    }
    let _ = reader.await;
}

/// Data frame carrying `messages` as `(method, payload)` pairs.
pub fn data_frame(log_id: u64, need_ack: bool, messages: Vec<(&str, Vec<u8>)>) -> Vec<u8> {
    let response = PushResponse {
        need_ack,
        internal_ext: format!("internal_src:pushserver|seq:{log_id}"),
        messages: messages
            .into_iter()
            .map(|(method, payload)| WireMessage {
                method: method.to_string(),
                payload,
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };
    FrameCodec::encode_data_frame(log_id, &response, true).unwrap_or_default()
}

pub fn chat(nick: &str, content: &str) -> Vec<u8> {
    ChatMessage {
        user: Some(User {
            id: 42,
            nick_name: nick.to_string(),
            ..Default::default()
        }),
        content: content.to_string(),
        ..Default::default()
    }
    .encode_to_vec()
}

pub fn broadcast_ended() -> Vec<u8> {
    ControlMessage {
        status: BROADCAST_ENDED_STATUS,
        ..Default::default()
    }
    .encode_to_vec()
}
