//! # Push Channel Protobuf Structures
//!
//! Rust representations of the transport-level protobuf messages exchanged over the
//! live-room push WebSocket. They are declared directly with the `prost` derive
//! macros, so no `.proto` compilation step is needed.
//!
//! Only the fields the engine reads or writes are declared. `prost` skips unknown
//! tags while decoding, so newer server revisions that add fields keep decoding.

use std::collections::HashMap;

use prost::Message;

/// The outer transport frame. Every WebSocket binary message is exactly one `PushFrame`.
#[derive(Clone, PartialEq, Message)]
pub struct PushFrame {
    /// Sequence id assigned by the push server.
    #[prost(uint64, tag = "1")]
    pub seq_id: u64,

    /// Log id of the frame; echoed verbatim in acknowledgements.
    #[prost(uint64, tag = "2")]
    pub log_id: u64,

    /// Service identifier.
    #[prost(uint64, tag = "3")]
    pub service: u64,

    /// Method identifier.
    #[prost(uint64, tag = "4")]
    pub method: u64,

    /// Free-form key/value headers (e.g. `compress_type: gzip`).
    #[prost(message, repeated, tag = "5")]
    pub headers_list: Vec<HeadersList>,

    /// Encoding of the payload body (usually `pb`).
    #[prost(string, tag = "6")]
    pub payload_encoding: String,

    /// Payload type tag: `msg`, `hb` or `ack`.
    #[prost(string, tag = "7")]
    pub payload_type: String,

    /// Raw payload, gzip-compressed for data frames.
    #[prost(bytes = "vec", tag = "8")]
    pub payload: Vec<u8>,
}

/// A single frame header entry.
#[derive(Clone, PartialEq, Message)]
pub struct HeadersList {
    #[prost(string, tag = "1")]
    pub key: String,

    #[prost(string, tag = "2")]
    pub value: String,
}

/// The application-level batch carried in a data frame's (decompressed) payload.
#[derive(Clone, PartialEq, Message)]
pub struct Response {
    /// Ordered batch of typed messages.
    #[prost(message, repeated, tag = "1")]
    pub messages: Vec<WireMessage>,

    /// Server cursor for resuming.
    #[prost(string, tag = "2")]
    pub cursor: String,

    /// Suggested polling interval (ms) for the HTTP fallback path.
    #[prost(uint64, tag = "3")]
    pub fetch_interval: u64,

    /// Server time in epoch milliseconds.
    #[prost(uint64, tag = "4")]
    pub now: u64,

    /// Opaque string that must be echoed in the acknowledgement.
    #[prost(string, tag = "5")]
    pub internal_ext: String,

    #[prost(uint32, tag = "6")]
    pub fetch_type: u32,

    #[prost(map = "string, string", tag = "7")]
    pub route_params: HashMap<String, String>,

    /// Heartbeat period suggested by the server (ms).
    #[prost(uint64, tag = "8")]
    pub heartbeat_duration: u64,

    /// Whether the client must acknowledge this batch.
    #[prost(bool, tag = "9")]
    pub need_ack: bool,

    #[prost(string, tag = "10")]
    pub push_server: String,
}

/// One typed event inside a [`Response`].
#[derive(Clone, PartialEq, Message)]
pub struct WireMessage {
    /// Kind tag, e.g. `WebcastChatMessage`.
    #[prost(string, tag = "1")]
    pub method: String,

    /// Kind-specific protobuf body.
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,

    #[prost(int64, tag = "3")]
    pub msg_id: i64,

    #[prost(int32, tag = "4")]
    pub msg_type: i32,

    #[prost(int64, tag = "5")]
    pub offset: i64,
}
