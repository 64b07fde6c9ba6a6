//! # Data Ingestors Module
//!
//! Source-specific front doors of the engine. Each ingestor knows how to reach one
//! kind of push channel and plugs the generic session and supervisor machinery from
//! [`crate::core`] into it.
//!
//! - **`douyin_wss`**: the Douyin live-room protobuf WebSocket feed.

/// The Douyin live-room push channel.
pub mod douyin_wss;

pub use douyin_wss::{DouyinConfig, DouyinEndpoint, DouyinWssIngestor};
