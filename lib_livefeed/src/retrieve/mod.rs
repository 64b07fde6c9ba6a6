//! # Data Retrieval Module
//!
//! HTTP-side collaborators of the feed engine.
//!
//! - **`ky_http`**: a small `reqwest` client wrapped in `reqwest-middleware` with
//!   exponential-backoff retries for transient failures.
//! - **`room_resolver`**: turns a live id into the internal room id and the `ttwid`
//!   session cookie by scraping the public room page, and asks the room-entry API
//!   whether the room is still live.
//! - **`signer`**: a signing oracle that delegates to an external command.

/// Generic HTTP client with retry middleware.
pub mod ky_http;
/// Live id to room id resolution.
pub mod room_resolver;
/// Command-backed signing oracle.
pub mod signer;

pub use ky_http::{ApiClient, ApiResponse};
pub use room_resolver::{parse_room_status, HttpRoomResolver};
pub use signer::{query_string, signature_input, CommandSigner, SignerInput};
