//! Error types for the `kraken-ws` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, KrakenError>`.
//!
//! [`KrakenError`] covers:
//! - **WebSocket errors** — Connection and protocol errors from the transport
//! - **JSON errors** — Serialization/deserialization failures
//! - **URL errors** — Malformed endpoint construction
//! - **Reconnect exhaustion** — The supervisor hit its retry ceiling
//! - **Token errors** — The websocket token could not be obtained
//! - **Connection state errors** — Sends attempted without an open socket
//! - **Invalid arguments** — Client-side validation errors

/// All possible errors produced by the `kraken-ws` client.
#[derive(Debug, thiserror::Error)]
pub enum KrakenError {
    /// The connection supervisor exceeded its reconnect ceiling and halted.
    #[error("maximum number of reconnect attempts exceeded")]
    MaxReconnectsExceeded,

    /// A WebSocket-level error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The remote closed the connection or the stream ended.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Failed to serialize or deserialize a JSON payload.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error building or parsing a URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// A send was attempted while no socket is open.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// The websocket authentication token could not be obtained.
    #[error("token acquisition failed: {0}")]
    Token(String),

    /// A supervised task was cancelled or panicked.
    #[error("connection task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KrakenError>;
