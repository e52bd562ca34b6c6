//! # kraken-ws
//!
//! A Rust client for the [Kraken Spot WebSocket APIs](https://docs.kraken.com/websockets-v2/)
//! (v1 and v2).
//!
//! Connections are supervised: the client transparently detects connection
//! loss, reconnects with jittered exponential backoff (up to a hard
//! ceiling), and re-establishes every confirmed subscription on the fresh
//! socket. All inbound traffic — including `{"error": ...}` reports — is
//! delivered through a single registered callback.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kraken_ws::{KrakenWsClient, ProtocolVersion};
//! use kraken_ws::ws::message_callback;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> kraken_ws::Result<()> {
//!     let client = KrakenWsClient::new(
//!         ProtocolVersion::V2,
//!         message_callback(|message| async move { println!("{message}") }),
//!     );
//!     client
//!         .subscribe(json!({"channel": "ticker", "symbol": ["BTC/USD"]}))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod constants;
pub mod error;
pub mod ws;

/// Re-export the main client types at crate root for convenience.
pub use client::{KrakenWsClient, ProtocolVersion, StaticTokenProvider, TokenProvider};
/// Re-export the error type and Result alias.
pub use error::{KrakenError, Result};
/// Re-export the supervised connection for advanced usage.
pub use ws::connection::{ConnectionState, WsConnection};
