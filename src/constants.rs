//! Constants for the Kraken Spot WebSocket APIs.
//!
//! Contains websocket endpoints for both protocol dialects, the channel-name
//! sets used to classify v1 subscriptions, and the tuning values of the
//! connection supervisor. These are used internally by
//! [`KrakenWsClient`](crate::client::KrakenWsClient) and the connection
//! supervisor, but are also exported for advanced usage.

// ---------------------------------------------------------------------------
// WebSocket endpoints
// ---------------------------------------------------------------------------

/// Public endpoint for the Websocket API v1.
pub const WS_URL_V1: &str = "wss://ws.kraken.com";

/// Authenticated endpoint for the Websocket API v1.
pub const WS_AUTH_URL_V1: &str = "wss://ws-auth.kraken.com";

/// Public endpoint for the Websocket API v2.
pub const WS_URL_V2: &str = "wss://ws.kraken.com/v2";

/// Authenticated endpoint for the Websocket API v2.
pub const WS_AUTH_URL_V2: &str = "wss://ws-auth.kraken.com/v2";

/// `User-Agent` header sent on the websocket handshake.
pub const WS_USER_AGENT: &str = concat!("kraken-ws/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Channel classification
// ---------------------------------------------------------------------------

/// Channel names the Websocket API v1 serves without authentication.
///
/// `"*"` is the wildcard Kraken uses to acknowledge catch-all subscriptions.
pub const PUBLIC_CHANNELS_V1: &[&str] = &["ticker", "spread", "book", "ohlc", "trade", "*"];

/// Channel names the Websocket API v1 serves only on authenticated
/// connections.
pub const PRIVATE_CHANNELS_V1: &[&str] = &["ownTrades", "openOrders"];

/// Channel names the Websocket API v2 serves only on authenticated
/// connections (subscriptions must carry a token).
pub const PRIVATE_CHANNELS_V2: &[&str] = &["executions", "balances", "level3"];

// ---------------------------------------------------------------------------
// Supervision tuning
// ---------------------------------------------------------------------------

/// Tuning values for the connection supervisor.
pub mod supervision {
    /// Reconnect-attempt ceiling. Reaching it terminates the supervisor.
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 7;

    /// Seconds between outbound heartbeats on an idle connection.
    pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

    /// Bounded wait for one inbound frame. Elapsing is not an error; it
    /// triggers a heartbeat and the receive loop continues.
    pub const RECV_TIMEOUT_SECS: u64 = 15;

    /// Upper bound on the exponential part of the reconnect backoff.
    pub const BACKOFF_CAP_SECS: u64 = 180;
}
