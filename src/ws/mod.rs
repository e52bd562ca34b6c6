//! WebSocket modules for the Kraken Spot streaming APIs.
//!
//! The pieces fit together like this:
//!
//! ```text
//!            ┌────────────────────────────────┐
//!            │         KrakenWsClient          │
//!            │ (request shaping, token tagging)│
//!            └───────┬────────────────┬────────┘
//!                    │                │
//!              WsConnection     WsConnection
//!              (public feed)    (auth feed, optional)
//!                    │                │
//!            dyn Dialect (v1 or v2) + SubscriptionLedger
//! ```
//!
//! Each [`connection::WsConnection`] supervises one physical socket: it runs
//! the receive/heartbeat loop, reconnects with jittered exponential backoff,
//! and re-issues every ledger-tracked subscription after a reconnect. The
//! protocol-version differences are confined to [`dialect::Dialect`]
//! implementations in [`v1`] and [`v2`].

pub mod connection;
pub mod dialect;
pub mod ledger;
pub mod v1;
pub mod v2;

pub use connection::{ConnectionState, WsConnection};
pub use dialect::{Dialect, RecoverContext};
pub use ledger::SubscriptionLedger;
pub use v1::DialectV1;
pub use v2::DialectV2;

use std::sync::Arc;

use futures_util::SinkExt;
use futures_util::future::BoxFuture;
use futures_util::stream::SplitSink;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{KrakenError, Result};

/// One physical websocket stream.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The write half of a split websocket stream.
pub type WsSink = SplitSink<WsStream, Message>;

/// Write half shared between the receive loop, the recovery task, and the
/// outer client's send path. `None` while no socket is open.
pub type SharedSink = Arc<Mutex<Option<WsSink>>>;

/// Async callback invoked with every inbound message.
///
/// Failures also arrive here, as `{"error": ...}` payloads — consumers must
/// treat them as a first-class message type, not an exceptional channel.
pub type MessageCallback = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into a [`MessageCallback`].
///
/// ```no_run
/// use kraken_ws::ws::message_callback;
///
/// let callback = message_callback(|message| async move {
///     println!("{message}");
/// });
/// ```
pub fn message_callback<F, Fut>(f: F) -> MessageCallback
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Serializes `payload` and sends it as one text frame over the shared sink.
pub(crate) async fn send_json(sink: &SharedSink, payload: &Value) -> Result<()> {
    let frame = serde_json::to_string(payload)?;
    let mut guard = sink.lock().await;
    match guard.as_mut() {
        Some(sink) => {
            sink.send(Message::Text(frame.into())).await?;
            Ok(())
        }
        None => Err(KrakenError::NotConnected(
            "websocket sink not available".into(),
        )),
    }
}
