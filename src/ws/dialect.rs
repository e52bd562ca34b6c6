//! The contract between the connection supervisor and a protocol dialect.
//!
//! Kraken serves two incompatible websocket dialects (v1 and v2). Everything
//! version-specific — heartbeat shape, acknowledgement handling, resubscribe
//! requests — lives behind [`Dialect`]; the supervisor only ever holds a
//! `dyn Dialect` and stays dialect-agnostic.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, watch};

use crate::error::Result;
use crate::ws::SharedSink;
use crate::ws::ledger::SubscriptionLedger;

/// Per-attempt collaborators handed to [`Dialect::recover_subscriptions`].
///
/// All handles are owned clones so the recovery future is `'static` and can
/// be spawned as its own task, racing the receive loop.
pub struct RecoverContext {
    /// Fires once the receive task has connected and sent its first
    /// heartbeat. Recovery must not send anything before that.
    pub ready: watch::Receiver<bool>,
    /// The live ledger. Recovery takes a snapshot before iterating; the
    /// receive task may keep mutating the original between sends.
    pub ledger: Arc<Mutex<SubscriptionLedger>>,
    /// Send path for resubscribe requests.
    pub sink: SharedSink,
    /// Websocket token fetched for this attempt (`None` on public
    /// connections).
    pub token: Arc<Mutex<Option<String>>>,
    /// Whether this connection serves authenticated channels.
    pub is_auth: bool,
}

/// Version-specific behavior the connection supervisor depends on.
#[async_trait]
pub trait Dialect: Send + Sync {
    /// Builds and transmits the dialect's keep-alive message.
    async fn send_heartbeat(&self, sink: &SharedSink) -> Result<()>;

    /// Inspects one parsed inbound message for subscribe/unsubscribe
    /// acknowledgements and updates the ledger accordingly.
    ///
    /// Must be idempotent under duplicate acknowledgements and must never
    /// fail: unrecognized or malformed acknowledgements are logged and
    /// skipped, keeping ledger mutation strictly acknowledgement-driven.
    fn manage_subscriptions(&self, ledger: &mut SubscriptionLedger, message: &Value);

    /// Awaits readiness, then re-issues every tracked subscription so the
    /// wire can re-confirm it after a reconnect.
    ///
    /// Private descriptors are tagged with the freshly fetched token at send
    /// time; the token is never stored in the ledger. Per-item send failures
    /// are logged, not propagated.
    async fn recover_subscriptions(&self, ctx: RecoverContext) -> Result<()>;
}
