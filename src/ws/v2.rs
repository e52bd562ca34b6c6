//! Dialect adapter for the Kraken Websocket API v2.
//!
//! v2 acknowledges subscription changes through `method`/`success`/`result`
//! responses. The `result` payload is what gets tracked, after a scrub:
//! scalar symbols become single-element lists so later equality checks are
//! uniform, and fields the server echoes back but rejects on re-subscribe
//! (`maxratecount`, `warnings`) are stripped before anything is persisted.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::constants::PRIVATE_CHANNELS_V2;
use crate::error::{KrakenError, Result};
use crate::ws::dialect::{Dialect, RecoverContext};
use crate::ws::ledger::SubscriptionLedger;
use crate::ws::{SharedSink, send_json};

/// `subscribe`/`unsubscribe` response envelope; the payload stays dynamic.
#[derive(Debug, Deserialize)]
struct MethodAck {
    method: String,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<Value>,
}

/// Kraken Websocket API v2 behavior.
#[derive(Debug, Clone)]
pub struct DialectV2 {
    private_channels: &'static [&'static str],
}

impl Default for DialectV2 {
    fn default() -> Self {
        Self {
            private_channels: PRIVATE_CHANNELS_V2,
        }
    }
}

impl DialectV2 {
    /// Scrubs an acknowledgement `result` into the descriptor shape that is
    /// safe to track and replay on reconnect. Idempotent: re-normalizing
    /// normalized output changes nothing.
    fn transform_subscription(result: &Value, unsubscribe: bool) -> Value {
        let mut descriptor = result.clone();

        match descriptor.get("channel").and_then(Value::as_str) {
            // These channels always carry a symbol list so dedup/removal
            // equality stays uniform across single- and multi-symbol acks.
            Some("book" | "ticker" | "ohlc" | "trade") => {
                let symbol = descriptor.get("symbol").cloned();
                if let Some(symbol) = symbol {
                    if !symbol.is_array() {
                        descriptor["symbol"] = json!([symbol]);
                    }
                }
            }
            // The server echoes maxratecount on executions unsubscribe
            // acknowledgements but rejects it on subscribe requests.
            Some("executions") if unsubscribe => {
                if let Some(object) = descriptor.as_object_mut() {
                    object.remove("maxratecount");
                }
            }
            _ => {}
        }

        // Deprecation hints must not be persisted or resubscribing with the
        // stale flag could fail.
        if let Some(object) = descriptor.as_object_mut() {
            object.remove("warnings");
        }

        descriptor
    }

    /// Removal tolerates server-side response variance: two descriptors are
    /// the same feed when their `channel` and `symbol` agree, even if other
    /// fields differ.
    fn descriptors_match(a: &Value, b: &Value) -> bool {
        a == b || (a.get("channel") == b.get("channel") && a.get("symbol") == b.get("symbol"))
    }
}

#[async_trait]
impl Dialect for DialectV2 {
    async fn send_heartbeat(&self, sink: &SharedSink) -> Result<()> {
        send_json(sink, &json!({"method": "ping"})).await
    }

    fn manage_subscriptions(&self, ledger: &mut SubscriptionLedger, message: &Value) {
        let Ok(ack) = serde_json::from_value::<MethodAck>(message.clone()) else {
            return;
        };

        match ack.method.as_str() {
            "subscribe" => match ack.result {
                Some(result) if ack.success => {
                    let descriptor = Self::transform_subscription(&result, false);
                    ledger.insert(descriptor, Self::descriptors_match);
                }
                _ => warn!(%message, "subscribe request not confirmed"),
            },
            "unsubscribe" => match ack.result {
                Some(result) if ack.success => {
                    let descriptor = Self::transform_subscription(&result, true);
                    ledger.remove(&descriptor, Self::descriptors_match);
                }
                _ => warn!(%message, "unsubscribe request not confirmed"),
            },
            _ => {}
        }
    }

    async fn recover_subscriptions(&self, mut ctx: RecoverContext) -> Result<()> {
        info!(
            auth = ctx.is_auth,
            "subscription recovery waiting for connection"
        );
        ctx.ready.wait_for(|ready| *ready).await.map_err(|_| {
            KrakenError::ConnectionClosed("readiness signal dropped before connect".into())
        })?;

        let snapshot = ctx.ledger.lock().await.snapshot();
        if snapshot.is_empty() {
            debug!("no subscriptions to recover");
            return Ok(());
        }

        info!(count = snapshot.len(), "re-issuing tracked subscriptions");
        let token = ctx.token.lock().await.clone();
        for descriptor in snapshot {
            let mut params = descriptor.clone();
            let private = params
                .get("channel")
                .and_then(Value::as_str)
                .is_some_and(|channel| self.private_channels.contains(&channel));
            if private {
                match token.as_deref() {
                    Some(token) => params["token"] = json!(token),
                    None => warn!(%descriptor, "missing token for private resubscribe"),
                }
            }
            let payload = json!({"method": "subscribe", "params": params});
            match send_json(&ctx.sink, &payload).await {
                Ok(()) => debug!(%descriptor, "resubscribed"),
                Err(error) => warn!(%error, %descriptor, "resubscribe failed"),
            }
        }
        info!("subscription recovery complete");
        Ok(())
    }
}
