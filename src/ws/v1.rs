//! Dialect adapter for the Kraken Websocket API v1.
//!
//! v1 acknowledges subscription changes with `subscriptionStatus` events and
//! keys feeds on a channel name plus a `pair` list. Private channels
//! (`ownTrades`, `openOrders`) carry no pair and get their token attached
//! only when a request goes out — never in the ledger.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::constants::{PRIVATE_CHANNELS_V1, PUBLIC_CHANNELS_V1};
use crate::error::{KrakenError, Result};
use crate::ws::dialect::{Dialect, RecoverContext};
use crate::ws::ledger::SubscriptionLedger;
use crate::ws::{SharedSink, send_json};

/// `subscriptionStatus` envelope; everything else stays dynamic.
#[derive(Debug, Deserialize)]
struct StatusAck {
    event: String,
    #[serde(default)]
    status: Option<String>,
}

/// Kraken Websocket API v1 behavior.
#[derive(Debug, Clone)]
pub struct DialectV1 {
    public_channels: &'static [&'static str],
    private_channels: &'static [&'static str],
}

impl Default for DialectV1 {
    fn default() -> Self {
        Self {
            public_channels: PUBLIC_CHANNELS_V1,
            private_channels: PRIVATE_CHANNELS_V1,
        }
    }
}

impl DialectV1 {
    /// Builds the canonical descriptor tracked for one acknowledgement:
    /// `{"event":"subscribe","pair":[...],"subscription":{...}}`.
    ///
    /// Private channels keep only the subscription name. Unknown channels
    /// are not tracked.
    fn build_subscription(&self, message: &Value) -> Option<Value> {
        let Some(name) = message
            .get("subscription")
            .and_then(|subscription| subscription.get("name"))
            .and_then(Value::as_str)
        else {
            warn!(%message, "acknowledgement without a subscription name");
            return None;
        };

        if self.public_channels.contains(&name) {
            let mut descriptor = json!({"event": "subscribe"});
            match message.get("pair") {
                Some(Value::Array(pairs)) if !pairs.is_empty() => {
                    descriptor["pair"] = Value::Array(pairs.clone());
                }
                Some(Value::String(pair)) => {
                    descriptor["pair"] = json!([pair]);
                }
                _ => {}
            }
            descriptor["subscription"] = message["subscription"].clone();
            Some(descriptor)
        } else if self.private_channels.contains(&name) {
            Some(json!({"event": "subscribe", "subscription": {"name": name}}))
        } else {
            warn!(channel = name, "feed not implemented, not tracking it");
            None
        }
    }

    fn is_private(&self, descriptor: &Value) -> bool {
        descriptor
            .get("subscription")
            .and_then(|subscription| subscription.get("name"))
            .and_then(Value::as_str)
            .is_some_and(|name| self.private_channels.contains(&name))
    }
}

#[async_trait]
impl Dialect for DialectV1 {
    async fn send_heartbeat(&self, sink: &SharedSink) -> Result<()> {
        let payload = json!({
            "event": "ping",
            "reqid": Utc::now().timestamp_millis(),
        });
        send_json(sink, &payload).await
    }

    fn manage_subscriptions(&self, ledger: &mut SubscriptionLedger, message: &Value) {
        let Ok(ack) = serde_json::from_value::<StatusAck>(message.clone()) else {
            return;
        };
        if ack.event != "subscriptionStatus" {
            return;
        }

        match ack.status.as_deref() {
            Some("subscribed") => {
                if let Some(descriptor) = self.build_subscription(message) {
                    ledger.insert(descriptor, |a, b| a == b);
                }
            }
            Some("unsubscribed") => {
                if let Some(descriptor) = self.build_subscription(message) {
                    ledger.remove(&descriptor, |a, b| a == b);
                }
            }
            Some("error") => warn!(%message, "subscription request rejected"),
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
            let mut outbound = descriptor.clone();
            if self.is_private(&descriptor) {
                match token.as_deref() {
                    Some(token) => outbound["subscription"]["token"] = json!(token),
                    None => warn!(%descriptor, "missing token for private resubscribe"),
                }
            }
            match send_json(&ctx.sink, &outbound).await {
                Ok(()) => debug!(%descriptor, "resubscribed"),
                Err(error) => warn!(%error, %descriptor, "resubscribe failed"),
            }
        }
        info!("subscription recovery complete");
        Ok(())
    }
}
