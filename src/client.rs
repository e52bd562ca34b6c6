//! Outer client for the Kraken Spot websocket APIs.
//!
//! [`KrakenWsClient`] is the entry point end users hold. It owns up to two
//! supervised connections — one public, one authenticated — for a chosen
//! [`ProtocolVersion`], shapes subscribe/unsubscribe requests for that
//! dialect, and injects the websocket token into private requests at send
//! time.
//!
//! Token acquisition is delegated through [`TokenProvider`]: Kraken hands
//! out short-lived websocket tokens via its signed REST API, which lives
//! outside this crate. Wire up your REST client (or anything else that can
//! produce a token) behind the trait; [`StaticTokenProvider`] covers tests
//! and short-lived tooling.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::constants::{
    PRIVATE_CHANNELS_V1, PRIVATE_CHANNELS_V2, PUBLIC_CHANNELS_V1, WS_AUTH_URL_V1, WS_AUTH_URL_V2,
    WS_URL_V1, WS_URL_V2,
};
use crate::error::{KrakenError, Result};
use crate::ws::connection::{ConnectionState, WsConnection};
use crate::ws::dialect::Dialect;
use crate::ws::v1::DialectV1;
use crate::ws::v2::DialectV2;
use crate::ws::MessageCallback;

/// Source of short-lived websocket authentication tokens.
///
/// Called at the start of every (re)connect attempt and whenever a private
/// request needs a token that is not yet cached.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fetches a fresh websocket token.
    async fn ws_token(&self) -> Result<String>;
}

/// Token provider that always returns the same preconfigured token.
///
/// Kraken websocket tokens stay valid as long as the connection uses them,
/// so this is enough for tests and short-lived tools; long-running services
/// should implement [`TokenProvider`] against their REST client instead.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Wraps an already-obtained websocket token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn ws_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// The two incompatible Kraken websocket dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// Websocket API v1 (`subscriptionStatus` acknowledgements).
    V1,
    /// Websocket API v2 (`method`/`success` acknowledgements).
    V2,
}

impl ProtocolVersion {
    fn public_url(self) -> &'static str {
        match self {
            Self::V1 => WS_URL_V1,
            Self::V2 => WS_URL_V2,
        }
    }

    fn auth_url(self) -> &'static str {
        match self {
            Self::V1 => WS_AUTH_URL_V1,
            Self::V2 => WS_AUTH_URL_V2,
        }
    }

    fn dialect(self) -> Arc<dyn Dialect> {
        match self {
            Self::V1 => Arc::new(DialectV1::default()),
            Self::V2 => Arc::new(DialectV2::default()),
        }
    }
}

/// Client for the Kraken Spot websocket APIs.
///
/// # Example
///
/// ```no_run
/// use kraken_ws::{KrakenWsClient, ProtocolVersion};
/// use kraken_ws::ws::message_callback;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> kraken_ws::Result<()> {
/// let client = KrakenWsClient::new(
///     ProtocolVersion::V2,
///     message_callback(|message| async move { println!("{message}") }),
/// );
/// client
///     .subscribe(json!({"channel": "ticker", "symbol": ["BTC/USD"]}))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct KrakenWsClient {
    version: ProtocolVersion,
    public: Option<WsConnection>,
    auth: Option<WsConnection>,
}

impl KrakenWsClient {
    /// Public-data client: one supervised connection to the public endpoint.
    pub fn new(version: ProtocolVersion, callback: MessageCallback) -> Self {
        Self::with_endpoints(version, callback, Some(version.public_url().into()), None)
    }

    /// Client with both a public and an authenticated connection.
    pub fn with_auth(
        version: ProtocolVersion,
        callback: MessageCallback,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Self {
        Self::with_endpoints(
            version,
            callback,
            Some(version.public_url().into()),
            Some((version.auth_url().into(), token_provider)),
        )
    }

    /// Authenticated-only client, for consumers that never touch public
    /// feeds and do not want the extra connection.
    pub fn auth_only(
        version: ProtocolVersion,
        callback: MessageCallback,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Self {
        Self::with_endpoints(
            version,
            callback,
            None,
            Some((version.auth_url().into(), token_provider)),
        )
    }

    /// Fully explicit construction. Useful for testing against a local or
    /// mock websocket server.
    pub fn with_endpoints(
        version: ProtocolVersion,
        callback: MessageCallback,
        public_endpoint: Option<String>,
        auth_endpoint: Option<(String, Arc<dyn TokenProvider>)>,
    ) -> Self {
        let public = public_endpoint.map(|endpoint| {
            WsConnection::spawn(endpoint, version.dialect(), Arc::clone(&callback), None)
        });
        let auth = auth_endpoint.map(|(endpoint, provider)| {
            WsConnection::spawn(
                endpoint,
                version.dialect(),
                Arc::clone(&callback),
                Some(provider),
            )
        });

        Self {
            version,
            public,
            auth,
        }
    }

    /// The dialect this client speaks.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// The supervised public connection, if this client has one.
    pub fn public_connection(&self) -> Option<&WsConnection> {
        self.public.as_ref()
    }

    /// The supervised authenticated connection, if this client has one.
    pub fn auth_connection(&self) -> Option<&WsConnection> {
        self.auth.as_ref()
    }

    /// Channel names served without authentication (v1 classification).
    pub fn public_channel_names(&self) -> &'static [&'static str] {
        PUBLIC_CHANNELS_V1
    }

    /// Channel names requiring an authenticated connection.
    pub fn private_channel_names(&self) -> &'static [&'static str] {
        match self.version {
            ProtocolVersion::V1 => PRIVATE_CHANNELS_V1,
            ProtocolVersion::V2 => PRIVATE_CHANNELS_V2,
        }
    }

    /// Whether any owned supervisor has permanently stopped.
    pub fn is_terminated(&self) -> bool {
        let terminated =
            |connection: &WsConnection| connection.state() == ConnectionState::Terminated;
        self.public.as_ref().is_some_and(terminated)
            || self.auth.as_ref().is_some_and(terminated)
    }

    /// Copies of the tracked subscriptions across both connections.
    pub async fn subscriptions(&self) -> Vec<Value> {
        let mut all = Vec::new();
        if let Some(connection) = &self.public {
            all.extend(connection.subscriptions().await);
        }
        if let Some(connection) = &self.auth {
            all.extend(connection.subscriptions().await);
        }
        all
    }

    /// Subscribes to one feed.
    ///
    /// `params` is the dialect-shaped request fragment: for v1 a
    /// `{"subscription": {...}, "pair": [...]}` object, for v2 a
    /// `{"channel": ..., "symbol": [...]}` object. Private channels are
    /// routed to the authenticated connection and tagged with its token.
    pub async fn subscribe(&self, params: Value) -> Result<()> {
        self.request("subscribe", params).await
    }

    /// Unsubscribes from one feed; `params` as for [`subscribe`](Self::subscribe).
    pub async fn unsubscribe(&self, params: Value) -> Result<()> {
        self.request("unsubscribe", params).await
    }

    /// Sends an already-shaped payload over the public or authenticated
    /// connection. The payload goes out as-is.
    pub async fn send_message(&self, message: Value, private: bool) -> Result<()> {
        let connection = if private {
            self.auth.as_ref().ok_or_else(|| {
                KrakenError::NotConnected("this client has no authenticated connection".into())
            })?
        } else {
            self.public.as_ref().ok_or_else(|| {
                KrakenError::NotConnected("this client has no public connection".into())
            })?
        };
        connection.send(&message).await
    }

    async fn request(&self, action: &str, params: Value) -> Result<()> {
        let token = match &self.auth {
            Some(connection) => connection.current_token().await,
            None => None,
        };
        let (payload, private) = match self.version {
            ProtocolVersion::V1 => build_request_v1(action, params, token.as_deref())?,
            ProtocolVersion::V2 => build_request_v2(action, params, token.as_deref())?,
        };
        self.send_message(payload, private).await
    }
}

/// Shapes a v1 request: `{"event": <action>, "subscription": {...}, ...}`.
/// Private channels get the token injected into the subscription object.
fn build_request_v1(
    action: &str,
    mut params: Value,
    token: Option<&str>,
) -> Result<(Value, bool)> {
    let Some(name) = params
        .get("subscription")
        .and_then(|subscription| subscription.get("name"))
        .and_then(Value::as_str)
    else {
        return Err(KrakenError::InvalidArgument(
            "v1 subscription parameters need a subscription.name".into(),
        ));
    };

    let private = PRIVATE_CHANNELS_V1.contains(&name);
    if private {
        let token = token.ok_or_else(|| {
            KrakenError::Token("authenticated connection has no websocket token yet".into())
        })?;
        params["subscription"]["token"] = json!(token);
    }

    let mut payload = json!({"event": action});
    if let Value::Object(fields) = params {
        for (key, value) in fields {
            payload[key] = value;
        }
    }
    Ok((payload, private))
}

/// Shapes a v2 request: `{"method": <action>, "params": {...}}`. Private
/// channels get the token injected into the params object.
fn build_request_v2(
    action: &str,
    mut params: Value,
    token: Option<&str>,
) -> Result<(Value, bool)> {
    let Some(channel) = params.get("channel").and_then(Value::as_str) else {
        return Err(KrakenError::InvalidArgument(
            "v2 subscription parameters need a channel".into(),
        ));
    };

    let private = PRIVATE_CHANNELS_V2.contains(&channel);
    if private {
        let token = token.ok_or_else(|| {
            KrakenError::Token("authenticated connection has no websocket token yet".into())
        })?;
        params["token"] = json!(token);
    }

    Ok((json!({"method": action, "params": params}), private))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_public_requests_wrap_the_event() {
        let (payload, private) = build_request_v1(
            "subscribe",
            json!({"subscription": {"name": "ticker"}, "pair": ["XBT/USD"]}),
            None,
        )
        .unwrap();

        assert!(!private);
        assert_eq!(
            payload,
            json!({
                "event": "subscribe",
                "subscription": {"name": "ticker"},
                "pair": ["XBT/USD"],
            }),
        );
    }

    #[test]
    fn v1_private_requests_carry_the_token() {
        let (payload, private) = build_request_v1(
            "subscribe",
            json!({"subscription": {"name": "ownTrades"}}),
            Some("ws-token"),
        )
        .unwrap();

        assert!(private);
        assert_eq!(payload["subscription"]["token"], json!("ws-token"));
    }

    #[test]
    fn v1_private_requests_without_a_token_fail() {
        let result = build_request_v1(
            "subscribe",
            json!({"subscription": {"name": "openOrders"}}),
            None,
        );

        assert!(matches!(result, Err(KrakenError::Token(_))));
    }

    #[test]
    fn v1_requests_without_a_name_are_rejected() {
        let result = build_request_v1("subscribe", json!({"pair": ["XBT/USD"]}), None);
        assert!(matches!(result, Err(KrakenError::InvalidArgument(_))));
    }

    #[test]
    fn v2_public_requests_wrap_the_method() {
        let (payload, private) = build_request_v2(
            "subscribe",
            json!({"channel": "ticker", "symbol": ["BTC/USD"]}),
            None,
        )
        .unwrap();

        assert!(!private);
        assert_eq!(
            payload,
            json!({
                "method": "subscribe",
                "params": {"channel": "ticker", "symbol": ["BTC/USD"]},
            }),
        );
    }

    #[test]
    fn v2_private_requests_carry_the_token_inside_params() {
        let (payload, private) = build_request_v2(
            "unsubscribe",
            json!({"channel": "executions"}),
            Some("ws-token"),
        )
        .unwrap();

        assert!(private);
        assert_eq!(
            payload,
            json!({
                "method": "unsubscribe",
                "params": {"channel": "executions", "token": "ws-token"},
            }),
        );
    }

    #[tokio::test]
    async fn private_sends_need_an_authenticated_connection() {
        let client = KrakenWsClient::with_endpoints(
            ProtocolVersion::V2,
            crate::ws::message_callback(|_message| async {}),
            Some("ws://127.0.0.1:9".into()),
            None,
        );

        let result = client
            .send_message(json!({"method": "ping"}), true)
            .await;
        assert!(matches!(result, Err(KrakenError::NotConnected(_))));
    }
}
