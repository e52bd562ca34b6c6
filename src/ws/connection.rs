//! Connection supervision for one Kraken websocket endpoint.
//!
//! A [`WsConnection`] owns one physical socket at a time and keeps it alive
//! for the lifetime of the supervisor: it runs the receive/heartbeat loop,
//! detects connection loss, reconnects with jittered exponential backoff up
//! to a hard ceiling, and re-establishes every tracked subscription after a
//! reconnect.
//!
//! Each attempt races two tasks sharing a readiness signal:
//!
//! - the **receive task** connects, sends the initial heartbeat, fires the
//!   readiness signal, and then pumps inbound frames;
//! - the **recovery task** waits for readiness and re-issues every
//!   descriptor currently in the ledger.
//!
//! Whichever task fails first tears the other down; the failure is reported
//! to the callback as an `{"error": ...}` message and the supervisor loops
//! back into backoff. Only the reconnect ceiling is fatal.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use futures_util::{SinkExt, StreamExt};
use rand::random;
use serde_json::{Value, json};
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Duration, Instant, sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::USER_AGENT;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::client::TokenProvider;
use crate::constants::{WS_USER_AGENT, supervision};
use crate::error::{KrakenError, Result};
use crate::ws::dialect::{Dialect, RecoverContext};
use crate::ws::ledger::SubscriptionLedger;
use crate::ws::{MessageCallback, SharedSink, send_json};

/// Lifecycle of a supervised connection, published through a `watch`
/// channel so owners can observe termination without shared flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Supervisor spawned, no connect attempt started yet.
    Idle,
    /// First connect attempt in progress.
    Connecting,
    /// Socket open, receive loop running.
    Connected,
    /// Connection lost; waiting out backoff before the next attempt.
    Reconnecting,
    /// Reconnect ceiling reached. Terminal — no further attempts.
    Terminated,
}

struct ConnectionInner {
    endpoint: String,
    is_auth: bool,
    dialect: Arc<dyn Dialect>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    callback: MessageCallback,
    sink: SharedSink,
    ledger: Arc<Mutex<SubscriptionLedger>>,
    /// Token fetched for the current attempt; read by the recovery task.
    token: Arc<Mutex<Option<String>>>,
    /// Consecutive failed attempts. Reset to zero only by a successful
    /// connect-and-initial-heartbeat.
    attempts: AtomicU32,
    state_tx: watch::Sender<ConnectionState>,
}

/// Supervised websocket connection to one Kraken endpoint.
///
/// Constructing one immediately spawns the supervision task; the caller is
/// never blocked. All inbound traffic — data, acknowledgements, and
/// `{"error": ...}` reports — flows through the registered callback.
pub struct WsConnection {
    inner: Arc<ConnectionInner>,
    state_rx: watch::Receiver<ConnectionState>,
    supervisor: JoinHandle<()>,
}

impl WsConnection {
    /// Spawns a supervisor for `endpoint` (a full `ws://` or `wss://` URL).
    ///
    /// Passing a [`TokenProvider`] makes this an authenticated connection: a
    /// fresh token is fetched at the start of every (re)connect attempt and
    /// attached to private resubscriptions.
    pub fn spawn(
        endpoint: impl Into<String>,
        dialect: Arc<dyn Dialect>,
        callback: MessageCallback,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let inner = Arc::new(ConnectionInner {
            endpoint: endpoint.into(),
            is_auth: token_provider.is_some(),
            dialect,
            token_provider,
            callback,
            sink: Arc::new(Mutex::new(None)),
            ledger: Arc::new(Mutex::new(SubscriptionLedger::new())),
            token: Arc::new(Mutex::new(None)),
            attempts: AtomicU32::new(0),
            state_tx,
        });

        let supervisor = tokio::spawn(run_forever(Arc::clone(&inner)));

        Self {
            inner,
            state_rx,
            supervisor,
        }
    }

    /// Whether this connection can access private endpoints.
    pub fn is_auth(&self) -> bool {
        self.inner.is_auth
    }

    /// Returns a copy of the currently tracked subscriptions.
    pub async fn subscriptions(&self) -> Vec<Value> {
        self.inner.ledger.lock().await.snapshot()
    }

    /// Closes the current socket, which forces the receive task to fail and
    /// thus triggers the normal reconnect path.
    pub async fn close(&self) -> Result<()> {
        let mut guard = self.inner.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => {
                sink.send(Message::Close(None)).await?;
                Ok(())
            }
            None => Err(KrakenError::NotConnected(
                "no open websocket to close".into(),
            )),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// A receiver for observing lifecycle transitions, in particular the
    /// terminal [`ConnectionState::Terminated`].
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Sends one already-shaped payload over the current socket.
    pub(crate) async fn send(&self, payload: &Value) -> Result<()> {
        send_json(&self.inner.sink, payload).await
    }

    /// Token fetched for the current attempt, if any.
    pub(crate) async fn current_token(&self) -> Option<String> {
        self.inner.token.lock().await.clone()
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

/// Supervision entry point: runs the reconnect loop until the fatal
/// condition, then reports it exactly once and parks the state machine in
/// `Terminated`.
async fn run_forever(inner: Arc<ConnectionInner>) {
    let terminal = supervise(&inner).await;
    error!(error = %terminal, endpoint = %inner.endpoint, "websocket supervisor stopped");
    (inner.callback)(json!({"error": terminal.to_string()})).await;
    inner.state_tx.send_replace(ConnectionState::Terminated);
}

/// The reconnect loop. Every non-fatal failure is reported to the callback
/// and retried after backoff; the only way out is the terminal error.
async fn supervise(inner: &Arc<ConnectionInner>) -> KrakenError {
    loop {
        let attempt = inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt >= supervision::MAX_RECONNECT_ATTEMPTS {
            return KrakenError::MaxReconnectsExceeded;
        }

        let next_state = if *inner.state_tx.borrow() == ConnectionState::Idle {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };
        inner.state_tx.send_replace(next_state);

        let delay = reconnect_delay(attempt);
        debug!(
            attempt,
            delay_secs = delay.as_secs_f64(),
            "waiting before (re)connect"
        );
        sleep(delay).await;

        let (ready_tx, ready_rx) = watch::channel(false);
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        let dialect = Arc::clone(&inner.dialect);
        let ctx = RecoverContext {
            ready: ready_rx,
            ledger: Arc::clone(&inner.ledger),
            sink: Arc::clone(&inner.sink),
            token: Arc::clone(&inner.token),
            is_auth: inner.is_auth,
        };
        tasks.spawn(async move { dialect.recover_subscriptions(ctx).await });

        let receive_inner = Arc::clone(inner);
        tasks.spawn(async move { receive_loop(receive_inner, ready_tx).await });

        // Race the two tasks. A recovery task that finishes cleanly leaves
        // the receive task running; the first *failure* ends the attempt.
        let failure = loop {
            match tasks.join_next().await {
                Some(Ok(Ok(()))) => continue,
                Some(Ok(Err(task_error))) => break task_error,
                Some(Err(join_error)) => break KrakenError::Join(join_error),
                None => {
                    break KrakenError::ConnectionClosed(
                        "all connection tasks finished".into(),
                    );
                }
            }
        };
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        *inner.sink.lock().await = None;

        warn!(error = %failure, endpoint = %inner.endpoint, "connection failed");
        (inner.callback)(json!({"error": failure.to_string()})).await;
    }
}

/// Connects and pumps inbound frames until something goes wrong.
///
/// On the first successful connect of an attempt this task sends the initial
/// heartbeat, fires the readiness signal, and resets the attempt counter.
async fn receive_loop(inner: Arc<ConnectionInner>, ready: watch::Sender<bool>) -> Result<()> {
    // Fresh token for every attempt; a reconnect must never reuse a
    // possibly expired one.
    let token = match &inner.token_provider {
        Some(provider) => Some(provider.ws_token().await?),
        None => None,
    };
    *inner.token.lock().await = token;

    let url = Url::parse(&inner.endpoint)?;
    let mut request = url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert(USER_AGENT, HeaderValue::from_static(WS_USER_AGENT));

    let (stream, _response) = connect_async(request).await?;
    info!(endpoint = %inner.endpoint, auth = inner.is_auth, "websocket connected");

    let (sink, mut read) = stream.split();
    *inner.sink.lock().await = Some(sink);
    inner.state_tx.send_replace(ConnectionState::Connected);

    let mut last_heartbeat = Instant::now();
    if !*ready.borrow() {
        inner.dialect.send_heartbeat(&inner.sink).await?;
        last_heartbeat = Instant::now();
        let _ = ready.send(true);
    }
    inner.attempts.store(0, Ordering::SeqCst);

    let heartbeat_interval = Duration::from_secs(supervision::HEARTBEAT_INTERVAL_SECS);
    let recv_timeout = Duration::from_secs(supervision::RECV_TIMEOUT_SECS);

    loop {
        if last_heartbeat.elapsed() > heartbeat_interval {
            inner.dialect.send_heartbeat(&inner.sink).await?;
            last_heartbeat = Instant::now();
        }

        match timeout(recv_timeout, read.next()).await {
            // No inbound frame within the bounded wait — not an error, just
            // a prompt to keep the connection warm.
            Err(_elapsed) => {
                inner.dialect.send_heartbeat(&inner.sink).await?;
                last_heartbeat = Instant::now();
            }
            Ok(Some(Ok(Message::Text(frame)))) => {
                let message: Value = match serde_json::from_str(&frame) {
                    Ok(message) => message,
                    Err(_) => {
                        warn!(%frame, "dropping frame that is not valid JSON");
                        continue;
                    }
                };
                debug!(%message, "inbound");
                {
                    let mut ledger = inner.ledger.lock().await;
                    inner.dialect.manage_subscriptions(&mut ledger, &message);
                }
                (inner.callback)(message).await;
            }
            Ok(Some(Ok(Message::Close(frame)))) => {
                let reason = frame
                    .map(|frame| frame.reason.to_string())
                    .unwrap_or_else(|| "close frame without reason".into());
                return Err(KrakenError::ConnectionClosed(reason));
            }
            // Transport-level ping/pong and binary frames are not part of
            // this protocol.
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(error))) => return Err(error.into()),
            Ok(None) => return Err(KrakenError::ConnectionClosed("stream ended".into())),
        }
    }
}

/// Backoff before attempt `n`: `uniform(0,1) * min(180, 2^n - 1) + 1`
/// seconds. Exponential with a three-minute cap, jittered so a fleet of
/// clients does not reconnect in lockstep, never below one second.
fn reconnect_delay(attempt: u32) -> Duration {
    let ceiling = (supervision::BACKOFF_CAP_SECS as f64)
        .min(2f64.powi(attempt.min(31) as i32) - 1.0);
    Duration::from_secs_f64(random::<f64>() * ceiling + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::message_callback;
    use crate::ws::v2::DialectV2;

    #[test]
    fn backoff_stays_within_the_documented_envelope() {
        for attempt in 1..=supervision::MAX_RECONNECT_ATTEMPTS {
            let bound = 1.0
                + (supervision::BACKOFF_CAP_SECS as f64).min(2f64.powi(attempt as i32) - 1.0);
            for _ in 0..200 {
                let delay = reconnect_delay(attempt).as_secs_f64();
                assert!(delay >= 1.0, "attempt {attempt}: delay {delay} below floor");
                assert!(delay <= bound, "attempt {attempt}: delay {delay} above {bound}");
            }
        }
    }

    #[test]
    fn backoff_is_capped_for_large_attempt_counts() {
        let bound = 1.0 + supervision::BACKOFF_CAP_SECS as f64;
        for _ in 0..200 {
            assert!(reconnect_delay(u32::MAX).as_secs_f64() <= bound);
        }
    }

    #[tokio::test]
    async fn starts_idle_and_close_requires_a_socket() {
        let connection = WsConnection::spawn(
            "ws://127.0.0.1:9",
            Arc::new(DialectV2::default()),
            message_callback(|_message| async {}),
            None,
        );

        // The supervisor sits in backoff for at least a second before the
        // first connect, so no socket can exist yet.
        assert_eq!(connection.state(), ConnectionState::Idle);
        assert!(matches!(
            connection.close().await,
            Err(KrakenError::NotConnected(_)),
        ));
        assert!(connection.subscriptions().await.is_empty());
    }
}
