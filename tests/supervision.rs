//! End-to-end supervision tests against a scripted local websocket server.
//!
//! Each test binds a `tokio-tungstenite` server on `127.0.0.1:0`, drives the
//! client against it, and inspects the frames the server receives:
//! heartbeat-before-anything ordering, acknowledgement-driven ledger
//! bookkeeping, resubscription after a dropped socket, and the fatal
//! reconnect ceiling.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use kraken_ws::ws::{DialectV2, message_callback};
use kraken_ws::{
    ConnectionState, KrakenWsClient, ProtocolVersion, StaticTokenProvider, WsConnection,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// What the scripted server does with one inbound message.
enum ServerAction {
    Ignore,
    /// Send the reply and keep the connection up.
    Reply(Value),
    /// Send the reply, then drop the socket abruptly.
    ReplyThenDrop(Value),
}

/// Accepts connections sequentially and forwards every parsed text frame,
/// tagged with a 1-based connection index, to the returned channel.
fn spawn_server(
    listener: TcpListener,
    on_message: impl Fn(usize, &Value) -> ServerAction + Send + Sync + 'static,
) -> mpsc::UnboundedReceiver<(usize, Value)> {
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut connection_index = 0usize;
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            connection_index += 1;
            let Ok(mut ws) = accept_async(stream).await else {
                continue;
            };
            while let Some(Ok(frame)) = ws.next().await {
                let Message::Text(text) = frame else {
                    continue;
                };
                let Ok(message) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let action = on_message(connection_index, &message);
                let _ = frame_tx.send((connection_index, message));
                match action {
                    ServerAction::Ignore => {}
                    ServerAction::Reply(reply) => {
                        let _ = ws.send(Message::Text(reply.to_string().into())).await;
                    }
                    ServerAction::ReplyThenDrop(reply) => {
                        let _ = ws.send(Message::Text(reply.to_string().into())).await;
                        break;
                    }
                }
            }
        }
    });
    frame_rx
}

async fn next_frame(frames: &mut mpsc::UnboundedReceiver<(usize, Value)>) -> (usize, Value) {
    timeout(Duration::from_secs(30), frames.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("server task ended")
}

/// Polls the merged subscription view until it tracks `count` descriptors.
async fn wait_for_subscriptions(client: &KrakenWsClient, count: usize) -> Vec<Value> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let subscriptions = client.subscriptions().await;
        if subscriptions.len() >= count {
            return subscriptions;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "ledger was never populated",
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn v2_resubscribes_tracked_feeds_after_a_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // First connection: confirm both subscribes, then kill the socket after
    // the second acknowledgement.
    let mut frames = spawn_server(listener, |connection, message| {
        if connection != 1 || message["method"] != "subscribe" {
            return ServerAction::Ignore;
        }
        let symbol = message["params"]["symbol"].clone();
        let ack = json!({
            "method": "subscribe",
            "success": true,
            "result": {"channel": "ticker", "symbol": symbol},
        });
        if message["params"]["symbol"] == "ETH/USD" {
            ServerAction::ReplyThenDrop(ack)
        } else {
            ServerAction::Reply(ack)
        }
    });

    let client = KrakenWsClient::with_endpoints(
        ProtocolVersion::V2,
        message_callback(|_message| async {}),
        Some(format!("ws://{addr}")),
        None,
    );

    // The initial heartbeat proves the connection is up before anything else
    // is sent.
    let (connection, first) = next_frame(&mut frames).await;
    assert_eq!(connection, 1);
    assert_eq!(first, json!({"method": "ping"}));

    client
        .subscribe(json!({"channel": "ticker", "symbol": "BTC/USD"}))
        .await
        .unwrap();
    client
        .subscribe(json!({"channel": "ticker", "symbol": "ETH/USD"}))
        .await
        .unwrap();
    let (_, request) = next_frame(&mut frames).await;
    assert_eq!(request["method"], "subscribe");
    let (_, request) = next_frame(&mut frames).await;
    assert_eq!(request["method"], "subscribe");

    // The acknowledgements populated the ledger (with scalar symbols coerced
    // to lists) before the server dropped the socket.
    assert_eq!(
        wait_for_subscriptions(&client, 2).await,
        vec![
            json!({"channel": "ticker", "symbol": ["BTC/USD"]}),
            json!({"channel": "ticker", "symbol": ["ETH/USD"]}),
        ],
    );

    // Reconnect: heartbeat first, then exactly the tracked subscriptions in
    // insertion order.
    let (connection, first_after) = next_frame(&mut frames).await;
    assert_eq!(connection, 2);
    assert_eq!(first_after, json!({"method": "ping"}));

    let (connection, resubscribe) = next_frame(&mut frames).await;
    assert_eq!(connection, 2);
    assert_eq!(
        resubscribe,
        json!({
            "method": "subscribe",
            "params": {"channel": "ticker", "symbol": ["BTC/USD"]},
        }),
    );

    let (connection, resubscribe) = next_frame(&mut frames).await;
    assert_eq!(connection, 2);
    assert_eq!(
        resubscribe,
        json!({
            "method": "subscribe",
            "params": {"channel": "ticker", "symbol": ["ETH/USD"]},
        }),
    );
}

#[tokio::test]
async fn v1_private_recovery_attaches_a_fresh_token() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut frames = spawn_server(listener, |connection, message| {
        if connection == 1 && message["event"] == "subscribe" {
            ServerAction::ReplyThenDrop(json!({
                "event": "subscriptionStatus",
                "status": "subscribed",
                "subscription": {"name": "ownTrades"},
            }))
        } else {
            ServerAction::Ignore
        }
    });

    let client = KrakenWsClient::with_endpoints(
        ProtocolVersion::V1,
        message_callback(|_message| async {}),
        None,
        Some((
            format!("ws://{addr}"),
            Arc::new(StaticTokenProvider::new("ws-token")),
        )),
    );

    let (connection, first) = next_frame(&mut frames).await;
    assert_eq!(connection, 1);
    assert_eq!(first["event"], "ping");

    client
        .subscribe(json!({"subscription": {"name": "ownTrades"}}))
        .await
        .unwrap();
    let (_, request) = next_frame(&mut frames).await;
    assert_eq!(request["subscription"]["token"], "ws-token");

    // The ledger tracks the descriptor without the token.
    assert_eq!(
        wait_for_subscriptions(&client, 1).await,
        vec![json!({"event": "subscribe", "subscription": {"name": "ownTrades"}})],
    );

    // Reconnect: heartbeat, then the resubscribe carrying the fresh token.
    let (connection, first_after) = next_frame(&mut frames).await;
    assert_eq!(connection, 2);
    assert_eq!(first_after["event"], "ping");

    let (connection, resubscribe) = next_frame(&mut frames).await;
    assert_eq!(connection, 2);
    assert_eq!(
        resubscribe,
        json!({
            "event": "subscribe",
            "subscription": {"name": "ownTrades", "token": "ws-token"},
        }),
    );
}

#[tokio::test(start_paused = true)]
async fn reports_one_fatal_error_after_the_reconnect_ceiling() {
    // Grab a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (error_tx, mut error_rx) = mpsc::unbounded_channel();
    let callback = message_callback(move |message: Value| {
        let error_tx = error_tx.clone();
        async move {
            if message.get("error").is_some() {
                let _ = error_tx.send(message);
            }
        }
    });

    let connection = WsConnection::spawn(
        format!("ws://{addr}"),
        Arc::new(DialectV2::default()),
        callback,
        None,
    );

    // Six failed attempts produce six transient reports; the seventh hits
    // the ceiling and is fatal. Paused time fast-forwards through the
    // backoff sleeps, so this completes in milliseconds.
    let mut transient = 0usize;
    loop {
        let message = error_rx.recv().await.expect("callback channel closed");
        let text = message["error"].as_str().unwrap().to_owned();
        if text.contains("maximum number of reconnect attempts") {
            break;
        }
        transient += 1;
        assert!(transient <= 6, "more transient failures than attempts");
    }
    assert_eq!(transient, 6);

    // The terminal state is observable and nothing runs afterwards.
    let mut states = connection.state_changes();
    states
        .wait_for(|state| *state == ConnectionState::Terminated)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(
        error_rx.try_recv().is_err(),
        "callback invoked after termination",
    );
}
