//! Binary to connect to the Kraken public Websocket API v2, subscribe to the
//! BTC/USD ticker, and print live messages for inspection.
//!
//! # Usage
//!
//! ```sh
//! cargo run --bin ws_watch --features cli
//! ```

use std::time::Duration;

use kraken_ws::ws::message_callback;
use kraken_ws::{KrakenWsClient, ProtocolVersion};
use serde_json::json;
use tokio::time;

#[tokio::main]
async fn main() -> kraken_ws::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("Connecting to the Kraken Websocket API v2…");
    let client = KrakenWsClient::new(
        ProtocolVersion::V2,
        message_callback(|message| async move { println!("{message}") }),
    );

    // The supervisor connects in the background; retry until the socket is up.
    let params = json!({"channel": "ticker", "symbol": ["BTC/USD"]});
    println!("Subscribing to ticker BTC/USD…");
    loop {
        match client.subscribe(params.clone()).await {
            Ok(()) => break,
            Err(error) => {
                eprintln!("not connected yet ({error}), retrying…");
                time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    println!("Listening for 30 seconds…\n");
    time::sleep(Duration::from_secs(30)).await;

    println!("\nTracked subscriptions: {:?}", client.subscriptions().await);
    println!("Done.");

    Ok(())
}
