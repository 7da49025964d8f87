//! Session example - attach to a page, evaluate, listen, detach
//!
//! Run against a browser started with `--remote-debugging-port=9222`,
//! setting `CDP_WS_URL` to its browser WebSocket endpoint.

use cdp_mux::{CDPConnection, ConnectionConfig};
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = ConnectionConfig::from_env();
    println!("Connecting to Chrome at: {}", config.ws_url);
    let connection = CDPConnection::connect_with(config).await?;

    let version = connection.send("Browser.getVersion", None).await?;
    println!("Browser version: {}", version["product"]);

    let mut lifecycle = connection.subscribe_lifecycle();
    tokio::spawn(async move {
        while let Ok(event) = lifecycle.recv().await {
            println!("Lifecycle: {:?}", event);
        }
    });

    // Open a page and attach to it
    let created = connection
        .send("Target.createTarget", Some(json!({ "url": "about:blank" })))
        .await?;
    let target_id = created["targetId"]
        .as_str()
        .ok_or("Invalid targetId")?
        .to_string();
    let session = connection.create_session(target_id.clone()).await?;
    println!("Attached session {} to {}", session.id(), target_id);

    session.enable_domains(&["Runtime", "Network"]).await?;
    session.on(
        "Network.requestWillBeSent",
        Arc::new(|event| {
            println!("Request: {}", event.params.unwrap_or_default()["request"]["url"]);
        }),
    );

    let sum = session.evaluate("1 + 2").await?;
    println!("1 + 2 = {}", sum["result"]["value"]);

    session
        .send("Page.navigate", Some(json!({ "url": "https://example.com" })))
        .await?;
    tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;

    session.detach().await?;
    if let Err(e) = session.evaluate("3 + 1").await {
        println!("After detach: {}", e);
    }

    connection
        .send("Target.closeTarget", Some(json!({ "targetId": target_id })))
        .await?;
    connection.close().await?;
    println!("Disconnected");

    Ok(())
}
