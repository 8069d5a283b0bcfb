//! Main entry point for the Blitz relay demo
//!
//! Wires a complete in-process extension: background hub, a launchblitz tab
//! with its receiver, the listener page and a trading page. One coin is
//! vamped and one mint signal is raised, then everything shuts down.

use anyhow::Result;
use blitz_relay::relay::preferences::{load_or_default, MemoryPreferenceStore};
use blitz_relay::relay::{
    runtime, status, DestinationReceiver, MintListener, MintSignalRelay, PageWindow, RelayBuilder,
    SenderContext, SourceEmitter, TabRegistry,
};
use blitz_relay::relay::types::{OPEN_MINT_EVENT, VAMP_COIN_EVENT};
use blitz_relay::TokenDetails;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting Blitz relay demo");

    let image_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://launchblitz.ai/favicon.ico".to_string());

    let tabs = Arc::new(TabRegistry::new());
    let (client, inbox) = runtime::channel(100);

    // Background hub
    let builder = RelayBuilder::new();
    let config = builder.config().clone();
    let hub = builder.build(tabs.clone());
    let hub_handle = tokio::spawn(hub.clone().serve(inbox, tabs.subscribe_removed()));

    // Destination tab with its content script
    let (destination_tab, destination_inbox) = tabs.open_with_content_script("https://launchblitz.ai/create");
    let destination_window = Arc::new(PageWindow::for_tab(destination_tab));
    let mut destination_events = destination_window.subscribe_events();
    tokio::spawn(DestinationReceiver::new(destination_window.clone()).run(destination_inbox));

    let (stop_mint_relay, mint_relay_shutdown) = oneshot::channel();
    let mint_relay = MintSignalRelay::new(
        client.clone(),
        destination_window.clone(),
        SenderContext::tab(destination_tab),
    );
    let mint_relay_handle = tokio::spawn(mint_relay.run(mint_relay_shutdown));

    // Listener page
    let listener_tab = status::open_listener_page(tabs.as_ref(), &config).await;
    let listener = MintListener::new(Arc::new(client.clone()), tabs.clone(), config, listener_tab);
    let mut listener_status = listener.subscribe_status();
    let (stop_listener, listener_shutdown) = oneshot::channel();
    let listener_handle = tokio::spawn(listener.run(listener_shutdown));

    tokio::time::sleep(Duration::from_millis(200)).await;
    info!("Listener status: {}", listener_status.borrow_and_update().text);

    // Trading page
    let preferences = MemoryPreferenceStore::new();
    let source_tab = tabs.open("https://axiom.trade/meme/demo");
    let emitter = SourceEmitter::new(
        client.clone(),
        Arc::new(PageWindow::for_tab(source_tab)),
        SenderContext::tab(source_tab),
    );

    if load_or_default(&preferences).await.inject_vamp_button {
        let details = TokenDetails {
            symbol: "DOGE2".to_string(),
            full_name: "Doge2".to_string(),
            image_url,
            twitter_url: Some("https://x.com/doge2".to_string()),
            ..Default::default()
        };
        if let Some(response) = emitter.emit(&details).await {
            info!("Vamp relay response: {}", serde_json::to_string(&response)?);
        }

        match tokio::time::timeout(Duration::from_secs(5), destination_events.recv()).await {
            Ok(Ok(event)) if event.name == VAMP_COIN_EVENT => {
                let image = event.detail["image"].as_str().unwrap_or_default();
                info!(
                    "Destination received {} with image {}",
                    event.detail["symbol"],
                    image.chars().take(48).collect::<String>()
                );
            }
            other => info!("No {} event observed: {:?}", VAMP_COIN_EVENT, other.map(|r| r.map(|e| e.name))),
        }
    }

    // A page-level mint signal on the destination page
    destination_window.post_own_message(OPEN_MINT_EVENT, json!({"type": "launchblitz-mint", "lp": "Pool123"}));
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!("Listener status: {}", listener_status.borrow_and_update().text);
    info!("Open tabs: {:?}", tabs.urls());

    let popup = status::check_status(&client).await;
    info!(
        "Popup status: launchblitz={} axiom={}",
        popup.launchblitz.label, popup.axiom.label
    );
    info!("Tracked listener tab: {:?}", hub.tracked_listener_tab());
    for connection in hub.listeners() {
        info!(
            "Listener {} (tab {:?}) connected at {}, open: {}",
            connection.id,
            connection.sender_tab,
            connection.connected_at,
            connection.is_open()
        );
    }

    // Shut down page contexts, then the background
    let _ = stop_listener.send(());
    let _ = stop_mint_relay.send(());
    listener_handle.await?;
    mint_relay_handle.await?;
    drop(emitter);
    drop(client);
    hub_handle.await?;

    info!("Demo completed.");
    Ok(())
}
