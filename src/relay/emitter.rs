//! Emitters running in page content scripts.
//!
//! [`SourceEmitter`] sends scraped coins from the trading page to the hub.
//! [`MintSignalRelay`] turns trusted `openMint` window events into mint
//! broadcasts.

use crate::relay::host::SenderContext;
use crate::relay::page::{PageWindow, WindowMessage};
use crate::relay::runtime::RuntimeClient;
use crate::relay::types::{ForwardResponse, BLITZ_VAMP_EVENT, OPEN_MINT_EVENT};
use crate::types::{CoinPayload, MintSignal, TokenDetails};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

/// Sends vamp actions from the trading page to the hub.
pub struct SourceEmitter {
    runtime: RuntimeClient,
    window: Arc<PageWindow>,
    sender: SenderContext,
}

impl SourceEmitter {
    pub fn new(runtime: RuntimeClient, window: Arc<PageWindow>, sender: SenderContext) -> Self {
        Self { runtime, window, sender }
    }

    /// Handle a vamp click: relay the coin and announce the raw details on the page.
    ///
    /// The `blitz:vamp` page event fires whether or not the relay succeeds.
    pub async fn emit(&self, details: &TokenDetails) -> Option<ForwardResponse> {
        let payload = details.to_coin_payload();
        info!("Vamp action for {} ({})", payload.name, payload.symbol);

        self.window.dispatch_event(BLITZ_VAMP_EVENT, details);
        self.forward(payload).await
    }

    /// Relay a coin payload to the hub and log the outcome.
    pub async fn forward(&self, payload: CoinPayload) -> Option<ForwardResponse> {
        match self.runtime.forward_coin(payload, self.sender.clone()).await {
            Ok(response) => {
                if response.forwarded {
                    info!(
                        "Background acknowledged vamp payload ({} tab(s))",
                        response.tab_count.unwrap_or_default()
                    );
                } else {
                    warn!(
                        "Vamp payload not forwarded: {}",
                        response.reason.map(|r| r.as_str()).unwrap_or("unknown")
                    );
                }
                Some(response)
            }
            Err(e) => {
                warn!("Failed to forward vamp coin payload: {}", e);
                None
            }
        }
    }
}

/// Forwards mint signals raised by the page itself to the hub.
pub struct MintSignalRelay {
    runtime: RuntimeClient,
    window: Arc<PageWindow>,
    sender: SenderContext,
}

impl MintSignalRelay {
    pub fn new(runtime: RuntimeClient, window: Arc<PageWindow>, sender: SenderContext) -> Self {
        Self { runtime, window, sender }
    }

    /// Only messages this window posted to itself, typed as a mint, are trusted.
    pub fn is_trusted(&self, message: &WindowMessage) -> bool {
        message.source == self.window.id()
            && message.data.get("type").and_then(|t| t.as_str()) == Some("launchblitz-mint")
    }

    /// Forward a trusted `openMint` event. Anything else is ignored silently.
    pub async fn handle_window_message(&self, message: &WindowMessage) -> Option<ForwardResponse> {
        if message.name != OPEN_MINT_EVENT || !self.is_trusted(message) {
            return None;
        }

        let lp = message.data.get("lp").and_then(|lp| lp.as_str()).unwrap_or_default();
        let signal = MintSignal::new(lp);
        if !signal.is_valid() {
            warn!("Ignoring mint event with missing lp detail.");
            return None;
        }

        match self.runtime.send_mint(signal, self.sender.clone()).await {
            Ok(response) => {
                if !response.forwarded {
                    warn!(
                        "Mint event not forwarded: {}",
                        response.reason.map(|r| r.as_str()).unwrap_or("unknown")
                    );
                }
                Some(response)
            }
            Err(e) => {
                warn!("Failed to forward mint event: {}", e);
                None
            }
        }
    }

    /// Listen for window messages until `shutdown` fires.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let mut messages = self.window.subscribe_messages();
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                message = messages.recv() => match message {
                    Ok(message) => {
                        self.handle_window_message(&message).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {} window messages", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::runtime::{self, BackgroundEvent};
    use crate::relay::types::{RelayReason, RelayResponse, RuntimeMessage};
    use serde_json::json;

    /// Background that answers every request with `response` and records it.
    fn fake_background(response: ForwardResponse) -> (RuntimeClient, tokio::task::JoinHandle<Vec<RuntimeMessage>>) {
        let (client, mut inbox) = runtime::channel(8);
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = inbox.next().await {
                if let BackgroundEvent::Message { message, respond, .. } = event {
                    seen.push(message);
                    let _ = respond.send(RelayResponse::Forward(response.clone()));
                }
            }
            seen
        });
        (client, handle)
    }

    #[tokio::test]
    async fn test_emit_fires_page_event_even_without_tabs() {
        let (client, background) = fake_background(ForwardResponse::rejected(RelayReason::NoTab));
        let window = Arc::new(PageWindow::for_tab(5));
        let mut events = window.subscribe_events();
        let emitter = SourceEmitter::new(client, window.clone(), SenderContext::tab(5));

        let details = TokenDetails {
            symbol: "DOGE2".to_string(),
            full_name: "Doge2".to_string(),
            image_url: "https://x/img.png".to_string(),
            ..Default::default()
        };
        let response = emitter.emit(&details).await.unwrap();
        assert_eq!(response.reason, Some(RelayReason::NoTab));

        let event = events.recv().await.unwrap();
        assert_eq!(event.name, "blitz:vamp");
        assert_eq!(event.detail["fullName"], "Doge2");

        drop(emitter);
        let seen = background.await.unwrap();
        assert_eq!(seen, vec![RuntimeMessage::vamp_coin(details.to_coin_payload())]);
    }

    #[tokio::test]
    async fn test_untrusted_mint_events_are_ignored() {
        let (client, background) = fake_background(ForwardResponse::broadcast());
        let window = Arc::new(PageWindow::new(1));
        let relay = MintSignalRelay::new(client, window.clone(), SenderContext::default());

        let spoofed = WindowMessage {
            name: OPEN_MINT_EVENT.to_string(),
            source: window.id() + 1000,
            data: json!({"type": "launchblitz-mint", "lp": "abc"}),
        };
        assert!(relay.handle_window_message(&spoofed).await.is_none());

        let untyped = WindowMessage {
            name: OPEN_MINT_EVENT.to_string(),
            source: window.id(),
            data: json!({"lp": "abc"}),
        };
        assert!(relay.handle_window_message(&untyped).await.is_none());

        let missing_lp = WindowMessage {
            name: OPEN_MINT_EVENT.to_string(),
            source: window.id(),
            data: json!({"type": "launchblitz-mint"}),
        };
        assert!(relay.handle_window_message(&missing_lp).await.is_none());

        drop(relay);
        assert!(background.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trusted_mint_event_is_forwarded() {
        let (client, background) = fake_background(ForwardResponse::broadcast());
        let window = Arc::new(PageWindow::new(1));
        let relay = MintSignalRelay::new(client, window.clone(), SenderContext::default());

        let trusted = WindowMessage {
            name: OPEN_MINT_EVENT.to_string(),
            source: window.id(),
            data: json!({"type": "launchblitz-mint", "lp": "Pool123"}),
        };
        assert_eq!(relay.handle_window_message(&trusted).await, Some(ForwardResponse::broadcast()));

        drop(relay);
        assert_eq!(
            background.await.unwrap(),
            vec![RuntimeMessage::Mint(MintSignal::new("Pool123"))]
        );
    }
}
