//! Destination-side receiver: re-dispatches relayed coins as `vampCoin`
//! page events.

use crate::relay::page::PageWindow;
use crate::relay::tabs::ContentScriptInbox;
use crate::relay::types::{RuntimeMessage, VAMP_COIN_EVENT};
use crate::types::{is_data_uri, CoinPayload};
use std::sync::Arc;
use tracing::{debug, info};

/// Make `image` reflect the inlined copy when there is one.
///
/// Applying it twice is the same as applying it once.
pub fn normalize_coin_payload(mut coin: CoinPayload) -> CoinPayload {
    match coin.image_local_url.clone().filter(|url| !url.is_empty()) {
        Some(local) => {
            if coin.image_original_url.is_none() && !coin.image.is_empty() && coin.image != local {
                coin.image_original_url = Some(coin.image.clone());
            }
            coin.image = local;
        }
        None if is_data_uri(&coin.image) => {
            coin.image_local_url = Some(coin.image.clone());
        }
        None => {}
    }
    coin
}

/// Content script of a destination tab.
pub struct DestinationReceiver {
    window: Arc<PageWindow>,
}

impl DestinationReceiver {
    pub fn new(window: Arc<PageWindow>) -> Self {
        info!("Destination relay content script initialized.");
        Self { window }
    }

    /// Handle one runtime message; returns the dispatched payload.
    pub fn handle_message(&self, message: RuntimeMessage) -> Option<CoinPayload> {
        let kind = message.kind();
        let RuntimeMessage::VampCoin { payload: Some(payload) } = message else {
            debug!("Ignoring runtime message {}", kind);
            return None;
        };

        let coin = normalize_coin_payload(payload);
        info!("Dispatching {} event for {} ({})", VAMP_COIN_EVENT, coin.name, coin.symbol);
        self.window.dispatch_event(VAMP_COIN_EVENT, &coin);
        Some(coin)
    }

    /// Serve the tab inbox until the tab closes.
    pub async fn run(self, mut inbox: ContentScriptInbox) {
        while let Some(message) = inbox.recv().await {
            self.handle_message(message);
        }
        debug!("Destination tab closed; receiver stopped.");
    }
}
