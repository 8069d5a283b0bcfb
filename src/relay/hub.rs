//! RelayHub - the background broker between page contexts.
//!
//! The hub owns every open listener connection and the image cache. It
//! forwards coin payloads to destination tabs, broadcasts mint signals to
//! listener pages and answers status probes. Every request is answered with
//! a structured response; nothing fails across the context boundary.

use crate::relay::host::{SenderContext, TabHost, TabId};
use crate::relay::image::{ImageInliner, ImageSource};
use crate::relay::port::{Port, PortSender};
use crate::relay::runtime::{BackgroundEvent, BackgroundInbox};
use crate::relay::types::{
    ForwardResponse, PortMessage, RelayConfig, RelayReason, RelayResponse, RuntimeMessage, SiteStatus,
    StatusReport,
};
use crate::types::{CoinPayload, MintSignal};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use nonempty::NonEmpty;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, instrument, warn};

/// Identity of a registered listener connection.
pub type ConnectionId = u64;

/// An open listener channel as seen by the hub.
#[derive(Debug, Clone)]
pub struct ListenerConnection {
    pub id: ConnectionId,
    /// Tab of the listener page, if it has one
    pub sender_tab: Option<TabId>,
    pub connected_at: DateTime<Utc>,
    port: PortSender,
}

impl ListenerConnection {
    pub fn is_open(&self) -> bool {
        self.port.is_connected()
    }
}

struct HubState {
    next_id: ConnectionId,
    connections: HashMap<ConnectionId, ListenerConnection>,
    /// Most recently registered listener tab. Diagnostic only.
    tracked_tab: Option<TabId>,
}

/// Background relay service.
pub struct RelayHub {
    config: RelayConfig,
    tabs: Arc<dyn TabHost>,
    inliner: ImageInliner,
    state: Mutex<HubState>,
}

impl RelayHub {
    pub fn new(config: RelayConfig, tabs: Arc<dyn TabHost>, images: Box<dyn ImageSource>) -> Self {
        let inliner = ImageInliner::new(images, config.image_cache_capacity);
        Self {
            config,
            tabs,
            inliner,
            state: Mutex::new(HubState {
                next_id: 1,
                connections: HashMap::new(),
                tracked_tab: None,
            }),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn inliner(&self) -> &ImageInliner {
        &self.inliner
    }

    fn lock_state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Accept a listener channel.
    ///
    /// Ports with any other name are rejected and dropped, which disconnects
    /// the opener. Accepted ports answer keepalive pings until either side
    /// disconnects, at which point the connection is forgotten.
    pub fn register_listener(self: &Arc<Self>, port: Port) -> Result<ConnectionId> {
        if port.name() != self.config.listener_channel {
            return Err(anyhow!("unexpected channel name: {}", port.name()));
        }

        let sender_tab = port.sender_tab();
        let (sender, inbound) = port.split();

        let id = {
            let mut state = self.lock_state();
            let id = state.next_id;
            state.next_id += 1;
            state.connections.insert(
                id,
                ListenerConnection {
                    id,
                    sender_tab,
                    connected_at: Utc::now(),
                    port: sender.clone(),
                },
            );
            if let Some(tab) = sender_tab {
                state.tracked_tab = Some(tab);
            }
            id
        };

        info!("Mint listener {} connected (tab: {:?})", id, sender_tab);
        tokio::spawn(self.clone().serve_listener(id, sender, inbound));
        Ok(id)
    }

    async fn serve_listener(
        self: Arc<Self>,
        id: ConnectionId,
        sender: PortSender,
        mut inbound: mpsc::UnboundedReceiver<PortMessage>,
    ) {
        while let Some(message) = inbound.recv().await {
            match message {
                PortMessage::Keepalive => {
                    if let Err(e) = sender.post_message(PortMessage::KeepaliveAck) {
                        warn!("Failed to acknowledge keepalive ping: {}", e);
                    }
                }
                other => debug!("Ignoring listener message {:?}", other),
            }
        }

        self.remove_listener(id);
    }

    /// Forget a listener connection.
    pub fn remove_listener(&self, id: ConnectionId) {
        let mut state = self.lock_state();
        if state.connections.remove(&id).is_some() {
            info!("Mint listener {} disconnected", id);
        }
        if state.connections.is_empty() {
            state.tracked_tab = None;
        }
    }

    /// Clear the tracked listener tab when that tab closes.
    pub fn on_tab_removed(&self, tab_id: TabId) {
        let mut state = self.lock_state();
        if state.tracked_tab == Some(tab_id) {
            state.tracked_tab = None;
        }
    }

    pub fn tracked_listener_tab(&self) -> Option<TabId> {
        self.lock_state().tracked_tab
    }

    pub fn listener_count(&self) -> usize {
        self.lock_state().connections.len()
    }

    pub fn listeners(&self) -> Vec<ListenerConnection> {
        self.lock_state().connections.values().cloned().collect()
    }

    /// Send a mint signal to every open listener channel.
    #[instrument(skip(self), fields(lp = %signal.lp))]
    pub fn broadcast_mint_signal(&self, signal: &MintSignal) -> ForwardResponse {
        if !signal.is_valid() {
            return ForwardResponse::rejected(RelayReason::MissingLp);
        }

        let ports: Vec<(ConnectionId, PortSender)> = self
            .lock_state()
            .connections
            .values()
            .map(|connection| (connection.id, connection.port.clone()))
            .collect();

        let mut delivered = false;
        for (id, port) in ports {
            match port.post_message(PortMessage::Mint(signal.clone())) {
                Ok(()) => delivered = true,
                Err(e) => warn!("Failed to notify listener port {}: {}", id, e),
            }
        }

        if delivered {
            ForwardResponse::broadcast()
        } else {
            info!("Mint listener not open; dropping mint event.");
            ForwardResponse::rejected(RelayReason::NoListener)
        }
    }

    /// Inline the payload image and send the payload to every destination tab.
    #[instrument(skip(self, payload, sender), fields(symbol = %payload.symbol))]
    pub async fn forward_coin_payload(&self, payload: CoinPayload, sender: &SenderContext) -> ForwardResponse {
        let sender_tab = sender.tab_id.map(|id| id.to_string()).unwrap_or_else(|| "unknown".to_string());
        info!("Received vamp-coin payload from tab {}: {} ({})", sender_tab, payload.name, payload.symbol);

        let mut coin = payload;
        let local_image = match coin.image_source().map(str::to_string) {
            Some(source) => self.inliner.inline(&source).await,
            None => None,
        };
        if let Some(local) = &local_image {
            coin.attach_local_image(local.clone());
        }

        let tabs = match self.tabs.query(&self.config.destination_patterns).await {
            Ok(tabs) => tabs,
            Err(e) => {
                warn!("Failed to query destination tabs: {:#}", e);
                return ForwardResponse::rejected(RelayReason::QueryFailed);
            }
        };

        let Some(tabs) = NonEmpty::from_vec(tabs) else {
            warn!("No destination tab detected to receive vamp payload.");
            return ForwardResponse::rejected(RelayReason::NoTab);
        };

        let ids: Vec<TabId> = tabs.iter().filter_map(|tab| tab.id).collect();
        info!("Forwarding vamp payload to destination tabs {:?}", ids);

        for tab_id in ids {
            let host = self.tabs.clone();
            let message = RuntimeMessage::vamp_coin(coin.clone());
            tokio::spawn(async move {
                match host.send_message(tab_id, message).await {
                    Ok(()) => debug!("Delivered vamp payload to tab {}", tab_id),
                    Err(e) => warn!("Failed to deliver vamp payload to tab {}: {}", tab_id, e),
                }
            });
        }

        ForwardResponse::delivered(tabs.len(), local_image.is_some())
    }

    /// Count open tabs of the destination and source sites.
    pub async fn query_status(&self) -> StatusReport {
        let (launchblitz, axiom) = tokio::join!(
            self.tabs.query(&self.config.destination_patterns),
            self.tabs.query(&self.config.source_patterns),
        );

        let to_status = |result: Result<Vec<_>>| match result {
            Ok(tabs) => SiteStatus::found(tabs.len()),
            Err(e) => SiteStatus::failed(e.to_string()),
        };

        StatusReport {
            launchblitz: to_status(launchblitz),
            axiom: to_status(axiom),
        }
    }

    /// Answer a one-shot runtime message.
    pub async fn handle_message(&self, message: RuntimeMessage, sender: &SenderContext) -> RelayResponse {
        match message {
            RuntimeMessage::Mint(signal) => RelayResponse::Forward(self.broadcast_mint_signal(&signal)),
            RuntimeMessage::CheckStatus => RelayResponse::Status(self.query_status().await),
            RuntimeMessage::VampCoin { payload: Some(payload) } => {
                RelayResponse::Forward(self.forward_coin_payload(payload, sender).await)
            }
            RuntimeMessage::VampCoin { payload: None } => {
                warn!("Rejecting vamp-coin message without payload");
                RelayResponse::Forward(ForwardResponse::rejected(RelayReason::MissingPayload))
            }
        }
    }

    /// Main loop of the background context.
    ///
    /// Each request is handled on its own task so a slow image fetch never
    /// holds up other messages. Returns when every runtime client is gone.
    pub async fn serve(self: Arc<Self>, mut inbox: BackgroundInbox, mut tab_removals: broadcast::Receiver<TabId>) {
        info!("RelayHub is running...");
        let mut removals_open = true;

        loop {
            tokio::select! {
                event = inbox.next() => match event {
                    Some(BackgroundEvent::Message { message, sender, respond }) => {
                        let hub = self.clone();
                        tokio::spawn(async move {
                            let response = hub.handle_message(message, &sender).await;
                            if respond.send(response).is_err() {
                                debug!("Requester went away before the response was sent");
                            }
                        });
                    }
                    Some(BackgroundEvent::Connect(port)) => {
                        if let Err(e) = self.register_listener(port) {
                            debug!("Ignoring port: {}", e);
                        }
                    }
                    None => {
                        info!("RelayHub runtime closed. Shutting down.");
                        break;
                    }
                },
                removed = tab_removals.recv(), if removals_open => match removed {
                    Ok(tab_id) => self.on_tab_removed(tab_id),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {} tab removal notifications", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => removals_open = false,
                },
            }
        }
    }
}
