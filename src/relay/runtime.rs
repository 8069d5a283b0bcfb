//! In-process extension runtime: one-shot messages and port connections
//! from page contexts to the background hub.

use crate::relay::host::{SenderContext, TabId};
use crate::relay::port::{self, Port};
use crate::relay::types::{ForwardResponse, RelayResponse, RuntimeMessage, StatusReport};
use crate::types::{CoinPayload, MintSignal};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// Something delivered to the background context.
#[derive(Debug)]
pub enum BackgroundEvent {
    /// One-shot request; dropping `respond` without sending closes the exchange
    Message {
        message: RuntimeMessage,
        sender: SenderContext,
        respond: oneshot::Sender<RelayResponse>,
    },
    /// A page opened a long-lived port
    Connect(Port),
}

/// Receiving side of the background context.
///
/// There is exactly one inbox per runtime and it is moved into the hub, so a
/// runtime can never be served by two hubs.
#[derive(Debug)]
pub struct BackgroundInbox {
    rx: mpsc::Receiver<BackgroundEvent>,
}

impl BackgroundInbox {
    pub async fn next(&mut self) -> Option<BackgroundEvent> {
        self.rx.recv().await
    }
}

/// Opens ports to the background. Implemented by [`RuntimeClient`].
#[async_trait]
pub trait PortConnector: Send + Sync {
    async fn connect(&self, name: &str, sender_tab: Option<TabId>) -> Result<Port>;
}

/// Handle used by page contexts to reach the background. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RuntimeClient {
    tx: mpsc::Sender<BackgroundEvent>,
}

/// Create a runtime: the client handle for pages and the single background inbox.
pub fn channel(capacity: usize) -> (RuntimeClient, BackgroundInbox) {
    let (tx, rx) = mpsc::channel(capacity);
    (RuntimeClient { tx }, BackgroundInbox { rx })
}

impl RuntimeClient {
    /// Send a one-shot message and wait for the response.
    pub async fn send_message(&self, message: RuntimeMessage, sender: SenderContext) -> Result<RelayResponse> {
        let (respond, response) = oneshot::channel();
        self.tx
            .send(BackgroundEvent::Message { message, sender, respond })
            .await
            .map_err(|_| anyhow!("Could not establish connection. Receiving end does not exist."))?;

        response
            .await
            .map_err(|_| anyhow!("The message port closed before a response was received."))
    }

    /// Relay a coin payload to destination tabs.
    pub async fn forward_coin(&self, payload: CoinPayload, sender: SenderContext) -> Result<ForwardResponse> {
        match self.send_message(RuntimeMessage::vamp_coin(payload), sender).await? {
            RelayResponse::Forward(response) => Ok(response),
            other => Err(anyhow!("unexpected response to vamp-coin: {:?}", other)),
        }
    }

    /// Broadcast a mint signal to listener pages.
    pub async fn send_mint(&self, signal: MintSignal, sender: SenderContext) -> Result<ForwardResponse> {
        match self.send_message(RuntimeMessage::Mint(signal), sender).await? {
            RelayResponse::Forward(response) => Ok(response),
            other => Err(anyhow!("unexpected response to launchblitz-mint: {:?}", other)),
        }
    }

    /// Probe both sites for open tabs.
    pub async fn check_status(&self) -> Result<StatusReport> {
        match self.send_message(RuntimeMessage::CheckStatus, SenderContext::default()).await? {
            RelayResponse::Status(report) => Ok(report),
            other => Err(anyhow!("unexpected response to check-status: {:?}", other)),
        }
    }
}

#[async_trait]
impl PortConnector for RuntimeClient {
    async fn connect(&self, name: &str, sender_tab: Option<TabId>) -> Result<Port> {
        let (local, remote) = port::pair(name, sender_tab);
        self.tx
            .send(BackgroundEvent::Connect(remote))
            .await
            .map_err(|_| anyhow!("Could not establish connection. Receiving end does not exist."))?;
        Ok(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_fails_without_background() {
        let (client, inbox) = channel(4);
        drop(inbox);

        assert!(client.check_status().await.is_err());
        assert!(client.connect("launchblitz-listener", None).await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_responder_closes_exchange() {
        let (client, mut inbox) = channel(4);

        let background = tokio::spawn(async move {
            if let Some(BackgroundEvent::Message { respond, .. }) = inbox.next().await {
                drop(respond);
            }
        });

        let result = client.send_message(RuntimeMessage::CheckStatus, SenderContext::default()).await;
        let error = result.unwrap_err().to_string();
        assert!(error.contains("message port closed"), "{}", error);
        background.await.unwrap();
    }
}
