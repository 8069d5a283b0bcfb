//! Long-lived bidirectional ports between two execution contexts.
//!
//! A port is a pair of unbounded mpsc channels. Dropping or disconnecting one
//! end closes the other: its `recv` yields `None` and its `post_message`
//! fails.

use crate::relay::host::TabId;
use crate::relay::types::PortMessage;
use anyhow::{anyhow, Result};
use tokio::sync::mpsc;

/// Sending half of a port. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PortSender {
    name: String,
    tx: mpsc::UnboundedSender<PortMessage>,
}

impl PortSender {
    /// Post a message to the other end.
    pub fn post_message(&self, message: PortMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| anyhow!("attempting to use a disconnected port object ({})", self.name))
    }

    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// One end of a port.
#[derive(Debug)]
pub struct Port {
    name: String,
    sender_tab: Option<TabId>,
    sender: PortSender,
    rx: mpsc::UnboundedReceiver<PortMessage>,
}

impl Port {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tab of the context that opened the port.
    pub fn sender_tab(&self) -> Option<TabId> {
        self.sender_tab
    }

    pub fn sender(&self) -> PortSender {
        self.sender.clone()
    }

    pub fn post_message(&self, message: PortMessage) -> Result<()> {
        self.sender.post_message(message)
    }

    /// Next inbound message, `None` once the other end disconnected.
    pub async fn recv(&mut self) -> Option<PortMessage> {
        self.rx.recv().await
    }

    /// Split into the sending half and the inbound stream.
    pub fn split(self) -> (PortSender, mpsc::UnboundedReceiver<PortMessage>) {
        (self.sender, self.rx)
    }

    /// Close this end. The peer observes a disconnect.
    pub fn disconnect(self) {
        drop(self);
    }
}

/// Create a connected pair of ports.
///
/// The first end belongs to the opener, the second is handed to whoever
/// accepts the connection; both report `sender_tab` as the opener's tab.
pub fn pair(name: &str, sender_tab: Option<TabId>) -> (Port, Port) {
    let (opener_tx, opener_rx) = mpsc::unbounded_channel();
    let (acceptor_tx, acceptor_rx) = mpsc::unbounded_channel();

    let opener = Port {
        name: name.to_string(),
        sender_tab,
        sender: PortSender {
            name: name.to_string(),
            tx: acceptor_tx,
        },
        rx: opener_rx,
    };
    let acceptor = Port {
        name: name.to_string(),
        sender_tab,
        sender: PortSender {
            name: name.to_string(),
            tx: opener_tx,
        },
        rx: acceptor_rx,
    };
    (opener, acceptor)
}
