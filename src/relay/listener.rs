//! MintListener - client side of the listener channel.
//!
//! Runs in the dedicated listener page. Keeps one port open to the hub,
//! pings it periodically, reconnects after a fixed delay when the port drops
//! and opens a trading tab for every mint signal it receives.

use crate::relay::host::{TabHost, TabId};
use crate::relay::port::PortSender;
use crate::relay::runtime::PortConnector;
use crate::relay::types::{PortMessage, RelayConfig};
use crate::types::MintSignal;
use serde::Serialize;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

/// Connection state of the listener channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    Disconnected,
}

/// Visual state of the listener page status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Waiting,
    Listening,
    Detected,
    Error,
}

/// Status shown to the user on the listener page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerStatus {
    pub text: String,
    pub state: StatusState,
    pub description: String,
}

impl ListenerStatus {
    pub fn new(text: impl Into<String>, state: StatusState, description: Option<&str>) -> Self {
        let fallback = match state {
            StatusState::Detected => "Opening the Axiom trading page in a new tab.",
            StatusState::Error => "Something went wrong. Please reopen this page from the extension popup.",
            _ => "The Axiom trading page will open here when a new mint arrives.",
        };

        Self {
            text: text.into(),
            state,
            description: description.unwrap_or(fallback).to_string(),
        }
    }
}

/// Listener page controller.
pub struct MintListener {
    connector: Arc<dyn PortConnector>,
    tabs: Arc<dyn TabHost>,
    config: RelayConfig,
    /// Tab hosting the listener page
    page_tab: Option<TabId>,
    state: ChannelState,
    port: Option<PortSender>,
    inbound: Option<mpsc::UnboundedReceiver<PortMessage>>,
    keepalive: Option<Interval>,
    reconnect: Option<Pin<Box<Sleep>>>,
    reconnects_scheduled: u64,
    status: watch::Sender<ListenerStatus>,
}

impl MintListener {
    pub fn new(
        connector: Arc<dyn PortConnector>,
        tabs: Arc<dyn TabHost>,
        config: RelayConfig,
        page_tab: Option<TabId>,
    ) -> Self {
        let (status, _) = watch::channel(ListenerStatus::new(
            "Connecting to extension…",
            StatusState::Waiting,
            Some("Trying to establish a connection to the extension background."),
        ));

        Self {
            connector,
            tabs,
            config,
            page_tab,
            state: ChannelState::Connecting,
            port: None,
            inbound: None,
            keepalive: None,
            reconnect: None,
            reconnects_scheduled: 0,
            status,
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ListenerStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> ListenerStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }

    /// How many reconnect timers were armed so far.
    pub fn reconnects_scheduled(&self) -> u64 {
        self.reconnects_scheduled
    }

    pub fn keepalive_armed(&self) -> bool {
        self.keepalive.is_some()
    }

    fn update_status(&self, text: impl Into<String>, state: StatusState, description: Option<&str>) {
        self.status.send_replace(ListenerStatus::new(text, state, description));
    }

    /// Open a fresh channel to the hub, discarding any previous one.
    pub async fn connect(&mut self) {
        self.reconnect = None;
        self.close_port();
        self.state = ChannelState::Connecting;

        match self.connector.connect(&self.config.listener_channel, self.page_tab).await {
            Ok(port) => {
                let (sender, inbound) = port.split();
                self.port = Some(sender);
                self.inbound = Some(inbound);
                self.state = ChannelState::Connected;
                info!("Listener channel connected");
                self.update_status("Connected. Waiting for mint events…", StatusState::Listening, None);
                self.start_keepalive();
            }
            Err(e) => {
                warn!("Failed to connect to background: {}", e);
                self.state = ChannelState::Disconnected;
                self.update_status("Unable to reach extension background", StatusState::Error, None);
                self.schedule_reconnect();
            }
        }
    }

    fn close_port(&mut self) {
        self.keepalive = None;
        self.port = None;
        self.inbound = None;
    }

    fn start_keepalive(&mut self) {
        let period = self.config.keepalive_interval;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.keepalive = Some(keepalive);
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect.is_some() {
            return;
        }
        self.reconnect = Some(Box::pin(tokio::time::sleep(self.config.reconnect_delay)));
        self.reconnects_scheduled += 1;
        debug!("Reconnect scheduled in {:?}", self.config.reconnect_delay);
    }

    /// React to the channel dropping, from either end.
    pub fn on_disconnect(&mut self) {
        self.close_port();
        self.state = ChannelState::Disconnected;
        self.update_status(
            "Connection lost. Reconnecting…",
            StatusState::Waiting,
            Some("Trying to reconnect to the extension background."),
        );
        self.schedule_reconnect();
    }

    pub fn send_keepalive(&self) {
        let Some(port) = &self.port else {
            return;
        };
        if let Err(e) = port.post_message(PortMessage::Keepalive) {
            warn!("Failed to send keepalive ping: {}", e);
        }
    }

    pub async fn handle_port_message(&mut self, message: PortMessage) {
        match message {
            PortMessage::Mint(signal) => {
                self.handle_mint(&signal).await;
            }
            PortMessage::KeepaliveAck => debug!("Keepalive acknowledged"),
            PortMessage::Keepalive => {}
        }
    }

    /// Open the trading page for a mint signal. Returns the new tab, if any.
    pub async fn handle_mint(&mut self, signal: &MintSignal) -> Option<TabId> {
        if !signal.is_valid() {
            self.update_status("Mint event missing LP detail", StatusState::Error, None);
            return None;
        }

        self.update_status(format!("Mint detected for {}", signal.lp), StatusState::Detected, None);

        let opened = match self.config.mint_url(&signal.lp) {
            Ok(url) => self.tabs.create(&url).await,
            Err(e) => Err(e),
        };
        match opened {
            Ok(tab_id) => {
                info!("Opened trading tab {} for lp {}", tab_id, signal.lp);
                Some(tab_id)
            }
            Err(e) => {
                warn!("Failed to open axiom.trade tab: {}", e);
                self.update_status("Failed to open axiom.trade", StatusState::Error, None);
                None
            }
        }
    }

    /// Main loop: connect, then serve the channel until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        info!("MintListener is running...");
        self.connect().await;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("MintListener shutting down.");
                    self.close_port();
                    break;
                }
                inbound = next_inbound(&mut self.inbound) => match inbound {
                    Some(message) => self.handle_port_message(message).await,
                    None => self.on_disconnect(),
                },
                _ = next_tick(&mut self.keepalive) => self.send_keepalive(),
                _ = reconnect_due(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.connect().await;
                }
            }
        }
    }
}

async fn next_inbound(inbound: &mut Option<mpsc::UnboundedReceiver<PortMessage>>) -> Option<PortMessage> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::port::{self, Port};
    use crate::relay::tabs::TabRegistry;
    use anyhow::{anyhow, Result};
    use crate::relay::host::{Tab, UrlPattern};
    use crate::relay::types::RuntimeMessage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Hands out ports and keeps the hub-side ends for inspection.
    #[derive(Default)]
    struct TestConnector {
        accepted: Mutex<Vec<Port>>,
        refuse: bool,
    }

    impl TestConnector {
        fn take_accepted(&self) -> Option<Port> {
            self.accepted.lock().unwrap().pop()
        }
    }

    #[async_trait]
    impl PortConnector for TestConnector {
        async fn connect(&self, name: &str, sender_tab: Option<TabId>) -> Result<Port> {
            if self.refuse {
                return Err(anyhow!("Extension context invalidated."));
            }
            let (local, remote) = port::pair(name, sender_tab);
            self.accepted.lock().unwrap().push(remote);
            Ok(local)
        }
    }

    /// Fails the first `failures` tab creations.
    struct FlakyTabs {
        inner: TabRegistry,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl TabHost for FlakyTabs {
        async fn query(&self, patterns: &[UrlPattern]) -> Result<Vec<Tab>> {
            self.inner.query(patterns).await
        }

        async fn send_message(&self, tab_id: TabId, message: RuntimeMessage) -> Result<()> {
            self.inner.send_message(tab_id, message).await
        }

        async fn create(&self, url: &str) -> Result<TabId> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(anyhow!("Tabs cannot be edited right now"));
            }
            self.inner.create(url).await
        }
    }

    fn listener(connector: Arc<TestConnector>, tabs: Arc<TabRegistry>) -> MintListener {
        MintListener::new(connector, tabs, RelayConfig::default(), Some(42))
    }

    #[tokio::test]
    async fn test_connect_arms_keepalive() {
        let connector = Arc::new(TestConnector::default());
        let mut listener = listener(connector.clone(), Arc::new(TabRegistry::new()));
        assert_eq!(listener.status().state, StatusState::Waiting);

        listener.connect().await;
        assert_eq!(listener.state(), ChannelState::Connected);
        assert_eq!(listener.status().state, StatusState::Listening);
        assert!(listener.keepalive_armed());

        let accepted = connector.take_accepted().unwrap();
        assert_eq!(accepted.name(), "launchblitz-listener");
        assert_eq!(accepted.sender_tab(), Some(42));
    }

    #[tokio::test]
    async fn test_double_disconnect_schedules_one_reconnect() {
        let connector = Arc::new(TestConnector::default());
        let mut listener = listener(connector, Arc::new(TabRegistry::new()));
        listener.connect().await;

        listener.on_disconnect();
        listener.on_disconnect();

        assert_eq!(listener.state(), ChannelState::Disconnected);
        assert!(listener.reconnect_pending());
        assert_eq!(listener.reconnects_scheduled(), 1);
        assert!(!listener.keepalive_armed());
        assert_eq!(listener.status().text, "Connection lost. Reconnecting…");
    }

    #[tokio::test]
    async fn test_reconnect_discards_previous_port() {
        let connector = Arc::new(TestConnector::default());
        let mut listener = listener(connector.clone(), Arc::new(TabRegistry::new()));
        listener.connect().await;
        let mut first = connector.take_accepted().unwrap();

        listener.connect().await;
        assert_eq!(first.recv().await, None);
        assert!(connector.take_accepted().is_some());
    }

    #[tokio::test]
    async fn test_connect_failure_schedules_reconnect() {
        let connector = Arc::new(TestConnector {
            refuse: true,
            ..Default::default()
        });
        let mut listener = listener(connector, Arc::new(TabRegistry::new()));

        listener.connect().await;
        assert_eq!(listener.state(), ChannelState::Disconnected);
        assert_eq!(listener.status().text, "Unable to reach extension background");
        assert_eq!(listener.status().state, StatusState::Error);
        assert_eq!(listener.reconnects_scheduled(), 1);
    }

    #[tokio::test]
    async fn test_mint_without_lp_opens_nothing() {
        let tabs = Arc::new(TabRegistry::new());
        let mut listener = listener(Arc::new(TestConnector::default()), tabs.clone());

        assert_eq!(listener.handle_mint(&MintSignal::new("")).await, None);
        assert_eq!(listener.status().text, "Mint event missing LP detail");
        assert!(tabs.urls().is_empty());
    }

    #[tokio::test]
    async fn test_mint_opens_encoded_tab() {
        let tabs = Arc::new(TabRegistry::new());
        let mut listener = listener(Arc::new(TestConnector::default()), tabs.clone());

        let tab = listener.handle_mint(&MintSignal::new("Pool 123")).await.unwrap();
        assert_eq!(tabs.url_of(tab).as_deref(), Some("https://axiom.trade/meme/Pool%20123"));
        assert_eq!(listener.status().text, "Mint detected for Pool 123");
        assert_eq!(listener.status().state, StatusState::Detected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_pings_and_reconnects() {
        let connector = Arc::new(TestConnector::default());
        let listener = listener(connector.clone(), Arc::new(TabRegistry::new()));
        let (stop, shutdown) = oneshot::channel();
        let handle = tokio::spawn(listener.run(shutdown));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut accepted = connector.take_accepted().unwrap();

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(accepted.recv().await, Some(PortMessage::Keepalive));

        // hub side goes away, listener reconnects after the delay
        accepted.disconnect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(connector.take_accepted().is_none());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(connector.take_accepted().is_some());

        stop.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tab_open_failure_keeps_channel() {
        let connector = Arc::new(TestConnector::default());
        let tabs = Arc::new(FlakyTabs {
            inner: TabRegistry::new(),
            failures: AtomicUsize::new(1),
        });
        let listener = MintListener::new(connector.clone(), tabs.clone(), RelayConfig::default(), Some(42));
        let status = listener.subscribe_status();
        let (stop, shutdown) = oneshot::channel();
        let handle = tokio::spawn(listener.run(shutdown));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let accepted = connector.take_accepted().unwrap();

        accepted.post_message(PortMessage::Mint(MintSignal::new("First"))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(status.borrow().text, "Failed to open axiom.trade");
        assert_eq!(status.borrow().state, StatusState::Error);
        assert!(tabs.inner.urls().is_empty());

        // same channel, no reconnect
        accepted.post_message(PortMessage::Mint(MintSignal::new("Second"))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(tabs.inner.urls(), vec!["https://axiom.trade/meme/Second".to_string()]);
        assert_eq!(status.borrow().state, StatusState::Detected);
        assert!(connector.take_accepted().is_none());

        stop.send(()).unwrap();
        handle.await.unwrap();
    }
}
