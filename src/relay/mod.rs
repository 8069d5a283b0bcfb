//! Relay module - cross-context message relay of the Blitz extension.
//!
//! The hub runs in the background context and brokers between three kinds of
//! page contexts: the trading page (source), launchblitz tabs (destination)
//! and the dedicated listener page. Pages talk to the hub only through the
//! runtime client; the hub talks to tabs only through a [`TabHost`].

pub mod types;
pub mod host;
pub mod port;
pub mod runtime;
pub mod tabs;
pub mod page;
pub mod image;
pub mod hub;
pub mod listener;
pub mod emitter;
pub mod receiver;
pub mod preferences;
pub mod status;

// Re-export main types
pub use types::{
    ForwardResponse, PortMessage, RelayConfig, RelayReason, RelayResponse, RuntimeMessage,
    SiteStatus, StatusReport, LISTENER_CHANNEL,
};

// Re-export key components
pub use emitter::{MintSignalRelay, SourceEmitter};
pub use host::{SenderContext, Tab, TabHost, TabId, UrlPattern};
pub use hub::{ListenerConnection, RelayHub};
pub use image::{HttpImageSource, ImageInliner, ImageSource};
pub use listener::{ChannelState, ListenerStatus, MintListener, StatusState};
pub use page::PageWindow;
pub use receiver::{normalize_coin_payload, DestinationReceiver};
pub use runtime::{BackgroundInbox, PortConnector, RuntimeClient};
pub use tabs::TabRegistry;

use std::sync::Arc;
use std::time::Duration;

/// Hub builder with sensible defaults.
pub struct RelayBuilder {
    config: RelayConfig,
    images: Option<Box<dyn ImageSource>>,
}

impl Default for RelayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayBuilder {
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
            images: None,
        }
    }

    /// Set the listener channel name.
    pub fn with_listener_channel(mut self, name: impl Into<String>) -> Self {
        self.config.listener_channel = name.into();
        self
    }

    /// Set the listener keepalive interval.
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Set the listener reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Set max cached images.
    pub fn with_image_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.image_cache_capacity = capacity;
        self
    }

    /// Set destination tab patterns.
    pub fn with_destination_patterns(mut self, patterns: Vec<UrlPattern>) -> Self {
        self.config.destination_patterns = patterns;
        self
    }

    /// Set source tab patterns.
    pub fn with_source_patterns(mut self, patterns: Vec<UrlPattern>) -> Self {
        self.config.source_patterns = patterns;
        self
    }

    pub fn with_mint_url_base(mut self, base: impl Into<String>) -> Self {
        self.config.mint_url_base = base.into();
        self
    }

    /// Use a custom image source instead of HTTP.
    pub fn with_image_source(mut self, images: Box<dyn ImageSource>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Build the hub on top of `tabs`.
    pub fn build(self, tabs: Arc<dyn TabHost>) -> Arc<RelayHub> {
        let images = self
            .images
            .unwrap_or_else(|| Box::new(HttpImageSource::default()));
        Arc::new(RelayHub::new(self.config, tabs, images))
    }
}
