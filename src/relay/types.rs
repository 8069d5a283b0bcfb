//! Wire messages, responses and configuration for the relay.

use crate::relay::host::UrlPattern;
use crate::types::{CoinPayload, MintSignal};
use anyhow::{anyhow, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Name of the long-lived channel opened by the listener page.
pub const LISTENER_CHANNEL: &str = "launchblitz-listener";

/// Page event fired on the destination page for every relayed coin.
pub const VAMP_COIN_EVENT: &str = "vampCoin";

/// Page event fired on the source page for every vamp action.
pub const BLITZ_VAMP_EVENT: &str = "blitz:vamp";

/// Window event carrying a mint signal on the destination page.
pub const OPEN_MINT_EVENT: &str = "openMint";

/// Characters left as-is in an lp path segment, like `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// One-shot messages exchanged through the extension runtime and with tabs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RuntimeMessage {
    /// A scraped coin, either sent to the hub or forwarded to a destination tab
    #[serde(rename = "vamp-coin")]
    VampCoin {
        #[serde(default)]
        payload: Option<CoinPayload>,
    },
    /// Mint signal to broadcast to every listener page
    #[serde(rename = "launchblitz-mint")]
    Mint(MintSignal),
    /// Popup status probe
    #[serde(rename = "check-status")]
    CheckStatus,
}

impl RuntimeMessage {
    pub fn vamp_coin(payload: CoinPayload) -> Self {
        Self::VampCoin { payload: Some(payload) }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::VampCoin { .. } => "vamp-coin",
            Self::Mint(_) => "launchblitz-mint",
            Self::CheckStatus => "check-status",
        }
    }
}

/// Messages carried on the listener channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PortMessage {
    #[serde(rename = "listener-keepalive")]
    Keepalive,
    #[serde(rename = "listener-keepalive-ack")]
    KeepaliveAck,
    #[serde(rename = "launchblitz-mint")]
    Mint(MintSignal),
}

/// Why a relay request was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelayReason {
    /// Mint signal without a launch pool id
    MissingLp,
    /// Vamp request without a coin payload
    MissingPayload,
    /// No listener page is connected
    NoListener,
    /// No destination tab is open
    NoTab,
    /// The host tab query itself failed
    QueryFailed,
}

impl RelayReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingLp => "missing-lp",
            Self::MissingPayload => "missing-payload",
            Self::NoListener => "no-listener",
            Self::NoTab => "no-tab",
            Self::QueryFailed => "query-failed",
        }
    }
}

impl std::fmt::Display for RelayReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response to `vamp-coin` and `launchblitz-mint` requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardResponse {
    pub forwarded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RelayReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_local_image: Option<bool>,
}

impl ForwardResponse {
    /// Mint signal reached at least one listener.
    pub fn broadcast() -> Self {
        Self {
            forwarded: true,
            reason: None,
            tab_count: None,
            has_local_image: None,
        }
    }

    /// Coin payload was sent to `tab_count` destination tabs.
    pub fn delivered(tab_count: usize, has_local_image: bool) -> Self {
        Self {
            forwarded: true,
            reason: None,
            tab_count: Some(tab_count),
            has_local_image: Some(has_local_image),
        }
    }

    pub fn rejected(reason: RelayReason) -> Self {
        Self {
            forwarded: false,
            reason: Some(reason),
            tab_count: None,
            has_local_image: None,
        }
    }
}

/// Per-site tab count probe result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatus {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SiteStatus {
    pub fn found(tab_count: usize) -> Self {
        Self {
            ok: true,
            tab_count: Some(tab_count),
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            tab_count: None,
            reason: Some(reason.into()),
        }
    }
}

/// Response to `check-status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Destination site (launchblitz.ai)
    pub launchblitz: SiteStatus,
    /// Source site (axiom.trade)
    pub axiom: SiteStatus,
}

/// Any response the hub sends back over the one-shot channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelayResponse {
    Status(StatusReport),
    Forward(ForwardResponse),
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Name the listener page must use when connecting
    pub listener_channel: String,
    /// Interval between listener keepalive pings
    pub keepalive_interval: Duration,
    /// Delay before a dropped listener channel reconnects
    pub reconnect_delay: Duration,
    /// Max inlined images kept by the hub
    pub image_cache_capacity: usize,
    /// Tabs that receive relayed coins
    pub destination_patterns: Vec<UrlPattern>,
    /// Tabs of the trading site, reported by the status probe
    pub source_patterns: Vec<UrlPattern>,
    /// Base URL of the tab opened for a mint signal; the lp is appended as a path segment
    pub mint_url_base: String,
    /// Extension page hosting the mint listener
    pub listener_page_url: String,
}

impl RelayConfig {
    /// Build the tab URL opened for a mint signal, URL-encoding the lp.
    pub fn mint_url(&self, lp: &str) -> Result<String> {
        let mut url = Url::parse(&self.mint_url_base)?;
        if url.cannot_be_a_base() {
            return Err(anyhow!("mint url base cannot carry a path: {}", self.mint_url_base));
        }

        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            utf8_percent_encode(lp, URI_COMPONENT)
        );
        url.set_path(&path);
        Ok(url.into())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listener_channel: LISTENER_CHANNEL.to_string(),
            keepalive_interval: Duration::from_secs(25),
            reconnect_delay: Duration::from_millis(1500),
            image_cache_capacity: 50,
            destination_patterns: UrlPattern::parse_all(&[
                "https://launchblitz.ai/*",
                "https://beta.launchblitz.ai/*",
                "https://www.launchblitz.ai/*",
            ]),
            source_patterns: UrlPattern::parse_all(&[
                "https://axiom.trade/*",
                "https://*.axiom.trade/*",
            ]),
            mint_url_base: "https://axiom.trade/meme/".to_string(),
            listener_page_url: "chrome-extension://blitz/listening.html".to_string(),
        }
    }
}
