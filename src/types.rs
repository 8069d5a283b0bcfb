//! Core types and data structures for the Blitz relay.

use serde::{Deserialize, Serialize};

/// Sentinel used when a token name or ticker could not be resolved.
pub const UNKNOWN: &str = "Unknown";

/// Prefix shared by every inline image URI.
pub const DATA_URI_PREFIX: &str = "data:";

fn unknown() -> String {
    UNKNOWN.to_string()
}

/// Returns true when `url` is already an inline `data:` URI.
pub fn is_data_uri(url: &str) -> bool {
    url.starts_with(DATA_URI_PREFIX)
}

/// A scraped token, as relayed from the trading page to destination tabs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinPayload {
    /// Full token name
    #[serde(default = "unknown")]
    pub name: String,
    /// Ticker symbol
    #[serde(default = "unknown")]
    pub symbol: String,
    /// Twitter / X profile URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    /// Project website URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Remote image URL or an inlined `data:` URI
    #[serde(default)]
    pub image: String,
    /// Legacy image field still sent by older scrapers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Remote URL preserved once `image` was replaced by an inlined copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_original_url: Option<String>,
    /// Inlined `data:` URI form of the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_local_url: Option<String>,
}

impl CoinPayload {
    /// Create a payload with only name, symbol and image set.
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            twitter: None,
            website: None,
            image: image.into(),
            image_url: None,
            image_original_url: None,
            image_local_url: None,
        }
    }

    /// The URL the hub should try to inline: `image`, then the legacy `imageUrl`.
    pub fn image_source(&self) -> Option<&str> {
        if !self.image.is_empty() {
            return Some(&self.image);
        }
        self.image_url.as_deref().filter(|url| !url.is_empty())
    }

    /// Attach an inlined image, snapshotting the remote URL the first time.
    pub fn attach_local_image(&mut self, local_url: String) {
        if self.image_original_url.is_none() && !self.image.is_empty() && self.image != local_url {
            self.image_original_url = Some(self.image.clone());
        }
        self.image_local_url = Some(local_url);
    }
}

/// Opaque launch-pool identifier broadcast to every listener page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintSignal {
    /// Launch pool id, must be non-empty to be forwarded
    #[serde(default)]
    pub lp: String,
}

impl MintSignal {
    pub fn new(lp: impl Into<String>) -> Self {
        Self { lp: lp.into() }
    }

    pub fn is_valid(&self) -> bool {
        !self.lp.is_empty()
    }
}

/// A social link discovered next to a token card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialLink {
    /// "twitter", "telegram", "website", ...
    pub platform: String,
    pub url: String,
}

/// Raw details extracted from a token card on the trading page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDetails {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub twitter_url: Option<String>,
    #[serde(default)]
    pub website_url: Option<String>,
    /// Site link found outside the social row, used when there is no website link
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub social_links: Vec<SocialLink>,
}

impl TokenDetails {
    /// Build the payload relayed to destination tabs.
    pub fn to_coin_payload(&self) -> CoinPayload {
        let name = [&self.full_name, &self.symbol]
            .into_iter()
            .find(|value| !value.is_empty())
            .cloned()
            .unwrap_or_else(unknown);
        let symbol = if self.symbol.is_empty() { unknown() } else { self.symbol.clone() };

        CoinPayload {
            name,
            symbol,
            twitter: self.twitter_url.clone().filter(|url| !url.is_empty()),
            website: [&self.website_url, &self.site_url]
                .into_iter()
                .flatten()
                .find(|url| !url.is_empty())
                .cloned(),
            image: self.image_url.clone(),
            image_url: None,
            image_original_url: None,
            image_local_url: None,
        }
    }
}
