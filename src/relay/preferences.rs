//! User preferences shared by the popup and the trading-page content script.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::warn;

/// Storage key of the vamp button toggle.
pub const INJECT_VAMP_BUTTON_KEY: &str = "injectVampButton";

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Whether vamp buttons are injected into token cards
    #[serde(default = "enabled")]
    pub inject_vamp_button: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self { inject_vamp_button: true }
    }
}

/// Key-value preference storage with change notifications.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn load(&self) -> Result<Preferences>;

    async fn save(&self, preferences: Preferences) -> Result<()>;

    /// Observe every saved change.
    fn subscribe(&self) -> watch::Receiver<Preferences>;
}

/// Load preferences, falling back to defaults when the store fails.
pub async fn load_or_default(store: &dyn PreferenceStore) -> Preferences {
    match store.load().await {
        Ok(preferences) => preferences,
        Err(e) => {
            warn!("Failed to read preferences: {}", e);
            Preferences::default()
        }
    }
}

/// In-memory store holding raw JSON values, like the browser storage area.
pub struct MemoryPreferenceStore {
    items: Mutex<Map<String, Value>>,
    changes: watch::Sender<Preferences>,
}

impl Default for MemoryPreferenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(Preferences::default());
        Self {
            items: Mutex::new(Map::new()),
            changes,
        }
    }

    /// Write a raw value, bypassing typing. Used to seed legacy data.
    pub fn set_raw(&self, key: &str, value: Value) {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.insert(key.to_string(), value);
    }

    fn read(&self) -> Preferences {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let inject_vamp_button = items
            .get(INJECT_VAMP_BUTTON_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(Preferences::default().inject_vamp_button);
        Preferences { inject_vamp_button }
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn load(&self) -> Result<Preferences> {
        Ok(self.read())
    }

    async fn save(&self, preferences: Preferences) -> Result<()> {
        self.set_raw(INJECT_VAMP_BUTTON_KEY, Value::Bool(preferences.inject_vamp_button));
        self.changes.send_replace(preferences);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Preferences> {
        self.changes.subscribe()
    }
}
