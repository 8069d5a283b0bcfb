//! In-process tab registry implementing [`TabHost`].

use crate::relay::host::{Tab, TabHost, TabId, UrlPattern};
use crate::relay::types::RuntimeMessage;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Inbox of the content script running in a tab.
pub type ContentScriptInbox = mpsc::UnboundedReceiver<RuntimeMessage>;

struct TabEntry {
    url: String,
    content_script: Option<mpsc::UnboundedSender<RuntimeMessage>>,
}

struct RegistryState {
    next_id: TabId,
    tabs: BTreeMap<TabId, TabEntry>,
    detached: Vec<String>,
}

/// Open tabs of a simulated browser window.
pub struct TabRegistry {
    state: Mutex<RegistryState>,
    removed: broadcast::Sender<TabId>,
}

impl Default for TabRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TabRegistry {
    pub fn new() -> Self {
        let (removed, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(RegistryState {
                next_id: 1,
                tabs: BTreeMap::new(),
                detached: Vec::new(),
            }),
            removed,
        }
    }

    fn insert(&self, url: &str, content_script: Option<mpsc::UnboundedSender<RuntimeMessage>>) -> TabId {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = state.next_id;
        state.next_id += 1;
        state.tabs.insert(
            id,
            TabEntry {
                url: url.to_string(),
                content_script,
            },
        );
        debug!("Opened tab {} at {}", id, url);
        id
    }

    /// Open a tab with no content script injected.
    pub fn open(&self, url: &str) -> TabId {
        self.insert(url, None)
    }

    /// Open a tab whose content script receives runtime messages on the returned inbox.
    pub fn open_with_content_script(&self, url: &str) -> (TabId, ContentScriptInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.insert(url, Some(tx)), rx)
    }

    /// Register a tab the host reports without an id (devtools, prerender).
    pub fn open_detached(&self, url: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.detached.push(url.to_string());
    }

    /// Close a tab and notify removal subscribers.
    pub fn remove(&self, tab_id: TabId) -> bool {
        let removed = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.tabs.remove(&tab_id).is_some()
        };
        if removed {
            let _ = self.removed.send(tab_id);
        }
        removed
    }

    /// Stream of closed tab ids.
    pub fn subscribe_removed(&self) -> broadcast::Receiver<TabId> {
        self.removed.subscribe()
    }

    pub fn url_of(&self, tab_id: TabId) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tabs.get(&tab_id).map(|entry| entry.url.clone())
    }

    /// URLs of all tabs with an id, in opening order.
    pub fn urls(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.tabs.values().map(|entry| entry.url.clone()).collect()
    }
}

#[async_trait]
impl TabHost for TabRegistry {
    async fn query(&self, patterns: &[UrlPattern]) -> Result<Vec<Tab>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let matches = |url: &str| patterns.iter().any(|pattern| pattern.matches(url));

        let mut tabs: Vec<Tab> = state
            .tabs
            .iter()
            .filter(|(_, entry)| matches(&entry.url))
            .map(|(id, entry)| Tab {
                id: Some(*id),
                url: entry.url.clone(),
            })
            .collect();
        tabs.extend(
            state
                .detached
                .iter()
                .filter(|url| matches(url))
                .map(|url| Tab { id: None, url: url.clone() }),
        );
        Ok(tabs)
    }

    async fn send_message(&self, tab_id: TabId, message: RuntimeMessage) -> Result<()> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let entry = state
            .tabs
            .get(&tab_id)
            .ok_or_else(|| anyhow!("No tab with id: {}.", tab_id))?;

        entry
            .content_script
            .as_ref()
            .ok_or_else(|| anyhow!("Could not establish connection. Receiving end does not exist."))?
            .send(message)
            .map_err(|_| anyhow!("Could not establish connection. Receiving end does not exist."))
    }

    async fn create(&self, url: &str) -> Result<TabId> {
        Ok(self.open(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_filters_by_pattern() {
        let registry = TabRegistry::new();
        registry.open("https://launchblitz.ai/create");
        registry.open("https://axiom.trade/meme/x");
        registry.open_detached("https://launchblitz.ai/devtools");

        let patterns = UrlPattern::parse_all(&["https://launchblitz.ai/*"]);
        let tabs = registry.query(&patterns).await.unwrap();
        assert_eq!(tabs.len(), 2);
        assert_eq!(tabs[0].id, Some(1));
        assert_eq!(tabs[1].id, None);
    }

    #[tokio::test]
    async fn test_send_requires_content_script() {
        let registry = TabRegistry::new();
        let bare = registry.open("https://launchblitz.ai/");
        let (scripted, mut inbox) = registry.open_with_content_script("https://launchblitz.ai/");

        assert!(registry.send_message(bare, RuntimeMessage::CheckStatus).await.is_err());
        assert!(registry.send_message(99, RuntimeMessage::CheckStatus).await.is_err());

        registry.send_message(scripted, RuntimeMessage::CheckStatus).await.unwrap();
        assert_eq!(inbox.recv().await, Some(RuntimeMessage::CheckStatus));
    }

    #[tokio::test]
    async fn test_remove_notifies_subscribers() {
        let registry = TabRegistry::new();
        let mut removed = registry.subscribe_removed();
        let id = registry.create("https://axiom.trade/").await.unwrap();

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert_eq!(removed.recv().await.unwrap(), id);
        assert!(registry.urls().is_empty());
    }
}
