//! Page-level event bus of a content-script window.
//!
//! Stands in for `window.dispatchEvent(new CustomEvent(...))` and
//! `window.postMessage(...)`: every subscriber gets every event.

use crate::relay::host::TabId;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Identity of a browser window / frame.
pub type WindowId = u64;

/// A custom event dispatched on the page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageEvent {
    pub name: String,
    pub detail: Value,
}

/// A window message event, tagged with the window that posted it.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMessage {
    /// Event name the page listens on
    pub name: String,
    pub source: WindowId,
    pub data: Value,
}

/// One page window with its local event buses.
pub struct PageWindow {
    id: WindowId,
    events: broadcast::Sender<PageEvent>,
    messages: broadcast::Sender<WindowMessage>,
}

impl PageWindow {
    /// Create a window; `id` must be unique among the windows that talk to each other.
    pub fn new(id: WindowId) -> Self {
        let (events, _) = broadcast::channel(256);
        let (messages, _) = broadcast::channel(256);
        Self { id, events, messages }
    }

    /// Top-level window of a tab.
    pub fn for_tab(tab_id: TabId) -> Self {
        Self::new(WindowId::from(tab_id))
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    /// Dispatch a custom event. Silently dropped when nobody listens.
    pub fn dispatch_event<T: Serialize>(&self, name: &str, detail: &T) {
        let detail = match serde_json::to_value(detail) {
            Ok(detail) => detail,
            Err(e) => {
                debug!("Dropping {} event with unserializable detail: {}", name, e);
                return;
            }
        };
        let _ = self.events.send(PageEvent {
            name: name.to_string(),
            detail,
        });
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    /// Post a window message event on behalf of `source`.
    pub fn post_message(&self, name: &str, source: WindowId, data: Value) {
        let _ = self.messages.send(WindowMessage {
            name: name.to_string(),
            source,
            data,
        });
    }

    /// Post a window message from this window itself.
    pub fn post_own_message(&self, name: &str, data: Value) {
        self.post_message(name, self.id, data);
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<WindowMessage> {
        self.messages.subscribe()
    }
}
