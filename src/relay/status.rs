//! Popup status badges derived from the hub's status probe.

use crate::relay::host::{TabHost, TabId};
use crate::relay::runtime::RuntimeClient;
use crate::relay::types::{RelayConfig, SiteStatus, StatusReport};
use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeState {
    Checking,
    Ready,
    Missing,
    Error,
}

/// Label and state rendered for one site in the popup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusBadge {
    pub label: String,
    pub state: BadgeState,
}

impl StatusBadge {
    pub fn checking() -> Self {
        Self {
            label: "Checking...".to_string(),
            state: BadgeState::Checking,
        }
    }

    pub fn error(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: BadgeState::Error,
        }
    }
}

/// Both badges of the popup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopupStatus {
    pub launchblitz: StatusBadge,
    pub axiom: StatusBadge,
}

/// Turn a machine reason into a label: separators become spaces, first letter capitalized.
pub fn format_reason(reason: Option<&str>) -> String {
    let cleaned = reason.unwrap_or_default().replace(['-', '_'], " ");
    let cleaned = cleaned.trim();

    let mut chars = cleaned.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Error".to_string(),
    }
}

pub fn interpret_status(status: &SiteStatus) -> StatusBadge {
    if !status.ok {
        return StatusBadge::error(format_reason(status.reason.as_deref()));
    }

    match status.tab_count.unwrap_or_default() {
        0 => StatusBadge {
            label: "Not detected".to_string(),
            state: BadgeState::Missing,
        },
        1 => StatusBadge {
            label: "Ready".to_string(),
            state: BadgeState::Ready,
        },
        n => StatusBadge {
            label: format!("{} tabs", n),
            state: BadgeState::Ready,
        },
    }
}

/// Badges for a probe result; a failed probe marks both sites.
pub fn popup_status(report: Result<StatusReport>) -> PopupStatus {
    match report {
        Ok(report) => PopupStatus {
            launchblitz: interpret_status(&report.launchblitz),
            axiom: interpret_status(&report.axiom),
        },
        Err(e) => {
            warn!("Status probe failed: {}", e);
            let badge = StatusBadge::error(format_reason(Some(&e.to_string())));
            PopupStatus {
                launchblitz: badge.clone(),
                axiom: badge,
            }
        }
    }
}

/// Ask the hub for tab counts and render them.
pub async fn check_status(runtime: &RuntimeClient) -> PopupStatus {
    popup_status(runtime.check_status().await)
}

/// Popup shortcut: open the listener page in a new tab.
pub async fn open_listener_page(tabs: &dyn TabHost, config: &RelayConfig) -> Option<TabId> {
    match tabs.create(&config.listener_page_url).await {
        Ok(tab_id) => {
            info!("Opened listener page in tab {}", tab_id);
            Some(tab_id)
        }
        Err(e) => {
            warn!("Failed to open listening page: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::host::{Tab, UrlPattern};
    use crate::relay::tabs::TabRegistry;
    use crate::relay::types::RuntimeMessage;
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct ClosedWindow;

    #[async_trait]
    impl TabHost for ClosedWindow {
        async fn query(&self, _patterns: &[UrlPattern]) -> Result<Vec<Tab>> {
            Ok(vec![])
        }

        async fn send_message(&self, _tab_id: TabId, _message: RuntimeMessage) -> Result<()> {
            Err(anyhow!("no tab"))
        }

        async fn create(&self, _url: &str) -> Result<TabId> {
            Err(anyhow!("No current window"))
        }
    }

    #[tokio::test]
    async fn test_open_listener_page() {
        let tabs = TabRegistry::new();
        let config = RelayConfig::default();

        let tab = open_listener_page(&tabs, &config).await.unwrap();
        assert_eq!(tabs.url_of(tab).as_deref(), Some("chrome-extension://blitz/listening.html"));

        assert_eq!(open_listener_page(&ClosedWindow, &config).await, None);
    }

    #[test]
    fn test_format_reason() {
        assert_eq!(format_reason(Some("query-failed")), "Query failed");
        assert_eq!(format_reason(Some("no_tab")), "No tab");
        assert_eq!(format_reason(Some(" - ")), "Error");
        assert_eq!(format_reason(None), "Error");
    }

    #[test]
    fn test_interpret_status() {
        assert_eq!(interpret_status(&SiteStatus::found(0)).state, BadgeState::Missing);
        assert_eq!(interpret_status(&SiteStatus::found(1)).label, "Ready");
        assert_eq!(interpret_status(&SiteStatus::found(3)).label, "3 tabs");

        let failed = interpret_status(&SiteStatus::failed("tabs-permission"));
        assert_eq!(failed, StatusBadge::error("Tabs permission"));
    }

    #[test]
    fn test_failed_probe_marks_both_sites() {
        let status = popup_status(Err(anyhow!("no response")));
        assert_eq!(status.launchblitz, StatusBadge::error("No response"));
        assert_eq!(status.axiom, status.launchblitz);
        assert_ne!(status.axiom, StatusBadge::checking());
    }
}
