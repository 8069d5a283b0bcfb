//! Host browser capabilities the relay depends on.
//!
//! The relay never talks to a browser directly. Tabs, URL match patterns and
//! sender metadata are modelled here so the hub can run against the
//! in-process [`TabRegistry`](crate::relay::tabs::TabRegistry) or any other
//! host that implements [`TabHost`].

use crate::relay::types::RuntimeMessage;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use glob::Pattern;
use std::str::FromStr;
use url::Url;

/// Browser tab identifier.
pub type TabId = u32;

/// Snapshot of an open tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    /// Tabs of devtools or prerendered pages have no id
    pub id: Option<TabId>,
    pub url: String,
}

/// Metadata about whoever sent a runtime message or opened a port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderContext {
    /// Originating tab, absent for extension pages without a tab (popup, worker)
    pub tab_id: Option<TabId>,
    pub url: Option<String>,
}

impl SenderContext {
    pub fn tab(tab_id: TabId) -> Self {
        Self {
            tab_id: Some(tab_id),
            url: None,
        }
    }
}

/// Tab operations of the host browser.
#[async_trait]
pub trait TabHost: Send + Sync {
    /// List open tabs whose URL matches any of `patterns`.
    async fn query(&self, patterns: &[UrlPattern]) -> Result<Vec<Tab>>;

    /// Deliver a one-shot message to the content script of a tab.
    async fn send_message(&self, tab_id: TabId, message: RuntimeMessage) -> Result<()>;

    /// Open a new tab at `url`.
    async fn create(&self, url: &str) -> Result<TabId>;
}

/// Subset of the browser match-pattern syntax: `scheme://host/path`.
///
/// `host` may start with `*.` to match the domain and all of its subdomains,
/// `path` may contain `*` wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    scheme: String,
    host: HostPattern,
    path: Pattern,
    source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Any,
    Exact(String),
    Subdomains(String),
}

impl UrlPattern {
    /// Parse a list of known-good patterns, skipping invalid ones.
    pub fn parse_all(patterns: &[&str]) -> Vec<UrlPattern> {
        patterns.iter().filter_map(|p| p.parse().ok()).collect()
    }

    pub fn matches(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };

        if self.scheme != "*" && parsed.scheme() != self.scheme {
            return false;
        }

        let host = parsed.host_str().unwrap_or_default();
        let host_ok = match &self.host {
            HostPattern::Any => true,
            HostPattern::Exact(expected) => host == expected,
            HostPattern::Subdomains(domain) => {
                host == domain || host.ends_with(&format!(".{}", domain))
            }
        };
        if !host_ok {
            return false;
        }

        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }
        self.path.matches(&path)
    }
}

impl FromStr for UrlPattern {
    type Err = anyhow::Error;

    fn from_str(pattern: &str) -> Result<Self> {
        let (scheme, rest) = pattern
            .split_once("://")
            .ok_or_else(|| anyhow!("missing scheme separator in pattern {}", pattern))?;
        let (host, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => return Err(anyhow!("missing path in pattern {}", pattern)),
        };

        let host = match host {
            "*" => HostPattern::Any,
            h if h.starts_with("*.") => HostPattern::Subdomains(h[2..].to_lowercase()),
            h if h.contains('*') => return Err(anyhow!("wildcard only allowed as host prefix: {}", pattern)),
            "" => return Err(anyhow!("empty host in pattern {}", pattern)),
            h => HostPattern::Exact(h.to_lowercase()),
        };

        Ok(Self {
            scheme: scheme.to_lowercase(),
            host,
            path: path_glob(path)?,
            source: pattern.to_string(),
        })
    }
}

impl std::fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// Compile a pattern path where only `*` is special; it also matches `/`.
fn path_glob(path: &str) -> Result<Pattern> {
    let escaped: Vec<String> = path.split('*').map(Pattern::escape).collect();
    Pattern::new(&escaped.join("*")).with_context(|| format!("invalid path pattern {}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_host_pattern() {
        let pattern: UrlPattern = "https://launchblitz.ai/*".parse().unwrap();
        assert!(pattern.matches("https://launchblitz.ai/"));
        assert!(pattern.matches("https://launchblitz.ai/create?x=1"));
        assert!(!pattern.matches("http://launchblitz.ai/"));
        assert!(!pattern.matches("https://beta.launchblitz.ai/"));
        assert!(!pattern.matches("not a url"));
    }

    #[test]
    fn test_subdomain_pattern() {
        let pattern: UrlPattern = "https://*.axiom.trade/*".parse().unwrap();
        assert!(pattern.matches("https://axiom.trade/meme/x"));
        assert!(pattern.matches("https://www.axiom.trade/"));
        assert!(!pattern.matches("https://evilaxiom.trade/"));
    }

    #[test]
    fn test_path_wildcards() {
        let meme: UrlPattern = "https://axiom.trade/meme/*".parse().unwrap();
        assert!(meme.matches("https://axiom.trade/meme/abc/def"));
        assert!(!meme.matches("https://axiom.trade/trade/abc"));

        let middle: UrlPattern = "https://axiom.trade/*/abc".parse().unwrap();
        assert!(middle.matches("https://axiom.trade/meme/abc"));

        let exact: UrlPattern = "https://axiom.trade/exact".parse().unwrap();
        assert!(exact.matches("https://axiom.trade/exact"));
        assert!(!exact.matches("https://axiom.trade/exact/more"));
    }

    #[test]
    fn test_glob_metacharacters_are_literal() {
        let pattern: UrlPattern = "https://axiom.trade/[a]?/*".parse().unwrap();
        assert!(pattern.matches("https://axiom.trade/[a]?/x"));
        assert!(!pattern.matches("https://axiom.trade/ab/x"));
        assert_eq!(pattern.to_string(), "https://axiom.trade/[a]?/*");
    }

    #[test]
    fn test_invalid_patterns() {
        assert!("launchblitz.ai/*".parse::<UrlPattern>().is_err());
        assert!("https://launchblitz.ai".parse::<UrlPattern>().is_err());
        assert!("https://foo*.bar/*".parse::<UrlPattern>().is_err());
        assert_eq!(UrlPattern::parse_all(&["bad", "https://a.b/*"]).len(), 1);
    }
}
