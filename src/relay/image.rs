//! Image inlining: fetch a remote image once per session and turn it into a
//! self-contained `data:` URI.

use crate::types::is_data_uri;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Content type used when the server does not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes encoded per base64 call. Multiple of 3 so chunk outputs concatenate
/// without padding in between.
const ENCODE_CHUNK_BYTES: usize = 3 * 0x2000;

/// Raw image bytes as returned by an [`ImageSource`].
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Where inlined images come from.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedImage>;
}

/// Fetches images over HTTP without credentials.
pub struct HttpImageSource {
    http_client: Client,
}

impl HttpImageSource {
    pub fn new(http_client: Client) -> Self {
        Self { http_client }
    }
}

impl Default for HttpImageSource {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &str) -> Result<FetchedImage> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .context("Failed to fetch image")?;

        if !response.status().is_success() {
            return Err(anyhow!("unexpected status {}", response.status()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .filter(|value| !value.is_empty());

        let bytes = response.bytes().await.context("Failed to read image body")?;
        Ok(FetchedImage {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

/// Base64-encode `bytes` into a `data:` URI, in bounded chunks.
pub fn encode_data_uri(bytes: &[u8], content_type: Option<&str>) -> String {
    let mime = content_type.filter(|t| !t.is_empty()).unwrap_or(DEFAULT_CONTENT_TYPE);
    let mut uri = format!("data:{};base64,", mime);
    uri.reserve(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(ENCODE_CHUNK_BYTES) {
        STANDARD.encode_string(chunk, &mut uri);
    }
    uri
}

/// Bounded URL -> inlined image map with FIFO eviction.
///
/// `None` values record failed fetches so they are not retried this session.
#[derive(Debug)]
pub struct ImageCache {
    entries: HashMap<String, Option<String>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl ImageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// `Some(entry)` on a hit, where the entry itself may be a failure sentinel.
    pub fn get(&self, url: &str) -> Option<Option<String>> {
        self.entries.get(url).cloned()
    }

    /// Insert or overwrite; overwriting keeps the original insertion position.
    pub fn insert(&mut self, url: String, value: Option<String>) {
        if self.entries.insert(url.clone(), value).is_none() {
            self.order.push_back(url);
        }

        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            debug!("Evicted cached image {}", oldest);
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Turns image URLs into inline `data:` URIs, caching results per session.
pub struct ImageInliner {
    source: Box<dyn ImageSource>,
    cache: Mutex<ImageCache>,
}

impl ImageInliner {
    pub fn new(source: Box<dyn ImageSource>, capacity: usize) -> Self {
        Self {
            source,
            cache: Mutex::new(ImageCache::new(capacity)),
        }
    }

    /// Inline `url`. Returns `None` when no inline copy is available.
    ///
    /// Two concurrent calls for the same uncached URL both fetch; the last
    /// one to finish owns the cache entry.
    #[instrument(skip(self))]
    pub async fn inline(&self, url: &str) -> Option<String> {
        if url.is_empty() {
            return None;
        }
        if is_data_uri(url) {
            return Some(url.to_string());
        }

        let cached = self.lock_cache().get(url);
        if let Some(cached) = cached {
            debug!("Image cache hit for {}", url);
            return cached;
        }

        let inlined = match self.source.fetch(url).await {
            Ok(image) => Some(encode_data_uri(&image.bytes, image.content_type.as_deref())),
            Err(e) => {
                warn!("Failed to cache local image URL {}: {:#}", url, e);
                None
            }
        };

        self.lock_cache().insert(url.to_string(), inlined.clone());
        inlined
    }

    pub fn cached_entries(&self) -> usize {
        self.lock_cache().len()
    }

    pub fn is_cached(&self, url: &str) -> bool {
        self.lock_cache().contains(url)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, ImageCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}
