//! Network fetch of package files from a CDN.
//!
//! [`Fetcher`] is the transport seam. [`SourceCache`] collapses concurrent
//! requests for one URL into a single fetch and memoizes successes.

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Fetch failure. Cloneable so one failure can reach every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
}

/// Text fetch over some transport.
pub trait Fetcher: Send + Sync {
    /// Fetch `url` as text. Non-success statuses are errors.
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<String, FetchError>>;
}

/// HTTP fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    /// Create a fetcher with connect and request timeouts.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self, FetchError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("sandnode/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self { http })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<String, FetchError>> {
        let http = self.http.clone();
        let url = url.to_string();
        async move {
            let parsed = Url::parse(&url).map_err(|e| FetchError::InvalidUrl {
                url: url.clone(),
                message: e.to_string(),
            })?;
            debug!(url = %parsed, "fetching");

            let transport = |e: reqwest::Error| FetchError::Transport {
                url: url.clone(),
                message: e.to_string(),
            };
            let response = http.get(parsed).send().await.map_err(transport)?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    url: url.clone(),
                    status: status.as_u16(),
                });
            }
            response.text().await.map_err(transport)
        }
        .boxed()
    }
}

/// Fetcher that fails every request, for offline sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

impl Fetcher for OfflineFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<String, FetchError>> {
        let err = FetchError::Transport {
            url: url.to_string(),
            message: "network access disabled".to_string(),
        };
        futures::future::ready(Err(err)).boxed()
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<str>, FetchError>>>;

/// Single-flight, memoizing source cache keyed by URL.
///
/// Failed fetches are evicted so a later request retries.
pub struct SourceCache {
    fetcher: Arc<dyn Fetcher>,
    entries: DashMap<String, SharedFetch>,
}

impl std::fmt::Debug for SourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceCache")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl SourceCache {
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            entries: DashMap::new(),
        }
    }

    /// Fetch `url`, joining any fetch already in flight.
    ///
    /// # Errors
    /// Returns the fetch error shared by every concurrent caller.
    pub async fn get(&self, url: &str) -> Result<Arc<str>, FetchError> {
        let fetch = self.shared(url);
        let result = fetch.clone().await;
        if result.is_err() {
            self.entries.remove_if(url, |_, f| f.ptr_eq(&fetch));
        }
        result
    }

    fn shared(&self, url: &str) -> SharedFetch {
        self.entries
            .entry(url.to_string())
            .or_insert_with(|| {
                let request = self.fetcher.fetch(url);
                async move { request.await.map(Arc::from) }.boxed().shared()
            })
            .value()
            .clone()
    }

    /// Whether `url` has been requested and not evicted.
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }
}

/// CDN URL of `path` inside `name@version`.
#[must_use]
pub fn cdn_url(origin: &str, name: &str, version: &str, path: &str) -> String {
    format!(
        "{}/{name}@{version}/{}",
        origin.trim_end_matches('/'),
        path.trim_start_matches("./").trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Fetcher for Counting {
        fn fetch(&self, url: &str) -> BoxFuture<'static, Result<String, FetchError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let fail = self.fail;
            let url = url.to_string();
            async move {
                tokio::task::yield_now().await;
                if fail {
                    Err(FetchError::Status { url, status: 404 })
                } else {
                    Ok(format!("// {url}"))
                }
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = SourceCache::new(Arc::new(Counting {
            calls: Arc::clone(&calls),
            fail: false,
        }));

        let (a, b) = tokio::join!(cache.get("https://x/a"), cache.get("https://x/a"));
        assert_eq!(&*a.unwrap(), "// https://x/a");
        assert_eq!(&*b.unwrap(), "// https://x/a");
        cache.get("https://x/a").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_evicted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = SourceCache::new(Arc::new(Counting {
            calls: Arc::clone(&calls),
            fail: true,
        }));

        let err = cache.get("https://x/missing").await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert!(!cache.contains("https://x/missing"));
        let _ = cache.get("https://x/missing").await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_offline_fetcher_fails() {
        let err = OfflineFetcher.fetch("https://x/a").await.unwrap_err();
        assert!(err.to_string().contains("network access disabled"));
    }

    #[test]
    fn test_cdn_url() {
        assert_eq!(
            cdn_url("https://cdn.jsdelivr.net/npm/", "@s/a", "1.0.0", "./lib/a.js"),
            "https://cdn.jsdelivr.net/npm/@s/a@1.0.0/lib/a.js"
        );
    }
}
