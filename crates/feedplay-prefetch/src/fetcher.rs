//! Network seam of the scheduler.
//!
//! [`Fetcher`] is the only way the scheduler touches the network, so hosts
//! and tests can substitute their own transport. [`HttpFetcher`] is the
//! reqwest-backed implementation.

use async_trait::async_trait;
use feedplay_core::config::PrefetchConfig;
use feedplay_core::{Error, Result};
use reqwest::header::{ACCEPT, RANGE};
use reqwest::Client;
use url::Url;

/// `Accept` header sent with manifest requests.
pub const MANIFEST_ACCEPT: &str = "application/vnd.apple.mpegurl, application/x-mpegURL, text/plain";

/// Transport used by warm operations.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET a manifest and return its body. Non-2xx responses are errors.
    async fn fetch_manifest(&self, url: &Url) -> Result<String>;

    /// GET the first `len` bytes of `url` with a `Range` header and read the
    /// body to the end. Returns the number of bytes received.
    async fn fetch_range(&self, url: &Url, len: u64) -> Result<u64>;
}

/// reqwest-backed [`Fetcher`].
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a client honouring the timeout and user agent in `config`.
    pub fn new(config: &PrefetchConfig) -> Result<Self> {
        let user_agent = config.user_agent.clone().unwrap_or_else(default_user_agent);
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_manifest(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, MANIFEST_ACCEPT)
            .send()
            .await
            .map_err(|e| Error::request(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::http(status.as_u16(), url));
        }

        response.text().await.map_err(|e| Error::request(url, e))
    }

    async fn fetch_range(&self, url: &Url, len: u64) -> Result<u64> {
        let last_byte = len.saturating_sub(1);
        let response = self
            .client
            .get(url.clone())
            .header(RANGE, format!("bytes=0-{last_byte}"))
            .send()
            .await
            .map_err(|e| Error::request(url, e))?;

        // 206 for servers honouring the range, 200 for those sending it all.
        let status = response.status();
        if !status.is_success() {
            return Err(Error::http(status.as_u16(), url));
        }

        let body = response.bytes().await.map_err(|e| Error::request(url, e))?;
        Ok(body.len() as u64)
    }
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher").finish_non_exhaustive()
    }
}

/// Default `User-Agent` used when the configuration does not set one.
pub fn default_user_agent() -> String {
    format!("feedplay/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_defaults() {
        let fetcher = HttpFetcher::new(&PrefetchConfig::default());
        assert!(fetcher.is_ok());
    }

    #[test]
    fn user_agent_mentions_crate() {
        assert!(default_user_agent().starts_with("feedplay/"));
    }

    #[test]
    fn accept_header_lists_hls_types() {
        assert!(MANIFEST_ACCEPT.contains("application/vnd.apple.mpegurl"));
        assert!(MANIFEST_ACCEPT.contains("text/plain"));
    }
}
