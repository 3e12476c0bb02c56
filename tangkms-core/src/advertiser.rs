//! Fetches the raw advertisement (a signed JWK set) from a Tang server.
//!
//! Two implementations are provided: [`NetworkAdvertiser`], which performs a
//! real HTTP GET against a Tang server, and [`StaticAdvertiser`], which
//! returns caller-supplied bytes. Both share the [`Advertiser`] capability
//! set: `url()` plus `resolve()`.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Fetches advertisement bytes from a Tang server, or a static stand-in.
#[async_trait]
pub trait Advertiser: Send + Sync {
    /// The canonical base URL this advertiser resolves against.
    fn url(&self) -> &str;

    /// Fetches the raw advertisement bytes.
    ///
    /// # Errors
    /// Returns [`Error::AdvertisementFetch`] on a malformed URL, a transport
    /// failure, or a non-2xx HTTP status. Never retries internally.
    async fn resolve(&self) -> Result<Vec<u8>>;
}

/// Normalizes a configured Tang base URL by stripping any trailing slash.
fn normalize_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Fetches the advertisement over HTTP from a real Tang server.
pub struct NetworkAdvertiser {
    url: String,
    client: reqwest::Client,
}

impl NetworkAdvertiser {
    /// Builds a new network advertiser against the given Tang base URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: normalize_url(&url.into()),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Advertiser for NetworkAdvertiser {
    fn url(&self) -> &str {
        &self.url
    }

    async fn resolve(&self) -> Result<Vec<u8>> {
        let endpoint = format!("{}/adv", self.url);
        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(|e| Error::AdvertisementFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::AdvertisementFetch(format!(
                "unexpected status {} from {}",
                response.status(),
                endpoint
            )));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| Error::AdvertisementFetch(e.to_string()))
    }
}

/// A caller-supplied advertisement, used in tests in place of a real Tang
/// server.
pub struct StaticAdvertiser {
    url: String,
    bytes: Vec<u8>,
}

impl StaticAdvertiser {
    /// Builds a static advertiser that always resolves to `bytes`.
    pub fn new(url: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            url: normalize_url(&url.into()),
            bytes,
        }
    }
}

#[async_trait]
impl Advertiser for StaticAdvertiser {
    fn url(&self) -> &str {
        &self.url
    }

    async fn resolve(&self) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}
