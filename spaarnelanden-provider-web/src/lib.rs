//! Page fetcher for the public Spaarnelanden container map.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use tracing::debug;

use spaarnelanden_core::ports::{PagePort, PortError};

/// Page that embeds the container model.
pub const DEFAULT_URL: &str = "https://inzameling.spaarnelanden.nl/";

/// Upper bound for a single page request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches the map page over HTTP.
pub struct WebPagePort {
    client: Client,
    url: String,
    timeout: Duration,
}

impl WebPagePort {
    /// Create a port for the public page bound to the given HTTP client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            url: DEFAULT_URL.to_owned(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Fetch from another location, e.g. a mirror.
    #[must_use]
    pub fn with_url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = url.into();
        self
    }

    /// Replace the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Location that is fetched.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PagePort for WebPagePort {
    async fn fetch(&self) -> Result<String, PortError> {
        debug!(url = %self.url, "requesting container page");
        let req = self.client.get(&self.url).timeout(self.timeout);
        fetch_text(req).await
    }
}

// Small helper to fetch a body as text with status handling.
async fn fetch_text(req: RequestBuilder) -> Result<String, PortError> {
    req.send()
        .await
        .map_err(PortError::from)?
        .error_for_status()
        .map_err(PortError::from)?
        .text()
        .await
        .map_err(PortError::from)
}
