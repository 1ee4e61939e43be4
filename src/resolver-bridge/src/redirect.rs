//! Final-URL resolution for stream URLs that need custom request headers.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use resolver_core::redact::{redact_headers, redact_url};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("invalid request header {name}")]
    InvalidHeader { name: String },
    #[error("redirect request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("redirect target answered with status {status}")]
    Status { status: u16 },
}

/// Follows redirects for a URL using the given request headers and reports
/// where they end.
#[async_trait]
pub trait RedirectResolver: Send + Sync {
    async fn resolve_redirect(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<String, RedirectError>;
}

/// [`RedirectResolver`] over HTTP(S) using reqwest's redirect policy.
#[derive(Debug, Clone)]
pub struct HttpRedirectResolver {
    client: Client,
}

impl HttpRedirectResolver {
    pub fn new() -> Result<Self, RedirectError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, RedirectError> {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let invalid = || RedirectError::InvalidHeader { name: name.clone() };
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }
}

#[async_trait]
impl RedirectResolver for HttpRedirectResolver {
    async fn resolve_redirect(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<String, RedirectError> {
        tracing::debug!(
            url = %redact_url(url),
            headers = %redact_headers(headers),
            "resolving stream redirect"
        );
        let response = self
            .client
            .get(url)
            .headers(Self::header_map(headers)?)
            .send()
            .await?;

        // the body is never read; dropping the response closes the stream
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(RedirectError::Status {
                status: status.as_u16(),
            });
        }
        Ok(response.url().to_string())
    }
}
