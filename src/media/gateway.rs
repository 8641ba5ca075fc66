//! Gateway client for the remote decrypt-and-download API
//!
//! The gateway answers `POST /message/download-media` with either raw
//! binary, or JSON carrying a base64 payload, or JSON carrying an error
//! plus (sometimes) a direct CDN link. Interpreting that mess is the
//! resolver's job; this client only performs the time-bounded transport
//! and classifies the response shape.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use super::MediaType;
use crate::{Error, Result};

/// Default per-request timeout; gateway decrypts can be slow on video
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);

/// Bounded-retry policy for gateway calls
///
/// Injected into the resolver so backoff stays out of the business logic.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff delay before the given (1-based) attempt
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.base_delay * 2_u32.saturating_pow(attempt - 2)
    }
}

/// Request body for the decrypt endpoint
#[derive(Debug, Clone, serde::Serialize)]
pub struct DownloadRequest<'a> {
    #[serde(rename = "mediaKey")]
    pub media_key: &'a str,
    #[serde(rename = "directPath")]
    pub direct_path: &'a str,
    #[serde(rename = "type")]
    pub media_type: &'a str,
    pub mimetype: &'a str,
}

/// Classified gateway response
#[derive(Debug)]
pub enum GatewayReply {
    /// Raw decrypted bytes
    Binary(Vec<u8>),
    /// JSON body: may hold a base64 payload, an error, a fallback link
    Json(Value),
    /// The media is no longer available upstream (CDN 404/410)
    Gone,
}

/// HTTP client for one gateway deployment
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    /// Create a gateway client
    ///
    /// # Errors
    ///
    /// Returns error if the underlying HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Call the decrypt-and-download endpoint for one media reference
    ///
    /// # Errors
    ///
    /// Returns error for transport failures or non-2xx statuses other
    /// than the gone markers; timeouts surface as `Error::Http` and count
    /// as one failed attempt
    pub async fn download_media(
        &self,
        token: &SecretString,
        media_type: MediaType,
        mimetype: &str,
        media_key: &str,
        direct_path: &str,
    ) -> Result<GatewayReply> {
        let url = format!("{}/message/download-media", self.base_url);
        let request = DownloadRequest {
            media_key,
            direct_path,
            media_type: media_type.as_str(),
            mimetype,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(token.expose_secret())
            .json(&request)
            .send()
            .await?;

        Self::classify_response(response).await
    }

    /// Fetch a plain CDN link directly (fallback path)
    ///
    /// # Errors
    ///
    /// Returns error for transport failures or unexpected statuses
    pub async fn fetch_direct(&self, link: &str) -> Result<GatewayReply> {
        // Reject junk before spending a network call on it
        let parsed = url::Url::parse(link)
            .map_err(|e| Error::Gateway(format!("invalid fallback link: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::Gateway(format!(
                "unsupported fallback scheme {}",
                parsed.scheme()
            )));
        }

        let response = self.http.get(link).send().await?;
        Self::classify_response(response).await
    }

    async fn classify_response(response: reqwest::Response) -> Result<GatewayReply> {
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Ok(GatewayReply::Gone);
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));

        if is_json {
            let value: Value = response.json().await?;
            return Ok(GatewayReply::Json(value));
        }

        if !status.is_success() {
            return Err(Error::Gateway(format!("gateway answered {status}")));
        }

        let bytes = response.bytes().await?;
        Ok(GatewayReply::Binary(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(500));
        assert_eq!(policy.delay_before(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_before(4), Duration::from_millis(2000));
    }

    #[test]
    fn test_download_request_wire_names() {
        let request = DownloadRequest {
            media_key: "k",
            direct_path: "/v/t62/x",
            media_type: "image",
            mimetype: "image/jpeg",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["mediaKey"], "k");
        assert_eq!(json["directPath"], "/v/t62/x");
        assert_eq!(json["type"], "image");
        assert_eq!(json["mimetype"], "image/jpeg");
    }

    #[tokio::test]
    async fn test_fetch_direct_rejects_bad_links() {
        let client = GatewayClient::new("https://gw.example", None).unwrap();
        assert!(client.fetch_direct("not a url").await.is_err());
        assert!(client.fetch_direct("ftp://host/file").await.is_err());
    }
}
