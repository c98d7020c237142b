//! HTTP client facade shared by all mirror operations.
//!
//! Every upstream access goes through [`HttpClient::get`], which applies one
//! uniform policy: TLS, an optional client certificate, bounded redirects,
//! per-request timeouts, and retries with exponential backoff. A 404 or 410
//! response surfaces as the distinguishable [`MirrorError::NotFound`] sentinel
//! so callers can implement fallback probes without parsing messages.

use crate::error::{MirrorError, Result};
use reqwest::StatusCode;
use reqwest::redirect;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde_json::Value;
use std::time::Duration;

/// Maximum redirect depth followed by a single GET.
const MAX_REDIRECTS: usize = 10;

/// Maximum number of retries for transient failures.
const MAX_RETRIES: u32 = 3;

/// The uniform authenticated GET client.
pub struct HttpClient {
    inner: ClientWithMiddleware,
}

impl HttpClient {
    /// Build a client with the given per-request timeout and an optional
    /// client certificate.
    pub fn new(timeout: Duration, identity: Option<reqwest::Identity>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .use_rustls_tls();
        if let Some(identity) = identity {
            builder = builder.identity(identity);
        }
        let base = builder.build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
        let inner = ClientBuilder::new(base)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { inner })
    }

    /// Issue a GET request.
    ///
    /// # Errors
    ///
    /// `MirrorError::NotFound` on 404/410, `MirrorError::Status` on any other
    /// non-2xx response, transport errors otherwise.
    pub async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self.inner.get(url).send().await?;
        check_status(url, response.status())?;
        Ok(response)
    }

    /// GET a URL and return the response body as text.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        Ok(self.get(url).await?.text().await?)
    }

    /// GET a URL and return the response body as bytes.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        Ok(self.get(url).await?.bytes().await?.to_vec())
    }

    /// GET a URL and decode the body as JSON.
    ///
    /// Decoding failures surface as `MirrorError::Json` so callers can treat
    /// malformed documents differently from transport failures.
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        let text = self.get_text(url).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Map a response status onto the facade's error surface.
fn check_status(url: &str, status: StatusCode) -> Result<()> {
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return Err(MirrorError::NotFound(url.to_string()));
    }
    if !status.is_success() {
        return Err(MirrorError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_statuses() {
        assert!(
            check_status("https://p.test/x", StatusCode::NOT_FOUND)
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            check_status("https://p.test/x", StatusCode::GONE)
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_other_failures_are_not_the_sentinel() {
        let err = check_status("https://p.test/x", StatusCode::INTERNAL_SERVER_ERROR).unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(err, MirrorError::Status { status: 500, .. }));
    }

    #[test]
    fn test_success_statuses() {
        assert!(check_status("https://p.test/x", StatusCode::OK).is_ok());
        assert!(check_status("https://p.test/x", StatusCode::NO_CONTENT).is_ok());
    }
}
