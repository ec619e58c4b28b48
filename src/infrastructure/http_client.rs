//! HTTP fetch client (C2): fixed user agent, bounded retries with
//! exponential backoff on transport errors and 5xx, SSRF-checked on
//! every call.
//!
//! Client construction (gzip/brotli, fixed timeout, fixed UA) is a
//! thin wrapper around `reqwest::Client`; the retry loop adds bounded
//! exponential backoff on top of it for in-request resilience.

use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use thiserror::Error;

use super::ssrf::{self, SsrfError};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 100;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request blocked: {0}")]
    Ssrf(#[from] SsrfError),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request failed with status {0}")]
    Status(StatusCode),

    #[error("request cancelled")]
    Cancelled,
}

pub struct FetchClient {
    client: Client,
}

impl FetchClient {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(crate::user_agent())
            .gzip(true)
            .brotli(true)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub async fn get(&self, url: &str) -> Result<Response, FetchError> {
        self.get_with_headers(url, &[]).await
    }

    /// GET with extra headers (used for conditional GET's
    /// `If-None-Match` / `If-Modified-Since`). §4.2 retry policy: up to
    /// 3 attempts total, retrying only transport errors and 5xx, with
    /// exponential backoff `100ms * 2^(attempt-1)`. 4xx (including 304,
    /// which callers special-case before this) returns immediately.
    pub async fn get_with_headers(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Response, FetchError> {
        ssrf::validate_url(url).await?;
        self.get_with_retry(url, headers).await
    }

    /// Retry loop without the SSRF check, so tests can point it at a
    /// loopback-bound mock server without disabling the guard in
    /// production code paths.
    async fn get_with_retry(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Response, FetchError> {
        let mut attempt = 1;
        loop {
            let mut request = self.client.get(url);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }

            tracing::debug!(url, attempt, "fetching");
            let outcome = request.send().await;

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() && attempt < MAX_ATTEMPTS {
                        self.backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    if !status.is_success() && status != StatusCode::NOT_MODIFIED {
                        return Err(FetchError::Status(status));
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(FetchError::Transport(err));
                    }
                    self.backoff(attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    pub async fn post(&self, url: &str, body: Vec<u8>) -> Result<Response, FetchError> {
        ssrf::validate_url(url).await?;

        let mut attempt = 1;
        loop {
            let response = self.client.post(url).body(body.clone()).send().await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() && attempt < MAX_ATTEMPTS {
                        self.backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    if !status.is_success() {
                        return Err(FetchError::Status(status));
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(FetchError::Transport(err));
                    }
                    self.backoff(attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn backoff(&self, attempt: u32) {
        let millis = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

impl Default for FetchClient {
    fn default() -> Self {
        Self::new().expect("failed to build default FetchClient")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn retries_twice_on_503_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = FetchClient::new().unwrap();
        let response = client.get_with_retry(&server.uri(), &[]).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn does_not_retry_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = FetchClient::new().unwrap();
        let result = client.get_with_retry(&server.uri(), &[]).await;
        assert!(matches!(result, Err(FetchError::Status(StatusCode::NOT_FOUND))));
    }

    #[tokio::test]
    async fn blocks_private_targets_before_ever_sending() {
        let client = FetchClient::new().unwrap();
        let result = client.get("http://127.0.0.1:9/anything").await;
        assert!(matches!(result, Err(FetchError::Ssrf(_))));
    }
}
