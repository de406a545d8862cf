//! Shared outbound HTTP plumbing for the collectors.
//!
//! Every upstream call goes through [`with_timeout`], which drops the request
//! future when the limit passes.  Dropping a reqwest future aborts the
//! request and returns its connection, so a timed-out call never lingers.
use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL};
use reqwest::{Client, StatusCode};
use thiserror::Error;

/// Everything that can go wrong between an upstream endpoint and a
/// normalized record.  Collectors absorb all of these into default values.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upstream returned {0}")]
    UpstreamStatus(StatusCode),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("no pattern matched {0}")]
    ExtractionMiss(&'static str),
}

/// Thin wrapper over a shared `reqwest::Client` configured for scraping.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .default_headers({
                let mut h = HeaderMap::new();
                h.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                h
            })
            .build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET `url` and return the body as text.  Non-2xx is an error.
    /// Unbounded; wrap in [`with_timeout`].
    pub async fn get_text(&self, url: &str, headers: HeaderMap) -> Result<String, FetchError> {
        let response = self.client.get(url).headers(headers).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamStatus(status));
        }

        Ok(response.text().await?)
    }
}

/// Runs `fut` with a deadline.  On expiry the future is dropped, which
/// cancels whatever I/O it had in flight.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(limit)),
    }
}
