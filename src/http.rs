//! The shared HTTP session.
//!
//! One [`HttpClient`] per worker: generous timeouts, a fixed identifying
//! header set, transparent gzip/deflate decoding and up to three tries with
//! exponential backoff. Forum software frequently sits behind expired or
//! self-signed certificates, so TLS verification is disabled.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONNECTION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::time::sleep;
use url::Url;

use crate::error::{Result, ScrapeError};

/// The User-Agent every request (including the robots.txt fetch) carries.
pub const USER_AGENT: &str = "Speakleash";

/// Response bodies above this size are discarded as oversize.
pub const MAX_BODY_BYTES: usize = 15_000_000;

const MAX_TRIES: u32 = 3;
const BACKOFF_FACTOR: u64 = 3;
const TIMEOUT: Duration = Duration::from_secs(60);

/// A fetched page: status, raw body and the charset the server advertised.
#[derive(Debug)]
pub struct FetchedPage {
    pub status: StatusCode,
    pub body: Vec<u8>,
    pub charset: Option<String>,
    /// URL after redirects; relative hrefs resolve against this.
    pub final_url: Url,
}

impl FetchedPage {
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed after {tries} tries")]
    Transport {
        url: String,
        tries: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("response body for {0} exceeds {MAX_BODY_BYTES} bytes")]
    BodyTooLarge(String),
}

/// A polite HTTP session over one connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .connect_timeout(TIMEOUT)
            .timeout(TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(ScrapeError::Client)?;

        Ok(Self { client })
    }

    /// GET with retries. Transport failures are retried with backoff; any
    /// HTTP status is returned to the caller as data, not an error.
    pub async fn get(&self, url: &Url) -> std::result::Result<FetchedPage, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_get(url).await {
                Ok(page) => return Ok(page),
                Err(FetchError::BodyTooLarge(url)) => {
                    return Err(FetchError::BodyTooLarge(url));
                }
                Err(FetchError::Transport { source, .. }) if attempt < MAX_TRIES => {
                    let wait = BACKOFF_FACTOR.pow(attempt - 1);
                    tracing::debug!(
                        "GET {url} failed (attempt {attempt}/{MAX_TRIES}), retrying in {wait}s: {source}"
                    );
                    sleep(Duration::from_secs(wait)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_get(&self, url: &Url) -> std::result::Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                tries: MAX_TRIES,
                source,
            })?;

        if let Some(len) = response.content_length() {
            if len as usize > MAX_BODY_BYTES {
                return Err(FetchError::BodyTooLarge(url.to_string()));
            }
        }

        let status = response.status();
        let final_url = response.url().clone();
        let charset = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_of);

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                tries: MAX_TRIES,
                source,
            })?
            .to_vec();

        if body.len() > MAX_BODY_BYTES {
            return Err(FetchError::BodyTooLarge(url.to_string()));
        }

        Ok(FetchedPage {
            status,
            body,
            charset,
            final_url,
        })
    }
}

fn charset_of(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("charset="))
        .map(|cs| cs.trim_matches('"').to_ascii_lowercase())
}
