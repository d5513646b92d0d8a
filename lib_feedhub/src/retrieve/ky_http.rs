//! # HTTP Retrieval Utilities
//!
//! An asynchronous JSON API client wrapped around `reqwest`, with middleware
//! retrying transient failures under exponential backoff.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Retries on top of the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Failures below the level of HTTP status codes.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Base URL or endpoint could not be built.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// Connection, timeout or retry middleware failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest_middleware::Error),
    /// Client construction or body decoding failure.
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// A decoded response plus the transaction metadata.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized body, on success.
    pub data: Option<T>,
    /// The raw body of a failed request.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Status was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// JSON API client bound to one base URL.
#[derive(Clone)]
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
}

impl ApiClient {
    /// Creates a client for `base_url` with a per-request `timeout` and
    /// [`DEFAULT_MAX_RETRIES`] retries.
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute URL that can carry a path.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HttpError> {
        let url = Url::parse(base_url).map_err(|e| HttpError::InvalidUrl(format!("{base_url}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(HttpError::InvalidUrl(format!("{base_url}: cannot be a base")));
        }

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(DEFAULT_MAX_RETRIES);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("feedhub/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
        })
    }

    /// The base every endpoint is resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL with `segments` appended as percent-encoded path segments.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, HttpError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| HttpError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GETs `segments` with `query` parameters and decodes a JSON body.
    ///
    /// A non-2xx status is not an error here; it comes back in the
    /// [`ApiResponse`] with the raw body so the caller can tell "unknown
    /// entity" apart from "upstream down".
    ///
    /// # Arguments
    /// * `segments` - Path segments appended to the base URL, each one
    ///   percent-encoded on its own (`["games", id]`).
    /// * `query` - Query string pairs, in order.
    ///
    /// # Errors
    /// * [`HttpError::InvalidUrl`] if the endpoint cannot be built.
    /// * [`HttpError::Transport`] once the retry middleware gives up.
    /// * [`HttpError::Client`] if a 2xx body is not valid JSON for `T`.
    pub async fn get<T>(&self, segments: &[&str], query: &[(&str, String)]) -> Result<ApiResponse<T>, HttpError>
    where
        T: DeserializeOwned,
    {
        // 1. Build the absolute endpoint
        let url = self.endpoint(segments)?;

        // 2. Execute through the retry middleware
        let response = self.inner.request(Method::GET, url).query(query).send().await?;

        // 3. Capture the response metadata before the body is consumed
        let status = response.status();
        let headers = response.headers().clone();

        // 4. Decode on success, keep the raw text otherwise
        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers,
            })
        } else {
            let error_body = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body,
                status: status.as_u16(),
                success: false,
                headers,
            })
        }
    }
}
