//! # Data Retrieval Module
//!
//! HTTP access to the live upstream.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: A generic JSON `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, retrying transient failures with exponential
//!   backoff.
//! - **`upstream_http`**: The feed, entity and archive endpoints on top of
//!   `ApiClient`.

/// Generic HTTP API client with retry middleware.
pub mod ky_http;
/// Upstream feed and archive over HTTP.
pub mod upstream_http;

pub use ky_http::{ApiClient, ApiResponse, HttpError};
pub use upstream_http::{HttpArchive, HttpFeed};
