//! # Live Upstream over HTTP
//!
//! [`HttpFeed`] and [`HttpArchive`] speak the upstream's REST endpoints:
//!
//! - `GET feed/global?limit=N&sort=0`: the N most recent feed items, newest
//!   first, as a JSON array.
//! - `GET games/{id}`: current snapshot of one entity, `{"version", "payload"}`.
//! - `GET archive/{id}`: every archived version of one entity, as an object
//!   keyed by version number.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use super::ky_http::{ApiClient, ApiResponse, HttpError};
use crate::model::{EntityId, EntityUpdate, FeedItem};
use crate::sources::{decode_feed_items, Archive, ArchiveError, UpstreamError, UpstreamFeed};

/// Body of `GET games/{id}`.
#[derive(Debug, Deserialize)]
struct EntityBody {
    version: u64,
    #[serde(default)]
    payload: Value,
}

impl From<HttpError> for UpstreamError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Client(inner) if inner.is_decode() => Self::Malformed(inner.to_string()),
            other => Self::Network(other.to_string()),
        }
    }
}

impl From<HttpError> for ArchiveError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Client(inner) if inner.is_decode() => Self::Malformed(inner.to_string()),
            other => Self::Network(other.to_string()),
        }
    }
}

/// The live feed endpoint.
#[derive(Clone)]
pub struct HttpFeed {
    client: ApiClient,
}

impl HttpFeed {
    /// Feed rooted at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HttpError> {
        Ok(Self {
            client: ApiClient::new(base_url, timeout)?,
        })
    }

    /// Feed over an existing client.
    pub fn with_client(client: ApiClient) -> Self {
        Self { client }
    }
}

impl UpstreamFeed for HttpFeed {
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<FeedItem>, UpstreamError> {
        let query = [("limit", limit.to_string()), ("sort", "0".to_owned())];
        let response = self.client.get::<Vec<Value>>(&["feed", "global"], &query).await?;
        let values = success_body(response)?;
        trace!(limit, received = values.len(), "feed page fetched");
        Ok(decode_feed_items(values))
    }

    async fn fetch_entity_update(&self, entity_id: &EntityId) -> Result<EntityUpdate, UpstreamError> {
        let response = self
            .client
            .get::<EntityBody>(&["games", entity_id.as_str()], &[])
            .await?;
        if response.status == 404 {
            return Err(UpstreamError::UnknownEntity(entity_id.clone()));
        }
        let body = success_body(response)?;
        Ok(EntityUpdate {
            entity_id: entity_id.clone(),
            version: body.version,
            payload: body.payload,
        })
    }
}

/// The archive endpoint.
#[derive(Clone)]
pub struct HttpArchive {
    client: ApiClient,
}

impl HttpArchive {
    /// Archive rooted at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HttpError> {
        Ok(Self {
            client: ApiClient::new(base_url, timeout)?,
        })
    }
}

impl Archive<Value> for HttpArchive {
    async fn historical_snapshot(&self, entity_id: &EntityId) -> Result<BTreeMap<u64, Value>, ArchiveError> {
        let response = self
            .client
            .get::<BTreeMap<u64, Value>>(&["archive", entity_id.as_str()], &[])
            .await?;
        match response {
            ApiResponse { status: 404, .. } => Err(ArchiveError::NotFound(entity_id.clone())),
            ApiResponse {
                data: Some(versions),
                success: true,
                ..
            } => Ok(versions),
            ApiResponse { status, error_body, .. } => Err(ArchiveError::Network(format!(
                "HTTP {status}: {}",
                error_body.unwrap_or_default()
            ))),
        }
    }
}

fn success_body<T>(response: ApiResponse<T>) -> Result<T, UpstreamError> {
    match response {
        ApiResponse {
            data: Some(data),
            success: true,
            ..
        } => Ok(data),
        ApiResponse { status, error_body, .. } => Err(UpstreamError::Status {
            status,
            body: error_body.unwrap_or_default(),
        }),
    }
}
