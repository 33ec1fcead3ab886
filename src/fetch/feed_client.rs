use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{HttpClient, fetch_bytes};
use crate::clock::{Clock, SystemClock};
use crate::config::FeedEndpoint;
use crate::error::FetchError;

/// Undecoded bytes from one endpoint. Dropped once decoded.
#[derive(Debug, Clone)]
pub struct RawFeedPayload {
    pub endpoint: String,
    pub url: String,
    pub bytes: Bytes,
    pub fetched_at: DateTime<Utc>,
}

/// Retrieves the current payload of a feed endpoint.
///
/// Implementations must not retry and must not touch shared state; retry
/// policy belongs to the caller.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, endpoint: &FeedEndpoint) -> Result<RawFeedPayload, FetchError>;
}

/// [`FeedFetcher`] over any [`HttpClient`], with a bounded timeout.
pub struct FeedClient {
    http: Arc<dyn HttpClient>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl FeedClient {
    pub fn new(http: impl HttpClient + 'static, timeout: Duration) -> Self {
        Self {
            http: Arc::new(http),
            timeout,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl FeedFetcher for FeedClient {
    #[tracing::instrument(skip(self), fields(endpoint = %endpoint.name))]
    async fn fetch(&self, endpoint: &FeedEndpoint) -> Result<RawFeedPayload, FetchError> {
        let bytes = fetch_bytes(self.http.as_ref(), &endpoint.url, self.timeout).await?;
        debug!(bytes = bytes.len(), "Feed bytes received");

        Ok(RawFeedPayload {
            endpoint: endpoint.name.clone(),
            url: endpoint.url.clone(),
            bytes,
            fetched_at: self.clock.now(),
        })
    }
}
