//! Feed Client: raw payload retrieval, no parsing.
//!
//! [`HttpClient`] is the transport seam, [`fetch_bytes`] performs one bounded
//! GET, and [`FeedClient`] exposes it per endpoint through [`FeedFetcher`],
//! the only capability the refresh cache needs from the network.

mod basic;
mod client;
mod feed_client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use feed_client::{FeedClient, FeedFetcher, RawFeedPayload};

use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::FetchError;

/// Fetches `url` with a GET request, failing on transport errors, non-2xx
/// responses, or when headers and body together take longer than `timeout`.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    timeout: Duration,
) -> Result<Bytes, FetchError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    let req = reqwest::Request::new(reqwest::Method::GET, parsed);

    let timed_out = || FetchError::Timeout {
        url: url.to_string(),
        timeout_secs: timeout.as_secs(),
    };
    let transport = |e: reqwest::Error| {
        if e.is_timeout() {
            timed_out()
        } else {
            FetchError::Network {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    };

    let deadline = Instant::now() + timeout;

    let resp = tokio::time::timeout_at(deadline, client.execute(req))
        .await
        .map_err(|_| timed_out())?
        .map_err(transport)?;

    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    tokio::time::timeout_at(deadline, resp.bytes())
        .await
        .map_err(|_| timed_out())?
        .map_err(transport)
}
