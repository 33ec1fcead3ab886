//! Refresh cache: periodically pulls every feed and publishes an immutable
//! [`Snapshot`] that readers can grab without blocking the refresher.
//!
//! A cycle either replaces the whole snapshot or leaves the previous one in
//! place. Failures are logged and recorded in [`RefreshStatus`]; they never
//! reach query callers.

mod scheduler;
mod snapshot;

pub use scheduler::{RefreshHandle, spawn};
pub use snapshot::Snapshot;

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{EngineConfig, FeedEndpoint};
use crate::error::{CycleError, EndpointError, QueryError};
use crate::fetch::FeedFetcher;
use crate::model::DecodedFeed;
use crate::parser::decode;
use crate::services::shape_source::StaticNetwork;

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Timing and retry knobs for refresh cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSettings {
    pub cycle_deadline: Duration,
    pub staleness_threshold: Duration,
    /// Extra attempts per endpoint after a failed fetch.
    pub fetch_retries: u32,
    pub retry_backoff: Duration,
}

impl RefreshSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            cycle_deadline: config.cycle_deadline(),
            staleness_threshold: config.staleness_threshold(),
            fetch_retries: config.fetch_retries,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Result of one call to [`RefreshCache::refresh_once`].
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A new snapshot was published.
    Refreshed { cycle: u64 },
    /// The cycle failed; the previous snapshot is still served.
    Failed { cycle: u64, error: CycleError },
    /// Another cycle was already running.
    Skipped,
}

/// Health of the refresh loop, for operators.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct RefreshStatus {
    pub cycles_attempted: u64,
    pub consecutive_failures: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct RefreshCache {
    fetcher: Arc<dyn FeedFetcher>,
    endpoints: Vec<FeedEndpoint>,
    network: Arc<StaticNetwork>,
    clock: Arc<dyn Clock>,
    settings: RefreshSettings,
    snapshot: watch::Sender<Option<Arc<Snapshot>>>,
    cycle_guard: tokio::sync::Mutex<()>,
    cycles: AtomicU64,
    status: Mutex<RefreshStatus>,
}

impl RefreshCache {
    pub fn new(
        fetcher: Arc<dyn FeedFetcher>,
        endpoints: Vec<FeedEndpoint>,
        network: Arc<StaticNetwork>,
        clock: Arc<dyn Clock>,
        settings: RefreshSettings,
    ) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            fetcher,
            endpoints,
            network,
            clock,
            settings,
            snapshot,
            cycle_guard: tokio::sync::Mutex::new(()),
            cycles: AtomicU64::new(0),
            status: Mutex::new(RefreshStatus::default()),
        }
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    pub fn network(&self) -> &StaticNetwork {
        &self.network
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Latest snapshot and whether it is stale right now.
    pub fn current(&self) -> Result<(Arc<Snapshot>, bool), QueryError> {
        let snapshot = self
            .snapshot
            .borrow()
            .clone()
            .ok_or(QueryError::NotYetAvailable)?;
        let stale = snapshot.is_stale(self.clock.now(), self.settings.staleness_threshold);
        Ok((snapshot, stale))
    }

    /// Receiver notified every time a new snapshot is published.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.snapshot.subscribe()
    }

    pub fn status(&self) -> RefreshStatus {
        self.lock_status().clone()
    }

    /// Runs one refresh cycle unless one is already in flight.
    pub async fn refresh_once(&self) -> CycleOutcome {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            debug!("Refresh cycle already running, skipping");
            return CycleOutcome::Skipped;
        };

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let started = self.clock.now();
        let span = tracing::info_span!("refresh_cycle", cycle);

        let result = self.run_cycle(cycle).instrument(span).await;

        let mut status = self.lock_status();
        status.cycles_attempted = cycle;
        status.last_attempt = Some(started);

        match result {
            Ok(snapshot) => {
                info!(
                    cycle,
                    alerts = snapshot.alerts.len(),
                    stations = snapshot.arrivals.len(),
                    arrivals = snapshot.arrival_count(),
                    "Snapshot refreshed"
                );
                status.consecutive_failures = 0;
                status.last_success = Some(snapshot.fetched_at);
                status.last_error = None;
                self.snapshot.send_replace(Some(Arc::new(snapshot)));
                CycleOutcome::Refreshed { cycle }
            }
            Err(error) => {
                status.consecutive_failures += 1;
                status.last_error = Some(error.to_string());
                if let CycleError::Endpoints(failures) = &error {
                    for failure in failures {
                        warn!(
                            cycle,
                            endpoint = %failure.endpoint(),
                            kind = failure.kind(),
                            error = %failure,
                            "Endpoint failed"
                        );
                    }
                }
                error!(
                    cycle,
                    consecutive_failures = status.consecutive_failures,
                    error = %error,
                    "Refresh cycle failed, keeping previous snapshot"
                );
                CycleOutcome::Failed { cycle, error }
            }
        }
    }

    async fn run_cycle(&self, cycle: u64) -> Result<Snapshot, CycleError> {
        if self.endpoints.is_empty() {
            return Err(CycleError::NoEndpoints);
        }

        let mut tasks = JoinSet::new();
        for (index, endpoint) in self.endpoints.iter().cloned().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let retries = self.settings.fetch_retries;
            let backoff = self.settings.retry_backoff;
            let span = tracing::info_span!("endpoint", endpoint = %endpoint.name);
            tasks.spawn(
                async move {
                    let result = fetch_and_decode(fetcher.as_ref(), &endpoint, retries, backoff).await;
                    (index, result)
                }
                .instrument(span),
            );
        }

        let deadline = self.settings.cycle_deadline;
        let joined = tokio::time::timeout(deadline, async {
            let mut joined = Vec::with_capacity(self.endpoints.len());
            while let Some(result) = tasks.join_next().await {
                joined.push(result);
            }
            joined
        })
        .await
        .map_err(|_| CycleError::DeadlineElapsed {
            deadline_secs: deadline.as_secs(),
        })?;

        let mut slots: Vec<Option<(DateTime<Utc>, DecodedFeed)>> = vec![None; self.endpoints.len()];
        let mut failures = Vec::new();
        for result in joined {
            let (index, outcome) = result.map_err(|e| CycleError::Task(e.to_string()))?;
            match outcome {
                Ok(decoded) => slots[index] = Some(decoded),
                Err(e) => failures.push(e),
            }
        }
        if !failures.is_empty() {
            failures.sort_by(|a, b| a.endpoint().cmp(b.endpoint()));
            return Err(CycleError::Endpoints(failures));
        }

        let mut fetched_at: Option<DateTime<Utc>> = None;
        let mut feeds = Vec::with_capacity(slots.len());
        for (endpoint, slot) in self.endpoints.iter().zip(slots) {
            let Some((at, feed)) = slot else {
                return Err(CycleError::Task(format!("no result for {}", endpoint.name)));
            };
            fetched_at = Some(fetched_at.map_or(at, |earliest| earliest.min(at)));
            feeds.push((endpoint.name.clone(), feed));
        }

        let fetched_at = fetched_at.unwrap_or_else(|| self.clock.now());
        Ok(Snapshot::build(cycle, feeds, &self.network, fetched_at))
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, RefreshStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Fetches one endpoint with retries, then decodes it. Decode failures are
/// not retried.
async fn fetch_and_decode(
    fetcher: &dyn FeedFetcher,
    endpoint: &FeedEndpoint,
    retries: u32,
    backoff: Duration,
) -> Result<(DateTime<Utc>, DecodedFeed), EndpointError> {
    let mut attempt = 0;
    let payload = loop {
        match fetcher.fetch(endpoint).await {
            Ok(payload) => break payload,
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(attempt, kind = e.kind(), error = %e, "Fetch failed, retrying");
                tokio::time::sleep(backoff * attempt).await;
            }
            Err(source) => {
                return Err(EndpointError::Fetch {
                    endpoint: endpoint.name.clone(),
                    source,
                });
            }
        }
    };

    let feed = decode(&payload.bytes).map_err(|source| EndpointError::Decode {
        endpoint: endpoint.name.clone(),
        source,
    })?;
    debug!(
        alerts = feed.alerts.len(),
        arrivals = feed.arrivals.len(),
        "Feed decoded"
    );
    Ok((payload.fetched_at, feed))
}
