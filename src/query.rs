//! Read-side facade over the refresh cache and the static network.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::analyzers::status::aggregate_status;
use crate::analyzers::types::ServiceStatus;
use crate::cache::{self, CycleOutcome, RefreshCache, RefreshHandle, RefreshSettings, RefreshStatus, Snapshot};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::QueryError;
use crate::fetch::FeedFetcher;
use crate::geometry::compute_offset_polylines;
use crate::model::{Arrival, OffsetPolyline, Station};
use crate::services::shape_source::StaticNetwork;

/// A query result together with the freshness of the data behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cached<T> {
    pub value: T,
    pub cycle: u64,
    pub fetched_at: DateTime<Utc>,
    pub is_stale: bool,
}

impl<T> Cached<T> {
    fn from_snapshot(value: T, snapshot: &Snapshot, is_stale: bool) -> Self {
        Self {
            value,
            cycle: snapshot.cycle,
            fetched_at: snapshot.fetched_at,
            is_stale,
        }
    }
}

/// Entry point for consumers: service status, arrivals and route geometry.
pub struct TransitEngine {
    cache: Arc<RefreshCache>,
    network: Arc<StaticNetwork>,
    polylines: Vec<OffsetPolyline>,
    arrivals_limit: usize,
    refresh_interval: Duration,
}

impl TransitEngine {
    /// Builds the engine. Route geometry is computed here, once.
    pub fn new(
        config: &EngineConfig,
        fetcher: Arc<dyn FeedFetcher>,
        network: StaticNetwork,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let network = Arc::new(network);

        let all_routes: BTreeSet<String> = network
            .shapes
            .iter()
            .map(|s| s.route_id.clone())
            .collect();
        let polylines = compute_offset_polylines(&network.shapes, &all_routes, &config.geometry);

        let cache = Arc::new(RefreshCache::new(
            fetcher,
            config.endpoints(),
            Arc::clone(&network),
            clock,
            RefreshSettings::from_config(config),
        ));

        Self {
            cache,
            network,
            polylines,
            arrivals_limit: config.arrivals_limit,
            refresh_interval: config.refresh_interval(),
        }
    }

    /// Per-route status from the alerts active right now.
    pub fn service_status(&self) -> Result<Cached<ServiceStatus>, QueryError> {
        let (snapshot, is_stale) = self.cache.current()?;
        let now = self.cache.clock().now();
        let status = aggregate_status(&snapshot.alerts, &self.network.routes, now);
        Ok(Cached::from_snapshot(status, &snapshot, is_stale))
    }

    /// Upcoming arrivals at a station, soonest first. Empty for a station
    /// without predictions, including ids the static data does not know.
    pub fn arrivals(&self, station_id: &str) -> Result<Cached<Vec<Arrival>>, QueryError> {
        let (snapshot, is_stale) = self.cache.current()?;
        if !self.network.is_known_station(station_id) {
            debug!(station_id, "Arrivals requested for unknown station");
        }
        let arrivals: Vec<Arrival> = snapshot
            .arrivals_at(station_id)
            .iter()
            .take(self.arrivals_limit)
            .cloned()
            .collect();
        Ok(Cached::from_snapshot(arrivals, &snapshot, is_stale))
    }

    /// Display geometry for every route with a shape, sorted by route id.
    pub fn route_polylines(&self) -> &[OffsetPolyline] {
        &self.polylines
    }

    pub fn stations(&self) -> impl Iterator<Item = &Station> {
        self.network.stations.values()
    }

    pub fn current(&self) -> Result<(Arc<Snapshot>, bool), QueryError> {
        self.cache.current()
    }

    pub fn refresh_status(&self) -> RefreshStatus {
        self.cache.status()
    }

    pub async fn refresh_once(&self) -> CycleOutcome {
        self.cache.refresh_once().await
    }

    /// Starts the background refresh loop at the configured interval.
    pub fn spawn_refresh(&self) -> RefreshHandle {
        cache::spawn(Arc::clone(&self.cache), self.refresh_interval)
    }

    pub fn cache(&self) -> &Arc<RefreshCache> {
        &self.cache
    }

    pub fn network(&self) -> &StaticNetwork {
        &self.network
    }
}
