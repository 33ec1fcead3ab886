//! Trait and types for the static network dataset.

use std::collections::BTreeMap;

use crate::error::StaticDataError;
use crate::model::{RouteInfo, RouteShape, Station};

/// Static routes, their geometry and the stations they serve.
///
/// Loaded once at startup and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticNetwork {
    pub routes: BTreeMap<String, RouteInfo>,
    pub shapes: Vec<RouteShape>,
    pub stations: BTreeMap<String, Station>,
    /// Platform stop id to its parent station id.
    pub stop_parents: BTreeMap<String, String>,
}

impl StaticNetwork {
    pub fn is_known_route(&self, route_id: &str) -> bool {
        self.routes.contains_key(route_id)
    }

    pub fn is_known_station(&self, station_id: &str) -> bool {
        self.stations.contains_key(station_id)
    }

    /// Station serving a realtime stop id. The dataset's parent station
    /// wins; otherwise `fallback` (the stop id with its direction suffix
    /// stripped) or the stop id itself, when either is a known station.
    pub fn resolve_station<'a>(&'a self, stop_id: &'a str, fallback: &'a str) -> Option<&'a str> {
        if let Some(parent) = self
            .stop_parents
            .get(stop_id)
            .filter(|p| self.is_known_station(p))
        {
            return Some(parent.as_str());
        }
        [fallback, stop_id]
            .into_iter()
            .find(|id| self.is_known_station(id))
    }
}

/// Abstraction over a provider of static network data (e.g. a GTFS
/// directory on disk).
#[async_trait::async_trait]
pub trait ShapeSource {
    /// Loads the full dataset. Failure here is fatal for the engine.
    async fn load(&self) -> Result<StaticNetwork, StaticDataError>;
}
