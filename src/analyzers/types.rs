//! Records returned by the service status projection.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::model::SeverityTier;

/// One alert as shown against a route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMessage {
    pub alert_id: String,
    pub header: String,
    pub description: String,
    pub text: String,
    pub status: SeverityTier,
}

/// Status of a single route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteStatus {
    pub route_id: String,
    pub name: Option<String>,
    pub tier: SeverityTier,
    /// Text of the alert that decided `tier`, or "Good Service".
    pub message: String,
    pub messages: Vec<AlertMessage>,
    /// `false` when the route only appears in the feed, not in static data.
    pub known: bool,
}

/// Status of every route, keyed by route id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub routes: BTreeMap<String, RouteStatus>,
}

impl ServiceStatus {
    pub fn get(&self, route_id: &str) -> Option<&RouteStatus> {
        self.routes.get(route_id)
    }

    /// Number of routes whose tier is worse than good service.
    pub fn disrupted_count(&self) -> usize {
        self.routes
            .values()
            .filter(|r| r.tier != SeverityTier::Good)
            .count()
    }
}

impl std::ops::Index<&str> for ServiceStatus {
    type Output = RouteStatus;

    fn index(&self, route_id: &str) -> &RouteStatus {
        &self.routes[route_id]
    }
}
