use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::analyzers::severity::classify_detailed;
use crate::model::{Arrival, ClassifiedAlert, DecodedFeed};
use crate::services::shape_source::StaticNetwork;

/// A consistent view of every feed from one successful refresh cycle.
///
/// Never mutated after construction; readers hold it through an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Number of the refresh cycle that produced this snapshot.
    pub cycle: u64,
    /// Alerts in endpoint order, then feed order.
    pub alerts: Vec<ClassifiedAlert>,
    /// Arrivals per known station, ascending by predicted time.
    pub arrivals: BTreeMap<String, Vec<Arrival>>,
    /// When the oldest payload of the cycle was fetched.
    pub fetched_at: DateTime<Utc>,
    /// Header timestamp reported by each endpoint.
    pub feed_timestamps: BTreeMap<String, Option<DateTime<Utc>>>,
}

impl Snapshot {
    /// Classifies alerts and groups arrivals by station.
    ///
    /// `feeds` must be in endpoint configuration order. Arrivals are filed
    /// under the station their stop resolves to in `network` and dropped when
    /// it resolves to none; alerts naming unknown routes are kept and flagged.
    pub fn build(
        cycle: u64,
        feeds: Vec<(String, DecodedFeed)>,
        network: &StaticNetwork,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let mut alerts = Vec::new();
        let mut arrivals: BTreeMap<String, Vec<Arrival>> = BTreeMap::new();
        let mut feed_timestamps = BTreeMap::new();
        let mut dropped_arrivals = 0usize;

        for (endpoint, feed) in feeds {
            feed_timestamps.insert(endpoint, feed.feed_timestamp);

            for alert in feed.alerts {
                let unknown_routes = alert
                    .affected_routes
                    .iter()
                    .filter(|r| !network.is_known_route(r))
                    .cloned()
                    .collect();
                let classification = classify_detailed(&alert);
                alerts.push(ClassifiedAlert {
                    alert,
                    classification,
                    unknown_routes,
                });
            }

            for mut arrival in feed.arrivals {
                let resolved = network
                    .resolve_station(&arrival.stop_id, &arrival.station_id)
                    .map(str::to_string);
                match resolved {
                    Some(station) => {
                        arrival.station_id.clone_from(&station);
                        arrivals.entry(station).or_default().push(arrival);
                    }
                    None => dropped_arrivals += 1,
                }
            }
        }

        for list in arrivals.values_mut() {
            list.sort_by(|a, b| {
                a.arrival_time
                    .cmp(&b.arrival_time)
                    .then_with(|| a.route_id.cmp(&b.route_id))
                    .then_with(|| a.trip_id.cmp(&b.trip_id))
            });
        }

        if dropped_arrivals > 0 {
            debug!(cycle, dropped_arrivals, "Dropped arrivals at unknown stations");
        }

        Self {
            cycle,
            alerts,
            arrivals,
            fetched_at,
            feed_timestamps,
        }
    }

    /// Arrivals at a station; empty when there are none.
    pub fn arrivals_at(&self, station_id: &str) -> &[Arrival] {
        self.arrivals
            .get(station_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.fetched_at
    }

    /// True once more than `threshold` has passed since the data was fetched.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match chrono::Duration::from_std(threshold) {
            Ok(threshold) => self.age(now) > threshold,
            Err(_) => false,
        }
    }

    pub fn arrival_count(&self) -> usize {
        self.arrivals.values().map(Vec::len).sum()
    }
}
