use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analyzers::severity::classify;
use crate::cache::Snapshot;
use crate::gtfs_rt::FeedMessage;
use crate::model::{DecodedFeed, SeverityTier};

/// One row of feed health: what a payload or a refresh cycle contained.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct FeedStats {
    pub timestamp: DateTime<Utc>,
    pub feed_id: Option<String>,
    pub feed_name: Option<String>,
    pub cycle: Option<u64>,
    pub feed_timestamp: Option<DateTime<Utc>>,
    pub total_entities: usize,
    pub deleted_entities: usize,

    // entity types
    pub trip_updates: usize,
    pub alerts: usize,

    // trip update fields
    pub stop_time_updates: usize,
    pub with_arrival_time: usize,
    pub with_departure_only: usize,
    pub arrivals: usize,

    // alert fields
    pub with_effect: usize,
    pub with_active_period: usize,
    pub alerts_good: usize,
    pub alerts_delay: usize,
    pub alerts_service_change: usize,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl FeedStats {
    /// Raw entity counts straight from the protobuf message.
    pub fn from_feed(feed: &FeedMessage) -> Self {
        let mut s = FeedStats {
            timestamp: Utc::now(),
            total_entities: feed.entity.len(),
            ..Default::default()
        };

        for e in &feed.entity {
            if e.is_deleted.unwrap_or(false) {
                s.deleted_entities += 1;
            }

            if let Some(tu) = &e.trip_update {
                s.trip_updates += 1;

                for stu in &tu.stop_time_update {
                    s.stop_time_updates += 1;

                    let has_arrival = stu.arrival.as_ref().is_some_and(|a| a.time.is_some());
                    let has_departure = stu.departure.as_ref().is_some_and(|d| d.time.is_some());
                    if has_arrival {
                        s.with_arrival_time += 1;
                    } else if has_departure {
                        s.with_departure_only += 1;
                    }
                }
            }

            if let Some(alert) = &e.alert {
                s.alerts += 1;

                if alert.effect.is_some() {
                    s.with_effect += 1;
                }

                if !alert.active_period.is_empty() {
                    s.with_active_period += 1;
                }
            }
        }

        s
    }

    /// Adds what the decoder made of the same payload.
    pub fn with_decoded(mut self, decoded: &DecodedFeed) -> Self {
        self.feed_timestamp = decoded.feed_timestamp;
        self.arrivals = decoded.arrivals.len();
        for alert in &decoded.alerts {
            self.count_tier(classify(alert));
        }
        self
    }

    /// Summary of one published snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut s = FeedStats {
            timestamp: snapshot.fetched_at,
            cycle: Some(snapshot.cycle),
            alerts: snapshot.alerts.len(),
            arrivals: snapshot.arrival_count(),
            feed_timestamp: snapshot.feed_timestamps.values().flatten().max().copied(),
            ..Default::default()
        };
        for alert in &snapshot.alerts {
            s.count_tier(alert.tier());
        }
        s
    }

    fn count_tier(&mut self, tier: SeverityTier) {
        match tier {
            SeverityTier::Good => self.alerts_good += 1,
            SeverityTier::Delay => self.alerts_delay += 1,
            SeverityTier::ServiceChange => self.alerts_service_change += 1,
        }
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    /// Share of stop-time updates that carry a predicted arrival time.
    pub fn arrival_time_pct(&self) -> f64 {
        Self::pct(self.with_arrival_time, self.stop_time_updates)
    }

    /// Create an error record with timestamp and error information
    pub fn from_error(error_type: &str, error_message: &str) -> Self {
        FeedStats {
            timestamp: Utc::now(),
            error_type: Some(error_type.to_string()),
            error_message: Some(error_message.to_string()),
            ..Default::default()
        }
    }

    /// Set feed metadata (id and name)
    pub fn with_feed_info(mut self, feed_id: &str, feed_name: &str) -> Self {
        self.feed_id = Some(feed_id.to_string());
        self.feed_name = Some(feed_name.to_string());
        self
    }
}
