//! Normalized domain records produced from the feeds and the static dataset.
//!
//! Everything here is plain data: no framework types, `serde::Serialize`
//! throughout so the request layer can hand records straight to a JSON
//! encoder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Text shown for a route without any active alert.
pub const GOOD_SERVICE_TEXT: &str = "Good Service";

/// Severity assigned to an alert, ordered from least to most disruptive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeverityTier {
    Good,
    Delay,
    ServiceChange,
}

impl SeverityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityTier::Good => "good",
            SeverityTier::Delay => "delay",
            SeverityTier::ServiceChange => "service-change",
        }
    }
}

/// Structured effect carried by a GTFS-RT alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertEffect {
    NoService,
    ReducedService,
    SignificantDelays,
    Detour,
    AdditionalService,
    ModifiedService,
    OtherEffect,
    UnknownEffect,
    StopMoved,
    NoEffect,
    AccessibilityIssue,
}

impl AlertEffect {
    /// Parses an effect label such as `"NO_SERVICE"` or the vendor shorthand
    /// `"DELAYS"`. Case and separators (`_`, `-`, space) are ignored.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();

        let effect = match normalized.as_str() {
            "NO_SERVICE" => AlertEffect::NoService,
            "REDUCED_SERVICE" => AlertEffect::ReducedService,
            "SIGNIFICANT_DELAYS" | "DELAYS" | "DELAY" => AlertEffect::SignificantDelays,
            "DETOUR" => AlertEffect::Detour,
            "ADDITIONAL_SERVICE" => AlertEffect::AdditionalService,
            "MODIFIED_SERVICE" => AlertEffect::ModifiedService,
            "OTHER_EFFECT" => AlertEffect::OtherEffect,
            "UNKNOWN_EFFECT" => AlertEffect::UnknownEffect,
            "STOP_MOVED" => AlertEffect::StopMoved,
            "NO_EFFECT" => AlertEffect::NoEffect,
            "ACCESSIBILITY_ISSUE" => AlertEffect::AccessibilityIssue,
            _ => return None,
        };
        Some(effect)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertCause {
    UnknownCause,
    OtherCause,
    TechnicalProblem,
    Strike,
    Demonstration,
    Accident,
    Holiday,
    Weather,
    Maintenance,
    Construction,
    PoliceActivity,
    MedicalEmergency,
}

/// A window during which an alert applies. Missing bounds are open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActivePeriod {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl ActivePeriod {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| start <= at) && self.end.is_none_or(|end| at <= end)
    }
}

/// A decoded service alert, before classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: String,
    pub affected_routes: BTreeSet<String>,
    pub header: String,
    pub description: String,
    pub url: Option<String>,
    /// Empty means the alert is always active.
    pub active_periods: Vec<ActivePeriod>,
    pub effect: Option<AlertEffect>,
    pub cause: Option<AlertCause>,
}

impl Alert {
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.active_periods.is_empty() || self.active_periods.iter().any(|p| p.contains(at))
    }

    pub fn affects(&self, route_id: &str) -> bool {
        self.affected_routes.contains(route_id)
    }

    /// Header and description joined for compact display.
    pub fn combined_text(&self) -> String {
        match (self.header.is_empty(), self.description.is_empty()) {
            (false, false) => format!("{} — {}", self.header, self.description),
            (false, true) => self.header.clone(),
            (true, false) => self.description.clone(),
            (true, true) => "Service alert".to_string(),
        }
    }
}

/// What the classifier based its decision on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationBasis {
    Effect,
    Text,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub tier: SeverityTier,
    pub basis: ClassificationBasis,
    /// Set when the decision rests on weak or conflicting evidence.
    pub ambiguous: bool,
}

/// An alert together with its derived severity. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedAlert {
    #[serde(flatten)]
    pub alert: Alert,
    pub classification: Classification,
    /// Affected routes missing from the static dataset. They stay in
    /// `alert.affected_routes` as well.
    pub unknown_routes: BTreeSet<String>,
}

impl ClassifiedAlert {
    pub fn tier(&self) -> SeverityTier {
        self.classification.tier
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Direction {
    Uptown,
    Downtown,
    Unknown,
}

/// A predicted arrival of a trip at a station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Arrival {
    pub station_id: String,
    pub stop_id: String,
    pub route_id: String,
    pub direction: Direction,
    pub arrival_time: DateTime<Utc>,
    pub trip_id: String,
}

impl Arrival {
    /// Whole minutes until arrival, never negative.
    pub fn minutes_away(&self, now: DateTime<Utc>) -> i64 {
        (self.arrival_time - now).num_minutes().max(0)
    }
}

/// Everything one feed payload contributed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFeed {
    pub feed_timestamp: Option<DateTime<Utc>>,
    pub alerts: Vec<Alert>,
    pub arrivals: Vec<Arrival>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl From<LatLon> for geo::Point<f64> {
    fn from(p: LatLon) -> Self {
        geo::Point::new(p.lon, p.lat)
    }
}

impl From<geo::Point<f64>> for LatLon {
    fn from(p: geo::Point<f64>) -> Self {
        LatLon::new(p.y(), p.x())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteInfo {
    pub id: String,
    pub short_name: String,
    pub long_name: String,
    pub color: Option<String>,
}

/// Static geometry of one route. Loaded once, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteShape {
    pub route_id: String,
    pub points: Vec<LatLon>,
    pub color: Option<String>,
}

/// A route's geometry after lateral separation from co-corridor routes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffsetPolyline {
    pub route_id: String,
    pub points: Vec<LatLon>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    /// Routes with at least one scheduled trip stopping here.
    pub lines: BTreeSet<String>,
}
