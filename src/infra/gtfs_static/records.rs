//! Row types for the static GTFS files. Columns not listed are ignored.

use serde::Deserialize;
use std::collections::BTreeSet;

use crate::model::{RouteInfo, Station};

#[derive(Debug, Deserialize)]
pub(crate) struct RouteRecord {
    pub(crate) route_id: String,
    #[serde(default)]
    pub(crate) route_short_name: Option<String>,
    #[serde(default)]
    pub(crate) route_long_name: Option<String>,
    #[serde(default)]
    pub(crate) route_color: Option<String>,
}

impl RouteRecord {
    pub(crate) fn into_route_info(self) -> RouteInfo {
        RouteInfo {
            id: self.route_id,
            short_name: self.route_short_name.unwrap_or_default(),
            long_name: self.route_long_name.unwrap_or_default(),
            color: self
                .route_color
                .filter(|c| !c.is_empty())
                .map(|c| format!("#{}", c.trim_start_matches('#').to_uppercase())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TripRecord {
    pub(crate) route_id: String,
    pub(crate) trip_id: String,
    #[serde(default)]
    pub(crate) shape_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ShapePointRecord {
    pub(crate) shape_id: String,
    pub(crate) shape_pt_lat: f64,
    pub(crate) shape_pt_lon: f64,
    pub(crate) shape_pt_sequence: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StopRecord {
    pub(crate) stop_id: String,
    #[serde(default)]
    pub(crate) stop_name: Option<String>,
    pub(crate) stop_lat: f64,
    pub(crate) stop_lon: f64,
    #[serde(default)]
    pub(crate) location_type: Option<u8>,
    #[serde(default)]
    pub(crate) parent_station: Option<String>,
}

impl StopRecord {
    /// Parent stations, plus stand-alone stops that have no parent.
    pub(crate) fn is_station(&self) -> bool {
        match self.location_type {
            Some(1) => true,
            None | Some(0) => self.parent_station.as_deref().is_none_or(str::is_empty),
            _ => false,
        }
    }

    pub(crate) fn into_station(self, lines: BTreeSet<String>) -> Station {
        Station {
            name: self.stop_name.unwrap_or_else(|| self.stop_id.clone()),
            id: self.stop_id,
            lat: self.stop_lat,
            lon: self.stop_lon,
            lines,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct StopTimeRecord {
    pub(crate) trip_id: String,
    pub(crate) stop_id: String,
    pub(crate) stop_sequence: u32,
}
