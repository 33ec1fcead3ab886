//! Static GTFS directory loader.
//!
//! Reads `routes.txt`, `trips.txt`, `stops.txt` and either `shapes.txt` or,
//! when no shapes are published, `stop_times.txt`. Each route gets the
//! longest geometry any of its trips uses. When `stop_times.txt` is present
//! it also records which routes serve each station.

mod records;

use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::StaticDataError;
use crate::model::{LatLon, RouteInfo, RouteShape, Station};
use crate::services::shape_source::{ShapeSource, StaticNetwork};
use records::{RouteRecord, ShapePointRecord, StopRecord, StopTimeRecord, TripRecord};

/// A static GTFS feed unpacked into a directory.
#[derive(Debug, Clone)]
pub struct GtfsDirectory {
    dir: PathBuf,
}

impl GtfsDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Synchronous load, for callers outside a runtime.
    #[tracing::instrument(skip(self), fields(dir = %self.dir.display()))]
    pub fn load_blocking(&self) -> Result<StaticNetwork, StaticDataError> {
        let route_rows: Vec<RouteRecord> = read_required(&self.dir, "routes.txt")?;
        let trip_rows: Vec<TripRecord> = read_required(&self.dir, "trips.txt")?;
        let stop_rows: Vec<StopRecord> = read_required(&self.dir, "stops.txt")?;

        let routes: BTreeMap<String, RouteInfo> = route_rows
            .into_iter()
            .map(|r| (r.route_id.clone(), r.into_route_info()))
            .collect();

        let stop_times: Option<Vec<StopTimeRecord>> = read_optional(&self.dir, "stop_times.txt")?;

        let shape_points = match read_optional::<ShapePointRecord>(&self.dir, "shapes.txt")? {
            Some(rows) if !rows.is_empty() => shapes_from_shape_points(&trip_rows, rows),
            _ => {
                warn!("shapes.txt missing or empty, deriving geometry from stop_times.txt");
                let stop_times = stop_times
                    .as_deref()
                    .ok_or_else(|| StaticDataError::MissingFile("stop_times.txt".to_string()))?;
                shapes_from_stop_times(&trip_rows, stop_times, &stop_rows)
            }
        };

        let shapes: Vec<RouteShape> = shape_points
            .into_iter()
            .map(|(route_id, points)| RouteShape {
                color: routes.get(&route_id).and_then(|r| r.color.clone()),
                route_id,
                points,
            })
            .collect();

        if shapes.is_empty() {
            return Err(StaticDataError::NoShapes);
        }

        let stop_parents: BTreeMap<String, String> = stop_rows
            .iter()
            .filter_map(|s| {
                let parent = s.parent_station.as_deref().filter(|p| !p.is_empty())?;
                Some((s.stop_id.clone(), parent.to_string()))
            })
            .collect();

        let mut lines = stop_times
            .as_deref()
            .map(|st| lines_by_station(&trip_rows, st, &stop_parents))
            .unwrap_or_default();

        let stations: BTreeMap<String, Station> = stop_rows
            .into_iter()
            .filter(StopRecord::is_station)
            .map(|s| {
                let served = lines.remove(&s.stop_id).unwrap_or_default();
                (s.stop_id.clone(), s.into_station(served))
            })
            .collect();

        info!(
            routes = routes.len(),
            shapes = shapes.len(),
            stations = stations.len(),
            "Static network loaded"
        );

        Ok(StaticNetwork {
            routes,
            shapes,
            stations,
            stop_parents,
        })
    }
}

#[async_trait::async_trait]
impl ShapeSource for GtfsDirectory {
    async fn load(&self) -> Result<StaticNetwork, StaticDataError> {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.load_blocking()).await {
            Ok(result) => result,
            Err(e) => Err(StaticDataError::Read {
                path: self.dir.display().to_string(),
                source: std::io::Error::other(e.to_string()),
            }),
        }
    }
}

/// Picks, per route, the referenced shape with the most points.
fn shapes_from_shape_points(
    trips: &[TripRecord],
    rows: Vec<ShapePointRecord>,
) -> BTreeMap<String, Vec<LatLon>> {
    let mut by_shape: HashMap<String, Vec<(u32, LatLon)>> = HashMap::new();
    for row in rows {
        by_shape
            .entry(row.shape_id)
            .or_default()
            .push((row.shape_pt_sequence, LatLon::new(row.shape_pt_lat, row.shape_pt_lon)));
    }

    let mut route_shape_ids: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for trip in trips {
        if let Some(shape_id) = trip.shape_id.as_deref().filter(|s| !s.is_empty()) {
            route_shape_ids
                .entry(trip.route_id.as_str())
                .or_default()
                .push(shape_id);
        }
    }

    let mut result = BTreeMap::new();
    for (route_id, mut shape_ids) in route_shape_ids {
        shape_ids.sort_unstable();
        shape_ids.dedup();

        // longest shape, ties to the smallest shape id
        let best = shape_ids
            .iter()
            .filter_map(|id| by_shape.get(*id).map(|points| (*id, points)))
            .max_by(|(a_id, a), (b_id, b)| a.len().cmp(&b.len()).then(b_id.cmp(a_id)));

        if let Some((shape_id, points)) = best {
            let mut points = points.clone();
            points.sort_by_key(|(seq, _)| *seq);
            debug!(route_id, shape_id, points = points.len(), "Selected route shape");
            result.insert(
                route_id.to_string(),
                points.into_iter().map(|(_, p)| p).collect(),
            );
        }
    }
    result
}

/// Routes calling at each station, with platform stops folded into their
/// parent station.
fn lines_by_station(
    trips: &[TripRecord],
    stop_times: &[StopTimeRecord],
    stop_parents: &BTreeMap<String, String>,
) -> HashMap<String, BTreeSet<String>> {
    let trip_route: HashMap<&str, &str> = trips
        .iter()
        .map(|t| (t.trip_id.as_str(), t.route_id.as_str()))
        .collect();

    let mut lines: HashMap<String, BTreeSet<String>> = HashMap::new();
    for st in stop_times {
        let Some(route_id) = trip_route.get(st.trip_id.as_str()) else {
            continue;
        };
        let station = stop_parents.get(&st.stop_id).unwrap_or(&st.stop_id);
        lines
            .entry(station.clone())
            .or_default()
            .insert((*route_id).to_string());
    }
    lines
}

/// Builds geometry from the stop sequence of each route's longest trip.
fn shapes_from_stop_times(
    trips: &[TripRecord],
    stop_times: &[StopTimeRecord],
    stops: &[StopRecord],
) -> BTreeMap<String, Vec<LatLon>> {
    let stop_coords: HashMap<&str, LatLon> = stops
        .iter()
        .map(|s| (s.stop_id.as_str(), LatLon::new(s.stop_lat, s.stop_lon)))
        .collect();

    let trip_route: HashMap<&str, &str> = trips
        .iter()
        .map(|t| (t.trip_id.as_str(), t.route_id.as_str()))
        .collect();

    let mut trip_stops: BTreeMap<&str, Vec<(u32, &str)>> = BTreeMap::new();
    for st in stop_times {
        trip_stops
            .entry(st.trip_id.as_str())
            .or_default()
            .push((st.stop_sequence, st.stop_id.as_str()));
    }

    // route -> (trip id, ordered stop ids) of its longest trip
    let mut best: BTreeMap<&str, (&str, Vec<&str>)> = BTreeMap::new();
    for (trip_id, mut seq) in trip_stops {
        let Some(route_id) = trip_route.get(trip_id).copied() else {
            continue;
        };
        seq.sort_by_key(|(n, _)| *n);
        let ordered: Vec<&str> = seq.into_iter().map(|(_, stop)| stop).collect();

        let longer = best
            .get(route_id)
            .is_none_or(|(_, current)| ordered.len() > current.len());
        if longer {
            best.insert(route_id, (trip_id, ordered));
        }
    }

    best.into_iter()
        .map(|(route_id, (_, ordered))| {
            let mut seen = std::collections::HashSet::new();
            let points = ordered
                .into_iter()
                .filter(|stop| seen.insert(*stop))
                .filter_map(|stop| stop_coords.get(stop).copied())
                .collect();
            (route_id.to_string(), points)
        })
        .collect()
}

fn read_required<T: DeserializeOwned>(
    dir: &Path,
    name: &str,
) -> Result<Vec<T>, StaticDataError> {
    read_optional(dir, name)?.ok_or_else(|| StaticDataError::MissingFile(name.to_string()))
}

fn read_optional<T: DeserializeOwned>(
    dir: &Path,
    name: &str,
) -> Result<Option<Vec<T>>, StaticDataError> {
    let path = dir.join(name);
    if !path.exists() {
        return Ok(None);
    }

    let shown = path.display().to_string();
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(&path)
        .map_err(|source| StaticDataError::Csv {
            path: shown.clone(),
            source,
        })?;

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let record: T = result.map_err(|source| StaticDataError::Csv {
            path: shown.clone(),
            source,
        })?;
        rows.push(record);
    }

    debug!(path = %shown, rows = rows.len(), "Read static file");
    Ok(Some(rows))
}
