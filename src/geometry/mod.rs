//! Route Geometry Engine.
//!
//! Routes that run along the same track would draw on top of each other. For
//! every corridor of shared segments each route is pushed sideways by a
//! multiple of a base offset, ranked by route id, so the bundle is centred on
//! the real track. Offsets fade back to zero over a transition window where a
//! route leaves the corridor.

mod corridor;
mod offset;

use std::collections::BTreeSet;
use tracing::debug;

use crate::config::GeometryConfig;
use crate::model::{LatLon, OffsetPolyline, RouteShape};

/// Computes display polylines for the routes in `active_routes`.
///
/// Output is sorted by route id and deterministic for a given input. Routes
/// outside any corridor and shapes with fewer than two points come back with
/// their points unchanged. When a route id appears more than once in
/// `shapes`, the first shape wins.
pub fn compute_offset_polylines(
    shapes: &[RouteShape],
    active_routes: &BTreeSet<String>,
    config: &GeometryConfig,
) -> Vec<OffsetPolyline> {
    let mut selected: Vec<&RouteShape> = Vec::new();
    let mut seen = BTreeSet::new();
    for shape in shapes {
        if active_routes.contains(&shape.route_id) && seen.insert(shape.route_id.as_str()) {
            selected.push(shape);
        }
    }
    selected.sort_by(|a, b| a.route_id.cmp(&b.route_id));

    let point_sets: Vec<&[LatLon]> = selected
        .iter()
        .map(|s| if s.points.len() < 2 { &[][..] } else { s.points.as_slice() })
        .collect();

    let sharers = corridor::shared_segments(&point_sets, config.corridor_epsilon_meters);
    let factors = corridor::corridor_factors(&sharers);

    let polylines: Vec<OffsetPolyline> = selected
        .iter()
        .zip(factors.iter())
        .map(|(shape, factors)| {
            let points = if shape.points.len() < 2 {
                shape.points.clone()
            } else {
                offset::offset_shape(
                    &shape.points,
                    factors,
                    config.offset_base_meters,
                    config.transition_meters,
                )
            };
            OffsetPolyline {
                route_id: shape.route_id.clone(),
                points,
                color: shape.color.clone(),
            }
        })
        .collect();

    let in_corridor = factors
        .iter()
        .filter(|f| f.iter().any(Option::is_some))
        .count();
    debug!(
        routes = polylines.len(),
        in_corridor, "Computed offset polylines"
    );

    polylines
}
