//! Perpendicular displacement of a single route along its corridor factors.

use geo::{Bearing, Destination, Distance, Haversine, InterpolatePoint, Point};

use crate::model::LatLon;

/// Points closer than this are treated as duplicates when estimating the
/// local direction of travel.
const MIN_STEP_METERS: f64 = 0.01;

fn distance(a: LatLon, b: LatLon) -> f64 {
    Haversine.distance(Point::from(a), Point::from(b))
}

/// Cumulative path distance in meters at every point.
pub(crate) fn path_distances(points: &[LatLon]) -> Vec<f64> {
    let mut total = 0.0;
    let mut out = Vec::with_capacity(points.len());
    for (i, p) in points.iter().enumerate() {
        if i > 0 {
            total += distance(points[i - 1], *p);
        }
        out.push(total);
    }
    out
}

/// Bearing of travel at point `i`, looking through duplicate points.
pub(crate) fn direction_at(points: &[LatLon], i: usize) -> Option<f64> {
    let here = points[i];
    let prev = points[..i]
        .iter()
        .rev()
        .find(|p| distance(**p, here) > MIN_STEP_METERS);
    let next = points[i + 1..]
        .iter()
        .find(|p| distance(**p, here) > MIN_STEP_METERS);

    let (from, to) = match (prev, next) {
        (Some(a), Some(b)) => (*a, *b),
        (None, Some(b)) => (here, *b),
        (Some(a), None) => (*a, here),
        (None, None) => return None,
    };
    Some(Haversine.bearing(Point::from(from), Point::from(to)))
}

/// Perpendicular for a bearing, folded so that both directions of travel
/// along the same line share one side convention.
pub(crate) fn perpendicular(bearing: f64) -> f64 {
    bearing.rem_euclid(180.0) + 90.0
}

/// Moves `p` by `offset` meters along `perpendicular`; negative offsets go
/// the other way.
pub(crate) fn displace(p: LatLon, perpendicular: f64, offset: f64) -> LatLon {
    if offset == 0.0 {
        return p;
    }
    let bearing = if offset < 0.0 {
        perpendicular + 180.0
    } else {
        perpendicular
    };
    Haversine
        .destination(Point::from(p), bearing.rem_euclid(360.0), offset.abs())
        .into()
}

/// Inserts a ramp-end point on every corridor boundary segment longer than
/// `window`, so the ramp finishes at the right distance instead of being
/// stretched over the whole segment.
pub(crate) fn insert_ramp_ends(
    points: &[LatLon],
    factors: &[Option<f64>],
    window: f64,
) -> (Vec<LatLon>, Vec<Option<f64>>) {
    let mut out_points = Vec::with_capacity(points.len());
    let mut out_factors = Vec::with_capacity(factors.len());

    for i in 0..points.len() {
        out_points.push(points[i]);
        out_factors.push(factors[i]);

        let Some(next) = points.get(i + 1) else {
            continue;
        };
        let leaving = factors[i].is_some() && factors[i + 1].is_none();
        let entering = factors[i].is_none() && factors[i + 1].is_some();
        if !(leaving || entering) || window <= 0.0 {
            continue;
        }

        let length = distance(points[i], *next);
        if length <= window {
            continue;
        }
        let ratio = if leaving {
            window / length
        } else {
            (length - window) / length
        };
        let ramp_end = Haversine.point_at_ratio_between(Point::from(points[i]), Point::from(*next), ratio);
        out_points.push(ramp_end.into());
        out_factors.push(None);
    }

    (out_points, out_factors)
}

/// Effective factor at every point: corridor points keep theirs, other
/// points fade linearly from the nearest corridor point over `window`
/// meters of path distance.
pub(crate) fn ramped_factors(factors: &[Option<f64>], distances: &[f64], window: f64) -> Vec<f64> {
    let mut last_left: Vec<Option<usize>> = Vec::with_capacity(factors.len());
    let mut seen = None;
    for (i, f) in factors.iter().enumerate() {
        if f.is_some() {
            seen = Some(i);
        }
        last_left.push(seen);
    }

    let mut next_right: Vec<Option<usize>> = vec![None; factors.len()];
    let mut seen = None;
    for i in (0..factors.len()).rev() {
        if factors[i].is_some() {
            seen = Some(i);
        }
        next_right[i] = seen;
    }

    factors
        .iter()
        .enumerate()
        .map(|(i, f)| {
            if let Some(f) = f {
                return *f;
            }
            if window <= 0.0 {
                return 0.0;
            }

            let left = last_left[i].map(|j| (distances[i] - distances[j], j));
            let right = next_right[i].map(|j| (distances[j] - distances[i], j));
            let nearest = match (left, right) {
                (Some(l), Some(r)) => Some(if r.0 < l.0 { r } else { l }),
                (l, r) => l.or(r),
            };

            match nearest {
                Some((d, j)) if d < window => factors[j].unwrap_or(0.0) * (1.0 - d / window),
                _ => 0.0,
            }
        })
        .collect()
}

/// Applies corridor factors to one shape.
pub(crate) fn offset_shape(
    points: &[LatLon],
    factors: &[Option<f64>],
    base_meters: f64,
    window: f64,
) -> Vec<LatLon> {
    if factors.iter().all(Option::is_none) {
        return points.to_vec();
    }

    let (points, factors) = insert_ramp_ends(points, factors, window);
    let distances = path_distances(&points);
    let effective = ramped_factors(&factors, &distances, window);

    (0..points.len())
        .map(|i| match direction_at(&points, i) {
            Some(bearing) if effective[i] != 0.0 => {
                displace(points[i], perpendicular(bearing), effective[i] * base_meters)
            }
            _ => points[i],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perpendicular_ignores_direction_of_travel() {
        assert_eq!(perpendicular(90.0), perpendicular(270.0));
        assert_eq!(perpendicular(10.0), perpendicular(190.0));
        assert_eq!(perpendicular(0.0), 90.0);
    }

    #[test]
    fn test_displace_moves_the_requested_distance() {
        let p = LatLon::new(40.75, -73.98);
        let moved = displace(p, 180.0, 12.0);
        assert!((distance(p, moved) - 12.0).abs() < 1e-6);
        assert!(moved.lat < p.lat);

        let back = displace(p, 180.0, -12.0);
        assert!(back.lat > p.lat);
        assert_eq!(displace(p, 180.0, 0.0), p);
    }

    #[test]
    fn test_direction_skips_duplicate_points() {
        let points = vec![
            LatLon::new(40.7, -73.99),
            LatLon::new(40.7, -73.99),
            LatLon::new(40.7, -73.989),
        ];
        let bearing = direction_at(&points, 0).unwrap();
        assert!((bearing - 90.0).abs() < 0.1);
        assert!(direction_at(&[points[0], points[0]], 0).is_none());
    }

    #[test]
    fn test_ramp_fades_linearly() {
        let factors = [Some(1.0), None, None, None];
        let distances = [0.0, 50.0, 100.0, 200.0];
        let ramped = ramped_factors(&factors, &distances, 150.0);

        assert_eq!(ramped[0], 1.0);
        assert!((ramped[1] - 2.0 / 3.0).abs() < 1e-9);
        assert!((ramped[2] - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(ramped[3], 0.0);
    }

    #[test]
    fn test_ramp_uses_nearest_corridor() {
        let factors = [Some(1.0), None, Some(-1.0)];
        let distances = [0.0, 100.0, 120.0];
        let ramped = ramped_factors(&factors, &distances, 150.0);
        assert!(ramped[1] < 0.0);
    }

    #[test]
    fn test_long_boundary_segment_gets_ramp_end() {
        let points = vec![LatLon::new(40.7, -73.99), LatLon::new(40.7, -73.98)];
        let (out, factors) = insert_ramp_ends(&points, &[Some(1.0), None], 150.0);

        assert_eq!(out.len(), 3);
        assert_eq!(factors, vec![Some(1.0), None, None]);
        assert!((distance(out[0], out[1]) - 150.0).abs() < 0.5);
    }

    #[test]
    fn test_short_boundary_segment_is_left_alone() {
        let points = vec![LatLon::new(40.7, -73.99), LatLon::new(40.7, -73.9895)];
        let (out, _) = insert_ramp_ends(&points, &[None, Some(0.5)], 150.0);
        assert_eq!(out, points);
    }

    #[test]
    fn test_unshared_shape_is_untouched() {
        let points = vec![LatLon::new(40.7, -73.99), LatLon::new(40.7, -73.98)];
        assert_eq!(offset_shape(&points, &[None, None], 12.0, 150.0), points);
    }
}
