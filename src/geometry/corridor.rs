//! Corridor detection: which routes trace the same physical track.

use geo::{Distance, Haversine, Point};
use std::collections::{BTreeSet, HashMap};

use crate::model::LatLon;

const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// Slack on the grid cell size so projection error near the cell edge
/// cannot hide a neighbour that is within epsilon on the sphere.
const CELL_SLACK: f64 = 1.25;

/// Grid hash over every point of every shape, keyed by a local equirectangular
/// projection in meters.
struct PointGrid<'a> {
    shapes: &'a [&'a [LatLon]],
    epsilon: f64,
    cell: f64,
    meters_per_degree_lon: f64,
    cells: HashMap<(i64, i64), Vec<(usize, usize)>>,
}

impl<'a> PointGrid<'a> {
    fn new(shapes: &'a [&'a [LatLon]], epsilon: f64) -> Self {
        let (lat_sum, count) = shapes
            .iter()
            .flat_map(|s| s.iter())
            .fold((0.0, 0usize), |(sum, n), p| (sum + p.lat, n + 1));
        let mean_lat = if count == 0 { 0.0 } else { lat_sum / count as f64 };

        let mut grid = Self {
            shapes,
            epsilon,
            cell: epsilon * CELL_SLACK,
            meters_per_degree_lon: METERS_PER_DEGREE_LAT * mean_lat.to_radians().cos().max(0.01),
            cells: HashMap::new(),
        };

        for (r, shape) in shapes.iter().enumerate() {
            for (i, p) in shape.iter().enumerate() {
                let key = grid.cell_of(*p);
                grid.cells.entry(key).or_default().push((r, i));
            }
        }
        grid
    }

    fn cell_of(&self, p: LatLon) -> (i64, i64) {
        (
            (p.lon * self.meters_per_degree_lon / self.cell).floor() as i64,
            (p.lat * METERS_PER_DEGREE_LAT / self.cell).floor() as i64,
        )
    }

    fn is_near(&self, a: LatLon, b: LatLon) -> bool {
        Haversine.distance(Point::from(a), Point::from(b)) <= self.epsilon
    }

    /// Points of *other* routes within epsilon of point `i` of route `r`.
    fn neighbours(&self, r: usize, i: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let p = self.shapes[r][i];
        let (cx, cy) = self.cell_of(p);

        (-1..=1)
            .flat_map(move |dx| (-1..=1).map(move |dy| (cx + dx, cy + dy)))
            .filter_map(move |key| self.cells.get(&key))
            .flatten()
            .copied()
            .filter(move |&(s, j)| s != r && self.is_near(p, self.shapes[s][j]))
    }
}

/// A segment of one shape: `(shape index, segment index)`, where segment `k`
/// runs from point `k` to point `k + 1`.
pub(crate) type SegmentRef = (usize, usize);

/// For every segment of every shape, the segments of other shapes that run
/// along it in either direction.
pub(crate) fn shared_segments(
    shapes: &[&[LatLon]],
    epsilon: f64,
) -> Vec<Vec<BTreeSet<SegmentRef>>> {
    let mut sharers: Vec<Vec<BTreeSet<SegmentRef>>> = shapes
        .iter()
        .map(|s| vec![BTreeSet::new(); s.len().saturating_sub(1)])
        .collect();

    if epsilon.is_nan() || epsilon <= 0.0 {
        return sharers;
    }

    let grid = PointGrid::new(shapes, epsilon);

    let mut pairs: Vec<(SegmentRef, SegmentRef)> = Vec::new();
    for (r, shape) in shapes.iter().enumerate() {
        for k in 0..shape.len().saturating_sub(1) {
            let next = shape[k + 1];
            for (s, j) in grid.neighbours(r, k) {
                let other = shapes[s];
                if other.get(j + 1).is_some_and(|q| grid.is_near(next, *q)) {
                    pairs.push(((r, k), (s, j)));
                }
                if let Some(prev) = j.checked_sub(1) {
                    if grid.is_near(next, other[prev]) {
                        pairs.push(((r, k), (s, prev)));
                    }
                }
            }
        }
    }

    // sharing is symmetric even where the point tests are not
    for ((r, k), (s, j)) in pairs {
        sharers[r][k].insert((s, j));
        sharers[s][j].insert((r, k));
    }

    sharers
}

/// Union-find over every segment of every shape.
struct Components {
    parent: Vec<usize>,
}

impl Components {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

/// Offset factor per point, in units of the base offset. `None` marks a
/// point outside any corridor.
///
/// A corridor is a connected run of shared segments: segments that run along
/// each other, chained through consecutive shared segments of the same
/// route. Every route in a corridor gets one rank for its whole length, in
/// shape order (callers sort by route id), centred on zero: three routes get
/// -1, 0 and +1. Two routes on the same segment therefore always agree on
/// their rank difference, even where other routes join or leave.
pub(crate) fn corridor_factors(sharers: &[Vec<BTreeSet<SegmentRef>>]) -> Vec<Vec<Option<f64>>> {
    let mut first = Vec::with_capacity(sharers.len());
    let mut total = 0;
    for segments in sharers {
        first.push(total);
        total += segments.len();
    }
    let node = |(r, k): SegmentRef| first[r] + k;

    let mut components = Components::new(total);
    for (r, segments) in sharers.iter().enumerate() {
        for (k, matched) in segments.iter().enumerate() {
            if matched.is_empty() {
                continue;
            }
            for &other in matched {
                components.union(node((r, k)), node(other));
            }
            if segments.get(k + 1).is_some_and(|next| !next.is_empty()) {
                components.union(node((r, k)), node((r, k + 1)));
            }
        }
    }

    let roots: Vec<usize> = (0..total).map(|n| components.find(n)).collect();

    // routes per corridor, keyed by component root
    let mut members: HashMap<usize, BTreeSet<usize>> = HashMap::new();
    for (r, segments) in sharers.iter().enumerate() {
        for (k, matched) in segments.iter().enumerate() {
            if !matched.is_empty() {
                members.entry(roots[node((r, k))]).or_default().insert(r);
            }
        }
    }

    sharers
        .iter()
        .enumerate()
        .map(|(r, segments)| {
            let points = if segments.is_empty() { 0 } else { segments.len() + 1 };
            (0..points)
                .map(|i| {
                    // consecutive shared segments sit in one corridor, so
                    // either neighbour gives the same answer
                    let k = [i.checked_sub(1), Some(i)]
                        .into_iter()
                        .flatten()
                        .find(|&k| segments.get(k).is_some_and(|m| !m.is_empty()))?;
                    let group = members.get(&roots[node((r, k))])?;
                    let rank = group.iter().position(|&g| g == r)?;
                    Some(rank as f64 - (group.len() - 1) as f64 / 2.0)
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shares_with(matched: &BTreeSet<SegmentRef>, route: usize) -> bool {
        matched.iter().any(|&(s, _)| s == route)
    }

    fn line(lat: f64, lon_start: f64, n: usize) -> Vec<LatLon> {
        (0..n)
            .map(|k| LatLon::new(lat, lon_start + k as f64 * 0.001))
            .collect()
    }

    #[test]
    fn test_identical_shapes_share_every_segment() {
        let a = line(40.7, -73.99, 4);
        let b = a.clone();
        let shapes: Vec<&[LatLon]> = vec![&a, &b];

        let sharers = shared_segments(&shapes, 5.0);
        assert!(sharers[0].iter().all(|s| shares_with(s, 1)));
        assert!(sharers[1].iter().all(|s| shares_with(s, 0)));
    }

    #[test]
    fn test_reverse_direction_is_shared() {
        let a = line(40.7, -73.99, 3);
        let mut b = a.clone();
        b.reverse();
        let shapes: Vec<&[LatLon]> = vec![&a, &b];

        let sharers = shared_segments(&shapes, 5.0);
        assert!(sharers[0].iter().all(|s| shares_with(s, 1)));
    }

    #[test]
    fn test_parallel_tracks_beyond_epsilon_are_separate() {
        let a = line(40.7, -73.99, 3);
        // about 11 m north
        let b = line(40.7001, -73.99, 3);
        let shapes: Vec<&[LatLon]> = vec![&a, &b];

        let sharers = shared_segments(&shapes, 5.0);
        assert!(sharers.iter().flatten().all(BTreeSet::is_empty));
    }

    #[test]
    fn test_crossing_at_one_point_is_not_a_corridor() {
        let a = line(40.7, -73.99, 3);
        let b = vec![
            LatLon::new(40.699, -73.989),
            a[1],
            LatLon::new(40.701, -73.989),
        ];
        let shapes: Vec<&[LatLon]> = vec![&a, &b];

        let sharers = shared_segments(&shapes, 5.0);
        assert!(sharers.iter().flatten().all(BTreeSet::is_empty));
    }

    #[test]
    fn test_factors_are_centred() {
        let a = line(40.7, -73.99, 3);
        let shapes: Vec<&[LatLon]> = vec![&a, &a, &a];
        let factors = corridor_factors(&shared_segments(&shapes, 5.0));

        for i in 0..3 {
            assert_eq!(factors[0][i], Some(-1.0));
            assert_eq!(factors[1][i], Some(0.0));
            assert_eq!(factors[2][i], Some(1.0));
        }
    }

    #[test]
    fn test_two_routes_get_half_steps() {
        let a = line(40.7, -73.99, 2);
        let shapes: Vec<&[LatLon]> = vec![&a, &a];
        let factors = corridor_factors(&shared_segments(&shapes, 5.0));
        assert_eq!(factors[0], vec![Some(-0.5), Some(-0.5)]);
        assert_eq!(factors[1], vec![Some(0.5), Some(0.5)]);
    }

    #[test]
    fn test_rank_holds_across_a_junction() {
        // A and B share the first five segments, then A turns south while C
        // comes in from the north and runs with B to the end.
        let trunk = line(40.7, -73.99, 11);
        let mut a = trunk[..=5].to_vec();
        a.extend((1..=3).map(|k| LatLon::new(40.7 - k as f64 * 0.001, trunk[5].lon)));
        let b = trunk.clone();
        let mut c: Vec<LatLon> = (1..=3)
            .rev()
            .map(|k| LatLon::new(40.7 + k as f64 * 0.001, trunk[5].lon))
            .collect();
        c.extend_from_slice(&trunk[5..]);
        let shapes: Vec<&[LatLon]> = vec![&a, &b, &c];

        let factors = corridor_factors(&shared_segments(&shapes, 5.0));

        assert!(factors[0][..=5].iter().all(|f| *f == Some(-1.0)));
        assert!(factors[0][6..].iter().all(Option::is_none));
        assert!(factors[1].iter().all(|f| *f == Some(0.0)));
        assert!(factors[2][..3].iter().all(Option::is_none));
        assert!(factors[2][3..].iter().all(|f| *f == Some(1.0)));
    }

    #[test]
    fn test_separate_corridors_rank_independently() {
        let a = line(40.7, -73.99, 3);
        let far = line(40.8, -73.99, 3);
        let shapes: Vec<&[LatLon]> = vec![&a, &a, &far, &far];
        let factors = corridor_factors(&shared_segments(&shapes, 5.0));

        assert_eq!(factors[0][0], Some(-0.5));
        assert_eq!(factors[1][0], Some(0.5));
        assert_eq!(factors[2][0], Some(-0.5));
        assert_eq!(factors[3][0], Some(0.5));
    }

    #[test]
    fn test_zero_epsilon_disables_corridors() {
        let a = line(40.7, -73.99, 3);
        let shapes: Vec<&[LatLon]> = vec![&a, &a];
        let factors = corridor_factors(&shared_segments(&shapes, 0.0));
        assert!(factors.iter().flatten().all(Option::is_none));
    }
}
