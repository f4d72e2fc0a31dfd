use std::collections::BTreeMap;
use std::time::Instant;

use log::debug;

use crate::geometry::{self, AreaGeometry, Point};
use crate::samples::AreaSample;

/// Best-area estimate for one recompute cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaDecision {
    pub area_id: Option<String>,
    pub distance: Option<f64>,
    pub decided_at: Instant,
}

impl AreaDecision {
    pub fn none(now: Instant) -> Self {
        AreaDecision {
            area_id: None,
            distance: None,
            decided_at: now,
        }
    }

    pub fn area(area_id: &str, distance: f64, now: Instant) -> Self {
        AreaDecision {
            area_id: Some(area_id.to_string()),
            distance: Some(distance),
            decided_at: now,
        }
    }
}

/// Picks the area the device is most likely in.
///
/// Every pair of sampled areas that both have geometry casts a vote for the
/// area containing the distance-weighted point between their reference
/// points. The most voted area wins, ties going to the smallest area id.
/// Without votes the nearest sampled area wins, again ties to the smallest id.
pub fn resolve(
    samples: &[AreaSample],
    geometries: &BTreeMap<String, AreaGeometry>,
    now: Instant,
) -> AreaDecision {
    let mut samples: Vec<&AreaSample> = samples.iter().collect();
    samples.sort_by(|a, b| a.area_id.cmp(&b.area_id));

    let votes = triangulation_votes(&samples, geometries);
    if let Some((winner, count)) = most_voted(&votes) {
        debug!("Triangulation votes: {votes:?}, winner {winner} ({count})");
        let distance = samples
            .iter()
            .find(|s| s.area_id == winner)
            .map_or(0.0, |s| s.distance);
        return AreaDecision::area(winner, distance, now);
    }

    match nearest(&samples) {
        Some(sample) => AreaDecision::area(&sample.area_id, sample.distance, now),
        None => AreaDecision::none(now),
    }
}

fn triangulation_votes<'a>(
    samples: &[&AreaSample],
    geometries: &'a BTreeMap<String, AreaGeometry>,
) -> BTreeMap<&'a str, usize> {
    let mut votes = BTreeMap::new();
    for (i, a) in samples.iter().enumerate() {
        let Some(ga) = geometries.get(&a.area_id) else {
            continue;
        };
        for b in &samples[i + 1..] {
            let Some(gb) = geometries.get(&b.area_id) else {
                continue;
            };
            let mid = weighted_midpoint(ga.point(), a.distance, gb.point(), b.distance);
            if let Some(area_id) = containing_area(geometries, mid) {
                *votes.entry(area_id).or_insert(0) += 1;
            }
        }
    }
    votes
}

/// Point between `a` and `b`, closer to whichever reference is nearer.
pub fn weighted_midpoint(a: Point, dist_a: f64, b: Point, dist_b: f64) -> Point {
    let total = dist_a + dist_b;
    let ratio = if total > 0.0 { dist_a / total } else { 0.5 };
    geometry::lerp(a, b, ratio)
}

fn containing_area(geometries: &BTreeMap<String, AreaGeometry>, point: Point) -> Option<&str> {
    geometries
        .iter()
        .find(|(_, g)| g.contains(point))
        .map(|(id, _)| id.as_str())
}

fn most_voted<'a>(votes: &BTreeMap<&'a str, usize>) -> Option<(&'a str, usize)> {
    let mut best: Option<(&str, usize)> = None;
    for (&area_id, &count) in votes {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((area_id, count));
        }
    }
    best
}

fn nearest<'a>(samples: &[&'a AreaSample]) -> Option<&'a AreaSample> {
    let mut best: Option<&AreaSample> = None;
    for &sample in samples {
        if best.is_none_or(|b| sample.distance < b.distance) {
            best = Some(sample);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(area_id: &str, distance: f64, now: Instant) -> AreaSample {
        AreaSample {
            area_id: area_id.to_string(),
            distance,
            observed_at: now,
            expired: false,
        }
    }

    fn cube(centre: Point, half: f64) -> AreaGeometry {
        AreaGeometry::new(
            centre,
            [centre[0] - half, centre[1] - half, centre[2] - half],
            [centre[0] + half, centre[1] + half, centre[2] + half],
        )
    }

    #[test]
    fn test_no_samples() {
        let now = Instant::now();
        let decision = resolve(&[], &BTreeMap::new(), now);
        assert_eq!(decision, AreaDecision::none(now));
    }

    #[test]
    fn test_nearest_without_geometry() {
        let now = Instant::now();
        let samples = [
            sample("a", 2.0, now),
            sample("b", 1.5, now),
            sample("c", 4.0, now),
        ];
        let decision = resolve(&samples, &BTreeMap::new(), now);
        assert_eq!(decision.area_id.as_deref(), Some("b"));
        assert_eq!(decision.distance, Some(1.5));
    }

    #[test]
    fn test_midpoint_outside_every_area_falls_back_to_nearest() {
        let now = Instant::now();
        let geometries = BTreeMap::from([
            ("a".to_string(), cube([0.0, 0.0, 0.0], 1.0)),
            ("b".to_string(), cube([10.0, 0.0, 0.0], 1.0)),
        ]);
        assert_eq!(
            weighted_midpoint([0.0; 3], 3.0, [10.0, 0.0, 0.0], 7.0),
            [3.0, 0.0, 0.0]
        );

        let samples = [sample("a", 3.0, now), sample("b", 7.0, now)];
        let decision = resolve(&samples, &geometries, now);
        assert_eq!(decision.area_id.as_deref(), Some("a"));
        assert_eq!(decision.distance, Some(3.0));
    }

    #[test]
    fn test_midpoint_vote_beats_nearest() {
        let now = Instant::now();
        // The device is closer to the hallway beacon but the weighted
        // midpoint lands inside the lounge.
        let geometries = BTreeMap::from([
            ("hallway".to_string(), cube([0.0, 0.0, 0.0], 1.0)),
            (
                "lounge".to_string(),
                AreaGeometry::new([10.0, 0.0, 0.0], [2.0, -1.0, -1.0], [12.0, 1.0, 1.0]),
            ),
        ]);
        let samples = [sample("hallway", 1.0, now), sample("lounge", 2.0, now)];
        let decision = resolve(&samples, &geometries, now);
        assert_eq!(decision.area_id.as_deref(), Some("lounge"));
        assert_eq!(decision.distance, Some(2.0));
    }

    #[test]
    fn test_vote_for_unsampled_area() {
        let now = Instant::now();
        let geometries = BTreeMap::from([
            ("a".to_string(), cube([0.0, 0.0, 0.0], 1.0)),
            ("b".to_string(), cube([10.0, 0.0, 0.0], 1.0)),
            ("c".to_string(), cube([5.0, 0.0, 0.0], 1.0)),
        ]);
        let samples = [sample("a", 4.0, now), sample("b", 4.0, now)];
        let decision = resolve(&samples, &geometries, now);
        assert_eq!(decision.area_id.as_deref(), Some("c"));
        assert_eq!(decision.distance, Some(0.0));
    }

    #[test]
    fn test_only_one_area_with_geometry_casts_no_vote() {
        let now = Instant::now();
        let geometries = BTreeMap::from([("a".to_string(), cube([0.0, 0.0, 0.0], 100.0))]);
        let samples = [sample("a", 5.0, now), sample("b", 1.0, now)];
        let decision = resolve(&samples, &geometries, now);
        assert_eq!(decision.area_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_vote_ties_go_to_smallest_area_id() {
        let now = Instant::now();
        // Pair (x, y) votes for "p", pair (x, z) votes for "q", pair (y, z)
        // lands nowhere.
        let geometries = BTreeMap::from([
            ("x".to_string(), cube([0.0, 0.0, 0.0], 0.1)),
            ("y".to_string(), cube([10.0, 0.0, 0.0], 0.1)),
            ("z".to_string(), cube([0.0, 10.0, 0.0], 0.1)),
            ("q".to_string(), cube([0.0, 5.0, 0.0], 0.5)),
            ("p".to_string(), cube([5.0, 0.0, 0.0], 0.5)),
        ]);
        let samples = [
            sample("z", 2.0, now),
            sample("x", 2.0, now),
            sample("y", 2.0, now),
        ];
        let decision = resolve(&samples, &geometries, now);
        assert_eq!(decision.area_id.as_deref(), Some("p"));
    }

    #[test]
    fn test_overlapping_areas_vote_for_smallest_area_id() {
        let now = Instant::now();
        // The midpoint (5, 0, 0) is inside both "n" and the larger "m".
        let geometries = BTreeMap::from([
            ("n".to_string(), cube([5.0, 0.0, 0.0], 0.5)),
            ("m".to_string(), cube([5.0, 0.0, 0.0], 2.0)),
            ("a".to_string(), cube([0.0, 0.0, 0.0], 0.1)),
            ("b".to_string(), cube([10.0, 0.0, 0.0], 0.1)),
        ]);
        assert_eq!(containing_area(&geometries, [5.0, 0.0, 0.0]), Some("m"));
        assert_eq!(containing_area(&geometries, [6.5, 0.0, 0.0]), Some("m"));
        assert_eq!(containing_area(&geometries, [8.0, 0.0, 0.0]), None);

        let samples = [sample("b", 3.0, now), sample("a", 3.0, now)];
        let decision = resolve(&samples, &geometries, now);
        assert_eq!(decision.area_id.as_deref(), Some("m"));
        assert_eq!(decision.distance, Some(0.0));
    }

    #[test]
    fn test_distance_ties_go_to_smallest_area_id() {
        let now = Instant::now();
        let samples = [sample("office", 2.0, now), sample("kitchen", 2.0, now)];
        let decision = resolve(&samples, &BTreeMap::new(), now);
        assert_eq!(decision.area_id.as_deref(), Some("kitchen"));
    }

    #[test]
    fn test_zero_distances_use_centre() {
        assert_eq!(
            weighted_midpoint([0.0; 3], 0.0, [4.0, 0.0, 0.0], 0.0),
            [2.0, 0.0, 0.0]
        );
    }
}
