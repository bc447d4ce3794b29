//! Route matching using Average Minimum Distance (AMD).
//!
//! Both routes are resampled to the same number of points by arc length, then
//! compared with a symmetric Chamfer distance: for every point of one route
//! the distance to the nearest point of the other, averaged, in both
//! directions. AMD ignores point order, so direction of travel is decided
//! separately by comparing the routes point-for-point forwards and reversed.

use crate::error::Result;
use crate::geo_utils::{haversine_distance, resample};
use crate::{Direction, GpsPoint, MatchConfig, MatchResult, RouteSignature};

/// Compare two routes and return a match result.
///
/// `Ok(None)` is a normal negative result: the routes are too short, too
/// different in length, or their AMD maps below `min_match_percentage`.
/// `Err` is only returned for an invalid configuration.
///
/// A [`Direction::Partial`] result is returned when only one route lies along
/// the other. Its `amd` and `match_percentage` are still the full-length
/// values, so they fall below `min_match_percentage`; the shared stretch is
/// reported in `overlap_distance`.
///
/// # Example
/// ```
/// use route_atlas::{GpsPoint, RouteSignature, MatchConfig, Direction, compare_routes};
///
/// let points: Vec<GpsPoint> = (0..20)
///     .map(|i| GpsPoint::new(51.5074 + i as f64 * 0.001, -0.1278))
///     .collect();
/// let mut reversed = points.clone();
/// reversed.reverse();
///
/// let config = MatchConfig::default();
/// let sig1 = RouteSignature::from_points("a", &points, &config).unwrap();
/// let sig2 = RouteSignature::from_points("b", &reversed, &config).unwrap();
///
/// let result = compare_routes(&sig1, &sig2, &config).unwrap().unwrap();
/// assert_eq!(result.direction, Direction::Reverse);
/// ```
pub fn compare_routes(
    sig1: &RouteSignature,
    sig2: &RouteSignature,
    config: &MatchConfig,
) -> Result<Option<MatchResult>> {
    config.validate()?;
    Ok(compare_validated(sig1, sig2, config))
}

/// Comparator body for callers that already validated `config` once.
pub(crate) fn compare_validated(
    sig1: &RouteSignature,
    sig2: &RouteSignature,
    config: &MatchConfig,
) -> Option<MatchResult> {
    // Cheap length filter before any geometry
    if !lengths_comparable(sig1.total_distance, sig2.total_distance, config) {
        return None;
    }

    let n = config.resample_count as usize;
    let resampled1 = resample(&sig1.points, n);
    let resampled2 = resample(&sig2.points, n);

    let amd_1_to_2 = average_min_distance(&resampled1, &resampled2);
    let amd_2_to_1 = average_min_distance(&resampled2, &resampled1);
    let amd = (amd_1_to_2 + amd_2_to_1) / 2.0;
    let match_percentage = amd_to_percentage(amd, config);

    // Orientation: which pairing of the resampled points lines up better
    let forward = aligned_mean_distance(&resampled1, &resampled2, false);
    let backward = aligned_mean_distance(&resampled1, &resampled2, true);
    let reversed = backward < forward;

    let endpoints_match = endpoints_within(sig1, sig2, reversed, config.endpoint_threshold);

    if match_percentage >= config.min_match_percentage {
        let direction = if reversed {
            Direction::Reverse
        } else {
            Direction::Same
        };
        return Some(MatchResult {
            activity_id_1: sig1.activity_id.clone(),
            activity_id_2: sig2.activity_id.clone(),
            match_percentage,
            direction,
            amd,
            overlap_distance: None,
            endpoints_match,
        });
    }

    // Full-length comparison failed. If one route lies along the other for
    // most of its length, the one-sided AMD from that route is low. The
    // reported score stays the full-length one; the overlap carries the rest.
    let (one_sided_amd, shorter, longer) = if amd_1_to_2 <= amd_2_to_1 {
        (amd_1_to_2, &resampled1, &resampled2)
    } else {
        (amd_2_to_1, &resampled2, &resampled1)
    };
    if amd_to_percentage(one_sided_amd, config) < config.min_match_percentage {
        return None;
    }

    let overlap = longest_overlap(shorter, longer, admission_distance(config));
    if overlap <= 0.0 {
        return None;
    }

    Some(MatchResult {
        activity_id_1: sig1.activity_id.clone(),
        activity_id_2: sig2.activity_id.clone(),
        match_percentage,
        direction: Direction::Partial,
        amd,
        overlap_distance: Some(overlap),
        endpoints_match,
    })
}

/// Both routes long enough, and lengths within `max_distance_diff_ratio`.
pub(crate) fn lengths_comparable(d1: f64, d2: f64, config: &MatchConfig) -> bool {
    if d1 < config.min_route_distance || d2 < config.min_route_distance {
        return false;
    }
    let max_distance = d1.max(d2);
    if max_distance <= 0.0 {
        return false;
    }
    (d1 - d2).abs() / max_distance <= config.max_distance_diff_ratio
}

/// Convert AMD to a match percentage using thresholds.
/// - AMD <= perfect_threshold -> 100%
/// - AMD >= zero_threshold -> 0%
/// - Linear interpolation between
pub fn amd_to_percentage(amd: f64, config: &MatchConfig) -> f64 {
    let span = config.zero_threshold - config.perfect_threshold;
    let pct = 100.0 * (config.zero_threshold - amd) / span;
    pct.clamp(0.0, 100.0)
}

/// Largest AMD that still maps to `min_match_percentage`.
///
/// Two routes whose bounding boxes are further apart than this can never be
/// admitted, because every pairwise distance is at least the gap.
pub(crate) fn admission_distance(config: &MatchConfig) -> f64 {
    config.zero_threshold
        - config.min_match_percentage / 100.0 * (config.zero_threshold - config.perfect_threshold)
}

/// For each point in route1, the minimum distance to any point in route2, averaged.
fn average_min_distance(route1: &[GpsPoint], route2: &[GpsPoint]) -> f64 {
    if route1.is_empty() || route2.is_empty() {
        return f64::INFINITY;
    }

    let total_min_dist: f64 = route1
        .iter()
        .map(|p1| min_distance_to(p1, route2))
        .sum();

    total_min_dist / route1.len() as f64
}

fn min_distance_to(point: &GpsPoint, route: &[GpsPoint]) -> f64 {
    route
        .iter()
        .map(|p| haversine_distance(point, p))
        .fold(f64::INFINITY, f64::min)
}

/// Mean distance between the i-th points of two equally resampled routes,
/// pairing `a[i]` with `b[n-1-i]` when `reversed`.
fn aligned_mean_distance(a: &[GpsPoint], b: &[GpsPoint], reversed: bool) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return f64::INFINITY;
    }
    let total: f64 = (0..n)
        .map(|i| {
            let j = if reversed { b.len() - 1 - i } else { i };
            haversine_distance(&a[i], &b[j])
        })
        .sum();
    total / n as f64
}

/// Start and end both within `threshold` under the chosen orientation.
fn endpoints_within(sig1: &RouteSignature, sig2: &RouteSignature, reversed: bool, threshold: f64) -> bool {
    let (start2, end2) = if reversed {
        (&sig2.end_point, &sig2.start_point)
    } else {
        (&sig2.start_point, &sig2.end_point)
    };
    haversine_distance(&sig1.start_point, start2) <= threshold
        && haversine_distance(&sig1.end_point, end2) <= threshold
}

/// Arc length of the longest contiguous run of `longer` lying within
/// `threshold` of `shorter`.
fn longest_overlap(shorter: &[GpsPoint], longer: &[GpsPoint], threshold: f64) -> f64 {
    let mut best = 0.0_f64;
    let mut current = 0.0;
    let mut prev: Option<&GpsPoint> = None;

    for point in longer {
        if min_distance_to(point, shorter) <= threshold {
            if let Some(p) = prev {
                current += haversine_distance(p, point);
            }
            prev = Some(point);
            best = best.max(current);
        } else {
            current = 0.0;
            prev = None;
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Straight north-bound track of `n` points, ~111m apart.
    fn straight(lat0: f64, lng: f64, n: usize) -> Vec<GpsPoint> {
        (0..n)
            .map(|i| GpsPoint::new(lat0 + i as f64 * 0.001, lng))
            .collect()
    }

    fn sig(id: &str, points: &[GpsPoint]) -> RouteSignature {
        RouteSignature::from_points(id, points, &MatchConfig::default()).unwrap()
    }

    #[test]
    fn test_identical_routes_match() {
        let points = straight(51.5, -0.12, 20);
        let result = compare_routes(&sig("a", &points), &sig("b", &points), &MatchConfig::default())
            .unwrap()
            .unwrap();

        assert_eq!(result.match_percentage, 100.0);
        assert_eq!(result.direction, Direction::Same);
        assert!(result.amd < 1e-6);
        assert!(result.endpoints_match);
    }

    #[test]
    fn test_reverse_routes_match() {
        let points = straight(51.5, -0.12, 20);
        let mut reversed = points.clone();
        reversed.reverse();

        let result = compare_routes(&sig("a", &points), &sig("b", &reversed), &MatchConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(result.direction, Direction::Reverse);
        assert!(result.match_percentage > 95.0);
        assert!(result.endpoints_match);
    }

    #[test]
    fn test_parallel_offset_scores_by_distance() {
        // ~140m east of the first route: between the thresholds
        let a = straight(51.5, -0.12, 20);
        let b = straight(51.5, -0.118, 20);
        let config = MatchConfig {
            min_match_percentage: 0.0,
            ..MatchConfig::default()
        };
        let result = compare_routes(&sig("a", &a), &sig("b", &b), &config)
            .unwrap()
            .unwrap();

        assert!(result.amd > 130.0 && result.amd < 150.0, "amd = {}", result.amd);
        let expected = 100.0 * (250.0 - result.amd) / 220.0;
        assert!((result.match_percentage - expected).abs() < 1e-9);
    }

    #[test]
    fn test_short_routes_rejected_before_geometry() {
        let short = straight(51.5, -0.12, 4); // ~330m
        assert!(compare_routes(&sig("a", &short), &sig("b", &short), &MatchConfig::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_length_ratio_filter() {
        let a = straight(51.5, -0.12, 20); // ~2.1km
        let b = straight(51.5, -0.12, 12); // ~1.2km
        assert!(compare_routes(&sig("a", &a), &sig("b", &b), &MatchConfig::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_distant_routes_do_not_match() {
        let a = straight(51.5, -0.12, 20);
        let b = straight(40.7, -74.0, 20);
        assert!(compare_routes(&sig("a", &a), &sig("b", &b), &MatchConfig::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_partial_overlap() {
        // Shared ~2.1km stretch, then the longer route turns east for ~1km
        let shared = straight(51.5, -0.12, 20);
        let mut longer = shared.clone();
        for i in 1..=10 {
            longer.push(GpsPoint::new(51.519, -0.12 + i as f64 * 0.0015));
        }

        let config = MatchConfig {
            min_match_percentage: 90.0,
            max_distance_diff_ratio: 0.5,
            ..MatchConfig::default()
        };
        let result = compare_routes(&sig("short", &shared), &sig("long", &longer), &config)
            .unwrap()
            .unwrap();

        assert_eq!(result.direction, Direction::Partial);
        assert!(result.match_percentage < config.min_match_percentage);
        assert!((amd_to_percentage(result.amd, &config) - result.match_percentage).abs() < 1e-9);
        let overlap = result.overlap_distance.unwrap();
        assert!(overlap > 1500.0 && overlap < 2300.0, "overlap = {}", overlap);
        assert!(!result.endpoints_match);
    }

    #[test]
    fn test_longer_branch_scores_lower() {
        // The further the longer route runs off the shared road, the worse its score
        let shared = straight(51.5, -0.12, 20);
        let branch = |n: usize| {
            let mut points = shared.clone();
            for i in 1..=n {
                points.push(GpsPoint::new(51.519, -0.12 + i as f64 * 0.0015));
            }
            sig("branch", &points)
        };
        let config = MatchConfig {
            min_match_percentage: 0.0,
            max_distance_diff_ratio: 0.9,
            ..MatchConfig::default()
        };

        let base = sig("base", &shared);
        let short_branch = compare_routes(&base, &branch(3), &config).unwrap().unwrap();
        let long_branch = compare_routes(&base, &branch(10), &config).unwrap().unwrap();
        assert!(long_branch.amd > short_branch.amd);
        assert!(long_branch.match_percentage <= short_branch.match_percentage);
    }

    #[test]
    fn test_amd_is_symmetric() {
        let a = straight(51.5, -0.12, 20);
        let b: Vec<GpsPoint> = a
            .iter()
            .enumerate()
            .map(|(i, p)| GpsPoint::new(p.latitude, p.longitude + 0.0003 * (i % 3) as f64))
            .collect();
        let config = MatchConfig::default();

        let ab = compare_routes(&sig("a", &a), &sig("b", &b), &config).unwrap().unwrap();
        let ba = compare_routes(&sig("b", &b), &sig("a", &a), &config).unwrap().unwrap();
        assert!((ab.amd - ba.amd).abs() < 1e-9);
        assert!((ab.match_percentage - ba.match_percentage).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_boundaries() {
        let config = MatchConfig::default();
        assert_eq!(amd_to_percentage(config.perfect_threshold, &config), 100.0);
        assert_eq!(amd_to_percentage(config.zero_threshold, &config), 0.0);
        assert_eq!(amd_to_percentage(10_000.0, &config), 0.0);
        assert_eq!(amd_to_percentage(0.0, &config), 100.0);
    }

    #[test]
    fn test_admission_distance_maps_to_min_match() {
        let config = MatchConfig::default();
        let d = admission_distance(&config);
        assert!((amd_to_percentage(d, &config) - config.min_match_percentage).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let points = straight(51.5, -0.12, 20);
        let config = MatchConfig {
            perfect_threshold: 250.0,
            ..MatchConfig::default()
        };
        assert!(compare_routes(&sig("a", &points), &sig("b", &points), &config).is_err());
    }
}
