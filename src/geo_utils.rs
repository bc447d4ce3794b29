//! # Geographic Utilities
//!
//! Core geographic computation utilities for GPS track analysis.
//!
//! Every function here is pure and stateless. They are the building blocks of
//! the signature builder, comparator, grouping engine and grid aggregators.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`polyline_length`] | Total length of a GPS track in meters |
//! | [`compute_bounds`] | Bounding box of a GPS track (invalid fixes ignored) |
//! | [`compute_center`] | Midpoint of a track's bounding box |
//! | [`bounds_overlap`] | Check if two bounding boxes overlap |
//! | [`meters_to_degrees`] | Convert meters to approximate degrees at a latitude |
//! | [`simplify`] | Douglas-Peucker simplification with a hard point cap |
//! | [`resample`] | Exactly `n` points evenly spaced by arc length |
//!
//! ## Example
//!
//! ```rust
//! use route_atlas::{GpsPoint, geo_utils};
//!
//! let track = vec![
//!     GpsPoint::new(51.5074, -0.1278),  // London
//!     GpsPoint::new(51.5080, -0.1290),
//!     GpsPoint::new(51.5090, -0.1300),
//! ];
//!
//! // Calculate track length
//! let length = geo_utils::polyline_length(&track);
//! println!("Track length: {:.0}m", length);
//!
//! // Get bounding box
//! let bounds = geo_utils::compute_bounds(&track).unwrap();
//! println!("Bounds: {:.4}N to {:.4}N", bounds.min_lat, bounds.max_lat);
//!
//! // Ten points evenly spaced along the track
//! let resampled = geo_utils::resample(&track, 10);
//! assert_eq!(resampled.len(), 10);
//! ```
//!
//! ## Algorithm Notes
//!
//! ### Haversine Formula
//!
//! The haversine formula calculates the great-circle distance between two points on a sphere.
//! It's the standard method for GPS distance calculation, accurate to within 0.3% for most
//! practical applications.
//!
//! ### Simplification Tolerance
//!
//! Douglas-Peucker runs in raw latitude/longitude space, so its tolerance is a
//! planar-degree approximation. East-west detail is preserved less aggressively
//! at high latitudes than near the equator.

use geo::{algorithm::simplify::Simplify, Coord, Distance, Haversine, LineString, Point};

use crate::{Bounds, GpsPoint};

/// Mean earth radius used by the haversine implementation in `geo`.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Approximate meters per degree of latitude.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// Returns the distance in meters along the Earth's surface. Coincident points
/// return exactly `0.0`, and near-antipodal points return half the
/// circumference rather than NaN.
///
/// # Example
///
/// ```rust
/// use route_atlas::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    let distance = Haversine::distance(point1, point2);

    // Rounding can push the haversine term just past 1.0 for antipodal pairs
    if distance.is_nan() && p1.is_valid() && p2.is_valid() {
        return std::f64::consts::PI * EARTH_RADIUS_METERS;
    }
    distance
}

/// Calculate the total length of a polyline (GPS track) in meters.
///
/// Sums the haversine distance between consecutive points. Empty or single-point
/// tracks return 0.0.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Convert meters to approximate degrees at a given latitude.
///
/// Uses the longitude scale at `latitude` (the larger of the two degree
/// spans), so a square search box built from it never under-covers.
///
/// - At the equator, 1 degree ≈ 111,320 meters
/// - At 45°N/S, 1 degree of longitude ≈ 78,710 meters
///
/// Close to the poles the span grows without bound; it is capped at 360°,
/// which covers every longitude.
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let lat_rad = latitude.to_radians();
    let meters_per_degree = METERS_PER_DEGREE * lat_rad.cos().abs().max(f64::EPSILON);
    (meters / meters_per_degree).min(360.0)
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Compute the bounding box of a GPS track.
///
/// Invalid fixes (NaN or out of range) are skipped rather than poisoning the
/// box. Returns `None` when no valid point remains.
///
/// # Example
///
/// ```rust
/// use route_atlas::{GpsPoint, geo_utils};
///
/// let track = vec![
///     GpsPoint::new(51.5000, -0.1300),
///     GpsPoint::new(f64::NAN, 0.0),
///     GpsPoint::new(51.5100, -0.1200),
/// ];
///
/// let bounds = geo_utils::compute_bounds(&track).unwrap();
/// assert_eq!(bounds.min_lat, 51.5000);
/// assert_eq!(bounds.max_lng, -0.1200);
/// ```
pub fn compute_bounds(points: &[GpsPoint]) -> Option<Bounds> {
    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;
    let mut any = false;

    for p in points.iter().filter(|p| p.is_valid()) {
        min_lat = min_lat.min(p.latitude);
        max_lat = max_lat.max(p.latitude);
        min_lng = min_lng.min(p.longitude);
        max_lng = max_lng.max(p.longitude);
        any = true;
    }

    any.then_some(Bounds {
        min_lat,
        max_lat,
        min_lng,
        max_lng,
    })
}

/// Check if two bounding boxes overlap, with an optional buffer.
///
/// Useful for quick spatial filtering before expensive point-by-point comparisons.
/// Two tracks with non-overlapping bounds cannot share any common points.
pub fn bounds_overlap(a: &Bounds, b: &Bounds, buffer_meters: f64, reference_lat: f64) -> bool {
    let buffer_deg = meters_to_degrees(buffer_meters, reference_lat);

    !(a.max_lat + buffer_deg < b.min_lat
        || b.max_lat + buffer_deg < a.min_lat
        || a.max_lng + buffer_deg < b.min_lng
        || b.max_lng + buffer_deg < a.min_lng)
}

// =============================================================================
// Center Functions
// =============================================================================

/// Compute the center of a GPS track as the midpoint of its bounding box.
///
/// This is deliberately not the point centroid: it is stable under uneven
/// sampling density and cheap to derive from stored bounds.
/// Returns `None` when no valid point exists.
pub fn compute_center(points: &[GpsPoint]) -> Option<GpsPoint> {
    compute_bounds(points).map(|b| b.center())
}

// =============================================================================
// Shape Functions
// =============================================================================

/// Douglas-Peucker simplification with a hard cap on the output size.
///
/// If the simplified line still has more than `max_points`, it is uniformly
/// subsampled to exactly `max_points`, always keeping the first and last
/// points. The output is a subsequence of the input, so its polyline length
/// never exceeds the input's.
pub fn simplify(points: &[GpsPoint], tolerance_degrees: f64, max_points: usize) -> Vec<GpsPoint> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let line: LineString<f64> = points
        .iter()
        .map(|p| Coord {
            x: p.longitude,
            y: p.latitude,
        })
        .collect();

    let simplified: Vec<GpsPoint> = line
        .simplify(&tolerance_degrees.max(0.0))
        .0
        .into_iter()
        .map(|c| GpsPoint::new(c.y, c.x))
        .collect();

    let max_points = max_points.max(2);
    if simplified.len() <= max_points {
        return simplified;
    }

    let last = simplified.len() - 1;
    (0..max_points)
        .map(|i| {
            let idx = (i as f64 * last as f64 / (max_points - 1) as f64).round() as usize;
            simplified[idx.min(last)]
        })
        .collect()
}

/// Resample a polyline to exactly `n` points, evenly spaced by cumulative arc length.
///
/// Used only for comparison; resampled points are never stored. A zero-length
/// polyline yields `n` copies of its first point.
pub fn resample(points: &[GpsPoint], n: usize) -> Vec<GpsPoint> {
    if n == 0 || points.is_empty() {
        return Vec::new();
    }
    if points.len() == 1 || n == 1 {
        return vec![points[0]; n];
    }

    let mut cumulative = Vec::with_capacity(points.len());
    cumulative.push(0.0);
    for w in points.windows(2) {
        let last = *cumulative.last().unwrap_or(&0.0);
        cumulative.push(last + haversine_distance(&w[0], &w[1]));
    }

    let total = cumulative[cumulative.len() - 1];
    if total <= 0.0 {
        return vec![points[0]; n];
    }

    let step = total / (n - 1) as f64;
    let mut resampled = Vec::with_capacity(n);
    let mut seg = 0;

    for k in 0..n {
        if k == n - 1 {
            resampled.push(points[points.len() - 1]);
            break;
        }
        let target = k as f64 * step;
        while seg + 1 < cumulative.len() - 1 && cumulative[seg + 1] < target {
            seg += 1;
        }

        let seg_len = cumulative[seg + 1] - cumulative[seg];
        let ratio = if seg_len > 0.0 {
            ((target - cumulative[seg]) / seg_len).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let a = &points[seg];
        let b = &points[seg + 1];
        resampled.push(GpsPoint::new(
            a.latitude + ratio * (b.latitude - a.latitude),
            a.longitude + ratio * (b.longitude - a.longitude),
        ));
    }

    resampled
}

// =============================================================================
// Unit Tests
// =============================================================================
