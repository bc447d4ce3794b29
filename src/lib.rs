//! # Route Atlas
//!
//! Geometric matching and spatial aggregation engine for recorded GPS activities.
//!
//! This library turns raw GPS traces into three derived views:
//! - **Route groups**: activities that traveled the same physical route,
//!   found with Average Minimum Distance (AMD) comparison
//! - **Frequent sections**: connected grid regions traveled repeatedly even
//!   when the full routes differ
//! - **Heatmaps**: sparse density grids with per-cell route provenance
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel processing with rayon
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use route_atlas::{GpsPoint, RouteSignature, MatchConfig, compare_routes};
//!
//! // ~1.1km north-south track, long enough to be compared
//! let route1: Vec<GpsPoint> = (0..11)
//!     .map(|i| GpsPoint::new(51.5074 + i as f64 * 0.001, -0.1278))
//!     .collect();
//!
//! let route2 = route1.clone(); // Same route
//!
//! let config = MatchConfig::default();
//! let sig1 = RouteSignature::from_points("activity-1", &route1, &config);
//! let sig2 = RouteSignature::from_points("activity-2", &route2, &config);
//!
//! if let (Some(s1), Some(s2)) = (sig1, sig2) {
//!     if let Ok(Some(result)) = compare_routes(&s1, &s2, &config) {
//!         println!("Match: {}% ({})", result.match_percentage, result.direction);
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

// Unified error handling
pub mod error;
pub use error::{Result, RouteAtlasError};

// Cooperative cancellation for long batch calls
pub mod cancel;
pub use cancel::CancellationToken;

// Geographic utilities (distance, bounds, simplification, resampling)
pub mod geo_utils;

// Signature construction (single, batch, flat buffer)
pub mod signatures;
pub use signatures::{
    create_signature, create_signatures_batch, create_signatures_flat,
    create_signatures_flat_buffer, FlatGpsTrack, GpsTrack,
};

// Route matching algorithms (AMD-based comparison)
pub mod matching;
pub use matching::compare_routes;

// Route grouping algorithms
pub mod grouping;
pub use grouping::{
    group_incremental, group_incremental_cancellable, group_signatures,
    group_signatures_cancellable, group_signatures_with_matches, process_routes_batch,
    process_routes_batch_cancellable, process_routes_flat, process_routes_flat_buffer,
    process_routes_flat_buffer_cancellable, process_routes_flat_cancellable, ActivityMatchInfo,
    GroupIndex, GroupingResult,
};

// Fixed-reference grid shared by sections and heatmap
pub mod grid;
pub use grid::CellCoord;

// Frequent sections detection (grid + flood fill)
pub mod sections;
pub use sections::{
    detect_frequent_sections, detect_frequent_sections_cancellable, FrequentSection,
    SectionConfig,
};

// Heatmap generation module
pub mod heatmap;
pub use heatmap::{
    generate_heatmap, generate_heatmap_cancellable, query_heatmap_cell, ActivityHeatmapData,
    CellQueryResult, HeatmapBounds, HeatmapCell, HeatmapConfig, HeatmapResult, RouteRef,
};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RouteAtlasRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude in decimal degrees.
///
/// Degenerate or duplicate points are accepted; invalid fixes are filtered
/// where they would corrupt a computation.
///
/// # Example
/// ```
/// use route_atlas::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box for a route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points, ignoring invalid fixes.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        geo_utils::compute_bounds(points)
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// Smallest bounds containing both.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lng: self.min_lng.min(other.min_lng),
            max_lng: self.max_lng.max(other.max_lng),
        }
    }
}

/// A simplified route signature for efficient matching.
///
/// Built once per activity and immutable afterwards. `bounds` and `center`
/// are derived from the track's valid points and never set independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct RouteSignature {
    /// Unique identifier for the activity/route
    pub activity_id: String,
    /// Simplified GPS points
    pub points: Vec<GpsPoint>,
    /// Total route distance in meters, measured on the raw track
    pub total_distance: f64,
    /// Starting point of the route
    pub start_point: GpsPoint,
    /// Ending point of the route
    pub end_point: GpsPoint,
    /// Pre-computed bounding box
    pub bounds: Bounds,
    /// Midpoint of `bounds`
    pub center: GpsPoint,
    /// Activity start (Unix seconds), when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
}

impl RouteSignature {
    /// Create a route signature from raw GPS points.
    ///
    /// Invalid fixes are dropped, the remaining points are simplified using
    /// Douglas-Peucker and capped at `max_simplified_points`. `total_distance`
    /// is summed over the raw points so simplification never understates it.
    ///
    /// Returns `None` if the input has fewer than 2 valid points.
    ///
    /// # Example
    /// ```
    /// use route_atlas::{GpsPoint, RouteSignature, MatchConfig};
    ///
    /// let points = vec![
    ///     GpsPoint::new(51.5074, -0.1278),
    ///     GpsPoint::new(51.5080, -0.1290),
    ///     GpsPoint::new(51.5090, -0.1300),
    /// ];
    ///
    /// let signature = RouteSignature::from_points("my-route", &points, &MatchConfig::default());
    /// assert!(signature.is_some());
    /// ```
    pub fn from_points(activity_id: &str, points: &[GpsPoint], config: &MatchConfig) -> Option<Self> {
        Self::try_from_points(activity_id, points, config).ok()
    }

    /// Same as [`RouteSignature::from_points`] but reports why a track was rejected.
    pub fn try_from_points(
        activity_id: &str,
        points: &[GpsPoint],
        config: &MatchConfig,
    ) -> Result<Self> {
        let insufficient = |count: usize| RouteAtlasError::InsufficientPoints {
            activity_id: activity_id.to_string(),
            point_count: count,
            minimum_required: 2,
        };

        if points.len() < 2 {
            return Err(insufficient(points.len()));
        }

        let valid: Vec<GpsPoint> = points.iter().copied().filter(|p| p.is_valid()).collect();
        if valid.len() < 2 {
            return Err(insufficient(valid.len()));
        }

        let total_distance = geo_utils::polyline_length(&valid);
        let bounds = Bounds::from_points(&valid).ok_or_else(|| insufficient(0))?;

        let simplified = geo_utils::simplify(
            &valid,
            config.simplification_tolerance,
            config.max_simplified_points as usize,
        );
        if simplified.len() < 2 {
            return Err(insufficient(simplified.len()));
        }

        Ok(Self {
            activity_id: activity_id.to_string(),
            start_point: simplified[0],
            end_point: simplified[simplified.len() - 1],
            points: simplified,
            total_distance,
            center: bounds.center(),
            bounds,
            start_time: None,
        })
    }

    /// Attach the activity start time (Unix seconds).
    pub fn with_start_time(mut self, start_time: Option<i64>) -> Self {
        self.start_time = start_time;
        self
    }
}

/// Direction of travel of one route relative to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum Direction {
    /// Same path, same direction
    Same,
    /// Same path, opposite direction
    Reverse,
    /// One route only covers a contiguous part of the other
    Partial,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Same => "same",
            Direction::Reverse => "reverse",
            Direction::Partial => "partial",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of comparing two routes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct MatchResult {
    /// ID of the first route
    pub activity_id_1: String,
    /// ID of the second route
    pub activity_id_2: String,
    /// Match percentage (0-100, higher = better match), mapped from the full-length AMD
    pub match_percentage: f64,
    /// Direction of the second route relative to the first
    pub direction: Direction,
    /// Symmetric Average Minimum Distance in meters (lower = better match)
    pub amd: f64,
    /// Length of the shared stretch in meters, for `Partial` results
    pub overlap_distance: Option<f64>,
    /// Start and end points both fall within `endpoint_threshold` in the chosen direction
    pub endpoints_match: bool,
}

/// Configuration for route matching algorithms.
///
/// An immutable value threaded through every call; [`default_config`]
/// returns the standard thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct MatchConfig {
    /// AMD threshold for perfect match (100%). Routes with AMD at or below this are considered identical.
    /// Default: 30.0 meters (accounts for GPS variance of 5-10m)
    pub perfect_threshold: f64,

    /// AMD threshold for no match (0%). Routes with AMD at or above this are considered different.
    /// Default: 250.0 meters
    pub zero_threshold: f64,

    /// Minimum match percentage for a route to join a group.
    /// Default: 65.0%
    pub min_match_percentage: f64,

    /// Routes shorter than this are never compared or clustered.
    /// Default: 500.0 meters
    pub min_route_distance: f64,

    /// Maximum length difference, as a fraction of the longer route, before
    /// two routes are not compared at all.
    /// Default: 0.20
    pub max_distance_diff_ratio: f64,

    /// Maximum start/end separation to consider endpoints the same.
    /// Default: 200.0 meters
    pub endpoint_threshold: f64,

    /// Number of points to resample routes to for comparison.
    /// Default: 50
    pub resample_count: u32,

    /// Tolerance for Douglas-Peucker simplification (in degrees).
    /// Smaller values preserve more detail. Default: 0.0001 (~11 meters)
    pub simplification_tolerance: f64,

    /// Maximum points after simplification.
    /// Fewer points = faster comparison. Default: 100
    pub max_simplified_points: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            perfect_threshold: 30.0,
            zero_threshold: 250.0,
            min_match_percentage: 65.0,
            min_route_distance: 500.0,
            max_distance_diff_ratio: 0.20,
            endpoint_threshold: 200.0,
            resample_count: 50,
            simplification_tolerance: 0.0001,
            max_simplified_points: 100,
        }
    }
}

impl MatchConfig {
    /// Reject mis-ordered thresholds and negative or non-finite values.
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("perfect_threshold", self.perfect_threshold),
            ("zero_threshold", self.zero_threshold),
            ("min_route_distance", self.min_route_distance),
            ("max_distance_diff_ratio", self.max_distance_diff_ratio),
            ("endpoint_threshold", self.endpoint_threshold),
            ("simplification_tolerance", self.simplification_tolerance),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(RouteAtlasError::config(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        if self.perfect_threshold >= self.zero_threshold {
            return Err(RouteAtlasError::config(format!(
                "perfect_threshold ({}) must be below zero_threshold ({})",
                self.perfect_threshold, self.zero_threshold
            )));
        }
        if !(0.0..=100.0).contains(&self.min_match_percentage) {
            return Err(RouteAtlasError::config(format!(
                "min_match_percentage must be within 0-100, got {}",
                self.min_match_percentage
            )));
        }
        if self.resample_count < 2 {
            return Err(RouteAtlasError::config("resample_count must be at least 2"));
        }
        if self.max_simplified_points < 2 {
            return Err(RouteAtlasError::config(
                "max_simplified_points must be at least 2",
            ));
        }
        Ok(())
    }
}

/// Running statistics of a route group, updated on each append.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GroupStats {
    /// Number of member activities
    pub activity_count: u32,
    /// Earliest member start time (Unix seconds)
    pub first_date: Option<i64>,
    /// Latest member start time (Unix seconds)
    pub last_date: Option<i64>,
    /// Mean match percentage of members against the representative
    pub average_match: f64,
}

impl GroupStats {
    /// Fold one more member into the stats without rescanning.
    pub fn record(&mut self, match_percentage: f64, start_time: Option<i64>) {
        self.activity_count += 1;
        self.average_match +=
            (match_percentage - self.average_match) / self.activity_count as f64;

        if let Some(ts) = start_time {
            self.first_date = Some(self.first_date.map_or(ts, |v| v.min(ts)));
            self.last_date = Some(self.last_date.map_or(ts, |v| v.max(ts)));
        }
    }
}

/// A group of activities that traveled the same route.
///
/// The representative is always the anchor member's own signature, never a
/// synthetic average, so rendering it shows a real recorded path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct RouteGroup {
    /// Unique identifier for this group (the anchor's activity ID)
    pub group_id: String,
    /// Member activity IDs in discovery order, without duplicates
    pub activity_ids: Vec<String>,
    /// Signature of the anchor (first) member
    pub representative: RouteSignature,
    /// Membership statistics
    pub stats: GroupStats,
}

impl RouteGroup {
    /// Open a new group anchored on `signature`.
    pub fn new(signature: RouteSignature) -> Self {
        let mut stats = GroupStats::default();
        stats.record(100.0, signature.start_time);
        Self {
            group_id: signature.activity_id.clone(),
            activity_ids: vec![signature.activity_id.clone()],
            representative: signature,
            stats,
        }
    }

    /// Activity ID of the representative signature.
    pub fn representative_id(&self) -> &str {
        &self.representative.activity_id
    }

    /// Append a matched member. Returns `false` if it was already present.
    pub fn push_member(&mut self, signature: &RouteSignature, match_percentage: f64) -> bool {
        if self.activity_ids.contains(&signature.activity_id) {
            return false;
        }
        self.append_member(signature, match_percentage);
        true
    }

    /// Append without the membership scan; the caller guarantees the id is new.
    pub(crate) fn append_member(&mut self, signature: &RouteSignature, match_percentage: f64) {
        self.activity_ids.push(signature.activity_id.clone());
        self.stats.record(match_percentage, signature.start_time);
    }
}

// ============================================================================
// Default Configurations
// ============================================================================

/// Default route matching configuration.
pub fn default_config() -> MatchConfig {
    MatchConfig::default()
}

/// Default section detection configuration.
pub fn default_section_config() -> SectionConfig {
    SectionConfig::default()
}

/// Default heatmap configuration.
pub fn default_heatmap_config() -> HeatmapConfig {
    HeatmapConfig::default()
}

// ============================================================================
// Tests
// ============================================================================
