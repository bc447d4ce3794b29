//! Heatmap generation with route intelligence.
//!
//! Creates a sparse grid of cells from GPS activities, tracking:
//! - Visit frequency per cell (for density visualization)
//! - Routes passing through each cell (for tap-to-discover)
//! - Activity references for drill-down
//!
//! Cells live on the same fixed grid as section detection, so a tap is
//! resolved to its cell by arithmetic and a binary search over the sorted
//! cell list.

use std::collections::{BTreeSet, HashMap, HashSet};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::error::{Result, RouteAtlasError};
use crate::geo_utils::bounds_overlap;
use crate::grid::{aggregate, CellCoord, CellVisits, Contribution, Grid, MIN_CELL_SIZE_METERS};
use crate::{Bounds, RouteSignature};

/// Configuration for heatmap generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct HeatmapConfig {
    /// Grid cell size in meters (default: 100m)
    pub cell_size_meters: f64,
    /// Optional bounds to limit computation
    pub bounds: Option<HeatmapBounds>,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            cell_size_meters: 100.0,
            bounds: None,
        }
    }
}

impl HeatmapConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.cell_size_meters.is_finite() || self.cell_size_meters < MIN_CELL_SIZE_METERS {
            return Err(RouteAtlasError::config(format!(
                "cell_size_meters must be at least {}m, got {}",
                MIN_CELL_SIZE_METERS, self.cell_size_meters
            )));
        }
        if let Some(b) = &self.bounds {
            if !(b.min_lat <= b.max_lat && b.min_lng <= b.max_lng) {
                return Err(RouteAtlasError::config(format!(
                    "heatmap bounds are inverted or NaN: {:?}",
                    b
                )));
            }
        }
        Ok(())
    }
}

/// Bounding box for heatmap computation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct HeatmapBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl HeatmapBounds {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }
}

impl From<HeatmapBounds> for Bounds {
    fn from(b: HeatmapBounds) -> Self {
        Bounds {
            min_lat: b.min_lat,
            max_lat: b.max_lat,
            min_lng: b.min_lng,
            max_lng: b.max_lng,
        }
    }
}

impl From<Bounds> for HeatmapBounds {
    fn from(b: Bounds) -> Self {
        HeatmapBounds {
            min_lat: b.min_lat,
            max_lat: b.max_lat,
            min_lng: b.min_lng,
            max_lng: b.max_lng,
        }
    }
}

/// Reference to a route group passing through a cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct RouteRef {
    /// Route group ID
    pub route_id: String,
    /// How many activities from this route pass through this cell
    pub activity_count: u32,
    /// User-defined or auto-generated route name
    pub name: Option<String>,
}

/// A single cell in the heatmap grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct HeatmapCell {
    /// Grid row index
    pub row: i32,
    /// Grid column index
    pub col: i32,
    /// Cell center for rendering
    pub center_lat: f64,
    pub center_lng: f64,
    /// Normalized density (0.0-1.0) for color mapping
    pub density: f32,
    /// Total visit count (entries by all tracks)
    pub visit_count: u32,
    /// Routes passing through this cell, most activities first
    pub route_refs: Vec<RouteRef>,
    /// Number of unique routes
    pub unique_route_count: u32,
    /// All activity IDs that pass through, sorted
    pub activity_ids: Vec<String>,
    /// Earliest visit (Unix timestamp)
    pub first_visit: Option<i64>,
    /// Most recent visit (Unix timestamp)
    pub last_visit: Option<i64>,
    /// True if 2+ routes share this cell (intersection/common path)
    pub is_common_path: bool,
}

/// Complete heatmap result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct HeatmapResult {
    /// Non-empty cells only (sparse representation), sorted by (row, col)
    pub cells: Vec<HeatmapCell>,
    /// Geographic extent of the occupied cell range
    pub bounds: HeatmapBounds,
    /// Cell size used
    pub cell_size_meters: f64,
    /// Grid dimensions
    pub grid_rows: u32,
    pub grid_cols: u32,
    /// Highest visit count, the value that maps to density 1.0
    pub max_density: f32,
    /// Summary stats
    pub total_routes: u32,
    pub total_activities: u32,
}

impl HeatmapResult {
    fn empty(cell_size_meters: f64) -> Self {
        Self {
            cells: vec![],
            bounds: HeatmapBounds::default(),
            cell_size_meters,
            grid_rows: 0,
            grid_cols: 0,
            max_density: 0.0,
            total_routes: 0,
            total_activities: 0,
        }
    }
}

/// Query result when user taps a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct CellQueryResult {
    /// The cell at the queried location
    pub cell: HeatmapCell,
    /// Suggested label based on patterns
    pub suggested_label: String,
}

/// Activity metadata for heatmap generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct ActivityHeatmapData {
    pub activity_id: String,
    pub route_id: Option<String>,
    pub route_name: Option<String>,
    pub timestamp: Option<i64>,
}

/// Generate a heatmap from route signatures
///
/// Uses the simplified GPS traces from RouteSignature (~100 points each)
/// for efficient heatmap generation without loading full GPS tracks.
/// Activities without metadata still count toward density; their timestamp
/// falls back to the signature's start time.
pub fn generate_heatmap(
    signatures: &[RouteSignature],
    activity_data: &HashMap<String, ActivityHeatmapData>,
    config: &HeatmapConfig,
) -> Result<HeatmapResult> {
    build_heatmap(signatures, activity_data, config, None)
}

/// Same as [`generate_heatmap`], checking `cancel` per signature.
pub fn generate_heatmap_cancellable(
    signatures: &[RouteSignature],
    activity_data: &HashMap<String, ActivityHeatmapData>,
    config: &HeatmapConfig,
    cancel: &CancellationToken,
) -> Result<HeatmapResult> {
    build_heatmap(signatures, activity_data, config, Some(cancel))
}

fn build_heatmap(
    signatures: &[RouteSignature],
    activity_data: &HashMap<String, ActivityHeatmapData>,
    config: &HeatmapConfig,
    cancel: Option<&CancellationToken>,
) -> Result<HeatmapResult> {
    config.validate()?;
    info!(
        "[Heatmap] Generating from {} signatures, {}m cells",
        signatures.len(),
        config.cell_size_meters
    );
    let start = std::time::Instant::now();

    let grid = Grid::new(config.cell_size_meters);
    let region: Option<Bounds> = config.bounds.map(Bounds::from);

    let mut seen: HashSet<&str> = HashSet::new();
    let contributions: Vec<Contribution<'_>> = signatures
        .iter()
        .enumerate()
        .filter(|(_, sig)| seen.insert(sig.activity_id.as_str()))
        .filter(|(_, sig)| match &region {
            // Cheap reject of tracks entirely outside the viewport
            Some(r) => bounds_overlap(&sig.bounds, r, 0.0, r.center().latitude),
            None => true,
        })
        .map(|(order, sig)| {
            let data = activity_data.get(&sig.activity_id);
            Contribution {
                order,
                activity_id: &sig.activity_id,
                route_id: data.and_then(|d| d.route_id.as_deref()),
                route_name: data.and_then(|d| d.route_name.as_deref()),
                timestamp: data.and_then(|d| d.timestamp).or(sig.start_time),
                points: &sig.points,
            }
        })
        .collect();
    debug!(
        "[Heatmap] {} of {} signatures inside the requested region",
        contributions.len(),
        signatures.len()
    );

    let cell_map = aggregate(&grid, &contributions, region.as_ref(), cancel)?;
    if cell_map.is_empty() {
        return Ok(HeatmapResult::empty(config.cell_size_meters));
    }

    let mut entries: Vec<(CellCoord, CellVisits)> = cell_map.into_iter().collect();
    entries.sort_unstable_by_key(|(cell, _)| *cell);

    // Second pass: density needs the maximum over the populated grid
    let max_visits = entries.iter().map(|(_, v)| v.visits).max().unwrap_or(1).max(1);
    let max_density = max_visits as f32;

    let mut all_routes: BTreeSet<&str> = BTreeSet::new();
    let mut all_activities: BTreeSet<&str> = BTreeSet::new();
    for (_, v) in &entries {
        all_routes.extend(v.route_counts.keys().map(String::as_str));
        all_activities.extend(v.activity_ids.iter().map(String::as_str));
    }
    let total_routes = all_routes.len() as u32;
    let total_activities = all_activities.len() as u32;

    let (mut min_row, mut max_row) = (i32::MAX, i32::MIN);
    let (mut min_col, mut max_col) = (i32::MAX, i32::MIN);
    for (cell, _) in &entries {
        min_row = min_row.min(cell.row);
        max_row = max_row.max(cell.row);
        min_col = min_col.min(cell.col);
        max_col = max_col.max(cell.col);
    }

    let cells: Vec<HeatmapCell> = entries
        .into_iter()
        .map(|(cell, v)| to_heatmap_cell(&grid, cell, v, max_density))
        .collect();

    let result = HeatmapResult {
        bounds: grid
            .span_bounds(CellCoord::new(min_row, min_col), CellCoord::new(max_row, max_col))
            .into(),
        cell_size_meters: config.cell_size_meters,
        grid_rows: (max_row - min_row + 1) as u32,
        grid_cols: (max_col - min_col + 1) as u32,
        max_density,
        total_routes,
        total_activities,
        cells,
    };

    info!(
        "[Heatmap] Heatmap generated: {} cells, {} routes, {} activities in {:?}",
        result.cells.len(),
        result.total_routes,
        result.total_activities,
        start.elapsed()
    );
    Ok(result)
}

fn to_heatmap_cell(grid: &Grid, cell: CellCoord, v: CellVisits, max_density: f32) -> HeatmapCell {
    let center = grid.cell_center(cell);

    let mut route_refs: Vec<RouteRef> = v
        .route_counts
        .iter()
        .map(|(rid, &count)| RouteRef {
            route_id: rid.clone(),
            activity_count: count,
            name: v.route_names.get(rid).cloned(),
        })
        .collect();
    route_refs.sort_by(|a, b| {
        b.activity_count
            .cmp(&a.activity_count)
            .then_with(|| a.route_id.cmp(&b.route_id))
    });

    let unique_route_count = route_refs.len() as u32;
    HeatmapCell {
        row: cell.row,
        col: cell.col,
        center_lat: center.latitude,
        center_lng: center.longitude,
        density: v.visits as f32 / max_density,
        visit_count: v.visits,
        route_refs,
        unique_route_count,
        activity_ids: v.activity_ids.into_iter().collect(),
        first_visit: v.first_visit,
        last_visit: v.last_visit,
        is_common_path: unique_route_count >= 2,
    }
}

/// Query the heatmap at a specific location
pub fn query_heatmap_cell(heatmap: &HeatmapResult, lat: f64, lng: f64) -> Option<CellQueryResult> {
    if heatmap.cells.is_empty() || !heatmap.bounds.contains(lat, lng) {
        return None;
    }

    let target = Grid::new(heatmap.cell_size_meters).cell_of(lat, lng);
    let idx = heatmap
        .cells
        .binary_search_by_key(&target, |c| CellCoord::new(c.row, c.col))
        .ok()?;
    let cell = &heatmap.cells[idx];

    Some(CellQueryResult {
        suggested_label: suggested_label(cell),
        cell: cell.clone(),
    })
}

/// Label from the most-represented named route, falling back to generic text.
fn suggested_label(cell: &HeatmapCell) -> String {
    if cell.unique_route_count == 0 {
        return if cell.activity_ids.len() == 1 {
            "Explored once".to_string()
        } else {
            format!("{} activities (no route)", cell.activity_ids.len())
        };
    }

    // route_refs are sorted by activity count, so the first named one is the most represented
    let top_named = cell.route_refs.iter().find(|r| r.name.is_some());

    match (top_named, cell.is_common_path) {
        (Some(route), false) => format!(
            "{} ({}x)",
            route.name.as_deref().unwrap_or_default(),
            route.activity_count
        ),
        (Some(route), true) => format!(
            "{} + {} other routes",
            route.name.as_deref().unwrap_or_default(),
            cell.unique_route_count - 1
        ),
        (None, false) => format!("Route ({} activities)", cell.route_refs[0].activity_count),
        (None, true) => format!("Common path ({} routes)", cell.unique_route_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GpsPoint, MatchConfig};

    fn make_signature(id: &str, points: Vec<(f64, f64)>) -> RouteSignature {
        let gps_points: Vec<GpsPoint> = points
            .iter()
            .map(|(lat, lng)| GpsPoint::new(*lat, *lng))
            .collect();
        RouteSignature::from_points(id, &gps_points, &MatchConfig::default()).unwrap()
    }

    fn data(id: &str, route: Option<&str>, name: Option<&str>, ts: Option<i64>) -> (String, ActivityHeatmapData) {
        (
            id.to_string(),
            ActivityHeatmapData {
                activity_id: id.to_string(),
                route_id: route.map(String::from),
                route_name: name.map(String::from),
                timestamp: ts,
            },
        )
    }

    fn street() -> Vec<(f64, f64)> {
        vec![(37.7749, -122.4194), (37.7790, -122.4194)]
    }

    #[test]
    fn test_empty_heatmap() {
        let result = generate_heatmap(&[], &HashMap::new(), &HeatmapConfig::default()).unwrap();
        assert!(result.cells.is_empty());
        assert_eq!(result.total_activities, 0);
        assert_eq!(result.grid_rows, 0);
    }

    #[test]
    fn test_single_activity() {
        let sig = make_signature(
            "act1",
            vec![(37.7749, -122.4194), (37.7750, -122.4195), (37.7751, -122.4196)],
        );
        let activity_data: HashMap<_, _> = [data("act1", None, None, Some(1_000_000))].into();

        let result = generate_heatmap(&[sig], &activity_data, &HeatmapConfig::default()).unwrap();

        assert!(!result.cells.is_empty());
        assert_eq!(result.total_activities, 1);
        assert_eq!(result.total_routes, 0);
        assert!(result.cells.iter().all(|c| c.first_visit == Some(1_000_000)));
    }

    #[test]
    fn test_density_is_normalized() {
        let sig1 = make_signature("act1", street());
        let sig2 = make_signature("act2", street());
        let sig3 = make_signature("act3", vec![(37.7749, -122.4194), (37.7760, -122.4194)]);

        let result = generate_heatmap(&[sig1, sig2, sig3], &HashMap::new(), &HeatmapConfig::default())
            .unwrap();

        assert_eq!(result.max_density, 3.0);
        assert!(result.cells.iter().all(|c| c.density > 0.0 && c.density <= 1.0));
        assert!(result.cells.iter().any(|c| c.density == 1.0));
        assert!(result
            .cells
            .windows(2)
            .all(|w| (w[0].row, w[0].col) < (w[1].row, w[1].col)));
    }

    #[test]
    fn test_multiple_activities_same_route() {
        let sig1 = make_signature("act1", street());
        let sig2 = make_signature("act2", street());
        let activity_data: HashMap<_, _> = [
            data("act1", Some("route1"), Some("Morning Run"), None),
            data("act2", Some("route1"), Some("Morning Run"), None),
        ]
        .into();

        let result = generate_heatmap(&[sig1, sig2], &activity_data, &HeatmapConfig::default()).unwrap();

        assert_eq!(result.total_activities, 2);
        assert_eq!(result.total_routes, 1);
        let cell = &result.cells[0];
        assert_eq!(cell.visit_count, 2);
        assert_eq!(cell.route_refs[0].activity_count, 2);
        assert!(!cell.is_common_path);
    }

    #[test]
    fn test_common_path_detection() {
        let sig1 = make_signature("act1", street());
        let sig2 = make_signature("act2", street());
        let activity_data: HashMap<_, _> = [
            data("act1", Some("route1"), None, None),
            data("act2", Some("route2"), None, None),
        ]
        .into();

        let result = generate_heatmap(&[sig1, sig2], &activity_data, &HeatmapConfig::default()).unwrap();
        assert!(result.cells.iter().all(|c| c.is_common_path && c.unique_route_count == 2));
    }

    #[test]
    fn test_bounds_restrict_computation() {
        let sig = make_signature("act1", street());
        let far = make_signature("far", vec![(40.0, -100.0), (40.01, -100.0)]);
        let config = HeatmapConfig {
            bounds: Some(HeatmapBounds {
                min_lat: 37.77,
                max_lat: 37.7770,
                min_lng: -122.43,
                max_lng: -122.41,
            }),
            ..HeatmapConfig::default()
        };

        let result = generate_heatmap(&[sig, far], &HashMap::new(), &config).unwrap();
        assert_eq!(result.total_activities, 1);
        // The boundary cell's center can sit up to half a cell past the region edge
        assert!(result.cells.iter().all(|c| c.center_lat < 37.7780));
        assert!(result.cells.len() < 10);
    }

    #[test]
    fn test_query_finds_cell_and_labels_it() {
        let sig1 = make_signature("act1", street());
        let sig2 = make_signature("act2", street());
        let sig3 = make_signature("act3", street());
        let activity_data: HashMap<_, _> = [
            data("act1", Some("r1"), Some("Embarcadero"), None),
            data("act2", Some("r1"), Some("Embarcadero"), None),
            data("act3", Some("r2"), None, None),
        ]
        .into();
        let heatmap =
            generate_heatmap(&[sig1, sig2, sig3], &activity_data, &HeatmapConfig::default()).unwrap();

        let hit = query_heatmap_cell(&heatmap, 37.7770, -122.4194).unwrap();
        assert!(hit.cell.is_common_path);
        assert_eq!(hit.suggested_label, "Embarcadero + 1 other routes");

        assert!(query_heatmap_cell(&heatmap, 0.0, 0.0).is_none());
    }

    #[test]
    fn test_query_generic_labels() {
        let sig = make_signature("solo", street());
        let heatmap = generate_heatmap(&[sig], &HashMap::new(), &HeatmapConfig::default()).unwrap();
        let hit = query_heatmap_cell(&heatmap, 37.7770, -122.4194).unwrap();
        assert_eq!(hit.suggested_label, "Explored once");
    }

    #[test]
    fn test_rejects_bad_config() {
        let config = HeatmapConfig {
            cell_size_meters: -5.0,
            ..HeatmapConfig::default()
        };
        assert!(generate_heatmap(&[], &HashMap::new(), &config).is_err());

        let config = HeatmapConfig {
            cell_size_meters: 1e-4,
            ..HeatmapConfig::default()
        };
        assert!(matches!(
            generate_heatmap(&[make_signature("a", street())], &HashMap::new(), &config),
            Err(RouteAtlasError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_cancellation_stops_generation() {
        let token = CancellationToken::new();
        token.cancel();
        let sigs = vec![make_signature("a", street()), make_signature("b", street())];
        let err =
            generate_heatmap_cancellable(&sigs, &HashMap::new(), &HeatmapConfig::default(), &token)
                .unwrap_err();
        assert_eq!(err, RouteAtlasError::Cancelled);
    }
}
