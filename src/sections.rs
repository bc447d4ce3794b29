//! # Grid-Based Section Detection
//!
//! Detects road sections traveled repeatedly, even when the full routes
//! around them differ.
//!
//! ## Algorithm
//! 1. Quantize every signature onto the fixed grid, counting cell entries
//!    separately per sport type
//! 2. Mark cells with at least `min_visits` entries as frequent
//! 3. Flood-fill frequent cells into connected components (4- or
//!    8-connectivity), dropping components smaller than `min_cells`
//! 4. Order each component's cells by when they were first visited and
//!    join the cell centers into the section polyline
//!
//! First-visit order is decided by (activity start time, unknown last), then
//! input position of the signature, then sample index along it, then
//! (row, col). The output is sorted by visit count, most visited first.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::error::{Result, RouteAtlasError};
use crate::geo_utils::polyline_length;
use crate::grid::{aggregate, CellCoord, CellMap, Contribution, Grid, MIN_CELL_SIZE_METERS};
use crate::grouping::GroupIndex;
use crate::{GpsPoint, RouteGroup, RouteSignature};

/// Sport assigned to activities missing from the sport type map
const UNKNOWN_SPORT: &str = "Unknown";

/// Configuration for section detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct SectionConfig {
    /// Grid cell size in meters (default: 100m)
    pub cell_size_meters: f64,
    /// Minimum entries for a cell to count as frequent (default: 3)
    pub min_visits: u32,
    /// Minimum cells in a section (default: 5)
    pub min_cells: u32,
    /// Join diagonal neighbors (8-connectivity) when flood filling (default: true)
    pub diagonal_connect: bool,
}

impl Default for SectionConfig {
    fn default() -> Self {
        Self {
            cell_size_meters: 100.0,
            min_visits: 3,
            min_cells: 5,
            diagonal_connect: true,
        }
    }
}

impl SectionConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.cell_size_meters.is_finite() || self.cell_size_meters < MIN_CELL_SIZE_METERS {
            return Err(RouteAtlasError::config(format!(
                "cell_size_meters must be at least {}m, got {}",
                MIN_CELL_SIZE_METERS, self.cell_size_meters
            )));
        }
        Ok(())
    }
}

/// A frequently-traveled section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct FrequentSection {
    /// Unique section ID
    pub id: String,
    /// Sport type ("Run", "Ride", etc.)
    pub sport_type: String,
    /// Member cells, one connected component, sorted by (row, col)
    pub cells: Vec<CellCoord>,
    /// Cell centers in first-visit order
    pub polyline: Vec<GpsPoint>,
    /// All activity IDs that pass through any member cell
    pub activity_ids: Vec<String>,
    /// Route group IDs of those activities
    pub route_ids: Vec<String>,
    /// Sum of cell entries across member cells
    pub visit_count: u32,
    /// Polyline length in meters
    pub distance_meters: f64,
    /// Earliest activity start (Unix seconds), 0 if unknown
    pub first_visit: i64,
    /// Latest activity start (Unix seconds), 0 if unknown
    pub last_visit: i64,
}

/// Detect frequent sections from route signatures.
///
/// `groups` is optional provenance: activities found in a group contribute
/// its id to `route_ids`. Activities missing from `sport_types` are counted
/// under "Unknown".
pub fn detect_frequent_sections(
    signatures: &[RouteSignature],
    groups: &[RouteGroup],
    sport_types: &HashMap<String, String>,
    config: &SectionConfig,
) -> Result<Vec<FrequentSection>> {
    detect(signatures, groups, sport_types, config, None)
}

/// Same as [`detect_frequent_sections`], checking `cancel` per signature and per component.
pub fn detect_frequent_sections_cancellable(
    signatures: &[RouteSignature],
    groups: &[RouteGroup],
    sport_types: &HashMap<String, String>,
    config: &SectionConfig,
    cancel: &CancellationToken,
) -> Result<Vec<FrequentSection>> {
    detect(signatures, groups, sport_types, config, Some(cancel))
}

fn detect(
    signatures: &[RouteSignature],
    groups: &[RouteGroup],
    sport_types: &HashMap<String, String>,
    config: &SectionConfig,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<FrequentSection>> {
    config.validate()?;
    info!(
        "[Sections] Detecting from {} signatures, {} groups, {}m cells",
        signatures.len(),
        groups.len(),
        config.cell_size_meters
    );
    let start = std::time::Instant::now();

    let grid = Grid::new(config.cell_size_meters);
    let index = GroupIndex::build(groups);

    // Partition by sport; BTreeMap keeps sport processing order stable
    let mut seen: HashSet<&str> = HashSet::new();
    let mut by_sport: BTreeMap<&str, Vec<Contribution<'_>>> = BTreeMap::new();
    for (order, sig) in signatures.iter().enumerate() {
        if !seen.insert(sig.activity_id.as_str()) {
            debug!("[Sections] Skipping duplicate activity {}", sig.activity_id);
            continue;
        }
        let sport = sport_types
            .get(&sig.activity_id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_SPORT);
        by_sport.entry(sport).or_default().push(Contribution {
            order,
            activity_id: &sig.activity_id,
            route_id: index.group_of(&sig.activity_id),
            route_name: None,
            timestamp: sig.start_time,
            points: &sig.points,
        });
    }

    let mut sections: Vec<FrequentSection> = Vec::new();
    for (sport, contributions) in &by_sport {
        let cells = aggregate(&grid, contributions, None, cancel)?;
        let frequent: BTreeSet<CellCoord> = cells
            .iter()
            .filter(|(_, v)| v.visits >= config.min_visits)
            .map(|(&cell, _)| cell)
            .collect();

        let components = connected_components(&frequent, config.diagonal_connect, cancel)?;
        let before = sections.len();
        sections.extend(
            components
                .into_iter()
                .filter(|component| component.len() >= config.min_cells as usize)
                .map(|component| build_section(sport, component, &cells, &grid)),
        );

        info!(
            "[Sections] {}: {} tracks, {} visited cells, {} frequent, {} sections",
            sport,
            contributions.len(),
            cells.len(),
            frequent.len(),
            sections.len() - before
        );
    }

    // Most visited first; ties keep sport then grid order
    sections.sort_by(|a, b| {
        b.visit_count
            .cmp(&a.visit_count)
            .then_with(|| a.sport_type.cmp(&b.sport_type))
            .then_with(|| a.cells.cmp(&b.cells))
    });

    let mut counters: HashMap<String, usize> = HashMap::new();
    for section in &mut sections {
        let n = counters.entry(section.sport_type.clone()).or_insert(0);
        section.id = format!("sec_{}_{}", section.sport_type.to_lowercase(), n);
        *n += 1;
    }

    info!(
        "[Sections] Detected {} total sections in {:?}",
        sections.len(),
        start.elapsed()
    );
    Ok(sections)
}

/// Flood fill `cells` into connected components, each sorted by (row, col).
fn connected_components(
    cells: &BTreeSet<CellCoord>,
    diagonal: bool,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<Vec<CellCoord>>> {
    let mut visited: HashSet<CellCoord> = HashSet::with_capacity(cells.len());
    let mut components = Vec::new();

    for &seed in cells {
        if visited.contains(&seed) {
            continue;
        }
        if let Some(token) = cancel {
            token.check()?;
        }

        let mut component = Vec::new();
        let mut queue = VecDeque::from([seed]);
        visited.insert(seed);

        while let Some(cell) = queue.pop_front() {
            component.push(cell);
            for next in cell.neighbors(diagonal) {
                if cells.contains(&next) && visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        component.sort_unstable();
        components.push(component);
    }

    Ok(components)
}

fn build_section(sport: &str, cells: Vec<CellCoord>, visits: &CellMap, grid: &Grid) -> FrequentSection {
    let mut activity_ids: BTreeSet<&str> = BTreeSet::new();
    let mut route_ids: BTreeSet<&str> = BTreeSet::new();
    let mut visit_count = 0u32;
    let mut first_visit: Option<i64> = None;
    let mut last_visit: Option<i64> = None;

    for cell in &cells {
        let Some(v) = visits.get(cell) else { continue };
        visit_count += v.visits;
        activity_ids.extend(v.activity_ids.iter().map(String::as_str));
        route_ids.extend(v.route_counts.keys().map(String::as_str));
        if let Some(ts) = v.first_visit {
            first_visit = Some(first_visit.map_or(ts, |f| f.min(ts)));
        }
        if let Some(ts) = v.last_visit {
            last_visit = Some(last_visit.map_or(ts, |l| l.max(ts)));
        }
    }

    let mut ordered = cells.clone();
    ordered.sort_by_key(|cell| {
        let seen = visits
            .get(cell)
            .and_then(|v| v.first_seen)
            .unwrap_or((i64::MAX, usize::MAX, usize::MAX));
        (seen, *cell)
    });
    let polyline: Vec<GpsPoint> = ordered.iter().map(|&c| grid.cell_center(c)).collect();

    FrequentSection {
        id: String::new(),
        sport_type: sport.to_string(),
        distance_meters: polyline_length(&polyline),
        polyline,
        activity_ids: activity_ids.into_iter().map(String::from).collect(),
        route_ids: route_ids.into_iter().map(String::from).collect(),
        visit_count,
        first_visit: first_visit.unwrap_or(0),
        last_visit: last_visit.unwrap_or(0),
        cells,
    }
}
