//! Fixed-reference grid shared by section detection and heatmap generation.
//!
//! Cells are squares in Web Mercator space anchored at (0°, 0°), so the same
//! coordinate always falls in the same cell for a given cell size no matter
//! which call produced it. The cell size is exact at the equator and shrinks
//! on the ground by `cos(latitude)`.
//!
//! Tracks are densified to at most half a cell between samples before
//! quantization, so a simplified polyline still produces a contiguous chain
//! of cells. A visit is counted each time a track *enters* a cell.
//!
//! Aggregation builds one partial cell map per track and merges them with
//! [`CellVisits::merge`], which is associative and commutative, so the
//! partials can be combined in any grouping across threads.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::{Bounds, GpsPoint};

/// WGS84 semi-major axis, the Web Mercator sphere radius
const MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Latitude limit of the square Web Mercator world
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// Upper bound on samples inserted into one segment (a bad GPS jump across a continent)
const MAX_SEGMENT_STEPS: usize = 10_000;

/// Smallest accepted cell size. Row and column indices stay well inside `i32`.
pub const MIN_CELL_SIZE_METERS: f64 = 1.0;

/// Integer grid address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct CellCoord {
    pub row: i32,
    pub col: i32,
}

impl CellCoord {
    pub fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    /// Adjacent cells: 4-connected, or 8-connected when `diagonal`.
    pub fn neighbors(self, diagonal: bool) -> impl Iterator<Item = CellCoord> {
        const ORTHOGONAL: [(i32, i32); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
        const DIAGONAL: [(i32, i32); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];

        let orthogonal: &'static [(i32, i32)] = &ORTHOGONAL;
        let extra: &'static [(i32, i32)] = if diagonal { &DIAGONAL } else { &[] };
        orthogonal
            .iter()
            .chain(extra.iter())
            .map(move |&(dr, dc)| CellCoord::new(self.row + dr, self.col + dc))
    }
}

#[derive(Debug, Clone, Copy)]
struct MercatorPoint {
    x: f64,
    y: f64,
}

fn to_mercator(lat: f64, lng: f64) -> MercatorPoint {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = lng.to_radians() * MERCATOR_RADIUS;
    let y = (lat.to_radians() / 2.0 + PI / 4.0).tan().ln() * MERCATOR_RADIUS;
    MercatorPoint { x, y }
}

fn from_mercator(x: f64, y: f64) -> GpsPoint {
    let lng = (x / MERCATOR_RADIUS).to_degrees();
    let lat = (2.0 * (y / MERCATOR_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    GpsPoint::new(lat, lng)
}

/// Quantizer for one cell size.
#[derive(Debug, Clone, Copy)]
pub struct Grid {
    cell_size: f64,
}

impl Grid {
    /// `cell_size_meters` must be at least [`MIN_CELL_SIZE_METERS`]; configs validate this before a grid is built.
    pub fn new(cell_size_meters: f64) -> Self {
        Self {
            cell_size: cell_size_meters,
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Cell enclosing a coordinate.
    pub fn cell_of(&self, lat: f64, lng: f64) -> CellCoord {
        self.cell_of_mercator(to_mercator(lat, lng))
    }

    fn cell_of_mercator(&self, p: MercatorPoint) -> CellCoord {
        CellCoord {
            row: (p.y / self.cell_size).floor() as i32,
            col: (p.x / self.cell_size).floor() as i32,
        }
    }

    /// Geographic center of a cell.
    pub fn cell_center(&self, cell: CellCoord) -> GpsPoint {
        from_mercator(
            (cell.col as f64 + 0.5) * self.cell_size,
            (cell.row as f64 + 0.5) * self.cell_size,
        )
    }

    /// Geographic extent of the cell range `min..=max`.
    pub fn span_bounds(&self, min: CellCoord, max: CellCoord) -> Bounds {
        let south_west = from_mercator(min.col as f64 * self.cell_size, min.row as f64 * self.cell_size);
        let north_east = from_mercator(
            (max.col + 1) as f64 * self.cell_size,
            (max.row + 1) as f64 * self.cell_size,
        );
        Bounds {
            min_lat: south_west.latitude,
            max_lat: north_east.latitude,
            min_lng: south_west.longitude,
            max_lng: north_east.longitude,
        }
    }

    /// Cells entered by a track, in travel order, with the sample index at entry.
    ///
    /// Invalid fixes are skipped. Samples outside `within` are dropped, and
    /// leaving the region ends the current visit.
    pub fn trace(&self, points: &[GpsPoint], within: Option<&Bounds>) -> Vec<(usize, CellCoord)> {
        let region = within.map(|b| {
            let lo = to_mercator(b.min_lat, b.min_lng);
            let hi = to_mercator(b.max_lat, b.max_lng);
            (lo, hi)
        });
        let inside = |p: &MercatorPoint| match &region {
            Some((lo, hi)) => p.x >= lo.x && p.x <= hi.x && p.y >= lo.y && p.y <= hi.y,
            None => true,
        };

        let step = self.cell_size / 2.0;
        let mut entries = Vec::new();
        let mut current: Option<CellCoord> = None;
        let mut seq = 0usize;

        let mut visit = |p: MercatorPoint, entries: &mut Vec<(usize, CellCoord)>| {
            if inside(&p) {
                let cell = self.cell_of_mercator(p);
                if current != Some(cell) {
                    entries.push((seq, cell));
                    current = Some(cell);
                }
            } else {
                current = None;
            }
            seq += 1;
        };

        let mut prev: Option<MercatorPoint> = None;
        for point in points.iter().filter(|p| p.is_valid()) {
            let p = to_mercator(point.latitude, point.longitude);
            match prev {
                None => visit(p, &mut entries),
                Some(a) => {
                    let length = (p.x - a.x).hypot(p.y - a.y);
                    let steps = ((length / step).ceil() as usize).clamp(1, MAX_SEGMENT_STEPS);
                    for k in 1..=steps {
                        let t = k as f64 / steps as f64;
                        let sample = MercatorPoint {
                            x: a.x + t * (p.x - a.x),
                            y: a.y + t * (p.y - a.y),
                        };
                        visit(sample, &mut entries);
                    }
                }
            }
            prev = Some(p);
        }

        entries
    }
}

/// One track's contribution to a grid aggregation.
#[derive(Debug, Clone)]
pub(crate) struct Contribution<'a> {
    /// Input position, used to break first-visit ties
    pub order: usize,
    pub activity_id: &'a str,
    pub route_id: Option<&'a str>,
    pub route_name: Option<&'a str>,
    pub timestamp: Option<i64>,
    pub points: &'a [GpsPoint],
}

/// Sort key of the earliest entry into a cell: (timestamp, input order,
/// sample index), unknown timestamps last.
pub(crate) type VisitOrder = (i64, usize, usize);

/// Aggregated traffic through one cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CellVisits {
    pub visits: u32,
    pub activity_ids: BTreeSet<String>,
    /// route id -> number of distinct activities of that route
    pub route_counts: BTreeMap<String, u32>,
    pub route_names: BTreeMap<String, String>,
    pub first_visit: Option<i64>,
    pub last_visit: Option<i64>,
    pub first_seen: Option<VisitOrder>,
}

impl CellVisits {
    /// Combine two partial aggregates.
    pub fn merge(&mut self, other: CellVisits) {
        self.visits += other.visits;
        self.activity_ids.extend(other.activity_ids);
        for (route, count) in other.route_counts {
            *self.route_counts.entry(route).or_insert(0) += count;
        }
        for (route, name) in other.route_names {
            self.route_names
                .entry(route)
                .and_modify(|n| {
                    if name < *n {
                        *n = name.clone();
                    }
                })
                .or_insert(name);
        }
        self.first_visit = min_opt(self.first_visit, other.first_visit);
        self.last_visit = max_opt(self.last_visit, other.last_visit);
        self.first_seen = min_opt(self.first_seen, other.first_seen);
    }
}

fn min_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn max_opt<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

pub(crate) type CellMap = HashMap<CellCoord, CellVisits>;

fn merge_maps(mut a: CellMap, mut b: CellMap) -> CellMap {
    if a.len() < b.len() {
        std::mem::swap(&mut a, &mut b);
    }
    for (cell, visits) in b {
        a.entry(cell).or_default().merge(visits);
    }
    a
}

/// Cell map of a single track.
fn partial_map(grid: &Grid, c: &Contribution<'_>, within: Option<&Bounds>) -> CellMap {
    let mut map = CellMap::new();
    let timestamp_key = c.timestamp.unwrap_or(i64::MAX);

    for (seq, cell) in grid.trace(c.points, within) {
        let entry = map.entry(cell).or_default();
        entry.visits += 1;
        entry.first_seen = min_opt(entry.first_seen, Some((timestamp_key, c.order, seq)));
    }

    for entry in map.values_mut() {
        entry.activity_ids.insert(c.activity_id.to_string());
        if let Some(route) = c.route_id {
            entry.route_counts.insert(route.to_string(), 1);
            if let Some(name) = c.route_name {
                entry.route_names.insert(route.to_string(), name.to_string());
            }
        }
        entry.first_visit = c.timestamp;
        entry.last_visit = c.timestamp;
    }

    map
}

/// Aggregate many tracks into one cell map, checking `cancel` per track.
///
/// Callers pass each activity once; route counts assume distinct activity ids.
pub(crate) fn aggregate(
    grid: &Grid,
    contributions: &[Contribution<'_>],
    within: Option<&Bounds>,
    cancel: Option<&CancellationToken>,
) -> Result<CellMap> {
    let check = || match cancel {
        Some(token) => token.check(),
        None => Ok(()),
    };

    #[cfg(feature = "parallel")]
    let cells = {
        use rayon::prelude::*;
        contributions
            .par_iter()
            .map(|c| {
                check()?;
                Ok(partial_map(grid, c, within))
            })
            .try_reduce(CellMap::new, |a, b| Ok(merge_maps(a, b)))?
    };

    #[cfg(not(feature = "parallel"))]
    let cells = {
        let mut cells = CellMap::new();
        for c in contributions {
            check()?;
            cells = merge_maps(cells, partial_map(grid, c, within));
        }
        cells
    };

    Ok(cells)
}
