//! Route grouping: cluster signatures that traveled the same physical route.
//!
//! Signatures are admitted one at a time in input order. Each is compared
//! only against the representative of every open group whose bounding box is
//! close enough to possibly match, and joins the first (oldest) group it
//! matches. A signature that matches nothing and is long enough anchors a new
//! group and becomes its representative.
//!
//! The admission order is sequential so the result never depends on thread
//! scheduling; with the `parallel` feature only the candidate comparisons for
//! one signature run concurrently.

use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::geo_utils::meters_to_degrees;
use crate::matching::{admission_distance, compare_validated, lengths_comparable};
use crate::signatures::{
    signatures_from_buffer, signatures_from_flat_tracks, signatures_from_tracks, FlatGpsTrack,
    GpsTrack,
};
use crate::{Direction, MatchConfig, MatchResult, RouteGroup, RouteSignature};

/// How an activity was admitted to its group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct ActivityMatchInfo {
    pub activity_id: String,
    pub group_id: String,
    /// Match against the group representative (100 for the anchor)
    pub match_percentage: f64,
    pub direction: Direction,
}

/// Groups plus per-activity admission details.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GroupingResult {
    pub groups: Vec<RouteGroup>,
    /// One entry per activity placed during this call, in admission order
    pub activity_matches: Vec<ActivityMatchInfo>,
}

/// Bounding box of a group representative (used for spatial indexing).
#[derive(Debug, Clone)]
struct GroupEnvelope {
    group_index: usize,
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
}

impl RTreeObject for GroupEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.min_lng, self.min_lat], [self.max_lng, self.max_lat])
    }
}

/// Sequential admission state shared by batch and incremental grouping.
struct GroupingEngine<'a> {
    config: &'a MatchConfig,
    groups: Vec<RouteGroup>,
    placed: HashSet<String>,
    rtree: RTree<GroupEnvelope>,
    matches: Vec<ActivityMatchInfo>,
    search_margin: f64,
}

impl<'a> GroupingEngine<'a> {
    fn new(config: &'a MatchConfig) -> Self {
        Self {
            config,
            groups: Vec::new(),
            placed: HashSet::new(),
            rtree: RTree::new(),
            matches: Vec::new(),
            // Boxes further apart than this can never reach min_match_percentage
            search_margin: admission_distance(config).max(0.0),
        }
    }

    /// Adopt previously computed groups as-is.
    fn seed(&mut self, existing: &[RouteGroup]) {
        for group in existing {
            self.placed.extend(group.activity_ids.iter().cloned());
            self.open(group.clone());
        }
    }

    fn open(&mut self, group: RouteGroup) {
        let bounds = group.representative.bounds;
        self.rtree.insert(GroupEnvelope {
            group_index: self.groups.len(),
            min_lat: bounds.min_lat,
            max_lat: bounds.max_lat,
            min_lng: bounds.min_lng,
            max_lng: bounds.max_lng,
        });
        self.groups.push(group);
    }

    fn admit(&mut self, sig: &RouteSignature) {
        if self.placed.contains(&sig.activity_id) {
            debug!("[Grouping] Skipping duplicate activity {}", sig.activity_id);
            return;
        }

        if let Some((index, result)) = self.find_matching_group(sig) {
            let group = &mut self.groups[index];
            group.append_member(sig, result.match_percentage);
            self.matches.push(ActivityMatchInfo {
                activity_id: sig.activity_id.clone(),
                group_id: group.group_id.clone(),
                match_percentage: result.match_percentage,
                direction: result.direction,
            });
            self.placed.insert(sig.activity_id.clone());
            return;
        }

        if sig.total_distance < self.config.min_route_distance {
            debug!(
                "[Grouping] {} unmatched and too short to anchor ({:.0}m)",
                sig.activity_id, sig.total_distance
            );
            return;
        }

        self.matches.push(ActivityMatchInfo {
            activity_id: sig.activity_id.clone(),
            group_id: sig.activity_id.clone(),
            match_percentage: 100.0,
            direction: Direction::Same,
        });
        self.placed.insert(sig.activity_id.clone());
        self.open(RouteGroup::new(sig.clone()));
    }

    /// Candidate groups in creation order, after the box and length prefilter.
    fn candidates(&self, sig: &RouteSignature) -> Vec<usize> {
        let b = &sig.bounds;
        let ref_lat = b.min_lat.abs().max(b.max_lat.abs());
        let margin = meters_to_degrees(self.search_margin, ref_lat);
        let search = AABB::from_corners(
            [b.min_lng - margin, b.min_lat - margin],
            [b.max_lng + margin, b.max_lat + margin],
        );

        let mut candidates: Vec<usize> = self
            .rtree
            .locate_in_envelope_intersecting(&search)
            .map(|e| e.group_index)
            .filter(|&i| {
                lengths_comparable(
                    sig.total_distance,
                    self.groups[i].representative.total_distance,
                    self.config,
                )
            })
            .collect();
        candidates.sort_unstable();
        candidates
    }

    /// Groups hold one physical route: a partial overlap never joins.
    fn admits(&self, result: &MatchResult) -> bool {
        result.direction != Direction::Partial
            && result.match_percentage >= self.config.min_match_percentage
    }

    #[cfg(feature = "parallel")]
    fn find_matching_group(&self, sig: &RouteSignature) -> Option<(usize, MatchResult)> {
        use rayon::prelude::*;

        let candidates = self.candidates(sig);
        candidates.par_iter().find_map_first(|&i| {
            compare_validated(&self.groups[i].representative, sig, self.config)
                .filter(|r| self.admits(r))
                .map(|r| (i, r))
        })
    }

    #[cfg(not(feature = "parallel"))]
    fn find_matching_group(&self, sig: &RouteSignature) -> Option<(usize, MatchResult)> {
        self.candidates(sig).into_iter().find_map(|i| {
            compare_validated(&self.groups[i].representative, sig, self.config)
                .filter(|r| self.admits(r))
                .map(|r| (i, r))
        })
    }

    fn run(
        &mut self,
        signatures: &[RouteSignature],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        for sig in signatures {
            if let Some(token) = cancel {
                token.check()?;
            }
            self.admit(sig);
        }
        Ok(())
    }

    fn finish(self) -> GroupingResult {
        GroupingResult {
            groups: self.groups,
            activity_matches: self.matches,
        }
    }
}

/// Group similar routes together.
///
/// Deterministic for a fixed input order: the first signature of each group
/// is its anchor and representative, and every later signature joins the
/// oldest group it matches.
///
/// # Example
/// ```
/// use route_atlas::{GpsPoint, RouteSignature, MatchConfig, group_signatures};
///
/// // Each point is ~111m apart (0.001 degrees latitude), ~1km total
/// let points: Vec<GpsPoint> = (0..10)
///     .map(|i| GpsPoint::new(51.5074 + i as f64 * 0.001, -0.1278))
///     .collect();
///
/// let sig1 = RouteSignature::from_points("a", &points, &MatchConfig::default()).unwrap();
/// let sig2 = RouteSignature::from_points("b", &points, &MatchConfig::default()).unwrap();
///
/// let groups = group_signatures(&[sig1, sig2], &MatchConfig::default()).unwrap();
/// assert_eq!(groups.len(), 1); // Both routes in same group
/// ```
pub fn group_signatures(signatures: &[RouteSignature], config: &MatchConfig) -> Result<Vec<RouteGroup>> {
    Ok(group_signatures_with_matches(signatures, config)?.groups)
}

/// Same as [`group_signatures`], also reporting how each activity was admitted.
pub fn group_signatures_with_matches(
    signatures: &[RouteSignature],
    config: &MatchConfig,
) -> Result<GroupingResult> {
    grouping_pass(&[], signatures, config, None)
}

/// Group signatures, checking `cancel` before each signature.
pub fn group_signatures_cancellable(
    signatures: &[RouteSignature],
    config: &MatchConfig,
    cancel: &CancellationToken,
) -> Result<Vec<RouteGroup>> {
    Ok(grouping_pass(&[], signatures, config, Some(cancel))?.groups)
}

/// Incremental grouping: add new signatures to existing groups.
///
/// Equivalent to [`group_signatures`] over `existing_signatures ++ new_signatures`
/// when `existing_groups` came from grouping `existing_signatures`: new
/// signatures are compared against existing representatives and against
/// groups opened earlier in this call, never existing against existing.
///
/// Representatives travel inside the groups, so `existing_signatures` is
/// only cross-checked for members it is missing.
pub fn group_incremental(
    new_signatures: &[RouteSignature],
    existing_groups: &[RouteGroup],
    existing_signatures: &[RouteSignature],
    config: &MatchConfig,
) -> Result<Vec<RouteGroup>> {
    check_existing(existing_groups, existing_signatures);
    Ok(grouping_pass(existing_groups, new_signatures, config, None)?.groups)
}

/// Incremental grouping, checking `cancel` before each new signature.
pub fn group_incremental_cancellable(
    new_signatures: &[RouteSignature],
    existing_groups: &[RouteGroup],
    existing_signatures: &[RouteSignature],
    config: &MatchConfig,
    cancel: &CancellationToken,
) -> Result<Vec<RouteGroup>> {
    check_existing(existing_groups, existing_signatures);
    Ok(grouping_pass(existing_groups, new_signatures, config, Some(cancel))?.groups)
}

fn grouping_pass(
    existing_groups: &[RouteGroup],
    signatures: &[RouteSignature],
    config: &MatchConfig,
    cancel: Option<&CancellationToken>,
) -> Result<GroupingResult> {
    config.validate()?;
    info!(
        "[Grouping] Grouping {} signatures into {} existing groups",
        signatures.len(),
        existing_groups.len()
    );
    let start = std::time::Instant::now();

    let mut engine = GroupingEngine::new(config);
    engine.seed(existing_groups);
    engine.run(signatures, cancel)?;
    let result = engine.finish();

    info!(
        "[Grouping] {} groups ({} activities placed) in {:?}",
        result.groups.len(),
        result.activity_matches.len(),
        start.elapsed()
    );
    Ok(result)
}

fn check_existing(existing_groups: &[RouteGroup], existing_signatures: &[RouteSignature]) {
    let known: HashSet<&str> = existing_signatures
        .iter()
        .map(|s| s.activity_id.as_str())
        .collect();
    let missing = existing_groups
        .iter()
        .flat_map(|g| g.activity_ids.iter())
        .filter(|id| !known.contains(id.as_str()))
        .count();
    if missing > 0 {
        warn!(
            "[Grouping] {} grouped activities have no signature in the existing set",
            missing
        );
    }
}

/// Process routes end-to-end: create signatures AND group them in one call.
pub fn process_routes_batch(tracks: &[GpsTrack], config: &MatchConfig) -> Result<Vec<RouteGroup>> {
    let signatures = signatures_from_tracks(tracks, config, None)?;
    Ok(grouping_pass(&[], &signatures, config, None)?.groups)
}

/// [`process_routes_batch`], checking `cancel` per track and per signature.
pub fn process_routes_batch_cancellable(
    tracks: &[GpsTrack],
    config: &MatchConfig,
    cancel: &CancellationToken,
) -> Result<Vec<RouteGroup>> {
    let signatures = signatures_from_tracks(tracks, config, Some(cancel))?;
    Ok(grouping_pass(&[], &signatures, config, Some(cancel))?.groups)
}

/// Process routes end-to-end from per-track flat coordinate arrays.
pub fn process_routes_flat(tracks: &[FlatGpsTrack], config: &MatchConfig) -> Result<Vec<RouteGroup>> {
    let signatures = signatures_from_flat_tracks(tracks, config, None)?;
    Ok(grouping_pass(&[], &signatures, config, None)?.groups)
}

/// [`process_routes_flat`], checking `cancel` per track and per signature.
pub fn process_routes_flat_cancellable(
    tracks: &[FlatGpsTrack],
    config: &MatchConfig,
    cancel: &CancellationToken,
) -> Result<Vec<RouteGroup>> {
    let signatures = signatures_from_flat_tracks(tracks, config, Some(cancel))?;
    Ok(grouping_pass(&[], &signatures, config, Some(cancel))?.groups)
}

/// Process routes end-to-end from one contiguous coordinate buffer.
pub fn process_routes_flat_buffer(
    activity_ids: &[String],
    coords: &[f64],
    offsets: &[u32],
    config: &MatchConfig,
) -> Result<Vec<RouteGroup>> {
    let signatures = signatures_from_buffer(activity_ids, coords, offsets, config, None)?;
    Ok(grouping_pass(&[], &signatures, config, None)?.groups)
}

/// [`process_routes_flat_buffer`], checking `cancel` per track and per signature.
pub fn process_routes_flat_buffer_cancellable(
    activity_ids: &[String],
    coords: &[f64],
    offsets: &[u32],
    config: &MatchConfig,
    cancel: &CancellationToken,
) -> Result<Vec<RouteGroup>> {
    let signatures = signatures_from_buffer(activity_ids, coords, offsets, config, Some(cancel))?;
    Ok(grouping_pass(&[], &signatures, config, Some(cancel))?.groups)
}

/// Derived lookup tables over a set of groups.
///
/// Groups own their member lists; this index is rebuilt from them and never
/// written back.
#[derive(Debug, Clone, Default)]
pub struct GroupIndex {
    activity_to_group: HashMap<String, String>,
    group_members: HashMap<String, Vec<String>>,
}

impl GroupIndex {
    pub fn build(groups: &[RouteGroup]) -> Self {
        let mut index = Self::default();
        for group in groups {
            for id in &group.activity_ids {
                index
                    .activity_to_group
                    .entry(id.clone())
                    .or_insert_with(|| group.group_id.clone());
            }
            index
                .group_members
                .insert(group.group_id.clone(), group.activity_ids.clone());
        }
        index
    }

    /// Group containing `activity_id`, if any.
    pub fn group_of(&self, activity_id: &str) -> Option<&str> {
        self.activity_to_group.get(activity_id).map(String::as_str)
    }

    pub fn members(&self, group_id: &str) -> Option<&[String]> {
        self.group_members.get(group_id).map(Vec::as_slice)
    }

    pub fn group_count(&self) -> usize {
        self.group_members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.group_members.is_empty()
    }
}
