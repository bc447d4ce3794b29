//! FFI exports for mobile embedders (iOS/Android via uniffi).
//!
//! Each export takes owned inputs, falls back to the default configuration
//! when none is given, and returns the same `Result` the Rust API does.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};

use crate::error::RouteAtlasError;
use crate::heatmap::{ActivityHeatmapData, CellQueryResult, HeatmapConfig, HeatmapResult};
use crate::sections::{FrequentSection, SectionConfig};
use crate::signatures::{FlatGpsTrack, GpsTrack};
use crate::{init_logging, CancellationToken, GpsPoint, MatchConfig, MatchResult, RouteGroup, RouteSignature};

type FfiResult<T> = std::result::Result<T, RouteAtlasError>;

/// Input mapping activity IDs to sport types
#[derive(Debug, Clone, uniffi::Record)]
pub struct ActivitySportType {
    pub activity_id: String,
    pub sport_type: String,
}

// ========================================================================
// Cancellation
// ========================================================================

/// Create a token the host can cancel from any thread.
#[uniffi::export]
pub fn new_cancellation_token() -> Arc<CancellationToken> {
    Arc::new(CancellationToken::new())
}

#[uniffi::export]
impl CancellationToken {
    /// Ask running calls holding this token to stop.
    pub fn request_cancel(&self) {
        self.cancel();
    }

    pub fn cancel_requested(&self) -> bool {
        self.is_cancelled()
    }
}

// ========================================================================
// Signatures
// ========================================================================

/// Create a route signature from GPS points.
#[uniffi::export]
pub fn create_signature(
    activity_id: String,
    points: Vec<GpsPoint>,
    config: Option<MatchConfig>,
) -> FfiResult<Option<RouteSignature>> {
    init_logging();
    debug!("[RouteAtlas] create_signature for {} with {} points", activity_id, points.len());
    crate::signatures::create_signature(&activity_id, &points, &config.unwrap_or_default())
}

/// Create multiple route signatures in one call (parallel when available).
#[uniffi::export]
pub fn create_signatures_batch(tracks: Vec<GpsTrack>, config: Option<MatchConfig>) -> FfiResult<Vec<RouteSignature>> {
    init_logging();
    crate::signatures::create_signatures_batch(&tracks, &config.unwrap_or_default())
}

/// Create signatures from per-track flat coordinate arrays.
#[uniffi::export]
pub fn create_signatures_flat(tracks: Vec<FlatGpsTrack>, config: Option<MatchConfig>) -> FfiResult<Vec<RouteSignature>> {
    init_logging();
    crate::signatures::create_signatures_flat(&tracks, &config.unwrap_or_default())
}

/// Create signatures from one shared coordinate buffer plus per-track point offsets.
#[uniffi::export]
pub fn create_signatures_flat_buffer(
    activity_ids: Vec<String>,
    coords: Vec<f64>,
    offsets: Vec<u32>,
    config: Option<MatchConfig>,
) -> FfiResult<Vec<RouteSignature>> {
    init_logging();
    crate::signatures::create_signatures_flat_buffer(&activity_ids, &coords, &offsets, &config.unwrap_or_default())
}

// ========================================================================
// Matching and grouping
// ========================================================================

/// Compare two routes and return match result.
#[uniffi::export]
pub fn ffi_compare_routes(
    sig1: RouteSignature,
    sig2: RouteSignature,
    config: Option<MatchConfig>,
) -> FfiResult<Option<MatchResult>> {
    init_logging();
    debug!("[RouteAtlas] Comparing {} vs {}", sig1.activity_id, sig2.activity_id);
    let result = crate::compare_routes(&sig1, &sig2, &config.unwrap_or_default())?;
    if let Some(ref r) = result {
        debug!("[RouteAtlas] Match found: {:.1}% ({})", r.match_percentage, r.direction);
    }
    Ok(result)
}

/// Group signatures into route groups.
#[uniffi::export]
pub fn ffi_group_signatures(signatures: Vec<RouteSignature>, config: Option<MatchConfig>) -> FfiResult<Vec<RouteGroup>> {
    init_logging();
    crate::group_signatures(&signatures, &config.unwrap_or_default())
}

/// Group signatures, observing a host cancellation token.
#[uniffi::export]
pub fn ffi_group_signatures_cancellable(
    signatures: Vec<RouteSignature>,
    config: Option<MatchConfig>,
    cancel: Arc<CancellationToken>,
) -> FfiResult<Vec<RouteGroup>> {
    init_logging();
    crate::group_signatures_cancellable(&signatures, &config.unwrap_or_default(), &cancel)
}

/// Incremental grouping: add new signatures to existing groups.
/// Only compares new vs existing representatives and new vs new.
#[uniffi::export]
pub fn ffi_group_incremental(
    new_signatures: Vec<RouteSignature>,
    existing_groups: Vec<RouteGroup>,
    existing_signatures: Vec<RouteSignature>,
    config: Option<MatchConfig>,
) -> FfiResult<Vec<RouteGroup>> {
    init_logging();
    info!(
        "[RouteAtlas] Incremental grouping: {} new + {} existing signatures",
        new_signatures.len(),
        existing_signatures.len()
    );
    crate::group_incremental(
        &new_signatures,
        &existing_groups,
        &existing_signatures,
        &config.unwrap_or_default(),
    )
}

/// Incremental grouping, observing a host cancellation token.
#[uniffi::export]
pub fn ffi_group_incremental_cancellable(
    new_signatures: Vec<RouteSignature>,
    existing_groups: Vec<RouteGroup>,
    existing_signatures: Vec<RouteSignature>,
    config: Option<MatchConfig>,
    cancel: Arc<CancellationToken>,
) -> FfiResult<Vec<RouteGroup>> {
    init_logging();
    crate::group_incremental_cancellable(
        &new_signatures,
        &existing_groups,
        &existing_signatures,
        &config.unwrap_or_default(),
        &cancel,
    )
}

/// Process routes end-to-end: create signatures AND group them in one call.
#[uniffi::export]
pub fn process_routes_batch(tracks: Vec<GpsTrack>, config: Option<MatchConfig>) -> FfiResult<Vec<RouteGroup>> {
    init_logging();
    crate::process_routes_batch(&tracks, &config.unwrap_or_default())
}

/// Process routes end-to-end from per-track flat coordinate arrays.
#[uniffi::export]
pub fn process_routes_flat(tracks: Vec<FlatGpsTrack>, config: Option<MatchConfig>) -> FfiResult<Vec<RouteGroup>> {
    init_logging();
    crate::process_routes_flat(&tracks, &config.unwrap_or_default())
}

/// Process routes end-to-end from one shared coordinate buffer.
#[uniffi::export]
pub fn process_routes_flat_buffer(
    activity_ids: Vec<String>,
    coords: Vec<f64>,
    offsets: Vec<u32>,
    config: Option<MatchConfig>,
) -> FfiResult<Vec<RouteGroup>> {
    init_logging();
    crate::process_routes_flat_buffer(&activity_ids, &coords, &offsets, &config.unwrap_or_default())
}

/// [`process_routes_batch`], observing a host cancellation token.
#[uniffi::export]
pub fn process_routes_batch_cancellable(
    tracks: Vec<GpsTrack>,
    config: Option<MatchConfig>,
    cancel: Arc<CancellationToken>,
) -> FfiResult<Vec<RouteGroup>> {
    init_logging();
    crate::process_routes_batch_cancellable(&tracks, &config.unwrap_or_default(), &cancel)
}

/// [`process_routes_flat`], observing a host cancellation token.
#[uniffi::export]
pub fn process_routes_flat_cancellable(
    tracks: Vec<FlatGpsTrack>,
    config: Option<MatchConfig>,
    cancel: Arc<CancellationToken>,
) -> FfiResult<Vec<RouteGroup>> {
    init_logging();
    crate::process_routes_flat_cancellable(&tracks, &config.unwrap_or_default(), &cancel)
}

/// [`process_routes_flat_buffer`], observing a host cancellation token.
#[uniffi::export]
pub fn process_routes_flat_buffer_cancellable(
    activity_ids: Vec<String>,
    coords: Vec<f64>,
    offsets: Vec<u32>,
    config: Option<MatchConfig>,
    cancel: Arc<CancellationToken>,
) -> FfiResult<Vec<RouteGroup>> {
    init_logging();
    crate::process_routes_flat_buffer_cancellable(
        &activity_ids,
        &coords,
        &offsets,
        &config.unwrap_or_default(),
        &cancel,
    )
}

// ========================================================================
// Frequent Sections Detection
// ========================================================================

/// Detect frequent sections from route signatures.
/// Returns sections sorted by visit count (most visited first).
#[uniffi::export]
pub fn ffi_detect_frequent_sections(
    signatures: Vec<RouteSignature>,
    groups: Vec<RouteGroup>,
    sport_types: Vec<ActivitySportType>,
    config: Option<SectionConfig>,
) -> FfiResult<Vec<FrequentSection>> {
    init_logging();
    let sport_map = sport_type_map(sport_types);
    crate::detect_frequent_sections(&signatures, &groups, &sport_map, &config.unwrap_or_default())
}

/// Detect frequent sections, observing a host cancellation token.
#[uniffi::export]
pub fn ffi_detect_frequent_sections_cancellable(
    signatures: Vec<RouteSignature>,
    groups: Vec<RouteGroup>,
    sport_types: Vec<ActivitySportType>,
    config: Option<SectionConfig>,
    cancel: Arc<CancellationToken>,
) -> FfiResult<Vec<FrequentSection>> {
    init_logging();
    let sport_map = sport_type_map(sport_types);
    crate::detect_frequent_sections_cancellable(
        &signatures,
        &groups,
        &sport_map,
        &config.unwrap_or_default(),
        &cancel,
    )
}

fn sport_type_map(sport_types: Vec<ActivitySportType>) -> HashMap<String, String> {
    sport_types
        .into_iter()
        .map(|st| (st.activity_id, st.sport_type))
        .collect()
}

// ========================================================================
// Heatmap Generation
// ========================================================================

/// Generate a heatmap from route signatures.
#[uniffi::export]
pub fn ffi_generate_heatmap(
    signatures: Vec<RouteSignature>,
    activity_data: Vec<ActivityHeatmapData>,
    config: Option<HeatmapConfig>,
) -> FfiResult<HeatmapResult> {
    init_logging();
    crate::generate_heatmap(&signatures, &activity_data_map(activity_data), &config.unwrap_or_default())
}

/// Generate a heatmap, observing a host cancellation token.
#[uniffi::export]
pub fn ffi_generate_heatmap_cancellable(
    signatures: Vec<RouteSignature>,
    activity_data: Vec<ActivityHeatmapData>,
    config: Option<HeatmapConfig>,
    cancel: Arc<CancellationToken>,
) -> FfiResult<HeatmapResult> {
    init_logging();
    crate::generate_heatmap_cancellable(
        &signatures,
        &activity_data_map(activity_data),
        &config.unwrap_or_default(),
        &cancel,
    )
}

fn activity_data_map(activity_data: Vec<ActivityHeatmapData>) -> HashMap<String, ActivityHeatmapData> {
    activity_data
        .into_iter()
        .map(|d| (d.activity_id.clone(), d))
        .collect()
}

/// Query the heatmap at a specific location.
#[uniffi::export]
pub fn ffi_query_heatmap_cell(heatmap: HeatmapResult, lat: f64, lng: f64) -> Option<CellQueryResult> {
    crate::query_heatmap_cell(&heatmap, lat, lng)
}

// ========================================================================
// Defaults
// ========================================================================

/// Get default matching configuration.
#[uniffi::export]
pub fn get_default_config() -> MatchConfig {
    init_logging();
    info!("[RouteAtlas] default_config called - Rust is active!");
    crate::default_config()
}

/// Get default section detection configuration.
#[uniffi::export]
pub fn get_default_section_config() -> SectionConfig {
    crate::default_section_config()
}

/// Get default heatmap configuration.
#[uniffi::export]
pub fn get_default_heatmap_config() -> HeatmapConfig {
    crate::default_heatmap_config()
}
