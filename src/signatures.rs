//! Signature construction for single tracks, batches and flat coordinate buffers.
//!
//! Every variant funnels through [`RouteSignature::try_from_points`], so the
//! flat-buffer path produces exactly what the per-track path would for the
//! same logical input. A track that cannot be turned into a signature is
//! logged and omitted; it never fails the rest of the batch.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::error::{Result, RouteAtlasError};
use crate::{GpsPoint, MatchConfig, RouteSignature};

/// Input for batch signature creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsTrack {
    pub activity_id: String,
    pub points: Vec<GpsPoint>,
    /// Activity start (Unix seconds), copied onto the signature
    #[serde(default)]
    pub start_time: Option<i64>,
}

impl GpsTrack {
    pub fn new(activity_id: impl Into<String>, points: Vec<GpsPoint>) -> Self {
        Self {
            activity_id: activity_id.into(),
            points,
            start_time: None,
        }
    }
}

/// Input for flat coordinate processing (one allocation per track instead of per point).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct FlatGpsTrack {
    pub activity_id: String,
    /// Flat array of coordinates: [lat1, lng1, lat2, lng2, ...]
    pub coords: Vec<f64>,
    #[serde(default)]
    pub start_time: Option<i64>,
}

/// Create a route signature from GPS points.
///
/// `Ok(None)` means the track was too small to be meaningful; `Err` is only
/// returned for an invalid configuration.
pub fn create_signature(
    activity_id: &str,
    points: &[GpsPoint],
    config: &MatchConfig,
) -> Result<Option<RouteSignature>> {
    config.validate()?;
    Ok(build_one(activity_id, points, None, config))
}

/// Create multiple route signatures, one per track, preserving input order.
pub fn create_signatures_batch(tracks: &[GpsTrack], config: &MatchConfig) -> Result<Vec<RouteSignature>> {
    signatures_from_tracks(tracks, config, None)
}

pub(crate) fn signatures_from_tracks(
    tracks: &[GpsTrack],
    config: &MatchConfig,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<RouteSignature>> {
    config.validate()?;
    info!("[Signatures] Batch create called with {} tracks", tracks.len());
    let start = std::time::Instant::now();

    let signatures = map_tracks(tracks, cancel, |track| {
        build_one(&track.activity_id, &track.points, track.start_time, config)
    })?;

    info!(
        "[Signatures] Created {} signatures from {} tracks in {:?}",
        signatures.len(),
        tracks.len(),
        start.elapsed()
    );
    Ok(signatures)
}

/// Create signatures from per-track flat coordinate arrays.
///
/// A trailing odd coordinate is ignored, matching `chunks_exact(2)`.
pub fn create_signatures_flat(tracks: &[FlatGpsTrack], config: &MatchConfig) -> Result<Vec<RouteSignature>> {
    signatures_from_flat_tracks(tracks, config, None)
}

pub(crate) fn signatures_from_flat_tracks(
    tracks: &[FlatGpsTrack],
    config: &MatchConfig,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<RouteSignature>> {
    config.validate()?;
    info!("[Signatures] Flat create called with {} tracks", tracks.len());
    let start = std::time::Instant::now();

    let signatures = map_tracks(tracks, cancel, |track| {
        let points = points_from_flat(&track.coords);
        build_one(&track.activity_id, &points, track.start_time, config)
    })?;

    info!(
        "[Signatures] FLAT created {} signatures from {} tracks in {:?}",
        signatures.len(),
        tracks.len(),
        start.elapsed()
    );
    Ok(signatures)
}

/// Create signatures from one contiguous coordinate buffer shared by all tracks.
///
/// `coords` is `[lat1, lng1, lat2, lng2, ...]` for every track back to back.
/// `offsets[i]` is the index of the first *point* (not coordinate) of track
/// `i`; the track runs up to the next offset, or to the end of the buffer for
/// the last track.
///
/// The buffer as a whole must be well formed (even length, one id per
/// offset). A single track with an out-of-range or decreasing offset is
/// skipped like any other unusable track.
pub fn create_signatures_flat_buffer(
    activity_ids: &[String],
    coords: &[f64],
    offsets: &[u32],
    config: &MatchConfig,
) -> Result<Vec<RouteSignature>> {
    signatures_from_buffer(activity_ids, coords, offsets, config, None)
}

pub(crate) fn signatures_from_buffer(
    activity_ids: &[String],
    coords: &[f64],
    offsets: &[u32],
    config: &MatchConfig,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<RouteSignature>> {
    config.validate()?;

    if activity_ids.len() != offsets.len() {
        return Err(RouteAtlasError::MalformedBuffer {
            message: format!(
                "{} activity ids but {} track offsets",
                activity_ids.len(),
                offsets.len()
            ),
        });
    }
    if coords.len() % 2 != 0 {
        return Err(RouteAtlasError::MalformedBuffer {
            message: format!("coordinate buffer has odd length {}", coords.len()),
        });
    }

    let total_points = coords.len() / 2;
    info!(
        "[Signatures] Flat buffer create called with {} tracks, {} points",
        activity_ids.len(),
        total_points
    );
    let start = std::time::Instant::now();

    let ranges: Vec<(usize, usize, usize)> = offsets
        .iter()
        .enumerate()
        .map(|(i, &offset)| {
            let end = offsets
                .get(i + 1)
                .map_or(total_points, |&next| next as usize);
            (i, offset as usize, end)
        })
        .collect();

    let signatures = map_tracks(&ranges, cancel, |&(i, begin, end)| {
        let activity_id = &activity_ids[i];
        if begin > end || end > total_points {
            debug!(
                "[Signatures] Skipping {}: offsets {}..{} outside buffer of {} points",
                activity_id, begin, end, total_points
            );
            return None;
        }
        let points = points_from_flat(&coords[begin * 2..end * 2]);
        build_one(activity_id, &points, None, config)
    })?;

    info!(
        "[Signatures] Flat buffer created {} signatures in {:?}",
        signatures.len(),
        start.elapsed()
    );
    Ok(signatures)
}

/// Convert `[lat, lng, lat, lng, ...]` into points.
pub(crate) fn points_from_flat(coords: &[f64]) -> Vec<GpsPoint> {
    coords
        .chunks_exact(2)
        .map(|chunk| GpsPoint::new(chunk[0], chunk[1]))
        .collect()
}

fn build_one(
    activity_id: &str,
    points: &[GpsPoint],
    start_time: Option<i64>,
    config: &MatchConfig,
) -> Option<RouteSignature> {
    match RouteSignature::try_from_points(activity_id, points, config) {
        Ok(sig) => Some(sig.with_start_time(start_time)),
        Err(e) => {
            debug!("[Signatures] Skipping track: {}", e);
            None
        }
    }
}

/// Order-preserving map over independent tracks, dropping failures.
///
/// `cancel` is checked before each track.
#[cfg(feature = "parallel")]
fn map_tracks<T, F>(
    items: &[T],
    cancel: Option<&CancellationToken>,
    build: F,
) -> Result<Vec<RouteSignature>>
where
    T: Sync,
    F: Fn(&T) -> Option<RouteSignature> + Sync + Send,
{
    use rayon::prelude::*;
    items
        .par_iter()
        .filter_map(|item| match cancel.map_or(Ok(()), CancellationToken::check) {
            Ok(()) => build(item).map(Ok),
            Err(e) => Some(Err(e)),
        })
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn map_tracks<T, F>(
    items: &[T],
    cancel: Option<&CancellationToken>,
    build: F,
) -> Result<Vec<RouteSignature>>
where
    F: Fn(&T) -> Option<RouteSignature>,
{
    let mut signatures = Vec::with_capacity(items.len());
    for item in items {
        if let Some(token) = cancel {
            token.check()?;
        }
        signatures.extend(build(item));
    }
    Ok(signatures)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(lat0: f64, n: usize) -> Vec<GpsPoint> {
        (0..n)
            .map(|i| GpsPoint::new(lat0 + i as f64 * 0.001, 7.0 + i as f64 * 0.0005))
            .collect()
    }

    fn flatten(points: &[GpsPoint]) -> Vec<f64> {
        points.iter().flat_map(|p| [p.latitude, p.longitude]).collect()
    }

    #[test]
    fn test_batch_isolates_bad_tracks() {
        let tracks = vec![
            GpsTrack::new("good-1", line(46.0, 10)),
            GpsTrack::new("empty", vec![]),
            GpsTrack::new("single", vec![GpsPoint::new(46.0, 7.0)]),
            GpsTrack::new("good-2", line(47.0, 10)),
        ];

        let sigs = create_signatures_batch(&tracks, &MatchConfig::default()).unwrap();
        let ids: Vec<&str> = sigs.iter().map(|s| s.activity_id.as_str()).collect();
        assert_eq!(ids, vec!["good-1", "good-2"]);
    }

    #[test]
    fn test_batch_carries_start_time() {
        let mut track = GpsTrack::new("a", line(46.0, 5));
        track.start_time = Some(1_700_000_000);
        let sigs = create_signatures_batch(&[track], &MatchConfig::default()).unwrap();
        assert_eq!(sigs[0].start_time, Some(1_700_000_000));
    }

    #[test]
    fn test_batch_rejects_bad_config_eagerly() {
        let config = MatchConfig {
            zero_threshold: 10.0,
            ..MatchConfig::default()
        };
        let tracks = vec![GpsTrack::new("a", line(46.0, 5))];
        assert!(matches!(
            create_signatures_batch(&tracks, &config),
            Err(RouteAtlasError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_flat_buffer_matches_per_track() {
        let a = line(46.0, 12);
        let b = line(46.5, 3);
        let c = line(47.0, 20);

        let mut coords = flatten(&a);
        coords.extend(flatten(&b));
        coords.extend(flatten(&c));
        let offsets = vec![0, a.len() as u32, (a.len() + b.len()) as u32];
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let config = MatchConfig::default();
        let from_buffer = create_signatures_flat_buffer(&ids, &coords, &offsets, &config).unwrap();
        let from_tracks = create_signatures_batch(
            &[
                GpsTrack::new("a", a),
                GpsTrack::new("b", b),
                GpsTrack::new("c", c),
            ],
            &config,
        )
        .unwrap();

        assert_eq!(from_buffer, from_tracks);
    }

    #[test]
    fn test_flat_tracks_match_per_track() {
        let a = line(46.0, 12);
        let flat = FlatGpsTrack {
            activity_id: "a".into(),
            coords: flatten(&a),
            start_time: None,
        };
        let config = MatchConfig::default();
        let from_flat = create_signatures_flat(&[flat], &config).unwrap();
        let single = create_signature("a", &a, &config).unwrap().unwrap();
        assert_eq!(from_flat, vec![single]);
    }

    #[test]
    fn test_flat_buffer_skips_bad_offsets() {
        let a = line(46.0, 5);
        let coords = flatten(&a);
        let ids = vec!["a".to_string(), "beyond".to_string()];

        // Second track starts past the end of the buffer
        let sigs = create_signatures_flat_buffer(&ids, &coords, &[0, 99], &MatchConfig::default());
        // First track now ends at 99, also out of range, so both are skipped
        assert_eq!(sigs.unwrap().len(), 0);

        let sigs = create_signatures_flat_buffer(&ids, &coords, &[0, 5], &MatchConfig::default()).unwrap();
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].activity_id, "a");
    }

    #[test]
    fn test_flat_buffer_malformed() {
        let ids = vec!["a".to_string()];
        let err = create_signatures_flat_buffer(&ids, &[1.0, 2.0, 3.0], &[0], &MatchConfig::default())
            .unwrap_err();
        assert!(matches!(err, RouteAtlasError::MalformedBuffer { .. }));

        let err = create_signatures_flat_buffer(&ids, &[1.0, 2.0], &[0, 1], &MatchConfig::default())
            .unwrap_err();
        assert!(matches!(err, RouteAtlasError::MalformedBuffer { .. }));
    }
}
