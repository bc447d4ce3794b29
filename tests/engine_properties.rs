//! End-to-end behaviour of the matching, grouping and aggregation engines.

use std::collections::{BTreeSet, HashMap, VecDeque};

use proptest::prelude::*;
use route_atlas::matching::amd_to_percentage;
use route_atlas::{
    compare_routes, create_signatures_flat_buffer, detect_frequent_sections, generate_heatmap,
    group_incremental, group_signatures, group_signatures_cancellable,
    group_signatures_with_matches, CancellationToken, CellCoord, Direction, GpsPoint,
    HeatmapConfig, MatchConfig, RouteAtlasError, RouteSignature, SectionConfig,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// ~10km gently curving one-way road, one sample every ~100m.
fn long_road() -> Vec<GpsPoint> {
    (0..=100)
        .map(|i| {
            let t = i as f64;
            GpsPoint::new(46.2000 + t * 0.0009, 6.1000 + 0.002 * (t / 10.0).sin())
        })
        .collect()
}

/// Closed ~2km loop centered away from the road.
fn park_loop() -> Vec<GpsPoint> {
    let radius_deg = 318.0 / 111_320.0;
    (0..=40)
        .map(|i| {
            let angle = i as f64 / 40.0 * std::f64::consts::TAU;
            GpsPoint::new(
                46.0500 + radius_deg * angle.sin(),
                6.3000 + radius_deg * angle.cos() / 46.05_f64.to_radians().cos(),
            )
        })
        .collect()
}

fn jitter(points: &[GpsPoint], amount: f64) -> Vec<GpsPoint> {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            GpsPoint::new(p.latitude + sign * amount, p.longitude - sign * amount)
        })
        .collect()
}

fn signature(id: &str, points: &[GpsPoint]) -> RouteSignature {
    RouteSignature::from_points(id, points, &MatchConfig::default())
        .expect("test track should produce a signature")
}

#[test]
fn one_way_road_and_its_reversal_match_in_reverse() {
    init_logger();
    let road = long_road();
    let mut back = road.clone();
    back.reverse();

    let config = MatchConfig::default();
    let outbound = signature("outbound", &road);
    let inbound = signature("inbound", &back);
    assert!(outbound.total_distance > 9_000.0 && outbound.total_distance < 11_000.0);

    let result = compare_routes(&outbound, &inbound, &config)
        .unwrap()
        .expect("reversed road should match");
    assert_eq!(result.direction, Direction::Reverse);
    assert!(result.match_percentage >= 90.0, "got {}", result.match_percentage);
    assert!(result.endpoints_match);
}

#[test]
fn road_commuters_group_apart_from_park_loop() {
    init_logger();
    let road = long_road();
    let mut back = road.clone();
    back.reverse();

    let signatures = vec![
        signature("commute-1", &road),
        signature("commute-2", &jitter(&road, 0.00003)),
        signature("commute-home", &back),
        signature("park", &park_loop()),
    ];

    let result = group_signatures_with_matches(&signatures, &MatchConfig::default()).unwrap();
    assert_eq!(result.groups.len(), 2);

    let commute = &result.groups[0];
    assert_eq!(commute.group_id, "commute-1");
    assert_eq!(commute.activity_ids, vec!["commute-1", "commute-2", "commute-home"]);
    assert_eq!(commute.stats.activity_count, 3);
    assert_eq!(result.groups[1].activity_ids, vec!["park"]);

    let home = result
        .activity_matches
        .iter()
        .find(|m| m.activity_id == "commute-home")
        .unwrap();
    assert_eq!(home.group_id, "commute-1");
    assert_eq!(home.direction, Direction::Reverse);
}

#[test]
fn self_comparison_is_perfect() {
    let sig = signature("solo", &long_road());
    let result = compare_routes(&sig, &sig, &MatchConfig::default()).unwrap().unwrap();

    assert_eq!(result.direction, Direction::Same);
    assert!(result.amd < 1e-6);
    assert!((result.match_percentage - 100.0).abs() < 1e-9);
}

#[test]
fn percentage_thresholds_are_inclusive() {
    let config = MatchConfig::default();
    assert_eq!(amd_to_percentage(config.perfect_threshold, &config), 100.0);
    assert_eq!(amd_to_percentage(0.0, &config), 100.0);
    assert_eq!(amd_to_percentage(config.zero_threshold, &config), 0.0);
    assert_eq!(amd_to_percentage(config.zero_threshold * 4.0, &config), 0.0);

    let midpoint = (config.perfect_threshold + config.zero_threshold) / 2.0;
    assert!((amd_to_percentage(midpoint, &config) - 50.0).abs() < 1e-9);
}

#[test]
fn invalid_config_is_rejected_before_work() {
    let sig = signature("solo", &long_road());
    let config = MatchConfig {
        perfect_threshold: 300.0,
        zero_threshold: 250.0,
        ..MatchConfig::default()
    };

    assert!(matches!(
        compare_routes(&sig, &sig, &config),
        Err(RouteAtlasError::InvalidConfig { .. })
    ));
    assert!(matches!(
        group_signatures(&[sig], &config),
        Err(RouteAtlasError::InvalidConfig { .. })
    ));
}

#[test]
fn cancelled_token_aborts_grouping() {
    let signatures = vec![signature("a", &long_road()), signature("b", &park_loop())];
    let token = CancellationToken::new();
    token.cancel();

    let result = group_signatures_cancellable(&signatures, &MatchConfig::default(), &token);
    assert_eq!(result, Err(RouteAtlasError::Cancelled));
}

#[test]
fn flat_buffer_with_mismatched_offsets_is_malformed() {
    let ids = vec!["a".to_string(), "b".to_string()];
    let coords = vec![46.0, 6.0, 46.01, 6.0];

    let result = create_signatures_flat_buffer(&ids, &coords, &[0], &MatchConfig::default());
    assert!(matches!(result, Err(RouteAtlasError::MalformedBuffer { .. })));
}

// ============================================================================
// Randomized properties
// ============================================================================

/// Random walk of 2..30 steps of up to ~220m each, starting in the Alps.
fn arb_track() -> impl Strategy<Value = Vec<GpsPoint>> {
    (
        45.5f64..46.5,
        6.0f64..7.0,
        prop::collection::vec((-0.002f64..0.002, -0.002f64..0.002), 2..30),
    )
        .prop_map(|(lat, lng, steps)| {
            let mut current = GpsPoint::new(lat, lng);
            let mut points = vec![current];
            for (dlat, dlng) in steps {
                current = GpsPoint::new(current.latitude + dlat, current.longitude + dlng);
                points.push(current);
            }
            points
        })
}

/// A handful of tracks, some sharing a common base so groups and sections form.
fn arb_tracks() -> impl Strategy<Value = Vec<RouteSignature>> {
    (arb_track(), prop::collection::vec((arb_track(), any::<bool>()), 1..8)).prop_map(
        |(base, others)| {
            let config = MatchConfig::default();
            others
                .into_iter()
                .enumerate()
                .filter_map(|(i, (track, reuse_base))| {
                    let points = if reuse_base { jitter(&base, 0.00002 * i as f64) } else { track };
                    RouteSignature::from_points(&format!("act-{}", i), &points, &config)
                })
                .collect()
        },
    )
}

fn is_connected(cells: &[CellCoord], diagonal: bool) -> bool {
    let all: BTreeSet<CellCoord> = cells.iter().copied().collect();
    let Some(&start) = cells.first() else {
        return false;
    };
    let mut seen = BTreeSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(cell) = queue.pop_front() {
        for next in cell.neighbors(diagonal) {
            if all.contains(&next) && seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen.len() == all.len()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn comparison_is_symmetric(a in arb_track(), b in arb_track()) {
        let config = MatchConfig::default();
        let (Some(sa), Some(sb)) = (
            RouteSignature::from_points("a", &a, &config),
            RouteSignature::from_points("b", &b, &config),
        ) else {
            return Ok(());
        };

        let ab = compare_routes(&sa, &sb, &config).unwrap();
        let ba = compare_routes(&sb, &sa, &config).unwrap();
        prop_assert_eq!(ab.is_some(), ba.is_some());
        if let (Some(ab), Some(ba)) = (ab, ba) {
            prop_assert!((ab.match_percentage - ba.match_percentage).abs() < 1e-9);
            prop_assert!((ab.amd - ba.amd).abs() < 1e-9);
        }
    }

    #[test]
    fn grouping_is_deterministic(signatures in arb_tracks()) {
        let config = MatchConfig::default();
        let first = group_signatures(&signatures, &config).unwrap();
        let second = group_signatures(&signatures, &config).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn incremental_grouping_matches_batch(signatures in arb_tracks(), split in 0usize..8) {
        let config = MatchConfig::default();
        let split = split.min(signatures.len());
        let (existing, new) = signatures.split_at(split);

        let batch = group_signatures(&signatures, &config).unwrap();
        let seeded = group_signatures(existing, &config).unwrap();
        let incremental = group_incremental(new, &seeded, existing, &config).unwrap();
        prop_assert_eq!(batch, incremental);
    }

    #[test]
    fn every_activity_lands_in_at_most_one_group(signatures in arb_tracks()) {
        let groups = group_signatures(&signatures, &MatchConfig::default()).unwrap();
        let mut seen = BTreeSet::new();
        for group in &groups {
            prop_assert_eq!(&group.activity_ids[0], &group.group_id);
            for id in &group.activity_ids {
                prop_assert!(seen.insert(id.clone()), "{} placed twice", id);
            }
        }
    }

    #[test]
    fn heatmap_density_is_normalized(signatures in arb_tracks()) {
        let heatmap = generate_heatmap(&signatures, &HashMap::new(), &HeatmapConfig::default()).unwrap();
        for cell in &heatmap.cells {
            prop_assert!(cell.density > 0.0 && cell.density <= 1.0);
            prop_assert!(cell.visit_count as f32 <= heatmap.max_density);
        }
        if !heatmap.cells.is_empty() {
            prop_assert!(heatmap.cells.iter().any(|c| c.density == 1.0));
        }
    }

    #[test]
    fn sections_are_connected_and_large_enough(signatures in arb_tracks(), diagonal in any::<bool>()) {
        let config = SectionConfig {
            min_visits: 2,
            min_cells: 3,
            diagonal_connect: diagonal,
            ..SectionConfig::default()
        };
        let sections = detect_frequent_sections(&signatures, &[], &HashMap::new(), &config).unwrap();

        for pair in sections.windows(2) {
            prop_assert!(pair[0].visit_count >= pair[1].visit_count);
        }
        for section in &sections {
            prop_assert!(section.cells.len() >= 3);
            prop_assert!(is_connected(&section.cells, diagonal));
            prop_assert_eq!(section.polyline.len(), section.cells.len());
            prop_assert_eq!(section.sport_type.as_str(), "Unknown");
        }

        let again = detect_frequent_sections(&signatures, &[], &HashMap::new(), &config).unwrap();
        prop_assert_eq!(sections, again);
    }
}
