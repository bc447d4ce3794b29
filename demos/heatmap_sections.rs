//! Example of frequent section detection and heatmap queries.
//!
//! Run with: cargo run --example heatmap_sections

use std::collections::HashMap;

use route_atlas::{
    create_signatures_batch, detect_frequent_sections, generate_heatmap, group_signatures,
    query_heatmap_cell, ActivityHeatmapData, GpsPoint, GpsTrack, HeatmapConfig, MatchConfig,
    SectionConfig,
};

fn main() -> route_atlas::Result<()> {
    // Shared lakeside path, then each loop returns a different way
    let lakeside: Vec<GpsPoint> = (0..12)
        .map(|i| GpsPoint::new(46.5100, 6.6200 + i as f64 * 0.001))
        .collect();

    let mut tracks = Vec::new();
    for (i, detour) in [0.002, 0.004, 0.006, 0.002].iter().enumerate() {
        let mut points = lakeside.clone();
        points.push(GpsPoint::new(46.5100 + detour, 6.6310));
        points.push(GpsPoint::new(46.5100 + detour, 6.6200));
        let mut track = GpsTrack::new(format!("run-{}", i), points);
        track.start_time = Some(1_700_000_000 + i as i64 * 86_400);
        tracks.push(track);
    }

    let config = MatchConfig::default();
    let signatures = create_signatures_batch(&tracks, &config)?;
    let groups = group_signatures(&signatures, &config)?;
    println!("{} activities in {} route groups", signatures.len(), groups.len());

    let sport_types: HashMap<String, String> = signatures
        .iter()
        .map(|s| (s.activity_id.clone(), "Run".to_string()))
        .collect();
    let sections = detect_frequent_sections(&signatures, &groups, &sport_types, &SectionConfig::default())?;

    println!("\nFrequent sections:");
    for section in &sections {
        println!(
            "  {} ({}): {} cells, {:.0}m, {} visits by {:?}",
            section.id,
            section.sport_type,
            section.cells.len(),
            section.distance_meters,
            section.visit_count,
            section.activity_ids
        );
    }

    let activity_data: HashMap<String, ActivityHeatmapData> = groups
        .iter()
        .flat_map(|g| {
            g.activity_ids.iter().map(move |id| {
                (
                    id.clone(),
                    ActivityHeatmapData {
                        activity_id: id.clone(),
                        route_id: Some(g.group_id.clone()),
                        route_name: Some(format!("Loop via {}", g.group_id)),
                        timestamp: None,
                    },
                )
            })
        })
        .collect();
    let heatmap = generate_heatmap(&signatures, &activity_data, &HeatmapConfig::default())?;

    println!(
        "\nHeatmap: {} cells over a {}x{} grid, {} routes, {} activities",
        heatmap.cells.len(),
        heatmap.grid_rows,
        heatmap.grid_cols,
        heatmap.total_routes,
        heatmap.total_activities
    );

    match query_heatmap_cell(&heatmap, 46.5100, 6.6250) {
        Some(hit) => println!(
            "Tap on the lakeside: '{}' (density {:.2})",
            hit.suggested_label, hit.cell.density
        ),
        None => println!("Tap on the lakeside: nothing here"),
    }
    Ok(())
}
