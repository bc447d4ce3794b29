//! Example of batch grouping many routes, then adding new ones incrementally.
//!
//! Run with: cargo run --example batch_grouping --features parallel

use route_atlas::{
    create_signatures_batch, group_incremental, group_signatures, GpsPoint, GpsTrack, MatchConfig,
};
use std::time::Instant;

fn base_route(lat: f64, lng: f64) -> Vec<GpsPoint> {
    (0..15)
        .map(|i| GpsPoint::new(lat + i as f64 * 0.001, lng + i as f64 * 0.001))
        .collect()
}

fn main() -> route_atlas::Result<()> {
    println!("Batch Route Grouping Example\n");

    let london = base_route(51.5074, -0.1278);
    let paris = base_route(48.8566, 2.3522);
    let nyc = base_route(40.7128, -74.0060);

    let mut tracks = Vec::new();
    for i in 0..3 {
        tracks.push(GpsTrack::new(format!("london-{}", i), add_noise(&london, 0.00005 * i as f64)));
    }
    let mut reversed = london.clone();
    reversed.reverse();
    tracks.push(GpsTrack::new("london-reverse", reversed));
    for i in 0..3 {
        tracks.push(GpsTrack::new(format!("paris-{}", i), add_noise(&paris, 0.00005 * i as f64)));
    }

    let config = MatchConfig::default();
    let signatures = create_signatures_batch(&tracks, &config)?;
    println!("Created {} route signatures\n", signatures.len());

    let start = Instant::now();
    let groups = group_signatures(&signatures, &config)?;
    println!("Grouping completed in {:?}", start.elapsed());
    println!("Found {} groups:\n", groups.len());
    for group in &groups {
        println!(
            "  Group '{}': {:?} (avg match {:.1}%)",
            group.group_id, group.activity_ids, group.stats.average_match
        );
    }

    // NYC activities arrive later
    let new_tracks: Vec<GpsTrack> = (0..2)
        .map(|i| GpsTrack::new(format!("nyc-{}", i), add_noise(&nyc, 0.00005 * i as f64)))
        .collect();
    let new_signatures = create_signatures_batch(&new_tracks, &config)?;

    let start = Instant::now();
    let groups = group_incremental(&new_signatures, &groups, &signatures, &config)?;
    println!("\nIncremental update completed in {:?}", start.elapsed());

    let total_routes: usize = groups.iter().map(|g| g.activity_ids.len()).sum();
    let largest_group = groups.iter().map(|g| g.activity_ids.len()).max().unwrap_or(0);
    let singletons = groups.iter().filter(|g| g.activity_ids.len() == 1).count();

    println!("\nStats:");
    println!("  Total routes: {}", total_routes);
    println!("  Number of groups: {}", groups.len());
    println!("  Largest group: {} routes", largest_group);
    println!("  Singleton groups: {}", singletons);
    Ok(())
}

/// Add small noise to route points to simulate GPS variation
fn add_noise(route: &[GpsPoint], noise: f64) -> Vec<GpsPoint> {
    route
        .iter()
        .enumerate()
        .map(|(i, p)| {
            GpsPoint::new(
                p.latitude + noise * (i as f64 % 2.0 - 0.5),
                p.longitude + noise * ((i + 1) as f64 % 2.0 - 0.5),
            )
        })
        .collect()
}
