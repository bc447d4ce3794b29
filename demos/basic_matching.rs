//! Basic example of comparing two GPS routes.
//!
//! Run with: cargo run --example basic_matching

use route_atlas::{compare_routes, GpsPoint, MatchConfig, MatchResult, RouteSignature};

/// Straight ~2km track heading north-west from central London.
fn london_route() -> Vec<GpsPoint> {
    (0..20)
        .map(|i| GpsPoint::new(51.5074 + i as f64 * 0.001, -0.1278 - i as f64 * 0.0005))
        .collect()
}

fn report(result: route_atlas::Result<Option<MatchResult>>) {
    match result {
        Ok(Some(result)) => {
            println!("   Match: {:.1}%", result.match_percentage);
            println!("   Direction: {}", result.direction);
            println!("   AMD: {:.2}m", result.amd);
            println!("   Endpoints agree: {}\n", result.endpoints_match);
        }
        Ok(None) => println!("   No match\n"),
        Err(e) => println!("   Comparison failed: {}\n", e),
    }
}

fn main() {
    let route1 = london_route();

    // Same route
    let route2 = route1.clone();

    // Reversed route
    let mut route3 = route1.clone();
    route3.reverse();

    // Different route (New York)
    let route4: Vec<GpsPoint> = (0..20)
        .map(|i| GpsPoint::new(40.7128 + i as f64 * 0.001, -74.0060))
        .collect();

    let config = MatchConfig::default();

    let (Some(sig1), Some(sig2), Some(sig3), Some(sig4)) = (
        RouteSignature::from_points("route-1", &route1, &config),
        RouteSignature::from_points("route-2", &route2, &config),
        RouteSignature::from_points("route-3", &route3, &config),
        RouteSignature::from_points("route-4", &route4, &config),
    ) else {
        eprintln!("Could not build signatures");
        return;
    };

    println!("Route Matching Examples\n");
    println!(
        "Config: perfect_threshold={}m, zero_threshold={}m, min_match={}%\n",
        config.perfect_threshold, config.zero_threshold, config.min_match_percentage
    );

    println!("1. Identical routes (route-1 vs route-2):");
    report(compare_routes(&sig1, &sig2, &config));

    println!("2. Forward vs reverse (route-1 vs route-3):");
    report(compare_routes(&sig1, &sig3, &config));

    println!("3. Different locations (route-1 vs route-4):");
    report(compare_routes(&sig1, &sig4, &config));

    println!("Signature details:");
    println!(
        "  route-1: {} points, {:.0}m total distance",
        sig1.points.len(),
        sig1.total_distance
    );
    println!(
        "  route-4: {} points, {:.0}m total distance",
        sig4.points.len(),
        sig4.total_distance
    );
}
