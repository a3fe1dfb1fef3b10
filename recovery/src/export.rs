use anyhow::Result;
use geojson::{Feature, FeatureCollection, GeoJson};
use geom::{Distance, GPSBounds, Pt2D};

use crate::evaluate::strip_special_tokens;
use crate::locations::LocationTable;

/// Dumps reconstructed trips as a GeoJSON FeatureCollection of LineStrings,
/// for eyeballing the recovered paths on a map. Trips too short to draw are
/// skipped with a warning.
pub fn reconstructions_to_geojson(
    trips: &[Vec<usize>],
    locations: &LocationTable,
    gps_bounds: &GPSBounds,
) -> Result<String> {
    let mut features = Vec::new();
    for (idx, tokens) in trips.iter().enumerate() {
        let ids = strip_special_tokens(tokens);
        let pts = locations.coords(&ids)?;
        let pts = Pt2D::approx_dedupe(pts, Distance::meters(1.0));
        if pts.len() < 2 {
            warn!("trip {} only has {} distinct points; skipping", idx, pts.len());
            continue;
        }
        features.push(Feature {
            bbox: None,
            geometry: Some(geom::PolyLine::unchecked_new(pts).to_geojson(Some(gps_bounds))),
            id: None,
            properties: None,
            foreign_members: None,
        });
    }
    let gj = GeoJson::FeatureCollection(FeatureCollection {
        features,
        bbox: None,
        foreign_members: None,
    });
    Ok(serde_json::to_string(&gj)?)
}
