use geom::{GPSBounds, Pt2D};

/// Measures squared great-circle distance between projected points, by
/// converting them back to lon/lat through one shared projection.
pub struct GeoOracle {
    gps_bounds: GPSBounds,
}

impl GeoOracle {
    pub fn new(gps_bounds: GPSBounds) -> Self {
        Self { gps_bounds }
    }

    /// Squared distance in meters. Pure; the projection never changes after
    /// construction. Malformed coordinates can't reach here -- they fail
    /// earlier, when CSV fields are parsed or an unknown id is looked up.
    pub fn distance_sq(&self, p1: Pt2D, p2: Pt2D) -> f64 {
        let meters = p1
            .to_gps(&self.gps_bounds)
            .gps_dist(p2.to_gps(&self.gps_bounds))
            .inner_meters();
        meters * meters
    }
}

#[cfg(test)]
mod tests {
    use geom::LonLat;

    use super::*;

    fn test_bounds() -> GPSBounds {
        let mut b = GPSBounds::new();
        b.update(LonLat::new(-1.0, -1.0));
        b.update(LonLat::new(1.0, 1.0));
        b
    }

    #[test]
    fn same_point_is_zero() {
        let bounds = test_bounds();
        let oracle = GeoOracle::new(bounds.clone());
        let pt = LonLat::new(0.5, 0.5).to_pt(&bounds);
        assert_eq!(oracle.distance_sq(pt, pt), 0.0);
    }

    #[test]
    fn latitude_degree_scale() {
        let bounds = test_bounds();
        let oracle = GeoOracle::new(bounds.clone());
        let p1 = LonLat::new(0.0, 0.0).to_pt(&bounds);
        let p2 = LonLat::new(0.0, 0.01).to_pt(&bounds);
        // 0.01 degrees of latitude is about 1112m
        let dist = oracle.distance_sq(p1, p2).sqrt();
        assert!(
            dist > 1090.0 && dist < 1135.0,
            "unexpected distance {}",
            dist
        );
    }
}
