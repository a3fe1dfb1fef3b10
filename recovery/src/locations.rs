use std::collections::BTreeMap;

use anyhow::Result;
use geom::{GPSBounds, LonLat, Pt2D};
use serde::Deserialize;

/// Immutable id -> projected coordinate lookup, shared read-only by the
/// decoder's post-processing and the evaluator.
pub struct LocationTable {
    coords: BTreeMap<usize, Pt2D>,
}

#[derive(Deserialize)]
struct LocationRow {
    id: usize,
    lon: f64,
    lat: f64,
}

pub fn load_raw<R: std::io::Read>(reader: R) -> Result<Vec<(usize, LonLat)>> {
    let mut results = Vec::new();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: LocationRow = rec?;
        results.push((rec.id, LonLat::new(rec.lon, rec.lat)));
    }
    Ok(results)
}

impl LocationTable {
    pub fn new(raw: Vec<(usize, LonLat)>, gps_bounds: &GPSBounds) -> Result<Self> {
        let mut coords = BTreeMap::new();
        for (id, gps) in raw {
            if coords.insert(id, gps.to_pt(gps_bounds)).is_some() {
                bail!("duplicate location id {}", id);
            }
        }
        Ok(Self { coords })
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn coord(&self, id: usize) -> Result<Pt2D> {
        match self.coords.get(&id) {
            Some(pt) => Ok(*pt),
            None => bail!("no coordinate for location id {}", id),
        }
    }

    pub fn coords(&self, ids: &[usize]) -> Result<Vec<Pt2D>> {
        ids.iter().map(|&id| self.coord(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_rejects_unknown_ids() {
        let input = "id,lon,lat\n0,0.1,0.1\n1,0.2,0.2\n";
        let raw = load_raw(input.as_bytes()).unwrap();
        let mut bounds = GPSBounds::new();
        for (_, gps) in &raw {
            bounds.update(*gps);
        }
        let table = LocationTable::new(raw, &bounds).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.coord(1).is_ok());
        assert!(table.coord(7).is_err());
    }

    #[test]
    fn rejects_duplicates() {
        let input = "id,lon,lat\n3,0.1,0.1\n3,0.2,0.2\n";
        let raw = load_raw(input.as_bytes()).unwrap();
        let mut bounds = GPSBounds::new();
        for (_, gps) in &raw {
            bounds.update(*gps);
        }
        assert!(LocationTable::new(raw, &bounds).is_err());
    }
}
