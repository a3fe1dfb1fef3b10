use anyhow::Result;
use geom::{GPSBounds, LonLat, Pt2D};
use serde::Deserialize;

use crate::locations::LocationTable;
use crate::{BLK_TOKEN, PAD_TOKEN, SPECIAL_TOKENS};

/// Timestamp sentinel for padded and blanked slots.
pub const PAD_TIME: f64 = 5000.0;

pub struct TrajectoryPoint {
    pub token: usize,
    /// Seconds since the trip's first point
    pub rel_seconds: f64,
    pub pos: Pt2D,
    /// Course over ground, degrees
    pub cog: f64,
    /// Speed over ground, knots
    pub sog: f64,
}

/// One observed trip with some positions blanked out.
pub struct Trip {
    pub points: Vec<TrajectoryPoint>,
    /// Ordered indices of the blanked positions; strict subset of 0..len
    pub masked_positions: Vec<usize>,
}

impl Trip {
    pub fn tokens(&self) -> Vec<usize> {
        self.points.iter().map(|pt| pt.token).collect()
    }
}

/// A trip paired with its ground truth for scoring.
pub struct EvalTrip {
    pub input: Trip,
    /// Raw (un-offset) location ids of the full ground-truth trajectory
    pub labels: Vec<usize>,
    /// Aligned to labels; nonzero at the start of each dropped run, giving
    /// its length
    pub drop_tags: Vec<usize>,
}

#[derive(Deserialize)]
struct TripRow {
    trip_sparse: String,
    trip_full: String,
    drop_tags: String,
}

enum RawID {
    Blank,
    Loc(usize),
}

struct RawPoint {
    id: RawID,
    lon: f64,
    lat: f64,
    cog: f64,
    sog: f64,
    time: i64,
}

pub(crate) struct RawTrip {
    sparse: Vec<RawPoint>,
    full: Vec<RawPoint>,
    tags: Vec<usize>,
}

pub(crate) fn load_raw_trips<R: std::io::Read>(reader: R) -> Result<Vec<RawTrip>> {
    let mut results = Vec::new();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: TripRow = rec?;
        let sparse = parse_points(&rec.trip_sparse)?;
        let full = parse_points(&rec.trip_full)?;
        let tags = parse_tags(&rec.drop_tags)?;
        if tags.len() != full.len() {
            bail!(
                "trip has {} drop tags for {} ground-truth points",
                tags.len(),
                full.len()
            );
        }
        if sparse.is_empty() {
            bail!("trip has no observed points");
        }
        results.push(RawTrip { sparse, full, tags });
    }
    Ok(results)
}

// Each point is "id,lon,lat,cog,sog,time"; id is either a raw location id or
// the literal BLK
fn parse_points(input: &str) -> Result<Vec<RawPoint>> {
    let mut points = Vec::new();
    for (idx, chunk) in input.split(';').enumerate() {
        let fields: Vec<&str> = chunk.split(',').collect();
        if fields.len() != 6 {
            bail!(
                "point {} has {} fields, expected id,lon,lat,cog,sog,time: {}",
                idx,
                fields.len(),
                chunk
            );
        }
        let id = if fields[0] == "BLK" {
            RawID::Blank
        } else {
            RawID::Loc(fields[0].parse()?)
        };
        points.push(RawPoint {
            id,
            lon: fields[1].parse()?,
            lat: fields[2].parse()?,
            cog: fields[3].parse()?,
            sog: fields[4].parse()?,
            time: fields[5].parse()?,
        });
    }
    Ok(points)
}

fn parse_tags(input: &str) -> Result<Vec<usize>> {
    let mut tags = Vec::new();
    for chunk in input.split(';') {
        tags.push(chunk.parse()?);
    }
    Ok(tags)
}

impl RawTrip {
    pub(crate) fn update_bounds(&self, gps_bounds: &mut GPSBounds) {
        for pt in self.sparse.iter().chain(self.full.iter()) {
            // Blanked rows carry placeholder coordinates
            if let RawID::Loc(_) = pt.id {
                gps_bounds.update(LonLat::new(pt.lon, pt.lat));
            }
        }
    }

    pub(crate) fn assemble(self, locations: &LocationTable) -> Result<EvalTrip> {
        let time_min = self.sparse[0].time;
        let mut points = Vec::new();
        let mut masked_positions = Vec::new();
        for (idx, raw) in self.sparse.iter().enumerate() {
            match raw.id {
                RawID::Blank => {
                    masked_positions.push(idx);
                    points.push(TrajectoryPoint {
                        token: BLK_TOKEN,
                        rel_seconds: PAD_TIME,
                        pos: Pt2D::zero(),
                        cog: 0.0,
                        sog: 0.0,
                    });
                }
                RawID::Loc(id) => {
                    // Input coordinates come from the cell-center table, not
                    // the raw fix
                    points.push(TrajectoryPoint {
                        token: id + SPECIAL_TOKENS,
                        rel_seconds: (raw.time - time_min) as f64,
                        pos: locations.coord(id)?,
                        cog: raw.cog,
                        sog: raw.sog,
                    });
                }
            }
        }

        let mut labels = Vec::new();
        for raw in &self.full {
            match raw.id {
                RawID::Blank => bail!("ground-truth trip contains a blanked point"),
                RawID::Loc(id) => labels.push(id),
            }
        }

        Ok(EvalTrip {
            input: Trip {
                points,
                masked_positions,
            },
            labels,
            drop_tags: self.tags,
        })
    }
}

/// One batch of trips, padded to the batch-max trip length and batch-max
/// masked-position count. Field order matches what the sequence model
/// consumes.
pub struct Batch {
    pub locations: Vec<Vec<usize>>,
    pub times: Vec<Vec<f64>>,
    pub coords: Vec<Vec<Pt2D>>,
    pub cog: Vec<Vec<f64>>,
    pub sog: Vec<Vec<f64>>,
    /// True (unpadded) trip lengths
    pub lengths: Vec<usize>,
    pub masked_positions: Vec<Vec<usize>>,
    /// True (unpadded) masked-position counts
    pub masked_lengths: Vec<usize>,
}

impl Batch {
    pub fn from_trips(trips: &[EvalTrip]) -> Self {
        let max_len = trips
            .iter()
            .map(|t| t.input.points.len())
            .max()
            .unwrap_or(0);
        let max_masked = trips
            .iter()
            .map(|t| t.input.masked_positions.len())
            .max()
            .unwrap_or(0);

        let mut batch = Self {
            locations: Vec::new(),
            times: Vec::new(),
            coords: Vec::new(),
            cog: Vec::new(),
            sog: Vec::new(),
            lengths: Vec::new(),
            masked_positions: Vec::new(),
            masked_lengths: Vec::new(),
        };
        for trip in trips {
            let mut locations = trip.input.tokens();
            let mut times: Vec<f64> = trip.input.points.iter().map(|pt| pt.rel_seconds).collect();
            let mut coords: Vec<Pt2D> = trip.input.points.iter().map(|pt| pt.pos).collect();
            let mut cog: Vec<f64> = trip.input.points.iter().map(|pt| pt.cog).collect();
            let mut sog: Vec<f64> = trip.input.points.iter().map(|pt| pt.sog).collect();
            batch.lengths.push(locations.len());
            locations.resize(max_len, PAD_TOKEN);
            times.resize(max_len, PAD_TIME);
            coords.resize(max_len, Pt2D::zero());
            cog.resize(max_len, 0.0);
            sog.resize(max_len, 0.0);

            let mut masked = trip.input.masked_positions.clone();
            batch.masked_lengths.push(masked.len());
            masked.resize(max_masked, 0);

            batch.locations.push(locations);
            batch.times.push(times);
            batch.coords.push(coords);
            batch.cog.push(cog);
            batch.sog.push(sog);
            batch.masked_positions.push(masked);
        }
        batch
    }

    pub fn num_trips(&self) -> usize {
        self.locations.len()
    }
}
