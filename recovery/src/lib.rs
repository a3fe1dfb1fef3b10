#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod align;
mod baseline;
mod dataset;
mod decode;
mod evaluate;
mod export;
mod geodesic;
mod graph;
mod locations;

use abstutil::Timer;
use anyhow::Result;
use geom::{Bounds, GPSBounds};

pub use self::align::SubsequenceAligner;
pub use self::baseline::TransitionModel;
pub use self::dataset::{Batch, EvalTrip, TrajectoryPoint, Trip, PAD_TIME};
pub use self::decode::{
    AttentionMask, InferenceMode, InferenceRequest, RecoveryDecoder, Selection, SequenceModel,
};
pub use self::evaluate::{strip_special_tokens, Evaluator, Metrics};
pub use self::export::reconstructions_to_geojson;
pub use self::geodesic::GeoOracle;
pub use self::graph::AdjacencyMatrix;
pub use self::locations::LocationTable;

/// Reserved vocabulary ids. Every real location id is offset past these
/// before it enters the sequence model.
pub const PAD_TOKEN: usize = 0;
pub const BOS_TOKEN: usize = 1;
pub const EOS_TOKEN: usize = 2;
pub const NUL_TOKEN: usize = 3;
/// Marks a position whose true location was withheld and must be predicted.
pub const BLK_TOKEN: usize = 4;
pub const SPECIAL_TOKENS: usize = 5;

/// Everything needed to run recovery over one evaluation set: the trips with
/// blanked positions, their ground truth, the id->coordinate table, and the
/// location graph.
pub struct Dataset {
    pub bounds: Bounds,
    pub gps_bounds: GPSBounds,
    pub locations: LocationTable,
    pub adjacency: AdjacencyMatrix,
    pub trips: Vec<EvalTrip>,
}

impl Dataset {
    /// Expects a directory with locations.csv, graph.csv, and trips.csv.
    pub fn load(dir: &str, timer: &mut Timer) -> Result<Self> {
        timer.start(format!("load dataset from {}", dir));
        let raw_locations = locations::load_raw(open(dir, "locations.csv")?)?;
        if raw_locations.is_empty() {
            bail!("{}/locations.csv has no locations", dir);
        }
        let raw_trips = dataset::load_raw_trips(open(dir, "trips.csv")?)?;

        // One projection for the whole process, grown over everything we read
        let mut gps_bounds = GPSBounds::new();
        for (_, gps) in &raw_locations {
            gps_bounds.update(*gps);
        }
        for trip in &raw_trips {
            trip.update_bounds(&mut gps_bounds);
        }

        let locations = LocationTable::new(raw_locations, &gps_bounds)?;
        let adjacency = graph::load_adjacency(open(dir, "graph.csv")?, locations.len())?;
        let mut trips = Vec::new();
        for raw in raw_trips {
            trips.push(raw.assemble(&locations)?);
        }
        info!(
            "{} trips to recover, {} locations",
            trips.len(),
            locations.len()
        );
        timer.stop(format!("load dataset from {}", dir));

        Ok(Self {
            bounds: gps_bounds.to_bounds(),
            gps_bounds,
            locations,
            adjacency,
            trips,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.locations.len() + SPECIAL_TOKENS
    }

    pub fn oracle(&self) -> GeoOracle {
        GeoOracle::new(self.gps_bounds.clone())
    }
}

// Adds the path in the error message
fn open(dir: &str, name: &str) -> Result<std::fs::File> {
    let path = format!("{}/{}", dir, name);
    std::fs::File::open(&path).map_err(|err| anyhow!("{path}: {err}"))
}
