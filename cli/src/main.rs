#[macro_use]
extern crate log;

use abstutil::{prettyprint_usize, Timer};
use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use structopt::StructOpt;

use recovery::{Batch, Dataset, Evaluator, RecoveryDecoder, Selection, TransitionModel};

#[derive(StructOpt)]
struct Args {
    /// The path to a dataset directory with locations.csv, graph.csv, and
    /// trips.csv
    #[structopt(long)]
    data: String,
    #[structopt(long, default_value = "64")]
    batch_size: usize,
    /// Sample each prediction from the model's distribution instead of taking
    /// the arg-max
    #[structopt(long)]
    sample: bool,
    #[structopt(long, default_value = "42")]
    seed: u64,
    /// Write the reconstructed trajectories to this path as GeoJSON
    #[structopt(long)]
    export: Option<String>,
}

fn main() -> Result<()> {
    abstutil::logger::setup();
    let args = Args::from_iter(abstutil::cli_args());

    let mut timer = Timer::new("recover trajectories");
    let dataset = Dataset::load(&args.data, &mut timer)?;
    let oracle = dataset.oracle();
    let decoder = RecoveryDecoder::new(&TransitionModel, &dataset.adjacency);
    let mut evaluator = Evaluator::new(&oracle, &dataset.locations);
    let mut rng = StdRng::seed_from_u64(args.seed);
    let selection = if args.sample {
        Selection::Sample
    } else {
        Selection::Greedy
    };

    timer.start("decode and evaluate");
    let mut reconstructions = Vec::new();
    for chunk in dataset.trips.chunks(args.batch_size) {
        let batch = Batch::from_trips(chunk);
        let decoded = decoder.recover_batch(&batch, selection, &mut rng)?;
        for (trip, reconstruction) in chunk.iter().zip(&decoded) {
            evaluator.score_trip(
                &trip.input.tokens(),
                reconstruction,
                &trip.labels,
                &trip.drop_tags,
                trip.input.masked_positions.len(),
            )?;
        }
        reconstructions.extend(decoded);
    }
    timer.stop("decode and evaluate");

    let metrics = evaluator.finish();
    info!(
        "evaluated {} trips",
        prettyprint_usize(reconstructions.len())
    );
    info!("average precision {:.4}", metrics.precision);
    info!("average recall {:.4}", metrics.recall);
    info!("average recovery {:.4}", metrics.recovery);
    info!("average micro-precision {:.4}", metrics.micro_precision);
    match metrics.rmse {
        Some(rmse) => info!(
            "RMSE {:.2}m over {} points",
            rmse,
            prettyprint_usize(metrics.rmse_points)
        ),
        None => info!("no divergent runs to score"),
    }
    info!(
        "{} trips with nothing recovered beyond their blanks",
        prettyprint_usize(metrics.unrecovered_trips)
    );

    if let Some(path) = args.export {
        let geojson = recovery::reconstructions_to_geojson(
            &reconstructions,
            &dataset.locations,
            &dataset.gps_bounds,
        )?;
        fs_err::write(&path, geojson)?;
        info!("wrote {}", path);
    }
    Ok(())
}
