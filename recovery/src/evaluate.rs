use std::collections::BTreeSet;

use anyhow::Result;

use crate::align::SubsequenceAligner;
use crate::geodesic::GeoOracle;
use crate::locations::LocationTable;
use crate::SPECIAL_TOKENS;

/// Strips special tokens and undoes the reserved-token offset, leaving raw
/// location ids.
pub fn strip_special_tokens(tokens: &[usize]) -> Vec<usize> {
    tokens
        .iter()
        .filter(|&&t| t >= SPECIAL_TOKENS)
        .map(|&t| t - SPECIAL_TOKENS)
        .collect()
}

/// Aggregate scores for one evaluation run. The first four are macro-averaged
/// over trips; RMSE is pooled over every divergent run in the whole set.
pub struct Metrics {
    pub precision: f64,
    pub recall: f64,
    pub recovery: f64,
    pub micro_precision: f64,
    /// None when no trip contributed a divergent run
    pub rmse: Option<f64>,
    pub rmse_points: usize,
    /// Trips whose prediction count matched their masked count exactly, so
    /// there was nothing to align
    pub unrecovered_trips: usize,
}

/// Scores reconstructed trips against ground truth: set metrics per trip,
/// plus geodesic RMSE over runs where the model over- or under-predicted.
pub struct Evaluator<'a> {
    aligner: SubsequenceAligner<'a>,
    locations: &'a LocationTable,

    precision: Vec<f64>,
    recall: Vec<f64>,
    recovery: Vec<f64>,
    micro_precision: Vec<f64>,
    total_cost: f64,
    total_points: usize,
    unrecovered_trips: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(oracle: &'a GeoOracle, locations: &'a LocationTable) -> Self {
        Self {
            aligner: SubsequenceAligner::new(oracle),
            locations,
            precision: Vec::new(),
            recall: Vec::new(),
            recovery: Vec::new(),
            micro_precision: Vec::new(),
            total_cost: 0.0,
            total_points: 0,
            unrecovered_trips: 0,
        }
    }

    /// `observed` and `reconstruction` are token sequences (offset ids with
    /// specials); `labels` are raw ground-truth ids; `drop_tags` is aligned to
    /// `labels`; `masked_count` is the trip's own blank count.
    pub fn score_trip(
        &mut self,
        observed: &[usize],
        reconstruction: &[usize],
        labels: &[usize],
        drop_tags: &[usize],
        masked_count: usize,
    ) -> Result<()> {
        let pred = strip_special_tokens(reconstruction);
        let drop = strip_special_tokens(observed);
        if drop_tags.len() != labels.len() {
            bail!(
                "trip has {} drop tags for {} ground-truth points",
                drop_tags.len(),
                labels.len()
            );
        }

        let (precision, recall, recovery, micro_precision) = set_metrics(&pred, labels, &drop)?;
        self.precision.push(precision);
        self.recall.push(recall);
        self.recovery.push(recovery);
        self.micro_precision.push(micro_precision);

        // The reconstruction keeps every visible location, so anything beyond
        // the drop list was predicted at a blank
        let recovered = match pred.len().checked_sub(drop.len()) {
            Some(n) => n,
            None => bail!(
                "reconstruction lost visible locations: {} predicted, {} observed",
                pred.len(),
                drop.len()
            ),
        };
        if recovered == masked_count {
            // One real prediction per blank; boundaries line up slot-for-slot
            // and there's nothing to align
            self.unrecovered_trips += 1;
        } else {
            let (cost, points) = self.divergence_cost(&pred, labels, drop_tags)?;
            if points > 0 {
                self.total_cost += cost;
                self.total_points += points;
            }
        }
        Ok(())
    }

    /// Walks the ground truth run-by-run with two bounded cursors, scoring
    /// each divergent predicted sub-run against its true counterpart.
    fn divergence_cost(
        &self,
        pred: &[usize],
        labels: &[usize],
        tags: &[usize],
    ) -> Result<(f64, usize)> {
        let mut cost = 0.0;
        let mut points = 0;
        let mut pi = 0;
        let mut i = 0;
        while i < labels.len() {
            let run = tags[i];
            if run == 0 {
                // An observed point, mirrored verbatim in the reconstruction
                if pi >= pred.len() {
                    bail!("prediction exhausted at ground-truth point {}", i);
                }
                pi += 1;
                i += 1;
                continue;
            }
            if i + run > labels.len() {
                bail!(
                    "drop run of {} at {} overruns {} ground-truth points",
                    run,
                    i,
                    labels.len()
                );
            }
            let true_run = &labels[i..i + run];

            // Everything the model emitted before the next shared boundary
            // belongs to this run
            let run_end = match labels.get(i + run) {
                Some(&boundary) => match pred[pi..].iter().position(|&p| p == boundary) {
                    Some(offset) => pi + offset,
                    None => bail!(
                        "no alignment boundary found after ground-truth point {}",
                        i
                    ),
                },
                None => pred.len(),
            };
            let pred_run = &pred[pi..run_end];

            if !pred_run.is_empty() {
                let true_coords = self.locations.coords(true_run)?;
                let pred_coords = self.locations.coords(pred_run)?;
                if pred_coords.len() > true_coords.len() {
                    cost += self
                        .aligner
                        .best_subsequence_cost(&pred_coords, &true_coords)?;
                    points += true_coords.len();
                } else {
                    cost += self
                        .aligner
                        .best_subsequence_cost(&true_coords, &pred_coords)?;
                    points += pred_coords.len();
                }
            }

            pi = run_end;
            i += run;
        }
        Ok((cost, points))
    }

    pub fn finish(self) -> Metrics {
        let rmse = if self.total_points > 0 {
            Some((self.total_cost / self.total_points as f64).sqrt())
        } else {
            None
        };
        Metrics {
            precision: mean(&self.precision),
            recall: mean(&self.recall),
            recovery: mean(&self.recovery),
            micro_precision: mean(&self.micro_precision),
            rmse,
            rmse_points: self.total_points,
            unrecovered_trips: self.unrecovered_trips,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// (precision, recall, recovery, micro_precision) for one trip. `drop` is the
/// set of real ids still visible in the sparse input; `expected` is what was
/// actually missing.
fn set_metrics(pred: &[usize], label: &[usize], drop: &[usize]) -> Result<(f64, f64, f64, f64)> {
    if label.is_empty() {
        bail!("trip has no ground-truth locations");
    }
    let pred_set: BTreeSet<usize> = pred.iter().copied().collect();
    let label_set: BTreeSet<usize> = label.iter().copied().collect();
    let drop_set: BTreeSet<usize> = drop.iter().copied().collect();

    let hits = pred_set.intersection(&label_set).count();
    let recall = hits as f64 / label.len() as f64;
    let precision = if pred.is_empty() {
        0.0
    } else {
        hits as f64 / pred.len() as f64
    };

    let expected: BTreeSet<usize> = label_set.difference(&drop_set).copied().collect();
    let recovery = if expected.is_empty() {
        // Nothing was actually missing
        1.0
    } else {
        pred_set.intersection(&expected).count() as f64 / expected.len() as f64
    };

    let pred_missing: Vec<usize> = pred
        .iter()
        .copied()
        .filter(|p| !drop_set.contains(p))
        .collect();
    let micro_precision = if pred_missing.is_empty() {
        0.0
    } else {
        let missing_set: BTreeSet<usize> = pred_missing.iter().copied().collect();
        missing_set.intersection(&expected).count() as f64 / pred_missing.len() as f64
    };

    Ok((precision, recall, recovery, micro_precision))
}
