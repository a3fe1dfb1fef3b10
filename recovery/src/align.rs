use anyhow::Result;
use geom::Pt2D;

use crate::geodesic::GeoOracle;

/// Finds the window of a longer point sequence that best matches a shorter
/// one, under dynamic time warping with squared geodesic point cost.
pub struct SubsequenceAligner<'a> {
    oracle: &'a GeoOracle,
}

impl<'a> SubsequenceAligner<'a> {
    pub fn new(oracle: &'a GeoOracle) -> Self {
        Self { oracle }
    }

    /// Slides a window of short.len() over every valid offset of long and
    /// returns the minimal DTW cost. The first offset wins ties. Callers must
    /// pass the longer sequence first; this never swaps the arguments.
    pub fn best_subsequence_cost(&self, long: &[Pt2D], short: &[Pt2D]) -> Result<f64> {
        if short.is_empty() {
            bail!("subsequence alignment needs a non-empty short sequence");
        }
        if long.len() < short.len() {
            bail!(
                "subsequence alignment called with {} points against {}; the longer sequence goes first",
                long.len(),
                short.len()
            );
        }

        let mut best = f64::INFINITY;
        for start in 0..=(long.len() - short.len()) {
            let cost = self.dtw_cost(short, &long[start..start + short.len()]);
            if cost < best {
                best = cost;
            }
        }
        Ok(best)
    }

    // Standard monotone warping path: insertion, deletion, match
    fn dtw_cost(&self, a: &[Pt2D], b: &[Pt2D]) -> f64 {
        let (n, m) = (a.len(), b.len());
        let mut dp = vec![vec![f64::INFINITY; m + 1]; n + 1];
        dp[0][0] = 0.0;
        for i in 1..=n {
            for j in 1..=m {
                let step = dp[i - 1][j].min(dp[i][j - 1]).min(dp[i - 1][j - 1]);
                dp[i][j] = self.oracle.distance_sq(a[i - 1], b[j - 1]) + step;
            }
        }
        dp[n][m]
    }
}
