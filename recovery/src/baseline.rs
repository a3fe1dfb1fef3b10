use anyhow::Result;

use crate::decode::{InferenceRequest, SequenceModel};
use crate::graph::AdjacencyMatrix;
use crate::SPECIAL_TOKENS;

/// First-order baseline: the next location follows the row-normalized
/// adjacency weights of the previous token. Stands in for a trained network
/// so the full decode-and-evaluate path runs end to end.
pub struct TransitionModel;

impl SequenceModel for TransitionModel {
    fn infer(&self, req: InferenceRequest) -> Result<Vec<Vec<Vec<f64>>>> {
        let mut out = Vec::new();
        for (trip, decoded) in req.decoded.iter().enumerate() {
            let mut dists = Vec::new();
            for step in 0..decoded.len() {
                let prev = if step == 0 {
                    // Condition the first prediction on the observed location
                    // just before the first blank
                    let slot = req.masked_positions[trip].first().copied().unwrap_or(0);
                    if slot == 0 {
                        decoded[0]
                    } else {
                        req.locations[trip][slot - 1]
                    }
                } else {
                    decoded[step]
                };
                dists.push(transition_row(req.adjacency, prev));
            }
            out.push(dists);
        }
        Ok(out)
    }
}

fn transition_row(adjacency: &AdjacencyMatrix, prev: usize) -> Vec<f64> {
    let n = adjacency.size();
    if prev >= n {
        return uniform_over_real(n);
    }
    let row = adjacency.row(prev);
    let total: f64 = row.iter().sum();
    if total > 0.0 {
        row.iter().map(|w| w / total).collect()
    } else {
        uniform_over_real(n)
    }
}

fn uniform_over_real(n: usize) -> Vec<f64> {
    let real = (n - SPECIAL_TOKENS) as f64;
    (0..n)
        .map(|token| {
            if token >= SPECIAL_TOKENS {
                1.0 / real
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_normalize() {
        let n = SPECIAL_TOKENS + 2;
        let mut weights = vec![0.0; n * n];
        weights[SPECIAL_TOKENS * n + SPECIAL_TOKENS + 1] = 3.0;
        weights[SPECIAL_TOKENS * n + SPECIAL_TOKENS] = 1.0;
        let adjacency = AdjacencyMatrix::from_weights(n, weights).unwrap();

        let dist = transition_row(&adjacency, SPECIAL_TOKENS);
        assert_eq!(dist[SPECIAL_TOKENS + 1], 0.75);
        assert_eq!(dist[SPECIAL_TOKENS], 0.25);
        assert!((dist.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_row_falls_back_to_uniform() {
        let n = SPECIAL_TOKENS + 4;
        let adjacency = AdjacencyMatrix::from_weights(n, vec![0.0; n * n]).unwrap();
        let dist = transition_row(&adjacency, SPECIAL_TOKENS + 2);
        assert_eq!(dist[0], 0.0);
        assert_eq!(dist[SPECIAL_TOKENS], 0.25);
    }
}
