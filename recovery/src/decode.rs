use anyhow::Result;
use geom::Pt2D;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::dataset::Batch;
use crate::graph::AdjacencyMatrix;
use crate::{BLK_TOKEN, PAD_TOKEN};

/// Distinguishes the recovery decoding task from anything else a model
/// implementation might support.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InferenceMode {
    Recovery,
}

/// How the decoder turns a distribution into the next token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Deterministic arg-max; the first maximum wins
    Greedy,
    /// Multinomial sampling from the distribution
    Sample,
}

/// Everything one forward pass sees. The adjacency matrix is opaque
/// pass-through; the model owns its meaning.
pub struct InferenceRequest<'a> {
    pub locations: &'a [Vec<usize>],
    pub times: &'a [Vec<f64>],
    pub coords: &'a [Vec<Pt2D>],
    pub cog: &'a [Vec<f64>],
    pub sog: &'a [Vec<f64>],
    pub attention_mask: &'a AttentionMask,
    pub adjacency: &'a AdjacencyMatrix,
    pub mode: InferenceMode,
    /// Masked positions consumed so far, per trip
    pub masked_positions: &'a [Vec<usize>],
    /// Seed token plus every prediction so far, per trip
    pub decoded: &'a [Vec<usize>],
}

/// The trained sequence model, consumed as a black box. Returns, per trip,
/// one probability distribution over the location vocabulary for every
/// decoded position so far.
pub trait SequenceModel {
    fn infer(&self, req: InferenceRequest) -> Result<Vec<Vec<Vec<f64>>>>;
}

/// Combined padding and no-look-forward mask over a token batch: (query, key)
/// is allowed iff the key slot isn't padding and doesn't lie in the future.
pub struct AttentionMask {
    seq_len: usize,
    // Per trip, flattened (query, key)
    rows: Vec<Vec<bool>>,
}

impl AttentionMask {
    pub fn causal_padding(tokens: &[Vec<usize>]) -> Self {
        let seq_len = tokens.first().map(|t| t.len()).unwrap_or(0);
        let mut rows = Vec::new();
        for trip in tokens {
            let mut flat = vec![false; seq_len * seq_len];
            for query in 0..seq_len {
                for key in 0..=query {
                    flat[query * seq_len + key] = trip[key] != PAD_TOKEN;
                }
            }
            rows.push(flat);
        }
        Self { seq_len, rows }
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn allows(&self, trip: usize, query: usize, key: usize) -> bool {
        self.rows[trip][query * self.seq_len + key]
    }
}

/// Drives the model through one forward pass per masked position, all trips
/// in lockstep, then scatters predictions back into their original slots.
pub struct RecoveryDecoder<'a, M: SequenceModel> {
    model: &'a M,
    adjacency: &'a AdjacencyMatrix,
}

impl<'a, M: SequenceModel> RecoveryDecoder<'a, M> {
    pub fn new(model: &'a M, adjacency: &'a AdjacencyMatrix) -> Self {
        Self { model, adjacency }
    }

    /// Returns each trip's reconstructed token sequence, truncated to its
    /// true length. Model failures propagate unchanged; nothing retries.
    pub fn recover_batch<R: Rng>(
        &self,
        batch: &Batch,
        selection: Selection,
        rng: &mut R,
    ) -> Result<Vec<Vec<usize>>> {
        let num_trips = batch.num_trips();
        let steps = batch.masked_lengths.iter().copied().max().unwrap_or(0);

        // Seed every trip with a single blank token
        let mut decoded: Vec<Vec<usize>> = vec![vec![BLK_TOKEN]; num_trips];

        for step in 0..steps {
            let concat: Vec<Vec<usize>> = batch
                .locations
                .iter()
                .zip(&decoded)
                .map(|(observed, dec)| observed.iter().chain(dec.iter()).copied().collect())
                .collect();
            let attention_mask = AttentionMask::causal_padding(&concat);
            let consumed: Vec<Vec<usize>> = batch
                .masked_positions
                .iter()
                .map(|positions| positions[..step + 1].to_vec())
                .collect();

            for dec in &decoded {
                assert_eq!(dec.len(), step + 1, "decoding step out of sync");
            }

            let probs = self.model.infer(InferenceRequest {
                locations: &batch.locations,
                times: &batch.times,
                coords: &batch.coords,
                cog: &batch.cog,
                sog: &batch.sog,
                attention_mask: &attention_mask,
                adjacency: self.adjacency,
                mode: InferenceMode::Recovery,
                masked_positions: &consumed,
                decoded: &decoded,
            })?;
            if probs.len() != num_trips {
                bail!(
                    "model returned {} trips, the batch has {}",
                    probs.len(),
                    num_trips
                );
            }

            for (trip, dists) in probs.into_iter().enumerate() {
                // Only the distribution at the current step matters
                let dist = match dists.get(step) {
                    Some(dist) => dist,
                    None => bail!(
                        "model returned {} positions for trip {}, needed {}",
                        dists.len(),
                        trip,
                        step + 1
                    ),
                };
                let next = match selection {
                    Selection::Greedy => argmax(dist)?,
                    Selection::Sample => {
                        let weights = WeightedIndex::new(dist)
                            .map_err(|err| anyhow!("bad distribution for trip {trip}: {err}"))?;
                        weights.sample(rng)
                    }
                };
                decoded[trip].push(next);
            }
        }

        // Drop the seed, scatter each trip's own predictions back into place,
        // and discard whatever was decoded past its own masked count
        let mut results = Vec::new();
        for (idx, dec) in decoded.iter().enumerate() {
            let predictions = &dec[1..];
            let num_masked = batch.masked_lengths[idx];
            let mut sequence = batch.locations[idx].clone();
            for (&slot, &token) in batch.masked_positions[idx][..num_masked]
                .iter()
                .zip(predictions[..num_masked].iter())
            {
                sequence[slot] = token;
            }
            sequence.truncate(batch.lengths[idx]);
            results.push(sequence);
        }
        Ok(results)
    }
}

fn argmax(dist: &[f64]) -> Result<usize> {
    if dist.is_empty() {
        bail!("model returned an empty distribution");
    }
    let mut best = 0;
    for (idx, p) in dist.iter().enumerate() {
        if *p > dist[best] {
            best = idx;
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::dataset::{EvalTrip, TrajectoryPoint, Trip, PAD_TIME};
    use crate::SPECIAL_TOKENS;

    use super::*;

    fn point(token: usize) -> TrajectoryPoint {
        TrajectoryPoint {
            token,
            rel_seconds: if token == BLK_TOKEN { PAD_TIME } else { 1.0 },
            pos: Pt2D::zero(),
            cog: 0.0,
            sog: 0.0,
        }
    }

    fn trip_with_blanks(len: usize, blanks: &[usize]) -> EvalTrip {
        let points = (0..len)
            .map(|idx| {
                if blanks.contains(&idx) {
                    point(BLK_TOKEN)
                } else {
                    point(idx + SPECIAL_TOKENS)
                }
            })
            .collect();
        EvalTrip {
            input: Trip {
                points,
                masked_positions: blanks.to_vec(),
            },
            labels: (0..len).collect(),
            drop_tags: vec![0; len],
        }
    }

    fn tiny_adjacency() -> AdjacencyMatrix {
        let n = SPECIAL_TOKENS + 3;
        AdjacencyMatrix::from_weights(n, vec![0.0; n * n]).unwrap()
    }

    /// Emits a fixed distribution at every step, ignoring all inputs.
    struct FixedModel {
        dist: Vec<f64>,
    }

    impl SequenceModel for FixedModel {
        fn infer(&self, req: InferenceRequest) -> Result<Vec<Vec<Vec<f64>>>> {
            Ok(req
                .decoded
                .iter()
                .map(|dec| vec![self.dist.clone(); dec.len()])
                .collect())
        }
    }

    /// Emits probability 1 on a scripted token per step.
    struct ScriptedModel {
        script: Vec<usize>,
        vocab: usize,
    }

    impl SequenceModel for ScriptedModel {
        fn infer(&self, req: InferenceRequest) -> Result<Vec<Vec<Vec<f64>>>> {
            let mut out = Vec::new();
            for dec in req.decoded {
                let mut dists = Vec::new();
                for step in 0..dec.len() {
                    let mut dist = vec![0.0; self.vocab];
                    dist[self.script[step]] = 1.0;
                    dists.push(dist);
                }
                out.push(dists);
            }
            Ok(out)
        }
    }

    #[test]
    fn scatter_into_masked_positions() {
        let id_a = SPECIAL_TOKENS + 100;
        let id_b = SPECIAL_TOKENS + 101;
        let model = ScriptedModel {
            script: vec![id_a, id_b],
            vocab: SPECIAL_TOKENS + 102,
        };
        let adjacency = tiny_adjacency();
        let decoder = RecoveryDecoder::new(&model, &adjacency);
        let trips = vec![trip_with_blanks(10, &[2, 5])];
        let batch = Batch::from_trips(&trips);
        let mut rng = StdRng::seed_from_u64(0);

        let result = decoder
            .recover_batch(&batch, Selection::Greedy, &mut rng)
            .unwrap();
        assert_eq!(result.len(), 1);
        let expected: Vec<usize> = (0..10)
            .map(|idx| match idx {
                2 => id_a,
                5 => id_b,
                _ => idx + SPECIAL_TOKENS,
            })
            .collect();
        assert_eq!(result[0], expected);
    }

    #[test]
    fn greedy_is_deterministic() {
        let model = FixedModel {
            dist: vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.2, 0.5, 0.3],
        };
        let adjacency = tiny_adjacency();
        let decoder = RecoveryDecoder::new(&model, &adjacency);
        let trips = vec![trip_with_blanks(6, &[1, 4])];
        let batch = Batch::from_trips(&trips);

        let mut rng = StdRng::seed_from_u64(7);
        let first = decoder
            .recover_batch(&batch, Selection::Greedy, &mut rng)
            .unwrap();
        let second = decoder
            .recover_batch(&batch, Selection::Greedy, &mut rng)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0][1], SPECIAL_TOKENS + 1);
    }

    #[test]
    fn sampling_matches_the_distribution() {
        let model = FixedModel {
            dist: vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.2, 0.3, 0.5],
        };
        let adjacency = tiny_adjacency();
        let decoder = RecoveryDecoder::new(&model, &adjacency);
        let trips = vec![trip_with_blanks(3, &[1])];
        let batch = Batch::from_trips(&trips);
        let mut rng = StdRng::seed_from_u64(42);

        let draws = 5000;
        let mut counts = vec![0usize; 8];
        for _ in 0..draws {
            let result = decoder
                .recover_batch(&batch, Selection::Sample, &mut rng)
                .unwrap();
            counts[result[0][1]] += 1;
        }
        for (token, expected) in [(5, 0.2), (6, 0.3), (7, 0.5)] {
            let freq = counts[token] as f64 / draws as f64;
            assert!(
                (freq - expected).abs() < 0.03,
                "token {} drawn with frequency {}, expected {}",
                token,
                freq,
                expected
            );
        }
    }

    #[test]
    fn mask_blocks_padding_and_future() {
        let tokens = vec![vec![6, 7, PAD_TOKEN, BLK_TOKEN]];
        let mask = AttentionMask::causal_padding(&tokens);
        assert_eq!(mask.seq_len(), 4);
        // Causal: can't look forward
        assert!(mask.allows(0, 1, 0));
        assert!(!mask.allows(0, 0, 1));
        // Padding: slot 2 is never attended to
        assert!(!mask.allows(0, 3, 2));
        assert!(mask.allows(0, 3, 3));
    }

    #[test]
    fn short_model_output_is_an_error() {
        struct EmptyModel;
        impl SequenceModel for EmptyModel {
            fn infer(&self, req: InferenceRequest) -> Result<Vec<Vec<Vec<f64>>>> {
                Ok(vec![Vec::new(); req.decoded.len()])
            }
        }
        let adjacency = tiny_adjacency();
        let decoder = RecoveryDecoder::new(&EmptyModel, &adjacency);
        let trips = vec![trip_with_blanks(3, &[1])];
        let batch = Batch::from_trips(&trips);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(decoder
            .recover_batch(&batch, Selection::Greedy, &mut rng)
            .is_err());
    }

    #[test]
    fn no_blanks_returns_the_observed_trip() {
        let model = FixedModel {
            dist: vec![1.0; SPECIAL_TOKENS + 3],
        };
        let adjacency = tiny_adjacency();
        let decoder = RecoveryDecoder::new(&model, &adjacency);
        let trips = vec![trip_with_blanks(4, &[])];
        let batch = Batch::from_trips(&trips);
        let mut rng = StdRng::seed_from_u64(0);
        let result = decoder
            .recover_batch(&batch, Selection::Greedy, &mut rng)
            .unwrap();
        assert_eq!(result[0], trips[0].input.tokens());
    }
}
