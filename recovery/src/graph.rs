use anyhow::Result;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Deserialize;

use crate::SPECIAL_TOKENS;

/// Dense weighted adjacency over the full vocabulary (special tokens
/// included, with no edges touching them). The decoder treats this as an
/// opaque tensor and just hands it to the sequence model.
pub struct AdjacencyMatrix {
    n: usize,
    weights: Vec<f64>,
}

#[derive(Deserialize)]
struct EdgeRow {
    src: usize,
    dst: usize,
    weight: f64,
}

/// Reads a src,dst,weight edge list over raw location ids and densifies it,
/// shifting every id past the reserved tokens.
pub fn load_adjacency<R: std::io::Read>(reader: R, loc_count: usize) -> Result<AdjacencyMatrix> {
    let n = loc_count + SPECIAL_TOKENS;
    let mut graph: DiGraph<(), f64> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..n).map(|_| graph.add_node(())).collect();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: EdgeRow = rec?;
        if rec.src >= loc_count || rec.dst >= loc_count {
            bail!(
                "edge {} -> {} references an unknown location (only {} known)",
                rec.src,
                rec.dst,
                loc_count
            );
        }
        graph.add_edge(
            nodes[rec.src + SPECIAL_TOKENS],
            nodes[rec.dst + SPECIAL_TOKENS],
            rec.weight,
        );
    }
    Ok(AdjacencyMatrix::from_graph(&graph))
}

impl AdjacencyMatrix {
    fn from_graph(graph: &DiGraph<(), f64>) -> Self {
        let n = graph.node_count();
        let mut weights = vec![0.0; n * n];
        for edge in graph.edge_indices() {
            let (src, dst) = graph.edge_endpoints(edge).unwrap();
            weights[src.index() * n + dst.index()] += *graph.edge_weight(edge).unwrap();
        }
        Self { n, weights }
    }

    pub fn from_weights(n: usize, weights: Vec<f64>) -> Result<Self> {
        if weights.len() != n * n {
            bail!("{} weights don't fill a {}x{} matrix", weights.len(), n, n);
        }
        Ok(Self { n, weights })
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn weight(&self, src: usize, dst: usize) -> f64 {
        self.weights[src * self.n + dst]
    }

    pub fn row(&self, src: usize) -> &[f64] {
        &self.weights[src * self.n..(src + 1) * self.n]
    }
}
