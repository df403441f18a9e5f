// crates/mtd-design/src/results.rs

//! Candidates, per-level bests, and reportable results.

use crate::granularity::EnsemblePartition;
use mtd_core::defect::Defect;
use mtd_core::rng;
use mtd_core::sparse::SparseMatrix;
use mtd_core::types::Sequence;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A sequence paired with its per-objective defects. Orders by weighted
/// total; ties break on the sequence for determinism.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    /// The evaluated sequence.
    pub sequence: Sequence,
    /// One defect per objective.
    pub defects: Vec<Defect>,
    /// Objective weights in force when evaluated.
    pub weights: Vec<f64>,
}

impl Candidate {
    /// The +∞ sentinel used to seed bests.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            sequence: Sequence::default(),
            defects: vec![Defect::single(0, f64::INFINITY)],
            weights: vec![1.0],
        }
    }

    /// Raw total of objective `i`.
    #[must_use]
    pub fn total(&self, i: usize) -> f64 {
        self.defects.get(i).map_or(0.0, Defect::total)
    }

    /// `Σ w_i · defect_i.total()`.
    #[must_use]
    pub fn weighted_total(&self) -> f64 {
        self.defects
            .iter()
            .enumerate()
            .map(|(i, d)| self.weights.get(i).copied().unwrap_or(1.0) * d.total())
            .sum()
    }

    /// All objective defects merged position-wise under the weights;
    /// drives mutation sampling.
    #[must_use]
    pub fn scalarized(&self) -> Defect {
        let mut total = Defect::empty();
        for (i, d) in self.defects.iter().enumerate() {
            total = total.plus(&d.scaled(self.weights.get(i).copied().unwrap_or(1.0)));
        }
        total
    }

    /// Strictly better than `other` under the weighted total.
    #[must_use]
    pub fn better_than(&self, other: &Self) -> bool {
        let (a, b) = (self.weighted_total(), other.weighted_total());
        if a == b {
            self.sequence < other.sequence
        } else {
            a < b
        }
    }
}

/// Sample `num` distinct mutation positions from a candidate, each
/// weighted by its scalarized defect contribution.
#[must_use]
pub fn scalarized_sample(candidate: &Candidate, num: usize) -> Vec<usize> {
    rng::with_rng(|r| candidate.scalarized().sample_positions(r, num))
}

/// Best candidates at every level of the design loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DesignState {
    /// Best full-ensemble, root-level candidate.
    pub full: Candidate,
    /// Best per depth (index = depth).
    pub forest: Vec<Candidate>,
    /// Best from the leaf-reseeding level.
    pub leaf_opt: Candidate,
    /// Best from the leaf-mutation level.
    pub leaf_mut: Candidate,
}

impl Default for DesignState {
    fn default() -> Self {
        Self {
            full: Candidate::unbounded(),
            forest: Vec::new(),
            leaf_opt: Candidate::unbounded(),
            leaf_mut: Candidate::unbounded(),
        }
    }
}

impl DesignState {
    /// Resize the forest to `depth + 1` levels, seeding new levels with
    /// the sentinel.
    pub fn resize_forest(&mut self, levels: usize) {
        self.forest.resize_with(levels, Candidate::unbounded);
    }

    /// Reset forest levels `from..` to the sentinel.
    pub fn clear_forest_from(&mut self, from: usize) {
        for c in self.forest.iter_mut().skip(from) {
            *c = Candidate::unbounded();
        }
    }
}

/// Reported state of one complex in a result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ComplexResult {
    /// Complex name.
    pub name: String,
    /// Its designed strand sequences.
    pub sequence: Vec<Sequence>,
    /// Target structure in dot-paren (empty for off-targets).
    pub structure: String,
    /// Pair-probability matrix at the root.
    pub pair_probabilities: SparseMatrix,
    /// Log partition function.
    pub log_partition_function: f64,
    /// Raw complex ensemble defect.
    pub defect: f64,
    /// Defect normalized by complex length.
    pub normalized_defect: f64,
}

/// Reported state of one complex inside a tube.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TubeComplexResult {
    /// Complex name.
    pub name: String,
    /// Equilibrium concentration (M).
    pub concentration: f64,
    /// Target concentration (M).
    pub target_concentration: f64,
    /// Structural defect contribution.
    pub structural_defect: f64,
    /// Concentration defect contribution.
    pub concentration_defect: f64,
}

/// Reported state of one tube.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TubeResult {
    /// Tube name.
    pub name: String,
    /// Total nucleotide concentration.
    pub nucleotide_concentration: f64,
    /// Raw tube defect.
    pub defect: f64,
    /// Defect normalized by nucleotide concentration.
    pub normalized_defect: f64,
    /// Member breakdown.
    pub complexes: Vec<TubeComplexResult>,
}

/// One fully evaluated design outcome.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SingleResult {
    /// Domain name → sequence.
    pub domains: BTreeMap<String, Sequence>,
    /// Strand name → sequence.
    pub strands: BTreeMap<String, Sequence>,
    /// Per-complex details.
    pub complexes: Vec<ComplexResult>,
    /// Per-tube details.
    pub tubes: Vec<TubeResult>,
    /// Raw objective totals.
    pub defects: Vec<f64>,
    /// Weighted objective totals.
    pub weighted_defects: Vec<f64>,
}

/// The designer's overall output.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DesignResult {
    /// Thermodynamic conditions of the design.
    pub model: mtd_thermo::model::ThermoModel,
    /// Design parameters in force.
    pub parameters: crate::designer::DesignParameters,
    /// Run statistics.
    pub stats: crate::designer::DesignStats,
    /// The objective list.
    pub objectives: Vec<crate::objectives::Objective>,
    /// Evaluated results, best first.
    pub results: Vec<SingleResult>,
    /// Final ensemble partition.
    pub partition: EnsemblePartition,
    /// Whether the stop condition was met.
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_total(t: f64) -> Candidate {
        Candidate {
            sequence: Sequence::parse("ACGT").unwrap(),
            defects: vec![Defect::single(0, t)],
            weights: vec![1.0],
        }
    }

    #[test]
    fn weighted_total_respects_weights() {
        let c = Candidate {
            sequence: Sequence::default(),
            defects: vec![Defect::single(0, 0.5), Defect::single(1, 0.25)],
            weights: vec![1.0, 2.0],
        };
        assert!((c.weighted_total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn sentinel_never_wins() {
        assert!(with_total(1e9).better_than(&Candidate::unbounded()));
        assert!(!Candidate::unbounded().better_than(&with_total(1e9)));
    }

    #[test]
    fn forest_resize_seeds_sentinels() {
        let mut st = DesignState::default();
        st.resize_forest(3);
        assert_eq!(st.forest.len(), 3);
        assert!(st.forest[2].weighted_total().is_infinite());
    }
}
