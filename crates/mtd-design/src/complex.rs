// crates/mtd-design/src/complex.rs

//! Complexes: ordered strand lists with an optional target structure and
//! a decomposition tree.

use crate::decompose::{DecompositionNode, DecompositionParameters};
use crate::granularity::LevelSpec;
use crate::sequences::StrandView;
use anyhow::Result;
use mtd_core::defect::Defect;
use mtd_core::exec::Env;
use mtd_core::sparse::SparseMatrix;
use mtd_core::structure::Structure;
use mtd_core::types::{rotational_symmetry, ComplexSequence, Sequence};
use mtd_thermo::kernel::ThermoRecord;
use mtd_thermo::model::ThermoModel;
use mtd_thermo::ThermoEnv;
use serde::{Deserialize, Serialize};

/// A complex's design target: the model to evaluate under plus an optional
/// target structure (absent for off-targets).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Target {
    /// Evaluation conditions.
    pub model: ThermoModel,
    /// Target structure; degenerate (nicks only) for off-targets.
    pub structure: Structure,
}

impl Target {
    /// Whether a real structure (with pairs) is attached.
    #[must_use]
    pub fn has_structure(&self) -> bool {
        self.structure.has_pairs()
    }
}

/// An ordered multiset of strands considered up to rotation, with its
/// decomposition tree.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Complex {
    /// Display name.
    pub name: String,
    /// Strand views into the global sequence, 5'→3' order.
    pub strands: Vec<StrandView>,
    /// Model and optional target structure.
    pub target: Target,
    /// Decomposition knobs for this complex.
    pub params: DecompositionParameters,
    /// Root of the decomposition tree.
    pub decomposition: DecompositionNode,
}

impl Complex {
    /// Build a complex; the decomposition starts as a single root leaf.
    #[must_use]
    pub fn new(
        strands: Vec<StrandView>,
        target: Target,
        name: String,
        params: DecompositionParameters,
    ) -> Self {
        let structure = if target.has_structure() {
            target.structure.clone()
        } else {
            Structure::unstructured(&strands.iter().map(StrandView::len).collect::<Vec<_>>())
        };
        let decomposition = DecompositionNode::new(strands.clone(), structure, Vec::new());
        Self { name, strands, target, params, decomposition }
    }

    /// Whether this complex has a target structure.
    #[must_use]
    pub fn is_on_target(&self) -> bool {
        self.target.has_structure()
    }

    /// Number of nucleotides.
    #[must_use]
    pub fn size(&self) -> usize {
        self.strands.iter().map(StrandView::len).sum()
    }

    /// Global variable index of every complex position, in order.
    #[must_use]
    pub fn to_indices(&self) -> Vec<usize> {
        self.strands.iter().flat_map(StrandView::to_indices).collect()
    }

    /// The complex sequence under the current global sequence.
    #[must_use]
    pub fn complex_sequence(&self, s: &Sequence) -> ComplexSequence {
        ComplexSequence::new(self.strands.iter().map(|v| v.to_sequence(s)).collect())
    }

    /// `ln ρ` for the rotational symmetry ρ of the strand list.
    #[must_use]
    pub fn symmetry_correction(&self) -> f64 {
        (rotational_symmetry(&self.strands) as f64).ln()
    }

    /// Depth of the decomposition tree.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.decomposition.depth()
    }

    /// Evaluate the tree at `depth`, returning the raw record.
    pub fn record(
        &self,
        env: Env,
        tenv: &ThermoEnv,
        s: &Sequence,
        depth: usize,
        indiv: &LevelSpec,
    ) -> Result<ThermoRecord> {
        self.decomposition.evaluate(env, tenv, s, depth, &self.params, indiv)
    }

    /// Log partition function at `depth`, corrected for rotational
    /// symmetry overcounting.
    pub fn log_pfunc(
        &self,
        env: Env,
        tenv: &ThermoEnv,
        s: &Sequence,
        depth: usize,
        indiv: &LevelSpec,
    ) -> Result<f64> {
        Ok(self.record(env, tenv, s, depth, indiv)?.log_q - self.symmetry_correction())
    }

    /// Pair-probability matrix at `depth`.
    pub fn pair_probabilities(
        &self,
        env: Env,
        tenv: &ThermoEnv,
        s: &Sequence,
        depth: usize,
        indiv: &LevelSpec,
    ) -> Result<SparseMatrix> {
        Ok(self.record(env, tenv, s, depth, indiv)?.probabilities)
    }

    /// Per-nucleotide complex ensemble defect at `depth`, mapped onto
    /// global variable indices.
    pub fn defect(
        &self,
        env: Env,
        tenv: &ThermoEnv,
        s: &Sequence,
        depth: usize,
        indiv: &LevelSpec,
    ) -> Result<Defect> {
        let probs = self.pair_probabilities(env, tenv, s, depth, indiv)?;
        let local = nucleotide_defects(&probs, &self.target.structure);
        let indices = self.to_indices();
        let contributions =
            local.iter().enumerate().map(|(k, &d)| (indices[k] as u32, d)).collect();
        Ok(Defect { contributions })
    }

    /// Structure-guided decomposition from the target.
    pub fn structure_decompose(&mut self) {
        if self.is_on_target() {
            self.decomposition.structure_decompose(self.params.n_split, self.params.h_split);
        }
    }

    /// Probability-guided (re)decomposition down to `depth`.
    pub fn probability_decompose(
        &mut self,
        s: &Sequence,
        tenv: &ThermoEnv,
        depth: i64,
        indiv: &LevelSpec,
    ) -> Result<bool> {
        let params = self.params;
        self.decomposition.probability_decompose(&params, s, tenv, depth, indiv)
    }

    /// Assign stable indices to every node (preorder).
    pub fn index_nodes(&mut self) {
        let mut next = 0i64;
        self.decomposition.apply_recursive_mut(&mut |n| {
            n.index = next;
            next += 1;
        });
    }

    /// Indices of nodes at `depth`; `include_leaves` keeps childless ones.
    #[must_use]
    pub fn node_indices(&self, depth: usize, include_leaves: bool) -> Vec<i64> {
        let mut out = Vec::new();
        self.decomposition.register_indices(&mut out, depth, include_leaves);
        out
    }
}

/// Per-position defects from a pair-probability matrix and a target:
/// a paired position is penalized by `1 − P(i, pair(i))`, an unpaired one
/// by its total pairing probability `Σ_j P(i, j)`.
#[must_use]
pub fn nucleotide_defects(probs: &SparseMatrix, target: &Structure) -> Vec<f64> {
    let n = target.len();
    let row_sums = probs.row_sums();
    (0..n)
        .map(|i| match target.pair(i) {
            Some(j) => (1.0 - probs.get(i, j)).clamp(0.0, 1.0),
            None => row_sums.get(i).copied().unwrap_or(0.0).clamp(0.0, 1.0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtd_core::sparse::SparseAccum;

    #[test]
    fn defect_formula() {
        let target = Structure::parse("((..))").unwrap();
        let mut acc = SparseAccum::new(6);
        acc.add_sym(0, 5, 0.9);
        acc.add_sym(1, 4, 0.8);
        acc.add_sym(2, 3, 0.25);
        let probs = acc.finish(0.0);
        let d = nucleotide_defects(&probs, &target);
        assert!((d[0] - 0.1).abs() < 1e-12);
        assert!((d[1] - 0.2).abs() < 1e-12);
        assert!((d[2] - 0.25).abs() < 1e-12, "unpaired position penalized by pairing mass");
        assert!((d[5] - 0.1).abs() < 1e-12);
    }
}
