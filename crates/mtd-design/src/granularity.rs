// crates/mtd-design/src/granularity.rs

//! Active/passive ensemble partitions and per-node depth exceptions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Boolean mask over the design's complexes plus the deflation fraction
/// applied to passive strand concentrations. Passive → active moves are
/// monotonic: refocusing only ever adds complexes.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EnsemblePartition {
    /// `mask[i]` ⇔ complex `i` is active.
    pub mask: Vec<bool>,
    /// Fraction δ ∈ [0, 1) removed from passive strand concentrations.
    pub deflate: f64,
}

impl EnsemblePartition {
    /// A partition activating exactly the flagged complexes.
    #[must_use]
    pub fn new(mask: Vec<bool>, deflate: f64) -> Self {
        Self { mask, deflate }
    }

    /// An empty partition: treated as "everything active".
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Number of complexes covered (0 for the everything-active default).
    #[must_use]
    pub fn len(&self) -> usize {
        self.mask.len()
    }

    /// True for the everything-active default.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    /// Whether complex `i` is active under this partition.
    #[must_use]
    pub fn active(&self, i: usize) -> bool {
        self.mask.get(i).copied().unwrap_or(true)
    }

    /// Number of active complexes.
    #[must_use]
    pub fn num_active(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Number of passive complexes.
    #[must_use]
    pub fn num_passive(&self) -> usize {
        self.mask.iter().filter(|&&m| !m).count()
    }

    /// True iff no complex is passive.
    #[must_use]
    pub fn all_active(&self) -> bool {
        self.is_empty() || self.num_passive() == 0
    }

    /// Indices of active complexes.
    #[must_use]
    pub fn actives(&self) -> Vec<usize> {
        self.mask.iter().enumerate().filter(|(_, &m)| m).map(|(i, _)| i).collect()
    }

    /// Indices of passive complexes.
    #[must_use]
    pub fn passives(&self) -> Vec<usize> {
        self.mask.iter().enumerate().filter(|(_, &m)| !m).map(|(i, _)| i).collect()
    }

    /// Activate complex `i` (monotonic; never deactivates).
    pub fn activate(&mut self, i: usize) {
        if let Some(m) = self.mask.get_mut(i) {
            *m = true;
        }
    }
}

/// Per-node depth overrides inside one complex's decomposition tree.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LevelSpec {
    /// Node index → forced remaining depth.
    pub exceptions: BTreeMap<i64, usize>,
}

impl LevelSpec {
    /// Force node `node` to be treated as having `depth` levels left.
    pub fn add_exception(&mut self, node: i64, depth: usize) {
        self.exceptions.insert(node, depth);
    }

    /// Depth to use at `node`, given the inherited `initial` depth.
    #[must_use]
    pub fn depth_for(&self, node: i64, initial: usize) -> usize {
        self.exceptions.get(&node).copied().unwrap_or(initial)
    }

    /// True iff any exception is present.
    #[must_use]
    pub fn any(&self) -> bool {
        !self.exceptions.is_empty()
    }
}

/// Per-complex level specifications for one evaluation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EnsembleLevelSpec {
    /// Complex index → node-level exceptions.
    pub per_complex: BTreeMap<usize, LevelSpec>,
}

impl EnsembleLevelSpec {
    /// Attach a level specification for one complex.
    pub fn add(&mut self, complex: usize, spec: LevelSpec) {
        self.per_complex.insert(complex, spec);
    }

    /// The specification for `complex` (default: no exceptions).
    #[must_use]
    pub fn for_complex(&self, complex: usize) -> LevelSpec {
        self.per_complex.get(&complex).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_partition_is_all_active() {
        let p = EnsemblePartition::all();
        assert!(p.all_active());
        assert!(p.active(3));
    }

    #[test]
    fn activation_is_monotonic() {
        let mut p = EnsemblePartition::new(vec![true, false, false], 0.01);
        assert_eq!(p.actives(), vec![0]);
        p.activate(2);
        assert_eq!(p.actives(), vec![0, 2]);
        assert_eq!(p.passives(), vec![1]);
    }

    #[test]
    fn level_spec_overrides() {
        let mut ls = LevelSpec::default();
        ls.add_exception(4, 1);
        assert_eq!(ls.depth_for(4, 3), 1);
        assert_eq!(ls.depth_for(5, 3), 3);
    }
}
