// crates/mtd-design/src/weights.rs

//! Per-nucleotide defect weights.
//!
//! A weight specification names any combination of tube, complex, strand,
//! and domain; every matching nucleotide position of every matching
//! complex is multiplied by the weight. Tube-scoped weights apply only
//! inside that tube's defect; the rest apply everywhere the complex is
//! evaluated. Objectives are additionally weighted at the top level.

use crate::design::Design;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One weight specification.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Weight {
    /// Restrict to one tube (by name).
    pub tube: Option<String>,
    /// Restrict to one complex (by name).
    pub complex: Option<String>,
    /// Restrict to positions inside one strand (by name).
    pub strand: Option<String>,
    /// Restrict to positions inside one domain (by name).
    pub domain: Option<String>,
    /// Multiplier.
    pub weight: f64,
}

/// Per-complex position weights: complex index → one factor per position.
pub type ComplexWeights = BTreeMap<usize, Vec<f64>>;

/// Resolved weights for the whole design.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Weights {
    /// The raw specifications.
    pub specifications: Vec<Weight>,
    /// Tube-independent per-complex weights.
    pub per_complex: ComplexWeights,
    /// Tube-scoped per-complex weights.
    pub per_tube: BTreeMap<usize, ComplexWeights>,
    /// Top-level objective weights (parallel to the objective list).
    pub objective_weights: Vec<f64>,
}

impl Weights {
    /// Register a specification (resolved later against the design).
    pub fn add(&mut self, w: Weight) {
        self.specifications.push(w);
    }

    /// Register a top-level objective weight.
    pub fn add_objective_weight(&mut self, w: f64) {
        self.objective_weights.push(w);
    }

    /// True iff any per-nucleotide specification is present.
    #[must_use]
    pub fn any(&self) -> bool {
        !self.specifications.is_empty()
    }

    /// Objective weight `i` (default 1).
    #[must_use]
    pub fn objective_weight(&self, i: usize) -> f64 {
        self.objective_weights.get(i).copied().unwrap_or(1.0)
    }

    /// The per-complex weights to use inside tube `tube_id`.
    #[must_use]
    pub fn for_tube(&self, tube_id: usize) -> Option<&ComplexWeights> {
        if let Some(w) = self.per_tube.get(&tube_id) {
            return Some(w);
        }
        self.any().then_some(&self.per_complex)
    }

    /// Resolve every specification into per-position factors.
    pub fn resolve(&mut self, design: &Design) -> Result<()> {
        self.per_complex.clear();
        self.per_tube.clear();
        if !self.any() {
            return Ok(());
        }

        for (ci, c) in design.complexes.iter().enumerate() {
            self.per_complex.insert(ci, vec![1.0; c.size()]);
        }
        for (ti, t) in design.tubes.iter().enumerate() {
            let mut cw = ComplexWeights::new();
            for target in &t.targets {
                cw.insert(
                    target.complex_index,
                    vec![1.0; design.complexes[target.complex_index].size()],
                );
            }
            self.per_tube.insert(ti, cw);
        }

        let specs = self.specifications.clone();
        for w in &specs {
            let tube_id = match &w.tube {
                Some(name) => Some(design.find_tube(name)?),
                None => None,
            };
            let complex_id = match &w.complex {
                Some(name) => Some(design.find_complex(name)?),
                None => None,
            };
            let strand_indices: Option<Vec<usize>> = match &w.strand {
                Some(name) => Some(design.sequences.get_strand(name)?.to_indices()),
                None => None,
            };
            let domain_indices: Option<Vec<usize>> = match &w.domain {
                Some(name) => Some(design.sequences.get_domain(name)?.to_indices()),
                None => None,
            };

            let applies = |global: usize| {
                strand_indices.as_ref().map_or(true, |s| s.contains(&global))
                    && domain_indices.as_ref().map_or(true, |d| d.contains(&global))
            };

            let mut apply_to = |cw: &mut ComplexWeights, ci: usize| {
                let indices = design.complexes[ci].to_indices();
                if let Some(factors) = cw.get_mut(&ci) {
                    for (pos, &global) in indices.iter().enumerate() {
                        if applies(global) {
                            factors[pos] *= w.weight;
                        }
                    }
                }
            };

            match tube_id {
                Some(ti) => {
                    let mut cw = self.per_tube.remove(&ti).unwrap_or_default();
                    for ci in cw.keys().copied().collect::<Vec<_>>() {
                        if complex_id.map_or(true, |c| c == ci) {
                            apply_to(&mut cw, ci);
                        }
                    }
                    self.per_tube.insert(ti, cw);
                }
                None => {
                    let mut cw = std::mem::take(&mut self.per_complex);
                    for ci in cw.keys().copied().collect::<Vec<_>>() {
                        if complex_id.map_or(true, |c| c == ci) {
                            apply_to(&mut cw, ci);
                        }
                    }
                    self.per_complex = cw;
                    // Complex-scoped (non-tube) weights flow into every
                    // tube's factors as well.
                    let mut per_tube = std::mem::take(&mut self.per_tube);
                    for cw in per_tube.values_mut() {
                        for ci in cw.keys().copied().collect::<Vec<_>>() {
                            if complex_id.map_or(true, |c| c == ci) {
                                apply_to(cw, ci);
                            }
                        }
                    }
                    self.per_tube = per_tube;
                }
            }
        }
        Ok(())
    }
}
