// crates/mtd-design/src/tube.rs

//! Test tubes: complexes at target concentrations under mass action.

use crate::complex::Complex;
use crate::granularity::EnsemblePartition;
use anyhow::{anyhow, Result};
use mtd_core::defect::Defect;
use mtd_core::error::DesignError;
use mtd_thermo::concentration::{equilibrate, EquilibrateOptions};
use mtd_thermo::model::ThermoModel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One complex's membership in a tube.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TubeTarget {
    /// Index into the design's complex list.
    pub complex_index: usize,
    /// Target concentration in M (0 for off-targets).
    pub target_conc: f64,
    /// Cached global nucleotide indices of the complex.
    pub indices: Vec<u32>,
}

impl TubeTarget {
    /// Whether this member carries a positive target concentration.
    #[must_use]
    pub fn is_on_target(&self) -> bool {
        self.target_conc > 0.0
    }
}

/// A named collection of complexes with target concentrations.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Tube {
    /// Display name.
    pub name: String,
    /// Member complexes.
    pub targets: Vec<TubeTarget>,
    /// Conditions for the mass-action solve.
    pub model: ThermoModel,
    /// Strand counts per complex (targets × strand types).
    pub stoichiometry: Vec<Vec<f64>>,
    /// Total nucleotide concentration, the defect normalization.
    pub nucleotide_concentration: f64,
}

impl Tube {
    /// Build a tube and precompute its invariants from the complex list.
    #[must_use]
    pub fn new(targets: Vec<TubeTarget>, name: String, model: ThermoModel, complexes: &[Complex]) -> Self {
        let mut tube = Self { name, targets, model, stoichiometry: Vec::new(), nucleotide_concentration: 0.0 };
        tube.compute_invariants(complexes);
        tube
    }

    /// Recompute stoichiometry, nucleotide totals, and cached indices.
    pub fn compute_invariants(&mut self, complexes: &[Complex]) {
        // Distinct strand types across member complexes, in view order.
        let strand_types: Vec<_> = self
            .targets
            .iter()
            .flat_map(|t| complexes[t.complex_index].strands.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        self.stoichiometry = self
            .targets
            .iter()
            .map(|t| {
                let mut row = vec![0.0; strand_types.len()];
                for s in &complexes[t.complex_index].strands {
                    if let Some(k) = strand_types.iter().position(|x| x == s) {
                        row[k] += 1.0;
                    }
                }
                row
            })
            .collect();

        self.nucleotide_concentration = self
            .targets
            .iter()
            .map(|t| t.target_conc * complexes[t.complex_index].size() as f64)
            .sum();

        for t in &mut self.targets {
            t.indices =
                complexes[t.complex_index].to_indices().iter().map(|&i| i as u32).collect();
        }
    }

    /// Equilibrium concentrations (M) for every member, in target order.
    /// Under a partition with passive members, the mass constraints are
    /// deflated and passive members report zero.
    pub fn concentrations(
        &self,
        log_pfuncs: &[f64],
        part: &EnsemblePartition,
    ) -> Result<Vec<f64>> {
        let water = self.model.water_molarity();
        let estimate =
            !part.is_empty() && self.targets.iter().any(|t| !part.active(t.complex_index));

        let (rows, deflate): (Vec<usize>, f64) = if estimate {
            (
                self.targets
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| part.active(t.complex_index))
                    .map(|(k, _)| k)
                    .collect(),
                part.deflate,
            )
        } else {
            ((0..self.targets.len()).collect(), 0.0)
        };

        if rows.is_empty() || rows.iter().all(|&k| self.targets[k].target_conc <= 0.0) {
            return Ok(vec![0.0; self.targets.len()]);
        }

        let a: Vec<Vec<f64>> = rows.iter().map(|&k| self.stoichiometry[k].clone()).collect();
        let log_q: Vec<f64> =
            rows.iter().map(|&k| log_pfuncs[self.targets[k].complex_index]).collect();
        let x0: Vec<f64> = rows
            .iter()
            .map(|&k| self.targets[k].target_conc / water * (1.0 - deflate))
            .collect();

        // Strand totals from the (possibly deflated) complex targets.
        let n_strands = a.first().map_or(0, Vec::len);
        let mut log_x0 = vec![0.0f64; n_strands];
        for (i, lx) in log_x0.iter_mut().enumerate() {
            let mass: f64 = a.iter().zip(&x0).map(|(row, &x)| row[i] * x).sum();
            *lx = mass.ln();
        }

        let options = EquilibrateOptions::default();
        let out = equilibrate(&a, &log_x0, &log_q, &options);
        if !out.converged && out.error > 1e-3 {
            let context = serde_json::json!({
                "tube": self.name,
                "A": a,
                "log_x0": log_x0,
                "log_q": log_q,
                "options": options,
                "partial": out,
            });
            return Err(anyhow!(DesignError::ConcentrationNonConvergence {
                context: context.to_string(),
            }));
        }

        let mut concs = vec![0.0; self.targets.len()];
        for (slot, &k) in rows.iter().enumerate() {
            concs[k] = out.fractions[slot] * water;
        }
        Ok(concs)
    }

    /// Member concentrations as fractions of the tube's total nucleotide
    /// concentration contribution per complex.
    pub fn fractions(&self, log_pfuncs: &[f64], part: &EnsemblePartition) -> Result<Vec<f64>> {
        let mut x = self.concentrations(log_pfuncs, part)?;
        for v in &mut x {
            *v /= self.nucleotide_concentration.max(f64::MIN_POSITIVE);
        }
        Ok(x)
    }

    /// Per-nucleotide tube ensemble defect (or estimate under `part`),
    /// not yet normalized.
    pub fn defect(
        &self,
        log_pfuncs: &[f64],
        complex_defects: &[Defect],
        part: &EnsemblePartition,
        weights: Option<&std::collections::BTreeMap<usize, Vec<f64>>>,
    ) -> Result<Defect> {
        if !self.targets.iter().any(|t| t.is_on_target() && part.active(t.complex_index)) {
            return Ok(Defect::empty());
        }
        let concs = self.concentrations(log_pfuncs, part)?;
        let mut total = Defect::empty();
        for (t, &conc) in self.targets.iter().zip(&concs) {
            // Passive members are not being computed; they contribute
            // nothing to the focused defect.
            if !t.is_on_target() || !part.active(t.complex_index) {
                continue;
            }
            let structural = structural_defect(t, &complex_defects[t.complex_index], conc);
            let concentration = concentration_defect(t, conc);
            let mut combined = structural.plus(&concentration);
            if let Some(w) = weights.and_then(|w| w.get(&t.complex_index)) {
                // Per-position weights are aligned with the complex's
                // nucleotide order; route them through global indices.
                let by_global: std::collections::BTreeMap<u32, f64> =
                    t.indices.iter().copied().zip(w.iter().copied()).collect();
                combined = Defect {
                    contributions: combined
                        .contributions
                        .iter()
                        .map(|&(i, d)| (i, d * by_global.get(&i).copied().unwrap_or(1.0)))
                        .collect(),
                };
            }
            total = total.plus(&combined);
        }
        Ok(total)
    }

    /// Tube defect normalized by total nucleotide concentration.
    pub fn normalized_defect(
        &self,
        log_pfuncs: &[f64],
        complex_defects: &[Defect],
        part: &EnsemblePartition,
        weights: Option<&std::collections::BTreeMap<usize, Vec<f64>>>,
    ) -> Result<Defect> {
        let d = self.defect(log_pfuncs, complex_defects, part, weights)?;
        if self.nucleotide_concentration <= 0.0 {
            return Ok(Defect::empty());
        }
        Ok(d.scaled(1.0 / self.nucleotide_concentration))
    }
}

/// Structural component: the complex defect weighted by how much of the
/// target concentration actually formed.
#[must_use]
pub fn structural_defect(t: &TubeTarget, complex_defect: &Defect, concentration: f64) -> Defect {
    complex_defect.scaled(concentration.min(t.target_conc))
}

/// Concentration component: the unformed concentration charged to every
/// nucleotide of the complex.
#[must_use]
pub fn concentration_defect(t: &TubeTarget, concentration: f64) -> Defect {
    let shortfall = (t.target_conc - concentration).max(0.0);
    Defect { contributions: t.indices.iter().map(|&i| (i, shortfall)).collect() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(ci: usize, conc: f64, indices: Vec<u32>) -> TubeTarget {
        TubeTarget { complex_index: ci, target_conc: conc, indices }
    }

    #[test]
    fn concentration_defect_floors_at_zero() {
        let t = target(0, 1e-6, vec![0, 1]);
        let d = concentration_defect(&t, 2e-6);
        assert!((d.total() - 0.0).abs() < 1e-18);
        let d = concentration_defect(&t, 4e-7);
        assert!((d.total() - 2.0 * 6e-7).abs() < 1e-18);
    }

    #[test]
    fn structural_defect_uses_min_concentration() {
        let t = target(0, 1e-6, vec![0, 1]);
        let cd = Defect { contributions: vec![(0, 0.5), (1, 0.25)] };
        let d = structural_defect(&t, &cd, 2e-6);
        assert!((d.total() - 0.75e-6).abs() < 1e-18);
    }

    #[test]
    fn tube_without_on_targets_has_zero_defect() {
        let tube = Tube {
            name: "t".into(),
            targets: vec![target(0, 0.0, vec![0])],
            model: ThermoModel::default(),
            stoichiometry: vec![vec![1.0]],
            nucleotide_concentration: 0.0,
        };
        let d = tube
            .normalized_defect(&[0.0], &[Defect::empty()], &EnsemblePartition::all(), None)
            .unwrap();
        assert_eq!(d.total(), 0.0);
    }
}
