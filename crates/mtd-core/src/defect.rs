// crates/mtd-core/src/defect.rs

//! Per-nucleotide defect vectors.
//!
//! A defect is a sparse list of `(position, contribution)` pairs over the
//! global sequence variables; it represents the same quantity at every
//! level of the design (complex, tube, multitube). Totals are sums over
//! contributions; weighting and scaling act component-wise.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sparse per-nucleotide defect contributions.
#[derive(Clone, Default, Debug, Serialize, Deserialize, PartialEq)]
pub struct Defect {
    /// `(global position, contribution)` pairs; may repeat a position until
    /// [`Defect::reduced`] is applied.
    pub contributions: Vec<(u32, f64)>,
}

impl Defect {
    /// A defect with no contributions.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A defect with a single contribution (used for the +∞ sentinel).
    #[must_use]
    pub fn single(position: u32, contribution: f64) -> Self {
        Self { contributions: vec![(position, contribution)] }
    }

    /// Build from a dense vector, dividing each entry by `normalization`
    /// and dropping zeros.
    #[must_use]
    pub fn from_dense(dense: &[f64], normalization: f64) -> Self {
        let contributions = dense
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d > 0.0)
            .map(|(i, &d)| (i as u32, d / normalization))
            .collect();
        Self { contributions }
    }

    /// Sum of all contributions.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.contributions.iter().map(|&(_, d)| d).sum()
    }

    /// Collapse duplicate positions by summing them.
    #[must_use]
    pub fn reduced(&self) -> Self {
        let mut map = BTreeMap::new();
        for &(i, d) in &self.contributions {
            *map.entry(i).or_insert(0.0) += d;
        }
        Self { contributions: map.into_iter().collect() }
    }

    /// Every contribution multiplied by `factor`.
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            contributions: self.contributions.iter().map(|&(i, d)| (i, d * factor)).collect(),
        }
    }

    /// Component-wise sum with `other`.
    #[must_use]
    pub fn plus(&self, other: &Self) -> Self {
        let mut contributions = self.contributions.clone();
        contributions.extend_from_slice(&other.contributions);
        Self { contributions }.reduced()
    }

    /// Sample up to `num` distinct positions, each weighted by its
    /// contribution. Used by the optimizer's scalarized mutation sampling.
    #[must_use]
    pub fn sample_positions(&self, rng: &mut StdRng, num: usize) -> Vec<usize> {
        let mut pool: Vec<(u32, f64)> =
            self.reduced().contributions.into_iter().filter(|&(_, d)| d > 0.0).collect();
        let mut chosen = Vec::with_capacity(num);
        while chosen.len() < num && !pool.is_empty() {
            let total: f64 = pool.iter().map(|&(_, d)| d).sum();
            if total <= 0.0 || !total.is_finite() {
                break;
            }
            let mut pick = rng.random_range(0.0..total);
            let mut idx = pool.len() - 1;
            for (k, &(_, d)) in pool.iter().enumerate() {
                if pick < d {
                    idx = k;
                    break;
                }
                pick -= d;
            }
            chosen.push(pool.swap_remove(idx).0 as usize);
        }
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn reduce_sums_repeated_positions() {
        let d = Defect { contributions: vec![(3, 0.25), (1, 0.5), (3, 0.25)] };
        let r = d.reduced();
        assert_eq!(r.contributions, vec![(1, 0.5), (3, 0.5)]);
        assert!((r.total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn dense_conversion_normalizes() {
        let d = Defect::from_dense(&[0.0, 2.0, 0.0, 1.0], 2.0);
        assert_eq!(d.contributions, vec![(1, 1.0), (3, 0.5)]);
    }

    #[test]
    fn sampling_is_without_replacement() {
        let d = Defect { contributions: vec![(0, 0.1), (1, 5.0), (2, 0.1)] };
        let mut rng = StdRng::seed_from_u64(5);
        let picks = d.sample_positions(&mut rng, 3);
        assert_eq!(picks.len(), 3);
        let mut sorted = picks.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 3);
    }

    #[test]
    fn sampling_ignores_zero_weight_positions() {
        let d = Defect { contributions: vec![(0, 0.0), (7, 1.0)] };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(d.sample_positions(&mut rng, 4), vec![7]);
    }
}
