// crates/mtd-core/src/sparse.rs

//! Sparse symmetric pair-probability matrices.
//!
//! Stored as `(row, col, value)` triplets in row-major order. Both `(i, j)`
//! and `(j, i)` are materialized so row reductions need no transpose pass;
//! the symmetric insert helpers keep the two halves in sync.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sparse symmetric matrix of base-pair probabilities.
#[derive(Clone, Default, Debug, Serialize, Deserialize, PartialEq)]
pub struct SparseMatrix {
    n: usize,
    entries: Vec<(u32, u32, f64)>,
}

impl SparseMatrix {
    /// An empty `n × n` matrix.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self { n, entries: Vec::new() }
    }

    /// Build from an accumulation map (both halves expected present).
    fn from_map(n: usize, map: BTreeMap<(u32, u32), f64>) -> Self {
        Self { n, entries: map.into_iter().map(|((i, j), v)| (i, j, v)).collect() }
    }

    /// Side length.
    #[inline]
    #[must_use]
    pub fn n(&self) -> usize {
        self.n
    }

    /// Number of stored entries (both halves counted).
    #[inline]
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Stored value at `(i, j)`, or 0.
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        let key = (i as u32, j as u32);
        self.entries
            .binary_search_by(|&(r, c, _)| (r, c).cmp(&key))
            .map_or(0.0, |idx| self.entries[idx].2)
    }

    /// Iterate stored `(row, col, value)` triplets in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.entries.iter().map(|&(i, j, v)| (i as usize, j as usize, v))
    }

    /// Iterate each unordered pair once (`row < col`).
    pub fn iter_upper(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.iter().filter(|&(i, j, _)| i < j)
    }

    /// `Σ_j m[i][j]` for every row.
    #[must_use]
    pub fn row_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.n];
        for &(i, _, v) in &self.entries {
            sums[i as usize] += v;
        }
        sums
    }

    /// Drop entries below `threshold`.
    #[must_use]
    pub fn sparsified(mut self, threshold: f64) -> Self {
        self.entries.retain(|&(_, _, v)| v >= threshold);
        self
    }

    /// Remap every index through `f` into an `n_out × n_out` matrix,
    /// accumulating collisions. Used to lift child matrices into the parent
    /// index space when joining a split.
    #[must_use]
    pub fn mapped_into(&self, n_out: usize, f: impl Fn(usize) -> usize) -> Self {
        let mut map = BTreeMap::new();
        for &(i, j, v) in &self.entries {
            let key = (f(i as usize) as u32, f(j as usize) as u32);
            *map.entry(key).or_insert(0.0) += v;
        }
        Self::from_map(n_out, map)
    }

    /// Build from `(row, col, value)` entries where later entries
    /// overwrite earlier ones at the same cell (assignment semantics).
    #[must_use]
    pub fn from_assignments(
        n: usize,
        entries: impl IntoIterator<Item = (usize, usize, f64)>,
    ) -> Self {
        let mut map = BTreeMap::new();
        for (i, j, v) in entries {
            map.insert((i as u32, j as u32), v);
        }
        Self::from_map(n, map)
    }

    /// Approximate heap footprint, for cache budgeting.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.entries.capacity() * std::mem::size_of::<(u32, u32, f64)>()
    }

    /// Largest absolute difference against `other` over the union of
    /// stored entries (test helper for merge tolerances).
    #[must_use]
    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        let mut worst = 0.0_f64;
        for (i, j, v) in self.iter() {
            worst = worst.max((v - other.get(i, j)).abs());
        }
        for (i, j, v) in other.iter() {
            worst = worst.max((v - self.get(i, j)).abs());
        }
        worst
    }
}

/// Incremental builder accumulating weighted symmetric entries; used by the
/// dense→sparse conversion and by alternative merging.
#[derive(Default)]
pub struct SparseAccum {
    n: usize,
    map: BTreeMap<(u32, u32), f64>,
}

impl SparseAccum {
    /// A blank accumulator for an `n × n` result.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self { n, map: BTreeMap::new() }
    }

    /// Add `v` at `(i, j)` and `(j, i)`.
    pub fn add_sym(&mut self, i: usize, j: usize, v: f64) {
        *self.map.entry((i as u32, j as u32)).or_insert(0.0) += v;
        if i != j {
            *self.map.entry((j as u32, i as u32)).or_insert(0.0) += v;
        }
    }

    /// Add `factor * m` elementwise.
    pub fn add_scaled(&mut self, m: &SparseMatrix, factor: f64) {
        for (i, j, v) in m.iter() {
            *self.map.entry((i as u32, j as u32)).or_insert(0.0) += factor * v;
        }
    }

    /// Finish, dropping entries below `threshold`.
    #[must_use]
    pub fn finish(self, threshold: f64) -> SparseMatrix {
        SparseMatrix::from_map(self.n, self.map).sparsified(threshold)
    }
}
