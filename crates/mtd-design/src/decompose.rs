// crates/mtd-design/src/decompose.rs

//! Recursive decomposition trees.
//!
//! Each node covers a sub-sequence of its complex and may hold several
//! *alternative* child pairs, one per mutually exclusive split point. An
//! evaluation either runs the kernel directly (at depth 0 or at a leaf) or
//! recurses into every viable alternative, joins each child pair, and
//! merges the alternatives weighted by their share of the partition
//! function. Every node carries a per-depth mini-cache keyed by its own
//! sub-sequence.

use crate::granularity::LevelSpec;
use crate::sequences::StrandView;
use crate::split::{
    self, minimal_splits, split_pairs, split_sequence, split_structure, SplitPoint,
};
use anyhow::Result;
use mtd_core::exec::Env;
use mtd_core::sparse::{SparseAccum, SparseMatrix};
use mtd_core::structure::Structure;
use mtd_core::types::{can_pair, ComplexSequence, Sequence};
use mtd_thermo::cache::CacheKey;
use mtd_thermo::kernel::{evaluate_with_promotion, KernelRequest, ThermoRecord};
use mtd_thermo::overflow::log_sum_exp;
use mtd_thermo::ThermoEnv;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Knobs controlling decomposition and kernel calls for one complex.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct DecompositionParameters {
    /// Flanking base pairs required on each side of a split point.
    pub h_split: usize,
    /// Minimum nucleotides per child node.
    pub n_split: usize,
    /// Ensemble fraction a split set must capture.
    pub f_split: f64,
    /// Sparsification threshold for pair-probability matrices.
    pub f_sparse: f64,
    /// Bonus free energy on enforced pairs (kcal/mol, strongly negative).
    pub dg_clamp: f64,
}

impl Default for DecompositionParameters {
    fn default() -> Self {
        Self { h_split: 2, n_split: 12, f_split: 0.99, f_sparse: 1e-5, dg_clamp: -20.0 }
    }
}

/// Per-depth mini-cache of `(sub-sequence, record)`.
#[derive(Debug, Default)]
pub struct NodeCache {
    slots: Vec<Option<(ComplexSequence, ThermoRecord)>>,
}

impl NodeCache {
    fn get(&self, seq: &ComplexSequence, depth: usize) -> Option<ThermoRecord> {
        match self.slots.get(depth) {
            Some(Some((s, rec))) if s == seq => Some(rec.clone()),
            _ => None,
        }
    }

    fn put(&mut self, seq: ComplexSequence, depth: usize, rec: ThermoRecord) {
        if self.slots.len() <= depth {
            self.slots.resize_with(depth + 1, || None);
        }
        self.slots[depth] = Some((seq, rec));
    }

    fn revoke_non_root(&mut self) {
        self.slots.truncate(1);
    }
}

/// One node of a complex's decomposition tree.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct DecompositionNode {
    /// Pairs inherited from ancestor splits, in this node's index space.
    pub enforced_pairs: Vec<SplitPoint>,
    /// Strand views defining this node's sub-sequence.
    pub sequence: Vec<StrandView>,
    /// Target sub-structure (degenerate for structure-free nodes).
    pub structure: Structure,
    /// Alternative children: `(split point, (left, right))`, pairwise
    /// crossing across alternatives.
    pub children: Vec<(SplitPoint, Box<(DecompositionNode, DecompositionNode)>)>,
    /// Stable node index within the complex (set by `index_nodes`).
    pub index: i64,
    /// Per-depth result cache; never serialized.
    #[serde(skip)]
    pub cache: Mutex<NodeCache>,
}

impl DecompositionNode {
    /// A fresh (leaf) node.
    #[must_use]
    pub fn new(
        sequence: Vec<StrandView>,
        structure: Structure,
        enforced_pairs: Vec<SplitPoint>,
    ) -> Self {
        Self { enforced_pairs, sequence, structure, children: Vec::new(), index: -1, cache: Mutex::default() }
    }

    /// Total nucleotides covered by this node.
    #[must_use]
    pub fn size(&self) -> usize {
        self.sequence.iter().map(StrandView::len).sum()
    }

    /// Depth of the subtree rooted here (0 for a leaf).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.children
            .iter()
            .flat_map(|(_, pair)| [pair.0.depth(), pair.1.depth()])
            .max()
            .map_or(0, |d| d + 1)
    }

    /// Visit this node and all descendants.
    pub fn apply_recursive(&self, f: &mut impl FnMut(&Self)) {
        f(self);
        for (_, pair) in &self.children {
            pair.0.apply_recursive(f);
            pair.1.apply_recursive(f);
        }
    }

    /// Visit this node and all descendants, mutably.
    pub fn apply_recursive_mut(&mut self, f: &mut impl FnMut(&mut Self)) {
        f(self);
        for (_, pair) in &mut self.children {
            pair.0.apply_recursive_mut(f);
            pair.1.apply_recursive_mut(f);
        }
    }

    /// Indices of nodes exactly `depth` levels below this one.
    pub fn register_indices(&self, registered: &mut Vec<i64>, depth: usize, include_leaves: bool) {
        if depth == 0 {
            if include_leaves || !self.children.is_empty() {
                registered.push(self.index);
            }
            return;
        }
        for (_, pair) in &self.children {
            pair.0.register_indices(registered, depth - 1, include_leaves);
            pair.1.register_indices(registered, depth - 1, include_leaves);
        }
    }

    /// Drop cached non-root results everywhere below (and at) this node.
    pub fn revoke_caches(&self) {
        self.apply_recursive(&mut |n| {
            if let Ok(mut c) = n.cache.lock() {
                c.revoke_non_root();
            }
        });
    }

    /// The node's sub-sequence under the current global sequence.
    #[must_use]
    pub fn complex_sequence(&self, s: &Sequence) -> ComplexSequence {
        ComplexSequence::new(self.sequence.iter().map(|v| v.to_sequence(s)).collect())
    }

    /// Add the child pair implied by `sp`.
    pub fn add_child(&mut self, sp: SplitPoint) {
        let (ls, rs) = split_structure(sp, &self.structure);
        let (lq, rq) = split_sequence(sp, &self.sequence);
        let (lp, rp) = split_pairs(sp, &self.enforced_pairs);
        self.children.push((
            sp,
            Box::new((DecompositionNode::new(lq, ls, lp), DecompositionNode::new(rq, rs, rp))),
        ));
    }

    /// Structure-guided decomposition: recursively split at the cheapest
    /// valid split point until none remains.
    pub fn structure_decompose(&mut self, min_size: usize, min_helix: usize) {
        let splits = split::valid_split_points(&self.structure, min_size, min_helix);
        let Some(&best) = split::ascending_cost_splits(splits, self.size()).first() else {
            return; // no valid split; node stays a leaf
        };
        self.children.clear();
        self.add_child(best);
        for (_, pair) in &mut self.children {
            pair.0.structure_decompose(min_size, min_helix);
            pair.1.structure_decompose(min_size, min_helix);
        }
    }

    /// Probability-guided decomposition down to `depth` levels. Replaces
    /// this node's alternatives with the minimal exclusive split set when
    /// one exists; otherwise the node stays a leaf. Returns whether the
    /// tree changed (callers invalidate caches).
    pub fn probability_decompose(
        &mut self,
        params: &DecompositionParameters,
        s: &Sequence,
        tenv: &ThermoEnv,
        depth: i64,
        indiv: &LevelSpec,
    ) -> Result<bool> {
        let mut changed = false;
        let depth = indiv.depth_for(self.index, depth.max(0) as usize) as i64;

        if depth <= 0 || (self.children.is_empty() && !indiv.any()) {
            let record = self.evaluate(Env::Serial, tenv, s, 0, params, &LevelSpec::default())?;
            let optimal = minimal_splits(
                &record.probabilities,
                params.f_split,
                params.n_split,
                params.h_split,
                &self.structure,
            );

            let before = self.children.len();
            if optimal.is_empty() && before == 0 && self.size() >= 2 * params.n_split {
                // Recovered locally: the node stays a leaf.
                tracing::debug!(
                    error = %mtd_core::error::DesignError::DecompositionFailure {
                        node: self.index,
                    },
                    size = self.size(),
                    "no valid split set"
                );
            }
            self.children.retain(|(sp, _)| optimal.contains(sp));
            changed |= before > self.children.len();
            for sp in optimal {
                if !self.children.iter().any(|(c, _)| *c == sp) {
                    self.add_child(sp);
                    changed = true;
                }
            }
        }

        for k in 0..self.children.len() {
            let pair = &mut self.children[k].1;
            changed |= pair.0.probability_decompose(params, s, tenv, depth - 1, indiv)?;
            changed |= pair.1.probability_decompose(params, s, tenv, depth - 1, indiv)?;
        }
        if changed {
            if let Ok(mut c) = self.cache.lock() {
                c.revoke_non_root();
            }
        }
        Ok(changed)
    }

    /// Evaluate this node at `depth` remaining levels: kernel call at the
    /// bottom, join-and-merge above it. Consults the node mini-cache and,
    /// for unconstrained leaves, the shared record cache.
    pub fn evaluate(
        &self,
        env: Env,
        tenv: &ThermoEnv,
        s: &Sequence,
        depth: usize,
        params: &DecompositionParameters,
        indiv: &LevelSpec,
    ) -> Result<ThermoRecord> {
        let seq = self.complex_sequence(s);
        let use_higher_cache = !indiv.any();
        let depth = indiv.depth_for(self.index, depth);

        let flat = seq.flatten().0;
        let pairable = |sp: &SplitPoint| can_pair(flat[sp.0], flat[sp.1]);

        let viable: Vec<usize> = self
            .children
            .iter()
            .enumerate()
            .filter(|(_, (sp, _))| pairable(sp))
            .map(|(k, _)| k)
            .collect();

        if depth == 0 || viable.is_empty() {
            if let Ok(cache) = self.cache.lock() {
                if let Some(rec) = cache.get(&seq, 0) {
                    return Ok(rec);
                }
            }
            // The shared cache only serves unconstrained nodes: enforced
            // pairs condition the ensemble, so records would collide.
            let shared_key = self.enforced_pairs.is_empty().then(|| CacheKey { seq: seq.clone(), depth: 0 });
            if let Some(key) = &shared_key {
                if let Some(rec) = tenv.cache.get(key) {
                    return Ok((*rec).clone());
                }
            }

            let request = KernelRequest {
                seq: &seq,
                enforced: &self.enforced_pairs,
                dg_clamp: params.dg_clamp,
                f_sparse: params.f_sparse,
            };
            let record = evaluate_with_promotion(tenv.kernel.as_ref(), &tenv.model, &request)?;
            if let Some(key) = shared_key {
                tenv.cache.put(key, std::sync::Arc::new(record.clone()));
            }
            if let Ok(mut cache) = self.cache.lock() {
                cache.put(seq, 0, record.clone());
            }
            return Ok(record);
        }

        if use_higher_cache {
            if let Ok(cache) = self.cache.lock() {
                if let Some(rec) = cache.get(&seq, depth) {
                    return Ok(rec);
                }
            }
        }

        // Evaluate all viable children, potentially in parallel.
        let tasks: Vec<(&DecompositionNode, SplitPoint)> = viable
            .iter()
            .flat_map(|&k| {
                let (sp, pair) = &self.children[k];
                [(&pair.0, *sp), (&pair.1, *sp)]
            })
            .collect();
        let child_env = env.threshold(self.size());
        let results: Vec<Result<ThermoRecord>> = child_env.map(tasks.len(), 1, |e, t| {
            tasks[t].0.evaluate(e, tenv, s, depth - 1, params, indiv)
        });
        let mut records = Vec::with_capacity(results.len());
        for r in results {
            records.push(r?);
        }

        let joined: Vec<ThermoRecord> = viable
            .iter()
            .enumerate()
            .map(|(t, &k)| {
                let sp = self.children[k].0;
                join_children(sp, &records[2 * t], &records[2 * t + 1])
            })
            .collect();

        let merged = merge_alternatives(&joined, params.f_sparse);
        if use_higher_cache {
            if let Ok(mut cache) = self.cache.lock() {
                cache.put(seq, depth, merged.clone());
            }
        }
        Ok(merged)
    }
}

/// Join the two children of one split into the parent record: log Q adds,
/// and each child's pair matrix maps through its index bijection (the
/// right child wins the shared split-point cell).
#[must_use]
pub fn join_children(sp: SplitPoint, left: &ThermoRecord, right: &ThermoRecord) -> ThermoRecord {
    let n = left.probabilities.n() + right.probabilities.n() - 2;
    let (i, j) = sp;
    let from_left = |x: usize| if x <= i { x } else { x - i + j - 1 };
    let from_right = |x: usize| x + i;

    let entries = left
        .probabilities
        .iter()
        .map(|(r, c, v)| (from_left(r), from_left(c), v))
        .chain(right.probabilities.iter().map(|(r, c, v)| (from_right(r), from_right(c), v)));

    ThermoRecord {
        log_q: left.log_q + right.log_q,
        probabilities: SparseMatrix::from_assignments(n, entries),
    }
}

/// Merge alternative (mutually exclusive) joined results: partition
/// functions sum; matrices combine weighted by each alternative's share.
#[must_use]
pub fn merge_alternatives(results: &[ThermoRecord], f_sparse: f64) -> ThermoRecord {
    if results.len() == 1 {
        return results[0].clone();
    }
    let total = results.iter().fold(f64::NEG_INFINITY, |acc, r| log_sum_exp(acc, r.log_q));
    let n = results.first().map_or(0, |r| r.probabilities.n());
    let mut acc = SparseAccum::new(n);
    for r in results {
        let fraction = (r.log_q - total).exp();
        acc.add_scaled(&r.probabilities, fraction);
    }
    ThermoRecord { log_q: total, probabilities: acc.finish(f_sparse) }
}
