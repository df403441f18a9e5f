// crates/mtd-design/src/designer.rs

//! The four-level design optimizer.
//!
//! L1 `mutate_leaves`: tabu point mutation at the deepest decomposition
//! level. L2 `optimize_leaves`: reseed and re-run L1. L3 `optimize_forest`:
//! merge estimates depth by depth, redecomposing where a merge falls
//! short. L4 `optimize_tubes`: compare the focused estimate against the
//! full ensemble and refocus passive complexes until they agree.

use crate::design::Design;
use crate::granularity::{EnsembleLevelSpec, EnsemblePartition, LevelSpec};
use crate::objectives::Objective;
use crate::results::{
    scalarized_sample, Candidate, ComplexResult, DesignResult, DesignState, SingleResult,
    TubeComplexResult, TubeResult,
};
use crate::tube::{concentration_defect, structural_defect};
use crate::weights::Weights;
use anyhow::Result;
use mtd_core::exec::{CancelToken, Env};
use mtd_core::rng;
use mtd_core::types::Sequence;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info};

/// All tunable knobs of the optimizer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct DesignParameters {
    /// RNG seed; 0 seeds from entropy (and keeps the solver race enabled).
    pub rng_seed: u64,
    /// Stop condition on the weighted defect.
    pub f_stop: f64,
    /// Fraction of the stop condition allotted to passive off-targets.
    pub f_passive: f64,
    /// Flanking pairs required around a split point.
    pub h_split: usize,
    /// Minimum nucleotides per decomposition child.
    pub n_split: usize,
    /// Ensemble fraction a split set must capture.
    pub f_split: f64,
    /// Per-depth stringency factor on the stop condition.
    pub f_stringent: f64,
    /// Enforced-pair bonus energy (kcal/mol).
    pub dg_clamp: f64,
    /// Failed mutations tolerated before leaf mutation exits.
    pub m_bad: u32,
    /// Positions mutated together when reseeding.
    pub m_reseed: usize,
    /// Reseed rounds tolerated without improvement.
    pub m_reopt: u32,
    /// Fraction of a depth-gap allowed to remain after redecomposition.
    pub f_redecomp: f64,
    /// Fraction of the focus-gap allowed to remain after refocusing.
    pub f_refocus: f64,
    /// Sparsification threshold for pair probabilities.
    pub f_sparse: f64,
    /// Byte budget for the shared record caches.
    pub cache_bytes: usize,
    /// Run a timed full evaluation at the end.
    pub time_analysis: bool,
}

impl Default for DesignParameters {
    fn default() -> Self {
        Self {
            rng_seed: 0,
            f_stop: 0.02,
            f_passive: 0.01,
            h_split: 2,
            n_split: 12,
            f_split: 0.99,
            f_stringent: 0.99,
            dg_clamp: -20.0,
            m_bad: 300,
            m_reseed: 50,
            m_reopt: 3,
            f_redecomp: 0.03,
            f_refocus: 0.03,
            f_sparse: 1e-5,
            cache_bytes: 0,
            time_analysis: false,
        }
    }
}

/// Counters and timings accumulated over a design (and across restarts).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DesignStats {
    /// Leaf-level objective evaluations.
    pub num_leaf_evaluations: u64,
    /// Reseed rounds taken.
    pub num_reseeds: u64,
    /// Redecompositions per depth.
    pub num_redecompositions: Vec<u32>,
    /// Off-targets activated at each refocus.
    pub offtargets_added_per_refocus: Vec<usize>,
    /// Cumulative design time in seconds (across checkpoint restarts).
    pub design_time: f64,
    /// Wall time of the final timed evaluation, if requested.
    pub analysis_time: f64,
    /// The partition in force when the design finished.
    pub final_psi: EnsemblePartition,
}

/// Wall-clock timer. Serializes as its banked seconds, so elapsed time in
/// a checkpointed segment survives the restart and cumulative totals stay
/// honest across resumes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Timer {
    #[serde(skip)]
    start: Option<Instant>,
    banked: f64,
}

impl From<f64> for Timer {
    fn from(banked: f64) -> Self {
        Self { start: None, banked }
    }
}

impl From<Timer> for f64 {
    fn from(t: Timer) -> f64 {
        t.elapsed()
    }
}

impl Timer {
    /// Start (or resume) the timer; banked time is kept.
    pub fn start(&mut self) {
        if self.start.is_none() {
            self.start = Some(Instant::now());
        }
    }

    /// Banked plus running seconds.
    #[must_use]
    pub fn elapsed(&self) -> f64 {
        self.banked + self.start.map_or(0.0, |s| s.elapsed().as_secs_f64())
    }

    /// Stop, bank nothing further, and return the total elapsed seconds.
    pub fn stop(&mut self) -> f64 {
        let e = self.elapsed();
        self.start = None;
        self.banked = 0.0;
        e
    }
}

/// Checkpoint hook: `(designer, done)`.
pub type CheckpointFn = Box<dyn FnMut(&Designer, bool) + Send>;

/// The design logic: owns the design and drives the four levels.
#[derive(Serialize, Deserialize)]
pub struct Designer {
    /// The tangible design.
    pub design: Design,
    /// Objectives, evaluated in order.
    pub objectives: Vec<Objective>,
    /// Optimizer knobs.
    pub parameters: DesignParameters,
    /// Per-nucleotide and per-objective weights.
    pub weights: Weights,
    /// Active/passive complex partition.
    pub psi: EnsemblePartition,
    /// Deepest decomposition level.
    pub max_depth: usize,
    /// Run statistics.
    pub stats: DesignStats,
    /// Best candidates per level.
    pub best: DesignState,
    /// Sequences known to cycle after redecomposition.
    pub known_bads: BTreeSet<Sequence>,
    /// Wall-clock timer; its banked seconds ride along in checkpoints.
    #[serde(default)]
    pub timer: Timer,
    /// Optional checkpoint hook.
    #[serde(skip)]
    pub checkpoint: Option<CheckpointFn>,
    /// External cancellation flag, polled at level boundaries.
    #[serde(skip)]
    pub cancel: CancelToken,
}

impl std::fmt::Debug for Designer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Designer")
            .field("design", &self.design)
            .field("objectives", &self.objectives.len())
            .field("max_depth", &self.max_depth)
            .field("psi", &self.psi)
            .finish_non_exhaustive()
    }
}

impl Designer {
    /// Assemble a designer; call [`Designer::initialize`] before running.
    #[must_use]
    pub fn new(
        design: Design,
        objectives: Vec<Objective>,
        weights: Weights,
        parameters: DesignParameters,
    ) -> Self {
        Self {
            design,
            objectives,
            parameters,
            weights,
            psi: EnsemblePartition::all(),
            max_depth: 0,
            stats: DesignStats::default(),
            best: DesignState::default(),
            known_bads: BTreeSet::new(),
            timer: Timer::default(),
            checkpoint: None,
            cancel: CancelToken::new(),
        }
    }

    /// Seed the RNG, solve the initial sequence, decompose active
    /// complexes, and resolve objectives and weights.
    pub fn initialize(&mut self, decompose: bool) -> Result<()> {
        rng::install_seed(self.parameters.rng_seed);
        self.timer.start();

        self.design.initialize_sequence()?;
        // Disable the time-based solver race when deterministic.
        if self.parameters.rng_seed != 0 {
            self.design.sequences.constraints.msec_cutoff = 0;
        }

        if self.psi.is_empty() {
            let mask = self.design.complexes.iter().map(crate::complex::Complex::is_on_target).collect();
            self.psi = EnsemblePartition::new(
                mask,
                self.parameters.f_passive * self.parameters.f_stop,
            );
        }

        if decompose {
            self.design.initialize_decomposition(&self.psi);
        }

        let mut objectives = std::mem::take(&mut self.objectives);
        for o in &mut objectives {
            o.initialize(&self.design)?;
        }
        self.objectives = objectives;

        self.max_depth = self.design.max_depth();
        if self.weights.any() {
            let mut weights = std::mem::take(&mut self.weights);
            weights.resolve(&self.design)?;
            self.weights = weights;
        }
        while self.weights.objective_weights.len() < self.objectives.len() {
            self.weights.objective_weights.push(1.0);
        }
        Ok(())
    }

    /// Cumulative design time including the running segment.
    #[must_use]
    pub fn time_elapsed(&self) -> f64 {
        self.stats.design_time + self.timer.elapsed()
    }

    /// Whether the best full-ensemble result meets the stop condition.
    #[must_use]
    pub fn success(&self) -> bool {
        self.best.full.weighted_total() <= self.parameters.f_stop
    }

    fn run_checkpoint(&mut self, done: bool) {
        if let Some(mut cb) = self.checkpoint.take() {
            cb(self, done);
            self.checkpoint = Some(cb);
        }
    }

    /// Evaluate every objective at `depth` under `part` for the current
    /// sequence.
    pub fn evaluate_objectives(
        &self,
        env: Env,
        depth: usize,
        part: &EnsemblePartition,
    ) -> Result<Candidate> {
        let mut defects = Vec::with_capacity(self.objectives.len());
        for o in &self.objectives {
            defects.push(o.evaluate(env, &self.design, depth, part, &self.weights)?);
        }
        Ok(Candidate {
            sequence: self.design.sequence().clone(),
            defects,
            weights: self.weights.objective_weights.clone(),
        })
    }

    /// Re-evaluate a candidate at a new depth/partition, keeping the
    /// previous defect wherever the objective's fast path allows.
    pub fn reevaluate_objectives(
        &mut self,
        env: Env,
        candidate: &Candidate,
        depth: usize,
        part: &EnsemblePartition,
    ) -> Result<Candidate> {
        let saved = self.design.sequence().clone();
        self.design.set_sequence(&candidate.sequence)?;
        let mut defects = Vec::with_capacity(self.objectives.len());
        for (i, o) in self.objectives.iter().enumerate() {
            let fresh = o.reevaluate(env, &self.design, depth, part, &self.weights)?;
            defects.push(match fresh {
                Some(d) => d,
                None => candidate.defects.get(i).cloned().unwrap_or_default(),
            });
        }
        let out = Candidate {
            sequence: candidate.sequence.clone(),
            defects,
            weights: self.weights.objective_weights.clone(),
        };
        self.design.set_sequence(&saved)?;
        Ok(out)
    }

    fn leaf_stop(&self) -> f64 {
        self.parameters.f_stop * self.parameters.f_stringent.powi(self.max_depth as i32)
    }

    /// L1: tabu point mutation at the deepest level.
    pub fn mutate_leaves(&mut self, env: Env, seq: Sequence) -> Result<Candidate> {
        let tabu_cap = 4 * self.parameters.m_bad as usize;
        let mut bad_seqs = self.known_bads.clone();

        self.design.set_sequence(&seq)?;
        self.best.leaf_mut = self.evaluate_objectives(env, self.max_depth, &self.psi.clone())?;
        self.stats.num_leaf_evaluations += 1;

        // If seeded on a known-bad sequence, walk away from it first.
        let mut m_bad = 0u32;
        while bad_seqs.contains(&self.best.leaf_mut.sequence) && m_bad < self.parameters.m_bad {
            let sampled = scalarized_sample(&self.best.leaf_mut, 1);
            self.design.mutate_sequence(&sampled);
            self.best.leaf_mut = self.evaluate_objectives(env, self.max_depth, &self.psi.clone())?;
            self.stats.num_leaf_evaluations += 1;
            m_bad += 1;
        }

        info!(
            defect = self.best.leaf_mut.weighted_total(),
            depth = self.max_depth,
            "leaf mutation start"
        );
        let mut m_bad = 0u32;
        let stop = self.leaf_stop();

        while self.best.leaf_mut.weighted_total() > stop && m_bad < self.parameters.m_bad {
            self.cancel.check()?;
            self.run_checkpoint(false);

            // Mutate away from the best encountered sequence.
            let best_seq = self.best.leaf_mut.sequence.clone();
            self.design.set_sequence(&best_seq)?;
            let sampled = scalarized_sample(&self.best.leaf_mut, 1);
            let mutated = self.design.mutate_sequence(&sampled);

            if !mutated {
                // Reported, never fatal: it just burns mutation budget.
                debug!(
                    error = %mtd_core::error::DesignError::MutationInfeasible {
                        positions: sampled,
                    },
                    "mutation infeasible"
                );
                m_bad += 1;
                continue;
            }
            if bad_seqs.contains(self.design.sequence()) {
                m_bad += 1;
                continue;
            }

            let cur = self.evaluate_objectives(env, self.max_depth, &self.psi.clone())?;
            self.stats.num_leaf_evaluations += 1;

            if cur.weighted_total() < self.best.leaf_mut.weighted_total() {
                debug!(defect = cur.weighted_total(), "mutation accepted");
                self.best.leaf_mut = cur;
                bad_seqs.clear();
                m_bad = 0;
            } else {
                debug!(defect = cur.weighted_total(), "mutation rejected");
                if bad_seqs.len() < tabu_cap {
                    bad_seqs.insert(cur.sequence);
                }
                m_bad += 1;
            }
        }
        Ok(self.best.leaf_mut.clone())
    }

    /// L2: leaf optimization with reseeding.
    pub fn optimize_leaves(&mut self, env: Env, seq: Sequence) -> Result<Candidate> {
        self.best.leaf_opt = self.mutate_leaves(env, seq)?;

        let mut m_reopt = 0u32;
        let stop = self.leaf_stop();
        while self.best.leaf_opt.weighted_total() > stop && m_reopt < self.parameters.m_reopt {
            self.cancel.check()?;
            self.run_checkpoint(false);

            let best_seq = self.best.leaf_opt.sequence.clone();
            self.design.set_sequence(&best_seq)?;
            let sampled = scalarized_sample(&self.best.leaf_opt, self.parameters.m_reseed);
            if !self.design.mutate_sequence(&sampled) {
                m_reopt += 1;
                continue;
            }
            self.stats.num_reseeds += 1;
            debug!(positions = sampled.len(), "reseeded");

            let reseeded = self.design.sequence().clone();
            let cur = self.mutate_leaves(env, reseeded)?;
            if cur.weighted_total() < self.best.leaf_opt.weighted_total() {
                self.best.leaf_opt = cur;
                m_reopt = 0;
            } else {
                m_reopt += 1;
            }
        }
        Ok(self.best.leaf_opt.clone())
    }

    /// L3: depth-wise merge with bounded redecomposition.
    pub fn optimize_forest(&mut self, env: Env, seq: Sequence) -> Result<Candidate> {
        self.best.forest.clear();
        self.best.resize_forest(self.max_depth + 1);
        self.best.forest[self.max_depth].sequence = seq;

        loop {
            let leaf_seed = self.best.forest[self.max_depth].sequence.clone();
            let leaf = self.optimize_leaves(env, leaf_seed)?;
            let d_max = self.max_depth;
            self.best.forest[d_max] = leaf.clone();
            self.design.set_sequence(&leaf.sequence)?;

            let mut merge_successful = true;
            let mut depth = self.max_depth as i64 - 1;
            while depth >= 0 && merge_successful {
                let d = depth as usize;
                let child = self.best.forest[d + 1].clone();
                let cur = self.reevaluate_objectives(env, &child, d, &self.psi.clone())?;

                if cur.better_than(&self.best.forest[d]) {
                    debug!(depth = d, defect = cur.weighted_total(), "best merge");
                    self.best.forest[d] = cur.clone();
                }

                let f_d_stop =
                    self.parameters.f_stop * self.parameters.f_stringent.powi(d as i32);
                let child_total = child.weighted_total();

                if cur.weighted_total()
                    > f_d_stop.max(child_total / self.parameters.f_stringent)
                {
                    info!(depth = d, defect = cur.weighted_total(), "merge unsuccessful");
                    self.run_checkpoint(false);
                    merge_successful = false;

                    let redecompose_seq = child.sequence.clone();
                    self.redecompose(env, d, &redecompose_seq)?;

                    if self.stats.num_redecompositions.len() <= self.max_depth {
                        self.stats.num_redecompositions.resize(self.max_depth + 1, 0);
                    }
                    self.stats.num_redecompositions[d] += 1;

                    self.best.resize_forest(self.max_depth + 1);
                    self.best.clear_forest_from(d + 1);
                    let d_max = self.max_depth;
                    self.best.forest[d_max].sequence = self.design.sequence().clone();
                    self.known_bads.insert(self.design.sequence().clone());
                } else {
                    debug!(depth = d, defect = cur.weighted_total(), "merge successful");
                }
                depth -= 1;
            }

            if merge_successful {
                return Ok(self.best.forest[0].clone());
            }
        }
    }

    /// Redecompose the interior nodes at `depth` in descending order of
    /// how much replacing each node by its children underestimates the
    /// defect, until the depth gap closes to `f_redecomp` of its initial
    /// size. Returns whether the gap closed.
    pub fn redecompose(&mut self, env: Env, depth: usize, sequence: &Sequence) -> Result<bool> {
        let saved = self.design.sequence().clone();
        self.design.set_sequence(sequence)?;
        let psi = self.psi.clone();
        let none = EnsembleLevelSpec::default();

        let parent =
            self.design.normalized_defect(env, depth, &psi, &none, &self.weights)?.total();
        let init_child = self.best.forest.get(depth + 1).map_or_else(
            || {
                self.design
                    .normalized_defect(env, depth + 1, &psi, &none, &self.weights)
                    .map(|d| d.total())
                    .unwrap_or(parent)
            },
            Candidate::weighted_total,
        );

        // Underestimate from replacing each interior node by its children.
        let mut replaced: Vec<((usize, i64), f64)> = Vec::new();
        for ci in psi.actives() {
            self.design.complexes[ci].index_nodes();
            for node in self.design.complexes[ci].node_indices(depth, false) {
                let mut indiv = LevelSpec::default();
                indiv.add_exception(node, 1);
                let mut ens = EnsembleLevelSpec::default();
                ens.add(ci, indiv);
                let est =
                    self.design.normalized_defect(env, depth, &psi, &ens, &self.weights)?.total();
                replaced.push(((ci, node), parent - est));
            }
        }

        if replaced.is_empty() {
            self.design.set_sequence(&saved)?;
            return Ok(true);
        }
        replaced.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut child =
            self.design.normalized_defect(env, depth + 1, &psi, &none, &self.weights)?.total();
        let cutoff =
            self.parameters.f_redecomp * (parent - init_child / self.parameters.f_stringent);
        let short = |child_total: f64| {
            parent - child_total / self.parameters.f_stringent > cutoff
        };

        for &((ci, node), underestimate) in &replaced {
            if !short(child) {
                break;
            }
            let mut indiv = LevelSpec::default();
            indiv.add_exception(node, 0);
            let seq = self.design.sequences.nucleotides.clone();
            let tenv = self.design.models.get(&self.design.complexes[ci].target.model);
            let target_depth = self.design.complexes[ci].depth() as i64 + 1;
            let changed = self.design.complexes[ci]
                .probability_decompose(&seq, &tenv, target_depth, &indiv)?;
            self.design.complexes[ci].index_nodes();
            if changed {
                debug!(complex = ci, node, underestimate, "redecomposed node");
            }
            child = self
                .design
                .normalized_defect(env, depth + 1, &psi, &none, &self.weights)?
                .total();
        }

        self.max_depth = self.design.max_depth();
        self.design.set_sequence(&saved)?;
        Ok(!short(child))
    }

    /// L4 helper: activate passive complexes, highest concentration-defect
    /// contribution first, until the focused estimate approaches the full
    /// ensemble defect.
    pub fn refocus(&mut self, env: Env, sequence: &Sequence) -> Result<()> {
        let saved = self.design.sequence().clone();
        self.design.set_sequence(sequence)?;
        let all = EnsemblePartition::all();
        let none = EnsembleLevelSpec::default();

        let full = self.design.normalized_defect(env, 0, &all, &none, &self.weights)?.total();
        let init_estimate =
            self.design.normalized_defect(env, 0, &self.psi, &none, &self.weights)?.total();
        if self.psi.all_active() {
            anyhow::bail!("cannot refocus: every complex is already active");
        }

        // Rank passive complexes by fractional contribution to tube
        // concentrations in the full ensemble.
        let log_pfuncs = self.design.log_pfuncs(env, 0, &all, &none)?;
        let mut fractions = vec![0.0f64; self.design.complexes.len()];
        for tube in &self.design.tubes {
            let fracs = tube.fractions(&log_pfuncs, &all)?;
            for (t, &f) in tube.targets.iter().zip(&fracs) {
                if !self.psi.active(t.complex_index) {
                    fractions[t.complex_index] += f;
                }
            }
        }
        let mut passive: Vec<(usize, f64)> =
            self.psi.passives().into_iter().map(|i| (i, fractions[i])).collect();
        passive.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0))
        });

        let mut part = self.psi.clone();
        let mut order = passive.iter().map(|&(i, _)| i);
        let Some(first) = order.next() else {
            anyhow::bail!("refocus found no passive complex to activate");
        };
        part.activate(first);
        let mut added = vec![first];
        let mut estimate =
            self.design.normalized_defect(env, 0, &part, &none, &self.weights)?.total();
        info!(active = part.num_active(), estimate, full, "refocused");

        let cutoff = self.parameters.f_refocus * (full - init_estimate);
        while full - estimate > cutoff {
            let Some(next) = order.next() else { break };
            part.activate(next);
            added.push(next);
            estimate =
                self.design.normalized_defect(env, 0, &part, &none, &self.weights)?.total();
            info!(active = part.num_active(), estimate, full, "refocused");
        }

        // Newly active on-targets get a structure-guided tree; structure-
        // free off-targets stay leaves. Previously active complexes are
        // re-split under the current sequence.
        for &i in &added {
            if self.design.complexes[i].is_on_target() {
                self.design.complexes[i].structure_decompose();
                self.design.complexes[i].index_nodes();
            }
        }
        self.design.redecompose_active(0, &self.psi.clone())?;

        self.stats.offtargets_added_per_refocus.push(added.len());
        self.psi = part;
        self.known_bads.clear();
        self.max_depth = self.design.max_depth();

        self.design.set_sequence(&saved)?;
        Ok(())
    }

    /// L4: the top-level design loop.
    pub fn optimize_tubes(&mut self, env: Env) -> Result<Candidate> {
        self.max_depth = self.design.max_depth();
        let all = EnsemblePartition::all();

        let start = self.design.sequence().clone();
        let mut estimate = self.optimize_forest(env, start)?;
        self.design.set_sequence(&estimate.sequence)?;
        let mut full = self.reevaluate_objectives(env, &estimate, 0, &all)?;
        if full.better_than(&self.best.full) {
            self.best.full = full.clone();
        }
        info!(defect = full.weighted_total(), "root evaluated");

        while full.weighted_total() > self.parameters.f_stop.max(estimate.weighted_total()) {
            self.cancel.check()?;
            self.run_checkpoint(false);

            let full_seq = full.sequence.clone();
            self.refocus(env, &full_seq)?;
            estimate = self.optimize_forest(env, full_seq)?;
            self.design.set_sequence(&estimate.sequence)?;
            full = self.reevaluate_objectives(env, &estimate, 0, &all)?;
            if full.better_than(&self.best.full) {
                info!(defect = full.weighted_total(), "root accepted");
                self.best.full = full.clone();
            } else {
                info!(defect = full.weighted_total(), "root rejected");
            }
        }
        self.run_checkpoint(true);

        self.stats.design_time += self.timer.stop();
        self.stats.final_psi = self.psi.clone();

        if self.parameters.time_analysis {
            self.time_analysis(env)?;
        }

        Ok(self.best.full.clone())
    }

    /// Timed cold evaluation of the full design (caches cleared first).
    pub fn time_analysis(&mut self, env: Env) -> Result<()> {
        for c in &mut self.design.complexes {
            c.decomposition.revoke_caches();
        }
        self.design.models.clear_caches();
        let t = Instant::now();
        let _ = self.design.normalized_defect(
            env,
            0,
            &EnsemblePartition::all(),
            &EnsembleLevelSpec::default(),
            &self.weights,
        )?;
        self.stats.analysis_time = t.elapsed().as_secs_f64();
        Ok(())
    }

    /// Compete the stored bests across levels and return the winner's
    /// sequence under the current partition.
    pub fn best_sequence(&mut self, env: Env) -> Result<Sequence> {
        let saved = self.design.sequence().clone();
        let mut cur_best = self.best.leaf_mut.sequence.clone();

        let mut slots: Vec<(usize, EnsemblePartition)> = Vec::new();
        slots.push((self.max_depth, self.psi.clone()));
        for depth in (0..self.best.forest.len()).rev() {
            slots.push((depth, self.psi.clone()));
        }
        slots.push((0, EnsemblePartition::all()));

        for (k, (depth, part)) in slots.into_iter().enumerate() {
            if cur_best.is_empty() {
                break;
            }
            self.design.set_sequence(&cur_best)?;
            let cur = self.evaluate_objectives(env, depth, &part)?;
            let other = match k {
                0 => &mut self.best.leaf_opt,
                k if k <= self.best.forest.len() => {
                    let d = self.best.forest.len() - k;
                    &mut self.best.forest[d]
                }
                _ => &mut self.best.full,
            };
            if cur.weighted_total() < other.weighted_total() {
                *other = cur;
            } else {
                cur_best = other.sequence.clone();
            }
        }

        self.design.set_sequence(&saved)?;
        Ok(cur_best)
    }

    /// Fully evaluate a candidate into a reportable [`SingleResult`].
    pub fn single_result(&self, env: Env, candidate: &Candidate) -> Result<SingleResult> {
        let seq = &candidate.sequence;
        let none = LevelSpec::default();

        let mut complexes = Vec::with_capacity(self.design.complexes.len());
        let mut log_pfuncs = Vec::with_capacity(self.design.complexes.len());
        for c in &self.design.complexes {
            let tenv = self.design.models.get(&c.target.model);
            let record = c.record(env, &tenv, seq, 0, &none)?;
            let log_q = record.log_q - c.symmetry_correction();
            log_pfuncs.push(log_q);
            let defect = if c.is_on_target() {
                crate::complex::nucleotide_defects(&record.probabilities, &c.target.structure)
                    .iter()
                    .sum()
            } else {
                0.0
            };
            complexes.push(ComplexResult {
                name: c.name.clone(),
                sequence: c.strands.iter().map(|v| v.to_sequence(seq)).collect(),
                structure: if c.is_on_target() { c.target.structure.dp() } else { String::new() },
                pair_probabilities: record.probabilities,
                log_partition_function: log_q,
                defect,
                normalized_defect: defect / c.size().max(1) as f64,
            });
        }

        let all = EnsemblePartition::all();
        let mut complex_defects = Vec::with_capacity(self.design.complexes.len());
        for c in &self.design.complexes {
            let tenv = self.design.models.get(&c.target.model);
            let d = if c.is_on_target() {
                c.defect(env, &tenv, seq, 0, &none)?
            } else {
                mtd_core::defect::Defect::empty()
            };
            complex_defects.push(d);
        }

        let mut tubes = Vec::with_capacity(self.design.tubes.len());
        for (ti, tube) in self.design.tubes.iter().enumerate() {
            let concs = tube.concentrations(&log_pfuncs, &all)?;
            let mut members = Vec::with_capacity(tube.targets.len());
            for (t, &conc) in tube.targets.iter().zip(&concs) {
                let structural = if t.is_on_target() {
                    structural_defect(t, &complex_defects[t.complex_index], conc).total()
                } else {
                    0.0
                };
                let concentration =
                    if t.is_on_target() { concentration_defect(t, conc).total() } else { 0.0 };
                members.push(TubeComplexResult {
                    name: self.design.complexes[t.complex_index].name.clone(),
                    concentration: conc,
                    target_concentration: t.target_conc,
                    structural_defect: structural,
                    concentration_defect: concentration,
                });
            }
            let defect =
                tube.defect(&log_pfuncs, &complex_defects, &all, self.weights.for_tube(ti))?;
            tubes.push(TubeResult {
                name: tube.name.clone(),
                nucleotide_concentration: tube.nucleotide_concentration,
                defect: defect.total(),
                normalized_defect: defect.total()
                    / tube.nucleotide_concentration.max(f64::MIN_POSITIVE),
                complexes: members,
            });
        }

        Ok(SingleResult {
            domains: self
                .design
                .sequences
                .domains
                .iter()
                .map(|(n, v)| (n.clone(), v.to_sequence(seq)))
                .collect(),
            strands: self
                .design
                .sequences
                .strands
                .iter()
                .map(|(n, v)| (n.clone(), v.to_sequence(seq)))
                .collect(),
            complexes,
            tubes,
            defects: (0..self.objectives.len()).map(|i| candidate.total(i)).collect(),
            weighted_defects: (0..self.objectives.len())
                .map(|i| self.weights.objective_weight(i) * candidate.total(i))
                .collect(),
        })
    }

    /// Package the best result for reporting.
    pub fn design_result(&self, env: Env) -> Result<DesignResult> {
        let single = self.single_result(env, &self.best.full)?;
        Ok(DesignResult {
            model: self
                .design
                .complexes
                .first()
                .map(|c| c.target.model)
                .unwrap_or_default(),
            parameters: self.parameters,
            stats: self.stats.clone(),
            objectives: self.objectives.clone(),
            results: vec![single],
            partition: self.psi.clone(),
            success: self.success(),
        })
    }
}
