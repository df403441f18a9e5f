// crates/mtd-design/src/objectives.rs

//! The closed set of defect objectives.
//!
//! Objectives are a tagged enum dispatched on discriminant. Structural
//! objectives (multitube, tube, complex) re-derive their defect from the
//! thermodynamic state on every call; sequence-only objectives (SSM,
//! pattern, similarity, energy equalization) depend on the sequence alone,
//! so `reevaluate` lets the caller keep the previously computed value.

use crate::design::Design;
use crate::granularity::{EnsembleLevelSpec, EnsemblePartition};
use crate::sequences::StrandView;
use crate::weights::Weights;
use anyhow::{bail, Context, Result};
use mtd_constraints::net::Constraint;
use mtd_core::defect::Defect;
use mtd_core::exec::Env;
use mtd_core::types::Sequence;
use mtd_thermo::kernel::{evaluate_with_promotion, KernelRequest};
use mtd_thermo::model::ThermoModel;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Aggregate normalized defect over every tube.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MultitubeObjective;

/// Normalized defect of a single named tube.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TubeObjective {
    /// Tube name.
    pub tube_name: String,
    /// Resolved index (set by `initialize`).
    #[serde(default)]
    pub tube_id: usize,
}

/// Defect of a single named complex, normalized by its length.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ComplexObjective {
    /// Complex name.
    pub complex_name: String,
    /// Resolved index (set by `initialize`).
    #[serde(default)]
    pub complex_id: usize,
}

/// Forbidden-substring counting over named strands or domains.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PatternObjective {
    /// Element names; empty means every strand.
    pub component_names: Vec<String>,
    /// Forbidden patterns (degenerate codes allowed).
    pub patterns: Vec<Sequence>,
    #[serde(skip)]
    elements: Vec<StrandView>,
    #[serde(skip)]
    grouped: BTreeMap<usize, Vec<Sequence>>,
    #[serde(skip)]
    normalization: usize,
}

/// Similarity of named elements to reference sequences, bounded to a band.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SimilarityObjective {
    /// Element names.
    pub component_names: Vec<String>,
    /// One reference per element.
    pub ref_seqs: Vec<Sequence>,
    /// Allowed match-fraction band per element.
    pub limits: Vec<(f64, f64)>,
    #[serde(skip)]
    elements: Vec<StrandView>,
}

/// Sequence-symmetry minimization over the k-mers of named complexes.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SsmObjective {
    /// Complex names; empty means every on-target complex.
    pub complex_names: Vec<String>,
    /// The window size k.
    pub word_size: usize,
    #[serde(skip)]
    complex_ids: Vec<usize>,
    #[serde(skip)]
    identicals: BTreeMap<usize, BTreeSet<usize>>,
    #[serde(skip)]
    complements: BTreeMap<usize, BTreeSet<usize>>,
    #[serde(skip)]
    complement_restricted: BTreeSet<Vec<usize>>,
    #[serde(skip)]
    words: Vec<Vec<usize>>,
    #[serde(skip)]
    normalization: usize,
}

/// Push listed domains toward a common duplex free energy.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EnergyEqualizationObjective {
    /// Domain names to equalize.
    pub domain_names: Vec<String>,
    /// Target energy; the median is used when absent.
    pub ref_energy: Option<f64>,
    #[serde(skip)]
    domains: Vec<StrandView>,
    #[serde(skip)]
    model: ThermoModel,
}

impl TubeObjective {
    /// Target the named tube.
    #[must_use]
    pub fn new(tube_name: impl Into<String>) -> Self {
        Self { tube_name: tube_name.into(), tube_id: 0 }
    }
}

impl ComplexObjective {
    /// Target the named complex.
    #[must_use]
    pub fn new(complex_name: impl Into<String>) -> Self {
        Self { complex_name: complex_name.into(), complex_id: 0 }
    }
}

impl PatternObjective {
    /// Forbid `patterns` inside the named elements (all strands if empty).
    #[must_use]
    pub fn new(component_names: Vec<String>, patterns: Vec<Sequence>) -> Self {
        Self { component_names, patterns, ..Self::default() }
    }
}

impl SimilarityObjective {
    /// Bound each element's match fraction against its reference.
    #[must_use]
    pub fn new(
        component_names: Vec<String>,
        ref_seqs: Vec<Sequence>,
        limits: Vec<(f64, f64)>,
    ) -> Self {
        Self { component_names, ref_seqs, limits, ..Self::default() }
    }
}

impl SsmObjective {
    /// Minimize reuse of `word_size`-mers across the named complexes.
    #[must_use]
    pub fn new(complex_names: Vec<String>, word_size: usize) -> Self {
        Self { complex_names, word_size, ..Self::default() }
    }
}

impl EnergyEqualizationObjective {
    /// Equalize the duplex energies of the named domains.
    #[must_use]
    pub fn new(domain_names: Vec<String>, ref_energy: Option<f64>) -> Self {
        Self { domain_names, ref_energy, ..Self::default() }
    }
}

/// The closed objective set.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "info")]
pub enum Objective {
    /// Aggregate over all tubes.
    Multitube(MultitubeObjective),
    /// One tube.
    Tube(TubeObjective),
    /// One complex.
    Complex(ComplexObjective),
    /// Sequence-symmetry minimization.
    Ssm(SsmObjective),
    /// Forbidden patterns.
    Pattern(PatternObjective),
    /// Similarity band.
    Similarity(SimilarityObjective),
    /// Duplex energy equalization.
    EnergyEqualization(EnergyEqualizationObjective),
}

impl Objective {
    /// Resolve names and precompute static tables.
    pub fn initialize(&mut self, design: &Design) -> Result<()> {
        match self {
            Self::Multitube(_) => Ok(()),
            Self::Tube(o) => {
                o.tube_id = design.find_tube(&o.tube_name)?;
                Ok(())
            }
            Self::Complex(o) => {
                o.complex_id = design.find_complex(&o.complex_name)?;
                Ok(())
            }
            Self::Ssm(o) => o.initialize(design),
            Self::Pattern(o) => o.initialize(design),
            Self::Similarity(o) => o.initialize(design),
            Self::EnergyEqualization(o) => o.initialize(design),
        }
    }

    /// Compute this objective's defect at `depth` under `part`.
    pub fn evaluate(
        &self,
        env: Env,
        design: &Design,
        depth: usize,
        part: &EnsemblePartition,
        weights: &Weights,
    ) -> Result<Defect> {
        let indiv = EnsembleLevelSpec::default();
        match self {
            Self::Multitube(_) => design.normalized_defect(env, depth, part, &indiv, weights),
            Self::Tube(o) => {
                let tube = &design.tubes[o.tube_id];
                let log_pfuncs = design.log_pfuncs(env, depth, part, &indiv)?;
                let complex_defects = design.complex_defects(env, depth, part, &indiv)?;
                tube.normalized_defect(&log_pfuncs, &complex_defects, part, None)
            }
            Self::Complex(o) => {
                let c = &design.complexes[o.complex_id];
                let tenv = design.models.get(&c.target.model);
                let d = c.defect(
                    env,
                    &tenv,
                    design.sequence(),
                    depth.min(c.depth()),
                    &Default::default(),
                )?;
                Ok(d.scaled(1.0 / c.size() as f64))
            }
            Self::Ssm(o) => o.evaluate(design),
            Self::Pattern(o) => Ok(o.evaluate(design)),
            Self::Similarity(o) => Ok(o.evaluate(design)),
            Self::EnergyEqualization(o) => o.evaluate(design),
        }
    }

    /// Fast path: structural objectives recompute, sequence-only
    /// objectives return `None` to signal "reuse the previous defect".
    pub fn reevaluate(
        &self,
        env: Env,
        design: &Design,
        depth: usize,
        part: &EnsemblePartition,
        weights: &Weights,
    ) -> Result<Option<Defect>> {
        match self {
            Self::Multitube(_) | Self::Tube(_) | Self::Complex(_) => {
                self.evaluate(env, design, depth, part, weights).map(Some)
            }
            _ => Ok(None),
        }
    }
}

impl PatternObjective {
    fn initialize(&mut self, design: &Design) -> Result<()> {
        if self.component_names.is_empty() {
            self.component_names = design.sequences.strands.keys().cloned().collect();
        }
        self.elements = self
            .component_names
            .iter()
            .map(|n| design.sequences.find_element(n))
            .collect::<Result<_>>()?;

        self.grouped.clear();
        for p in &self.patterns {
            self.grouped.entry(p.len()).or_default().push(p.clone());
        }

        self.normalization = 0;
        for &len in self.grouped.keys() {
            for el in &self.elements {
                let n = el.len();
                if n >= len {
                    self.normalization += n - len + 1;
                }
            }
        }
        Ok(())
    }

    fn evaluate(&self, design: &Design) -> Defect {
        let seq = design.sequence();
        let mut dense = vec![0.0; seq.len()];
        for el in &self.elements {
            let sub = el.to_sequence(seq);
            let indices = el.to_indices();
            for (&len, patterns) in &self.grouped {
                if sub.len() < len {
                    continue;
                }
                let per_nuc = 1.0 / len as f64;
                for start in 0..=sub.len() - len {
                    let window = &sub.0[start..start + len];
                    let hit = patterns.iter().any(|p| {
                        window.iter().zip(&p.0).all(|(&b, &pat)| pat.contains(b))
                    });
                    if hit {
                        for &g in &indices[start..start + len] {
                            dense[g] += per_nuc;
                        }
                    }
                }
            }
        }
        Defect::from_dense(&dense, self.normalization.max(1) as f64)
    }
}

impl SimilarityObjective {
    fn initialize(&mut self, design: &Design) -> Result<()> {
        if self.component_names.len() != self.ref_seqs.len()
            || self.component_names.len() != self.limits.len()
        {
            bail!("similarity objective lists must be parallel");
        }
        for &(lo, hi) in &self.limits {
            if !(0.0 < lo && lo < hi && hi < 1.0) {
                bail!("similarity limits ({lo}, {hi}) out of order or range");
            }
        }
        self.elements = self
            .component_names
            .iter()
            .map(|n| design.sequences.find_element(n))
            .collect::<Result<_>>()?;
        for (el, r) in self.elements.iter().zip(&self.ref_seqs) {
            if el.len() != r.len() {
                bail!("similarity reference length {} != element length {}", r.len(), el.len());
            }
        }
        Ok(())
    }

    fn evaluate(&self, design: &Design) -> Defect {
        let normalization: f64 = self
            .ref_seqs
            .iter()
            .zip(&self.limits)
            .map(|(r, &(lo, hi))| r.len() as f64 * lo.max(1.0 - hi))
            .sum();

        let seq = design.sequence();
        let mut dense = vec![0.0; seq.len()];
        for ((el, reference), &(lo, hi)) in
            self.elements.iter().zip(&self.ref_seqs).zip(&self.limits)
        {
            let sub = el.to_sequence(seq);
            let indices = el.to_indices();
            let matches: Vec<bool> = sub
                .0
                .iter()
                .zip(&reference.0)
                .map(|(&s, &r)| r.contains(s))
                .collect();
            let m = matches.iter().filter(|&&x| x).count() as f64;
            let n = sub.len() as f64;
            let frac = m / n;
            if frac < lo {
                let per_nuc = if m > 0.0 { (lo - frac) / frac } else { lo };
                for (&g, &hit) in indices.iter().zip(&matches) {
                    if !hit {
                        dense[g] += per_nuc;
                    }
                }
            } else if frac > hi {
                let per_nuc = (frac - hi) / frac;
                for (&g, &hit) in indices.iter().zip(&matches) {
                    if hit {
                        dense[g] += per_nuc;
                    }
                }
            }
        }
        Defect::from_dense(&dense, normalization.max(f64::MIN_POSITIVE))
    }
}

impl SsmObjective {
    fn initialize(&mut self, design: &Design) -> Result<()> {
        self.complex_ids = if self.complex_names.is_empty() {
            design
                .complexes
                .iter()
                .enumerate()
                .filter(|(_, c)| c.is_on_target())
                .map(|(i, _)| i)
                .collect()
        } else {
            self.complex_names
                .iter()
                .map(|n| design.find_complex(n))
                .collect::<Result<_>>()?
        };

        let n = design.sequences.len();
        self.identicals = (0..n).map(|i| (i, BTreeSet::from([i]))).collect();
        self.complements = (0..n).map(|i| (i, BTreeSet::new())).collect();
        for c in &design.sequences.constraints.net().constraints {
            match c {
                Constraint::Match { i, j } => {
                    self.identicals.entry(*i).or_default().insert(*j);
                    self.identicals.entry(*j).or_default().insert(*i);
                }
                Constraint::Complement { i, j, .. } => {
                    self.complements.entry(*i).or_default().insert(*j);
                    self.complements.entry(*j).or_default().insert(*i);
                }
                _ => {}
            }
        }

        self.process_words(design);
        self.process_structures(design)?;
        Ok(())
    }

    /// Strand-local windows of length `word_size` in one complex,
    /// expressed in complex-local positions.
    fn ranges(&self, nicks: &[usize]) -> Vec<std::ops::Range<usize>> {
        let mut out = Vec::new();
        let n = nicks.last().copied().unwrap_or(0);
        if n < self.word_size {
            return out;
        }
        let mut nick_iter = nicks.iter().copied().peekable();
        let mut i = 0;
        while i + self.word_size <= n {
            match nick_iter.peek() {
                Some(&nk) if i + self.word_size > nk => {
                    i = nk;
                    nick_iter.next();
                }
                _ => {
                    out.push(i..i + self.word_size);
                    i += 1;
                }
            }
        }
        out
    }

    fn process_words(&mut self, design: &Design) {
        self.words.clear();
        for &ci in &self.complex_ids {
            let c = &design.complexes[ci];
            let indices = c.to_indices();
            for r in self.ranges(&c.target.structure.nicks) {
                self.words.push(r.map(|k| indices[k]).collect());
            }
        }
        let distinct: BTreeSet<&Vec<usize>> = self.words.iter().collect();
        self.normalization = distinct.len();
    }

    /// Flag windows whose partners in the target are not one contiguous,
    /// nick-free duplex; their reverse complements count as spurious.
    fn process_structures(&mut self, design: &Design) -> Result<()> {
        self.complement_restricted.clear();
        for &ci in &self.complex_ids {
            let c = &design.complexes[ci];
            let indices = c.to_indices();
            let struc = &c.target.structure;
            for r in self.ranges(&struc.nicks) {
                let window: Vec<usize> = r.clone().collect();
                let paired: Option<Vec<usize>> =
                    window.iter().map(|&k| struc.pair(k)).collect();
                let ok = match paired {
                    Some(mut p) => {
                        p.reverse();
                        let contiguous = p.windows(2).all(|w| w[1] == w[0] + 1);
                        let no_nicks =
                            p.iter().skip(1).all(|&x| !struc.nicks.contains(&x));
                        contiguous && no_nicks
                    }
                    None => false,
                };
                if !ok {
                    self.complement_restricted
                        .insert(window.iter().map(|&k| indices[k]).collect());
                }
            }
        }
        Ok(())
    }

    fn identical(&self, a: &[usize], b: &[usize]) -> bool {
        a.iter()
            .zip(b)
            .all(|(i, j)| self.identicals.get(i).is_some_and(|s| s.contains(j)))
    }

    fn complementary(&self, a: &[usize], b: &[usize]) -> bool {
        a.iter()
            .zip(b.iter().rev())
            .all(|(i, j)| self.complements.get(i).is_some_and(|s| s.contains(j)))
    }

    fn evaluate(&self, design: &Design) -> Result<Defect> {
        let seq = design.sequence();
        // Sequence of each k-mer → the index windows instantiating it.
        let mut critons: BTreeMap<Sequence, Vec<Vec<usize>>> = BTreeMap::new();
        for word in &self.words {
            let s: Sequence = word.iter().map(|&i| seq.0[i]).collect();
            if self.complement_restricted.contains(word) && !s.is_palindromic() {
                critons.entry(s.reverse_complement()).or_default().push(word.clone());
            }
            critons.entry(s).or_default().push(word.clone());
        }

        let mut dense = vec![0.0; seq.len()];
        for (s, windows) in &critons {
            // Group windows related by identity or complementarity; each
            // extra group is one spurious reuse.
            let mut group = vec![usize::MAX; windows.len()];
            let mut n_groups = 0usize;
            for a in 0..windows.len() {
                if group[a] != usize::MAX {
                    continue;
                }
                group[a] = n_groups;
                for b in a + 1..windows.len() {
                    if group[b] == usize::MAX
                        && (self.identical(&windows[a], &windows[b])
                            || self.complementary(&windows[a], &windows[b]))
                    {
                        group[b] = n_groups;
                    }
                }
                n_groups += 1;
            }
            let mut violations = n_groups.saturating_sub(1);
            if s.is_palindromic() {
                violations += 1;
            }
            if violations == 0 {
                continue;
            }
            let total_positions: usize = windows.iter().map(Vec::len).sum();
            let per_nuc = violations as f64 / total_positions as f64;
            for w in windows {
                for &i in w {
                    dense[i] += per_nuc;
                }
            }
        }
        Ok(Defect::from_dense(&dense, self.normalization.max(1) as f64))
    }
}

impl EnergyEqualizationObjective {
    /// Exponential scale (kcal/mol) converting energy gaps to defects.
    const SCALE: f64 = 10.0;

    fn initialize(&mut self, design: &Design) -> Result<()> {
        self.domains = self
            .domain_names
            .iter()
            .map(|n| {
                let d = design.sequences.get_domain(n)?;
                Ok(StrandView::new(vec![d]))
            })
            .collect::<Result<_>>()?;
        self.model = design
            .complexes
            .first()
            .map(|c| c.target.model)
            .context("energy equalization needs at least one complex")?;
        Ok(())
    }

    fn evaluate(&self, design: &Design) -> Result<Defect> {
        let seq = design.sequence();
        let tenv = design.models.get(&self.model);
        let rt = self.model.rt();

        let mut energies = Vec::with_capacity(self.domains.len());
        for d in &self.domains {
            let s = d.to_sequence(seq);
            let duplex = mtd_core::types::ComplexSequence::new(vec![
                s.clone(),
                s.reverse_complement(),
            ]);
            let request =
                KernelRequest { seq: &duplex, enforced: &[], dg_clamp: -20.0, f_sparse: 0.0 };
            let record = evaluate_with_promotion(tenv.kernel.as_ref(), &tenv.model, &request)?;
            energies.push(-rt * record.log_q);
        }

        let goal = match self.ref_energy {
            Some(e) => e,
            None => median(&energies),
        };

        let denom = self.domains.len().max(1) as f64;
        let mut dense = vec![0.0; seq.len()];
        for (d, &e) in self.domains.iter().zip(&energies) {
            let defect = (1.0 - (-(e - goal).abs() / Self::SCALE).exp()) / denom;
            let per_nuc = defect / d.len() as f64;
            for i in d.to_indices() {
                dense[i] += per_nuc;
            }
        }
        Ok(Defect::from_dense(&dense, 1.0))
    }
}

fn median(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}
