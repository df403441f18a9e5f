// crates/mtd-design/src/sequences.rs

//! The global design sequence and its named views.
//!
//! Domains map to contiguous ranges of a flat nucleotide vector; strands
//! are ordered lists of domain views. Views are plain index ranges, so they
//! stay valid across mutations and only die when the design is rebuilt.
//! Mutation requests are forwarded to the constraint facade and the flat
//! vector is overwritten on success.

use anyhow::{anyhow, bail, Context, Result};
use mtd_constraints::Constraints;
use mtd_core::error::DesignError;
use mtd_core::types::{Base, Sequence};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// User-level description of a domain: a name plus an allowed-base pattern
/// (IUPAC letters, e.g. `"N8"` expanded by the spec layer to `"NNNNNNNN"`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DomainSpec {
    /// Domain name; a trailing `*` denotes the reverse complement of the
    /// base name.
    pub name: String,
    /// One IUPAC letter per nucleotide.
    pub allowed_bases: String,
}

impl DomainSpec {
    /// Construct, expanding run-length shorthand like `"N8"` or `"AC4G"`.
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self> {
        Ok(Self { name: name.into(), allowed_bases: expand_pattern(pattern)? })
    }

    /// Number of nucleotides.
    #[must_use]
    pub fn len(&self) -> usize {
        self.allowed_bases.chars().count()
    }

    /// True iff the domain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allowed_bases.is_empty()
    }
}

/// Expand run-length shorthand: a letter followed by an optional repeat
/// count (`"N8"` → 8 Ns, `"GGN4CC"` → `GGNNNNCC`).
pub fn expand_pattern(pattern: &str) -> Result<String> {
    let mut out = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if !c.is_ascii_alphabetic() {
            bail!("unexpected character {c:?} in domain pattern {pattern:?}");
        }
        let mut digits = String::new();
        while chars.peek().is_some_and(|d| d.is_ascii_digit()) {
            digits.push(chars.next().unwrap_or('0'));
        }
        let reps: usize = if digits.is_empty() { 1 } else { digits.parse()? };
        for _ in 0..reps {
            out.push(c.to_ascii_uppercase());
        }
    }
    Ok(out)
}

/// User-level description of a strand as an ordered list of domain names.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrandSpec {
    /// Strand name.
    pub name: String,
    /// Domain names in 5'→3' order (`*` suffixes allowed).
    pub domain_names: Vec<String>,
}

/// A contiguous `[start, end)` range of the global nucleotide vector.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainView {
    /// First index (inclusive).
    pub start: u32,
    /// One past the last index.
    pub end: u32,
}

impl DomainView {
    /// Construct from a half-open range.
    #[inline]
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start: start as u32, end: end as u32 }
    }

    /// Number of nucleotides spanned.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    /// True iff the view is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// The viewed slice of `s` as an owned sequence.
    #[must_use]
    pub fn to_sequence(&self, s: &Sequence) -> Sequence {
        Sequence(s.0[self.start as usize..self.end as usize].to_vec())
    }

    /// The global indices covered, in order.
    #[must_use]
    pub fn to_indices(&self) -> Vec<usize> {
        (self.start as usize..self.end as usize).collect()
    }
}

/// An ordered list of domain views forming one physical strand.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StrandView {
    /// The constituent domain views, 5'→3'.
    pub domains: Vec<DomainView>,
}

impl StrandView {
    /// Construct from domain views.
    #[must_use]
    pub fn new(domains: Vec<DomainView>) -> Self {
        Self { domains }
    }

    /// Total nucleotide count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.iter().map(DomainView::len).sum()
    }

    /// True iff no nucleotides are covered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenate the viewed slices of `s`.
    #[must_use]
    pub fn to_sequence(&self, s: &Sequence) -> Sequence {
        let mut out = Vec::with_capacity(self.len());
        for d in &self.domains {
            out.extend_from_slice(&s.0[d.start as usize..d.end as usize]);
        }
        Sequence(out)
    }

    /// The global indices covered, in order.
    #[must_use]
    pub fn to_indices(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.len());
        for d in &self.domains {
            out.extend(d.start as usize..d.end as usize);
        }
        out
    }

    /// The sub-view covering strand-local positions `[beg, end]`
    /// (inclusive at both ends, as split points are).
    #[must_use]
    pub fn slice(&self, beg: usize, end: usize) -> Self {
        let mut out = Vec::new();
        let mut offset = 0usize;
        for d in &self.domains {
            let lo = offset;
            let hi = offset + d.len(); // exclusive
            let s = beg.max(lo);
            let e = (end + 1).min(hi);
            if s < e {
                out.push(DomainView::new(d.start as usize + (s - lo), d.start as usize + (e - lo)));
            }
            offset = hi;
        }
        Self { domains: out }
    }
}

/// The flat nucleotide vector, its name→view maps, and the constraint
/// facade that mediates every write.
#[derive(Serialize, Deserialize)]
pub struct DesignSequence {
    /// The global nucleotide vector.
    pub nucleotides: Sequence,
    /// Rebuilt from the specs on load; never serialized.
    #[serde(skip)]
    pub constraints: Constraints,
    /// Strand name → view.
    pub strands: BTreeMap<String, StrandView>,
    /// Domain name → view.
    pub domains: BTreeMap<String, DomainView>,
    /// Input strand specifications.
    pub strand_specs: Vec<StrandSpec>,
    /// Input domain specifications.
    pub domain_specs: Vec<DomainSpec>,
    /// How often each position was chosen for mutation.
    pub times_mutated: Vec<u32>,
    /// Whether derived complementarity constraints admit G·U wobbles.
    pub wobble_mutations: bool,
}

impl Default for DesignSequence {
    fn default() -> Self {
        Self {
            nucleotides: Sequence::default(),
            constraints: Constraints::new(&[]),
            strands: BTreeMap::new(),
            domains: BTreeMap::new(),
            strand_specs: Vec::new(),
            domain_specs: Vec::new(),
            times_mutated: Vec::new(),
            wobble_mutations: false,
        }
    }
}

impl std::fmt::Debug for DesignSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DesignSequence")
            .field("nucleotides", &self.nucleotides)
            .field("domains", &self.domains.keys().collect::<Vec<_>>())
            .field("strands", &self.strands.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl DesignSequence {
    /// Register a domain specification.
    pub fn add_domain(&mut self, spec: DomainSpec) {
        self.domain_specs.push(spec);
    }

    /// Register a strand specification.
    pub fn add_strand(&mut self, spec: StrandSpec) {
        self.strand_specs.push(spec);
    }

    /// Look up a strand view by name.
    pub fn get_strand(&self, name: &str) -> Result<StrandView> {
        self.strands
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!(DesignError::UnknownName { kind: "strand", name: name.into() }))
    }

    /// Look up a domain view by name.
    pub fn get_domain(&self, name: &str) -> Result<DomainView> {
        self.domains
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!(DesignError::UnknownName { kind: "domain", name: name.into() }))
    }

    /// Number of nucleotide variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nucleotides.len()
    }

    /// True iff no domains have been laid out yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nucleotides.is_empty()
    }

    /// Lay out the flat vector from the domain specs, derive views for
    /// every strand, and rebuild the constraint facade. Domains named
    /// `x*` that have no explicit spec are created as reverse complements
    /// of `x`, with complementarity posted between the two.
    pub fn make(&mut self) -> Result<()> {
        // Collect complement-only names referenced by strands.
        let mut wanted: Vec<String> = Vec::new();
        for s in &self.strand_specs {
            for d in &s.domain_names {
                let explicit = self.domain_specs.iter().any(|ds| ds.name == *d);
                if !explicit && !wanted.contains(d) {
                    wanted.push(d.clone());
                }
            }
        }
        let mut derived: Vec<(String, String)> = Vec::new(); // (star name, base name)
        for name in wanted {
            let base = name
                .strip_suffix('*')
                .ok_or_else(|| anyhow!(DesignError::UnknownName { kind: "domain", name: name.clone() }))?;
            if !self.domain_specs.iter().any(|ds| ds.name == base) {
                bail!(DesignError::UnknownName { kind: "domain", name: base.into() });
            }
            derived.push((name.clone(), base.to_string()));
        }

        // Flat layout: explicit domains first, derived complements after.
        self.domains.clear();
        let mut flat = Vec::new();
        for spec in &self.domain_specs {
            let start = flat.len();
            for c in spec.allowed_bases.chars() {
                flat.push(
                    Base::from_letter(c)
                        .ok_or_else(|| anyhow!("invalid base letter {c:?} in domain {}", spec.name))?,
                );
            }
            self.domains.insert(spec.name.clone(), DomainView::new(start, flat.len()));
        }
        let mut complement_links = Vec::new(); // (star view, base view)
        for (star, base) in &derived {
            let bview = self.domains[base];
            let start = flat.len();
            let pattern: Vec<Base> =
                (bview.start..bview.end).rev().map(|i| flat[i as usize].complement()).collect();
            flat.extend(pattern);
            let sview = DomainView::new(start, flat.len());
            self.domains.insert(star.clone(), sview);
            complement_links.push((sview, bview));
        }

        self.nucleotides = Sequence(flat);
        self.times_mutated = vec![0; self.nucleotides.len()];

        // Strand views.
        self.strands.clear();
        for spec in &self.strand_specs {
            let mut views = Vec::with_capacity(spec.domain_names.len());
            for d in &spec.domain_names {
                views.push(*self.domains.get(d).ok_or_else(|| {
                    anyhow!(DesignError::UnknownName { kind: "domain", name: d.clone() })
                })?);
            }
            self.strands.insert(spec.name.clone(), StrandView::new(views));
        }

        // Constraint facade over the domain codes.
        self.constraints = Constraints::new(&self.nucleotides.0);
        for (sview, bview) in complement_links {
            for k in 0..sview.len() {
                let i = sview.start as usize + k;
                let j = bview.end as usize - 1 - k;
                self.constraints.complementarity_constraint(i, j, self.wobble_mutations);
            }
        }
        Ok(())
    }

    /// Solve for an initial sequence satisfying every posted constraint.
    pub fn initialize_sequence(&mut self) -> Result<()> {
        let seq = self
            .constraints
            .initial_sequence()
            .ok_or_else(|| anyhow!(DesignError::ConstraintUnsatisfiable))?;
        self.nucleotides = seq;
        Ok(())
    }

    /// Point-mutate the requested positions (best effort, per position).
    /// Returns false when no position could change.
    pub fn mutate_sequence(&mut self, positions: &[usize]) -> bool {
        for &p in positions {
            if let Some(t) = self.times_mutated.get_mut(p) {
                *t += 1;
            }
        }
        match self.constraints.make_mutation(&self.nucleotides, positions) {
            Some(seq) => {
                self.nucleotides = seq;
                true
            }
            None => false,
        }
    }

    /// Overwrite the flat vector (lengths must agree).
    pub fn set_sequence(&mut self, s: &Sequence) -> Result<()> {
        if s.len() != self.nucleotides.len() {
            bail!("incoming sequence length {} != {}", s.len(), self.nucleotides.len());
        }
        self.nucleotides = s.clone();
        Ok(())
    }

    /// Domain name → current sequence, for reporting.
    #[must_use]
    pub fn domain_sequences(&self) -> BTreeMap<String, Sequence> {
        self.domains
            .iter()
            .map(|(n, v)| (n.clone(), v.to_sequence(&self.nucleotides)))
            .collect()
    }

    /// Strand name → current sequence, for reporting.
    #[must_use]
    pub fn strand_sequences(&self) -> BTreeMap<String, Sequence> {
        self.strands
            .iter()
            .map(|(n, v)| (n.clone(), v.to_sequence(&self.nucleotides)))
            .collect()
    }

    /// Find a named element among strands first, then domains (as a
    /// one-domain strand view).
    pub fn find_element(&self, name: &str) -> Result<StrandView> {
        if let Ok(s) = self.get_strand(name) {
            return Ok(s);
        }
        let d = self
            .domains
            .get(name)
            .copied()
            .with_context(|| format!("no strand or domain named {name:?}"))?;
        Ok(StrandView::new(vec![d]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_domain_sequence() -> DesignSequence {
        let mut ds = DesignSequence::default();
        ds.add_domain(DomainSpec::new("a", "N4").unwrap());
        ds.add_domain(DomainSpec::new("b", "GGNN").unwrap());
        ds.add_strand(StrandSpec { name: "X".into(), domain_names: vec!["a".into(), "b".into()] });
        ds.add_strand(StrandSpec { name: "Y".into(), domain_names: vec!["a*".into()] });
        ds.make().unwrap();
        ds
    }

    #[test]
    fn pattern_expansion() {
        assert_eq!(expand_pattern("N8").unwrap(), "NNNNNNNN");
        assert_eq!(expand_pattern("GGN2CC").unwrap(), "GGNNCC");
        assert!(expand_pattern("N!").is_err());
    }

    #[test]
    fn layout_and_views() {
        let ds = two_domain_sequence();
        assert_eq!(ds.len(), 12); // a(4) + b(4) + a*(4)
        assert_eq!(ds.get_domain("a").unwrap().to_indices(), vec![0, 1, 2, 3]);
        assert_eq!(ds.get_strand("X").unwrap().to_indices(), vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(ds.get_strand("Y").unwrap().to_indices(), vec![8, 9, 10, 11]);
    }

    #[test]
    fn complement_domain_tracks_base() {
        let mut ds = two_domain_sequence();
        ds.initialize_sequence().unwrap();
        let a = ds.get_domain("a").unwrap().to_sequence(&ds.nucleotides);
        let astar = ds.get_domain("a*").unwrap().to_sequence(&ds.nucleotides);
        assert_eq!(astar, a.reverse_complement());
    }

    #[test]
    fn initial_sequence_respects_fixed_bases() {
        let mut ds = two_domain_sequence();
        ds.initialize_sequence().unwrap();
        let b = ds.get_domain("b").unwrap().to_sequence(&ds.nucleotides);
        assert_eq!(&b.to_string()[..2], "GG");
    }

    #[test]
    fn slice_is_inclusive_of_both_ends() {
        let ds = two_domain_sequence();
        let x = ds.get_strand("X").unwrap();
        let s = x.slice(2, 5);
        assert_eq!(s.to_indices(), vec![2, 3, 4, 5]);
    }

    #[test]
    fn mutation_changes_requested_position() {
        mtd_core::rng::install_seed(7);
        let mut ds = two_domain_sequence();
        ds.initialize_sequence().unwrap();
        let before = ds.nucleotides.clone();
        assert!(ds.mutate_sequence(&[2]));
        assert_ne!(ds.nucleotides.0[2], before.0[2]);
        assert_eq!(ds.times_mutated[2], 1);
    }
}
