// crates/mtd-constraints/src/net.rs

//! The constraint network shared by both solvers.
//!
//! Variables are either nucleotide variables (a 4-bit allowed mask) or
//! auxiliary word-selector variables (a bitset over an enumerated word
//! list). Propagators filter domains to a fixpoint; both search strategies
//! drive the same network with different orderings.

use mtd_core::types::Base;

/// A variable domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dom {
    /// Allowed canonical bases, one bit each (A, C, G, U/T).
    Nuc(u8),
    /// Allowed word indices for a word-selector variable.
    Aux(Vec<u64>),
}

impl Dom {
    /// An auxiliary domain allowing all of `0..n`.
    #[must_use]
    pub fn aux_full(n: usize) -> Self {
        let blocks = n.div_ceil(64);
        let mut bits = vec![u64::MAX; blocks];
        let tail = n % 64;
        if tail != 0 {
            if let Some(last) = bits.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        }
        Self::Aux(bits)
    }

    /// Number of allowed values.
    #[must_use]
    pub fn count(&self) -> u32 {
        match self {
            Self::Nuc(m) => m.count_ones(),
            Self::Aux(bits) => bits.iter().map(|b| b.count_ones()).sum(),
        }
    }

    /// True iff no value remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// True iff exactly one value remains.
    #[must_use]
    pub fn is_singleton(&self) -> bool {
        self.count() == 1
    }

    /// Whether value `v` is allowed.
    #[must_use]
    pub fn contains(&self, v: usize) -> bool {
        match self {
            Self::Nuc(m) => v < 4 && m & (1 << v) != 0,
            Self::Aux(bits) => {
                bits.get(v / 64).is_some_and(|b| b & (1u64 << (v % 64)) != 0)
            }
        }
    }

    /// Remove value `v`; returns whether the domain changed.
    pub fn remove(&mut self, v: usize) -> bool {
        match self {
            Self::Nuc(m) => {
                let before = *m;
                *m &= !(1u8 << v);
                before != *m
            }
            Self::Aux(bits) => {
                if let Some(b) = bits.get_mut(v / 64) {
                    let before = *b;
                    *b &= !(1u64 << (v % 64));
                    before != *b
                } else {
                    false
                }
            }
        }
    }

    /// Assign value `v` (collapse the domain to it).
    pub fn assign(&mut self, v: usize) {
        match self {
            Self::Nuc(m) => *m = 1 << v,
            Self::Aux(bits) => {
                bits.iter_mut().for_each(|b| *b = 0);
                if let Some(b) = bits.get_mut(v / 64) {
                    *b = 1u64 << (v % 64);
                }
            }
        }
    }

    /// Allowed values in ascending order.
    #[must_use]
    pub fn values(&self) -> Vec<usize> {
        match self {
            Self::Nuc(m) => (0..4).filter(|&i| m & (1 << i) != 0).collect(),
            Self::Aux(bits) => {
                let mut out = Vec::new();
                for (blk, &b) in bits.iter().enumerate() {
                    let mut rest = b;
                    while rest != 0 {
                        let bit = rest.trailing_zeros() as usize;
                        out.push(blk * 64 + bit);
                        rest &= rest - 1;
                    }
                }
                out
            }
        }
    }

    /// The nucleotide mask of this domain (0 for aux variables).
    #[must_use]
    pub fn nuc_mask(&self) -> u8 {
        match self {
            Self::Nuc(m) => *m,
            Self::Aux(_) => 0,
        }
    }

    /// Intersect a nucleotide domain with `mask`; returns whether it shrank.
    pub fn retain_mask(&mut self, mask: u8) -> bool {
        match self {
            Self::Nuc(m) => {
                let before = *m;
                *m &= mask;
                before != *m
            }
            Self::Aux(_) => false,
        }
    }
}

/// The mutable solver state: one domain per variable.
#[derive(Clone, Debug)]
pub struct State {
    /// Variable domains, nucleotide variables first, aux variables after.
    pub doms: Vec<Dom>,
}

impl State {
    /// Extract the assigned nucleotide values (first `n` variables). Only
    /// meaningful once every nucleotide variable is a singleton.
    #[must_use]
    pub fn nucleotides(&self, n: usize) -> Vec<u8> {
        self.doms[..n]
            .iter()
            .map(|d| d.values().first().copied().unwrap_or(0) as u8)
            .collect()
    }
}

/// Watson-Crick partner mask of an allowed set.
#[inline]
fn comp_mask(mask: u8) -> u8 {
    Base(mask).complement().mask()
}

/// Partner mask when G·U wobbles are allowed.
#[inline]
fn wobble_mask(mask: u8) -> u8 {
    Base(mask).wobble_complement().mask()
}

/// A single posted propagator.
///
/// Windowed constraint kinds (pattern, diversity) are expanded to one
/// propagator per aligned sub-window when posted, so each instance is
/// fixed-width.
#[derive(Clone, Debug)]
pub enum Constraint {
    /// Variables `i` and `j` take identical values.
    Match {
        /// First variable.
        i: usize,
        /// Second variable.
        j: usize,
    },
    /// Variables `i` and `j` base-pair (Watson-Crick, optionally wobble).
    Complement {
        /// First variable.
        i: usize,
        /// Second variable.
        j: usize,
        /// Allow G·U in addition to Watson-Crick.
        wobble: bool,
    },
    /// The window must not equal the (degenerate) pattern.
    Forbid {
        /// Variables of one aligned sub-window; same length as `pattern`.
        window: Vec<usize>,
        /// Per-position allowed masks of the forbidden pattern.
        pattern: Vec<u8>,
    },
    /// At least `distinct` base identities appear in the window.
    Diversity {
        /// Variables of one aligned sub-window.
        window: Vec<usize>,
        /// Minimum number of distinct bases.
        distinct: usize,
    },
    /// The window equals one of the enumerated words; `aux` selects which.
    Word {
        /// Window variables; every word has the same length.
        window: Vec<usize>,
        /// Per-word, per-position allowed masks.
        words: Vec<Vec<u8>>,
        /// Index of the auxiliary selector variable.
        aux: usize,
    },
    /// Between `lo` and `hi` window positions match the reference masks.
    Similarity {
        /// Window variables.
        window: Vec<usize>,
        /// Per-position reference masks.
        reference: Vec<u8>,
        /// Minimum match count (inclusive).
        lo: usize,
        /// Maximum match count (inclusive).
        hi: usize,
    },
}

/// Domain wipe-out or logical failure during propagation.
#[derive(Clone, Copy, Debug)]
pub struct Conflict {
    /// Index of the constraint that failed.
    pub constraint: usize,
}

impl Constraint {
    /// Variables this constraint watches.
    #[must_use]
    pub fn vars(&self) -> Vec<usize> {
        match self {
            Self::Match { i, j } | Self::Complement { i, j, .. } => vec![*i, *j],
            Self::Forbid { window, .. }
            | Self::Diversity { window, .. }
            | Self::Similarity { window, .. } => window.clone(),
            Self::Word { window, aux, .. } => {
                let mut v = window.clone();
                v.push(*aux);
                v
            }
        }
    }

    /// Filter domains once; `Ok(true)` iff anything shrank.
    fn filter(&self, state: &mut State) -> Result<bool, ()> {
        match self {
            Self::Match { i, j } => {
                let m = state.doms[*i].nuc_mask() & state.doms[*j].nuc_mask();
                if m == 0 {
                    return Err(());
                }
                let a = state.doms[*i].retain_mask(m);
                let b = state.doms[*j].retain_mask(m);
                Ok(a || b)
            }
            Self::Complement { i, j, wobble } => {
                let partner = if *wobble { wobble_mask } else { comp_mask };
                let mi = state.doms[*i].nuc_mask() & partner(state.doms[*j].nuc_mask());
                let mj = state.doms[*j].nuc_mask() & partner(mi);
                if mi == 0 || mj == 0 {
                    return Err(());
                }
                let a = state.doms[*i].retain_mask(mi);
                let b = state.doms[*j].retain_mask(mj);
                Ok(a || b)
            }
            Self::Forbid { window, pattern } => {
                // Three classes per position: must match, can't match,
                // undecided. Any can't ⇒ satisfied; all must ⇒ failure;
                // exactly one undecided among musts ⇒ prune it.
                let mut undecided = Vec::new();
                for (k, (&v, &p)) in window.iter().zip(pattern).enumerate() {
                    let dom = state.doms[v].nuc_mask();
                    let inside = dom & p;
                    if inside == 0 {
                        return Ok(false); // cannot match; satisfied
                    }
                    if inside != dom {
                        undecided.push(k);
                    }
                }
                if undecided.is_empty() {
                    return Err(());
                }
                if undecided.len() == 1 {
                    let k = undecided[0];
                    let v = window[k];
                    let changed = state.doms[v].retain_mask(!pattern[k]);
                    if state.doms[v].is_empty() {
                        return Err(());
                    }
                    return Ok(changed);
                }
                Ok(false)
            }
            Self::Diversity { window, distinct } => {
                let mut union = 0u8;
                let mut assigned = 0u8;
                let mut unassigned = 0usize;
                for &v in window {
                    let m = state.doms[v].nuc_mask();
                    union |= m;
                    if m.count_ones() == 1 {
                        assigned |= m;
                    } else {
                        unassigned += 1;
                    }
                }
                if (union.count_ones() as usize) < *distinct {
                    return Err(());
                }
                if assigned.count_ones() as usize + unassigned < *distinct {
                    return Err(());
                }
                Ok(false)
            }
            Self::Word { window, words, aux } => {
                let mut changed = false;

                // Selector decided: clamp the window to that word.
                if state.doms[*aux].is_singleton() {
                    let w = state.doms[*aux].values()[0];
                    for (&v, &m) in window.iter().zip(&words[w]) {
                        changed |= state.doms[v].retain_mask(m);
                        if state.doms[v].is_empty() {
                            return Err(());
                        }
                    }
                    return Ok(changed);
                }

                // Classify the still-allowed words.
                let mut cant = Vec::new();
                let mut must = 0usize;
                let mut could = Vec::new();
                for w in state.doms[*aux].values() {
                    let mut dead = false;
                    let mut forced = true;
                    for (&v, &m) in window.iter().zip(&words[w]) {
                        let dom = state.doms[v].nuc_mask();
                        if dom & m == 0 {
                            dead = true;
                            break;
                        }
                        if dom & !m != 0 {
                            forced = false;
                        }
                    }
                    if dead {
                        cant.push(w);
                    } else if forced {
                        must += 1;
                    } else {
                        could.push(w);
                    }
                }

                if must == 0 && could.is_empty() {
                    return Err(());
                }
                for w in cant {
                    changed |= state.doms[*aux].remove(w);
                }
                if must == 0 && could.len() == 1 {
                    let w = could[0];
                    state.doms[*aux].assign(w);
                    for (&v, &m) in window.iter().zip(&words[w]) {
                        changed |= state.doms[v].retain_mask(m);
                        if state.doms[v].is_empty() {
                            return Err(());
                        }
                    }
                    return Ok(true);
                }

                // Shave window domains to values appearing in some live word.
                let live = state.doms[*aux].values();
                for (k, &v) in window.iter().enumerate() {
                    let mut union = 0u8;
                    for &w in &live {
                        union |= words[w][k];
                    }
                    changed |= state.doms[v].retain_mask(union);
                    if state.doms[v].is_empty() {
                        return Err(());
                    }
                }
                Ok(changed)
            }
            Self::Similarity { window, reference, lo, hi } => {
                let mut matches = 0usize;
                let mut open = Vec::new();
                for (k, (&v, &m)) in window.iter().zip(reference).enumerate() {
                    let dom = state.doms[v].nuc_mask();
                    if dom & m == dom {
                        matches += 1; // every remaining value matches
                    } else if dom & m != 0 {
                        open.push(k);
                    }
                }
                if matches > *hi || matches + open.len() < *lo {
                    return Err(());
                }
                let mut changed = false;
                if matches == *hi {
                    // No more matches allowed: strip reference values.
                    for &k in &open {
                        let v = window[k];
                        changed |= state.doms[v].retain_mask(!reference[k]);
                        if state.doms[v].is_empty() {
                            return Err(());
                        }
                    }
                } else if matches + open.len() == *lo {
                    // Every undecided position must match.
                    for &k in &open {
                        let v = window[k];
                        changed |= state.doms[v].retain_mask(reference[k]);
                        if state.doms[v].is_empty() {
                            return Err(());
                        }
                    }
                }
                Ok(changed)
            }
        }
    }

    /// Check against a full concrete assignment of the nucleotide variables.
    #[must_use]
    pub fn satisfied(&self, values: &[u8]) -> bool {
        let bit = |v: usize| 1u8 << values[v];
        match self {
            Self::Match { i, j } => values[*i] == values[*j],
            Self::Complement { i, j, wobble } => {
                let partner = if *wobble { wobble_mask } else { comp_mask };
                partner(bit(*i)) & bit(*j) != 0
            }
            Self::Forbid { window, pattern } => !window
                .iter()
                .zip(pattern)
                .all(|(&v, &p)| p & bit(v) != 0),
            Self::Diversity { window, distinct } => {
                let mut seen = 0u8;
                for &v in window {
                    seen |= bit(v);
                }
                seen.count_ones() as usize >= *distinct
            }
            Self::Word { window, words, .. } => words.iter().any(|word| {
                window.iter().zip(word).all(|(&v, &m)| m & bit(v) != 0)
            }),
            Self::Similarity { window, reference, lo, hi } => {
                let matches = window
                    .iter()
                    .zip(reference)
                    .filter(|&(&v, &m)| m & bit(v) != 0)
                    .count();
                (*lo..=*hi).contains(&matches)
            }
        }
    }
}

/// A posted network: initial domains plus the propagator list.
#[derive(Clone, Debug, Default)]
pub struct Net {
    /// Number of nucleotide variables (aux variables follow them).
    pub n_nucs: usize,
    /// Initial domains for every variable.
    pub initial: Vec<Dom>,
    /// Posted propagators.
    pub constraints: Vec<Constraint>,
}

impl Net {
    /// A network over `domains` initial nucleotide masks.
    #[must_use]
    pub fn new(domains: &[Base]) -> Self {
        Self {
            n_nucs: domains.len(),
            initial: domains.iter().map(|b| Dom::Nuc(b.mask())).collect(),
            constraints: Vec::new(),
        }
    }

    /// Add an auxiliary selector variable over `n` values; returns its index.
    pub fn add_aux(&mut self, n: usize) -> usize {
        self.initial.push(Dom::aux_full(n));
        self.initial.len() - 1
    }

    /// Post a propagator.
    pub fn post(&mut self, c: Constraint) {
        self.constraints.push(c);
    }

    /// A fresh state from the initial domains.
    #[must_use]
    pub fn root_state(&self) -> State {
        State { doms: self.initial.clone() }
    }

    /// Run all propagators to a fixpoint.
    pub fn propagate(&self, state: &mut State) -> Result<(), Conflict> {
        loop {
            let mut changed = false;
            for (ci, c) in self.constraints.iter().enumerate() {
                match c.filter(state) {
                    Ok(delta) => changed |= delta,
                    Err(()) => return Err(Conflict { constraint: ci }),
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }

    /// Check a full concrete nucleotide assignment against every
    /// constraint and the initial domains.
    #[must_use]
    pub fn verify(&self, values: &[u8]) -> bool {
        if values.len() != self.n_nucs {
            return false;
        }
        let in_domain = values
            .iter()
            .enumerate()
            .all(|(i, &v)| self.initial[i].contains(v as usize));
        in_domain && self.constraints.iter().all(|c| c.satisfied(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nuc_net(n: usize) -> Net {
        Net::new(&vec![Base::from_letter('N').unwrap(); n])
    }

    #[test]
    fn complement_prunes_both_sides() {
        let mut net = nuc_net(2);
        net.initial[0] = Dom::Nuc(Base::from_letter('A').unwrap().mask());
        net.post(Constraint::Complement { i: 0, j: 1, wobble: false });
        let mut st = net.root_state();
        net.propagate(&mut st).unwrap();
        assert_eq!(st.doms[1].nuc_mask(), Base::from_letter('T').unwrap().mask());
    }

    #[test]
    fn wobble_complement_keeps_gu() {
        let mut net = nuc_net(2);
        net.initial[0] = Dom::Nuc(Base::from_letter('G').unwrap().mask());
        net.post(Constraint::Complement { i: 0, j: 1, wobble: true });
        let mut st = net.root_state();
        net.propagate(&mut st).unwrap();
        assert_eq!(st.doms[1].nuc_mask(), Base::from_letter('Y').unwrap().mask());
    }

    #[test]
    fn forbidden_pattern_fails_when_forced() {
        let mut net = nuc_net(4);
        let g = Base::from_letter('G').unwrap().mask();
        for d in &mut net.initial {
            *d = Dom::Nuc(g);
        }
        net.post(Constraint::Forbid { window: vec![0, 1, 2, 3], pattern: vec![g; 4] });
        let mut st = net.root_state();
        assert!(net.propagate(&mut st).is_err());
    }

    #[test]
    fn forbidden_pattern_prunes_last_open_position() {
        let mut net = nuc_net(3);
        let g = Base::from_letter('G').unwrap().mask();
        net.initial[0] = Dom::Nuc(g);
        net.initial[1] = Dom::Nuc(g);
        net.post(Constraint::Forbid { window: vec![0, 1, 2], pattern: vec![g; 3] });
        let mut st = net.root_state();
        net.propagate(&mut st).unwrap();
        assert_eq!(st.doms[2].nuc_mask() & g, 0);
    }

    #[test]
    fn word_selector_collapses_window() {
        let mut net = nuc_net(2);
        let a = Base::from_letter('A').unwrap().mask();
        let c = Base::from_letter('C').unwrap().mask();
        let g = Base::from_letter('G').unwrap().mask();
        let aux = net.add_aux(2);
        net.post(Constraint::Word {
            window: vec![0, 1],
            words: vec![vec![a, c], vec![a, g]],
            aux,
        });
        // Disallow G at position 1: only word 0 remains.
        net.initial[1] = Dom::Nuc(a | c);
        let mut st = net.root_state();
        net.propagate(&mut st).unwrap();
        assert_eq!(st.doms[0].nuc_mask(), a);
        assert_eq!(st.doms[1].nuc_mask(), c);
        assert!(st.doms[aux].is_singleton());
    }

    #[test]
    fn similarity_forces_matches_at_lower_bound() {
        let mut net = nuc_net(2);
        let a = Base::from_letter('A').unwrap().mask();
        net.post(Constraint::Similarity {
            window: vec![0, 1],
            reference: vec![a, a],
            lo: 2,
            hi: 2,
        });
        let mut st = net.root_state();
        net.propagate(&mut st).unwrap();
        assert_eq!(st.doms[0].nuc_mask(), a);
        assert_eq!(st.doms[1].nuc_mask(), a);
    }

    proptest::proptest! {
        #[test]
        fn propagation_only_shrinks_domains(
            masks in proptest::collection::vec(1u8..16, 6),
            pairs in proptest::collection::vec((0usize..6, 0usize..6), 0..4),
        ) {
            let mut net = Net::new(
                &masks.iter().map(|&m| Base(m)).collect::<Vec<_>>(),
            );
            for (i, j) in pairs {
                if i != j {
                    net.post(Constraint::Complement { i, j, wobble: i % 2 == 0 });
                }
            }
            let mut st = net.root_state();
            if net.propagate(&mut st).is_ok() {
                for (dom, init) in st.doms.iter().zip(&net.initial) {
                    proptest::prop_assert_eq!(
                        dom.nuc_mask() & !init.nuc_mask(),
                        0,
                        "propagation may only remove values"
                    );
                    proptest::prop_assert!(!dom.is_empty());
                }
            }
        }
    }

    #[test]
    fn verify_checks_all_kinds() {
        let mut net = nuc_net(4);
        net.post(Constraint::Match { i: 0, j: 1 });
        net.post(Constraint::Diversity { window: vec![0, 1, 2, 3], distinct: 2 });
        // A A C G: match holds, diversity holds.
        assert!(net.verify(&[0, 0, 1, 2]));
        // A C C G: match broken.
        assert!(!net.verify(&[0, 1, 1, 2]));
    }
}
