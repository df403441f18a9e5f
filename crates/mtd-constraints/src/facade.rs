// crates/mtd-constraints/src/facade.rs

//! The engine-facing constraint facade.
//!
//! Holds the posted network and implements the two-solver policy: the
//! propagate-and-branch searcher runs under a wall-clock budget, falling
//! back to the deterministic closest-feasible solver on timeout. The budget
//! adapts as 100× the running average of fallback runtimes. Seeded designs
//! set the budget to zero, which routes every request through the
//! deterministic path.

use crate::legacy::closest_feasible;
use crate::net::{Constraint, Net};
use crate::search::{SearchOutcome, Searcher};
use mtd_core::rng;
use mtd_core::types::{Base, Sequence};
use std::time::{Duration, Instant};

/// Running mean used to adapt the search budget.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunningAverage {
    count: u64,
    average: f64,
}

impl RunningAverage {
    /// Fold in a new value and return the updated mean.
    pub fn add_value(&mut self, val: f64) -> f64 {
        self.average = (val + self.average * self.count as f64) / (self.count + 1) as f64;
        self.count += 1;
        self.average
    }
}

/// Posted constraints plus the mutation/initialization policy.
#[derive(Debug)]
pub struct Constraints {
    net: Net,
    /// Wall-clock budget for the branching searcher, in milliseconds.
    /// Zero disables it entirely (deterministic mode).
    pub msec_cutoff: u64,
    fallback_time: RunningAverage,
}

impl Default for Constraints {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl Constraints {
    /// A facade over fresh nucleotide variables with the given initial
    /// allowed sets.
    #[must_use]
    pub fn new(domains: &[Base]) -> Self {
        Self { net: Net::new(domains), msec_cutoff: 1000, fallback_time: RunningAverage::default() }
    }

    /// Number of nucleotide variables.
    #[must_use]
    pub fn sequence_length(&self) -> usize {
        self.net.n_nucs
    }

    /// Direct access to the posted network (used by the SSM objective to
    /// read off identity/complement relations).
    #[must_use]
    pub fn net(&self) -> &Net {
        &self.net
    }

    /// Variables `i` and `j` must take identical values.
    pub fn match_constraint(&mut self, i: usize, j: usize) {
        self.net.post(Constraint::Match { i, j });
    }

    /// Variables `i` and `j` must base-pair; `wobble` admits G·U.
    pub fn complementarity_constraint(&mut self, i: usize, j: usize, wobble: bool) {
        self.net.post(Constraint::Complement { i, j, wobble });
    }

    /// Forbid `pattern` at every alignment inside `window`.
    pub fn pattern_constraint(&mut self, window: &[usize], pattern: &Sequence) {
        let n = pattern.len();
        if n > window.len() {
            return; // cannot occur
        }
        let masks: Vec<u8> = pattern.0.iter().map(|b| b.mask()).collect();
        for start in 0..=window.len() - n {
            self.net.post(Constraint::Forbid {
                window: window[start..start + n].to_vec(),
                pattern: masks.clone(),
            });
        }
    }

    /// Every length-`word` sub-window of `window` shows at least
    /// `min_types` distinct bases.
    pub fn diversity_constraint(&mut self, window: &[usize], word: usize, min_types: usize) {
        if word > window.len() || min_types <= 1 {
            return;
        }
        for start in 0..=window.len() - word {
            self.net.post(Constraint::Diversity {
                window: window[start..start + word].to_vec(),
                distinct: min_types,
            });
        }
    }

    /// The window must equal one of `words` (degenerate codes allowed).
    pub fn word_constraint(&mut self, window: &[usize], words: &[Sequence]) {
        let masks: Vec<Vec<u8>> =
            words.iter().map(|w| w.0.iter().map(|b| b.mask()).collect()).collect();
        let aux = self.net.add_aux(masks.len());
        self.net.post(Constraint::Word { window: window.to_vec(), words: masks, aux });
    }

    /// The fraction of window positions matching `reference` must lie in
    /// `limits` (inclusive, as fractions of the window length).
    pub fn similarity_constraint(
        &mut self,
        window: &[usize],
        reference: &Sequence,
        limits: (f64, f64),
    ) {
        let n = window.len();
        let lo = (limits.0 * n as f64).ceil() as usize;
        let hi = (limits.1 * n as f64).floor() as usize;
        self.net.post(Constraint::Similarity {
            window: window.to_vec(),
            reference: reference.0.iter().map(|b| b.mask()).collect(),
            lo,
            hi: hi.min(n),
        });
    }

    /// Check a concrete sequence against every posted constraint.
    #[must_use]
    pub fn verify(&self, seq: &Sequence) -> bool {
        if !seq.is_concrete() {
            return false;
        }
        let values: Vec<u8> = seq.0.iter().map(|b| b.index() as u8).collect();
        self.net.verify(&values)
    }

    fn to_sequence(values: &[u8]) -> Sequence {
        values.iter().map(|&v| Base::from_index(v as usize)).collect()
    }

    /// Produce a feasible initial sequence, or `None` when the posted
    /// constraints are unsatisfiable.
    pub fn initial_sequence(&mut self) -> Option<Sequence> {
        if self.msec_cutoff > 0 {
            let deadline = Instant::now() + Duration::from_millis(self.msec_cutoff);
            let mut searcher = Searcher::new(&self.net, Some(deadline));
            let mut local = rng::split_rng();
            match searcher.first_solution(self.net.root_state(), None, &mut local) {
                SearchOutcome::Solution(vals) => return Some(Self::to_sequence(&vals)),
                SearchOutcome::Unsat => return None,
                SearchOutcome::Timeout => {}
            }
        }
        self.fallback_initial()
    }

    /// Deterministic-path initial assignment (no deadline; value order
    /// still follows the installed RNG stream).
    fn fallback_initial(&mut self) -> Option<Sequence> {
        let started = Instant::now();
        let mut searcher = Searcher::new(&self.net, None);
        let mut local = rng::split_rng();
        let out = match searcher.first_solution(self.net.root_state(), None, &mut local) {
            SearchOutcome::Solution(vals) => Some(Self::to_sequence(&vals)),
            _ => None,
        };
        self.update_cutoff(started.elapsed().as_secs_f64() * 1e3);
        out
    }

    /// Mutate `current` at each requested position in turn: the current
    /// value is disallowed and the nearest feasible assignment adopted.
    /// Positions with no feasible neighbor are left unchanged. Returns
    /// `None` iff nothing changed.
    pub fn make_mutation(&mut self, current: &Sequence, positions: &[usize]) -> Option<Sequence> {
        let mut cur: Vec<u8> = current.0.iter().map(|b| b.index() as u8).collect();
        let mut changed = false;

        for &pos in positions {
            let disallow = (pos, cur[pos] as usize);

            if self.msec_cutoff > 0 {
                let deadline = Instant::now() + Duration::from_millis(self.msec_cutoff);
                let mut state = self.net.root_state();
                state.doms[pos].remove(disallow.1);
                let mut searcher = Searcher::new(&self.net, Some(deadline));
                let mut local = rng::split_rng();
                match searcher.first_solution(state, Some(&cur), &mut local) {
                    SearchOutcome::Solution(vals) => {
                        cur = vals;
                        changed = true;
                        continue;
                    }
                    SearchOutcome::Unsat => continue,
                    SearchOutcome::Timeout => {}
                }
            }

            let started = Instant::now();
            let found = closest_feasible(&self.net, &cur, Some(disallow));
            self.update_cutoff(started.elapsed().as_secs_f64() * 1e3);
            if let Some(vals) = found {
                cur = vals;
                changed = true;
            }
        }

        changed.then(|| Self::to_sequence(&cur))
    }

    /// Tie the searcher budget to the observed fallback runtime.
    fn update_cutoff(&mut self, msec: f64) {
        let avg = self.fallback_time.add_value(msec);
        if self.msec_cutoff > 0 {
            self.msec_cutoff = (avg * 100.0).max(1.0) as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facade(n: usize) -> Constraints {
        Constraints::new(&vec![Base::from_letter('N').unwrap(); n])
    }

    #[test]
    fn initial_sequence_respects_constraints() {
        mtd_core::rng::install_seed(3);
        let mut c = facade(10);
        c.complementarity_constraint(0, 9, false);
        c.diversity_constraint(&(0..10).collect::<Vec<_>>(), 5, 2);
        let seq = c.initial_sequence().expect("satisfiable");
        assert!(c.verify(&seq));
    }

    #[test]
    fn conflicting_word_and_pattern_is_unsat() {
        // Forbid GGGG in a 10-nt window, then require one of two words
        // that both start with GGGG.
        mtd_core::rng::install_seed(3);
        let mut c = facade(10);
        let window: Vec<usize> = (0..10).collect();
        c.pattern_constraint(&window, &Sequence::parse("GGGG").unwrap());
        c.word_constraint(
            &window,
            &[
                Sequence::parse("GGGGAAAAAA").unwrap(),
                Sequence::parse("GGGGCCCCCC").unwrap(),
            ],
        );
        assert!(c.initial_sequence().is_none());
    }

    #[test]
    fn mutation_disallows_current_value() {
        mtd_core::rng::install_seed(3);
        let mut c = facade(6);
        let seq = c.initial_sequence().unwrap();
        let got = c.make_mutation(&seq, &[2]).expect("free position must move");
        assert_ne!(got.0[2], seq.0[2]);
        assert!(c.verify(&got));
    }

    #[test]
    fn deterministic_mode_is_reproducible() {
        let run = || {
            mtd_core::rng::install_seed(11);
            let mut c = facade(12);
            c.msec_cutoff = 0;
            c.complementarity_constraint(0, 11, true);
            let seq = c.initial_sequence().unwrap();
            c.make_mutation(&seq, &[0, 5]).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn pinned_position_reports_no_neighbor() {
        mtd_core::rng::install_seed(3);
        let mut c = Constraints::new(&[
            Base::from_letter('A').unwrap(),
            Base::from_letter('N').unwrap(),
        ]);
        let seq = c.initial_sequence().unwrap();
        // Position 0 admits only A; mutating just it cannot succeed.
        assert!(c.make_mutation(&seq, &[0]).is_none());
    }
}
