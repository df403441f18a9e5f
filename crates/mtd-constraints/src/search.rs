// crates/mtd-constraints/src/search.rs

//! Backtracking propagate-and-branch search.
//!
//! Variable ordering is accumulated-failure-count (AFC) with random
//! tie-breaking, or plain index order when a reference sequence is
//! installed (the cheap reference brancher used for mutations). Value
//! ordering prefers the reference value where one exists, otherwise a
//! random permutation. The search honors an optional wall-clock deadline.

use crate::net::{Net, State};
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use std::time::Instant;

/// AFC decay applied on every recorded failure.
const AFC_DECAY: f64 = 0.99;

/// Result of a bounded search.
#[derive(Clone, Debug)]
pub enum SearchOutcome {
    /// A satisfying concrete assignment of the nucleotide variables.
    Solution(Vec<u8>),
    /// The search space is exhausted; no solution exists.
    Unsat,
    /// The deadline expired before the search finished.
    Timeout,
}

/// One propagate-and-branch search over a [`Net`].
pub struct Searcher<'a> {
    net: &'a Net,
    deadline: Option<Instant>,
    /// Per-variable accumulated failure counts (decayed).
    afc: Vec<f64>,
}

impl<'a> Searcher<'a> {
    /// A searcher with an optional wall-clock deadline.
    #[must_use]
    pub fn new(net: &'a Net, deadline: Option<Instant>) -> Self {
        Self { net, deadline, afc: vec![0.0; net.initial.len()] }
    }

    /// Find the first satisfying assignment. `reference` biases value
    /// ordering toward the given nucleotide values and switches variable
    /// selection to index order.
    pub fn first_solution(
        &mut self,
        mut state: State,
        reference: Option<&[u8]>,
        rng: &mut StdRng,
    ) -> SearchOutcome {
        if self.net.propagate(&mut state).is_err() {
            return SearchOutcome::Unsat;
        }
        self.dfs(&state, reference, rng)
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn record_failure(&mut self, constraint: usize) {
        for a in &mut self.afc {
            *a *= AFC_DECAY;
        }
        for v in self.net.constraints[constraint].vars() {
            self.afc[v] += 1.0;
        }
    }

    /// Choose the next variable to branch on, or `None` when all are
    /// singletons.
    fn select_var(&self, state: &State, indexed: bool, rng: &mut StdRng) -> Option<usize> {
        let open: Vec<usize> = state
            .doms
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.is_singleton())
            .map(|(i, _)| i)
            .collect();
        if open.is_empty() {
            return None;
        }
        if indexed {
            return open.first().copied();
        }
        let best = open
            .iter()
            .map(|&i| self.afc[i])
            .fold(f64::NEG_INFINITY, f64::max);
        let candidates: Vec<usize> =
            open.into_iter().filter(|&i| self.afc[i] >= best).collect();
        candidates.choose(rng).copied()
    }

    fn dfs(
        &mut self,
        state: &State,
        reference: Option<&[u8]>,
        rng: &mut StdRng,
    ) -> SearchOutcome {
        if self.expired() {
            return SearchOutcome::Timeout;
        }
        let Some(var) = self.select_var(state, reference.is_some(), rng) else {
            return SearchOutcome::Solution(state.nucleotides(self.net.n_nucs));
        };

        let mut values = state.doms[var].values();
        values.shuffle(rng);
        if let Some(r) = reference {
            if let Some(&want) = r.get(var) {
                if let Some(pos) = values.iter().position(|&v| v == want as usize) {
                    values.swap(0, pos);
                }
            }
        }

        for val in values {
            let mut child = state.clone();
            child.doms[var].assign(val);
            match self.net.propagate(&mut child) {
                Ok(()) => match self.dfs(&child, reference, rng) {
                    SearchOutcome::Unsat => {}
                    done => return done,
                },
                Err(conflict) => self.record_failure(conflict.constraint),
            }
            if self.expired() {
                return SearchOutcome::Timeout;
            }
        }
        SearchOutcome::Unsat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Constraint;
    use mtd_core::types::Base;
    use rand::SeedableRng;

    fn n_domains(n: usize) -> Vec<Base> {
        vec![Base::from_letter('N').unwrap(); n]
    }

    #[test]
    fn finds_complementary_assignment() {
        let mut net = Net::new(&n_domains(6));
        for i in 0..3 {
            net.post(Constraint::Complement { i, j: 5 - i, wobble: false });
        }
        let mut rng = StdRng::seed_from_u64(1);
        let mut searcher = Searcher::new(&net, None);
        match searcher.first_solution(net.root_state(), None, &mut rng) {
            SearchOutcome::Solution(vals) => assert!(net.verify(&vals)),
            other => panic!("expected a solution, got {other:?}"),
        }
    }

    #[test]
    fn reports_unsat_on_contradiction() {
        let mut net = Net::new(&n_domains(2));
        let a = Base::from_letter('A').unwrap().mask();
        net.initial[0] = crate::net::Dom::Nuc(a);
        net.initial[1] = crate::net::Dom::Nuc(a);
        net.post(Constraint::Complement { i: 0, j: 1, wobble: false });
        let mut rng = StdRng::seed_from_u64(1);
        let mut searcher = Searcher::new(&net, None);
        assert!(matches!(
            searcher.first_solution(net.root_state(), None, &mut rng),
            SearchOutcome::Unsat
        ));
    }

    #[test]
    fn reference_bias_returns_nearby_solution() {
        let mut net = Net::new(&n_domains(8));
        net.post(Constraint::Diversity { window: (0..8).collect(), distinct: 2 });
        let reference = [0u8, 1, 2, 3, 0, 1, 2, 3];
        let mut rng = StdRng::seed_from_u64(9);
        let mut searcher = Searcher::new(&net, None);
        match searcher.first_solution(net.root_state(), Some(&reference), &mut rng) {
            SearchOutcome::Solution(vals) => assert_eq!(vals, reference),
            other => panic!("expected a solution, got {other:?}"),
        }
    }
}
