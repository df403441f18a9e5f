// crates/mtd-constraints/src/legacy.rs

//! Deterministic closest-feasible fallback solver.
//!
//! A branch-and-bound search minimizing Hamming distance to a reference
//! assignment. Variables are branched in index order; the reference value
//! (distance 0) is tried before the alternatives (distance 1 each), and
//! partial branches are pruned once their distance reaches the incumbent.
//! A node budget bounds pathological instances; the best complete
//! assignment found within the budget is returned.
//!
//! Because there is no randomness and no clock in here, this path is what
//! seeded (reproducible) designs use exclusively.

use crate::net::{Net, State};

/// Exploration bound; pathological posts give up past this many nodes.
const NODE_BUDGET: usize = 100_000;

/// Closest-feasible search state.
struct Bound<'a> {
    net: &'a Net,
    reference: &'a [u8],
    nodes: usize,
    best_cost: usize,
    best: Option<Vec<u8>>,
}

impl Bound<'_> {
    fn dfs(&mut self, state: &State, var: usize, cost: usize) {
        if cost >= self.best_cost || self.nodes >= NODE_BUDGET {
            return;
        }
        self.nodes += 1;

        // Skip singletons; account for forced mismatches against the reference.
        let mut var = var;
        let mut cost = cost;
        while var < state.doms.len() && state.doms[var].is_singleton() {
            if var < self.net.n_nucs
                && state.doms[var].values()[0] != self.reference[var] as usize
            {
                cost += 1;
                if cost >= self.best_cost {
                    return;
                }
            }
            var += 1;
        }
        if var == state.doms.len() {
            self.best_cost = cost;
            self.best = Some(state.nucleotides(self.net.n_nucs));
            return;
        }

        let mut values = state.doms[var].values();
        if var < self.net.n_nucs {
            let want = self.reference[var] as usize;
            if let Some(pos) = values.iter().position(|&v| v == want) {
                values.swap(0, pos);
            }
        }

        for val in values {
            let step = usize::from(var < self.net.n_nucs && val != self.reference[var] as usize);
            if cost + step >= self.best_cost {
                continue;
            }
            let mut child = state.clone();
            child.doms[var].assign(val);
            if self.net.propagate(&mut child).is_ok() {
                self.dfs(&child, var + 1, cost + step);
            }
        }
    }
}

/// Find the feasible assignment closest (Hamming) to `reference`, with the
/// domain of `disallow.0` stripped of value `disallow.1` first. Returns
/// `None` when no feasible assignment exists (or the node budget ran dry
/// with no incumbent).
#[must_use]
pub fn closest_feasible(
    net: &Net,
    reference: &[u8],
    disallow: Option<(usize, usize)>,
) -> Option<Vec<u8>> {
    let mut state = net.root_state();
    if let Some((pos, val)) = disallow {
        state.doms[pos].remove(val);
    }
    if net.propagate(&mut state).is_err() {
        return None;
    }
    let mut search = Bound {
        net,
        reference,
        nodes: 0,
        best_cost: usize::MAX,
        best: None,
    };
    search.dfs(&state, 0, 0);
    search.best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Constraint;
    use mtd_core::types::Base;

    fn n_net(n: usize) -> Net {
        Net::new(&vec![Base::from_letter('N').unwrap(); n])
    }

    #[test]
    fn minimal_change_for_complement_pair() {
        let mut net = n_net(4);
        net.post(Constraint::Complement { i: 0, j: 3, wobble: false });
        // Reference ACGT satisfies the constraint; disallow A at 0.
        let reference = [0u8, 1, 2, 3];
        let got = closest_feasible(&net, &reference, Some((0, 0))).unwrap();
        assert!(net.verify(&got));
        assert_ne!(got[0], 0);
        // Inner positions are unconstrained and must not move.
        assert_eq!(got[1], 1);
        assert_eq!(got[2], 2);
        // Exactly the pair should have moved: distance 2.
        let dist = got.iter().zip(&reference).filter(|&(a, b)| a != b).count();
        assert_eq!(dist, 2);
    }

    #[test]
    fn infeasible_disallow_returns_none() {
        let mut net = n_net(1);
        net.initial[0] = crate::net::Dom::Nuc(Base::from_letter('A').unwrap().mask());
        assert!(closest_feasible(&net, &[0], Some((0, 0))).is_none());
    }

    #[test]
    fn determinism_across_calls() {
        let mut net = n_net(6);
        net.post(Constraint::Diversity { window: (0..6).collect(), distinct: 3 });
        let reference = [0u8; 6];
        let a = closest_feasible(&net, &reference, Some((0, 0)));
        let b = closest_feasible(&net, &reference, Some((0, 0)));
        assert_eq!(a, b);
        assert!(a.is_some());
    }
}
