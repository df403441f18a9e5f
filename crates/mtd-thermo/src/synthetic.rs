// crates/mtd-thermo/src/synthetic.rs

//! Synthetic pairing kernel for hermetic tests.
//!
//! A deliberately small inside/outside model: every structure is a
//! non-crossing set of base pairs over the flattened complex, weighted by
//! the product of per-pair stack energies. Hairpin loops need at least
//! three unpaired bases unless a nick lies inside; structures are not
//! required to be connected. A pair between adjacent positions (possible
//! only across a nick, from decomposition splits) carries no pairing
//! weight of its own, which keeps split/merge arithmetic consistent with
//! direct evaluation.
//!
//! Enforced pairs are admitted unconditionally and weighted by the clamp
//! bonus `exp(-dG_clamp / RT)`; the bonus is subtracted back out of the
//! returned `log Q`, leaving the conditional ensemble value.
//!
//! Production deployments plug in a real nearest-neighbor kernel; this one
//! exists so the engine's invariants can be exercised end-to-end without
//! parameter files.

use crate::kernel::{KernelRequest, Overflowed, ThermoKernel, ThermoRecord};
use crate::model::ThermoModel;
use crate::overflow::{ExpFloat, PfScalar, Tier};
use mtd_core::sparse::SparseAccum;
use mtd_core::types::{can_pair, Base, BASE_A, BASE_C, BASE_G, BASE_T};

/// Stack free energy (kcal/mol) of a concrete pair, by canonical masks.
fn pair_energy(a: Base, b: Base) -> f64 {
    match (a.mask() | b.mask(), a.mask() & b.mask()) {
        (m, 0) if m == BASE_C | BASE_G => -3.0,
        (m, 0) if m == BASE_A | BASE_T => -2.0,
        (m, 0) if m == BASE_G | BASE_T => -1.0,
        _ => f64::INFINITY, // not pairable
    }
}

/// Minimum unpaired span inside a hairpin (waived across nicks).
const MIN_HAIRPIN: usize = 3;

/// The hermetic reference kernel.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyntheticKernel;

struct Problem {
    bases: Vec<Base>,
    /// Pair weight in log space, or −∞ if disallowed. Includes clamp
    /// bonuses on enforced pairs.
    ln_weight: Vec<Vec<f64>>,
    n: usize,
}

impl Problem {
    fn build(model: &ThermoModel, request: &KernelRequest<'_>) -> Self {
        let (flat, nicks) = request.seq.flatten();
        let n = flat.len();
        let mut nick_after = vec![false; n + 1];
        for &k in &nicks {
            if k < n {
                nick_after[k] = true;
            }
        }
        let rt = model.rt();
        let bonus = -request.dg_clamp / rt;

        let mut ln_weight = vec![vec![f64::NEG_INFINITY; n]; n];
        let has_nick = |i: usize, j: usize| (i + 1..=j).any(|k| nick_after[k]);
        for i in 0..n {
            for j in i + 1..n {
                if can_pair(flat[i], flat[j]) && (j - i > MIN_HAIRPIN || has_nick(i, j)) {
                    // Adjacent pairs (possible only across a nick) carry no
                    // stack weight: their loop lives on the far side of the
                    // split that produced them.
                    ln_weight[i][j] = if j == i + 1 {
                        0.0
                    } else {
                        -pair_energy(flat[i], flat[j]) / rt
                    };
                }
            }
        }
        for &(i, j) in request.enforced {
            let (i, j) = if i < j { (i, j) } else { (j, i) };
            let stack =
                if j == i + 1 || !ln_weight[i][j].is_finite() { 0.0 } else { ln_weight[i][j] };
            ln_weight[i][j] = stack + bonus;
        }
        Self { bases: flat.0, ln_weight, n }
    }
}

/// Inside table: `q[i][j+1]` holds Q over `[i, j]`; empty intervals are 1.
fn inside<S: PfScalar>(p: &Problem) -> Option<Vec<Vec<S>>> {
    let n = p.n;
    let mut q = vec![vec![S::one(); n + 1]; n + 1];
    for span in 1..=n {
        for i in 0..=n - span {
            let j = i + span - 1;
            // j unpaired.
            let mut total = q[i][j];
            // j paired to k in [i, j).
            for k in i..j {
                let lw = p.ln_weight[k][j];
                if lw == f64::NEG_INFINITY {
                    continue;
                }
                let left = if k == i { S::one() } else { q[i][k] };
                let interior = q[k + 1][j];
                total = total.add(left.mul(interior).mul(S::from_ln(lw)));
            }
            if !total.finite() {
                return None;
            }
            q[i][j + 1] = total;
        }
    }
    Some(q)
}

/// Pair probabilities via the innermost-enclosing-pair outside recursion.
fn probabilities<S: PfScalar>(p: &Problem, q: &[Vec<S>]) -> Option<Vec<Vec<f64>>> {
    let n = p.n;
    let total = q[0][n];
    let qval = |i: usize, j_excl: usize| if i >= j_excl { S::one() } else { q[i][j_excl] };

    // qout[i][j] for each allowed pair (i, j), spans processed widest first.
    let mut qout = vec![vec![S::zero(); n]; n];
    let mut spans: Vec<(usize, usize)> = Vec::new();
    for i in 0..n {
        for j in i + 1..n {
            if p.ln_weight[i][j] > f64::NEG_INFINITY {
                spans.push((i, j));
            }
        }
    }
    spans.sort_by_key(|&(i, j)| std::cmp::Reverse(j - i));

    for &(i, j) in &spans {
        // No enclosing pair: free structures on both flanks.
        let mut acc = qval(0, i).mul(qval(j + 1, n));
        // Innermost enclosing pair (a, b).
        for a in 0..i {
            for b in j + 1..n {
                let lw = p.ln_weight[a][b];
                if lw == f64::NEG_INFINITY {
                    continue;
                }
                let term = S::from_ln(lw)
                    .mul(qout[a][b])
                    .mul(qval(a + 1, i))
                    .mul(qval(j + 1, b));
                acc = acc.add(term);
            }
        }
        if !acc.finite() {
            return None;
        }
        qout[i][j] = acc;
    }

    let mut probs = vec![vec![0.0f64; n]; n];
    for &(i, j) in &spans {
        let qb = S::from_ln(p.ln_weight[i][j]).mul(qval(i + 1, j));
        let pij = qb.mul(qout[i][j]).ratio(total);
        if !pij.is_finite() {
            return None;
        }
        probs[i][j] = pij.clamp(0.0, 1.0);
        probs[j][i] = probs[i][j];
    }
    Some(probs)
}

fn run_tier<S: PfScalar>(
    model: &ThermoModel,
    request: &KernelRequest<'_>,
) -> Result<ThermoRecord, Overflowed> {
    let p = Problem::build(model, request);
    if p.bases.iter().any(|b| !b.is_concrete()) {
        // Degenerate sequences have no defined ensemble; report empty.
        return Ok(ThermoRecord::default());
    }
    let q = inside::<S>(&p).ok_or(Overflowed)?;
    let probs = probabilities::<S>(&p, &q).ok_or(Overflowed)?;

    let rt = model.rt();
    let bonus_total = request.enforced.len() as f64 * (-request.dg_clamp / rt);
    let log_q = q[0][p.n].ln() - bonus_total;
    if !log_q.is_finite() {
        return Err(Overflowed);
    }

    let mut acc = SparseAccum::new(p.n);
    for i in 0..p.n {
        for j in i + 1..p.n {
            if probs[i][j] > 0.0 {
                acc.add_sym(i, j, probs[i][j]);
            }
        }
    }
    Ok(ThermoRecord { log_q, probabilities: acc.finish(request.f_sparse) })
}

impl ThermoKernel for SyntheticKernel {
    fn evaluate_at(
        &self,
        model: &ThermoModel,
        request: &KernelRequest<'_>,
        tier: Tier,
    ) -> Result<ThermoRecord, Overflowed> {
        match tier {
            Tier::F32 => run_tier::<f32>(model, request),
            Tier::F64 => run_tier::<f64>(model, request),
            Tier::Scaled32 => run_tier::<ExpFloat<f32>>(model, request),
            Tier::Scaled64 => run_tier::<ExpFloat<f64>>(model, request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::evaluate_with_promotion;
    use mtd_core::types::{ComplexSequence, Sequence};

    fn seq(parts: &[&str]) -> ComplexSequence {
        ComplexSequence::new(parts.iter().map(|s| Sequence::parse(s).unwrap()).collect())
    }

    fn eval(parts: &[&str], enforced: &[(usize, usize)]) -> ThermoRecord {
        let model = ThermoModel::default();
        let cs = seq(parts);
        let req = KernelRequest { seq: &cs, enforced, dg_clamp: -20.0, f_sparse: 0.0 };
        evaluate_with_promotion(&SyntheticKernel, &model, &req).unwrap()
    }

    #[test]
    fn unpairable_sequence_has_unit_partition_function() {
        let rec = eval(&["AAAA"], &[]);
        assert!((rec.log_q - 0.0).abs() < 1e-9);
        assert_eq!(rec.probabilities.nnz(), 0);
    }

    #[test]
    fn hairpin_pairs_dominate() {
        let rec = eval(&["GGGGAAAACCCC"], &[]);
        assert!(rec.log_q > 0.0);
        assert!(rec.probabilities.get(0, 11) > 0.5, "outer stem pair should be likely");
    }

    #[test]
    fn tiers_agree_within_tolerance() {
        let model = ThermoModel::default();
        let cs = seq(&["GGGGAAAACCCC"]);
        let req = KernelRequest { seq: &cs, enforced: &[], dg_clamp: -20.0, f_sparse: 0.0 };
        let f64_rec = SyntheticKernel.evaluate_at(&model, &req, Tier::F64).unwrap();
        let scaled = SyntheticKernel.evaluate_at(&model, &req, Tier::Scaled64).unwrap();
        assert!((f64_rec.log_q - scaled.log_q).abs() < 1e-9);
        assert!(f64_rec.probabilities.max_abs_diff(&scaled.probabilities) < 1e-9);
    }

    #[test]
    fn enforced_pair_probability_saturates() {
        let rec = eval(&["GGGGAAAACCCC"], &[(0, 11)]);
        assert!(rec.probabilities.get(0, 11) > 0.999);
    }

    #[test]
    fn enforced_log_q_stays_conditional() {
        // Conditioning on the dominant pair must not inflate log Q above
        // the unconditional ensemble.
        let all = eval(&["GGGGAAAACCCC"], &[]);
        let cond = eval(&["GGGGAAAACCCC"], &[(0, 11)]);
        assert!(cond.log_q <= all.log_q + 1e-6);
    }

    #[test]
    fn f32_overflows_with_many_clamps_and_ladder_recovers() {
        let model = ThermoModel::default();
        let cs = seq(&["GGGGGGAAAACCCCCC", "GGGGGGAAAACCCCCC"]);
        let enforced = [(0usize, 31usize), (1, 30), (2, 29), (3, 28)];
        let req = KernelRequest { seq: &cs, enforced: &enforced, dg_clamp: -20.0, f_sparse: 0.0 };
        assert!(SyntheticKernel.evaluate_at(&model, &req, Tier::F32).is_err());
        let rec = evaluate_with_promotion(&SyntheticKernel, &model, &req).unwrap();
        assert!(rec.log_q.is_finite());
    }
}
