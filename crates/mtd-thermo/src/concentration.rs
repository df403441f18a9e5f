// crates/mtd-thermo/src/concentration.rs

//! Mass-action equilibrium solver.
//!
//! Given strand stoichiometry `A` (complexes × strand types), total strand
//! mole fractions `x0`, and per-complex `log Q`, find complex mole
//! fractions `x_j = exp(log Q_j + Σ_i A_ji λ_i)` such that strand mass is
//! conserved: `Σ_j A_ji x_j = x0_i`. The reference implementation is a
//! damped multiplicative update on the strand chemical potentials λ; the
//! underlying problem is convex, so the damped iteration is globally
//! convergent.

use serde::{Deserialize, Serialize};

/// Solver knobs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EquilibrateOptions {
    /// Iteration cap.
    pub max_iterations: usize,
    /// Convergence tolerance on the log mass-balance residual.
    pub tolerance: f64,
    /// Damping factor in (0, 1] applied to each λ update.
    pub damping: f64,
}

impl Default for EquilibrateOptions {
    fn default() -> Self {
        Self { max_iterations: 10_000, tolerance: 1e-10, damping: 0.5 }
    }
}

/// Solver result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EquilibrateOutput {
    /// Equilibrium complex mole fractions, one per row of `A`.
    pub fractions: Vec<f64>,
    /// Whether the residual fell below tolerance.
    pub converged: bool,
    /// Final log mass-balance residual (max over strands).
    pub error: f64,
    /// Iterations consumed.
    pub iterations: usize,
}

/// Solve the mass-action equilibrium.
///
/// * `a` — stoichiometry, `a[j][i]` = copies of strand `i` in complex `j`.
/// * `log_x0` — log of total mole fraction of each strand type.
/// * `log_q` — log partition function of each complex.
#[must_use]
pub fn equilibrate(
    a: &[Vec<f64>],
    log_x0: &[f64],
    log_q: &[f64],
    options: &EquilibrateOptions,
) -> EquilibrateOutput {
    let n_complexes = a.len();
    let n_strands = log_x0.len();
    debug_assert!(a.iter().all(|row| row.len() == n_strands));
    debug_assert_eq!(log_q.len(), n_complexes);

    if n_complexes == 0 || n_strands == 0 {
        return EquilibrateOutput { fractions: vec![0.0; n_complexes], converged: true, ..Default::default() };
    }

    // An absent strand (zero total) pins λ far down so every complex
    // containing it vanishes; it is excluded from the residual.
    const ABSENT_LAMBDA: f64 = -1e3;
    let present: Vec<bool> = log_x0.iter().map(|x| x.is_finite()).collect();

    // Start from ideal free strands: λ_i = log x0_i.
    let mut lambda: Vec<f64> = log_x0
        .iter()
        .map(|&x| if x.is_finite() { x } else { ABSENT_LAMBDA })
        .collect();
    let mut x = vec![0.0f64; n_complexes];
    let mut output = EquilibrateOutput::default();

    for iter in 0..options.max_iterations {
        for (j, xj) in x.iter_mut().enumerate() {
            let mu: f64 =
                log_q[j] + a[j].iter().zip(&lambda).map(|(&aji, &l)| aji * l).sum::<f64>();
            *xj = mu.exp();
        }

        // Per-strand log residual: log(Σ_j A_ji x_j) − log x0_i.
        let mut worst = 0.0f64;
        let mut residual = vec![0.0f64; n_strands];
        for i in 0..n_strands {
            if !present[i] {
                continue;
            }
            let mass: f64 = a.iter().zip(&x).map(|(row, &xj)| row[i] * xj).sum();
            let r = if mass > 0.0 { mass.ln() - log_x0[i] } else { f64::INFINITY };
            residual[i] = r;
            worst = worst.max(r.abs());
        }

        output.iterations = iter + 1;
        output.error = worst;
        if worst < options.tolerance {
            output.converged = true;
            break;
        }

        for ((l, r), &p) in lambda.iter_mut().zip(&residual).zip(&present) {
            if !p {
                continue;
            }
            if r.is_finite() {
                *l -= options.damping * r;
            } else {
                // Strand mass vanished at the current λ; push up hard.
                *l += 1.0;
            }
        }
    }

    output.fractions = x;
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mass(a: &[Vec<f64>], x: &[f64], i: usize) -> f64 {
        a.iter().zip(x).map(|(row, &xj)| row[i] * xj).sum()
    }

    #[test]
    fn monomer_dimer_balance() {
        // Complexes: A, B, AB. Strands: A, B.
        let a = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let log_x0 = [(1e-6f64).ln(), (1e-6f64).ln()];
        let log_q = [0.0, 0.0, 20.0];
        let out = equilibrate(&a, &log_x0, &log_q, &EquilibrateOptions::default());
        assert!(out.converged, "error {}", out.error);
        for i in 0..2 {
            let m = mass(&a, &out.fractions, i);
            assert!((m.ln() - log_x0[i]).abs() < 1e-8, "strand {i} mass {m}");
        }
        // Strong duplex: most mass should live in AB.
        assert!(out.fractions[2] > 0.9 * 1e-6_f64.min(out.fractions[2] + out.fractions[0]));
        assert!(out.fractions[2] > out.fractions[0]);
    }

    #[test]
    fn homodimer_stoichiometry() {
        // Complexes: X, XX. Strand: X.
        let a = vec![vec![1.0], vec![2.0]];
        let log_x0 = [(2e-6f64).ln()];
        let log_q = [0.0, 5.0];
        let out = equilibrate(&a, &log_x0, &log_q, &EquilibrateOptions::default());
        assert!(out.converged);
        let m = mass(&a, &out.fractions, 0);
        assert!((m.ln() - log_x0[0]).abs() < 1e-8);
    }

    #[test]
    fn empty_system_is_trivially_converged() {
        let out = equilibrate(&[], &[], &[], &EquilibrateOptions::default());
        assert!(out.converged);
        assert!(out.fractions.is_empty());
    }
}
