// crates/mtd-thermo/src/kernel.rs

//! The external partition-function kernel contract.

use crate::model::ThermoModel;
use crate::overflow::Tier;
use anyhow::{bail, Result};
use mtd_core::sparse::SparseMatrix;
use mtd_core::types::ComplexSequence;
use serde::{Deserialize, Serialize};

/// One kernel result: log partition function plus the sparse symmetric
/// base-pair probability matrix.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ThermoRecord {
    /// Natural log of the (conditional) partition function. Clamp-bonus
    /// contributions from enforced pairs are excluded, so values are
    /// comparable across decomposition depths.
    pub log_q: f64,
    /// Sparse symmetric pair-probability matrix.
    pub probabilities: SparseMatrix,
}

impl ThermoRecord {
    /// Approximate heap footprint, for cache budgeting.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.probabilities.memory_bytes()
    }
}

/// A single kernel invocation.
#[derive(Clone, Debug)]
pub struct KernelRequest<'a> {
    /// The complex sequence to evaluate (flattening order defines indices).
    pub seq: &'a ComplexSequence,
    /// Base pairs the conditional ensemble must contain.
    pub enforced: &'a [(usize, usize)],
    /// Bonus free energy (kcal/mol, strongly negative) applied to each
    /// enforced pair so it forms with probability near 1.
    pub dg_clamp: f64,
    /// Sparsification threshold for the returned matrix.
    pub f_sparse: f64,
}

/// The tier exhausted its representable range mid-computation.
#[derive(Clone, Copy, Debug)]
pub struct Overflowed;

/// Black-box partition-function / pair-probability engine for a single
/// sub-sequence. Implementations must be deterministic given their inputs.
pub trait ThermoKernel: Send + Sync {
    /// Evaluate at one precision tier. `Err(Overflowed)` asks the caller to
    /// promote; any other failure is reported through the result record
    /// being unrepresentable at every rung.
    fn evaluate_at(
        &self,
        model: &ThermoModel,
        request: &KernelRequest<'_>,
        tier: Tier,
    ) -> Result<ThermoRecord, Overflowed>;
}

/// Run the precision ladder: `f32`, then `f64`, then the exponent-scaled
/// variants. Callers must accept any rung.
pub fn evaluate_with_promotion(
    kernel: &dyn ThermoKernel,
    model: &ThermoModel,
    request: &KernelRequest<'_>,
) -> Result<ThermoRecord> {
    for tier in Tier::LADDER {
        if let Ok(record) = kernel.evaluate_at(model, request, tier) {
            return Ok(record);
        }
    }
    bail!(
        "kernel overflowed every precision tier for a complex of {} nt",
        request.seq.len()
    )
}
