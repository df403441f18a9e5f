// crates/mtd-core/src/error.rs

//! Structured error kinds surfaced by the design engine.
//!
//! Operation boundaries return `anyhow::Result`; these variants are attached
//! as sources so callers that need to dispatch (the optimizer, the restart
//! path) can downcast and match.

use thiserror::Error;

/// Diagnostic error kinds for the design engine.
#[derive(Debug, Error)]
pub enum DesignError {
    /// No sequence satisfies the posted constraints (empty initial domain).
    #[error("no sequence satisfies the posted constraints")]
    ConstraintUnsatisfiable,

    /// No neighbor exists for the requested mutation positions. Non-fatal:
    /// the optimizer counts it against `M_bad` and moves on.
    #[error("no feasible mutation at positions {positions:?}")]
    MutationInfeasible {
        /// The positions for which no feasible reassignment exists.
        positions: Vec<usize>,
    },

    /// No valid split set exists under the current decomposition
    /// parameters. Recovered locally: the node stays a leaf.
    #[error("no valid split set for decomposition node {node}")]
    DecompositionFailure {
        /// Index of the node that could not be split.
        node: i64,
    },

    /// The mass-action equilibrium solve failed to converge. Fatal; the
    /// message carries the dumped solver context.
    #[error("equilibrium concentration solve failed to converge: {context}")]
    ConcentrationNonConvergence {
        /// Serialized `A`, `x0`, `log Q`, options, and partial solution.
        context: String,
    },

    /// A checkpoint does not match the active specification.
    #[error("checkpoint incompatible with specification at {mismatch}")]
    IncompatibleCheckpoint {
        /// Human-readable mismatch location.
        mismatch: String,
    },

    /// A referenced domain/strand/complex/tube does not exist.
    #[error("unknown {kind} name {name:?}")]
    UnknownName {
        /// The namespace that was searched.
        kind: &'static str,
        /// The name that failed to resolve.
        name: String,
    },

    /// External cancellation observed; propagates out of the optimizer as a
    /// recoverable interruption.
    #[error("cancellation requested")]
    CancellationRequested,
}
