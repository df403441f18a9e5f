// crates/mtd-constraints/src/lib.rs

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]

//! Constraint-propagation sequence solver.
//!
//! Two implementations sit behind the [`Constraints`] facade:
//!
//! - a backtracking propagate-and-branch solver with weighted variable
//!   ordering and reference-biased value ordering, bounded by a wall-clock
//!   deadline;
//! - a deterministic best-first "closest feasible" solver used as the
//!   fallback (and used exclusively for seeded, reproducible designs).
//!
//! The facade races them per request and adapts the deadline to an
//! exponential moving average of fallback runtimes.

pub mod facade;
pub mod legacy;
pub mod net;
pub mod search;

pub use facade::Constraints;
pub use net::{Constraint, Net, State};
pub use search::SearchOutcome;
