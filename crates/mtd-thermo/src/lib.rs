// crates/mtd-thermo/src/lib.rs

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]

//! Thermodynamics substrate for the design engine.
//!
//! The actual nearest-neighbor dynamic programs are external collaborators;
//! this crate pins down their contract ([`ThermoKernel`]), the four-tier
//! precision ladder used to survive partition-function overflow, the
//! byte-budgeted record cache, per-model environments, and the mass-action
//! equilibrium solver contract with a reference implementation. A synthetic
//! kernel backs the hermetic test suite.

pub mod cache;
pub mod concentration;
pub mod env;
pub mod kernel;
pub mod model;
pub mod overflow;
pub mod synthetic;

pub use cache::{CacheKey, RecordCache};
pub use concentration::{equilibrate, EquilibrateOptions, EquilibrateOutput};
pub use env::{ModelMap, ThermoEnv};
pub use kernel::{evaluate_with_promotion, KernelRequest, ThermoKernel, ThermoRecord};
pub use model::{Material, ThermoModel};
pub use overflow::{ExpFloat, PfScalar, Tier};
pub use synthetic::SyntheticKernel;
