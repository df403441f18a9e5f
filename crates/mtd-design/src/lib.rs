// crates/mtd-design/src/lib.rs

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]

//! The multi-tube sequence design engine.
//!
//! A design owns a global sequence (viewed through named domains and
//! strands), a set of complexes each carrying a recursive decomposition
//! tree, and a set of test tubes with target concentrations. The designer
//! drives a four-level optimization: tabu leaf mutation, leaf reseeding,
//! depth-wise forest merging with bounded redecomposition, and
//! full-ensemble refocusing.

pub mod checkpoint;
pub mod complex;
pub mod decompose;
pub mod design;
pub mod designer;
pub mod granularity;
pub mod objectives;
pub mod results;
pub mod sequences;
pub mod spec;
pub mod split;
pub mod tube;
pub mod weights;

pub use complex::{Complex, Target};
pub use design::Design;
pub use designer::{DesignParameters, DesignStats, Designer, Timer};
pub use granularity::{EnsembleLevelSpec, EnsemblePartition, LevelSpec};
pub use objectives::Objective;
pub use results::{Candidate, DesignResult, SingleResult};
pub use sequences::{DesignSequence, DomainView, StrandView};
pub use spec::Specification;
pub use tube::{Tube, TubeTarget};
pub use weights::{Weight, Weights};
