// crates/mtd-design/src/design.rs

//! The design: global sequence, complexes, tubes, and thermodynamic
//! environments.

use crate::complex::{Complex, Target};
use crate::decompose::DecompositionParameters;
use crate::granularity::{EnsembleLevelSpec, EnsemblePartition};
use crate::sequences::DesignSequence;
use crate::tube::{Tube, TubeTarget};
use crate::weights::Weights;
use anyhow::{anyhow, Result};
use mtd_core::defect::Defect;
use mtd_core::error::DesignError;
use mtd_core::exec::Env;
use mtd_core::structure::Structure;
use mtd_core::types::Sequence;
use mtd_thermo::env::ModelMap;
use mtd_thermo::kernel::ThermoKernel;
use mtd_thermo::model::ThermoModel;
use mtd_thermo::synthetic::SyntheticKernel;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn default_models() -> ModelMap {
    ModelMap::new(Arc::new(SyntheticKernel), 0)
}

/// The tangible elements of a design.
#[derive(Serialize, Deserialize)]
pub struct Design {
    /// Global sequence state and views.
    pub sequences: DesignSequence,
    /// All complexes, on- and off-target.
    pub complexes: Vec<Complex>,
    /// All test tubes.
    pub tubes: Vec<Tube>,
    /// Thermo environments; reconstructed on load, never serialized.
    #[serde(skip, default = "default_models")]
    pub models: ModelMap,
}

impl Default for Design {
    fn default() -> Self {
        Self {
            sequences: DesignSequence::default(),
            complexes: Vec::new(),
            tubes: Vec::new(),
            models: default_models(),
        }
    }
}

impl std::fmt::Debug for Design {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Design")
            .field("sequences", &self.sequences)
            .field("complexes", &self.complexes.len())
            .field("tubes", &self.tubes.len())
            .finish_non_exhaustive()
    }
}

impl Design {
    /// Start from a prepared sequence model.
    #[must_use]
    pub fn new(sequences: DesignSequence) -> Self {
        Self { sequences, ..Self::default() }
    }

    /// Install the kernel and cache budget backing every evaluation.
    pub fn install_kernel(&mut self, kernel: Arc<dyn ThermoKernel>, cache_bytes: usize) {
        self.models = ModelMap::new(kernel, cache_bytes);
    }

    /// Add a complex over the named strands, with an optional target
    /// structure. Returns its index.
    pub fn add_complex(
        &mut self,
        strand_names: &[String],
        model: ThermoModel,
        name: &str,
        structure: Option<Structure>,
        params: DecompositionParameters,
    ) -> Result<usize> {
        let mut views = Vec::with_capacity(strand_names.len());
        for s in strand_names {
            views.push(self.sequences.get_strand(s)?);
        }
        let total: usize = views.iter().map(|v| v.len()).sum();
        let structure = match structure {
            Some(s) => {
                if s.len() != total {
                    return Err(anyhow!(
                        "structure length {} does not match complex {} length {}",
                        s.len(),
                        name,
                        total
                    ));
                }
                s
            }
            None => Structure::unstructured(&views.iter().map(|v| v.len()).collect::<Vec<_>>()),
        };
        let target = Target { model, structure };
        self.complexes.push(Complex::new(
            views,
            target,
            name.to_string(),
            params,
        ));
        Ok(self.complexes.len() - 1)
    }

    /// Add a tube over complex indices at target concentrations.
    pub fn add_tube(&mut self, members: &[(usize, f64)], name: &str, model: ThermoModel) {
        let targets = members
            .iter()
            .map(|&(ci, conc)| TubeTarget { complex_index: ci, target_conc: conc, indices: Vec::new() })
            .collect();
        self.tubes.push(Tube::new(targets, name.to_string(), model, &self.complexes));
    }

    /// Post complementarity between the two sides of every target pair so
    /// designed helices stay pairable. Wobble pairs follow the design's
    /// mutation policy.
    pub fn add_structure_complementarity(&mut self) {
        let wobble = self.sequences.wobble_mutations;
        let mut pairs = Vec::new();
        for c in &self.complexes {
            if !c.is_on_target() {
                continue;
            }
            let indices = c.to_indices();
            c.target.structure.for_each_pair(|i, j| pairs.push((indices[i], indices[j])));
        }
        pairs.sort_unstable();
        pairs.dedup();
        for (gi, gj) in pairs {
            self.sequences.constraints.complementarity_constraint(gi, gj, wobble);
        }
    }

    /// The current global sequence.
    #[must_use]
    pub fn sequence(&self) -> &Sequence {
        &self.sequences.nucleotides
    }

    /// Forwarded to the sequence model.
    pub fn initialize_sequence(&mut self) -> Result<()> {
        self.sequences.initialize_sequence()
    }

    /// Forwarded to the sequence model.
    pub fn set_sequence(&mut self, s: &Sequence) -> Result<()> {
        self.sequences.set_sequence(s)
    }

    /// Forwarded to the sequence model.
    pub fn mutate_sequence(&mut self, positions: &[usize]) -> bool {
        self.sequences.mutate_sequence(positions)
    }

    /// Per-complex log partition functions at `depth`. Passive complexes
    /// report 0 (they are sliced out of every downstream use).
    pub fn log_pfuncs(
        &self,
        env: Env,
        depth: usize,
        part: &EnsemblePartition,
        indiv: &EnsembleLevelSpec,
    ) -> Result<Vec<f64>> {
        let seq = self.sequence();
        let mut out = vec![0.0; self.complexes.len()];
        for (i, c) in self.complexes.iter().enumerate() {
            if !part.active(i) {
                continue;
            }
            let tenv = self.models.get(&c.target.model);
            out[i] =
                c.log_pfunc(env, &tenv, seq, depth.min(c.depth()), &indiv.for_complex(i))?;
        }
        Ok(out)
    }

    /// Per-complex ensemble defects at `depth`; passive complexes are
    /// empty.
    pub fn complex_defects(
        &self,
        env: Env,
        depth: usize,
        part: &EnsemblePartition,
        indiv: &EnsembleLevelSpec,
    ) -> Result<Vec<Defect>> {
        let seq = self.sequence();
        let mut out = vec![Defect::empty(); self.complexes.len()];
        for (i, c) in self.complexes.iter().enumerate() {
            if !part.active(i) || !c.is_on_target() {
                continue;
            }
            let tenv = self.models.get(&c.target.model);
            out[i] = c.defect(env, &tenv, seq, depth.min(c.depth()), &indiv.for_complex(i))?;
        }
        Ok(out)
    }

    /// The multitube normalized ensemble defect (or its focused estimate):
    /// the average of tube normalized defects.
    pub fn normalized_defect(
        &self,
        env: Env,
        depth: usize,
        part: &EnsemblePartition,
        indiv: &EnsembleLevelSpec,
        weights: &Weights,
    ) -> Result<Defect> {
        let log_pfuncs = self.log_pfuncs(env, depth, part, indiv)?;
        let complex_defects = self.complex_defects(env, depth, part, indiv)?;
        let mut total = Defect::empty();
        for (ti, tube) in self.tubes.iter().enumerate() {
            let d = tube.normalized_defect(
                &log_pfuncs,
                &complex_defects,
                part,
                weights.for_tube(ti),
            )?;
            total = total.plus(&d);
        }
        let n = self.tubes.len().max(1);
        Ok(total.scaled(1.0 / n as f64))
    }

    /// Deepest decomposition tree across all complexes.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.complexes.iter().map(Complex::depth).max().unwrap_or(0)
    }

    /// Structure-guided decomposition of every active on-target complex;
    /// off-targets stay root leaves.
    pub fn initialize_decomposition(&mut self, part: &EnsemblePartition) {
        for (i, c) in self.complexes.iter_mut().enumerate() {
            if part.active(i) {
                c.structure_decompose();
            }
            c.index_nodes();
        }
    }

    /// Probability-guided redecomposition of every active complex,
    /// starting at `depth`.
    pub fn redecompose_active(&mut self, depth: usize, part: &EnsemblePartition) -> Result<bool> {
        let seq = self.sequences.nucleotides.clone();
        let mut changed = false;
        for i in part.actives() {
            let tenv = self.models.get(&self.complexes[i].target.model);
            let c = &mut self.complexes[i];
            changed |= c.probability_decompose(&seq, &tenv, depth as i64, &Default::default())?;
            c.index_nodes();
        }
        Ok(changed)
    }

    /// Index of the named tube.
    pub fn find_tube(&self, name: &str) -> Result<usize> {
        self.tubes
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| anyhow!(DesignError::UnknownName { kind: "tube", name: name.into() }))
    }

    /// Index of the named complex.
    pub fn find_complex(&self, name: &str) -> Result<usize> {
        self.complexes
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| anyhow!(DesignError::UnknownName { kind: "complex", name: name.into() }))
    }
}
