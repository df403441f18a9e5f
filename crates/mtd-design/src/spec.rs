// crates/mtd-design/src/spec.rs

//! User-facing specifications and their conversion into a [`Designer`].
//!
//! A `Specification` is a plain serde document: domains, strands,
//! complexes (with dot-paren targets), tubes, model, constraints,
//! objectives, weights, and parameters. `build` assembles the designer;
//! `ensure_compatibility` guards the checkpoint-restart path.

use crate::decompose::DecompositionParameters;
use crate::design::Design;
use crate::designer::{DesignParameters, Designer};
use crate::objectives::{MultitubeObjective, Objective};
use crate::sequences::{expand_pattern, DesignSequence, DomainSpec, StrandSpec};
use crate::weights::{Weight, Weights};
use anyhow::{anyhow, bail, Context, Result};
use mtd_core::error::DesignError;
use mtd_core::structure::Structure;
use mtd_core::types::{lowest_rotation, set_rna_alphabet, Sequence};
use mtd_thermo::kernel::ThermoKernel;
use mtd_thermo::model::{Material, ThermoModel};
use mtd_thermo::synthetic::SyntheticKernel;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Two name lists constrained pairwise (match or complementarity).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DualListSpec {
    /// Left elements (domain or strand names).
    pub left: Vec<String>,
    /// Right elements, zipped against the left concatenation.
    pub right: Vec<String>,
}

/// Forbid a pattern inside the named domains/strands.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PatternSpec {
    /// Window elements, concatenated.
    pub domains: Vec<String>,
    /// Forbidden pattern (IUPAC letters, run-length shorthand allowed).
    pub pattern: String,
}

/// Require diversity inside the named domains.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DiversitySpec {
    /// Window elements, concatenated.
    pub domains: Vec<String>,
    /// Sub-window length.
    pub word_length: usize,
    /// Minimum distinct bases per sub-window.
    pub min_nucleotide_types: usize,
}

/// Constrain a window to an enumerated word list.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WordSpec {
    /// Window elements, concatenated.
    pub domains: Vec<String>,
    /// Allowed words (IUPAC letters).
    pub words: Vec<String>,
}

/// Constrain the match fraction against a reference.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimilaritySpec {
    /// Window elements, concatenated.
    pub domains: Vec<String>,
    /// Reference sequence (IUPAC letters, shorthand allowed).
    pub reference: String,
    /// Inclusive match-fraction band.
    pub range: (f64, f64),
}

/// All sequence constraints of a design.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConstraintSpec {
    /// Pairwise complementarity between two name lists.
    #[serde(default)]
    pub complementarity: Vec<DualListSpec>,
    /// Pairwise identity between two name lists.
    #[serde(default)]
    pub matching: Vec<DualListSpec>,
    /// Forbidden patterns.
    #[serde(default)]
    pub pattern: Vec<PatternSpec>,
    /// Diversity requirements.
    #[serde(default)]
    pub diversity: Vec<DiversitySpec>,
    /// Word libraries.
    #[serde(default)]
    pub word: Vec<WordSpec>,
    /// Similarity bands.
    #[serde(default)]
    pub similarity: Vec<SimilaritySpec>,
}

/// A complex: ordered strand names plus an optional dot-paren target.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ComplexSpec {
    /// Display name.
    pub name: String,
    /// Strand names, 5'→3'.
    pub strands: Vec<String>,
    /// Target structure in dot-paren with `+` separators; absent for
    /// off-targets.
    #[serde(default)]
    pub structure: Option<String>,
}

/// A tube: named complexes at target concentrations (0 ⇒ off-target).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TubeSpec {
    /// Display name.
    pub name: String,
    /// `(complex name, molar concentration)` pairs.
    pub targets: Vec<(String, f64)>,
}

/// Everything needed to assemble a designer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Specification {
    /// Domain definitions.
    pub domains: Vec<DomainSpec>,
    /// Strand definitions.
    pub strands: Vec<StrandSpec>,
    /// Complexes (on- and off-target).
    pub complexes: Vec<ComplexSpec>,
    /// Tubes.
    pub tubes: Vec<TubeSpec>,
    /// Thermodynamic conditions.
    #[serde(default)]
    pub model: ThermoModel,
    /// Per-nucleotide weight specifications.
    #[serde(default)]
    pub weights: Vec<Weight>,
    /// Top-level objective weights.
    #[serde(default)]
    pub objective_weights: Vec<f64>,
    /// Sequence constraints.
    #[serde(default)]
    pub constraints: ConstraintSpec,
    /// Objectives; a lone multitube objective is assumed when empty.
    #[serde(default)]
    pub objectives: Vec<Objective>,
    /// Optimizer parameters.
    #[serde(default)]
    pub parameters: DesignParameters,
    /// Allow G·U wobbles in derived complementarity constraints.
    #[serde(default)]
    pub wobble_mutations: bool,
}

impl Specification {
    /// Assemble a designer backed by the in-repo synthetic kernel.
    pub fn build(&self) -> Result<Designer> {
        self.build_with_kernel(Arc::new(SyntheticKernel))
    }

    /// Assemble a designer backed by the given kernel.
    pub fn build_with_kernel(&self, kernel: Arc<dyn ThermoKernel>) -> Result<Designer> {
        set_rna_alphabet(self.model.material == Material::Rna);

        let mut sequences = DesignSequence { wobble_mutations: self.wobble_mutations, ..DesignSequence::default() };
        for d in &self.domains {
            sequences.add_domain(DomainSpec::new(d.name.clone(), &d.allowed_bases)?);
        }
        for s in &self.strands {
            sequences.add_strand(s.clone());
        }
        sequences.make()?;

        let mut design = Design::new(sequences);
        design.install_kernel(kernel, self.parameters.cache_bytes);

        let decomp = DecompositionParameters {
            h_split: self.parameters.h_split,
            n_split: self.parameters.n_split,
            f_split: self.parameters.f_split,
            f_sparse: self.parameters.f_sparse,
            dg_clamp: self.parameters.dg_clamp,
        };
        for c in &self.complexes {
            let structure = match &c.structure {
                Some(dp) => Some(Structure::parse(dp)?),
                None => None,
            };
            design
                .add_complex(&c.strands, self.model, &c.name, structure, decomp)
                .with_context(|| format!("adding complex {}", c.name))?;
        }
        for t in &self.tubes {
            let mut members = Vec::with_capacity(t.targets.len());
            for (name, conc) in &t.targets {
                members.push((design.find_complex(name)?, *conc));
            }
            design.add_tube(&members, &t.name, self.model);
        }

        design.add_structure_complementarity();
        self.post_constraints(&mut design)?;

        let objectives = if self.objectives.is_empty() {
            vec![Objective::Multitube(MultitubeObjective)]
        } else {
            self.objectives.clone()
        };

        let mut weights = Weights::default();
        for w in &self.weights {
            weights.add(w.clone());
        }
        for &w in &self.objective_weights {
            weights.add_objective_weight(w);
        }

        Ok(Designer::new(design, objectives, weights, self.parameters))
    }

    /// Concatenated global indices of the named elements.
    fn window(design: &Design, names: &[String]) -> Result<Vec<usize>> {
        let mut out = Vec::new();
        for n in names {
            out.extend(design.sequences.find_element(n)?.to_indices());
        }
        Ok(out)
    }

    fn post_constraints(&self, design: &mut Design) -> Result<()> {
        for dual in &self.constraints.complementarity {
            let left = Self::window(design, &dual.left)?;
            let right = Self::window(design, &dual.right)?;
            if left.len() != right.len() {
                bail!("complementarity lists differ in length");
            }
            for (k, &i) in left.iter().enumerate() {
                let j = right[right.len() - 1 - k];
                design.sequences.constraints.complementarity_constraint(
                    i,
                    j,
                    self.wobble_mutations,
                );
            }
        }
        for dual in &self.constraints.matching {
            let left = Self::window(design, &dual.left)?;
            let right = Self::window(design, &dual.right)?;
            if left.len() != right.len() {
                bail!("match lists differ in length");
            }
            for (&i, &j) in left.iter().zip(&right) {
                design.sequences.constraints.match_constraint(i, j);
            }
        }
        for p in &self.constraints.pattern {
            let window = Self::window(design, &p.domains)?;
            let pattern = Sequence::parse(&expand_pattern(&p.pattern)?)
                .ok_or_else(|| anyhow!("invalid pattern {:?}", p.pattern))?;
            design.sequences.constraints.pattern_constraint(&window, &pattern);
        }
        for d in &self.constraints.diversity {
            let window = Self::window(design, &d.domains)?;
            design.sequences.constraints.diversity_constraint(
                &window,
                d.word_length,
                d.min_nucleotide_types,
            );
        }
        for w in &self.constraints.word {
            let window = Self::window(design, &w.domains)?;
            let words = w
                .words
                .iter()
                .map(|s| {
                    Sequence::parse(&expand_pattern(s)?)
                        .ok_or_else(|| anyhow!("invalid word {s:?}"))
                })
                .collect::<Result<Vec<_>>>()?;
            for word in &words {
                if word.len() != window.len() {
                    bail!("word length {} != window length {}", word.len(), window.len());
                }
            }
            design.sequences.constraints.word_constraint(&window, &words);
        }
        for s in &self.constraints.similarity {
            let window = Self::window(design, &s.domains)?;
            let reference = Sequence::parse(&expand_pattern(&s.reference)?)
                .ok_or_else(|| anyhow!("invalid reference {:?}", s.reference))?;
            if reference.len() != window.len() {
                bail!("similarity reference length mismatch");
            }
            design.sequences.constraints.similarity_constraint(&window, &reference, s.range);
        }
        Ok(())
    }

    /// Verify that a restored designer matches this specification:
    /// domain lengths, strand definitions, and tube memberships (complex
    /// strand lists compared by lowest rotation).
    pub fn ensure_compatibility(&self, designer: &Designer) -> Result<()> {
        let mismatch = |m: String| anyhow!(DesignError::IncompatibleCheckpoint { mismatch: m });

        for d in &self.domains {
            let expanded = expand_pattern(&d.allowed_bases)?;
            match designer.design.sequences.domains.get(&d.name) {
                Some(view) if view.len() == expanded.chars().count() => {}
                Some(view) => {
                    return Err(mismatch(format!(
                        "domain {} length {} != {}",
                        d.name,
                        view.len(),
                        expanded.chars().count()
                    )))
                }
                None => return Err(mismatch(format!("domain {} missing", d.name))),
            }
        }
        for s in &self.strands {
            match designer.design.sequences.strand_specs.iter().find(|x| x.name == s.name) {
                Some(found) if found.domain_names == s.domain_names => {}
                Some(_) => {
                    return Err(mismatch(format!("strand {} definition changed", s.name)))
                }
                None => return Err(mismatch(format!("strand {} missing", s.name))),
            }
        }
        for (ti, t) in self.tubes.iter().enumerate() {
            let Some(tube) = designer.design.tubes.get(ti) else {
                return Err(mismatch(format!("tube {} missing", t.name)));
            };
            if tube.name != t.name || tube.targets.len() != t.targets.len() {
                return Err(mismatch(format!("tube {} membership changed", t.name)));
            }
            for ((name, _), target) in t.targets.iter().zip(&tube.targets) {
                let spec_complex = self
                    .complexes
                    .iter()
                    .find(|c| c.name == *name)
                    .ok_or_else(|| mismatch(format!("complex {name} missing from spec")))?;
                let restored = &designer.design.complexes[target.complex_index];
                let spec_rot = lowest_rotation(&spec_complex.strands);
                let restored_names: Vec<String> = restored
                    .strands
                    .iter()
                    .map(|v| {
                        designer
                            .design
                            .sequences
                            .strands
                            .iter()
                            .find(|(_, sv)| *sv == v)
                            .map(|(n, _)| n.clone())
                            .unwrap_or_default()
                    })
                    .collect();
                if lowest_rotation(&restored_names) != spec_rot {
                    return Err(mismatch(format!(
                        "tube {} complex {} strand list changed",
                        t.name, name
                    )));
                }
            }
        }
        Ok(())
    }
}
