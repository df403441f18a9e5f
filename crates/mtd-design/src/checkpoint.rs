// crates/mtd-design/src/checkpoint.rs

//! Checkpointing: serialize the designer's full state and restore it
//! against a (compatible) specification.
//!
//! Serialized state covers the design (sequences, complexes with their
//! decomposition trees minus caches, tubes), parameters, weights, the
//! partition, stats, bests, and the tabu set. Kernels, caches, and the
//! constraint network are rebuilt from the specification on load.

use crate::designer::Designer;
use crate::spec::Specification;
use anyhow::{bail, Context, Result};
use mtd_core::io::{read_auto, write_auto, Versioned};
use mtd_thermo::kernel::ThermoKernel;
use std::path::Path;
use std::sync::Arc;

/// Checkpoint wire version.
pub const CHECKPOINT_VERSION: u16 = 1;

/// Write the designer state to `path` (`.json` or `.cbor`).
pub fn save<P: AsRef<Path>>(path: P, designer: &Designer) -> Result<()> {
    write_auto(path, &Versioned::new(CHECKPOINT_VERSION, designer))
        .context("writing design checkpoint")
}

/// Load a designer from `path`, validate it against `spec`, and rebuild
/// the transient state (constraint network, kernel, caches) the dump
/// omits. The restored designer resumes with its saved partition, bests,
/// stats, and tabu set.
pub fn load<P: AsRef<Path>>(
    path: P,
    spec: &Specification,
    kernel: Arc<dyn ThermoKernel>,
) -> Result<Designer> {
    let wrapped: Versioned<Designer> =
        read_auto(path).context("reading design checkpoint")?;
    if wrapped.ver != CHECKPOINT_VERSION {
        bail!("unsupported checkpoint version {}", wrapped.ver);
    }
    let mut restored = wrapped.payload;

    // Rebuild what #[serde(skip)] dropped: a fresh designer from the spec
    // donates its constraint network and thermo environments.
    let fresh = spec.build_with_kernel(kernel)?;
    spec.ensure_compatibility(&restored)?;

    restored.design.sequences.constraints = fresh.design.sequences.constraints;
    restored.design.models = fresh.design.models;
    restored.timer.start();

    // Objectives keep precomputed tables out of the dump; rebuild them.
    let mut objectives = std::mem::take(&mut restored.objectives);
    for o in &mut objectives {
        o.initialize(&restored.design)?;
    }
    restored.objectives = objectives;

    // Deterministic restarts re-seed and re-disable the solver race.
    mtd_core::rng::install_seed(restored.parameters.rng_seed);
    if restored.parameters.rng_seed != 0 {
        restored.design.sequences.constraints.msec_cutoff = 0;
    }

    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("mtd_ckpt_{name}_{nanos}.json"));
        p
    }

    fn tiny_spec() -> Specification {
        serde_json::from_value(serde_json::json!({
            "domains": [{"name": "a", "allowed_bases": "N8"}],
            "strands": [{"name": "X", "domain_names": ["a", "a*"]}],
            "complexes": [{"name": "C", "strands": ["X"], "structure": "((((((....))))))"}],
            "tubes": [{"name": "T", "targets": [["C", 1e-6]]}],
            "parameters": {
                "rng_seed": 5, "f_stop": 0.9, "f_passive": 0.01, "h_split": 2,
                "n_split": 8, "f_split": 0.99, "f_stringent": 0.99, "dg_clamp": -20.0,
                "m_bad": 3, "m_reseed": 2, "m_reopt": 1, "f_redecomp": 0.03,
                "f_refocus": 0.03, "f_sparse": 1e-5, "cache_bytes": 1048576,
                "time_analysis": false
            }
        }))
        .unwrap()
    }

    #[test]
    fn save_load_round_trip_preserves_state() {
        let spec = tiny_spec();
        let mut designer = spec.build().unwrap();
        designer.initialize(true).unwrap();
        designer.stats.num_reseeds = 7;
        designer.stats.design_time = 1.5;

        let path = tmp("roundtrip");
        save(&path, &designer).unwrap();
        let restored = load(&path, &spec, Arc::new(mtd_thermo::SyntheticKernel)).unwrap();

        assert_eq!(restored.stats.num_reseeds, 7);
        assert!((restored.stats.design_time - 1.5).abs() < 1e-12);
        assert_eq!(restored.design.sequence(), designer.design.sequence());
        assert_eq!(restored.max_depth, designer.max_depth);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn incompatible_spec_is_rejected() {
        let spec = tiny_spec();
        let mut designer = spec.build().unwrap();
        designer.initialize(true).unwrap();
        let path = tmp("incompat");
        save(&path, &designer).unwrap();

        let mut changed = tiny_spec();
        changed.domains[0].allowed_bases = "N6".into();
        changed.complexes[0].structure = Some("((((....))))".into());
        assert!(load(&path, &changed, Arc::new(mtd_thermo::SyntheticKernel)).is_err());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn serialized_tree_round_trip_is_stable() {
        let spec = tiny_spec();
        let mut designer = spec.build().unwrap();
        designer.initialize(true).unwrap();

        let once = serde_json::to_string(&designer.design).unwrap();
        let back: crate::design::Design = serde_json::from_str(&once).unwrap();
        let twice = serde_json::to_string(&back).unwrap();
        assert_eq!(once, twice);
    }
}
