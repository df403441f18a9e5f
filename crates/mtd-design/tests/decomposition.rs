// crates/mtd-design/tests/decomposition.rs

//! Decomposition-tree invariants exercised against the synthetic kernel.

use mtd_core::exec::Env;
use mtd_core::types::{ComplexSequence, Sequence};
use mtd_design::granularity::LevelSpec;
use mtd_design::sequences::{DomainSpec, StrandSpec};
use mtd_design::spec::{ComplexSpec, Specification, TubeSpec};
use mtd_design::Designer;
use mtd_thermo::kernel::{evaluate_with_promotion, KernelRequest};
use mtd_thermo::model::ThermoModel;
use mtd_thermo::overflow::Tier;
use mtd_thermo::{SyntheticKernel, ThermoKernel};

/// A 24-nt hairpin with a fixed, strongly paired 10-pair stem.
fn stem_spec() -> Specification {
    Specification {
        domains: vec![
            DomainSpec::new("stem", "GCGGCCGGCG").unwrap(),
            DomainSpec::new("loop", "AAAA").unwrap(),
        ],
        strands: vec![StrandSpec {
            name: "X".into(),
            domain_names: vec!["stem".into(), "loop".into(), "stem*".into()],
        }],
        complexes: vec![ComplexSpec {
            name: "C".into(),
            strands: vec!["X".into()],
            structure: Some("((((((((((....))))))))))".into()),
        }],
        tubes: vec![TubeSpec { name: "T".into(), targets: vec![("C".into(), 1e-6)] }],
        parameters: mtd_design::DesignParameters {
            rng_seed: 11,
            n_split: 8,
            cache_bytes: 1 << 20,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn built() -> Designer {
    let mut designer = stem_spec().build().unwrap();
    designer.initialize(true).unwrap();
    designer
}

#[test]
fn structure_decomposition_splits_the_stem() {
    let designer = built();
    let c = &designer.design.complexes[0];
    assert!(c.depth() >= 1, "a 24-nt stem with n_split=8 must split");
    // Alternatives at the root all sit on target pairs.
    for (sp, _) in &c.decomposition.children {
        assert_eq!(c.target.structure.pair(sp.0), Some(sp.1));
    }
}

#[test]
fn deeper_log_q_is_a_lower_bound() {
    let designer = built();
    let c = &designer.design.complexes[0];
    let tenv = designer.design.models.get(&c.target.model);
    let seq = designer.design.sequence();
    let none = LevelSpec::default();

    let root = c.log_pfunc(Env::Serial, &tenv, seq, 0, &none).unwrap();
    let deep = c.log_pfunc(Env::Serial, &tenv, seq, c.depth(), &none).unwrap();
    assert!(deep <= root + 1e-9, "deep {deep} must not exceed root {root}");
    // A strong stem splits with nearly all its ensemble captured.
    assert!(root - deep < 0.05, "split should capture the ensemble ({root} vs {deep})");
}

#[test]
fn merged_defect_matches_root_for_a_strong_stem() {
    let designer = built();
    let c = &designer.design.complexes[0];
    let tenv = designer.design.models.get(&c.target.model);
    let seq = designer.design.sequence();
    let none = LevelSpec::default();

    let root = c.defect(Env::Serial, &tenv, seq, 0, &none).unwrap().total();
    let deep = c.defect(Env::Serial, &tenv, seq, c.depth(), &none).unwrap().total();
    assert!((root - deep).abs() < 0.1, "root {root} vs merged {deep}");
}

#[test]
fn rotation_preserves_log_q_and_permutes_probabilities() {
    let model = ThermoModel::default();
    let a = ComplexSequence::new(vec![
        Sequence::parse("GGGGGG").unwrap(),
        Sequence::parse("CCCCCC").unwrap(),
    ]);
    let b = ComplexSequence::new(vec![
        Sequence::parse("CCCCCC").unwrap(),
        Sequence::parse("GGGGGG").unwrap(),
    ]);
    let eval = |cs: &ComplexSequence| {
        let req = KernelRequest { seq: cs, enforced: &[], dg_clamp: -20.0, f_sparse: 0.0 };
        evaluate_with_promotion(&SyntheticKernel, &model, &req).unwrap()
    };
    let ra = eval(&a);
    let rb = eval(&b);
    assert!((ra.log_q - rb.log_q).abs() < 1e-9);
    // Rotation by one strand maps index i to (i + 6) % 12.
    for (i, j, v) in ra.probabilities.iter() {
        let (ri, rj) = ((i + 6) % 12, (j + 6) % 12);
        assert!((rb.probabilities.get(ri, rj) - v).abs() < 1e-9);
    }
}

#[test]
fn probability_redecomposition_reports_changes() {
    let mut designer = built();
    let seq = designer.design.sequence().clone();
    let c = &mut designer.design.complexes[0];
    let tenv = designer.design.models.get(&c.target.model);

    // Re-splitting an already-split tree under the same sequence should
    // settle (eventually no change).
    let _ = c.probability_decompose(&seq, &tenv, c.depth() as i64, &LevelSpec::default()).unwrap();
    let second = c
        .probability_decompose(&seq, &tenv, c.depth() as i64, &LevelSpec::default())
        .unwrap();
    assert!(!second, "second probability decomposition must be a fixpoint");
}

#[test]
fn enforced_pairs_saturate_in_children() {
    let designer = built();
    let c = &designer.design.complexes[0];
    let tenv = designer.design.models.get(&c.target.model);
    let seq = designer.design.sequence();
    let (sp, pair) = &c.decomposition.children[0];
    // The right child conditions on the split pair at its ends.
    let right = &pair.1;
    assert!(right.enforced_pairs.contains(&(0, sp.1 - sp.0)));
    let record = right
        .evaluate(Env::Serial, &tenv, seq, 0, &c.params, &LevelSpec::default())
        .unwrap();
    assert!(record.probabilities.get(0, sp.1 - sp.0) > 0.999);
}

#[test]
fn ladder_tiers_agree_on_the_design_sequence() {
    let designer = built();
    let c = &designer.design.complexes[0];
    let seq = c.complex_sequence(designer.design.sequence());
    let model = ThermoModel::default();
    let req = KernelRequest { seq: &seq, enforced: &[], dg_clamp: -20.0, f_sparse: 0.0 };
    let f64_rec = SyntheticKernel.evaluate_at(&model, &req, Tier::F64).unwrap();
    let scaled = SyntheticKernel.evaluate_at(&model, &req, Tier::Scaled64).unwrap();
    assert!((f64_rec.log_q - scaled.log_q).abs() < 1e-9);
}
