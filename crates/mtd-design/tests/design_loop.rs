// crates/mtd-design/tests/design_loop.rs

//! End-to-end designs against the synthetic kernel, kept small enough to
//! converge quickly in a test run.

use mtd_core::exec::Env;
use mtd_design::sequences::{DomainSpec, StrandSpec};
use mtd_design::spec::{ComplexSpec, ConstraintSpec, PatternSpec, Specification, TubeSpec, WordSpec};
use mtd_design::DesignParameters;

/// A single-tube hairpin design over free stem domains.
fn hairpin_spec(seed: u64) -> Specification {
    Specification {
        domains: vec![
            DomainSpec::new("s", "N6").unwrap(),
            DomainSpec::new("l", "AAAA").unwrap(),
        ],
        strands: vec![StrandSpec {
            name: "X".into(),
            domain_names: vec!["s".into(), "l".into(), "s*".into()],
        }],
        complexes: vec![ComplexSpec {
            name: "C".into(),
            strands: vec!["X".into()],
            structure: Some("((((((....))))))".into()),
        }],
        tubes: vec![TubeSpec { name: "T".into(), targets: vec![("C".into(), 1e-6)] }],
        parameters: DesignParameters {
            rng_seed: seed,
            f_stop: 0.06,
            m_bad: 100,
            m_reseed: 4,
            m_reopt: 2,
            cache_bytes: 1 << 20,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn hairpin_design_converges() {
    let mut designer = hairpin_spec(1).build().unwrap();
    designer.initialize(true).unwrap();
    let best = designer.optimize_tubes(Env::Serial).unwrap();
    assert!(
        designer.success(),
        "hairpin design should reach f_stop (got {})",
        best.weighted_total()
    );

    // The designed stem actually closes: check the outermost target pair.
    let result = designer.design_result(Env::Serial).unwrap();
    assert!(result.success);
    let c = &result.results[0].complexes[0];
    assert!(c.log_partition_function > 0.0);
    assert!(c.pair_probabilities.get(0, 15) > 0.8, "outer pair should be formed");
}

#[test]
fn optimizing_a_converged_design_is_a_no_op() {
    let mut designer = hairpin_spec(3).build().unwrap();
    designer.initialize(true).unwrap();
    let first = designer.optimize_tubes(Env::Serial).unwrap();
    assert!(designer.success());

    designer.timer.start();
    let evals_before = designer.stats.num_leaf_evaluations;
    let second = designer.optimize_tubes(Env::Serial).unwrap();
    assert_eq!(second.sequence, first.sequence);
    // Re-verification only: one leaf evaluation plus the root checks.
    assert!(designer.stats.num_leaf_evaluations <= evals_before + 2);
}

#[test]
fn identical_seeds_reproduce_identical_designs() {
    let run = |seed| {
        let mut designer = hairpin_spec(seed).build().unwrap();
        designer.initialize(true).unwrap();
        designer.optimize_tubes(Env::Serial).unwrap();
        designer.best.full.sequence.clone()
    };
    assert_eq!(run(7), run(7));
}

#[test]
fn zero_stop_condition_exhausts_the_mutation_budget() {
    let mut spec = hairpin_spec(5);
    spec.parameters.f_stop = 0.0;
    spec.parameters.m_bad = 5;
    spec.parameters.m_reopt = 1;
    let mut designer = spec.build().unwrap();
    designer.initialize(true).unwrap();
    let best = designer.optimize_tubes(Env::Serial).unwrap();
    assert!(!designer.success());
    assert!(best.weighted_total() > 0.0);
    assert!(designer.stats.num_leaf_evaluations > 0);
}

#[test]
fn conflicting_constraints_fail_initialization() {
    let mut spec = hairpin_spec(2);
    spec.domains.push(DomainSpec::new("d", "N10").unwrap());
    spec.strands.push(StrandSpec { name: "W".into(), domain_names: vec!["d".into()] });
    spec.constraints = ConstraintSpec {
        pattern: vec![PatternSpec { domains: vec!["d".into()], pattern: "GGGG".into() }],
        word: vec![WordSpec {
            domains: vec!["d".into()],
            words: vec!["GGGGAAAAAA".into(), "GGGGCCCCCC".into()],
        }],
        ..Default::default()
    };
    let mut designer = spec.build().unwrap();
    let err = designer.initialize(true).expect_err("unsatisfiable constraints");
    let root = err.downcast_ref::<mtd_core::error::DesignError>();
    assert!(
        matches!(root, Some(mtd_core::error::DesignError::ConstraintUnsatisfiable)),
        "unexpected error: {err:?}"
    );
}

#[test]
fn off_target_pressure_still_forms_the_duplex() {
    // A small toehold-style system: the duplex is the on-target, the two
    // monomers are off-target singletons in the same tube.
    let spec = Specification {
        domains: vec![DomainSpec::new("a", "N8").unwrap()],
        strands: vec![
            StrandSpec { name: "X".into(), domain_names: vec!["a".into()] },
            StrandSpec { name: "Y".into(), domain_names: vec!["a*".into()] },
        ],
        complexes: vec![
            ComplexSpec {
                name: "XY".into(),
                strands: vec!["X".into(), "Y".into()],
                structure: Some("((((((((+))))))))".into()),
            },
            ComplexSpec { name: "X".into(), strands: vec!["X".into()], structure: None },
            ComplexSpec { name: "Y".into(), strands: vec!["Y".into()], structure: None },
        ],
        tubes: vec![TubeSpec {
            name: "T".into(),
            targets: vec![("XY".into(), 1e-6), ("X".into(), 0.0), ("Y".into(), 0.0)],
        }],
        parameters: DesignParameters {
            rng_seed: 4,
            f_stop: 0.08,
            m_bad: 80,
            m_reseed: 4,
            m_reopt: 2,
            cache_bytes: 1 << 20,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut designer = spec.build().unwrap();
    designer.initialize(true).unwrap();
    let _ = designer.optimize_tubes(Env::Serial).unwrap();

    let result = designer.design_result(Env::Serial).unwrap();
    let tube = &result.results[0].tubes[0];
    let duplex = &tube.complexes[0];
    assert!(
        duplex.concentration >= 0.9 * duplex.target_concentration,
        "duplex concentration {} of target {}",
        duplex.concentration,
        duplex.target_concentration
    );
}

#[test]
fn decomposed_design_merges_up_to_the_root() {
    // A 24-nt stem is long enough to split with n_split = 8, so this runs
    // the full depth-wise merge path, not just leaf mutation.
    let spec = Specification {
        domains: vec![
            DomainSpec::new("s", "N10").unwrap(),
            DomainSpec::new("l", "AAAA").unwrap(),
        ],
        strands: vec![StrandSpec {
            name: "X".into(),
            domain_names: vec!["s".into(), "l".into(), "s*".into()],
        }],
        complexes: vec![ComplexSpec {
            name: "C".into(),
            strands: vec!["X".into()],
            structure: Some("((((((((((....))))))))))".into()),
        }],
        tubes: vec![TubeSpec { name: "T".into(), targets: vec![("C".into(), 1e-6)] }],
        parameters: DesignParameters {
            rng_seed: 6,
            f_stop: 0.08,
            n_split: 8,
            m_bad: 60,
            m_reseed: 4,
            m_reopt: 2,
            cache_bytes: 1 << 20,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut designer = spec.build().unwrap();
    designer.initialize(true).unwrap();
    assert!(designer.max_depth >= 1, "the stem must decompose");
    let best = designer.optimize_tubes(Env::Serial).unwrap();
    assert!(
        best.weighted_total() <= 0.15,
        "merged design should be close to its leaf estimate ({})",
        best.weighted_total()
    );
}

#[test]
fn checkpoint_mid_design_resumes_to_the_same_answer() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    let path = {
        let mut p = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("mtd_resume_{nanos}.json"));
        p
    };

    // Uninterrupted run.
    let mut straight = hairpin_spec(9).build().unwrap();
    straight.initialize(true).unwrap();
    straight.optimize_tubes(Env::Serial).unwrap();

    // Interrupted run: cancel at the first checkpoint callback.
    let mut interrupted = hairpin_spec(9).build().unwrap();
    interrupted.initialize(true).unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let calls_cb = calls.clone();
    let cancel = interrupted.cancel.clone();
    let save_path = path.clone();
    interrupted.checkpoint = Some(Box::new(move |d, _done| {
        if calls_cb.fetch_add(1, Ordering::Relaxed) == 2 {
            mtd_design::checkpoint::save(&save_path, d).unwrap();
            cancel.cancel();
        }
    }));
    let err = interrupted.optimize_tubes(Env::Serial).expect_err("cancelled");
    assert!(matches!(
        err.downcast_ref::<mtd_core::error::DesignError>(),
        Some(mtd_core::error::DesignError::CancellationRequested)
    ));

    // Resume and finish.
    let spec = hairpin_spec(9);
    let mut resumed = mtd_design::checkpoint::load(
        &path,
        &spec,
        std::sync::Arc::new(mtd_thermo::SyntheticKernel),
    )
    .unwrap();
    resumed.optimize_tubes(Env::Serial).unwrap();
    assert!(resumed.success());
    // Cumulative design time spans both segments.
    assert!(resumed.stats.design_time > 0.0);
    // The resumed run converges to a design as good as the straight run.
    let straight_total = straight.best.full.weighted_total();
    assert!(resumed.best.full.weighted_total() <= straight_total.max(0.06));
    let _ = std::fs::remove_file(path);
}
