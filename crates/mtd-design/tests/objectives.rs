// crates/mtd-design/tests/objectives.rs

//! Sequence-only objectives evaluated on fixed designs.

use mtd_core::exec::Env;
use mtd_core::types::Sequence;
use mtd_design::granularity::EnsemblePartition;
use mtd_design::objectives::{
    EnergyEqualizationObjective, Objective, PatternObjective, SimilarityObjective, SsmObjective,
};
use mtd_design::sequences::{DomainSpec, StrandSpec};
use mtd_design::spec::{ComplexSpec, Specification, TubeSpec};
use mtd_design::Designer;

/// Two fixed, unrelated strands that happen to share their 6-mer content.
fn shared_kmer_spec() -> Specification {
    Specification {
        domains: vec![
            DomainSpec::new("a", "ACGTAC").unwrap(),
            DomainSpec::new("b", "ACGTAC").unwrap(),
        ],
        strands: vec![
            StrandSpec { name: "X".into(), domain_names: vec!["a".into()] },
            StrandSpec { name: "Y".into(), domain_names: vec!["b".into()] },
        ],
        complexes: vec![
            ComplexSpec { name: "CX".into(), strands: vec!["X".into()], structure: None },
            ComplexSpec { name: "CY".into(), strands: vec!["Y".into()], structure: None },
        ],
        tubes: vec![TubeSpec {
            name: "T".into(),
            targets: vec![("CX".into(), 1e-6), ("CY".into(), 1e-6)],
        }],
        parameters: mtd_design::DesignParameters { rng_seed: 2, ..Default::default() },
        ..Default::default()
    }
}

fn built(mut spec: Specification, objectives: Vec<Objective>) -> Designer {
    spec.objectives = objectives;
    let mut designer = spec.build().unwrap();
    designer.initialize(true).unwrap();
    designer
}

fn evaluate(designer: &Designer) -> Vec<f64> {
    designer
        .evaluate_objectives(Env::Serial, 0, &EnsemblePartition::all())
        .unwrap()
        .defects
        .iter()
        .map(mtd_core::defect::Defect::total)
        .collect()
}

#[test]
fn ssm_counts_unrelated_reuse() {
    let designer = built(
        shared_kmer_spec(),
        vec![Objective::Ssm(SsmObjective::new(
            vec!["CX".into(), "CY".into()],
            6,
        ))],
    );
    let totals = evaluate(&designer);
    // The shared hexamer is a violation in its own bucket and (both
    // windows being unpaired in their targets) in its reverse-complement
    // bucket: 2 violations over 2 distinct windows.
    assert!((totals[0] - 1.0).abs() < 1e-9, "got {totals:?}");
}

#[test]
fn ssm_ignores_constraint_related_copies() {
    // The same domain reused in two complexes is *related*: its copies
    // share variables, so no violation is charged.
    let mut spec = shared_kmer_spec();
    spec.strands[1].domain_names = vec!["a".into()];
    let designer = built(
        spec,
        vec![Objective::Ssm(SsmObjective::new(
            vec!["CX".into(), "CY".into()],
            6,
        ))],
    );
    let totals = evaluate(&designer);
    assert!(totals[0].abs() < 1e-9, "got {totals:?}");
}

#[test]
fn pattern_objective_charges_each_occurrence() {
    let mut spec = shared_kmer_spec();
    spec.domains = vec![
        DomainSpec::new("a", "GGGGAC").unwrap(),
        DomainSpec::new("b", "ACACAC").unwrap(),
    ];
    let designer = built(
        spec,
        vec![Objective::Pattern(PatternObjective::new(
            vec!["X".into(), "Y".into()],
            vec![Sequence::parse("GGGG").unwrap()],
        ))],
    );
    let totals = evaluate(&designer);
    // One hit among 3 + 3 = 6 windows.
    assert!((totals[0] - 1.0 / 6.0).abs() < 1e-9, "got {totals:?}");
}

#[test]
fn similarity_objective_flags_out_of_band_elements() {
    let spec = shared_kmer_spec();
    let designer = built(
        spec,
        // The fixed sequence matches its own reference 100%, above the band.
        vec![Objective::Similarity(SimilarityObjective::new(
            vec!["X".into()],
            vec![Sequence::parse("ACGTAC").unwrap()],
            vec![(0.1, 0.5)],
        ))],
    );
    let totals = evaluate(&designer);
    assert!(totals[0] > 0.0, "full match must be flagged, got {totals:?}");

    let designer = built(
        shared_kmer_spec(),
        // One mismatching reference position: 5/6 matches, in band.
        vec![Objective::Similarity(SimilarityObjective::new(
            vec!["X".into()],
            vec![Sequence::parse("ACGTAA").unwrap()],
            vec![(0.5, 0.9)],
        ))],
    );
    let totals = evaluate(&designer);
    assert!(totals[0].abs() < 1e-12, "in-band match is free, got {totals:?}");
}

#[test]
fn energy_equalization_prefers_matched_stems() {
    // Two domains with very different duplex strengths.
    let mut spec = shared_kmer_spec();
    spec.domains = vec![
        DomainSpec::new("a", "GCGCGC").unwrap(),
        DomainSpec::new("b", "ATATAT").unwrap(),
    ];
    let designer = built(
        spec,
        vec![Objective::EnergyEqualization(EnergyEqualizationObjective::new(
            vec!["a".into(), "b".into()],
            None,
        ))],
    );
    let unequal = evaluate(&designer)[0];

    let mut spec = shared_kmer_spec();
    spec.domains = vec![
        DomainSpec::new("a", "GCGCGC").unwrap(),
        DomainSpec::new("b", "GCGCGC").unwrap(),
    ];
    let designer = built(
        spec,
        vec![Objective::EnergyEqualization(EnergyEqualizationObjective::new(
            vec!["a".into(), "b".into()],
            None,
        ))],
    );
    let equal = evaluate(&designer)[0];

    assert!(equal < unequal, "equalized stems {equal} vs mismatched {unequal}");
}

#[test]
fn objective_weights_scale_the_total() {
    let mut spec = shared_kmer_spec();
    spec.objective_weights = vec![2.0];
    let designer = built(
        spec,
        vec![Objective::Ssm(SsmObjective::new(
            vec!["CX".into(), "CY".into()],
            6,
        ))],
    );
    let candidate = designer
        .evaluate_objectives(Env::Serial, 0, &EnsemblePartition::all())
        .unwrap();
    assert!((candidate.weighted_total() - 2.0 * candidate.total(0)).abs() < 1e-12);
    assert!(candidate.total(0) > 0.0);
}
