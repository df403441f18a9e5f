// crates/mtd-design/tests/tubes.rs

//! Tube equilibrium and defect behavior on a monomer/dimer system.

use mtd_core::exec::Env;
use mtd_design::granularity::{EnsembleLevelSpec, EnsemblePartition};
use mtd_design::sequences::{DomainSpec, StrandSpec};
use mtd_design::spec::{ComplexSpec, Specification, TubeSpec};
use mtd_design::Designer;

/// Two strands designed to duplex, plus their monomer off-targets.
fn duplex_spec() -> Specification {
    Specification {
        domains: vec![DomainSpec::new("a", "GCCGGCGC").unwrap()],
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
        parameters: mtd_design::DesignParameters {
            rng_seed: 3,
            cache_bytes: 1 << 20,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn built() -> Designer {
    let mut designer = duplex_spec().build().unwrap();
    designer.initialize(true).unwrap();
    designer
}

#[test]
fn equilibrium_conserves_strand_mass() {
    let designer = built();
    let all = EnsemblePartition::all();
    let none = EnsembleLevelSpec::default();
    let log_pfuncs =
        designer.design.log_pfuncs(Env::Serial, 0, &all, &none).unwrap();
    let tube = &designer.design.tubes[0];
    let concs = tube.concentrations(&log_pfuncs, &all).unwrap();

    let water = tube.model.water_molarity();
    let n_strands = tube.stoichiometry[0].len();
    for i in 0..n_strands {
        let mass: f64 = tube
            .stoichiometry
            .iter()
            .zip(&concs)
            .map(|(row, &c)| row[i] * c / water)
            .sum();
        let want: f64 = tube
            .stoichiometry
            .iter()
            .zip(&tube.targets)
            .map(|(row, t)| row[i] * t.target_conc / water)
            .sum();
        assert!(
            (mass.ln() - want.ln()).abs() < 1e-6,
            "strand {i}: mass {mass} vs target {want}"
        );
    }
}

#[test]
fn strong_duplex_dominates_the_tube() {
    let designer = built();
    let all = EnsemblePartition::all();
    let none = EnsembleLevelSpec::default();
    let log_pfuncs =
        designer.design.log_pfuncs(Env::Serial, 0, &all, &none).unwrap();
    let tube = &designer.design.tubes[0];
    let concs = tube.concentrations(&log_pfuncs, &all).unwrap();
    assert!(
        concs[0] > 0.9e-6,
        "a perfectly complementary duplex should form ({:?})",
        concs
    );
}

#[test]
fn passive_members_are_deflated_and_reinflated_as_zero() {
    let designer = built();
    // XY active, monomers passive.
    let part = EnsemblePartition::new(vec![true, false, false], 0.01);
    let none = EnsembleLevelSpec::default();
    let log_pfuncs =
        designer.design.log_pfuncs(Env::Serial, 0, &part, &none).unwrap();
    let tube = &designer.design.tubes[0];
    let concs = tube.concentrations(&log_pfuncs, &part).unwrap();
    assert_eq!(concs.len(), 3);
    assert!(concs[0] > 0.0);
    assert_eq!(concs[1], 0.0);
    assert_eq!(concs[2], 0.0);
}

#[test]
fn all_passive_partition_has_zero_focused_defect() {
    let designer = built();
    let part = EnsemblePartition::new(vec![false, false, false], 0.01);
    let none = EnsembleLevelSpec::default();
    let log_pfuncs =
        designer.design.log_pfuncs(Env::Serial, 0, &part, &none).unwrap();
    let defects = designer.design.complex_defects(Env::Serial, 0, &part, &none).unwrap();
    let tube = &designer.design.tubes[0];
    let d = tube.normalized_defect(&log_pfuncs, &defects, &part, None).unwrap();
    assert_eq!(d.total(), 0.0);
}

#[test]
fn refocus_activates_at_least_one_passive_complex() {
    let mut designer = built();
    designer.psi = EnsemblePartition::new(vec![true, false, false], designer.psi.deflate);
    let seq = designer.design.sequence().clone();
    let before = designer.psi.num_active();
    designer.refocus(Env::Serial, &seq).unwrap();
    assert!(designer.psi.num_active() > before);
    assert_eq!(designer.stats.offtargets_added_per_refocus.len(), 1);
}
