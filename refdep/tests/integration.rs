//! Integration tests for refdep
//!
//! Each test drives source text through the whole pipeline:
//! - Parsing and type checking
//! - Baseline dependency analysis
//! - Harness construction, expansion and VC generation
//! - Prover-driven refinement with the bounded prover

use refdep::ast::Program;
use refdep::baseline::{AnalysisMode, BaselineAnalysis};
use refdep::config::RefineConfig;
use refdep::deps::{DepSet, Dependencies, DependencyMap};
use refdep::harness::build_all;
use refdep::inline::ExpandOptions;
use refdep::parser::parse_source;
use refdep::printer::print_program;
use refdep::prover::BoundedProver;
use refdep::refine::{LowerBound, RefineOptions, Refiner, check_dependencies};
use refdep::types::TypeChecker;

/// Helper to parse and type check a program
fn load(source: &str) -> Program {
    let program = parse_source("test.ivp", source).expect("parse");
    TypeChecker::new().check_program(&program).expect("type check");
    program
}

fn candidates(program: &Program) -> DependencyMap {
    BaselineAnalysis::new(program, AnalysisMode::DataAndControl).analyze()
}

fn single(proc: &str, entries: &[(&str, DepSet)]) -> DependencyMap {
    let deps: Dependencies = entries
        .iter()
        .map(|(o, set)| (o.to_string(), set.clone()))
        .collect();
    let mut map = DependencyMap::new();
    map.insert(proc, deps);
    map
}

fn refine(program: &Program, candidates: DependencyMap, lower_bound: LowerBound) -> DependencyMap {
    let mut prover = BoundedProver::default();
    let options = RefineOptions {
        lower_bound,
        ..RefineOptions::default()
    };
    Refiner::new(program, &mut prover, options)
        .refine_all(candidates)
        .expect("refinement")
        .dependencies
}

fn dep(map: &DependencyMap, proc: &str, output: &str) -> DepSet {
    map.get(proc)
        .and_then(|d| d.get(output))
        .cloned()
        .unwrap_or_else(|| panic!("no entry for {proc}.{output}"))
}

// ============================================
// End-to-end scenarios
// ============================================

#[test]
fn test_unused_input_is_dropped() {
    let program = load("procedure f(x: int, y: int) returns (z: int) { z := x; }");
    let refined = refine(
        &program,
        single("f", &[("z", DepSet::of(["x", "y"]))]),
        LowerBound::DataOnly,
    );
    assert_eq!(dep(&refined, "f", "z"), DepSet::of(["x"]));
}

#[test]
fn test_cancelled_global_is_dropped() {
    let program = load(
        "var g: int;
         procedure f(x: int) returns (z: int) { z := x + g - g; }",
    );
    let baseline = candidates(&program);
    assert_eq!(dep(&baseline, "f", "z"), DepSet::of(["g", "x"]));

    let refined = refine(&program, baseline, LowerBound::None);
    assert_eq!(dep(&refined, "f", "z"), DepSet::of(["x"]));
}

#[test]
fn test_cancelled_global_is_kept_by_data_only_early_exit() {
    let program = load(
        "var g: int;
         procedure f(x: int) returns (z: int) { z := x + g - g; }",
    );
    let refined = refine(&program, candidates(&program), LowerBound::DataOnly);
    assert_eq!(dep(&refined, "f", "z"), DepSet::of(["g", "x"]));
}

#[test]
fn test_external_call_is_wildcard() {
    let program = load(
        "procedure ext(a: int) returns (r: int);
         procedure f(x: int) returns (z: int) { call z := ext(x); }",
    );
    let baseline = candidates(&program);
    assert_eq!(dep(&baseline, "f", "z"), DepSet::Wildcard);

    let refined = refine(&program, baseline, LowerBound::None);
    assert_eq!(dep(&refined, "f", "z"), DepSet::Wildcard);
}

#[test]
fn test_concrete_candidate_for_external_call_becomes_wildcard() {
    let program = load(
        "procedure ext(a: int) returns (r: int);
         procedure f(x: int) returns (z: int) { call z := ext(x); }",
    );
    let refined = refine(
        &program,
        single("f", &[("z", DepSet::of(["x"]))]),
        LowerBound::None,
    );
    assert_eq!(dep(&refined, "f", "z"), DepSet::Wildcard);
}

#[test]
fn test_callee_contract_narrows_caller() {
    let program = load(
        "procedure h(a: int, b: int) returns (r: int) { r := a + b - b; }
         procedure f(x: int, y: int) returns (z: int) { call z := h(x, y); }",
    );
    let refined = refine(&program, candidates(&program), LowerBound::None);
    assert_eq!(dep(&refined, "h", "r"), DepSet::of(["a"]));
    assert_eq!(dep(&refined, "f", "z"), DepSet::of(["x"]));
}

#[test]
fn test_callee_is_abstracted_by_its_contract() {
    // The contract says `r` depends on `a` only although the body reads `b`,
    // so `{x}` can only come from the black-box call
    let program = load(
        "procedure h(a: int, b: int) returns (r: int) { r := a + b; }
         procedure f(x: int, y: int) returns (z: int) { call z := h(x, y); }",
    );
    let mut map = single("h", &[("r", DepSet::of(["a"]))]);
    map.join_missing(&single("f", &[("z", DepSet::of(["x", "y"]))]));

    let mut prover = BoundedProver::default();
    let options = RefineOptions {
        lower_bound: LowerBound::None,
        ..RefineOptions::default()
    };
    let report = Refiner::new(&program, &mut prover, options)
        .refine_procedure(&mut map, "f")
        .expect("refinement");
    assert!(!report.skipped);
    assert_eq!(dep(&map, "f", "z"), DepSet::of(["x"]));
    assert_eq!(dep(&map, "h", "r"), DepSet::of(["a"]));
}

#[test]
fn test_guarded_dependency_beyond_default_domain_is_kept() {
    let program = load(
        "procedure f(x: int, y: int) returns (z: int) {
           if (x > 5) { z := y; } else { z := 0; }
         }",
    );
    let refined = refine(
        &program,
        single("f", &[("z", DepSet::of(["x", "y"]))]),
        LowerBound::None,
    );
    assert_eq!(dep(&refined, "f", "z"), DepSet::of(["x", "y"]));
}

// ============================================
// Properties
// ============================================

#[test]
fn test_refinement_stays_within_candidates() {
    let program = load(
        "var g: int;
         procedure f(x: int, y: int, c: int) returns (z: int, w: int)
           modifies g;
         {
           if (c > 0) { z := x; } else { z := x + y - y; }
           w := y * 0;
           g := g + x - x;
         }",
    );
    let baseline = candidates(&program);
    let refined = refine(&program, baseline.clone(), LowerBound::None);

    for (output, set) in refined.get("f").expect("f").iter() {
        let prior = baseline.get("f").and_then(|d| d.get(output)).expect("prior");
        let prior_vars = prior.vars().expect("concrete baseline");
        assert!(set.is_subset_of(prior_vars), "{output}: {set} is not within {prior}");
    }
    assert_eq!(dep(&refined, "f", "z"), DepSet::of(["x"]));
    assert_eq!(dep(&refined, "f", "w"), DepSet::empty());
    assert_eq!(dep(&refined, "f", "g"), DepSet::of(["g"]));
}

#[test]
fn test_refinement_is_reproducible() {
    let program = load(
        "procedure h(a: int, b: int) returns (r: int) { r := a + b - b; }
         procedure f(x: int, y: int) returns (z: int, w: int) { call z := h(x, y); w := x + y; }",
    );
    let first = refine(&program, candidates(&program), LowerBound::None);
    let second = refine(&program, candidates(&program), LowerBound::None);
    assert_eq!(first, second);
    assert_eq!(dep(&first, "f", "w"), DepSet::of(["x", "y"]));
}

// ============================================
// Supplementary workflows
// ============================================

#[test]
fn test_harness_file_round_trip() {
    let program = load(
        "procedure f(x: int, y: int) returns (z: int) { z := y; }
         procedure g(a: int) returns (b: int) { call b := f(a, a); }",
    );
    let (with_harnesses, harnesses) =
        build_all(&program, &single("f", &[("z", DepSet::of(["x", "y"]))])).expect("harnesses");
    assert_eq!(harnesses.len(), 2);

    let text = print_program(&with_harnesses);
    let reparsed = load(&text);
    let mut prover = BoundedProver::default();
    let map = check_dependencies(&reparsed, &mut prover, ExpandOptions::default()).expect("checked");
    assert_eq!(dep(&map, "f", "z"), DepSet::of(["y"]));
    // `g` had no candidates, so its harness has no outputs
    assert_eq!(map.get("g").map(Dependencies::len), Some(0));
}

#[test]
fn test_reused_summary_for_external_call() {
    let program = load(
        "procedure ext(a: int, b: int) returns (r: int);
         procedure f(x: int, y: int) returns (z: int) { call z := ext(x, y); }",
    );
    let reuse = DependencyMap::from_json(r#"{ "ext": { "r": ["a"] } }"#).expect("json");
    let mut baseline = BaselineAnalysis::new(&program, AnalysisMode::DataAndControl)
        .with_known(reuse.clone())
        .analyze();
    baseline.overlay(&reuse);

    let mut prover = BoundedProver::default();
    let report = Refiner::new(&program, &mut prover, RefineOptions::default())
        .with_reuse(reuse)
        .refine_all(baseline)
        .expect("refinement");
    assert_eq!(dep(&report.dependencies, "f", "z"), DepSet::of(["x"]));

    let json = report.dependencies.to_json().expect("json");
    let back = DependencyMap::from_json(&json).expect("json");
    assert_eq!(back, report.dependencies);
}

#[test]
fn test_default_config_requires_z3() {
    let mut config = RefineConfig::default();
    config.prover.z3_path = "/nonexistent/z3".to_string();
    assert!(config.make_prover().is_err());
}

#[test]
fn test_configured_pipeline() {
    let config = RefineConfig::from_toml(
        r#"
        [prover]
        backend = "bounded"

        [refine]
        lower_bound = "none"
        "#,
    )
    .expect("config");
    let program = load(
        "procedure f(x: int, y: int) returns (z: int) {
           var i: int;
           i, z := 0, x;
           while (i < 2) { z := z + y - y; i := i + 1; }
         }",
    );
    let mut prover = config.make_prover().expect("prover");
    let report = Refiner::new(&program, prover.as_mut(), config.refine_options())
        .refine_all(candidates(&program))
        .expect("refinement");
    assert_eq!(dep(&report.dependencies, "f", "z"), DepSet::of(["x"]));
    insta::assert_snapshot!(report.to_string(), @r###"
    RefinedDependency[f] = [
      z -> {x}
    ]
    "###);
}
