//! Checking programs that already contain harnesses
//!
//! Every procedure tagged `checkDependency` is analyzed as it stands, with
//! its guards recovered from the metadata table. This is how a printed
//! `.CD.ivp` program is checked after it has been parsed back.

use super::RefineError;
use super::driver::guard_terms;
use super::engine::MinimizationEngine;
use crate::ast::Program;
use crate::callgraph::CallGraph;
use crate::deps::{Dependencies, DependencyMap};
use crate::error::CompileError;
use crate::guard::{GuardRole, guards_of};
use crate::harness::prepare_target;
use crate::inline::{ExpandOptions, expand_in_place};
use crate::prover::ProverOracle;
use crate::types::TypeChecker;
use crate::vcgen::VcGen;

/// Analyze every harness in `program`. Outputs whose analysis is
/// inconsistent are left out of the result.
pub fn check_dependencies<P: ProverOracle + ?Sized>(
    program: &Program,
    prover: &mut P,
    options: ExpandOptions,
) -> Result<DependencyMap, RefineError> {
    let harnesses: Vec<(String, String)> = program
        .procedures()
        .filter_map(|p| {
            program
                .check_dependency_target(&p.name)
                .map(|t| (p.name.clone(), t.to_string()))
        })
        .collect();
    tracing::info!(harnesses = harnesses.len(), "checking dependencies");

    let mut result = DependencyMap::new();
    for (harness, target) in harnesses {
        if program.procedure(&target).is_none() {
            return Err(RefineError::UnknownProcedure(target));
        }
        let mut scratch = program.clone();
        prepare_target(&mut scratch, &target)?;
        let call_graph = CallGraph::build(&scratch);
        let malformed = |source: CompileError| RefineError::MalformedHarness {
            procedure: target.clone(),
            source,
        };
        TypeChecker::new().check_program(&scratch).map_err(malformed)?;
        expand_in_place(&mut scratch, &harness, &call_graph, options).map_err(malformed)?;
        TypeChecker::new().check_program(&scratch).map_err(malformed)?;

        let mut vcgen = VcGen::initialize(&scratch);
        let vc = vcgen.generate(&scratch, &harness)?;
        let inputs = guard_terms(&vcgen, &guards_of(&scratch, &target, GuardRole::Input))?;
        let outputs = guard_terms(&vcgen, &guards_of(&scratch, &target, GuardRole::Output))?;

        let mut engine = MinimizationEngine::new(&mut *prover, &scratch);
        let mut deps = Dependencies::new();
        for output in &outputs {
            let analysis = engine.analyze_output(&vc, output, &inputs, &outputs);
            match analysis.dep_set() {
                Some(set) => deps.insert(output.guard.variable.clone(), set),
                None => tracing::warn!(
                    procedure = %target,
                    output = %output.guard.variable,
                    %analysis,
                    "output left out"
                ),
            }
        }
        tracing::debug!(harness = %harness, queries = engine.queries(), "checked harness");
        vcgen.finalize();
        result.insert(target, deps);
    }
    Ok(result)
}
