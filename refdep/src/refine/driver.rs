//! Refinement rounds
//!
//! One round for procedure `P`: seed a missing entry from the syntactic
//! baseline, join the candidate map with the lower bound, skip `P` if no output can shrink, otherwise build `P`'s harness in
//! a scratch copy of the program, contract everything the harness reaches,
//! expand, generate the VC and minimize every output. Only `P`'s entry of
//! the candidate map changes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::RefineError;
use super::contracts::attach_all;
use super::engine::{GuardTerm, MinimizationEngine, OutputAnalysis};
use crate::ast::Program;
use crate::baseline::{AnalysisMode, BaselineAnalysis};
use crate::callgraph::CallGraph;
use crate::deps::{DepSet, Dependencies, DependencyMap};
use crate::error::CompileError;
use crate::guard::Guard;
use crate::harness::{RECURSION_DEPTH, build_harness, prepare_target};
use crate::inline::{ExpandOptions, expand_in_place};
use crate::prover::ProverOracle;
use crate::types::TypeChecker;
use crate::vcgen::VcGen;

/// Map used to decide that a procedure cannot be improved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LowerBound {
    /// Data-only baseline analysis
    #[default]
    DataOnly,
    /// Never skip a procedure
    None,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RefineOptions {
    pub expand: ExpandOptions,
    pub lower_bound: LowerBound,
}

/// What happened to one procedure in one round
#[derive(Debug, Clone)]
pub struct ProcedureReport {
    pub procedure: String,
    /// No output could shrink, so no harness was built
    pub skipped: bool,
    pub outputs: BTreeMap<String, OutputAnalysis>,
    pub queries: usize,
}

impl ProcedureReport {
    fn skipped(procedure: &str) -> Self {
        Self {
            procedure: procedure.to_string(),
            skipped: true,
            outputs: BTreeMap::new(),
            queries: 0,
        }
    }
}

impl fmt::Display for ProcedureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skipped {
            return write!(f, "{}: skipped", self.procedure);
        }
        write!(f, "{}: {} queries", self.procedure, self.queries)?;
        for (output, analysis) in &self.outputs {
            write!(f, "\n  {output}: {analysis}")?;
        }
        Ok(())
    }
}

/// Result of refining a whole program
#[derive(Debug, Clone, Default)]
pub struct RefinementReport {
    pub dependencies: DependencyMap,
    /// Rounds in the order they ran
    pub rounds: Vec<ProcedureReport>,
}

impl RefinementReport {
    pub fn queries(&self) -> usize {
        self.rounds.iter().map(|r| r.queries).sum()
    }
}

impl fmt::Display for RefinementReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dependencies)
    }
}

/// Refinement session over one program
pub struct Refiner<'a, P: ProverOracle + ?Sized> {
    program: &'a Program,
    prover: &'a mut P,
    options: RefineOptions,
    /// Summaries taken as given and never refined
    reuse: DependencyMap,
    lower: Option<DependencyMap>,
}

impl<'a, P: ProverOracle + ?Sized> Refiner<'a, P> {
    pub fn new(program: &'a Program, prover: &'a mut P, options: RefineOptions) -> Self {
        let mut refiner = Self {
            program,
            prover,
            options,
            reuse: DependencyMap::new(),
            lower: None,
        };
        refiner.lower = refiner.lower_bound(&DependencyMap::new());
        refiner
    }

    /// Take `reuse` as the final summary of every procedure it names
    pub fn with_reuse(mut self, reuse: DependencyMap) -> Self {
        self.reuse = reuse;
        self.lower = self.lower_bound(&DependencyMap::new());
        self
    }

    fn lower_bound(&self, settled: &DependencyMap) -> Option<DependencyMap> {
        match self.options.lower_bound {
            LowerBound::None => None,
            LowerBound::DataOnly => {
                let mut known = settled.clone();
                known.overlay(&self.reuse);
                Some(
                    BaselineAnalysis::new(self.program, AnalysisMode::DataOnly)
                        .with_known(known)
                        .analyze(),
                )
            }
        }
    }

    /// Outputs whose candidate set is larger than the lower bound
    fn potential(&self, procedure: &str, current: &Dependencies) -> usize {
        let lower = self.lower.as_ref().and_then(|l| l.get(procedure));
        current
            .iter()
            .filter(|(output, set)| {
                let Some(len) = set.len() else {
                    return false;
                };
                match lower.map(|l| l.get(output)) {
                    // Without a lower bound every concrete output may shrink
                    None | Some(None) => len > 0,
                    Some(Some(bound)) => bound.len().is_some_and(|b| len > b),
                }
            })
            .count()
    }

    /// Refine `procedure`'s entry of `deps`
    pub fn refine_procedure(
        &mut self,
        deps: &mut DependencyMap,
        procedure: &str,
    ) -> Result<ProcedureReport, RefineError> {
        let program = self.program;
        let proc = program
            .procedure(procedure)
            .ok_or_else(|| RefineError::UnknownProcedure(procedure.to_string()))?;
        if proc.body.is_none() {
            return Err(RefineError::NoBody(procedure.to_string()));
        }

        if deps.get(procedure).is_none() {
            tracing::warn!(procedure, "no candidate dependencies, starting from the baseline");
            let mut known = deps.clone();
            known.overlay(&self.reuse);
            let baseline = BaselineAnalysis::new(program, AnalysisMode::DataAndControl)
                .with_known(known)
                .analyze();
            if let Some(entry) = baseline.get(procedure) {
                deps.insert(procedure, entry.clone());
            }
        }
        if let Some(lower) = &self.lower {
            deps.join_missing(lower);
        }
        let mut current = deps.get(procedure).cloned().unwrap_or_default();
        current.prune(program, proc);

        let potential = self.potential(procedure, &current);
        if potential == 0 {
            tracing::info!(procedure, "no output can be refined, skipping");
            deps.insert(procedure, current);
            return Ok(ProcedureReport::skipped(procedure));
        }

        let read_set = current.read_set(program, proc);
        let mod_set: Vec<String> = current
            .mod_set(program, proc)
            .into_iter()
            .filter(|o| current.get(o).is_some_and(|s| !s.is_wildcard()))
            .collect();
        tracing::info!(
            procedure,
            potential,
            reads = read_set.len(),
            mods = mod_set.len(),
            "refining procedure"
        );

        let mut scratch = program.clone();
        prepare_target(&mut scratch, procedure)?;
        let mut call_graph = CallGraph::build(&scratch);
        let harness = build_harness(&mut scratch, &mut call_graph, procedure, &read_set, &mod_set)
            .map_err(|source| malformed(procedure, source))?;

        let reachable = call_graph.reachable_from(&harness.name);
        let contracts = attach_all(&mut scratch, deps, reachable.iter().map(String::as_str))
            .map_err(|source| malformed(procedure, source))?;
        tracing::debug!(procedure, contracts, callees = reachable.len(), "attached dependency contracts");

        check(&scratch).map_err(|source| malformed(procedure, source))?;
        let expanded = expand_in_place(&mut scratch, &harness.name, &call_graph, self.options.expand)
            .map_err(|source| malformed(procedure, source))?;
        check(&scratch).map_err(|source| malformed(procedure, source))?;
        tracing::debug!(
            procedure,
            inlined = expanded.inlined_calls,
            abstracted = expanded.abstracted_calls,
            "expanded harness"
        );

        let mut vcgen = VcGen::initialize(&scratch);
        let vc = vcgen.generate(&scratch, &harness.name)?;
        let inputs = guard_terms(&vcgen, &harness.input_guards)?;
        let outputs = guard_terms(&vcgen, &harness.output_guards)?;

        let mut engine = MinimizationEngine::new(&mut *self.prover, &scratch);
        let mut report = ProcedureReport {
            procedure: procedure.to_string(),
            skipped: false,
            outputs: BTreeMap::new(),
            queries: 0,
        };
        let mut refined = current.clone();
        for output in &outputs {
            let analysis = engine.analyze_output(&vc, output, &inputs, &outputs);
            let variable = output.guard.variable.clone();
            match analysis.dep_set() {
                Some(set) => {
                    if let (DepSet::Wildcard, Some(prior)) = (&set, current.get(&variable)) {
                        tracing::info!(procedure, output = %variable, prior = %prior, "output widened to wildcard");
                    }
                    refined.insert(variable.clone(), set);
                }
                None => {
                    tracing::warn!(procedure, output = %variable, "keeping prior dependency estimate");
                }
            }
            report.outputs.insert(variable, analysis);
        }
        report.queries = engine.queries();
        vcgen.finalize();

        deps.insert(procedure, refined);
        Ok(report)
    }

    /// Refine every procedure with a body, callees before callers.
    ///
    /// A cyclic component is refined again until no member changes, at most
    /// [`RECURSION_DEPTH`] times.
    pub fn refine_all(&mut self, candidates: DependencyMap) -> Result<RefinementReport, RefineError> {
        let program = self.program;
        let mut deps = candidates;
        deps.overlay(&self.reuse);
        let mut settled = DependencyMap::new();
        let mut rounds = Vec::new();

        let call_graph = CallGraph::build(program);
        for component in call_graph.components_callee_first() {
            let targets: Vec<&str> = component
                .iter()
                .map(String::as_str)
                .filter(|p| {
                    program.procedure(p).is_some_and(|p| p.body.is_some()) && !self.reuse.contains(p)
                })
                .collect();
            if targets.is_empty() {
                continue;
            }
            let cyclic = component.len() > 1 || call_graph.is_recursive(&component[0]);
            let limit = if cyclic { RECURSION_DEPTH } else { 1 };

            for round in 1..=limit {
                let before: Vec<Option<Dependencies>> =
                    targets.iter().map(|p| deps.get(p).cloned()).collect();
                for &target in &targets {
                    rounds.push(self.refine_procedure(&mut deps, target)?);
                }
                let stable = targets
                    .iter()
                    .zip(&before)
                    .all(|(p, prior)| deps.get(p) == prior.as_ref());
                if cyclic {
                    tracing::debug!(component = ?targets, round, stable, "refined cyclic component");
                }
                if stable {
                    break;
                }
            }

            for &target in &targets {
                if let Some(d) = deps.get(target) {
                    settled.insert(target, d.clone());
                }
            }
            self.lower = self.lower_bound(&settled);
        }

        Ok(RefinementReport {
            dependencies: deps,
            rounds,
        })
    }
}

fn malformed(procedure: &str, source: CompileError) -> RefineError {
    RefineError::MalformedHarness {
        procedure: procedure.to_string(),
        source,
    }
}

fn check(program: &Program) -> crate::Result<()> {
    TypeChecker::new().check_program(program)
}

pub(super) fn guard_terms(vcgen: &VcGen, guards: &[Guard]) -> Result<Vec<GuardTerm>, RefineError> {
    guards
        .iter()
        .map(|g| {
            let term = vcgen
                .lookup_constant(&g.name)
                .cloned()
                .ok_or_else(|| RefineError::MissingGuard(g.name.clone()))?;
            Ok(GuardTerm {
                guard: g.clone(),
                term,
            })
        })
        .collect()
}
