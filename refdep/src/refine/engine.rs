//! Unsat-core minimization
//!
//! For output guard `o` with input guards `I` and output guards `O`:
//!
//! 1. `newVC = (!O\{o} && o) ==> VC`. If `I ==> newVC` is not valid the
//!    output is nondeterministic (invalid) or unknown (inconclusive).
//! 2. The core of `[!newVC] ++ I` names a sufficient subset `S` of `I`.
//! 3. Each element of `S`, in core order, is dropped if `S ==> newVC`
//!    stays valid without it. One pass, so `S` is locally minimal.
//! 4. Surviving guards map back to their variables.

use std::collections::BTreeSet;
use std::fmt;

use crate::ast::Program;
use crate::deps::DepSet;
use crate::guard::{Guard, guard_owner};
use crate::prover::{ProverOracle, ProverOutcome};
use crate::smt::Term;

/// A guard constant and its formula-level representative
#[derive(Debug, Clone)]
pub struct GuardTerm {
    pub guard: Guard,
    pub term: Term,
}

/// What the engine concluded about one output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputAnalysis {
    /// Determined by exactly these read-set variables
    Determined(BTreeSet<String>),
    /// Not determined even by the full read-set
    Nondeterministic,
    /// The prover gave no answer
    Inconclusive(ProverOutcome),
    /// Prover answers contradict each other; the prior estimate stands
    Inconsistent(String),
}

impl OutputAnalysis {
    /// Dependency set to record, `None` to keep the prior one
    pub fn dep_set(&self) -> Option<DepSet> {
        match self {
            OutputAnalysis::Determined(vars) => Some(DepSet::Vars(vars.clone())),
            OutputAnalysis::Nondeterministic | OutputAnalysis::Inconclusive(_) => Some(DepSet::Wildcard),
            OutputAnalysis::Inconsistent(_) => None,
        }
    }
}

impl fmt::Display for OutputAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputAnalysis::Determined(vars) => write!(f, "{}", DepSet::Vars(vars.clone())),
            OutputAnalysis::Nondeterministic => write!(f, "nondeterministic"),
            OutputAnalysis::Inconclusive(outcome) => write!(f, "inconclusive ({outcome})"),
            OutputAnalysis::Inconsistent(reason) => write!(f, "inconsistent ({reason})"),
        }
    }
}

pub struct MinimizationEngine<'a, P: ProverOracle + ?Sized> {
    prover: &'a mut P,
    program: &'a Program,
    queries: usize,
}

impl<'a, P: ProverOracle + ?Sized> MinimizationEngine<'a, P> {
    /// `program` must declare every guard passed to [`Self::analyze_output`]
    pub fn new(prover: &'a mut P, program: &'a Program) -> Self {
        Self {
            prover,
            program,
            queries: 0,
        }
    }

    /// Prover queries issued so far
    pub fn queries(&self) -> usize {
        self.queries
    }

    fn validity(&mut self, formula: &Term) -> ProverOutcome {
        self.queries += 1;
        self.prover.check_validity(formula)
    }

    pub fn analyze_output(
        &mut self,
        vc: &Term,
        output: &GuardTerm,
        inputs: &[GuardTerm],
        outputs: &[GuardTerm],
    ) -> OutputAnalysis {
        let procedure = output.guard.procedure.as_str();
        let variable = output.guard.variable.as_str();

        // Step 1: feasibility under full pairing
        let mut selected: Vec<Term> = outputs
            .iter()
            .filter(|o| o.guard.name != output.guard.name)
            .map(|o| Term::not(o.term.clone()))
            .collect();
        selected.push(output.term.clone());
        let new_vc = Term::implies(Term::and(selected), vc.clone());
        let all_inputs = Term::and(inputs.iter().map(|i| i.term.clone()).collect());

        let feasibility = self.validity(&Term::implies(all_inputs, new_vc.clone()));
        if feasibility.is_inconclusive() {
            tracing::warn!(procedure, output = variable, outcome = %feasibility, "feasibility check inconclusive");
            return OutputAnalysis::Inconclusive(feasibility);
        }
        if let ProverOutcome::Invalid(cex) = feasibility {
            tracing::info!(procedure, output = variable, counterexample = %cex, "output is nondeterministic");
            return OutputAnalysis::Nondeterministic;
        }

        // Step 2: core extraction, the negated VC at index 0
        let mut assumptions = Vec::with_capacity(inputs.len() + 1);
        assumptions.push(Term::not(new_vc.clone()));
        assumptions.extend(inputs.iter().map(|i| i.term.clone()));
        self.queries += 1;
        let result = self.prover.check_assumptions(&assumptions);

        let mut core: Vec<usize> = match result.outcome {
            ProverOutcome::Valid => {
                if !result.core.contains(&0) {
                    let reason = format!("unsat core {:?} lacks the negated VC", result.core);
                    tracing::error!(procedure, output = variable, %reason, "internal consistency failure");
                    return OutputAnalysis::Inconsistent(reason);
                }
                let mut picked = Vec::new();
                for &i in &result.core {
                    match i {
                        0 => {}
                        i if i <= inputs.len() => picked.push(i - 1),
                        i => {
                            let reason = format!("unsat core index {i} out of range");
                            tracing::error!(procedure, output = variable, %reason, "internal consistency failure");
                            return OutputAnalysis::Inconsistent(reason);
                        }
                    }
                }
                picked.sort_unstable();
                picked.dedup();
                picked
            }
            ProverOutcome::Invalid(_) => {
                let reason = "assumptions satisfiable after a valid feasibility check".to_string();
                tracing::error!(procedure, output = variable, %reason, "internal consistency failure");
                return OutputAnalysis::Inconsistent(reason);
            }
            outcome => {
                // The full read-set is known to suffice
                tracing::warn!(procedure, output = variable, %outcome, "core extraction inconclusive, shrinking the full read-set");
                (0..inputs.len()).collect()
            }
        };

        // Step 3: greedy one-pass shrink
        let initial = core.clone();
        for candidate in initial {
            let remaining: Vec<usize> = core.iter().copied().filter(|&i| i != candidate).collect();
            let premise = Term::and(remaining.iter().map(|&i| inputs[i].term.clone()).collect());
            if self.validity(&Term::implies(premise, new_vc.clone())).is_valid() {
                core = remaining;
            }
        }

        // Step 4: name recovery
        let mut vars = BTreeSet::new();
        for &i in &core {
            match guard_owner(self.program, &inputs[i].guard.name) {
                Some((_, var)) => {
                    vars.insert(var);
                }
                None => {
                    let reason = format!("guard `{}` has no owner", inputs[i].guard.name);
                    tracing::error!(procedure, output = variable, %reason, "internal consistency failure");
                    return OutputAnalysis::Inconsistent(reason);
                }
            }
        }
        tracing::debug!(procedure, output = variable, deps = ?vars, "output determined");
        OutputAnalysis::Determined(vars)
    }
}
