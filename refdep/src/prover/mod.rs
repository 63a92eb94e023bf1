//! Theorem-prover oracles
//!
//! The refinement engine only needs two questions answered: is a formula
//! valid, and which of a list of assumptions are jointly unsatisfiable.
//! [`Z3Solver`] asks an external `z3` process; [`BoundedProver`] searches a
//! small integer domain in process.

mod bounded;
mod z3;

pub use bounded::BoundedProver;
pub use z3::Z3Solver;

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::smt::Term;

/// Assignment falsifying a formula
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counterexample {
    pub assignments: BTreeMap<String, String>,
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.assignments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name} = {value}")?;
        }
        Ok(())
    }
}

/// Outcome of a validity query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProverOutcome {
    Valid,
    Invalid(Counterexample),
    OutOfMemory,
    TimedOut,
    Undetermined,
}

impl ProverOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ProverOutcome::Valid)
    }

    /// Resource exhaustion or no answer
    pub fn is_inconclusive(&self) -> bool {
        matches!(
            self,
            ProverOutcome::OutOfMemory | ProverOutcome::TimedOut | ProverOutcome::Undetermined
        )
    }
}

impl fmt::Display for ProverOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProverOutcome::Valid => write!(f, "valid"),
            ProverOutcome::Invalid(_) => write!(f, "invalid"),
            ProverOutcome::OutOfMemory => write!(f, "out of memory"),
            ProverOutcome::TimedOut => write!(f, "timed out"),
            ProverOutcome::Undetermined => write!(f, "undetermined"),
        }
    }
}

/// Outcome of an assumption query. `Valid` means the conjunction of the
/// assumptions is unsatisfiable, and `core` then holds indices into the
/// assumption list of an unsatisfiable subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumptionResult {
    pub outcome: ProverOutcome,
    pub core: Vec<usize>,
}

impl AssumptionResult {
    pub fn unsat(core: Vec<usize>) -> Self {
        Self {
            outcome: ProverOutcome::Valid,
            core,
        }
    }

    pub fn other(outcome: ProverOutcome) -> Self {
        Self {
            outcome,
            core: Vec::new(),
        }
    }
}

/// Solver process failures
#[derive(Debug, Error)]
pub enum ProverError {
    #[error("failed to start `{path}`: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("solver I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected solver output: {0}")]
    UnexpectedOutput(String),
}

/// A theorem prover
pub trait ProverOracle {
    fn name(&self) -> &str;

    fn check_validity(&mut self, formula: &Term) -> ProverOutcome;

    fn check_assumptions(&mut self, assumptions: &[Term]) -> AssumptionResult;
}

impl<P: ProverOracle + ?Sized> ProverOracle for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn check_validity(&mut self, formula: &Term) -> ProverOutcome {
        (**self).check_validity(formula)
    }

    fn check_assumptions(&mut self, assumptions: &[Term]) -> AssumptionResult {
        (**self).check_assumptions(assumptions)
    }
}
