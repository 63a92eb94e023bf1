//! Prover-driven dependency refinement
//!
//! - [`engine`]: per-output unsat-core minimization over one harness VC
//! - [`driver`]: per-procedure rounds and whole-program refinement
//! - [`contracts`]: dependency contracts abstracting analyzed callees
//! - [`batch`]: analysis of programs that already contain harnesses

pub mod batch;
pub mod contracts;
pub mod driver;
pub mod engine;

pub use batch::check_dependencies;
pub use driver::{LowerBound, ProcedureReport, RefineOptions, RefinementReport, Refiner};
pub use engine::{GuardTerm, MinimizationEngine, OutputAnalysis};

use thiserror::Error;

use crate::error::CompileError;
use crate::vcgen::VcError;

/// Failures that abort a refinement run
#[derive(Debug, Error)]
pub enum RefineError {
    #[error("unknown procedure `{0}`")]
    UnknownProcedure(String),

    #[error("procedure `{0}` has no body to refine")]
    NoBody(String),

    /// The synthesized program does not resolve or type check
    #[error("malformed harness for `{procedure}`: {source}")]
    MalformedHarness {
        procedure: String,
        #[source]
        source: CompileError,
    },

    #[error("guard `{0}` has no formula representative")]
    MissingGuard(String),

    #[error(transparent)]
    Vc(#[from] VcError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}
