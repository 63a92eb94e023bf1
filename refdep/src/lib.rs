//! refdep library
//!
//! Read/mod dependency inference for intermediate verification programs:
//! a syntactic baseline refined with a theorem prover over
//! self-composition harnesses.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod types;
pub mod util;

pub mod baseline;
pub mod callgraph;
pub mod deps;
pub mod guard;
pub mod harness;
pub mod inline;

pub mod config;
pub mod prover;
pub mod refine;
pub mod smt;
pub mod vcgen;

pub use ast::Span;
pub use error::{CompileError, Result};
