//! Refinement configuration
//!
//! Read from a TOML file; every field has a default, so an empty file (or
//! none at all) is a valid configuration.
//!
//! ```toml
//! [prover]
//! backend = "bounded"
//! timeout_secs = 30
//!
//! [refine]
//! lower_bound = "none"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};
use crate::harness::RECURSION_DEPTH;
use crate::inline::ExpandOptions;
use crate::prover::{BoundedProver, ProverOracle, Z3Solver};
use crate::refine::{LowerBound, RefineOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    #[default]
    Z3,
    Bounded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProverConfig {
    pub backend: Backend,
    pub z3_path: String,
    pub timeout_secs: u32,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Z3,
            z3_path: "z3".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Integer domain and search budget of the in-process prover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoundedConfig {
    pub min: i64,
    pub max: i64,
    pub node_budget: u64,
}

impl Default for BoundedConfig {
    fn default() -> Self {
        Self {
            min: -3,
            max: 3,
            node_budget: 2_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefineSection {
    pub stack_bound: usize,
    pub lower_bound: LowerBound,
    pub loop_depth: u32,
}

impl Default for RefineSection {
    fn default() -> Self {
        Self {
            stack_bound: 32,
            lower_bound: LowerBound::DataOnly,
            loop_depth: RECURSION_DEPTH + 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `tracing-subscriber` filter directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefineConfig {
    pub prover: ProverConfig,
    pub bounded: BoundedConfig,
    pub refine: RefineSection,
    pub log: LogConfig,
}

impl RefineConfig {
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| CompileError::config_error(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            CompileError::io_error(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&source).map_err(|e| {
            CompileError::config_error(format!("{}: {}", path.display(), e.message()))
        })
    }

    pub fn expand_options(&self) -> ExpandOptions {
        ExpandOptions {
            stack_bound: self.refine.stack_bound,
            loop_depth: self.refine.loop_depth,
        }
    }

    pub fn refine_options(&self) -> RefineOptions {
        RefineOptions {
            expand: self.expand_options(),
            lower_bound: self.refine.lower_bound,
        }
    }

    pub fn bounded_prover(&self) -> BoundedProver {
        BoundedProver::new(self.bounded.min, self.bounded.max, self.bounded.node_budget)
    }

    /// The configured prover. The bounded prover only searches `[min, max]`,
    /// so it is used only when asked for by name.
    pub fn make_prover(&self) -> Result<Box<dyn ProverOracle>> {
        if self.bounded.min > self.bounded.max {
            return Err(CompileError::config_error(format!(
                "empty bounded domain [{}, {}]",
                self.bounded.min, self.bounded.max
            )));
        }
        match self.prover.backend {
            Backend::Bounded => {
                tracing::warn!(
                    min = self.bounded.min,
                    max = self.bounded.max,
                    "bounded prover: results are exhaustive only over a finite integer domain"
                );
                Ok(Box::new(self.bounded_prover()))
            }
            Backend::Z3 => {
                let z3 = Z3Solver::new()
                    .with_path(self.prover.z3_path.clone())
                    .with_timeout(self.prover.timeout_secs);
                if !z3.is_available() {
                    return Err(CompileError::config_error(format!(
                        "cannot run z3 at `{}`; set `prover.z3_path`, or choose `backend = \"bounded\"` for a search limited to [{}, {}]",
                        self.prover.z3_path, self.bounded.min, self.bounded.max
                    )));
                }
                Ok(Box::new(z3))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(RefineConfig::from_toml("").unwrap(), RefineConfig::default());
        let config = RefineConfig::default();
        assert_eq!(config.expand_options(), ExpandOptions::default());
        assert_eq!(config.refine_options().lower_bound, LowerBound::DataOnly);
    }

    #[test]
    fn test_partial_sections() {
        let config = RefineConfig::from_toml(
            r#"
            [prover]
            backend = "bounded"
            timeout_secs = 30

            [bounded]
            max = 5

            [refine]
            lower_bound = "none"
            stack_bound = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.prover.backend, Backend::Bounded);
        assert_eq!(config.prover.timeout_secs, 30);
        assert_eq!(config.prover.z3_path, "z3");
        assert_eq!(config.bounded.min, -3);
        assert_eq!(config.bounded.max, 5);
        assert_eq!(config.refine.lower_bound, LowerBound::None);
        assert_eq!(config.expand_options().stack_bound, 8);
        assert_eq!(config.expand_options().loop_depth, RECURSION_DEPTH + 1);
        assert_eq!(config.log.filter, "warn");
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(RefineConfig::from_toml("[prover]\nsolver = \"cvc5\"\n").is_err());
        assert!(RefineConfig::from_toml("[prover]\nbackend = \"cvc5\"\n").is_err());
        assert!(RefineConfig::from_toml("[unknown]\n").is_err());
    }

    #[test]
    fn test_make_prover() {
        let mut config = RefineConfig::from_toml("[prover]\nbackend = \"bounded\"\n").unwrap();
        assert_eq!(config.make_prover().unwrap().name(), "bounded");

        config.bounded.min = 4;
        assert!(config.make_prover().is_err());
    }

    #[test]
    fn test_missing_z3_is_an_error() {
        let mut config = RefineConfig::default();
        config.prover.z3_path = "/nonexistent/z3".to_string();
        let err = config.make_prover().err().expect("missing z3 must not fall back");
        assert!(matches!(err, CompileError::Config { .. }));
        assert!(err.message().contains("/nonexistent/z3"));
        assert!(err.message().contains("backend = \"bounded\""));
    }

    #[test]
    fn test_load_missing_file() {
        let err = RefineConfig::load(Path::new("/nonexistent/refdep.toml")).unwrap_err();
        assert!(matches!(err, CompileError::Io { .. }));
    }
}
