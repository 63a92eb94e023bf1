//! Typed declaration metadata
//!
//! Declarations are tagged through a side table keyed by [`DeclId`]
//! instead of string-keyed attribute lists. Attributes in source text
//! (`{:inline 2}`, `{:guardReadSet "f", "x"}`, ...) are converted to and
//! from this representation at the parser and printer boundaries.
//!
//! [`DeclId`]: super::DeclId

use serde::{Deserialize, Serialize};

pub const INLINE_ATTR: &str = "inline";
pub const CHECK_DEPENDENCY_ATTR: &str = "checkDependency";
pub const INPUT_GUARD_ATTR: &str = "guardReadSet";
pub const OUTPUT_GUARD_ATTR: &str = "guardModSet";
pub const DEPENDENCY_CONTRACT_ATTR: &str = "dependencyContract";
pub const DEPENDENCY_CLAUSE_ATTR: &str = "dependency";

/// Surface attribute: `{:name arg, ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub args: Vec<AttrArg>,
}

/// Attribute argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrArg {
    Str(String),
    Int(i64),
    Ident(String),
}

impl AttrArg {
    fn as_name(&self) -> Option<&str> {
        match self {
            AttrArg::Str(s) | AttrArg::Ident(s) => Some(s),
            AttrArg::Int(_) => None,
        }
    }
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{:{}", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            match arg {
                AttrArg::Str(s) => write!(f, "{sep}\"{s}\"")?,
                AttrArg::Int(n) => write!(f, "{sep}{n}")?,
                AttrArg::Ident(s) => write!(f, "{sep}{s}")?,
            }
        }
        write!(f, "}}")
    }
}

/// Metadata attached to a declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metadata {
    /// Procedure may be inlined up to this recursion depth
    Inline(u32),
    /// Procedure is the check-dependency harness of the named procedure
    CheckDependencyOf(String),
    /// Constant guards equality of `variable` across the two harness runs
    InputGuardOf { procedure: String, variable: String },
    /// Constant guards the equivalence obligation of output `variable`
    OutputGuardOf { procedure: String, variable: String },
    /// Function abstracts output `output` of `procedure`
    DependencyContractOf { procedure: String, output: String },
}

impl Metadata {
    /// Convert a parsed attribute; `Ok(None)` for attributes this tool does not use
    pub fn from_attribute(attr: &Attribute) -> Result<Option<Metadata>, String> {
        let names: Vec<Option<&str>> = attr.args.iter().map(AttrArg::as_name).collect();
        let pair = |what: &str| -> Result<(String, String), String> {
            match names.as_slice() {
                [Some(a), Some(b)] => Ok((a.to_string(), b.to_string())),
                _ => Err(format!("attribute {{:{what}}} expects two names")),
            }
        };
        let meta = match attr.name.as_str() {
            INLINE_ATTR => match attr.args.as_slice() {
                [AttrArg::Int(n)] if *n > 0 => Metadata::Inline(*n as u32),
                _ => return Err("attribute {:inline} expects a positive depth".to_string()),
            },
            CHECK_DEPENDENCY_ATTR => match names.as_slice() {
                [Some(p)] => Metadata::CheckDependencyOf(p.to_string()),
                _ => return Err("attribute {:checkDependency} expects one name".to_string()),
            },
            INPUT_GUARD_ATTR => {
                let (procedure, variable) = pair(INPUT_GUARD_ATTR)?;
                Metadata::InputGuardOf {
                    procedure,
                    variable,
                }
            }
            OUTPUT_GUARD_ATTR => {
                let (procedure, variable) = pair(OUTPUT_GUARD_ATTR)?;
                Metadata::OutputGuardOf {
                    procedure,
                    variable,
                }
            }
            DEPENDENCY_CONTRACT_ATTR => {
                let (procedure, output) = pair(DEPENDENCY_CONTRACT_ATTR)?;
                Metadata::DependencyContractOf { procedure, output }
            }
            _ => return Ok(None),
        };
        Ok(Some(meta))
    }

    pub fn to_attribute(&self) -> Attribute {
        let strs = |vals: &[&str]| -> Vec<AttrArg> {
            vals.iter().map(|v| AttrArg::Str(v.to_string())).collect()
        };
        match self {
            Metadata::Inline(n) => Attribute {
                name: INLINE_ATTR.to_string(),
                args: vec![AttrArg::Int(i64::from(*n))],
            },
            Metadata::CheckDependencyOf(p) => Attribute {
                name: CHECK_DEPENDENCY_ATTR.to_string(),
                args: strs(&[p.as_str()]),
            },
            Metadata::InputGuardOf {
                procedure,
                variable,
            } => Attribute {
                name: INPUT_GUARD_ATTR.to_string(),
                args: strs(&[procedure.as_str(), variable.as_str()]),
            },
            Metadata::OutputGuardOf {
                procedure,
                variable,
            } => Attribute {
                name: OUTPUT_GUARD_ATTR.to_string(),
                args: strs(&[procedure.as_str(), variable.as_str()]),
            },
            Metadata::DependencyContractOf { procedure, output } => Attribute {
                name: DEPENDENCY_CONTRACT_ATTR.to_string(),
                args: strs(&[procedure.as_str(), output.as_str()]),
            },
        }
    }
}
