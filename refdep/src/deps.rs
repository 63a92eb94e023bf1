//! Dependency maps
//!
//! For each procedure, every output (out-formal or modified global) maps to
//! the set of inputs (in-formals and globals) that determine it, or to the
//! wildcard when it may depend on anything, nondeterminism included.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ast::{Procedure, Program, TypedIdent};
use crate::error::{CompileError, Result};

/// Name of the nondeterministic source sentinel in candidate read-sets
pub const UNCONSTRAINED_SOURCE: &str = "*";

/// Dependency set of one output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DepSetRepr", into = "DepSetRepr")]
pub enum DepSet {
    Vars(BTreeSet<String>),
    /// Depends on everything, possibly nondeterministically
    Wildcard,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum DepSetRepr {
    Marker(String),
    Vars(BTreeSet<String>),
}

impl TryFrom<DepSetRepr> for DepSet {
    type Error = String;

    fn try_from(repr: DepSetRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            DepSetRepr::Marker(m) if m == UNCONSTRAINED_SOURCE => Ok(DepSet::Wildcard),
            DepSetRepr::Marker(m) => Err(format!(
                "expected a list of variables or \"{UNCONSTRAINED_SOURCE}\", found \"{m}\""
            )),
            DepSetRepr::Vars(vars) => Ok(DepSet::Vars(vars)),
        }
    }
}

impl From<DepSet> for DepSetRepr {
    fn from(set: DepSet) -> Self {
        match set {
            DepSet::Wildcard => DepSetRepr::Marker(UNCONSTRAINED_SOURCE.to_string()),
            DepSet::Vars(vars) => DepSetRepr::Vars(vars),
        }
    }
}

impl DepSet {
    pub fn empty() -> Self {
        DepSet::Vars(BTreeSet::new())
    }

    pub fn of<I, S>(vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DepSet::Vars(vars.into_iter().map(Into::into).collect())
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, DepSet::Wildcard)
    }

    pub fn vars(&self) -> Option<&BTreeSet<String>> {
        match self {
            DepSet::Vars(vars) => Some(vars),
            DepSet::Wildcard => None,
        }
    }

    /// Number of dependencies; `None` for the wildcard
    pub fn len(&self) -> Option<usize> {
        self.vars().map(BTreeSet::len)
    }

    /// Whether every dependency is a member of `candidates`
    pub fn is_subset_of(&self, candidates: &BTreeSet<String>) -> bool {
        self.vars().is_some_and(|v| v.is_subset(candidates))
    }

    /// Union; the wildcard absorbs everything
    pub fn union(&self, other: &DepSet) -> DepSet {
        match (self, other) {
            (DepSet::Vars(a), DepSet::Vars(b)) => DepSet::Vars(a.union(b).cloned().collect()),
            _ => DepSet::Wildcard,
        }
    }
}

impl fmt::Display for DepSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepSet::Wildcard => write!(f, "{UNCONSTRAINED_SOURCE}"),
            DepSet::Vars(vars) => {
                write!(f, "{{")?;
                for (i, v) in vars.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Dependencies of one procedure: output name to dependency set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dependencies(BTreeMap<String, DepSet>);

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `output -> set`. A wildcard entry is never replaced.
    pub fn insert(&mut self, output: impl Into<String>, set: DepSet) {
        let output = output.into();
        if self.0.get(&output).is_some_and(DepSet::is_wildcard) {
            return;
        }
        self.0.insert(output, set);
    }

    pub fn get(&self, output: &str) -> Option<&DepSet> {
        self.0.get(output)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DepSet)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fill in outputs this map has no entry for from `other`
    pub fn join_missing(&mut self, other: &Dependencies) {
        for (output, set) in &other.0 {
            self.0.entry(output.clone()).or_insert_with(|| set.clone());
        }
    }

    /// Drop entries that are not visible to `proc`: outputs must be
    /// out-formals or globals, dependencies must be in-formals or globals
    pub fn prune(&mut self, program: &Program, proc: &Procedure) {
        let is_input = |v: &str| proc.in_index(v).is_some() || program.is_global(v);
        self.0
            .retain(|o, _| proc.out_index(o).is_some() || program.is_global(o));
        for set in self.0.values_mut() {
            if let DepSet::Vars(vars) = set {
                vars.retain(|v| is_input(v.as_str()));
            }
        }
    }

    /// Candidate read-set: every concrete dependency, in-formals in
    /// declaration order followed by globals in declaration order
    pub fn read_set(&self, program: &Program, proc: &Procedure) -> Vec<String> {
        let all: BTreeSet<&str> = self
            .0
            .values()
            .filter_map(DepSet::vars)
            .flatten()
            .map(String::as_str)
            .collect();
        ordered_visible(program, &proc.ins, |v| all.contains(v))
    }

    /// Candidate mod-set: out-formals in declaration order, then
    /// globals in declaration order
    pub fn mod_set(&self, program: &Program, proc: &Procedure) -> Vec<String> {
        ordered_visible(program, &proc.outs, |v| self.0.contains_key(v))
    }
}

fn ordered_visible(
    program: &Program,
    formals: &[TypedIdent],
    keep: impl Fn(&str) -> bool,
) -> Vec<String> {
    formals
        .iter()
        .map(|f| f.name.as_str())
        .chain(program.globals().map(|g| g.var.name.as_str()))
        .filter(|v| keep(*v))
        .map(String::from)
        .collect()
}

impl FromIterator<(String, DepSet)> for Dependencies {
    fn from_iter<T: IntoIterator<Item = (String, DepSet)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Dependencies of every analyzed procedure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyMap(BTreeMap<String, Dependencies>);

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, proc: &str) -> Option<&Dependencies> {
        self.0.get(proc)
    }

    /// Replace the entry for `proc`
    pub fn insert(&mut self, proc: impl Into<String>, deps: Dependencies) {
        self.0.insert(proc.into(), deps);
    }

    pub fn contains(&self, proc: &str) -> bool {
        self.0.contains_key(proc)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Dependencies)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn procedures(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Give every procedure and output known to `baseline` some entry
    pub fn join_missing(&mut self, baseline: &DependencyMap) {
        for (proc, deps) in &baseline.0 {
            self.0.entry(proc.clone()).or_default().join_missing(deps);
        }
    }

    /// Entries of `other` replace this map's entries for the same procedures
    pub fn overlay(&mut self, other: &DependencyMap) {
        for (proc, deps) in &other.0 {
            self.0.insert(proc.clone(), deps.clone());
        }
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Load a map written by `to_json`
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CompileError::io_error(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&text).map_err(|e| {
            CompileError::config_error(format!("invalid dependency map {}: {e}", path.display()))
        })
    }

    /// `RefinedDependency[P] = [ .. ]` block for one procedure
    pub fn render(&self, proc: &str) -> String {
        let mut out = format!("RefinedDependency[{proc}] = [\n");
        if let Some(deps) = self.get(proc) {
            for (output, set) in deps.iter() {
                out.push_str(&format!("  {output} -> {set}\n"));
            }
        }
        out.push(']');
        out
    }
}

impl fmt::Display for DependencyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for proc in self.procedures() {
            writeln!(f, "{}", self.render(proc))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn sample() -> Dependencies {
        let mut deps = Dependencies::new();
        deps.insert("z", DepSet::of(["x"]));
        deps.insert("g", DepSet::Wildcard);
        deps
    }

    #[test]
    fn test_wildcard_dominates() {
        let mut deps = sample();
        deps.insert("g", DepSet::of(["x"]));
        assert_eq!(deps.get("g"), Some(&DepSet::Wildcard));
        deps.insert("z", DepSet::empty());
        assert_eq!(deps.get("z"), Some(&DepSet::empty()));
    }

    #[test]
    fn test_union_absorbs_wildcard() {
        assert_eq!(DepSet::of(["a"]).union(&DepSet::of(["b"])), DepSet::of(["a", "b"]));
        assert!(DepSet::of(["a"]).union(&DepSet::Wildcard).is_wildcard());
    }

    #[test]
    fn test_join_missing_keeps_existing() {
        let mut current = Dependencies::new();
        current.insert("z", DepSet::of(["x"]));
        let mut baseline = Dependencies::new();
        baseline.insert("z", DepSet::of(["x", "y"]));
        baseline.insert("w", DepSet::of(["y"]));
        current.join_missing(&baseline);
        assert_eq!(current.get("z"), Some(&DepSet::of(["x"])));
        assert_eq!(current.get("w"), Some(&DepSet::of(["y"])));
    }

    #[test]
    fn test_read_and_mod_set_order() {
        let program = parse_source(
            "test.ivp",
            "var h: int; var g: int;
             procedure f(b: int, a: int) returns (z: int, y: int) modifies g; { }",
        )
        .unwrap();
        let proc = program.procedure("f").unwrap();
        let mut deps = Dependencies::new();
        deps.insert("z", DepSet::of(["a", "g"]));
        deps.insert("g", DepSet::of(["b", "h"]));
        deps.insert("y", DepSet::Wildcard);
        assert_eq!(deps.read_set(&program, proc), vec!["b", "a", "h", "g"]);
        assert_eq!(deps.mod_set(&program, proc), vec!["z", "y", "g"]);
    }

    #[test]
    fn test_prune_invisible_names() {
        let program = parse_source(
            "test.ivp",
            "var g: int; procedure f(a: int) returns (z: int) { var t: int; }",
        )
        .unwrap();
        let proc = program.procedure("f").unwrap();
        let mut deps = Dependencies::new();
        deps.insert("z", DepSet::of(["a", "t", "g"]));
        deps.insert("t", DepSet::of(["a"]));
        deps.prune(&program, proc);
        assert_eq!(deps.get("z"), Some(&DepSet::of(["a", "g"])));
        assert!(deps.get("t").is_none());
    }

    #[test]
    fn test_json_wildcard_marker() {
        let mut map = DependencyMap::new();
        map.insert("f", sample());
        let json = map.to_json().unwrap();
        assert!(json.contains("\"*\""));
        assert_eq!(DependencyMap::from_json(&json).unwrap(), map);
        assert!(DependencyMap::from_json(r#"{"f": {"z": "x"}}"#).is_err());
    }

    #[test]
    fn test_render() {
        let mut map = DependencyMap::new();
        map.insert("f", sample());
        insta::assert_snapshot!(map.render("f"), @r###"
        RefinedDependency[f] = [
          g -> *
          z -> {x}
        ]
        "###);
    }
}
