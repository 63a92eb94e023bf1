//! Syntactic dependency analysis
//!
//! A prover-free over-approximation of every procedure's dependencies,
//! used as the starting candidate map and as the lower bound that lets the
//! refinement driver skip procedures it cannot improve.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ast::{Expr, Procedure, Program, Stmt, StmtKind};
use crate::deps::{DepSet, Dependencies, DependencyMap};

/// Which flows count as dependencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisMode {
    /// Data flow plus control flow through branch and loop conditions
    #[default]
    DataAndControl,
    /// Data flow only
    DataOnly,
}

/// Abstract state: the sources each variable may currently depend on
type Taint = BTreeMap<String, DepSet>;

pub struct BaselineAnalysis<'a> {
    program: &'a Program,
    mode: AnalysisMode,
    /// Summaries supplied from outside; never recomputed
    known: DependencyMap,
}

impl<'a> BaselineAnalysis<'a> {
    pub fn new(program: &'a Program, mode: AnalysisMode) -> Self {
        Self {
            program,
            mode,
            known: DependencyMap::new(),
        }
    }

    /// Use `known` as the summary of every procedure it names
    pub fn with_known(mut self, known: DependencyMap) -> Self {
        self.known = known;
        self
    }

    /// Summaries for every procedure, computed to a global fixpoint
    pub fn analyze(&self) -> DependencyMap {
        let mut summaries = DependencyMap::new();
        for proc in self.program.procedures() {
            summaries.insert(proc.name.clone(), self.initial_summary(proc));
        }

        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let mut changed = false;
            for proc in self.program.procedures() {
                if self.known.contains(&proc.name) || proc.body.is_none() {
                    continue;
                }
                let next = self.analyze_procedure(proc, &summaries);
                if summaries.get(&proc.name) != Some(&next) {
                    summaries.insert(proc.name.clone(), next);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        tracing::debug!(mode = ?self.mode, rounds, "baseline analysis reached a fixpoint");
        summaries
    }

    fn initial_summary(&self, proc: &Procedure) -> Dependencies {
        if let Some(known) = self.known.get(&proc.name) {
            return known.clone();
        }
        let init = if proc.body.is_some() {
            DepSet::empty()
        } else {
            DepSet::Wildcard
        };
        outputs_of(proc).map(|o| (o, init.clone())).collect()
    }

    fn analyze_procedure(&self, proc: &Procedure, summaries: &DependencyMap) -> Dependencies {
        let mut state = Taint::new();
        for g in self.program.globals() {
            state.insert(g.var.name.clone(), DepSet::of([g.var.name.as_str()]));
        }
        for v in &proc.ins {
            state.insert(v.name.clone(), DepSet::of([v.name.as_str()]));
        }
        // Out-formals and locals start uninitialised
        for v in proc
            .outs
            .iter()
            .chain(proc.body.iter().flat_map(|b| b.locals.iter()))
        {
            state.insert(v.name.clone(), DepSet::Wildcard);
        }

        let walker = Walker {
            analysis: self,
            summaries,
        };
        if let Some(body) = &proc.body {
            walker.block(&body.stmts, &mut state, &DepSet::empty());
        }

        outputs_of(proc)
            .map(|o| {
                let set = state.get(&o).cloned().unwrap_or(DepSet::Wildcard);
                (o, set)
            })
            .collect()
    }
}

/// Out-formals, then `modifies` globals
fn outputs_of(proc: &Procedure) -> impl Iterator<Item = String> + '_ {
    proc.outs
        .iter()
        .map(|v| v.name.clone())
        .chain(proc.modifies.iter().cloned())
}

struct Walker<'a, 'b> {
    analysis: &'b BaselineAnalysis<'a>,
    summaries: &'b DependencyMap,
}

impl Walker<'_, '_> {
    fn expr(&self, e: &Expr, state: &Taint) -> DepSet {
        let mut acc = DepSet::empty();
        for name in e.free_vars() {
            if self.analysis.program.constant(&name).is_some() {
                continue;
            }
            match state.get(&name) {
                Some(set) => acc = acc.union(set),
                None => return DepSet::Wildcard,
            }
        }
        acc
    }

    fn control(&self, control: &DepSet, cond: &Option<Expr>, state: &Taint) -> DepSet {
        match self.analysis.mode {
            AnalysisMode::DataOnly => control.clone(),
            AnalysisMode::DataAndControl => match cond {
                Some(c) => control.union(&self.expr(c, state)),
                None => DepSet::Wildcard,
            },
        }
    }

    fn block(&self, stmts: &[Stmt], state: &mut Taint, control: &DepSet) {
        for stmt in stmts {
            self.stmt(stmt, state, control);
        }
    }

    fn stmt(&self, stmt: &Stmt, state: &mut Taint, control: &DepSet) {
        match &stmt.node {
            StmtKind::Assign { lhs, rhs } => {
                let values: Vec<DepSet> = rhs
                    .iter()
                    .map(|e| self.expr(e, state).union(control))
                    .collect();
                for (x, v) in lhs.iter().zip(values) {
                    state.insert(x.clone(), v);
                }
            }
            StmtKind::Havoc(vars) => {
                for x in vars {
                    state.insert(x.clone(), DepSet::Wildcard);
                }
            }
            StmtKind::Assume(_) | StmtKind::Assert(_) => {}
            StmtKind::Call { proc, args, outs } => self.call(proc, args, outs, state, control),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let inner = self.control(control, cond, state);
                let mut then_state = state.clone();
                self.block(then_branch, &mut then_state, &inner);
                self.block(else_branch, state, &inner);
                join_into(state, &then_state);
            }
            StmtKind::While { cond, body } => loop {
                let inner = self.control(control, cond, state);
                let mut next = state.clone();
                self.block(body, &mut next, &inner);
                let before = state.clone();
                join_into(state, &next);
                if *state == before {
                    break;
                }
            },
        }
    }

    fn call(&self, name: &str, args: &[Expr], outs: &[String], state: &mut Taint, control: &DepSet) {
        let program = self.analysis.program;
        let Some(callee) = program.procedure(name) else {
            for x in outs {
                state.insert(x.clone(), DepSet::Wildcard);
            }
            return;
        };
        let arg_taint: BTreeMap<&str, DepSet> = callee
            .ins
            .iter()
            .zip(args)
            .map(|(formal, arg)| (formal.name.as_str(), self.expr(arg, state)))
            .collect();
        let summary = self.summaries.get(name);
        let instantiate = |output: &str| -> DepSet {
            let Some(set) = summary.and_then(|s| s.get(output)) else {
                return DepSet::Wildcard;
            };
            let Some(vars) = set.vars() else {
                return DepSet::Wildcard;
            };
            let mut acc = DepSet::empty();
            for v in vars {
                let t = match arg_taint.get(v.as_str()) {
                    Some(t) => t.clone(),
                    None => state.get(v).cloned().unwrap_or(DepSet::Wildcard),
                };
                acc = acc.union(&t);
            }
            acc.union(control)
        };

        let mut updates: Vec<(String, DepSet)> = callee
            .outs
            .iter()
            .zip(outs)
            .map(|(formal, actual)| (actual.clone(), instantiate(&formal.name)))
            .collect();
        updates.extend(callee.modifies.iter().map(|g| (g.clone(), instantiate(g))));
        for (x, v) in updates {
            state.insert(x, v);
        }
    }
}

fn join_into(state: &mut Taint, other: &Taint) {
    for (name, set) in other {
        let joined = match state.get(name) {
            Some(current) => current.union(set),
            None => set.clone(),
        };
        state.insert(name.clone(), joined);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn analyze(source: &str, mode: AnalysisMode) -> DependencyMap {
        let program = parse_source("test.ivp", source).unwrap();
        BaselineAnalysis::new(&program, mode).analyze()
    }

    fn dep(map: &DependencyMap, proc: &str, output: &str) -> DepSet {
        map.get(proc).and_then(|d| d.get(output)).cloned().unwrap()
    }

    #[test]
    fn test_direct_assignment() {
        let map = analyze(
            "procedure f(x: int, y: int) returns (z: int) { z := x; }",
            AnalysisMode::DataAndControl,
        );
        assert_eq!(dep(&map, "f", "z"), DepSet::of(["x"]));
    }

    #[test]
    fn test_syntactic_cancellation_is_kept() {
        let map = analyze(
            "var g: int; procedure f(x: int) returns (z: int) { z := x + g - g; }",
            AnalysisMode::DataOnly,
        );
        assert_eq!(dep(&map, "f", "z"), DepSet::of(["g", "x"]));
    }

    #[test]
    fn test_control_dependency_by_mode() {
        let source = "procedure f(c: bool, x: int) returns (z: int) { if (c) { z := x; } else { z := 0; } }";
        let full = analyze(source, AnalysisMode::DataAndControl);
        let data = analyze(source, AnalysisMode::DataOnly);
        assert_eq!(dep(&full, "f", "z"), DepSet::of(["c", "x"]));
        assert_eq!(dep(&data, "f", "z"), DepSet::of(["x"]));
    }

    #[test]
    fn test_uninitialised_output_is_wildcard() {
        let map = analyze(
            "procedure f(x: int) returns (z: int, w: int) { z := x; }",
            AnalysisMode::DataAndControl,
        );
        assert!(dep(&map, "f", "w").is_wildcard());
    }

    #[test]
    fn test_havoc_and_nondet_branch() {
        let source = "procedure f(x: int) returns (z: int, w: int) {
               havoc z;
               if (*) { w := x; } else { w := x; }
             }";
        let full = analyze(source, AnalysisMode::DataAndControl);
        assert!(dep(&full, "f", "z").is_wildcard());
        assert!(dep(&full, "f", "w").is_wildcard());
        let data = analyze(source, AnalysisMode::DataOnly);
        assert_eq!(dep(&data, "f", "w"), DepSet::of(["x"]));
    }

    #[test]
    fn test_unmodified_global_depends_on_itself() {
        let map = analyze(
            "var g: int; procedure f(x: int) modifies g; { if (x > 0) { g := x; } }",
            AnalysisMode::DataOnly,
        );
        assert_eq!(dep(&map, "f", "g"), DepSet::of(["g", "x"]));
    }

    #[test]
    fn test_loop_fixpoint() {
        let map = analyze(
            "procedure f(n: int, a: int) returns (s: int) {
               var i: int;
               i, s := 0, 0;
               while (i < n) { s := s + a; i := i + 1; }
             }",
            AnalysisMode::DataAndControl,
        );
        assert_eq!(dep(&map, "f", "s"), DepSet::of(["a", "n"]));
    }

    #[test]
    fn test_call_substitutes_summary() {
        let map = analyze(
            "var g: int;
             procedure h(a: int, b: int) returns (r: int) { r := a + g; }
             procedure f(x: int, y: int) returns (z: int) { call z := h(x, y); }",
            AnalysisMode::DataAndControl,
        );
        assert_eq!(dep(&map, "h", "r"), DepSet::of(["a", "g"]));
        assert_eq!(dep(&map, "f", "z"), DepSet::of(["g", "x"]));
    }

    #[test]
    fn test_external_callee_is_nondeterministic() {
        let map = analyze(
            "procedure ext(a: int) returns (r: int);
             procedure f(x: int) returns (z: int) { call z := ext(x); }",
            AnalysisMode::DataAndControl,
        );
        assert!(dep(&map, "ext", "r").is_wildcard());
        assert!(dep(&map, "f", "z").is_wildcard());
    }

    #[test]
    fn test_known_summary_overrides() {
        let program = parse_source(
            "test.ivp",
            "procedure ext(a: int, b: int) returns (r: int);
             procedure f(x: int, y: int) returns (z: int) { call z := ext(x, y); }",
        )
        .unwrap();
        let mut known = DependencyMap::new();
        known.insert("ext", [("r".to_string(), DepSet::of(["a"]))].into_iter().collect());
        let map = BaselineAnalysis::new(&program, AnalysisMode::DataAndControl)
            .with_known(known)
            .analyze();
        assert_eq!(dep(&map, "f", "z"), DepSet::of(["x"]));
    }

    #[test]
    fn test_recursive_fixpoint() {
        let map = analyze(
            "procedure f(n: int, a: int) returns (r: int) {
               if (n > 0) { call r := f(n - 1, a); } else { r := a; }
             }",
            AnalysisMode::DataAndControl,
        );
        assert_eq!(dep(&map, "f", "r"), DepSet::of(["a", "n"]));
    }

    #[test]
    fn test_constants_are_not_sources() {
        let map = analyze(
            "const k: int; procedure f(x: int) returns (z: int) { z := x + k; }",
            AnalysisMode::DataOnly,
        );
        assert_eq!(dep(&map, "f", "z"), DepSet::of(["x"]));
    }
}
