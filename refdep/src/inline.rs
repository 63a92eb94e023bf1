//! Bounded expansion of a procedure body
//!
//! Produces loop-free, call-free statements for one root procedure. Callees
//! are inlined with fresh names (`Q$k$x`) or replaced by their contracts;
//! loops are unrolled a fixed number of times. The program and call graph
//! are only read.

use std::collections::{BTreeSet, HashMap};

use crate::ast::{
    Body, ContractOrigin, Expr, Procedure, Program, Stmt, StmtKind, Type, TypedIdent,
};
use crate::callgraph::CallGraph;
use crate::error::{CompileError, Result};
use crate::harness::RECURSION_DEPTH;

/// Expansion bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandOptions {
    /// Maximum number of nested inlined calls
    pub stack_bound: usize,
    /// A loop at depth `d` is unrolled `d - 1` times
    pub loop_depth: u32,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            stack_bound: 32,
            loop_depth: RECURSION_DEPTH + 1,
        }
    }
}

/// Result of expanding a procedure body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpandedBody {
    pub body: Body,
    /// Calls that were inlined
    pub inlined_calls: usize,
    /// Calls replaced by their contracts
    pub abstracted_calls: usize,
}

/// Expand the body of `root`
pub fn expand(
    program: &Program,
    root: &str,
    call_graph: &CallGraph,
    options: ExpandOptions,
) -> Result<ExpandedBody> {
    let proc = program
        .procedure(root)
        .ok_or_else(|| CompileError::resolve_error(format!("unknown procedure `{root}`")))?;
    let body = proc.body.as_ref().ok_or_else(|| {
        CompileError::resolve_error(format!("procedure `{root}` has no body to expand"))
    })?;

    let mut ex = Expander {
        program,
        call_graph,
        options,
        target: program.check_dependency_target(root),
        stack: vec![root.to_string()],
        counter: 0,
        locals: body.locals.clone(),
        inlined: 0,
        abstracted: 0,
    };
    let identity = Renaming::default();
    let stmts = ex.block(&body.stmts, &identity)?;
    tracing::debug!(
        root,
        inlined = ex.inlined,
        abstracted = ex.abstracted,
        "expanded procedure"
    );
    Ok(ExpandedBody {
        body: Body {
            locals: ex.locals,
            stmts,
        },
        inlined_calls: ex.inlined,
        abstracted_calls: ex.abstracted,
    })
}

/// Replace `root`'s body by its expansion
pub fn expand_in_place(
    program: &mut Program,
    root: &str,
    call_graph: &CallGraph,
    options: ExpandOptions,
) -> Result<ExpandedBody> {
    let expanded = expand(program, root, call_graph, options)?;
    if let Some(proc) = program.procedure_mut(root) {
        proc.body = Some(expanded.body.clone());
    }
    Ok(expanded)
}

/// Variable renaming applied to a callee's code at one call site
#[derive(Debug, Clone, Default)]
struct Renaming {
    /// Formals and locals to their fresh names
    current: HashMap<String, Expr>,
    /// Names under `old(..)`: formals as above, globals to their entry snapshot
    old: HashMap<String, Expr>,
}

impl Renaming {
    fn is_identity(&self) -> bool {
        self.current.is_empty() && self.old.is_empty()
    }

    fn expr(&self, e: &Expr) -> Expr {
        if self.is_identity() {
            e.clone()
        } else {
            e.substitute(&self.current, &self.old)
        }
    }

    fn name(&self, n: &str) -> String {
        match self.current.get(n) {
            Some(Expr::Var(renamed)) => renamed.clone(),
            _ => n.to_string(),
        }
    }

    fn names(&self, ns: &[String]) -> Vec<String> {
        ns.iter().map(|n| self.name(n)).collect()
    }
}

struct Expander<'a> {
    program: &'a Program,
    call_graph: &'a CallGraph,
    options: ExpandOptions,
    /// Procedure checked by the root harness; its own dependency contract
    /// is ignored while it can still be inlined
    target: Option<&'a str>,
    stack: Vec<String>,
    counter: usize,
    locals: Vec<TypedIdent>,
    inlined: usize,
    abstracted: usize,
}

fn assume(e: Expr) -> Stmt {
    Stmt::synthetic(StmtKind::Assume(e))
}

fn has_dependency_contract(proc: &Procedure) -> bool {
    proc.ensures
        .iter()
        .any(|c| c.origin == ContractOrigin::Dependency)
}

impl<'a> Expander<'a> {
    fn fresh(&mut self, callee: &str, k: usize, name: &str, ty: Type) -> String {
        let mut fresh = format!("{callee}${k}${name}");
        while self.program.contains_name(&fresh) {
            fresh.push('\'');
        }
        self.locals.push(TypedIdent::new(fresh.clone(), ty));
        fresh
    }

    fn block(&mut self, stmts: &[Stmt], ren: &Renaming) -> Result<Vec<Stmt>> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            self.stmt(stmt, ren, &mut out)?;
        }
        Ok(out)
    }

    fn stmt(&mut self, stmt: &Stmt, ren: &Renaming, out: &mut Vec<Stmt>) -> Result<()> {
        let span = stmt.span;
        let push = |out: &mut Vec<Stmt>, kind| out.push(Stmt::new(kind, span));
        match &stmt.node {
            StmtKind::Assign { lhs, rhs } => push(
                out,
                StmtKind::Assign {
                    lhs: ren.names(lhs),
                    rhs: rhs.iter().map(|e| ren.expr(e)).collect(),
                },
            ),
            StmtKind::Havoc(vars) => push(out, StmtKind::Havoc(ren.names(vars))),
            // Only input to output determinism is checked
            StmtKind::Assume(e) | StmtKind::Assert(e) => push(out, StmtKind::Assume(ren.expr(e))),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let kind = StmtKind::If {
                    cond: cond.as_ref().map(|c| ren.expr(c)),
                    then_branch: self.block(then_branch, ren)?,
                    else_branch: self.block(else_branch, ren)?,
                };
                push(out, kind);
            }
            StmtKind::While { cond, body } => {
                let cond = cond.as_ref().map(|c| ren.expr(c));
                let unrolled = self.unroll(cond, body, ren, self.options.loop_depth)?;
                out.extend(unrolled);
            }
            StmtKind::Call { proc, args, outs } => {
                let args: Vec<Expr> = args.iter().map(|e| ren.expr(e)).collect();
                let outs = ren.names(outs);
                self.call(proc, &args, &outs, out)?;
            }
        }
        Ok(())
    }

    /// Unroll a loop whose condition is already renamed
    fn unroll(&mut self, cond: Option<Expr>, body: &[Stmt], ren: &Renaming, depth: u32) -> Result<Vec<Stmt>> {
        if depth <= 1 {
            return Ok(match cond {
                Some(c) => vec![assume(Expr::not(c))],
                None => Vec::new(),
            });
        }
        let mut then_branch = self.block(body, ren)?;
        then_branch.extend(self.unroll(cond.clone(), body, ren, depth - 1)?);
        Ok(vec![Stmt::synthetic(StmtKind::If {
            cond,
            then_branch,
            else_branch: Vec::new(),
        })])
    }

    fn should_inline(&self, callee: &Procedure) -> bool {
        if callee.body.is_none() || self.stack.len() >= self.options.stack_bound {
            return false;
        }
        let is_target = self.target == Some(callee.name.as_str());
        if has_dependency_contract(callee) && !is_target {
            return false;
        }
        if self.call_graph.is_recursive(&callee.name) || is_target {
            let depth = self.program.inline_depth(&callee.name).unwrap_or(RECURSION_DEPTH);
            let active = self.stack.iter().filter(|p| **p == callee.name).count();
            return active < depth as usize;
        }
        true
    }

    fn call(&mut self, name: &str, args: &[Expr], outs: &[String], out: &mut Vec<Stmt>) -> Result<()> {
        let program = self.program;
        let callee = program
            .procedure(name)
            .ok_or_else(|| CompileError::resolve_error(format!("call to unknown procedure `{name}`")))?;
        self.counter += 1;
        let k = self.counter;

        let mut ren = Renaming::default();
        let bind = |ex: &mut Self, formal: &TypedIdent, ren: &mut Renaming| -> String {
            let fresh = ex.fresh(name, k, &formal.name, formal.ty);
            ren.current.insert(formal.name.clone(), Expr::var(&fresh));
            ren.old.insert(formal.name.clone(), Expr::var(&fresh));
            fresh
        };

        let mut in_locals = Vec::with_capacity(callee.ins.len());
        for formal in &callee.ins {
            in_locals.push(bind(self, formal, &mut ren));
        }
        let mut out_locals = Vec::with_capacity(callee.outs.len());
        for formal in &callee.outs {
            out_locals.push(bind(self, formal, &mut ren));
        }
        if !in_locals.is_empty() {
            out.push(Stmt::synthetic(StmtKind::Assign {
                lhs: in_locals,
                rhs: args.to_vec(),
            }));
        }

        let inline = self.should_inline(callee);
        let body = callee.body.as_ref().filter(|_| inline);
        if let Some(body) = body {
            for local in &body.locals {
                bind(self, local, &mut ren);
            }
        }

        // Entry values of globals read under old(..)
        let mut old_globals: BTreeSet<String> =
            callee.ensures.iter().flat_map(|c| c.expr.old_vars()).collect();
        if let Some(body) = body {
            collect_old_vars(&body.stmts, &mut old_globals);
        }
        let mut snapshots = Vec::new();
        for g in old_globals {
            let Some(global) = program.global(&g) else {
                continue;
            };
            let snap = self.fresh(name, k, &format!("old${g}"), global.var.ty);
            ren.old.insert(g.clone(), Expr::var(&snap));
            snapshots.push((snap, g));
        }
        if !snapshots.is_empty() {
            let (lhs, rhs): (Vec<String>, Vec<Expr>) =
                snapshots.into_iter().map(|(s, g)| (s, Expr::Var(g))).unzip();
            out.push(Stmt::synthetic(StmtKind::Assign { lhs, rhs }));
        }

        for c in &callee.requires {
            out.push(assume(ren.expr(&c.expr)));
        }

        match body {
            Some(body) => {
                self.inlined += 1;
                self.stack.push(name.to_string());
                let stmts = self.block(&body.stmts, &ren);
                self.stack.pop();
                out.extend(stmts?);
                for c in callee.ensures.iter().filter(|c| c.origin == ContractOrigin::Declared) {
                    out.push(assume(ren.expr(&c.expr)));
                }
            }
            None => {
                self.abstracted += 1;
                let mut havocked: Vec<String> = callee.outs.iter().map(|o| ren.name(&o.name)).collect();
                havocked.extend(callee.modifies.iter().cloned());
                if !havocked.is_empty() {
                    out.push(Stmt::synthetic(StmtKind::Havoc(havocked)));
                }
                for c in &callee.ensures {
                    out.push(assume(ren.expr(&c.expr)));
                }
            }
        }

        if !outs.is_empty() {
            out.push(Stmt::synthetic(StmtKind::Assign {
                lhs: outs.to_vec(),
                rhs: out_locals.iter().map(Expr::var).collect(),
            }));
        }
        Ok(())
    }
}

fn collect_old_vars(stmts: &[Stmt], out: &mut BTreeSet<String>) {
    for stmt in stmts {
        match &stmt.node {
            StmtKind::Assign { rhs, .. } => rhs.iter().for_each(|e| out.extend(e.old_vars())),
            StmtKind::Assume(e) | StmtKind::Assert(e) => out.extend(e.old_vars()),
            StmtKind::Call { args, .. } => args.iter().for_each(|e| out.extend(e.old_vars())),
            StmtKind::Havoc(_) => {}
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if let Some(c) = cond {
                    out.extend(c.old_vars());
                }
                collect_old_vars(then_branch, out);
                collect_old_vars(else_branch, out);
            }
            StmtKind::While { cond, body } => {
                if let Some(c) = cond {
                    out.extend(c.old_vars());
                }
                collect_old_vars(body, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::types::TypeChecker;

    fn setup(source: &str) -> (Program, CallGraph) {
        let program = parse_source("test.ivp", source).unwrap();
        let cg = CallGraph::build(&program);
        (program, cg)
    }

    fn is_flat(stmts: &[Stmt]) -> bool {
        stmts.iter().all(|s| match &s.node {
            StmtKind::Call { .. } | StmtKind::While { .. } => false,
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => is_flat(then_branch) && is_flat(else_branch),
            _ => true,
        })
    }

    fn count(stmts: &[Stmt], pred: &dyn Fn(&StmtKind) -> bool) -> usize {
        stmts
            .iter()
            .map(|s| {
                let nested = match &s.node {
                    StmtKind::If {
                        then_branch,
                        else_branch,
                        ..
                    } => count(then_branch, pred) + count(else_branch, pred),
                    _ => 0,
                };
                nested + usize::from(pred(&s.node))
            })
            .sum()
    }

    #[test]
    fn test_inline_simple_call() {
        let (mut program, cg) = setup(
            "procedure f(x: int) returns (z: int) { var t: int; t := x + 1; z := t; }
             procedure main(a: int) returns (b: int) { call b := f(a); }",
        );
        let expanded = expand_in_place(&mut program, "main", &cg, ExpandOptions::default()).unwrap();
        assert_eq!(expanded.inlined_calls, 1);
        assert!(is_flat(&expanded.body.stmts));
        let names: Vec<&str> = expanded.body.locals.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["f$1$x", "f$1$z", "f$1$t"]);
        TypeChecker::new().check_program(&program).unwrap();
    }

    #[test]
    fn test_bodyless_callee_is_abstracted() {
        let (program, cg) = setup(
            "var g: int;
             procedure ext(a: int) returns (r: int); modifies g; ensures r > old(g);
             procedure main(a: int) returns (b: int) modifies g; { call b := ext(a); }",
        );
        let expanded = expand(&program, "main", &cg, ExpandOptions::default()).unwrap();
        assert_eq!(expanded.abstracted_calls, 1);
        let stmts = &expanded.body.stmts;
        assert!(matches!(&stmts[0].node, StmtKind::Assign { lhs, .. } if lhs == &["ext$1$a".to_string()]));
        assert!(matches!(&stmts[1].node, StmtKind::Assign { lhs, .. } if lhs == &["ext$1$old$g".to_string()]));
        assert!(matches!(&stmts[2].node, StmtKind::Havoc(vs) if vs == &["ext$1$r".to_string(), "g".to_string()]));
        match &stmts[3].node {
            StmtKind::Assume(e) => assert_eq!(e.to_string(), "ext$1$r > ext$1$old$g"),
            other => panic!("Expected Assume, got {other:?}"),
        }
    }

    #[test]
    fn test_recursive_callee_is_capped() {
        let (program, cg) = setup(
            "procedure f(n: int) returns (r: int) { if (n > 0) { call r := f(n - 1); } else { r := 0; } }
             procedure main(a: int) returns (b: int) { call b := f(a); }",
        );
        let expanded = expand(&program, "main", &cg, ExpandOptions::default()).unwrap();
        assert_eq!(expanded.inlined_calls, RECURSION_DEPTH as usize);
        assert_eq!(expanded.abstracted_calls, 1);
        assert!(is_flat(&expanded.body.stmts));
    }

    #[test]
    fn test_inline_depth_metadata() {
        let (program, cg) = setup(
            "procedure {:inline 4} f(n: int) returns (r: int) { if (n > 0) { call r := f(n - 1); } else { r := 0; } }
             procedure main(a: int) returns (b: int) { call b := f(a); }",
        );
        let expanded = expand(&program, "main", &cg, ExpandOptions::default()).unwrap();
        assert_eq!(expanded.inlined_calls, 4);
    }

    #[test]
    fn test_stack_bound() {
        let (program, cg) = setup(
            "procedure c() { }
             procedure b() { call c(); }
             procedure a() { call b(); }
             procedure main() { call a(); }",
        );
        let options = ExpandOptions {
            stack_bound: 2,
            ..ExpandOptions::default()
        };
        let expanded = expand(&program, "main", &cg, options).unwrap();
        assert_eq!(expanded.inlined_calls, 1);
        assert_eq!(expanded.abstracted_calls, 1);
    }

    #[test]
    fn test_loop_unrolling() {
        let (program, cg) = setup(
            "procedure main(n: int) returns (i: int) { i := 0; while (i < n) { i := i + 1; } }",
        );
        let options = ExpandOptions {
            loop_depth: 3,
            ..ExpandOptions::default()
        };
        let expanded = expand(&program, "main", &cg, options).unwrap();
        let stmts = &expanded.body.stmts;
        assert!(is_flat(stmts));
        let increments = count(stmts, &|k| matches!(k, StmtKind::Assign { lhs, .. } if lhs == &["i".to_string()]));
        // Initial assignment plus two iterations
        assert_eq!(increments, 3);
        let exits = count(stmts, &|k| matches!(k, StmtKind::Assume(Expr::Unary { .. })));
        assert_eq!(exits, 1);
    }

    #[test]
    fn test_nondet_loop_has_no_exit_assumption() {
        let (program, cg) = setup("procedure main() returns (i: int) { i := 0; while (*) { i := i + 1; } }");
        let expanded = expand(&program, "main", &cg, ExpandOptions::default()).unwrap();
        assert_eq!(count(&expanded.body.stmts, &|k| matches!(k, StmtKind::Assume(_))), 0);
    }

    #[test]
    fn test_contracted_callee_is_abstracted() {
        let (program, cg) = setup(
            "function FunctionOf__h_r(a: int): int;
             procedure h(a: int) returns (r: int) free ensures {:dependency} r == FunctionOf__h_r(a);
             { r := a; }
             procedure main(a: int) returns (b: int) { call b := h(a); }",
        );
        let expanded = expand(&program, "main", &cg, ExpandOptions::default()).unwrap();
        assert_eq!(expanded.abstracted_calls, 1);
        assert_eq!(expanded.inlined_calls, 0);
    }

    #[test]
    fn test_target_contract_ignored_within_depth() {
        let (program, cg) = setup(
            r#"function FunctionOf__h_r(a: int): int;
               procedure h(a: int) returns (r: int)
                 free ensures {:dependency} r == FunctionOf__h_r(a);
               { r := a; }
               procedure {:checkDependency "h"} CheckDependency_h() returns (eq1: bool)
               { var x: int; var y: int; call y := h(x); }"#,
        );
        let expanded = expand(&program, "CheckDependency_h", &cg, ExpandOptions::default()).unwrap();
        assert_eq!(expanded.inlined_calls, 1);
        let contracts = count(&expanded.body.stmts, &|k| matches!(k, StmtKind::Assume(e) if e.to_string().contains("FunctionOf__h_r")));
        assert_eq!(contracts, 0);
    }

    #[test]
    fn test_asserts_become_assumes() {
        let (program, cg) = setup("procedure main(x: int) { assert x > 0; }");
        let expanded = expand(&program, "main", &cg, ExpandOptions::default()).unwrap();
        assert!(matches!(expanded.body.stmts[0].node, StmtKind::Assume(_)));
    }

    #[test]
    fn test_expand_unknown_root() {
        let (program, cg) = setup("procedure ext();");
        assert!(expand(&program, "missing", &cg, ExpandOptions::default()).is_err());
        assert!(expand(&program, "ext", &cg, ExpandOptions::default()).is_err());
    }
}
