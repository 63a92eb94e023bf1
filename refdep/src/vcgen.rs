//! Verification condition generation
//!
//! Forward symbolic execution over an expanded (loop-free, call-free)
//! procedure body. Assignments substitute, `havoc` introduces a fresh
//! symbol and branches merge with `ite`. The generated condition is
//!
//! ```text
//! requires ==> (inner assertions && (assumptions ==> ensures))
//! ```
//!
//! where each inner assertion is guarded by the assumptions preceding it.

use std::collections::HashMap;

use thiserror::Error;

use crate::ast::{BinOp, Decl, Expr, Program, Stmt, StmtKind, UnOp};
use crate::smt::{ArithOp, CmpOp, Sort, Term};

const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Name of the fresh symbol standing for a nondeterministic branch
const CHOICE_SYMBOL: &str = "nondet";

#[derive(Debug, Error)]
pub enum VcError {
    #[error("unknown procedure `{0}`")]
    UnknownProcedure(String),

    #[error("procedure `{0}` has no body")]
    MissingBody(String),

    #[error("procedure `{procedure}` still contains a {what}; expand it before generating a VC")]
    Unexpanded {
        procedure: String,
        what: &'static str,
    },

    #[error("unknown symbol `{name}` in `{procedure}`")]
    UnknownSymbol { procedure: String, name: String },

    #[error("unknown function `{0}`")]
    UnknownFunction(String),
}

/// VC generator for one program
#[derive(Debug, Default)]
pub struct VcGen {
    constants: HashMap<String, Term>,
    functions: HashMap<String, Sort>,
    fresh: usize,
}

impl VcGen {
    /// Register the program's constants and functions
    pub fn initialize(program: &Program) -> Self {
        let constants: HashMap<String, Term> = program
            .constants()
            .map(|(_, c)| {
                let name = c.var.name.clone();
                let term = Term::symbol(name.clone(), Sort::from(c.var.ty));
                (name, term)
            })
            .collect();
        let functions: HashMap<String, Sort> = program
            .decls()
            .filter_map(|(_, d)| match d {
                Decl::Function(f) => Some((f.name.clone(), Sort::from(f.ret))),
                _ => None,
            })
            .collect();
        Self {
            constants,
            functions,
            fresh: 0,
        }
    }

    /// Formula-level representative of a constant, e.g. a guard
    pub fn lookup_constant(&self, name: &str) -> Option<&Term> {
        self.constants.get(name)
    }

    /// Release per-program state
    pub fn finalize(&mut self) {
        self.constants.clear();
        self.functions.clear();
        self.fresh = 0;
    }

    /// Generate the VC of `procedure`, whose body must be expanded
    pub fn generate(&mut self, program: &Program, procedure: &str) -> Result<Term, VcError> {
        let proc = program
            .procedure(procedure)
            .ok_or_else(|| VcError::UnknownProcedure(procedure.to_string()))?;
        let body = proc
            .body
            .as_ref()
            .ok_or_else(|| VcError::MissingBody(procedure.to_string()))?;

        let mut exec = Exec {
            vcgen: self,
            procedure,
            sorts: HashMap::new(),
            assumptions: Vec::new(),
            obligations: Vec::new(),
        };

        let mut entry: HashMap<String, Term> = HashMap::new();
        for v in program.globals().map(|g| &g.var).chain(&proc.ins) {
            let sort = Sort::from(v.ty);
            exec.sorts.insert(v.name.clone(), sort);
            entry.insert(v.name.clone(), Term::symbol(v.name.clone(), sort));
        }
        let mut state = entry.clone();
        for v in proc.outs.iter().chain(&body.locals) {
            let sort = Sort::from(v.ty);
            exec.sorts.insert(v.name.clone(), sort);
            let initial = exec.fresh_symbol(&v.name, sort);
            state.insert(v.name.clone(), initial);
        }

        let pre = proc
            .requires
            .iter()
            .map(|c| exec.eval(&c.expr, &entry, &entry))
            .collect::<Result<Vec<_>, _>>()?;

        exec.block(&body.stmts, &mut state, &entry, &Term::bool(true))?;

        let post = proc
            .ensures
            .iter()
            .filter(|c| !c.free)
            .map(|c| exec.eval(&c.expr, &state, &entry))
            .collect::<Result<Vec<_>, _>>()?;

        let Exec {
            assumptions,
            mut obligations,
            ..
        } = exec;
        obligations.push(Term::implies(Term::and(assumptions), Term::and(post)));
        let vc = Term::implies(Term::and(pre), Term::and(obligations));
        tracing::debug!(procedure, nodes = vc.size(), "generated verification condition");
        Ok(vc)
    }
}

struct Exec<'a> {
    vcgen: &'a mut VcGen,
    procedure: &'a str,
    sorts: HashMap<String, Sort>,
    assumptions: Vec<Term>,
    obligations: Vec<Term>,
}

type State = HashMap<String, Term>;

impl Exec<'_> {
    fn fresh_symbol(&mut self, base: &str, sort: Sort) -> Term {
        loop {
            self.vcgen.fresh += 1;
            let name = format!("{base}@{}", self.vcgen.fresh);
            if !self.sorts.contains_key(&name) && !self.vcgen.constants.contains_key(&name) {
                return Term::symbol(name, sort);
            }
        }
    }

    fn unknown(&self, name: &str) -> VcError {
        VcError::UnknownSymbol {
            procedure: self.procedure.to_string(),
            name: name.to_string(),
        }
    }

    fn block(&mut self, stmts: &[Stmt], state: &mut State, entry: &State, guard: &Term) -> Result<(), VcError> {
        for stmt in stmts {
            self.stmt(stmt, state, entry, guard)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt, state: &mut State, entry: &State, guard: &Term) -> Result<(), VcError> {
        match &stmt.node {
            StmtKind::Assign { lhs, rhs } => {
                let values = rhs
                    .iter()
                    .map(|e| self.eval(e, state, entry))
                    .collect::<Result<Vec<_>, _>>()?;
                for (name, value) in lhs.iter().zip(values) {
                    if !state.contains_key(name) {
                        return Err(self.unknown(name));
                    }
                    state.insert(name.clone(), value);
                }
            }
            StmtKind::Havoc(vars) => {
                for name in vars {
                    let sort = *self.sorts.get(name).ok_or_else(|| self.unknown(name))?;
                    let value = self.fresh_symbol(name, sort);
                    state.insert(name.clone(), value);
                }
            }
            StmtKind::Assume(e) => {
                let cond = self.eval(e, state, entry)?;
                self.assumptions.push(Term::implies(guard.clone(), cond));
            }
            StmtKind::Assert(e) => {
                let cond = self.eval(e, state, entry)?;
                let premise = Term::and(self.assumptions.clone());
                self.obligations
                    .push(Term::implies(premise, Term::implies(guard.clone(), cond)));
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = match cond {
                    Some(e) => self.eval(e, state, entry)?,
                    None => self.fresh_symbol(CHOICE_SYMBOL, Sort::Bool),
                };
                let mut then_state = state.clone();
                let then_guard = Term::and(vec![guard.clone(), c.clone()]);
                self.block(then_branch, &mut then_state, entry, &then_guard)?;
                let else_guard = Term::and(vec![guard.clone(), Term::not(c.clone())]);
                self.block(else_branch, state, entry, &else_guard)?;
                for (name, then_value) in then_state {
                    let merged = match state.get(&name) {
                        Some(else_value) => Term::ite(c.clone(), then_value, else_value.clone()),
                        None => then_value,
                    };
                    state.insert(name, merged);
                }
            }
            StmtKind::Call { .. } => {
                return Err(VcError::Unexpanded {
                    procedure: self.procedure.to_string(),
                    what: "call",
                });
            }
            StmtKind::While { .. } => {
                return Err(VcError::Unexpanded {
                    procedure: self.procedure.to_string(),
                    what: "loop",
                });
            }
        }
        Ok(())
    }

    fn eval(&self, e: &Expr, state: &State, old: &State) -> Result<Term, VcError> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.eval_inner(e, state, old))
    }

    fn eval_inner(&self, e: &Expr, state: &State, old: &State) -> Result<Term, VcError> {
        Ok(match e {
            Expr::IntLit(n) => Term::int(*n),
            Expr::BoolLit(b) => Term::bool(*b),
            Expr::Var(name) => state
                .get(name)
                .or_else(|| self.vcgen.constants.get(name))
                .cloned()
                .ok_or_else(|| self.unknown(name))?,
            // Locals have no pre-state; they read their current value
            Expr::Old(inner) => {
                let mut pre = state.clone();
                pre.extend(old.iter().map(|(k, v)| (k.clone(), v.clone())));
                self.eval(inner, &pre, old)?
            }
            Expr::Binary { left, op, right } => {
                let l = self.eval(left, state, old)?;
                let r = self.eval(right, state, old)?;
                match op {
                    BinOp::Add => Term::arith(ArithOp::Add, l, r),
                    BinOp::Sub => Term::arith(ArithOp::Sub, l, r),
                    BinOp::Mul => Term::arith(ArithOp::Mul, l, r),
                    BinOp::Div => Term::arith(ArithOp::Div, l, r),
                    BinOp::Mod => Term::arith(ArithOp::Mod, l, r),
                    BinOp::Eq | BinOp::Iff => Term::eq(l, r),
                    BinOp::Ne => Term::not(Term::eq(l, r)),
                    BinOp::Lt => Term::cmp(CmpOp::Lt, l, r),
                    BinOp::Le => Term::cmp(CmpOp::Le, l, r),
                    BinOp::Gt => Term::cmp(CmpOp::Gt, l, r),
                    BinOp::Ge => Term::cmp(CmpOp::Ge, l, r),
                    BinOp::And => Term::and(vec![l, r]),
                    BinOp::Or => Term::or(vec![l, r]),
                    BinOp::Implies => Term::implies(l, r),
                }
            }
            Expr::Unary { op, expr } => {
                let t = self.eval(expr, state, old)?;
                match op {
                    UnOp::Neg => Term::neg(t),
                    UnOp::Not => Term::not(t),
                }
            }
            Expr::App { func, args } => {
                let sort = *self
                    .vcgen
                    .functions
                    .get(func)
                    .ok_or_else(|| VcError::UnknownFunction(func.clone()))?;
                let args = args
                    .iter()
                    .map(|a| self.eval(a, state, old))
                    .collect::<Result<Vec<_>, _>>()?;
                Term::app(func.clone(), args, sort)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn vc(source: &str, procedure: &str) -> Result<Term, VcError> {
        let program = parse_source("test.ivp", source).unwrap();
        let mut vcgen = VcGen::initialize(&program);
        vcgen.generate(&program, procedure)
    }

    #[test]
    fn test_assignment_substitutes() {
        let t = vc("procedure p(x: int) returns (z: int) ensures z == x; { z := x; }", "p").unwrap();
        assert_eq!(t, Term::bool(true));
    }

    #[test]
    fn test_havoc_is_fresh() {
        let t = vc("procedure p(x: int) returns (z: int) ensures z == x; { havoc z; }", "p").unwrap();
        assert_eq!(t.to_string(), "(= z@2 x)");
    }

    #[test]
    fn test_branches_merge() {
        let t = vc(
            "procedure p(x: int) returns (z: int) ensures z >= 0;
             { if (x > 0) { z := 1; } else { z := 0; } }",
            "p",
        )
        .unwrap();
        assert_eq!(t.to_string(), "(>= (ite (> x 0) 1 0) 0)");
    }

    #[test]
    fn test_nondet_branch_uses_choice_symbol() {
        let t = vc(
            "procedure p() returns (z: int) ensures z == 1; { if (*) { z := 1; } else { z := 2; } }",
            "p",
        )
        .unwrap();
        assert_eq!(t.to_string(), "(= (ite nondet@2 1 2) 1)");
    }

    #[test]
    fn test_assumptions_guard_postcondition() {
        let t = vc(
            "procedure p(x: int) returns (z: int) ensures z > 0; { assume x > 0; z := x; }",
            "p",
        )
        .unwrap();
        assert_eq!(t.to_string(), "(=> (> x 0) (> x 0))");
    }

    #[test]
    fn test_requires_and_old() {
        let t = vc(
            "var g: int;
             procedure p() modifies g; requires g > 0; ensures g > old(g); { g := g + 1; }",
            "p",
        )
        .unwrap();
        assert_eq!(t.to_string(), "(=> (> g 0) (> (+ g 1) g))");
    }

    #[test]
    fn test_free_ensures_are_not_obligations() {
        let t = vc("procedure p() returns (z: int) free ensures z == 0; { havoc z; }", "p").unwrap();
        assert_eq!(t, Term::bool(true));
    }

    #[test]
    fn test_guard_constants() {
        let program = parse_source(
            "test.ivp",
            "const {:guardReadSet \"p\", \"x\"} p_br_x: bool;
             procedure p(x: int) returns (z: int) ensures p_br_x ==> z == x; { z := x; }",
        )
        .unwrap();
        let mut vcgen = VcGen::initialize(&program);
        let guard = vcgen.lookup_constant("p_br_x").cloned().unwrap();
        assert_eq!(guard.sort(), Sort::Bool);
        assert!(vcgen.lookup_constant("x").is_none());
        assert_eq!(vcgen.generate(&program, "p").unwrap(), Term::bool(true));
        vcgen.finalize();
        assert!(vcgen.lookup_constant("p_br_x").is_none());
    }

    #[test]
    fn test_unexpanded_call_is_rejected() {
        let err = vc("procedure q(); procedure p() { call q(); }", "p").unwrap_err();
        assert!(matches!(err, VcError::Unexpanded { what: "call", .. }));
        let err = vc("procedure q();", "q").unwrap_err();
        assert!(matches!(err, VcError::MissingBody(_)));
    }
}
