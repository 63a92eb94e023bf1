//! Statement AST nodes

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{Expr, Spanned};

/// Statement with its source location
pub type Stmt = Spanned<StmtKind>;

/// Statement kinds
///
/// The language is structured: there are no labels or gotos, and a
/// procedure body ends by falling off its last statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// Parallel assignment: `x, y := e1, e2;`
    Assign { lhs: Vec<String>, rhs: Vec<Expr> },

    /// Nondeterministic assignment: `havoc x, y;`
    Havoc(Vec<String>),

    /// `assume e;`
    Assume(Expr),

    /// `assert e;`
    Assert(Expr),

    /// `call x, y := p(e1, e2);`
    Call {
        proc: String,
        args: Vec<Expr>,
        outs: Vec<String>,
    },

    /// `if (c) { .. } else { .. }`; a `None` condition is `if (*)`
    If {
        cond: Option<Expr>,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },

    /// `while (c) { .. }`; a `None` condition is `while (*)`
    While { cond: Option<Expr>, body: Vec<Stmt> },
}

impl StmtKind {
    pub fn assign1(lhs: impl Into<String>, rhs: Expr) -> Self {
        StmtKind::Assign {
            lhs: vec![lhs.into()],
            rhs: vec![rhs],
        }
    }
}

/// Variables written by the statements: assignment, havoc and call targets
pub fn assigned_vars(stmts: &[Stmt]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_assigned(stmts, &mut out);
    out
}

fn collect_assigned(stmts: &[Stmt], out: &mut BTreeSet<String>) {
    for stmt in stmts {
        match &stmt.node {
            StmtKind::Assign { lhs, .. } => out.extend(lhs.iter().cloned()),
            StmtKind::Havoc(vars) => out.extend(vars.iter().cloned()),
            StmtKind::Call { outs, .. } => out.extend(outs.iter().cloned()),
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                collect_assigned(then_branch, out);
                collect_assigned(else_branch, out);
            }
            StmtKind::While { body, .. } => collect_assigned(body, out),
            StmtKind::Assume(_) | StmtKind::Assert(_) => {}
        }
    }
}

/// Names of procedures called anywhere in the statements, in first-call order
pub fn called_procs(stmts: &[Stmt]) -> Vec<String> {
    let mut out = Vec::new();
    collect_calls(stmts, &mut out);
    out
}

fn collect_calls(stmts: &[Stmt], out: &mut Vec<String>) {
    for stmt in stmts {
        match &stmt.node {
            StmtKind::Call { proc, .. } => {
                if !out.contains(proc) {
                    out.push(proc.clone());
                }
            }
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                collect_calls(then_branch, out);
                collect_calls(else_branch, out);
            }
            StmtKind::While { body, .. } => collect_calls(body, out),
            _ => {}
        }
    }
}

/// Replace every `assert e` with `assume e`, recursively
pub fn assume_asserts(stmts: &mut [Stmt]) {
    for stmt in stmts {
        match &mut stmt.node {
            StmtKind::Assert(e) => {
                let e = std::mem::replace(e, Expr::BoolLit(true));
                stmt.node = StmtKind::Assume(e);
            }
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                assume_asserts(then_branch);
                assume_asserts(else_branch);
            }
            StmtKind::While { body, .. } => assume_asserts(body),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Stmt> {
        vec![
            Stmt::synthetic(StmtKind::assign1("t", Expr::var("x"))),
            Stmt::synthetic(StmtKind::If {
                cond: None,
                then_branch: vec![Stmt::synthetic(StmtKind::Call {
                    proc: "h".to_string(),
                    args: vec![Expr::var("t")],
                    outs: vec!["z".to_string()],
                })],
                else_branch: vec![Stmt::synthetic(StmtKind::Assert(Expr::BoolLit(false)))],
            }),
            Stmt::synthetic(StmtKind::While {
                cond: None,
                body: vec![Stmt::synthetic(StmtKind::Havoc(vec!["g".to_string()]))],
            }),
        ]
    }

    #[test]
    fn test_assigned_vars_recurses() {
        let vars: Vec<_> = assigned_vars(&sample()).into_iter().collect();
        assert_eq!(vars, vec!["g", "t", "z"]);
    }

    #[test]
    fn test_called_procs() {
        assert_eq!(called_procs(&sample()), vec!["h".to_string()]);
    }

    #[test]
    fn test_assume_asserts() {
        let mut stmts = sample();
        assume_asserts(&mut stmts);
        let StmtKind::If { else_branch, .. } = &stmts[1].node else {
            panic!("expected if");
        };
        assert_eq!(else_branch[0].node, StmtKind::Assume(Expr::BoolLit(false)));
    }
}
