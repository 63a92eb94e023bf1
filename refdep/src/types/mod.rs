//! Name resolution and type checking
//!
//! The checker never mutates the program, so it can be re-run after every
//! synthesized declaration is inserted.

use std::collections::{HashMap, HashSet};

use crate::ast::*;
use crate::error::{CompileError, Result};
use crate::util::{find_similar_name, format_suggestion_hint, suggestion_threshold};

/// Where an expression appears, which decides whether `old` is allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Requires,
    Ensures,
    Body,
}

/// What a name in procedure scope refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarKind {
    In,
    Out,
    Local,
    Global,
    Constant,
}

/// Type checker state for one procedure
struct ProcScope<'a> {
    program: &'a Program,
    proc: &'a Procedure,
    locals: HashMap<&'a str, (VarKind, Type)>,
    modifies: HashSet<&'a str>,
}

/// Type checker
#[derive(Debug, Default)]
pub struct TypeChecker {
    checked_procedures: usize,
}

impl TypeChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of procedures checked by the last `check_program` call
    pub fn checked_procedures(&self) -> usize {
        self.checked_procedures
    }

    /// Resolve and type check a whole program
    pub fn check_program(&mut self, program: &Program) -> Result<()> {
        self.checked_procedures = 0;
        for (_, decl) in program.decls() {
            match decl {
                Decl::Function(f) => check_unique_params(program, &f.name, &f.params, f.span)?,
                Decl::Procedure(p) => {
                    check_procedure(program, p)?;
                    self.checked_procedures += 1;
                }
                Decl::Global(_) | Decl::Constant(_) => {}
            }
        }
        Ok(())
    }
}

fn check_unique_params(program: &Program, owner: &str, params: &[TypedIdent], span: Span) -> Result<()> {
    let mut seen = HashSet::new();
    for p in params {
        if !seen.insert(p.name.as_str()) {
            return Err(CompileError::type_error(
                format!("duplicate parameter `{}` in `{owner}`", p.name),
                span,
            ));
        }
        if program.contains_name(&p.name) {
            return Err(CompileError::type_error(
                format!("parameter `{}` of `{owner}` shadows a top-level declaration", p.name),
                span,
            ));
        }
    }
    Ok(())
}

fn check_procedure(program: &Program, proc: &Procedure) -> Result<()> {
    let mut locals = HashMap::new();
    let formals = proc
        .ins
        .iter()
        .map(|v| (v, VarKind::In))
        .chain(proc.outs.iter().map(|v| (v, VarKind::Out)))
        .chain(
            proc.body
                .iter()
                .flat_map(|b| b.locals.iter())
                .map(|v| (v, VarKind::Local)),
        );
    for (var, kind) in formals {
        if program.contains_name(&var.name) {
            return Err(CompileError::type_error(
                format!(
                    "`{}` in procedure `{}` shadows a top-level declaration",
                    var.name, proc.name
                ),
                proc.span,
            ));
        }
        if locals.insert(var.name.as_str(), (kind, var.ty)).is_some() {
            return Err(CompileError::type_error(
                format!("duplicate variable `{}` in procedure `{}`", var.name, proc.name),
                proc.span,
            ));
        }
    }

    let mut modifies = HashSet::new();
    for name in &proc.modifies {
        if !program.is_global(name) {
            return Err(CompileError::type_error(
                format!(
                    "`{}` in the modifies clause of `{}` is not a global variable{}",
                    name,
                    proc.name,
                    suggest(name, program.globals().map(|g| g.var.name.as_str()))
                ),
                proc.span,
            ));
        }
        modifies.insert(name.as_str());
    }

    let scope = ProcScope {
        program,
        proc,
        locals,
        modifies,
    };

    for c in &proc.requires {
        scope.expect(&c.expr, Type::Bool, Context::Requires, c.span)?;
    }
    for c in &proc.ensures {
        scope.expect(&c.expr, Type::Bool, Context::Ensures, c.span)?;
    }
    if let Some(body) = &proc.body {
        for stmt in &body.stmts {
            scope.check_stmt(stmt)?;
        }
    }
    Ok(())
}

fn suggest<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> String {
    format_suggestion_hint(find_similar_name(
        name,
        candidates,
        suggestion_threshold(name),
    ))
}

impl<'a> ProcScope<'a> {
    fn resolve(&self, name: &str, span: Span) -> Result<(VarKind, Type)> {
        if let Some(entry) = self.locals.get(name) {
            return Ok(*entry);
        }
        if let Some(g) = self.program.global(name) {
            return Ok((VarKind::Global, g.var.ty));
        }
        if let Some(c) = self.program.constant(name) {
            return Ok((VarKind::Constant, c.var.ty));
        }
        let candidates = self.locals.keys().copied().chain(
            self.program
                .decls()
                .filter(|(_, d)| matches!(d, Decl::Global(_) | Decl::Constant(_)))
                .map(|(_, d)| d.name()),
        );
        Err(CompileError::type_error(
            format!(
                "undefined variable: `{}` in procedure `{}`{}",
                name,
                self.proc.name,
                suggest(name, candidates)
            ),
            span,
        ))
    }

    fn expect(&self, expr: &Expr, expected: Type, ctx: Context, span: Span) -> Result<()> {
        let found = self.infer(expr, ctx, span)?;
        if found != expected {
            return Err(CompileError::type_error(
                format!("expected `{expected}`, found `{found}` in `{expr}`"),
                span,
            ));
        }
        Ok(())
    }

    fn infer(&self, expr: &Expr, ctx: Context, span: Span) -> Result<Type> {
        match expr {
            Expr::IntLit(_) => Ok(Type::Int),
            Expr::BoolLit(_) => Ok(Type::Bool),
            Expr::Var(name) => {
                let (kind, ty) = self.resolve(name, span)?;
                if ctx == Context::Requires && kind == VarKind::Out {
                    return Err(CompileError::type_error(
                        format!("output `{name}` cannot be referenced in a precondition"),
                        span,
                    ));
                }
                Ok(ty)
            }
            Expr::Old(inner) => {
                if ctx == Context::Requires {
                    return Err(CompileError::type_error("`old` is not allowed in a precondition", span));
                }
                self.infer(inner, ctx, span)
            }
            Expr::Unary { op, expr } => {
                let (want, result) = match op {
                    UnOp::Neg => (Type::Int, Type::Int),
                    UnOp::Not => (Type::Bool, Type::Bool),
                };
                self.expect(expr, want, ctx, span)?;
                Ok(result)
            }
            Expr::Binary { left, op, right } => {
                let lt = self.infer(left, ctx, span)?;
                let rt = self.infer(right, ctx, span)?;
                let (operand, result) = if op.is_arithmetic() {
                    (Some(Type::Int), Type::Int)
                } else if op.is_ordering() {
                    (Some(Type::Int), Type::Bool)
                } else if op.is_logical() {
                    (Some(Type::Bool), Type::Bool)
                } else {
                    (None, Type::Bool)
                };
                let ok = match operand {
                    Some(t) => lt == t && rt == t,
                    None => lt == rt,
                };
                if !ok {
                    return Err(CompileError::type_error(
                        format!("operator `{op}` cannot be applied to `{lt}` and `{rt}`"),
                        span,
                    ));
                }
                Ok(result)
            }
            Expr::App { func, args } => {
                let f = self.program.function(func).ok_or_else(|| {
                    let names = self.program.decls_of_kind(DeclKind::Function).map(|(_, d)| d.name());
                    CompileError::type_error(
                        format!("undefined function: `{}`{}", func, suggest(func, names)),
                        span,
                    )
                })?;
                if f.params.len() != args.len() {
                    return Err(CompileError::type_error(
                        format!(
                            "function `{func}` expects {} arguments, found {}",
                            f.params.len(),
                            args.len()
                        ),
                        span,
                    ));
                }
                for (param, arg) in f.params.iter().zip(args) {
                    self.expect(arg, param.ty, ctx, span)?;
                }
                Ok(f.ret)
            }
        }
    }

    /// Check that `name` may be written by this procedure's body
    fn assignable(&self, name: &str, span: Span) -> Result<Type> {
        let (kind, ty) = self.resolve(name, span)?;
        match kind {
            VarKind::Out | VarKind::Local => Ok(ty),
            VarKind::Global if self.modifies.contains(name) => Ok(ty),
            VarKind::Global => Err(CompileError::type_error(
                format!(
                    "global `{name}` is assigned but missing from the modifies clause of `{}`",
                    self.proc.name
                ),
                span,
            )),
            VarKind::In => Err(CompileError::type_error(
                format!("input `{name}` cannot be assigned"),
                span,
            )),
            VarKind::Constant => Err(CompileError::type_error(
                format!("constant `{name}` cannot be assigned"),
                span,
            )),
        }
    }

    fn distinct_targets(&self, targets: &[String], span: Span) -> Result<()> {
        let mut seen = HashSet::new();
        for t in targets {
            if !seen.insert(t.as_str()) {
                return Err(CompileError::type_error(
                    format!("`{t}` is assigned more than once"),
                    span,
                ));
            }
        }
        Ok(())
    }

    fn check_block(&self, stmts: &[Stmt]) -> Result<()> {
        stmts.iter().try_for_each(|s| self.check_stmt(s))
    }

    fn check_guard(&self, cond: &Option<Expr>, span: Span) -> Result<()> {
        match cond {
            Some(c) => self.expect(c, Type::Bool, Context::Body, span),
            None => Ok(()),
        }
    }

    fn check_stmt(&self, stmt: &Stmt) -> Result<()> {
        let span = stmt.span;
        match &stmt.node {
            StmtKind::Assign { lhs, rhs } => {
                if lhs.len() != rhs.len() {
                    return Err(CompileError::type_error(
                        format!(
                            "assignment has {} targets but {} values",
                            lhs.len(),
                            rhs.len()
                        ),
                        span,
                    ));
                }
                self.distinct_targets(lhs, span)?;
                for (target, value) in lhs.iter().zip(rhs) {
                    let ty = self.assignable(target, span)?;
                    self.expect(value, ty, Context::Body, span)?;
                }
                Ok(())
            }
            StmtKind::Havoc(vars) => {
                self.distinct_targets(vars, span)?;
                vars.iter().try_for_each(|v| self.assignable(v, span).map(|_| ()))
            }
            StmtKind::Assume(e) | StmtKind::Assert(e) => {
                self.expect(e, Type::Bool, Context::Body, span)
            }
            StmtKind::Call { proc, args, outs } => self.check_call(proc, args, outs, span),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.check_guard(cond, span)?;
                self.check_block(then_branch)?;
                self.check_block(else_branch)
            }
            StmtKind::While { cond, body } => {
                self.check_guard(cond, span)?;
                self.check_block(body)
            }
        }
    }

    fn check_call(&self, name: &str, args: &[Expr], outs: &[String], span: Span) -> Result<()> {
        let callee = self.program.procedure(name).ok_or_else(|| {
            let names = self.program.procedures().map(|p| p.name.as_str());
            CompileError::type_error(
                format!("undefined procedure: `{}`{}", name, suggest(name, names)),
                span,
            )
        })?;
        if callee.ins.len() != args.len() || callee.outs.len() != outs.len() {
            return Err(CompileError::type_error(
                format!(
                    "call to `{name}` has {} arguments and {} results, expected {} and {}",
                    args.len(),
                    outs.len(),
                    callee.ins.len(),
                    callee.outs.len()
                ),
                span,
            ));
        }
        for (formal, arg) in callee.ins.iter().zip(args) {
            self.expect(arg, formal.ty, Context::Body, span)?;
        }
        self.distinct_targets(outs, span)?;
        for (formal, out) in callee.outs.iter().zip(outs) {
            let ty = self.assignable(out, span)?;
            if ty != formal.ty {
                return Err(CompileError::type_error(
                    format!(
                        "result `{}` of `{name}` has type `{}`, but `{out}` has type `{ty}`",
                        formal.name, formal.ty
                    ),
                    span,
                ));
            }
        }
        for g in &callee.modifies {
            if !self.modifies.contains(g.as_str()) {
                return Err(CompileError::type_error(
                    format!(
                        "`{}` calls `{name}`, which modifies `{g}`, but does not list it in its modifies clause",
                        self.proc.name
                    ),
                    span,
                ));
            }
        }
        Ok(())
    }
}
