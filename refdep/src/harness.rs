//! Self-composition harness construction
//!
//! For a procedure `P` with candidate read-set `R` and mod-set `M`, the
//! harness runs `P` twice on independently havocked inputs:
//!
//! ```text
//! procedure CheckDependency_P() returns (eq1: bool, ..)
//!   ensures P_bm_m1 ==> eq1; ..
//! {
//!   havoc in1_1, ..; havoc <globals in R>;
//!   r1_1, .. := <R>;
//!   call out1_1, .. := P(in1_1, ..);
//!   m1_1, .. := <M>;
//!   ..second side..
//!   assume P_br_r1 ==> r1_1 == r1_2; ..
//!   eq1, .. := m1_1 == m1_2, ..;
//! }
//! ```

use std::collections::HashSet;

use crate::ast::{
    Body, Contract, Decl, Expr, Metadata, Procedure, Program, Stmt, StmtKind, Type, TypedIdent,
    assume_asserts,
};
use crate::callgraph::CallGraph;
use crate::deps::{DependencyMap, UNCONSTRAINED_SOURCE};
use crate::error::{CompileError, Result};
use crate::guard::{Guard, make_input_guard, make_output_guard};
use crate::types::TypeChecker;

/// Depth a checked procedure may be inlined to. Depth 1 would never let a
/// loop body execute.
pub const RECURSION_DEPTH: u32 = 2;

pub const HARNESS_PREFIX: &str = "CheckDependency_";

/// File name suffix of whole-program harness output
pub const HARNESS_FILE_SUFFIX: &str = ".CD.ivp";

const EQ_PREFIX: &str = "eq";
const READ_PREFIX: &str = "r";
const MOD_PREFIX: &str = "m";
const IN_PREFIX: &str = "in";
const OUT_PREFIX: &str = "out";

/// A harness procedure added to a program
#[derive(Debug, Clone)]
pub struct Harness {
    pub name: String,
    pub target: String,
    pub read_set: Vec<String>,
    pub mod_set: Vec<String>,
    pub input_guards: Vec<Guard>,
    pub output_guards: Vec<Guard>,
}

/// Make `target`'s contracts free and its assertions assumptions, so the
/// harness only observes input to output behaviour
pub fn prepare_target(program: &mut Program, target: &str) -> Result<()> {
    let proc = program
        .procedure_mut(target)
        .ok_or_else(|| CompileError::resolve_error(format!("unknown procedure `{target}`")))?;
    for c in proc.requires.iter_mut().chain(proc.ensures.iter_mut()) {
        c.free = true;
    }
    if let Some(body) = proc.body.as_mut() {
        assume_asserts(&mut body.stmts);
    }
    Ok(())
}

/// Fresh local names that clash with neither top-level declarations nor
/// each other
struct LocalNames<'a> {
    program: &'a Program,
    taken: HashSet<String>,
    locals: Vec<TypedIdent>,
}

impl<'a> LocalNames<'a> {
    fn new(program: &'a Program) -> Self {
        Self {
            program,
            taken: HashSet::new(),
            locals: Vec::new(),
        }
    }

    fn fresh(&mut self, base: &str) -> String {
        let mut name = self.program.fresh_name(base);
        let mut n = 0;
        while self.taken.contains(&name) {
            n += 1;
            name = self.program.fresh_name(&format!("{base}_{n}"));
        }
        self.taken.insert(name.clone());
        name
    }

    fn local(&mut self, base: &str, ty: Type) -> String {
        let name = self.fresh(base);
        self.locals.push(TypedIdent::new(name.clone(), ty));
        name
    }
}

/// One side of the self-composition
struct Side {
    inputs: Vec<String>,
    outputs: Vec<String>,
    reads: Vec<String>,
    mods: Vec<String>,
}

fn stmt(kind: StmtKind) -> Stmt {
    Stmt::synthetic(kind)
}

fn var_type(program: &Program, proc: &Procedure, name: &str) -> Option<Type> {
    proc.ins
        .iter()
        .chain(proc.outs.iter())
        .find(|v| v.name == name)
        .map(|v| v.ty)
        .or_else(|| program.global(name).map(|g| g.var.ty))
}

/// Build the check-dependency harness of `target` and add it to the program.
///
/// `read_set` entries must be in-formals or globals, `mod_set` entries
/// out-formals or globals. The unconstrained-source sentinel is dropped
/// from the read-set.
pub fn build_harness(
    program: &mut Program,
    call_graph: &mut CallGraph,
    target: &str,
    read_set: &[String],
    mod_set: &[String],
) -> Result<Harness> {
    let proc = program
        .procedure(target)
        .cloned()
        .ok_or_else(|| CompileError::resolve_error(format!("unknown procedure `{target}`")))?;

    let mut reads: Vec<String> = Vec::new();
    for r in read_set {
        if r == UNCONSTRAINED_SOURCE || reads.contains(r) {
            continue;
        }
        if proc.in_index(r).is_none() && !program.is_global(r) {
            return Err(CompileError::resolve_error(format!(
                "read-set entry `{r}` of `{target}` is neither an input nor a global"
            )));
        }
        reads.push(r.clone());
    }
    let mut mods: Vec<String> = Vec::new();
    for m in mod_set {
        if mods.contains(m) {
            continue;
        }
        if proc.out_index(m).is_none() && !program.is_global(m) {
            return Err(CompileError::resolve_error(format!(
                "mod-set entry `{m}` of `{target}` is neither an output nor a global"
            )));
        }
        mods.push(m.clone());
    }

    if program.inline_depth(target).is_none() {
        if let Some(id) = program.lookup(target) {
            program.attach(id, Metadata::Inline(RECURSION_DEPTH));
        }
    }

    let input_guards = reads
        .iter()
        .map(|r| make_input_guard(program, target, r))
        .collect::<Result<Vec<_>>>()?;
    let output_guards = mods
        .iter()
        .map(|m| make_output_guard(program, target, m))
        .collect::<Result<Vec<_>>>()?;

    let name = program.fresh_name(&format!("{HARNESS_PREFIX}{target}"));
    let mut names = LocalNames::new(program);
    names.taken.insert(name.clone());

    let eq_outs: Vec<String> = (1..=mods.len())
        .map(|k| names.fresh(&format!("{EQ_PREFIX}{k}")))
        .collect();

    let mut sides = Vec::with_capacity(2);
    for s in 1..=2 {
        let inputs = proc
            .ins
            .iter()
            .enumerate()
            .map(|(i, v)| names.local(&format!("{IN_PREFIX}{}_{s}", i + 1), v.ty))
            .collect();
        let outputs = proc
            .outs
            .iter()
            .enumerate()
            .map(|(i, v)| names.local(&format!("{OUT_PREFIX}{}_{s}", i + 1), v.ty))
            .collect();
        let mut snap = |prefix: &str, vars: &[String]| -> Result<Vec<String>> {
            vars.iter()
                .enumerate()
                .map(|(k, v)| {
                    let ty = var_type(program, &proc, v).ok_or_else(|| {
                        CompileError::resolve_error(format!("cannot type `{v}` in `{target}`"))
                    })?;
                    Ok(names.local(&format!("{prefix}{}_{s}", k + 1), ty))
                })
                .collect()
        };
        let reads_s = snap(READ_PREFIX, &reads)?;
        let mods_s = snap(MOD_PREFIX, &mods)?;
        sides.push(Side {
            inputs,
            outputs,
            reads: reads_s,
            mods: mods_s,
        });
    }
    let locals = std::mem::take(&mut names.locals);

    let mut stmts = Vec::new();
    let read_globals: Vec<String> = reads.iter().filter(|r| program.is_global(r)).cloned().collect();
    for side in &sides {
        emit_side(&mut stmts, &proc, &read_globals, &reads, &mods, side);
    }
    let (one, two) = (&sides[0], &sides[1]);
    for (k, guard) in input_guards.iter().enumerate() {
        stmts.push(stmt(StmtKind::Assume(Expr::implies(
            Expr::var(&guard.name),
            Expr::eq(Expr::var(&one.reads[k]), Expr::var(&two.reads[k])),
        ))));
    }
    if !eq_outs.is_empty() {
        stmts.push(stmt(StmtKind::Assign {
            lhs: eq_outs.clone(),
            rhs: (0..mods.len())
                .map(|k| Expr::eq(Expr::var(&one.mods[k]), Expr::var(&two.mods[k])))
                .collect(),
        }));
    }

    let mut harness = Procedure::new(name.clone());
    harness.outs = eq_outs
        .iter()
        .map(|e| TypedIdent::new(e.clone(), Type::Bool))
        .collect();
    harness.ensures = output_guards
        .iter()
        .zip(&eq_outs)
        .map(|(g, eq)| Contract::checked(Expr::implies(Expr::var(&g.name), Expr::var(eq))))
        .collect();
    harness.modifies = program
        .globals()
        .map(|g| g.var.name.clone())
        .filter(|g| reads.contains(g) || mods.contains(g) || proc.modifies.contains(g))
        .collect();
    harness.body = Some(Body { locals, stmts });

    let id = program.add(Decl::Procedure(harness))?;
    program.attach(id, Metadata::CheckDependencyOf(target.to_string()));
    call_graph.add_edge(&name, target);

    tracing::debug!(
        harness = %name,
        reads = reads.len(),
        mods = mods.len(),
        "built check-dependency harness"
    );

    Ok(Harness {
        name,
        target: target.to_string(),
        read_set: reads,
        mod_set: mods,
        input_guards,
        output_guards,
    })
}

fn emit_side(
    stmts: &mut Vec<Stmt>,
    proc: &Procedure,
    read_globals: &[String],
    reads: &[String],
    mods: &[String],
    side: &Side,
) {
    if !side.inputs.is_empty() {
        stmts.push(stmt(StmtKind::Havoc(side.inputs.clone())));
    }
    if !read_globals.is_empty() {
        stmts.push(stmt(StmtKind::Havoc(read_globals.to_vec())));
    }
    if !reads.is_empty() {
        let rhs = reads
            .iter()
            .map(|r| match proc.in_index(r) {
                Some(i) => Expr::var(&side.inputs[i]),
                None => Expr::var(r),
            })
            .collect();
        stmts.push(stmt(StmtKind::Assign {
            lhs: side.reads.clone(),
            rhs,
        }));
    }
    stmts.push(stmt(StmtKind::Call {
        proc: proc.name.clone(),
        args: side.inputs.iter().map(Expr::var).collect(),
        outs: side.outputs.clone(),
    }));
    if !mods.is_empty() {
        let rhs = mods
            .iter()
            .map(|m| match proc.out_index(m) {
                Some(i) => Expr::var(&side.outputs[i]),
                None => Expr::var(m),
            })
            .collect();
        stmts.push(stmt(StmtKind::Assign {
            lhs: side.mods.clone(),
            rhs,
        }));
    }
}

/// Add a harness for every procedure with a body, using `candidates`
/// (pruned to each procedure's visible names) as read and mod sets, and
/// type check the result
pub fn build_all(program: &Program, candidates: &DependencyMap) -> Result<(Program, Vec<Harness>)> {
    let mut out = program.clone();
    let mut call_graph = CallGraph::build(&out);
    let targets: Vec<String> = program
        .procedures()
        .filter(|p| p.body.is_some())
        .map(|p| p.name.clone())
        .collect();

    let mut harnesses = Vec::new();
    for target in targets {
        let Some(proc) = program.procedure(&target) else {
            continue;
        };
        let mut deps = candidates.get(&target).cloned().unwrap_or_default();
        deps.prune(program, proc);
        let reads = deps.read_set(program, proc);
        let mods = deps.mod_set(program, proc);
        prepare_target(&mut out, &target)?;
        harnesses.push(build_harness(&mut out, &mut call_graph, &target, &reads, &mods)?);
    }
    TypeChecker::new().check_program(&out)?;
    Ok((out, harnesses))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::printer::print_procedure;

    fn program(source: &str) -> Program {
        parse_source("test.ivp", source).unwrap()
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_harness_shape() {
        let mut prog = program("procedure f(x: int, y: int) returns (z: int) { z := x; }");
        let mut cg = CallGraph::build(&prog);
        let h = build_harness(&mut prog, &mut cg, "f", &strings(&["x", "y"]), &strings(&["z"])).unwrap();
        assert_eq!(h.name, "CheckDependency_f");
        insta::assert_snapshot!(print_procedure(&prog, &h.name).unwrap(), @r###"
        procedure {:checkDependency "f"} CheckDependency_f() returns (eq1: bool)
          ensures f_bm_z ==> eq1;
        {
          var in1_1: int;
          var in2_1: int;
          var out1_1: int;
          var r1_1: int;
          var r2_1: int;
          var m1_1: int;
          var in1_2: int;
          var in2_2: int;
          var out1_2: int;
          var r1_2: int;
          var r2_2: int;
          var m1_2: int;
          havoc in1_1, in2_1;
          r1_1, r2_1 := in1_1, in2_1;
          call out1_1 := f(in1_1, in2_1);
          m1_1 := out1_1;
          havoc in1_2, in2_2;
          r1_2, r2_2 := in1_2, in2_2;
          call out1_2 := f(in1_2, in2_2);
          m1_2 := out1_2;
          assume f_br_x ==> r1_1 == r1_2;
          assume f_br_y ==> r2_1 == r2_2;
          eq1 := m1_1 == m1_2;
        }
        "###);
        assert_eq!(cg.callees("CheckDependency_f"), vec!["f"]);
        assert_eq!(prog.inline_depth("f"), Some(RECURSION_DEPTH));
        assert_eq!(prog.check_dependency_target("CheckDependency_f"), Some("f"));
        TypeChecker::new().check_program(&prog).unwrap();
    }

    #[test]
    fn test_harness_with_globals() {
        let mut prog = program(
            "var g: int; var h: int;
             procedure f(x: int) returns (z: int) modifies h; { z := x + g; h := g; }",
        );
        let mut cg = CallGraph::build(&prog);
        let h = build_harness(
            &mut prog,
            &mut cg,
            "f",
            &strings(&["x", "g", UNCONSTRAINED_SOURCE]),
            &strings(&["z", "h"]),
        )
        .unwrap();
        assert_eq!(h.read_set, strings(&["x", "g"]));
        assert_eq!(h.input_guards.len(), 2);
        assert_eq!(h.output_guards[1].name, "f_bm_h");
        let harness = prog.procedure(&h.name).unwrap();
        assert_eq!(harness.modifies, strings(&["g", "h"]));
        assert_eq!(harness.outs.len(), 2);
        TypeChecker::new().check_program(&prog).unwrap();
    }

    #[test]
    fn test_harness_locals_avoid_global_names() {
        let mut prog = program(
            "var r1_1: int; procedure f(x: int) returns (z: int) { z := x; }",
        );
        let mut cg = CallGraph::build(&prog);
        build_harness(&mut prog, &mut cg, "f", &strings(&["x"]), &strings(&["z"])).unwrap();
        TypeChecker::new().check_program(&prog).unwrap();
    }

    #[test]
    fn test_harness_rejects_invisible_entries() {
        let mut prog = program("procedure f(x: int) returns (z: int) { var t: int; z := x; }");
        let mut cg = CallGraph::build(&prog);
        assert!(build_harness(&mut prog, &mut cg, "f", &strings(&["t"]), &strings(&["z"])).is_err());
        assert!(build_harness(&mut prog, &mut cg, "f", &strings(&["x"]), &strings(&["x"])).is_err());
        assert!(build_harness(&mut prog, &mut cg, "nope", &[], &[]).is_err());
    }

    #[test]
    fn test_existing_inline_depth_is_kept() {
        let mut prog = program("procedure {:inline 5} f(x: int) returns (z: int) { z := x; }");
        let mut cg = CallGraph::build(&prog);
        build_harness(&mut prog, &mut cg, "f", &strings(&["x"]), &strings(&["z"])).unwrap();
        assert_eq!(prog.inline_depth("f"), Some(5));
    }

    #[test]
    fn test_prepare_target_weakens_contracts() {
        let mut prog = program(
            "procedure f(x: int) returns (z: int) requires x > 0; ensures z > 0; { assert x > 0; z := x; }",
        );
        prepare_target(&mut prog, "f").unwrap();
        let f = prog.procedure("f").unwrap();
        assert!(f.requires[0].free && f.ensures[0].free);
        let body = f.body.as_ref().unwrap();
        assert!(matches!(body.stmts[0].node, StmtKind::Assume(_)));
    }

    #[test]
    fn test_build_all() {
        let prog = program(
            "var g: int;
             procedure f(x: int) returns (z: int) modifies g; { z := x; g := z; }
             procedure ext(a: int) returns (r: int);
             procedure main(a: int) returns (b: int) modifies g; { call b := f(a); }",
        );
        let candidates = crate::baseline::BaselineAnalysis::new(&prog, Default::default()).analyze();
        let (out, harnesses) = build_all(&prog, &candidates).unwrap();
        let names: Vec<&str> = harnesses.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["CheckDependency_f", "CheckDependency_main"]);
        assert!(out.procedure("CheckDependency_ext").is_none());
        // Re-parses after printing
        let text = crate::printer::print_program(&out);
        let reparsed = parse_source("test.CD.ivp", &text).unwrap();
        assert_eq!(reparsed.check_dependency_target("CheckDependency_main"), Some("main"));
    }
}
