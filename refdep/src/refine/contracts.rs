//! Dependency contracts
//!
//! Once a procedure's dependencies are known, each output `o` of `P` is
//! abstracted by an uninterpreted function of exactly its dependencies:
//!
//! ```text
//! function {:dependencyContract "P", "o"} FunctionOf__P_o(arg1: int, ..): int;
//! procedure P(..)
//!   free ensures {:dependency} o == FunctionOf__P_o(x, old(g), ..);
//! ```
//!
//! The expander treats calls to contracted procedures as black boxes, so a
//! caller only sees what each output actually depends on.

use crate::ast::{
    Contract, ContractOrigin, Decl, DeclKind, Expr, FunctionDecl, Metadata, Procedure, Program,
    Span, Type, TypedIdent,
};
use crate::deps::{DepSet, Dependencies, DependencyMap};
use crate::error::{CompileError, Result};

pub const CONTRACT_FUNCTION_PREFIX: &str = "FunctionOf__";

const ARG_PREFIX: &str = "arg";

fn output_type(program: &Program, proc: &Procedure, output: &str) -> Option<Type> {
    proc.outs
        .iter()
        .find(|v| v.name == output)
        .map(|v| v.ty)
        .or_else(|| program.global(output).map(|g| g.var.ty))
}

/// Dependencies in formal order, in-formals first and then globals in
/// declaration order, each paired with how the contract reads it
fn ordered_sources(program: &Program, proc: &Procedure, set: &DepSet) -> Option<Vec<(Expr, Type)>> {
    let vars = set.vars()?;
    let mut sources = Vec::with_capacity(vars.len());
    for v in &proc.ins {
        if vars.contains(&v.name) {
            sources.push((Expr::var(&v.name), v.ty));
        }
    }
    for g in program.globals() {
        if vars.contains(&g.var.name) {
            sources.push((Expr::old(Expr::var(&g.var.name)), g.var.ty));
        }
    }
    // Every dependency must be visible
    (sources.len() == vars.len()).then_some(sources)
}

/// Remove the dependency contracts previously attached to `procedure`
pub fn remove_dependency_contracts(program: &mut Program, procedure: &str) {
    let stale: Vec<_> = program
        .decls_of_kind(DeclKind::Function)
        .filter(|(id, _)| {
            program.metadata(*id).iter().any(|m| {
                matches!(m, Metadata::DependencyContractOf { procedure: p, .. } if p == procedure)
            })
        })
        .map(|(id, _)| id)
        .collect();
    for id in stale {
        program.remove(id);
    }
    if let Some(proc) = program.procedure_mut(procedure) {
        proc.ensures.retain(|c| c.origin != ContractOrigin::Dependency);
    }
}

/// Attach dependency contracts for `deps` to `procedure`, replacing any
/// earlier ones. Wildcard outputs get no contract. Returns the number of
/// outputs contracted.
pub fn attach_dependency_contracts(
    program: &mut Program,
    procedure: &str,
    deps: &Dependencies,
) -> Result<usize> {
    remove_dependency_contracts(program, procedure);
    let proc = program
        .procedure(procedure)
        .cloned()
        .ok_or_else(|| CompileError::resolve_error(format!("unknown procedure `{procedure}`")))?;

    let mut clauses = Vec::new();
    for (output, set) in deps.iter() {
        if set.is_wildcard() {
            continue;
        }
        let Some(ret) = output_type(program, &proc, output) else {
            tracing::debug!(procedure, output, "no contract for invisible output");
            continue;
        };
        let Some(sources) = ordered_sources(program, &proc, set) else {
            tracing::warn!(procedure, output, deps = %set, "dependency outside the read-set");
            continue;
        };

        let name = program.fresh_name(&format!("{CONTRACT_FUNCTION_PREFIX}{procedure}_{output}"));
        let params = sources
            .iter()
            .enumerate()
            .map(|(i, (_, ty))| TypedIdent::new(format!("{ARG_PREFIX}{}", i + 1), *ty))
            .collect();
        let id = program.add(Decl::Function(FunctionDecl {
            name: name.clone(),
            params,
            ret,
            span: Span::SYNTHETIC,
        }))?;
        program.attach(
            id,
            Metadata::DependencyContractOf {
                procedure: procedure.to_string(),
                output: output.to_string(),
            },
        );

        let args = sources.into_iter().map(|(e, _)| e).collect();
        clauses.push(Contract {
            origin: ContractOrigin::Dependency,
            ..Contract::free(Expr::eq(Expr::var(output), Expr::app(name, args)))
        });
    }

    let count = clauses.len();
    if let Some(proc) = program.procedure_mut(procedure) {
        proc.ensures.extend(clauses);
    }
    Ok(count)
}

/// Attach contracts from `map` to every procedure in `procedures` it has
/// an entry for
pub fn attach_all<'a>(
    program: &mut Program,
    map: &DependencyMap,
    procedures: impl IntoIterator<Item = &'a str>,
) -> Result<usize> {
    let mut total = 0;
    for proc in procedures {
        if let Some(deps) = map.get(proc) {
            total += attach_dependency_contracts(program, proc, deps)?;
        }
    }
    Ok(total)
}

/// Whether `procedure` currently carries dependency contracts
pub fn has_dependency_contracts(program: &Program, procedure: &str) -> bool {
    program
        .procedure(procedure)
        .is_some_and(|p| p.ensures.iter().any(|c| c.origin == ContractOrigin::Dependency))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::printer::print_program;
    use crate::types::TypeChecker;

    fn deps(entries: &[(&str, DepSet)]) -> Dependencies {
        entries.iter().map(|(o, s)| (o.to_string(), s.clone())).collect()
    }

    #[test]
    fn test_contract_shape() {
        let mut program = parse_source(
            "test.ivp",
            "var g: int;
             procedure f(x: int, y: int) returns (z: int, w: int) modifies g; { z := x + g; w := y; g := 0; }",
        )
        .unwrap();
        let d = deps(&[
            ("z", DepSet::of(["g", "x"])),
            ("w", DepSet::Wildcard),
            ("g", DepSet::empty()),
        ]);
        let n = attach_dependency_contracts(&mut program, "f", &d).unwrap();
        assert_eq!(n, 2);
        insta::assert_snapshot!(print_program(&program), @r###"
        var g: int;

        procedure f(x: int, y: int) returns (z: int, w: int)
          modifies g;
          free ensures {:dependency} g == FunctionOf__f_g();
          free ensures {:dependency} z == FunctionOf__f_z(x, old(g));
        {
          z := x + g;
          w := y;
          g := 0;
        }
        function {:dependencyContract "f", "g"} FunctionOf__f_g(): int;
        function {:dependencyContract "f", "z"} FunctionOf__f_z(arg1: int, arg2: int): int;
        "###);
        TypeChecker::new().check_program(&program).unwrap();
    }

    #[test]
    fn test_reattach_replaces_contracts() {
        let mut program =
            parse_source("test.ivp", "procedure f(x: int, y: int) returns (z: int) { z := x; }").unwrap();
        attach_dependency_contracts(&mut program, "f", &deps(&[("z", DepSet::of(["x", "y"]))])).unwrap();
        attach_dependency_contracts(&mut program, "f", &deps(&[("z", DepSet::of(["x"]))])).unwrap();

        let proc = program.procedure("f").unwrap();
        assert_eq!(proc.ensures.len(), 1);
        assert_eq!(proc.ensures[0].expr.to_string(), "z == FunctionOf__f_z(x)");
        assert_eq!(program.function("FunctionOf__f_z").unwrap().params.len(), 1);
        assert!(has_dependency_contracts(&program, "f"));

        remove_dependency_contracts(&mut program, "f");
        assert!(!has_dependency_contracts(&program, "f"));
        assert!(program.function("FunctionOf__f_z").is_none());
    }

    #[test]
    fn test_invisible_dependency_is_skipped() {
        let mut program =
            parse_source("test.ivp", "procedure f(x: int) returns (z: int) { z := x; }").unwrap();
        let n = attach_dependency_contracts(&mut program, "f", &deps(&[("z", DepSet::of(["q"]))])).unwrap();
        assert_eq!(n, 0);
        assert!(!has_dependency_contracts(&program, "f"));
    }

    #[test]
    fn test_attach_all() {
        let mut program = parse_source(
            "test.ivp",
            "procedure f(x: int) returns (z: int) { z := x; }
             procedure h(x: int) returns (z: int) { call z := f(x); }",
        )
        .unwrap();
        let mut map = DependencyMap::new();
        map.insert("f", deps(&[("z", DepSet::of(["x"]))]));
        assert_eq!(attach_all(&mut program, &map, ["f", "h"]).unwrap(), 1);
        assert!(has_dependency_contracts(&program, "f"));
        assert!(!has_dependency_contracts(&program, "h"));
    }
}
