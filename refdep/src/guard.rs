//! Guard constants
//!
//! A guard is a free boolean constant tagged with the procedure and variable
//! it stands for. Input guards switch on equality of one read-set entry
//! across the two harness runs; output guards select which equivalence
//! obligation is checked. The tag lives in the program's metadata table, so
//! the owner of a guard can always be recovered from its name.

use crate::ast::{Constant, Decl, DeclId, Metadata, Program, Span, Type, TypedIdent};
use crate::error::{CompileError, Result};

const INPUT_GUARD_NAME: &str = "br";
const OUTPUT_GUARD_NAME: &str = "bm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardRole {
    Input,
    Output,
}

impl GuardRole {
    fn infix(self) -> &'static str {
        match self {
            GuardRole::Input => INPUT_GUARD_NAME,
            GuardRole::Output => OUTPUT_GUARD_NAME,
        }
    }

    fn metadata(self, procedure: &str, variable: &str) -> Metadata {
        let (procedure, variable) = (procedure.to_string(), variable.to_string());
        match self {
            GuardRole::Input => Metadata::InputGuardOf {
                procedure,
                variable,
            },
            GuardRole::Output => Metadata::OutputGuardOf {
                procedure,
                variable,
            },
        }
    }
}

/// A guard constant declared in a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    pub id: DeclId,
    pub name: String,
    pub procedure: String,
    pub variable: String,
    pub role: GuardRole,
}

/// Declare the input guard of `variable` in `procedure`
pub fn make_input_guard(program: &mut Program, procedure: &str, variable: &str) -> Result<Guard> {
    make_guard(program, procedure, variable, GuardRole::Input)
}

/// Declare the output guard of `variable` in `procedure`
pub fn make_output_guard(program: &mut Program, procedure: &str, variable: &str) -> Result<Guard> {
    make_guard(program, procedure, variable, GuardRole::Output)
}

fn make_guard(program: &mut Program, procedure: &str, variable: &str, role: GuardRole) -> Result<Guard> {
    if find_guard(program, procedure, variable, role).is_some() {
        return Err(CompileError::resolve_error(format!(
            "a {} guard for `{variable}` of `{procedure}` already exists",
            role.infix()
        )));
    }
    let name = program.fresh_name(&format!("{procedure}_{}_{variable}", role.infix()));
    let id = program.add(Decl::Constant(Constant {
        var: TypedIdent::new(name.clone(), Type::Bool),
        span: Span::SYNTHETIC,
    }))?;
    program.attach(id, role.metadata(procedure, variable));
    Ok(Guard {
        id,
        name,
        procedure: procedure.to_string(),
        variable: variable.to_string(),
        role,
    })
}

fn as_guard(program: &Program, id: DeclId, decl: &Decl) -> Option<Guard> {
    let Decl::Constant(c) = decl else {
        return None;
    };
    program.metadata(id).iter().find_map(|m| {
        let (procedure, variable, role) = match m {
            Metadata::InputGuardOf {
                procedure,
                variable,
            } => (procedure, variable, GuardRole::Input),
            Metadata::OutputGuardOf {
                procedure,
                variable,
            } => (procedure, variable, GuardRole::Output),
            _ => return None,
        };
        Some(Guard {
            id,
            name: c.var.name.clone(),
            procedure: procedure.clone(),
            variable: variable.clone(),
            role,
        })
    })
}

fn find_guard(program: &Program, procedure: &str, variable: &str, role: GuardRole) -> Option<Guard> {
    guards_of(program, procedure, role)
        .into_iter()
        .find(|g| g.variable == variable)
}

/// `(procedure, variable)` a guard constant was created for
pub fn guard_owner(program: &Program, guard: &str) -> Option<(String, String)> {
    let id = program.lookup(guard)?;
    let g = as_guard(program, id, program.get(id)?)?;
    Some((g.procedure, g.variable))
}

/// Guards of `procedure` with the given role, in declaration order
pub fn guards_of(program: &Program, procedure: &str, role: GuardRole) -> Vec<Guard> {
    program
        .constants()
        .filter_map(|(id, _)| program.get(id).and_then(|d| as_guard(program, id, d)))
        .filter(|g| g.procedure == procedure && g.role == role)
        .collect()
}

/// Remove every guard of `procedure`
pub fn remove_guards(program: &mut Program, procedure: &str) {
    let ids: Vec<DeclId> = [GuardRole::Input, GuardRole::Output]
        .into_iter()
        .flat_map(|role| guards_of(program, procedure, role))
        .map(|g| g.id)
        .collect();
    for id in ids {
        program.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_naming_and_owner() {
        let mut program = Program::new();
        let br = make_input_guard(&mut program, "f", "x").unwrap();
        let bm = make_output_guard(&mut program, "f", "z").unwrap();
        assert_eq!(br.name, "f_br_x");
        assert_eq!(bm.name, "f_bm_z");
        assert_eq!(
            guard_owner(&program, "f_br_x"),
            Some(("f".to_string(), "x".to_string()))
        );
        assert_eq!(
            guard_owner(&program, "f_bm_z"),
            Some(("f".to_string(), "z".to_string()))
        );
        assert_eq!(program.constant("f_br_x").unwrap().var.ty, Type::Bool);
    }

    #[test]
    fn test_duplicate_guard_rejected() {
        let mut program = Program::new();
        make_input_guard(&mut program, "f", "x").unwrap();
        assert!(make_input_guard(&mut program, "f", "x").is_err());
        // Same variable, other role
        assert!(make_output_guard(&mut program, "f", "x").is_ok());
    }

    #[test]
    fn test_guard_name_collision_gets_fresh_name() {
        let mut program = Program::new();
        program
            .add(Decl::Constant(Constant {
                var: TypedIdent::new("f_br_x", Type::Int),
                span: Span::SYNTHETIC,
            }))
            .unwrap();
        let g = make_input_guard(&mut program, "f", "x").unwrap();
        assert_eq!(g.name, "f_br_x_1");
        assert_eq!(guard_owner(&program, "f_br_x_1").unwrap().1, "x");
        assert!(guard_owner(&program, "f_br_x").is_none());
    }

    #[test]
    fn test_guards_of_in_declaration_order() {
        let mut program = Program::new();
        make_input_guard(&mut program, "f", "y").unwrap();
        make_input_guard(&mut program, "g", "y").unwrap();
        make_input_guard(&mut program, "f", "a").unwrap();
        let names: Vec<String> = guards_of(&program, "f", GuardRole::Input)
            .into_iter()
            .map(|g| g.variable)
            .collect();
        assert_eq!(names, vec!["y", "a"]);
    }

    #[test]
    fn test_remove_guards() {
        let mut program = Program::new();
        make_input_guard(&mut program, "f", "x").unwrap();
        make_output_guard(&mut program, "f", "z").unwrap();
        make_input_guard(&mut program, "g", "x").unwrap();
        remove_guards(&mut program, "f");
        assert!(guards_of(&program, "f", GuardRole::Input).is_empty());
        assert_eq!(program.len(), 1);
    }
}
