//! IVP pretty printer
//!
//! Output is accepted by the parser, so synthesized programs (check-dependency
//! harnesses in particular) can be written out and re-loaded.

use std::fmt::{self, Display, Formatter, Write};

use crate::ast::{
    BinOp, Body, Contract, ContractOrigin, DEPENDENCY_CLAUSE_ATTR, Decl, DeclId, Expr, Procedure,
    Program, Stmt, StmtKind,
};

const INDENT: &str = "  ";

/// Render a whole program as source text
pub fn print_program(program: &Program) -> String {
    ProgramText(program).to_string()
}

/// Render one procedure (with its metadata) as source text
pub fn print_procedure(program: &Program, name: &str) -> Option<String> {
    let id = program.lookup(name)?;
    let mut out = String::new();
    match program.get(id)? {
        Decl::Procedure(p) => write_procedure(&mut out, program, id, p).ok()?,
        _ => return None,
    }
    Some(out)
}

struct ProgramText<'a>(&'a Program);

impl Display for ProgramText<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let program = self.0;
        let mut first = true;
        for (id, decl) in program.decls() {
            // Blank line around procedures only
            let is_proc = matches!(decl, Decl::Procedure(_));
            if is_proc && !first {
                writeln!(f)?;
            }
            first = false;
            match decl {
                Decl::Global(g) => {
                    writeln!(f, "var{} {};", attrs_of(program, id), g.var)?;
                }
                Decl::Constant(c) => {
                    writeln!(f, "const{} {};", attrs_of(program, id), c.var)?;
                }
                Decl::Function(func) => {
                    write!(f, "function{} {}(", attrs_of(program, id), func.name)?;
                    write_comma(f, &func.params)?;
                    writeln!(f, "): {};", func.ret)?;
                }
                Decl::Procedure(p) => write_procedure(f, program, id, p)?,
            }
        }
        Ok(())
    }
}

fn attrs_of(program: &Program, id: DeclId) -> String {
    program
        .metadata(id)
        .iter()
        .map(|m| format!(" {}", m.to_attribute()))
        .collect()
}

fn write_comma<W: Write, T: Display>(w: &mut W, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            w.write_str(", ")?;
        }
        write!(w, "{item}")?;
    }
    Ok(())
}

fn write_procedure<W: Write>(w: &mut W, program: &Program, id: DeclId, p: &Procedure) -> fmt::Result {
    write!(w, "procedure{} {}(", attrs_of(program, id), p.name)?;
    write_comma(w, &p.ins)?;
    write!(w, ")")?;
    if !p.outs.is_empty() {
        write!(w, " returns (")?;
        write_comma(w, &p.outs)?;
        write!(w, ")")?;
    }
    if p.body.is_none() {
        write!(w, ";")?;
    }
    writeln!(w)?;
    for c in &p.requires {
        write_contract(w, "requires", c)?;
    }
    if !p.modifies.is_empty() {
        write!(w, "{INDENT}modifies ")?;
        write_comma(w, &p.modifies)?;
        writeln!(w, ";")?;
    }
    for c in &p.ensures {
        write_contract(w, "ensures", c)?;
    }
    if let Some(body) = &p.body {
        write_body(w, body)?;
    }
    Ok(())
}

fn write_contract<W: Write>(w: &mut W, keyword: &str, c: &Contract) -> fmt::Result {
    let free = if c.free { "free " } else { "" };
    let attr = match c.origin {
        ContractOrigin::Dependency => format!(" {{:{DEPENDENCY_CLAUSE_ATTR}}}"),
        ContractOrigin::Declared => String::new(),
    };
    writeln!(w, "{INDENT}{free}{keyword}{attr} {};", c.expr)
}

fn write_body<W: Write>(w: &mut W, body: &Body) -> fmt::Result {
    writeln!(w, "{{")?;
    for local in &body.locals {
        writeln!(w, "{INDENT}var {local};")?;
    }
    write_stmts(w, &body.stmts, 1)?;
    writeln!(w, "}}")
}

fn write_stmts<W: Write>(w: &mut W, stmts: &[Stmt], depth: usize) -> fmt::Result {
    for stmt in stmts {
        write_indent(w, depth)?;
        write_stmt(w, &stmt.node, depth)?;
        writeln!(w)?;
    }
    Ok(())
}

fn write_indent<W: Write>(w: &mut W, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        w.write_str(INDENT)?;
    }
    Ok(())
}

fn write_guard<W: Write>(w: &mut W, cond: &Option<Expr>) -> fmt::Result {
    match cond {
        Some(e) => write!(w, "({e})"),
        None => write!(w, "(*)"),
    }
}

fn write_block<W: Write>(w: &mut W, stmts: &[Stmt], depth: usize) -> fmt::Result {
    writeln!(w, "{{")?;
    write_stmts(w, stmts, depth + 1)?;
    write_indent(w, depth)?;
    write!(w, "}}")
}

fn write_stmt<W: Write>(w: &mut W, stmt: &StmtKind, depth: usize) -> fmt::Result {
    match stmt {
        StmtKind::Assign { lhs, rhs } => {
            write_comma(w, lhs)?;
            write!(w, " := ")?;
            write_comma(w, rhs)?;
            write!(w, ";")
        }
        StmtKind::Havoc(vars) => {
            write!(w, "havoc ")?;
            write_comma(w, vars)?;
            write!(w, ";")
        }
        StmtKind::Assume(e) => write!(w, "assume {e};"),
        StmtKind::Assert(e) => write!(w, "assert {e};"),
        StmtKind::Call { proc, args, outs } => {
            write!(w, "call ")?;
            if !outs.is_empty() {
                write_comma(w, outs)?;
                write!(w, " := ")?;
            }
            write!(w, "{proc}(")?;
            write_comma(w, args)?;
            write!(w, ");")
        }
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            write!(w, "if ")?;
            write_guard(w, cond)?;
            write!(w, " ")?;
            write_block(w, then_branch, depth)?;
            match else_branch.as_slice() {
                [] => Ok(()),
                [nested] if matches!(nested.node, StmtKind::If { .. }) => {
                    write!(w, " else ")?;
                    write_stmt(w, &nested.node, depth)
                }
                stmts => {
                    write!(w, " else ")?;
                    write_block(w, stmts, depth)
                }
            }
        }
        StmtKind::While { cond, body } => {
            write!(w, "while ")?;
            write_guard(w, cond)?;
            write!(w, " ")?;
            write_block(w, body, depth)
        }
    }
}

// ============================================
// Expressions
// ============================================

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntLit(n) => write!(f, "{n}"),
            Expr::BoolLit(b) => write!(f, "{b}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Old(inner) => write!(f, "old({inner})"),
            Expr::App { func, args } => {
                write!(f, "{func}(")?;
                write_comma(f, args)?;
                write!(f, ")")
            }
            Expr::Unary { op, expr } => match expr.as_ref() {
                Expr::Binary { .. } => write!(f, "{op}({expr})"),
                Expr::IntLit(n) if *n < 0 => write!(f, "{op}({expr})"),
                _ => write!(f, "{op}{expr}"),
            },
            Expr::Binary { left, op, right } => {
                let (left_paren, right_paren) = operand_parens(*op, left, right);
                write_operand(f, left, left_paren)?;
                write!(f, " {op} ")?;
                write_operand(f, right, right_paren)
            }
        }
    }
}

fn write_operand(f: &mut Formatter<'_>, e: &Expr, paren: bool) -> fmt::Result {
    if paren { write!(f, "({e})") } else { write!(f, "{e}") }
}

/// Which operands of `left op right` need parentheses to re-parse the same tree
fn operand_parens(op: BinOp, left: &Expr, right: &Expr) -> (bool, bool) {
    let prec = op.precedence();
    let child = |e: &Expr| match e {
        Expr::Binary { op, .. } => Some(op.precedence()),
        _ => None,
    };
    let (l, r) = (child(left), child(right));
    let relational = op.is_ordering() || matches!(op, BinOp::Eq | BinOp::Ne);
    match op {
        // Right associative
        BinOp::Implies => (l.is_some_and(|p| p <= prec), r.is_some_and(|p| p < prec)),
        // Non-associative
        _ if relational => (l.is_some_and(|p| p <= prec), r.is_some_and(|p| p <= prec)),
        // Left associative
        _ => (l.is_some_and(|p| p < prec), r.is_some_and(|p| p <= prec)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_expr, parse_source};

    fn reprint(source: &str) -> String {
        print_program(&parse_source("test.ivp", source).unwrap())
    }

    #[test]
    fn test_print_program_layout() {
        let text = reprint(
            "var g: int;
             procedure {:inline 2} f(x: int) returns (z: int) modifies g;
             { var t: int; if (x > 0) { z := x; } else { havoc z; } }",
        );
        insta::assert_snapshot!(text, @r###"
        var g: int;

        procedure {:inline 2} f(x: int) returns (z: int)
          modifies g;
        {
          var t: int;
          if (x > 0) {
            z := x;
          } else {
            havoc z;
          }
        }
        "###);
    }

    #[test]
    fn test_print_declaration_only_procedure() {
        let text = reprint(
            "procedure ext(a: int) returns (r: int); free ensures {:dependency} r == F(a);
             function F(a: int): int;",
        );
        insta::assert_snapshot!(text, @r###"
        procedure ext(a: int) returns (r: int);
          free ensures {:dependency} r == F(a);
        function F(a: int): int;
        "###);
    }

    #[test]
    fn test_print_round_trips() {
        let source = r#"
            var g: int;
            const {:guardReadSet "f", "x"} f_br_x: bool;
            function F(a: int): int;
            procedure f(x: int, b: bool) returns (z: int, w: bool)
              requires x >= 0;
              modifies g;
              ensures z == old(g) + x;
            {
              var t: int;
              t, g := x - -1, g + 1;
              call z := h(t);
              if (*) { w := b ==> (b || !b); } else if (x < 2) { w := false; } else { while (t > 0) { t := t - 1; } }
              assume !(z == F(-t));
              assert (x + 1) * 2 == x * 2 + 2;
            }
            procedure h(a: int) returns (r: int);
        "#;
        let once = reprint(source);
        let twice = reprint(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_print_expr_parenthesization() {
        for source in [
            "(a + b) * c",
            "a - (b - c)",
            "a - b - c",
            "(a ==> b) ==> c",
            "a ==> b ==> c",
            "!(a && b)",
            "(a == b) == c",
            "-(x + 1)",
            "a <==> (b <==> c)",
        ] {
            let e = parse_expr(source).unwrap();
            assert_eq!(parse_expr(&e.to_string()).unwrap(), e, "{source}");
        }
    }

    #[test]
    fn test_print_minimal_parens() {
        assert_eq!(parse_expr("a + (b * c)").unwrap().to_string(), "a + b * c");
        assert_eq!(parse_expr("(a && b) || c").unwrap().to_string(), "a && b || c");
    }

    #[test]
    fn test_print_procedure_by_name() {
        let prog = parse_source("test.ivp", "var g: int; procedure p() { }").unwrap();
        assert_eq!(print_procedure(&prog, "p").unwrap(), "procedure p()\n{\n}\n");
        assert!(print_procedure(&prog, "g").is_none());
    }
}
