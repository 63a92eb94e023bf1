//! Program representation
//!
//! A program is an arena of top-level declarations addressed by stable
//! [`DeclId`]s, plus a typed metadata side table. Removing a declaration
//! leaves its slot empty so other ids stay valid.

mod expr;
mod metadata;
mod span;
mod stmt;
mod types;

pub use expr::*;
pub use metadata::*;
pub use span::*;
pub use stmt::*;
pub use types::*;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};

/// Stable identifier of a top-level declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeclId(pub u32);

/// Top-level declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    Global(GlobalVar),
    Constant(Constant),
    Function(FunctionDecl),
    Procedure(Procedure),
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Global(g) => &g.var.name,
            Decl::Constant(c) => &c.var.name,
            Decl::Function(f) => &f.name,
            Decl::Procedure(p) => &p.name,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Decl::Global(g) => g.span,
            Decl::Constant(c) => c.span,
            Decl::Function(f) => f.span,
            Decl::Procedure(p) => p.span,
        }
    }

    pub fn kind(&self) -> DeclKind {
        match self {
            Decl::Global(_) => DeclKind::Global,
            Decl::Constant(_) => DeclKind::Constant,
            Decl::Function(_) => DeclKind::Function,
            Decl::Procedure(_) => DeclKind::Procedure,
        }
    }
}

/// Declaration kind, for listing declarations by kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclKind {
    Global,
    Constant,
    Function,
    Procedure,
}

/// Global variable: `var g: int;`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalVar {
    pub var: TypedIdent,
    pub span: Span,
}

/// Uninterpreted constant: `const k: int;`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constant {
    pub var: TypedIdent,
    pub span: Span,
}

/// Uninterpreted function: `function F(a: int): int;`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<TypedIdent>,
    pub ret: Type,
    pub span: Span,
}

/// Procedure declaration, with an optional implementation body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub name: String,
    pub ins: Vec<TypedIdent>,
    pub outs: Vec<TypedIdent>,
    pub requires: Vec<Contract>,
    pub ensures: Vec<Contract>,
    pub modifies: Vec<String>,
    pub body: Option<Body>,
    pub span: Span,
}

impl Procedure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ins: Vec::new(),
            outs: Vec::new(),
            requires: Vec::new(),
            ensures: Vec::new(),
            modifies: Vec::new(),
            body: None,
            span: Span::SYNTHETIC,
        }
    }

    pub fn in_index(&self, name: &str) -> Option<usize> {
        self.ins.iter().position(|p| p.name == name)
    }

    pub fn out_index(&self, name: &str) -> Option<usize> {
        self.outs.iter().position(|p| p.name == name)
    }

    /// Type of a formal or local visible in this procedure
    pub fn local_type(&self, name: &str) -> Option<Type> {
        self.ins
            .iter()
            .chain(self.outs.iter())
            .chain(self.body.iter().flat_map(|b| b.locals.iter()))
            .find(|v| v.name == name)
            .map(|v| v.ty)
    }
}

/// Implementation body: locals followed by statements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub locals: Vec<TypedIdent>,
    pub stmts: Vec<Stmt>,
}

/// Where a contract clause comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContractOrigin {
    /// Written by the user
    #[default]
    Declared,
    /// Synthesized from an already-computed dependency map
    Dependency,
}

/// `requires` / `ensures` clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Free clauses are assumed, never checked
    pub free: bool,
    pub expr: Expr,
    pub origin: ContractOrigin,
    pub span: Span,
}

impl Contract {
    pub fn checked(expr: Expr) -> Self {
        Self {
            free: false,
            expr,
            origin: ContractOrigin::Declared,
            span: Span::SYNTHETIC,
        }
    }

    pub fn free(expr: Expr) -> Self {
        Self {
            free: true,
            ..Self::checked(expr)
        }
    }

    /// Build a parsed clause; a `{:dependency}` attribute marks a dependency contract
    pub fn from_parsed(free: bool, attrs: &[Attribute], expr: Expr, span: Span) -> Self {
        let origin = if attrs.iter().any(|a| a.name == DEPENDENCY_CLAUSE_ATTR) {
            ContractOrigin::Dependency
        } else {
            ContractOrigin::Declared
        };
        Self {
            free,
            expr,
            origin,
            span,
        }
    }
}

/// A declaration as produced by the parser, before attribute conversion
#[derive(Debug, Clone)]
pub struct ParsedDecl {
    pub decl: Decl,
    pub attrs: Vec<Attribute>,
}

/// The program arena
#[derive(Debug, Clone, Default)]
pub struct Program {
    decls: Vec<Option<Decl>>,
    index: HashMap<String, DeclId>,
    metadata: HashMap<DeclId, Vec<Metadata>>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a program from parsed declarations, converting attributes to metadata
    pub fn from_parsed(parsed: Vec<ParsedDecl>) -> Result<Self> {
        let mut program = Program::new();
        for ParsedDecl { decl, attrs } in parsed {
            let span = decl.span();
            let id = program.add(decl)?;
            for attr in &attrs {
                match Metadata::from_attribute(attr) {
                    Ok(Some(meta)) => program.attach(id, meta),
                    Ok(None) => {
                        tracing::warn!(attribute = %attr.name, "ignoring unknown attribute");
                    }
                    Err(message) => return Err(CompileError::parser(message, span)),
                }
            }
        }
        Ok(program)
    }

    /// Add a declaration; names are unique across all declaration kinds
    pub fn add(&mut self, decl: Decl) -> Result<DeclId> {
        if self.index.contains_key(decl.name()) {
            return Err(CompileError::resolve_error(format!(
                "duplicate declaration of `{}`",
                decl.name()
            )));
        }
        let id = DeclId(self.decls.len() as u32);
        self.index.insert(decl.name().to_string(), id);
        self.decls.push(Some(decl));
        Ok(id)
    }

    pub fn remove(&mut self, id: DeclId) -> Option<Decl> {
        let decl = self.decls.get_mut(id.0 as usize)?.take()?;
        self.index.remove(decl.name());
        self.metadata.remove(&id);
        Some(decl)
    }

    pub fn get(&self, id: DeclId) -> Option<&Decl> {
        self.decls.get(id.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: DeclId) -> Option<&mut Decl> {
        self.decls.get_mut(id.0 as usize)?.as_mut()
    }

    pub fn lookup(&self, name: &str) -> Option<DeclId> {
        self.index.get(name).copied()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn decl(&self, name: &str) -> Option<&Decl> {
        self.lookup(name).and_then(|id| self.get(id))
    }

    /// Live declarations in insertion order
    pub fn decls(&self) -> impl Iterator<Item = (DeclId, &Decl)> {
        self.decls
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.as_ref().map(|d| (DeclId(i as u32), d)))
    }

    pub fn decls_of_kind(&self, kind: DeclKind) -> impl Iterator<Item = (DeclId, &Decl)> {
        self.decls().filter(move |(_, d)| d.kind() == kind)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn procedure(&self, name: &str) -> Option<&Procedure> {
        match self.decl(name)? {
            Decl::Procedure(p) => Some(p),
            _ => None,
        }
    }

    pub fn procedure_mut(&mut self, name: &str) -> Option<&mut Procedure> {
        let id = self.lookup(name)?;
        match self.get_mut(id)? {
            Decl::Procedure(p) => Some(p),
            _ => None,
        }
    }

    pub fn procedures(&self) -> impl Iterator<Item = &Procedure> {
        self.decls().filter_map(|(_, d)| match d {
            Decl::Procedure(p) => Some(p),
            _ => None,
        })
    }

    pub fn globals(&self) -> impl Iterator<Item = &GlobalVar> {
        self.decls().filter_map(|(_, d)| match d {
            Decl::Global(g) => Some(g),
            _ => None,
        })
    }

    pub fn global(&self, name: &str) -> Option<&GlobalVar> {
        match self.decl(name)? {
            Decl::Global(g) => Some(g),
            _ => None,
        }
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.global(name).is_some()
    }

    pub fn constants(&self) -> impl Iterator<Item = (DeclId, &Constant)> {
        self.decls().filter_map(|(id, d)| match d {
            Decl::Constant(c) => Some((id, c)),
            _ => None,
        })
    }

    pub fn constant(&self, name: &str) -> Option<&Constant> {
        match self.decl(name)? {
            Decl::Constant(c) => Some(c),
            _ => None,
        }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        match self.decl(name)? {
            Decl::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn attach(&mut self, id: DeclId, meta: Metadata) {
        let entry = self.metadata.entry(id).or_default();
        if !entry.contains(&meta) {
            entry.push(meta);
        }
    }

    pub fn metadata(&self, id: DeclId) -> &[Metadata] {
        self.metadata.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn metadata_of(&self, name: &str) -> &[Metadata] {
        match self.lookup(name) {
            Some(id) => self.metadata(id),
            None => &[],
        }
    }

    /// Inline depth recorded for a procedure, if any
    pub fn inline_depth(&self, name: &str) -> Option<u32> {
        self.metadata_of(name).iter().find_map(|m| match m {
            Metadata::Inline(n) => Some(*n),
            _ => None,
        })
    }

    /// The procedure a check-dependency harness was built for
    pub fn check_dependency_target(&self, name: &str) -> Option<&str> {
        self.metadata_of(name).iter().find_map(|m| match m {
            Metadata::CheckDependencyOf(p) => Some(p.as_str()),
            _ => None,
        })
    }

    /// Return a name based on `base` that no declaration uses
    pub fn fresh_name(&self, base: &str) -> String {
        let mut name = base.to_string();
        let mut n = 0;
        while self.contains_name(&name) {
            n += 1;
            name = format!("{base}_{n}");
        }
        name
    }
}
