//! Formula terms and SMT-LIB2 rendering
//!
//! Terms are immutable and reference counted, so symbolic execution can
//! share subterms freely. Constructors fold literals and drop trivial
//! connectives; they never reorder operands.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display, Formatter, Write};
use std::rc::Rc;

use crate::ast::Type;

const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// SMT-LIB2 sorts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sort {
    Bool,
    Int,
}

impl Sort {
    pub fn to_smt(self) -> &'static str {
        match self {
            Sort::Bool => "Bool",
            Sort::Int => "Int",
        }
    }
}

impl From<Type> for Sort {
    fn from(ty: Type) -> Self {
        match ty {
            Type::Int => Sort::Int,
            Type::Bool => Sort::Bool,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "div",
            ArithOp::Mod => "mod",
        }
    }

    /// Evaluate on literals; `None` on overflow or division by zero
    pub fn apply(self, a: i64, b: i64) -> Option<i64> {
        match self {
            ArithOp::Add => a.checked_add(b),
            ArithOp::Sub => a.checked_sub(b),
            ArithOp::Mul => a.checked_mul(b),
            ArithOp::Div => a.checked_div_euclid(b),
            ArithOp::Mod => a.checked_rem_euclid(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    pub fn apply(self, a: i64, b: i64) -> bool {
        match self {
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }
    }
}

/// Term node
#[derive(Debug, PartialEq, Eq)]
pub enum TermKind {
    Bool(bool),
    Int(i64),
    Symbol { name: String, sort: Sort },
    Not(Term),
    And(Vec<Term>),
    Or(Vec<Term>),
    Implies(Term, Term),
    Eq(Term, Term),
    Ite(Term, Term, Term),
    Neg(Term),
    Arith(ArithOp, Term, Term),
    Cmp(CmpOp, Term, Term),
    /// Uninterpreted function application
    App {
        func: String,
        args: Vec<Term>,
        sort: Sort,
    },
}

/// Shared formula term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term(Rc<TermKind>);

impl Term {
    fn new(kind: TermKind) -> Self {
        Term(Rc::new(kind))
    }

    pub fn kind(&self) -> &TermKind {
        &self.0
    }

    /// Node identity, stable while the term is alive
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn same(&self, other: &Term) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn sort(&self) -> Sort {
        match self.kind() {
            TermKind::Int(_) | TermKind::Neg(_) | TermKind::Arith(..) => Sort::Int,
            TermKind::Symbol { sort, .. } | TermKind::App { sort, .. } => *sort,
            TermKind::Ite(_, t, _) => t.sort(),
            _ => Sort::Bool,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind() {
            TermKind::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.kind() {
            TermKind::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn bool(b: bool) -> Self {
        Term::new(TermKind::Bool(b))
    }

    pub fn int(n: i64) -> Self {
        Term::new(TermKind::Int(n))
    }

    pub fn symbol(name: impl Into<String>, sort: Sort) -> Self {
        Term::new(TermKind::Symbol {
            name: name.into(),
            sort,
        })
    }

    pub fn not(t: Term) -> Self {
        match t.kind() {
            TermKind::Bool(b) => Term::bool(!b),
            TermKind::Not(inner) => inner.clone(),
            _ => Term::new(TermKind::Not(t)),
        }
    }

    pub fn and(terms: Vec<Term>) -> Self {
        let mut flat = Vec::with_capacity(terms.len());
        for t in terms {
            match t.kind() {
                TermKind::Bool(true) => {}
                TermKind::Bool(false) => return Term::bool(false),
                TermKind::And(inner) => flat.extend(inner.iter().cloned()),
                _ => flat.push(t),
            }
        }
        match flat.len() {
            0 => Term::bool(true),
            1 => flat.remove(0),
            _ => Term::new(TermKind::And(flat)),
        }
    }

    pub fn or(terms: Vec<Term>) -> Self {
        let mut flat = Vec::with_capacity(terms.len());
        for t in terms {
            match t.kind() {
                TermKind::Bool(false) => {}
                TermKind::Bool(true) => return Term::bool(true),
                TermKind::Or(inner) => flat.extend(inner.iter().cloned()),
                _ => flat.push(t),
            }
        }
        match flat.len() {
            0 => Term::bool(false),
            1 => flat.remove(0),
            _ => Term::new(TermKind::Or(flat)),
        }
    }

    pub fn implies(lhs: Term, rhs: Term) -> Self {
        match (lhs.as_bool(), rhs.as_bool()) {
            (Some(true), _) => rhs,
            (Some(false), _) | (_, Some(true)) => Term::bool(true),
            (_, Some(false)) => Term::not(lhs),
            _ if lhs.same(&rhs) => Term::bool(true),
            _ => Term::new(TermKind::Implies(lhs, rhs)),
        }
    }

    pub fn eq(lhs: Term, rhs: Term) -> Self {
        if lhs.same(&rhs) {
            return Term::bool(true);
        }
        match (lhs.kind(), rhs.kind()) {
            (TermKind::Int(a), TermKind::Int(b)) => Term::bool(a == b),
            (TermKind::Bool(a), TermKind::Bool(b)) => Term::bool(a == b),
            (TermKind::Bool(true), _) => rhs,
            (_, TermKind::Bool(true)) => lhs,
            (TermKind::Bool(false), _) => Term::not(rhs),
            (_, TermKind::Bool(false)) => Term::not(lhs),
            _ => Term::new(TermKind::Eq(lhs, rhs)),
        }
    }

    pub fn ite(cond: Term, then: Term, els: Term) -> Self {
        match cond.as_bool() {
            Some(true) => then,
            Some(false) => els,
            None if then.same(&els) => then,
            None => match (then.as_bool(), els.as_bool()) {
                (Some(true), Some(false)) => cond,
                (Some(false), Some(true)) => Term::not(cond),
                _ => Term::new(TermKind::Ite(cond, then, els)),
            },
        }
    }

    pub fn neg(t: Term) -> Self {
        match t.as_int().and_then(i64::checked_neg) {
            Some(n) => Term::int(n),
            None => Term::new(TermKind::Neg(t)),
        }
    }

    pub fn arith(op: ArithOp, lhs: Term, rhs: Term) -> Self {
        let folded = match (lhs.as_int(), rhs.as_int()) {
            (Some(a), Some(b)) => op.apply(a, b),
            _ => None,
        };
        match folded {
            Some(n) => Term::int(n),
            None => Term::new(TermKind::Arith(op, lhs, rhs)),
        }
    }

    pub fn cmp(op: CmpOp, lhs: Term, rhs: Term) -> Self {
        match (lhs.as_int(), rhs.as_int()) {
            (Some(a), Some(b)) => Term::bool(op.apply(a, b)),
            _ => Term::new(TermKind::Cmp(op, lhs, rhs)),
        }
    }

    pub fn app(func: impl Into<String>, args: Vec<Term>, sort: Sort) -> Self {
        Term::new(TermKind::App {
            func: func.into(),
            args,
            sort,
        })
    }

    pub fn children(&self) -> Vec<&Term> {
        match self.kind() {
            TermKind::Bool(_) | TermKind::Int(_) | TermKind::Symbol { .. } => Vec::new(),
            TermKind::Not(t) | TermKind::Neg(t) => vec![t],
            TermKind::And(ts) | TermKind::Or(ts) | TermKind::App { args: ts, .. } => ts.iter().collect(),
            TermKind::Implies(a, b)
            | TermKind::Eq(a, b)
            | TermKind::Arith(_, a, b)
            | TermKind::Cmp(_, a, b) => vec![a, b],
            TermKind::Ite(c, t, e) => vec![c, t, e],
        }
    }

    fn is_atomic(&self) -> bool {
        matches!(
            self.kind(),
            TermKind::Bool(_) | TermKind::Int(_) | TermKind::Symbol { .. }
        )
    }

    /// Visit every distinct node once, children before parents
    pub fn for_each_node(&self, f: &mut impl FnMut(&Term)) {
        let mut seen = HashSet::new();
        self.visit_post(&mut seen, f);
    }

    fn visit_post(&self, seen: &mut HashSet<usize>, f: &mut impl FnMut(&Term)) {
        if !seen.insert(self.id()) {
            return;
        }
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            for child in self.children() {
                child.visit_post(seen, f);
            }
        });
        f(self);
    }

    /// Free symbols in first-occurrence order
    pub fn symbols(&self) -> Vec<(String, Sort)> {
        let mut out = Vec::new();
        self.for_each_node(&mut |t| {
            if let TermKind::Symbol { name, sort } = t.kind() {
                out.push((name.clone(), *sort));
            }
        });
        dedup_by_name(out, |(n, _)| n)
    }

    /// Uninterpreted functions applied in the term, with their signatures
    pub fn functions(&self) -> Vec<(String, Vec<Sort>, Sort)> {
        let mut out = Vec::new();
        self.for_each_node(&mut |t| {
            if let TermKind::App { func, args, sort } = t.kind() {
                out.push((func.clone(), args.iter().map(Term::sort).collect(), *sort));
            }
        });
        dedup_by_name(out, |(n, _, _)| n)
    }

    /// Number of distinct nodes
    pub fn size(&self) -> usize {
        let mut n = 0;
        self.for_each_node(&mut |_| n += 1);
        n
    }
}

fn dedup_by_name<T>(items: Vec<T>, name: impl Fn(&T) -> &String) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(name(item).clone()))
        .collect()
}

fn is_simple_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "~!@$%^&*_-+=<>.?/".contains(c)
}

const RESERVED: &[&str] = &[
    "and", "or", "not", "ite", "let", "true", "false", "assert", "forall", "exists", "par", "as",
    "_", "!", "=", "=>", "div", "mod", "distinct", "xor",
];

/// Quote a symbol with `|..|` unless it is a simple SMT-LIB2 symbol
pub fn quote_symbol(name: &str) -> String {
    let simple = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(is_simple_symbol_char)
        && !RESERVED.contains(&name);
    if simple {
        name.to_string()
    } else {
        format!("|{}|", name.replace('|', "_").replace('\\', "_"))
    }
}

fn write_int(out: &mut String, n: i64) {
    if n < 0 {
        let _ = write!(out, "(- {})", n.unsigned_abs());
    } else {
        let _ = write!(out, "{n}");
    }
}

/// Render `term`, using `names` for already-defined shared nodes
fn render(term: &Term, names: &HashMap<usize, String>, out: &mut String) {
    if let Some(name) = names.get(&term.id()) {
        out.push_str(name);
        return;
    }
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
        let node = |head: &str, args: &[&Term], out: &mut String| {
            out.push('(');
            out.push_str(head);
            for arg in args {
                out.push(' ');
                render(arg, names, out);
            }
            out.push(')');
        };
        match term.kind() {
            TermKind::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            TermKind::Int(n) => write_int(out, *n),
            TermKind::Symbol { name, .. } => out.push_str(&quote_symbol(name)),
            TermKind::Not(t) => node("not", &[t], out),
            TermKind::And(ts) => node("and", &ts.iter().collect::<Vec<_>>(), out),
            TermKind::Or(ts) => node("or", &ts.iter().collect::<Vec<_>>(), out),
            TermKind::Implies(a, b) => node("=>", &[a, b], out),
            TermKind::Eq(a, b) => node("=", &[a, b], out),
            TermKind::Ite(c, t, e) => node("ite", &[c, t, e], out),
            TermKind::Neg(t) => node("-", &[t], out),
            TermKind::Arith(op, a, b) => node(op.symbol(), &[a, b], out),
            TermKind::Cmp(op, a, b) => node(op.symbol(), &[a, b], out),
            TermKind::App { func, args, .. } => {
                if args.is_empty() {
                    out.push_str(&quote_symbol(func));
                } else {
                    node(&quote_symbol(func), &args.iter().collect::<Vec<_>>(), out);
                }
            }
        }
    });
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        render(self, &HashMap::new(), &mut out);
        f.write_str(&out)
    }
}

/// An SMT-LIB2 script under construction
///
/// Symbols and functions are declared on first use. Subterms referenced
/// more than once are emitted as `define-fun`s and referenced by name.
#[derive(Debug)]
pub struct SmtScript {
    out: String,
    declared: HashSet<String>,
    defined: HashMap<usize, String>,
    /// Keeps defined nodes alive so their ids stay unique
    anchors: Vec<Term>,
}

impl Default for SmtScript {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtScript {
    pub fn new() -> Self {
        Self {
            out: String::new(),
            declared: HashSet::new(),
            defined: HashMap::new(),
            anchors: Vec::new(),
        }
    }

    pub fn command(&mut self, cmd: &str) {
        self.out.push_str(cmd);
        self.out.push('\n');
    }

    pub fn set_option(&mut self, option: &str, value: &str) {
        self.command(&format!("(set-option :{option} {value})"));
    }

    pub fn set_logic(&mut self, logic: &str) {
        self.command(&format!("(set-logic {logic})"));
    }

    /// Declare the symbols and functions of `term` not declared yet
    pub fn declare(&mut self, term: &Term) {
        for (name, sort) in term.symbols() {
            if self.declared.insert(name.clone()) {
                let line = format!("(declare-const {} {})", quote_symbol(&name), sort.to_smt());
                self.command(&line);
            }
        }
        for (name, params, ret) in term.functions() {
            if self.declared.insert(name.clone()) {
                let params: Vec<&str> = params.iter().map(|s| s.to_smt()).collect();
                let line = format!(
                    "(declare-fun {} ({}) {})",
                    quote_symbol(&name),
                    params.join(" "),
                    ret.to_smt()
                );
                self.command(&line);
            }
        }
    }

    /// Emit definitions for the shared subterms of `term` and return its rendering
    pub fn share(&mut self, term: &Term) -> String {
        self.declare(term);

        let mut parents: HashMap<usize, usize> = HashMap::new();
        let mut order = Vec::new();
        self.count(term, &mut parents, &mut order);
        for node in order {
            if node.is_atomic() || parents.get(&node.id()).copied().unwrap_or(0) < 2 {
                continue;
            }
            let name = format!("t!{}", self.defined.len());
            let mut body = String::new();
            render(&node, &self.defined, &mut body);
            let line = format!("(define-fun {name} () {} {body})", node.sort().to_smt());
            self.command(&line);
            self.defined.insert(node.id(), name);
            self.anchors.push(node);
        }

        let mut rendered = String::new();
        render(term, &self.defined, &mut rendered);
        rendered
    }

    fn count(&self, term: &Term, parents: &mut HashMap<usize, usize>, order: &mut Vec<Term>) {
        if self.defined.contains_key(&term.id()) {
            return;
        }
        let seen = parents.contains_key(&term.id());
        *parents.entry(term.id()).or_insert(0) += 1;
        if seen {
            return;
        }
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            for child in term.children() {
                self.count(child, parents, order);
            }
        });
        order.push(term.clone());
    }

    pub fn assert(&mut self, term: &Term) {
        let rendered = self.share(term);
        self.command(&format!("(assert {rendered})"));
    }

    /// Assert `term` under a name usable in unsat cores
    pub fn assert_named(&mut self, name: &str, term: &Term) {
        let rendered = self.share(term);
        self.command(&format!("(assert (! {rendered} :named {}))", quote_symbol(name)));
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn finish(self) -> String {
        self.out
    }
}
