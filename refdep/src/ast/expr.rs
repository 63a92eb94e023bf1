//! Expression AST nodes

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    /// Integer literal
    IntLit(i64),
    /// Boolean literal
    BoolLit(bool),

    /// Variable or constant reference
    Var(String),

    /// Pre-state value of an expression (ensures clauses and bodies)
    Old(Box<Expr>),

    /// Binary operation
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },

    /// Unary operation
    Unary { op: UnOp, expr: Box<Expr> },

    /// Uninterpreted function application
    App { func: String, args: Vec<Expr> },
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Logical
    And,
    Or,
    Implies,
    Iff,
}

impl BinOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod)
    }

    pub fn is_ordering(self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or | BinOp::Implies | BinOp::Iff)
    }

    /// Binding strength, higher binds tighter
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Iff => 1,
            BinOp::Implies => 2,
            BinOp::Or => 3,
            BinOp::And => 4,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 5,
            BinOp::Add | BinOp::Sub => 6,
            BinOp::Mul | BinOp::Div | BinOp::Mod => 7,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "div",
            BinOp::Mod => "mod",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Implies => "==>",
            BinOp::Iff => "<==>",
        }
    }
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    /// Negation: -
    Neg,
    /// Logical not: !
    Not,
}

impl std::fmt::Display for UnOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnOp::Neg => write!(f, "-"),
            UnOp::Not => write!(f, "!"),
        }
    }
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn binary(left: Expr, op: BinOp, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinOp::Eq, right)
    }

    pub fn implies(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinOp::Implies, right)
    }

    pub fn not(expr: Expr) -> Self {
        Expr::Unary {
            op: UnOp::Not,
            expr: Box::new(expr),
        }
    }

    pub fn old(expr: Expr) -> Self {
        Expr::Old(Box::new(expr))
    }

    pub fn app(func: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::App {
            func: func.into(),
            args,
        }
    }

    /// Names referenced anywhere in the expression, including under `old`
    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::IntLit(_) | Expr::BoolLit(_) => {}
            Expr::Var(name) => {
                out.insert(name.clone());
            }
            Expr::Old(inner) => inner.collect_vars(out),
            Expr::Binary { left, right, .. } => {
                left.collect_vars(out);
                right.collect_vars(out);
            }
            Expr::Unary { expr, .. } => expr.collect_vars(out),
            Expr::App { args, .. } => {
                for arg in args {
                    arg.collect_vars(out);
                }
            }
        }
    }

    /// Names referenced inside `old(..)` subexpressions
    pub fn old_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_old_vars(&mut out);
        out
    }

    fn collect_old_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::IntLit(_) | Expr::BoolLit(_) | Expr::Var(_) => {}
            Expr::Old(inner) => inner.collect_vars(out),
            Expr::Binary { left, right, .. } => {
                left.collect_old_vars(out);
                right.collect_old_vars(out);
            }
            Expr::Unary { expr, .. } => expr.collect_old_vars(out),
            Expr::App { args, .. } => {
                for arg in args {
                    arg.collect_old_vars(out);
                }
            }
        }
    }

    pub fn contains_old(&self) -> bool {
        match self {
            Expr::IntLit(_) | Expr::BoolLit(_) | Expr::Var(_) => false,
            Expr::Old(_) => true,
            Expr::Binary { left, right, .. } => left.contains_old() || right.contains_old(),
            Expr::Unary { expr, .. } => expr.contains_old(),
            Expr::App { args, .. } => args.iter().any(Expr::contains_old),
        }
    }

    /// Substitute variables.
    ///
    /// `current` applies to variables outside `old(..)`, `old` applies to
    /// variables inside it; the `old` wrapper itself is removed. Variables
    /// missing from the relevant map are kept as they are.
    pub fn substitute(&self, current: &HashMap<String, Expr>, old: &HashMap<String, Expr>) -> Expr {
        self.subst_inner(current, old, false)
    }

    /// Rename variables outside and inside `old(..)`, keeping `old` wrappers
    pub fn rename(&self, names: &HashMap<String, String>) -> Expr {
        match self {
            Expr::IntLit(_) | Expr::BoolLit(_) => self.clone(),
            Expr::Var(name) => match names.get(name) {
                Some(renamed) => Expr::Var(renamed.clone()),
                None => self.clone(),
            },
            Expr::Old(inner) => Expr::Old(Box::new(inner.rename(names))),
            Expr::Binary { left, op, right } => Expr::Binary {
                left: Box::new(left.rename(names)),
                op: *op,
                right: Box::new(right.rename(names)),
            },
            Expr::Unary { op, expr } => Expr::Unary {
                op: *op,
                expr: Box::new(expr.rename(names)),
            },
            Expr::App { func, args } => Expr::App {
                func: func.clone(),
                args: args.iter().map(|a| a.rename(names)).collect(),
            },
        }
    }

    fn subst_inner(
        &self,
        current: &HashMap<String, Expr>,
        old: &HashMap<String, Expr>,
        in_old: bool,
    ) -> Expr {
        match self {
            Expr::IntLit(_) | Expr::BoolLit(_) => self.clone(),
            Expr::Var(name) => {
                let map = if in_old { old } else { current };
                map.get(name).cloned().unwrap_or_else(|| self.clone())
            }
            Expr::Old(inner) => inner.subst_inner(current, old, true),
            Expr::Binary { left, op, right } => Expr::Binary {
                left: Box::new(left.subst_inner(current, old, in_old)),
                op: *op,
                right: Box::new(right.subst_inner(current, old, in_old)),
            },
            Expr::Unary { op, expr } => Expr::Unary {
                op: *op,
                expr: Box::new(expr.subst_inner(current, old, in_old)),
            },
            Expr::App { func, args } => Expr::App {
                func: func.clone(),
                args: args
                    .iter()
                    .map(|a| a.subst_inner(current, old, in_old))
                    .collect(),
            },
        }
    }
}
