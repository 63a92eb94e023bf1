//! In-process bounded prover
//!
//! Decides formulas by exhaustive search over a bounded integer domain:
//! `min..=max`, widened with `c - 1`, `c` and `c + 1` for every integer
//! literal `c` of the query.
//! Symbols are assigned one at a time and the formula is partially
//! evaluated after every step, so most of the space is never visited.
//! Uninterpreted applications get a value per distinct argument tuple
//! (Ackermann's reduction, applied lazily). Division and modulus by zero
//! evaluate to zero.
//!
//! Answers are exact only for the chosen domain: `Valid` means no
//! falsifying assignment exists within it.

use std::collections::{BTreeSet, HashMap};

use super::{AssumptionResult, Counterexample, ProverOracle, ProverOutcome};
use crate::smt::{ArithOp, Sort, Term, TermKind};

const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Value {
    Bool(bool),
    Int(i64),
}

impl Value {
    fn as_bool(self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(b),
            Value::Int(_) => None,
        }
    }

    fn as_int(self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(n),
            Value::Bool(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
        }
    }
}

/// Search budget exhausted
struct OutOfBudget;

/// Something the search assigns a value to
#[derive(Debug)]
enum Unknown {
    Symbol { name: String, sort: Sort },
    App { term: Term, func: String, sort: Sort },
}

/// Exhaustive prover over `min..=max`
#[derive(Debug, Clone)]
pub struct BoundedProver {
    min: i64,
    max: i64,
    node_budget: u64,
    /// Search nodes visited by the last query
    last_nodes: u64,
}

impl Default for BoundedProver {
    fn default() -> Self {
        Self::new(-3, 3, 2_000_000)
    }
}

impl BoundedProver {
    pub fn new(min: i64, max: i64, node_budget: u64) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
            node_budget,
            last_nodes: 0,
        }
    }

    pub fn last_nodes(&self) -> u64 {
        self.last_nodes
    }

    /// Find an assignment under which `root` evaluates to `goal`
    fn find(&mut self, root: &Term, goal: bool) -> Result<Option<Counterexample>, OutOfBudget> {
        let mut unknowns: Vec<Unknown> = root
            .symbols()
            .into_iter()
            .map(|(name, sort)| Unknown::Symbol { name, sort })
            .collect();
        let mut ints: BTreeSet<i64> = (self.min..=self.max).collect();
        // Applications after symbols, inner before outer
        root.for_each_node(&mut |t| match t.kind() {
            TermKind::App { func, sort, .. } => unknowns.push(Unknown::App {
                term: t.clone(),
                func: func.clone(),
                sort: *sort,
            }),
            TermKind::Int(n) => ints.extend([n.saturating_sub(1), *n, n.saturating_add(1)]),
            _ => {}
        });

        let mut search = Search {
            root,
            goal,
            ints: ints.into_iter().map(Value::Int).collect(),
            budget: self.node_budget,
            nodes: 0,
            unknowns: &unknowns,
            symbols: HashMap::new(),
            apps: HashMap::new(),
        };
        let found = search.run(0);
        self.last_nodes = search.nodes;
        let found = found?;
        Ok(found.then(|| search.counterexample()))
    }
}

struct Search<'a> {
    root: &'a Term,
    goal: bool,
    /// Integer domain, ascending
    ints: Vec<Value>,
    budget: u64,
    nodes: u64,
    unknowns: &'a [Unknown],
    symbols: HashMap<String, Value>,
    /// Assigned application nodes with their argument values
    apps: HashMap<usize, (Vec<Value>, Value)>,
}

impl Search<'_> {
    fn run(&mut self, idx: usize) -> Result<bool, OutOfBudget> {
        self.nodes += 1;
        if self.nodes > self.budget {
            return Err(OutOfBudget);
        }
        let mut memo = HashMap::new();
        match self.eval(self.root, &mut memo).and_then(Value::as_bool) {
            Some(v) => return Ok(v == self.goal),
            None if idx == self.unknowns.len() => return Ok(false),
            None => {}
        }

        let unknowns = self.unknowns;
        match &unknowns[idx] {
            Unknown::Symbol { name, sort } => {
                for value in self.domain(*sort) {
                    self.symbols.insert(name.clone(), value);
                    if self.run(idx + 1)? {
                        return Ok(true);
                    }
                }
                self.symbols.remove(name);
                Ok(false)
            }
            Unknown::App { term, func, sort } => {
                let TermKind::App { args, .. } = term.kind() else {
                    return Ok(false);
                };
                let mut memo = HashMap::new();
                let Some(arg_values) = args
                    .iter()
                    .map(|a| self.eval(a, &mut memo))
                    .collect::<Option<Vec<_>>>()
                else {
                    // Arguments are total once every symbol is assigned
                    return Ok(false);
                };
                let forced = unknowns[..idx].iter().find_map(|u| match u {
                    Unknown::App { term: other, func: f, .. } if f == func => self
                        .apps
                        .get(&other.id())
                        .filter(|(vals, _)| *vals == arg_values)
                        .map(|(_, v)| *v),
                    _ => None,
                });
                let values = match forced {
                    Some(v) => vec![v],
                    None => self.domain(*sort),
                };
                for value in values {
                    self.apps.insert(term.id(), (arg_values.clone(), value));
                    if self.run(idx + 1)? {
                        return Ok(true);
                    }
                }
                self.apps.remove(&term.id());
                Ok(false)
            }
        }
    }

    fn domain(&self, sort: Sort) -> Vec<Value> {
        match sort {
            Sort::Bool => vec![Value::Bool(false), Value::Bool(true)],
            Sort::Int => self.ints.clone(),
        }
    }

    fn counterexample(&self) -> Counterexample {
        let assignments = self
            .unknowns
            .iter()
            .filter_map(|u| match u {
                Unknown::Symbol { name, .. } => self.symbols.get(name).map(|v| (name.clone(), v.to_string())),
                Unknown::App { .. } => None,
            })
            .collect();
        Counterexample { assignments }
    }

    /// Three-valued evaluation: `None` when the value depends on unassigned unknowns
    fn eval(&self, term: &Term, memo: &mut HashMap<usize, Option<Value>>) -> Option<Value> {
        if let Some(v) = memo.get(&term.id()) {
            return *v;
        }
        let v = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.eval_inner(term, memo));
        memo.insert(term.id(), v);
        v
    }

    fn eval_inner(&self, term: &Term, memo: &mut HashMap<usize, Option<Value>>) -> Option<Value> {
        let bool_of = |s: &Self, t: &Term, memo: &mut HashMap<usize, Option<Value>>| {
            s.eval(t, memo).and_then(Value::as_bool)
        };
        let int_of = |s: &Self, t: &Term, memo: &mut HashMap<usize, Option<Value>>| {
            s.eval(t, memo).and_then(Value::as_int)
        };
        match term.kind() {
            TermKind::Bool(b) => Some(Value::Bool(*b)),
            TermKind::Int(n) => Some(Value::Int(*n)),
            TermKind::Symbol { name, .. } => self.symbols.get(name).copied(),
            TermKind::Not(t) => bool_of(self, t, memo).map(|b| Value::Bool(!b)),
            TermKind::And(ts) => {
                let mut all = true;
                for t in ts {
                    match bool_of(self, t, memo) {
                        Some(false) => return Some(Value::Bool(false)),
                        Some(true) => {}
                        None => all = false,
                    }
                }
                all.then_some(Value::Bool(true))
            }
            TermKind::Or(ts) => {
                let mut all = true;
                for t in ts {
                    match bool_of(self, t, memo) {
                        Some(true) => return Some(Value::Bool(true)),
                        Some(false) => {}
                        None => all = false,
                    }
                }
                all.then_some(Value::Bool(false))
            }
            TermKind::Implies(a, b) => match (bool_of(self, a, memo), bool_of(self, b, memo)) {
                (Some(false), _) | (_, Some(true)) => Some(Value::Bool(true)),
                (Some(true), Some(false)) => Some(Value::Bool(false)),
                _ => None,
            },
            TermKind::Eq(a, b) => {
                let (a, b) = (self.eval(a, memo)?, self.eval(b, memo)?);
                Some(Value::Bool(a == b))
            }
            TermKind::Ite(c, t, e) => match bool_of(self, c, memo) {
                Some(true) => self.eval(t, memo),
                Some(false) => self.eval(e, memo),
                None => {
                    let (t, e) = (self.eval(t, memo)?, self.eval(e, memo)?);
                    (t == e).then_some(t)
                }
            },
            TermKind::Neg(t) => int_of(self, t, memo).map(|n| Value::Int(n.wrapping_neg())),
            TermKind::Arith(op, a, b) => {
                let (a, b) = (int_of(self, a, memo)?, int_of(self, b, memo)?);
                let n = match op {
                    ArithOp::Add => a.wrapping_add(b),
                    ArithOp::Sub => a.wrapping_sub(b),
                    ArithOp::Mul => a.wrapping_mul(b),
                    ArithOp::Div | ArithOp::Mod => op.apply(a, b).unwrap_or(0),
                };
                Some(Value::Int(n))
            }
            TermKind::Cmp(op, a, b) => {
                let (a, b) = (int_of(self, a, memo)?, int_of(self, b, memo)?);
                Some(Value::Bool(op.apply(a, b)))
            }
            TermKind::App { .. } => self.apps.get(&term.id()).map(|(_, v)| *v),
        }
    }
}

impl ProverOracle for BoundedProver {
    fn name(&self) -> &str {
        "bounded"
    }

    fn check_validity(&mut self, formula: &Term) -> ProverOutcome {
        match self.find(formula, false) {
            Ok(None) => ProverOutcome::Valid,
            Ok(Some(cex)) => ProverOutcome::Invalid(cex),
            Err(OutOfBudget) => {
                tracing::debug!(budget = self.node_budget, "bounded search exhausted its budget");
                ProverOutcome::TimedOut
            }
        }
    }

    fn check_assumptions(&mut self, assumptions: &[Term]) -> AssumptionResult {
        let conjunction = Term::and(assumptions.to_vec());
        match self.find(&conjunction, true) {
            // Shrinking the core is left to the caller
            Ok(None) => AssumptionResult::unsat((0..assumptions.len()).collect()),
            Ok(Some(cex)) => AssumptionResult::other(ProverOutcome::Invalid(cex)),
            Err(OutOfBudget) => AssumptionResult::other(ProverOutcome::TimedOut),
        }
    }
}
