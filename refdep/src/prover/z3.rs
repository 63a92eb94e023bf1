//! External `z3` process backend

use std::io::Write;
use std::process::{Command, Stdio};

use super::{AssumptionResult, Counterexample, ProverError, ProverOracle, ProverOutcome};
use crate::smt::{SmtScript, Term};

/// Name prefix of core-tracking assertions; `!` never occurs in program names
const CORE_LABEL: &str = "core!";

/// Z3 driven through SMT-LIB2 on stdin, one process per query
#[derive(Debug, Clone)]
pub struct Z3Solver {
    path: String,
    timeout_secs: u32,
}

impl Default for Z3Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl Z3Solver {
    pub fn new() -> Self {
        Self {
            path: "z3".to_string(),
            timeout_secs: 10,
        }
    }

    /// Set custom Z3 path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set timeout in seconds
    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout_secs = seconds;
        self
    }

    /// Check if the solver binary can be run
    pub fn is_available(&self) -> bool {
        Command::new(&self.path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn run(&self, script: &str) -> Result<String, ProverError> {
        let mut child = Command::new(&self.path)
            .arg("-in")
            .arg("-smt2")
            .arg(format!("-T:{}", self.timeout_secs))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProverError::Spawn {
                path: self.path.clone(),
                source,
            })?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    fn query(&self, script: &str) -> Option<String> {
        match self.run(script) {
            Ok(output) => Some(output),
            Err(err) => {
                tracing::warn!(error = %err, "z3 query failed");
                None
            }
        }
    }
}

/// Status line of a `check-sat` answer
fn status(output: &str) -> Result<&str, ProverError> {
    output
        .lines()
        .map(str::trim)
        .find(|l| matches!(*l, "sat" | "unsat" | "unknown" | "timeout"))
        .ok_or_else(|| {
            let first = output.lines().next().unwrap_or_default();
            ProverError::UnexpectedOutput(first.to_string())
        })
}

fn inconclusive(output: &str) -> ProverOutcome {
    if output.contains("out of memory") {
        ProverOutcome::OutOfMemory
    } else if output.lines().any(|l| l.trim() == "timeout") {
        ProverOutcome::TimedOut
    } else {
        ProverOutcome::Undetermined
    }
}

/// Split an s-expression list body into its top-level items
fn top_level_items(list: &str) -> Vec<&str> {
    let inner = list.trim();
    let inner = inner
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(inner);
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    for (i, c) in inner.char_indices() {
        match c {
            '(' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(s) = start.take() {
                        items.push(&inner[s..=i]);
                    }
                }
            }
            c if c.is_whitespace() && depth == 0 => {
                if let Some(s) = start.take() {
                    items.push(&inner[s..i]);
                }
            }
            _ => {
                if start.is_none() {
                    start = Some(i);
                }
            }
        }
    }
    if let Some(s) = start {
        if depth == 0 {
            items.push(&inner[s..]);
        }
    }
    items
}

/// Parse a `get-value` answer such as `((x 1) (y (- 2)))`
fn parse_values(output: &str) -> Counterexample {
    let mut cex = Counterexample::default();
    let Some(start) = output.find("((") else {
        return cex;
    };
    for pair in top_level_items(&output[start..]) {
        let parts = top_level_items(pair);
        if let [name, value] = parts.as_slice() {
            let name = name.trim_matches('|').to_string();
            cex.assignments.insert(name, value.to_string());
        }
    }
    cex
}

/// Parse a `get-unsat-core` answer such as `(core!0 core!2)`
fn parse_core(output: &str) -> Vec<usize> {
    let mut core: Vec<usize> = output
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('('))
        .flat_map(top_level_items)
        .filter_map(|item| item.trim_matches('|').strip_prefix(CORE_LABEL)?.parse().ok())
        .collect();
    core.sort_unstable();
    core.dedup();
    core
}

impl ProverOracle for Z3Solver {
    fn name(&self) -> &str {
        "z3"
    }

    fn check_validity(&mut self, formula: &Term) -> ProverOutcome {
        let mut script = SmtScript::new();
        script.set_option("produce-models", "true");
        script.set_logic("ALL");
        script.assert(&Term::not(formula.clone()));
        script.command("(check-sat)");
        let symbols = formula.symbols();
        if !symbols.is_empty() {
            let names: Vec<String> = symbols.iter().map(|(n, _)| crate::smt::quote_symbol(n)).collect();
            script.command(&format!("(get-value ({}))", names.join(" ")));
        }

        let Some(output) = self.query(script.as_str()) else {
            return ProverOutcome::Undetermined;
        };
        match status(&output) {
            Ok("unsat") => ProverOutcome::Valid,
            Ok("sat") => ProverOutcome::Invalid(parse_values(&output)),
            Ok(_) => inconclusive(&output),
            Err(err) => {
                tracing::warn!(error = %err, "z3 gave no answer");
                inconclusive(&output)
            }
        }
    }

    fn check_assumptions(&mut self, assumptions: &[Term]) -> AssumptionResult {
        let mut script = SmtScript::new();
        script.set_option("produce-unsat-cores", "true");
        script.set_logic("ALL");
        for (i, a) in assumptions.iter().enumerate() {
            script.assert_named(&format!("{CORE_LABEL}{i}"), a);
        }
        script.command("(check-sat)");
        script.command("(get-unsat-core)");

        let Some(output) = self.query(script.as_str()) else {
            return AssumptionResult::other(ProverOutcome::Undetermined);
        };
        match status(&output) {
            Ok("unsat") => AssumptionResult::unsat(parse_core(&output)),
            Ok("sat") => AssumptionResult::other(ProverOutcome::Invalid(Counterexample::default())),
            Ok(_) => AssumptionResult::other(inconclusive(&output)),
            Err(err) => {
                tracing::warn!(error = %err, "z3 gave no answer");
                AssumptionResult::other(inconclusive(&output))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smt::Sort;

    #[test]
    fn test_status_line() {
        assert_eq!(status("unsat\n(core!0)\n").unwrap(), "unsat");
        assert_eq!(status("sat\n((x 1))\n").unwrap(), "sat");
        assert!(status("(error \"line 1\")\n").is_err());
    }

    #[test]
    fn test_inconclusive_outcomes() {
        assert_eq!(inconclusive("timeout\n"), ProverOutcome::TimedOut);
        assert_eq!(inconclusive("(error \"out of memory\")"), ProverOutcome::OutOfMemory);
        assert_eq!(inconclusive("unknown\n"), ProverOutcome::Undetermined);
    }

    #[test]
    fn test_parse_values() {
        let cex = parse_values("sat\n((x 1)\n (|y'| (- 2)))\n");
        assert_eq!(cex.assignments.get("x").map(String::as_str), Some("1"));
        assert_eq!(cex.assignments.get("y'").map(String::as_str), Some("(- 2)"));
        assert_eq!(cex.to_string(), "x = 1, y' = (- 2)");
    }

    #[test]
    fn test_parse_core() {
        assert_eq!(parse_core("unsat\n(core!2 core!0)\n"), vec![0, 2]);
        assert_eq!(parse_core("unsat\n()\n"), Vec::<usize>::new());
    }

    #[test]
    fn test_missing_binary_is_undetermined() {
        let mut solver = Z3Solver::new().with_path("/nonexistent/z3");
        assert!(!solver.is_available());
        let p = Term::symbol("p", Sort::Bool);
        assert_eq!(solver.check_validity(&p), ProverOutcome::Undetermined);
        assert_eq!(solver.check_assumptions(&[p]).outcome, ProverOutcome::Undetermined);
    }

    #[test]
    fn test_z3_when_available() {
        let mut solver = Z3Solver::new();
        if !solver.is_available() {
            return;
        }
        let x = Term::symbol("x", Sort::Int);
        let tautology = Term::eq(x.clone(), Term::arith(crate::smt::ArithOp::Add, x.clone(), Term::int(0)));
        assert_eq!(solver.check_validity(&tautology), ProverOutcome::Valid);
        let p = Term::symbol("p", Sort::Bool);
        let result = solver.check_assumptions(&[Term::not(p.clone()), p, Term::bool(true)]);
        assert_eq!(result.outcome, ProverOutcome::Valid);
        assert!(result.core.contains(&0) && result.core.contains(&1));
    }
}
