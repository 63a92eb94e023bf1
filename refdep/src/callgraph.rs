//! Procedure call graph
//!
//! Edge `P -> Q` when `P` calls `Q`, plus synthetic edges from each
//! check-dependency harness to the procedure it checks. The graph bounds
//! inlining (recursive procedures) and orders whole-program refinement.

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::{has_path_connecting, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};

use crate::ast::{Program, called_procs};

#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph of direct calls between the program's procedures
    pub fn build(program: &Program) -> Self {
        let mut cg = Self::new();
        for proc in program.procedures() {
            cg.node(&proc.name);
        }
        for proc in program.procedures() {
            if let Some(body) = &proc.body {
                for callee in called_procs(&body.stmts) {
                    cg.add_edge(&proc.name, &callee);
                }
            }
        }
        cg
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), idx);
        idx
    }

    /// Add a call edge; repeated edges are stored once
    pub fn add_edge(&mut self, caller: &str, callee: &str) {
        let from = self.node(caller);
        let to = self.node(callee);
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Direct callees, sorted by name
    pub fn callees(&self, name: &str) -> Vec<&str> {
        let Some(&idx) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = self
            .graph
            .edges(idx)
            .map(|e| self.graph[e.target()].as_str())
            .collect();
        out.sort_unstable();
        out
    }

    /// Direct callers, sorted by name
    pub fn callers(&self, name: &str) -> Vec<&str> {
        let Some(&idx) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = self
            .graph
            .edges_directed(idx, petgraph::Direction::Incoming)
            .map(|e| self.graph[e.source()].as_str())
            .collect();
        out.sort_unstable();
        out
    }

    /// Whether `name` can reach itself through one or more calls
    pub fn is_recursive(&self, name: &str) -> bool {
        let Some(&idx) = self.nodes.get(name) else {
            return false;
        };
        self.graph
            .neighbors(idx)
            .any(|next| next == idx || has_path_connecting(&self.graph, next, idx, None))
    }

    /// Procedures reachable from `name` through at least one call
    pub fn reachable_from(&self, name: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let Some(&idx) = self.nodes.get(name) else {
            return out;
        };
        for start in self.graph.neighbors(idx) {
            let mut dfs = Dfs::new(&self.graph, start);
            while let Some(n) = dfs.next(&self.graph) {
                out.insert(self.graph[n].clone());
            }
        }
        out
    }

    /// Strongly connected components, callees before callers.
    ///
    /// Members of a component are sorted by name so the order is stable.
    pub fn components_callee_first(&self) -> Vec<Vec<String>> {
        // tarjan_scc yields components in reverse topological order
        tarjan_scc(&self.graph)
            .into_iter()
            .map(|scc| {
                let mut names: Vec<String> = scc.into_iter().map(|n| self.graph[n].clone()).collect();
                names.sort();
                names
            })
            .collect()
    }
}
