// src/dag/graph.rs

use std::collections::BTreeSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{BuildError, Result};

/// Adjacency of the task graph, indexed by task position in the description.
///
/// Edges run from a predecessor to the task that waits on it. Construction
/// rejects cycles, so scheduling can assume a DAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGraph {
    predecessors: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl TaskGraph {
    /// Build a graph over `len` tasks. Self edges and duplicates are dropped.
    pub fn new(len: usize, edges: impl IntoIterator<Item = (usize, usize)>) -> Result<Self> {
        let mut unique: BTreeSet<(usize, usize)> = BTreeSet::new();
        for (from, to) in edges {
            if from >= len || to >= len {
                return Err(BuildError::ConfigError(format!(
                    "edge {from} -> {to} references a task outside 0..{len}"
                )));
            }
            if from != to {
                unique.insert((from, to));
            }
        }

        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for i in 0..len {
            graph.add_node(i);
        }
        for &(from, to) in &unique {
            graph.add_edge(from, to, ());
        }
        if let Err(cycle) = toposort(&graph, None) {
            return Err(BuildError::DagCycle(format!(
                "cycle detected in task graph involving task #{}",
                cycle.node_id()
            )));
        }

        let mut predecessors = vec![Vec::new(); len];
        let mut dependents = vec![Vec::new(); len];
        for (from, to) in unique {
            predecessors[to].push(from);
            dependents[from].push(to);
        }

        Ok(Self {
            predecessors,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.predecessors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predecessors.is_empty()
    }

    /// Immediate predecessors: tasks that must complete before `task` starts.
    pub fn predecessors_of(&self, task: usize) -> &[usize] {
        self.predecessors
            .get(task)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Immediate dependents: tasks waiting on `task`.
    pub fn dependents_of(&self, task: usize) -> &[usize] {
        self.dependents
            .get(task)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All edges, sorted by `(from, to)`.
    pub fn edges(&self) -> Vec<(usize, usize)> {
        let mut edges: Vec<(usize, usize)> = self
            .predecessors
            .iter()
            .enumerate()
            .flat_map(|(to, preds)| preds.iter().map(move |&from| (from, to)))
            .collect();
        edges.sort_unstable();
        edges
    }
}
