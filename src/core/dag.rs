//! Step dependency graph for workflows.
//!
//! A workflow declares its steps as a flat list in which each step names
//! the sibling steps it depends on. `StepGraph` turns that list into a
//! petgraph `DiGraph`, validates it and yields a submission order in which
//! every step follows all of its dependencies.

use crate::error::{Error, Result};
use crate::workflow::WorkflowStep;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Validated dependency graph over a workflow's steps.
///
/// Nodes are added in declaration order, so a node's index is also its
/// declaration position. Edges point from a dependency to its dependent.
pub struct StepGraph<'a> {
    graph: DiGraph<&'a WorkflowStep, ()>,
    index: HashMap<&'a str, NodeIndex>,
}

impl<'a> StepGraph<'a> {
    /// Build and validate the graph.
    ///
    /// # Errors
    /// Returns `Error::InvalidWorkflow` if:
    /// - two steps share an id
    /// - a step depends on itself or on an undeclared step
    /// - the dependencies form a cycle
    pub fn build(steps: &'a [WorkflowStep]) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::with_capacity(steps.len());

        for step in steps {
            if step.id.is_empty() {
                return Err(Error::InvalidWorkflow("step id must not be empty".to_string()));
            }
            let node = graph.add_node(step);
            if index.insert(step.id.as_str(), node).is_some() {
                return Err(Error::InvalidWorkflow(format!(
                    "duplicate step id: {}",
                    step.id
                )));
            }
        }

        for step in steps {
            let to = index[step.id.as_str()];
            for dep in &step.dependencies {
                if dep == &step.id {
                    return Err(Error::InvalidWorkflow(format!(
                        "step {} depends on itself",
                        step.id
                    )));
                }
                let from = index.get(dep.as_str()).ok_or_else(|| {
                    Error::InvalidWorkflow(format!(
                        "step {} depends on unknown step {}",
                        step.id, dep
                    ))
                })?;
                graph.update_edge(*from, to, ());
            }
        }

        if is_cyclic_directed(&graph) {
            let culprit = toposort(&graph, None)
                .err()
                .and_then(|cycle| graph.node_weight(cycle.node_id()).map(|s| s.id.clone()))
                .unwrap_or_else(|| "unknown".to_string());
            return Err(Error::InvalidWorkflow(format!(
                "dependency cycle detected at step: {}",
                culprit
            )));
        }

        Ok(Self { graph, index })
    }

    /// Number of steps in the graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Steps in an order where every step follows its dependencies.
    ///
    /// Among steps that are ready at the same point the one declared first
    /// wins, so an already valid declaration order is returned unchanged.
    pub fn execution_order(&self) -> Vec<&'a WorkflowStep> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(i)) = ready.pop() {
            let node = NodeIndex::new(i);
            order.push(self.graph[node]);
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                let degree = &mut in_degree[next.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(next.index()));
                }
            }
        }
        order
    }

    /// Steps that `step_id` depends on.
    pub fn dependencies(&self, step_id: &str) -> Vec<&'a WorkflowStep> {
        self.neighbors(step_id, Direction::Incoming)
    }

    /// Steps that depend on `step_id`.
    pub fn dependents(&self, step_id: &str) -> Vec<&'a WorkflowStep> {
        self.neighbors(step_id, Direction::Outgoing)
    }

    /// Steps without dependencies.
    pub fn roots(&self) -> Vec<&'a WorkflowStep> {
        self.graph
            .node_indices()
            .filter(|n| {
                self.graph
                    .neighbors_directed(*n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| self.graph[n])
            .collect()
    }

    fn neighbors(&self, step_id: &str, direction: Direction) -> Vec<&'a WorkflowStep> {
        match self.index.get(step_id) {
            Some(&node) => {
                let mut found: Vec<NodeIndex> =
                    self.graph.neighbors_directed(node, direction).collect();
                found.sort();
                found.into_iter().map(|n| self.graph[n]).collect()
            }
            None => Vec::new(),
        }
    }
}
