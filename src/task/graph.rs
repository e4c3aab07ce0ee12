//! Priority graph of labor process steps.
//!
//! The node definitions are immutable and shared between all agents working
//! on the same product; each agent owns a [`PriorityGraph`] that tracks its
//! finished set and eligible frontier.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

pub type NodeId = String;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("duplicate node '{0}'")]
    DuplicateNode(NodeId),

    #[error("labor process '{operation}' is used by both '{first}' and '{second}'")]
    DuplicateOperation {
        operation: String,
        first: NodeId,
        second: NodeId,
    },

    #[error("node '{node}' referenced by '{referenced_by}' does not exist")]
    UnknownNode { node: NodeId, referenced_by: NodeId },

    #[error("cycle detected at node '{0}'")]
    Cycle(NodeId),

    #[error("end node '{0}' is not reachable from the start node")]
    Unreachable(NodeId),

    #[error("node '{0}' is not eligible")]
    NotEligible(NodeId),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GraphNode {
    pub node_id: NodeId,
    /// Labor process performed by this step.
    pub operation: String,
    #[serde(default)]
    pub preconditions: BTreeSet<NodeId>,
    #[serde(default)]
    pub successors: Vec<NodeId>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Pending,
    Finished,
}

/// Static description of a product's labor steps.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PriorityGraphDefinition {
    pub start_node: NodeId,
    pub end_node: NodeId,
    pub nodes: Vec<GraphNode>,
}

impl PriorityGraphDefinition {
    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.node_id == node_id)
    }

    /// Labor processes used anywhere in the graph.
    pub fn operations(&self) -> BTreeSet<&str> {
        self.nodes.iter().map(|node| node.operation.as_str()).collect()
    }

    /// Check ids, references, acyclicity and reachability of the end node.
    ///
    /// Calendar entries are keyed by task and labor process, so every node
    /// must perform a different labor process.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.node_id.as_str()) {
                return Err(GraphError::DuplicateNode(node.node_id.clone()));
            }
        }

        let mut operations: HashMap<&str, &str> = HashMap::new();
        for node in &self.nodes {
            if let Some(first) = operations.insert(node.operation.as_str(), node.node_id.as_str()) {
                return Err(GraphError::DuplicateOperation {
                    operation: node.operation.clone(),
                    first: first.to_string(),
                    second: node.node_id.clone(),
                });
            }
        }

        for required in [&self.start_node, &self.end_node] {
            if !ids.contains(required.as_str()) {
                return Err(GraphError::UnknownNode {
                    node: required.clone(),
                    referenced_by: "graph".to_string(),
                });
            }
        }

        for node in &self.nodes {
            for reference in node.preconditions.iter().chain(node.successors.iter()) {
                if !ids.contains(reference.as_str()) {
                    return Err(GraphError::UnknownNode {
                        node: reference.clone(),
                        referenced_by: node.node_id.clone(),
                    });
                }
            }
        }

        let successors: HashMap<&str, &[NodeId]> = self
            .nodes
            .iter()
            .map(|node| (node.node_id.as_str(), node.successors.as_slice()))
            .collect();

        let mut visited = HashSet::new();
        for node in &self.nodes {
            let mut path = HashSet::new();
            if let Some(cycle_at) = find_cycle(&successors, &node.node_id, &mut visited, &mut path) {
                return Err(GraphError::Cycle(cycle_at));
            }
        }

        if !reachable(&successors, &self.start_node).contains(self.end_node.as_str()) {
            return Err(GraphError::Unreachable(self.end_node.clone()));
        }

        Ok(())
    }
}

fn find_cycle<'a>(
    successors: &HashMap<&'a str, &'a [NodeId]>,
    node_id: &'a str,
    visited: &mut HashSet<&'a str>,
    path: &mut HashSet<&'a str>,
) -> Option<NodeId> {
    if path.contains(node_id) {
        return Some(node_id.to_string());
    }
    if !visited.insert(node_id) {
        return None;
    }

    path.insert(node_id);
    for next in successors.get(node_id).copied().unwrap_or_default() {
        if let Some(cycle_at) = find_cycle(successors, next, visited, path) {
            return Some(cycle_at);
        }
    }
    path.remove(node_id);
    None
}

fn reachable<'a>(successors: &HashMap<&'a str, &'a [NodeId]>, start: &'a str) -> HashSet<&'a str> {
    let mut seen = HashSet::from([start]);
    let mut stack = vec![start];
    while let Some(node_id) = stack.pop() {
        for next in successors.get(node_id).copied().unwrap_or_default() {
            if seen.insert(next.as_str()) {
                stack.push(next.as_str());
            }
        }
    }
    seen
}

/// Progress of one task through its priority graph.
#[derive(Clone, Debug)]
pub struct PriorityGraph {
    definition: Arc<PriorityGraphDefinition>,
    finished: Vec<NodeId>,
    frontier: Vec<NodeId>,
}

impl PriorityGraph {
    pub fn new(definition: Arc<PriorityGraphDefinition>) -> Self {
        let frontier = vec![definition.start_node.clone()];
        Self {
            definition,
            finished: Vec::new(),
            frontier,
        }
    }

    /// Rebuild progress from the finished nodes recorded in the task store.
    pub fn resume(definition: Arc<PriorityGraphDefinition>, finished: &[NodeId]) -> Result<Self, GraphError> {
        let mut graph = Self::new(definition);
        for node_id in finished {
            graph.complete(node_id)?;
        }
        Ok(graph)
    }

    pub fn definition(&self) -> &PriorityGraphDefinition {
        &self.definition
    }

    pub fn finished_nodes(&self) -> &[NodeId] {
        &self.finished
    }

    pub fn state(&self, node_id: &str) -> NodeState {
        if self.finished.iter().any(|id| id == node_id) {
            NodeState::Finished
        } else {
            NodeState::Pending
        }
    }

    /// Frontier nodes whose preconditions are all finished, in frontier order.
    pub fn eligible(&self) -> Vec<&GraphNode> {
        self.frontier
            .iter()
            .filter_map(|node_id| self.definition.node(node_id))
            .filter(|node| {
                node.preconditions
                    .iter()
                    .all(|pre| self.state(pre) == NodeState::Finished)
            })
            .collect()
    }

    /// Mark an eligible node finished and merge its successors into the frontier.
    pub fn complete(&mut self, node_id: &str) -> Result<(), GraphError> {
        if !self.eligible().iter().any(|node| node.node_id == node_id) {
            return Err(GraphError::NotEligible(node_id.to_string()));
        }
        let successors = self
            .definition
            .node(node_id)
            .map(|node| node.successors.clone())
            .unwrap_or_default();

        self.frontier.retain(|id| id != node_id);
        self.finished.push(node_id.to_string());
        for successor in successors {
            if self.state(&successor) == NodeState::Pending && !self.frontier.contains(&successor) {
                self.frontier.push(successor);
            }
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.state(&self.definition.end_node) == NodeState::Finished
    }

    /// Operations of every node not finished yet.
    pub fn remaining_operations(&self) -> Vec<&str> {
        self.definition
            .nodes
            .iter()
            .filter(|node| self.state(&node.node_id) == NodeState::Pending)
            .map(|node| node.operation.as_str())
            .collect()
    }
}
