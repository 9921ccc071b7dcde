//! Policy digraph and shortest-expected-cost search
//!
//! The graph is index-based and holds no state payload; the execution
//! policy keeps the pruned planner tree alongside it and shares indices.
//! Edge weights are negative log probabilities plus a marginal constant,
//! so Dijkstra's shortest path is the most probable route with a mild
//! penalty per hop.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ordered_float::NotNan;

use crate::common::{PlannerError, PlannerResult};

/// Hop penalty added to every edge weight
pub const MARGINAL_EDGE_WEIGHT: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// parent -> child, weighted by effective edge probability
    Forward,
    /// child -> parent, weighted by reverse edge probability
    Reverse,
    /// state -> virtual goal, weighted by goal probability
    Goal,
}

#[derive(Debug, Clone)]
pub struct PolicyEdge {
    pub from: usize,
    pub to: usize,
    pub weight: f64,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone)]
pub struct PolicyGraph {
    node_count: usize,
    edges: Vec<PolicyEdge>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl PolicyGraph {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            edges: Vec::new(),
            outgoing: vec![Vec::new(); node_count],
            incoming: vec![Vec::new(); node_count],
        }
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn add_edge(&mut self, from: usize, to: usize, weight: f64, kind: EdgeKind) {
        let edge_index = self.edges.len();
        self.edges.push(PolicyEdge {
            from,
            to,
            weight,
            kind,
        });
        self.outgoing[from].push(edge_index);
        self.incoming[to].push(edge_index);
    }

    pub fn outgoing_edges(&self, node: usize) -> impl Iterator<Item = &PolicyEdge> {
        self.outgoing[node].iter().map(move |&e| &self.edges[e])
    }

    pub fn incoming_edges(&self, node: usize) -> impl Iterator<Item = &PolicyEdge> {
        self.incoming[node].iter().map(move |&e| &self.edges[e])
    }
}

/// Result of the all-nodes-to-goal search
#[derive(Debug, Clone)]
pub struct PolicySearchResult {
    /// Cost of the best path to the goal node, per node
    pub distances: Vec<f64>,
    /// Next hop toward the goal, per node; the goal points at itself and
    /// unreachable nodes hold -1
    pub previous_index: Vec<i64>,
}

/// Dijkstra from every node to `goal_index`, walking edges backwards so a
/// single pass covers the whole graph
pub fn shortest_paths_to_goal(
    graph: &PolicyGraph,
    goal_index: usize,
) -> PlannerResult<PolicySearchResult> {
    if goal_index >= graph.node_count() {
        return Err(PlannerError::InvariantViolation(format!(
            "goal index {} out of bounds for {} nodes",
            goal_index,
            graph.node_count()
        )));
    }
    let mut distances = vec![f64::INFINITY; graph.node_count()];
    let mut previous_index = vec![-1_i64; graph.node_count()];
    let mut queue = BinaryHeap::new();

    distances[goal_index] = 0.0;
    previous_index[goal_index] = goal_index as i64;
    queue.push(Reverse((NotNan::new(0.0).unwrap(), goal_index)));

    while let Some(Reverse((distance, node))) = queue.pop() {
        if distance.into_inner() > distances[node] {
            continue;
        }
        for edge in graph.incoming_edges(node) {
            let candidate = distances[node] + edge.weight;
            if candidate < distances[edge.from] {
                distances[edge.from] = candidate;
                previous_index[edge.from] = node as i64;
                if let Ok(key) = NotNan::new(candidate) {
                    queue.push(Reverse((key, edge.from)));
                }
            }
        }
    }

    Ok(PolicySearchResult {
        distances,
        previous_index,
    })
}
