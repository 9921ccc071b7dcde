//! Execution policy: the pruned tree as a queryable action graph
//!
//! Extraction builds the policy digraph over the pruned planner states
//! plus one synthetic virtual goal node, then runs a single
//! all-states-to-goal Dijkstra whose next hops drive closed-loop
//! execution. Directly detected goal states (pruned-tree leaves whose
//! positive goal probability clears the threshold) are the only states
//! wired straight to the virtual goal; everything else routes through
//! forward and reverse edges, so every next hop corresponds to an
//! executable action.

use crate::common::{PlannerError, PlannerResult};
use crate::planning::tree::PlannerTree;
use crate::policy::graph::{
    shortest_paths_to_goal, EdgeKind, PolicyGraph, PolicySearchResult, MARGINAL_EDGE_WEIGHT,
};

/// Answer to a policy query: where the executor is believed to be, and
/// what to do next
#[derive(Debug, Clone)]
pub struct PolicyQuery<C> {
    /// Index of the policy state the current configuration matched
    pub previous_state_idx: i64,
    /// Transition the returned action attempts; feed back into the next query
    pub desired_transition_id: u64,
    /// Control target to hand to the mover
    pub action: C,
    /// Configuration the policy expects the action to end at
    pub expected_result: C,
    /// Whether the action undoes the previous transition
    pub is_reverse: bool,
}

pub struct ExecutionPolicy<C> {
    tree: PlannerTree<C>,
    graph: PolicyGraph,
    search: PolicySearchResult,
    virtual_goal_index: usize,
    goal: C,
    goal_probability_threshold: f64,
}

impl<C: Clone> ExecutionPolicy<C> {
    /// Build the policy graph from a pruned, linkage-valid planner tree
    pub fn from_tree(
        tree: &PlannerTree<C>,
        goal: C,
        goal_probability_threshold: f64,
    ) -> PlannerResult<Self> {
        if tree.is_empty() {
            return Err(PlannerError::InvalidArgument(
                "cannot extract a policy from an empty tree".to_string(),
            ));
        }
        tree.validate_linkage()?;
        let state_count = tree.len();
        let virtual_goal_index = state_count;
        let mut graph = PolicyGraph::new(state_count + 1);

        for index in 1..state_count {
            let node = tree.node(index as i64);
            let parent = node.parent_index() as usize;
            let state = node.state();
            let effective = state.effective_edge_p();
            if effective > 0.0 {
                graph.add_edge(
                    parent,
                    index,
                    -effective.ln() + MARGINAL_EDGE_WEIGHT,
                    EdgeKind::Forward,
                );
            }
            let reverse = state.reverse_edge_p();
            if reverse > 0.0 {
                graph.add_edge(
                    index,
                    parent,
                    -reverse.ln() + MARGINAL_EDGE_WEIGHT,
                    EdgeKind::Reverse,
                );
            }
        }
        for index in 0..state_count {
            let node = tree.node(index as i64);
            let goal_p = node.state().goal_p();
            if node.child_indices().is_empty() && goal_p >= goal_probability_threshold {
                graph.add_edge(
                    index,
                    virtual_goal_index,
                    -goal_p.ln() + MARGINAL_EDGE_WEIGHT,
                    EdgeKind::Goal,
                );
            }
        }

        let search = shortest_paths_to_goal(&graph, virtual_goal_index)?;
        for index in 0..state_count {
            if search.previous_index[index] < 0 {
                return Err(PlannerError::InvariantViolation(format!(
                    "policy state {} cannot reach the virtual goal",
                    index
                )));
            }
        }

        Ok(Self {
            tree: tree.clone(),
            graph,
            search,
            virtual_goal_index,
            goal,
            goal_probability_threshold,
        })
    }

    /// Number of planner states in the policy (the virtual goal excluded)
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn tree(&self) -> &PlannerTree<C> {
        &self.tree
    }

    pub fn graph(&self) -> &PolicyGraph {
        &self.graph
    }

    pub fn goal(&self) -> &C {
        &self.goal
    }

    pub fn goal_probability_threshold(&self) -> f64 {
        self.goal_probability_threshold
    }

    pub fn virtual_goal_index(&self) -> usize {
        self.virtual_goal_index
    }

    /// Next hop toward the virtual goal from a policy state
    pub fn next_hop(&self, index: i64) -> i64 {
        self.search.previous_index[index as usize]
    }

    /// Shortest-path cost from a policy state to the virtual goal
    pub fn distance_to_goal(&self, index: i64) -> f64 {
        self.search.distances[index as usize]
    }

    /// Re-localize against the policy and return the next action.
    ///
    /// `desired_transition_id` is the transition attempted by the previous
    /// step (0 before the first); candidates are its expected outcomes
    /// unless `allow_branch_jumping` widens the search to every state.
    /// `clustering_fn(particles, config)` decides cluster membership.
    pub fn query_best_action(
        &self,
        desired_transition_id: u64,
        current_config: &C,
        allow_branch_jumping: bool,
        link_to_planned_parent: bool,
        clustering_fn: &mut dyn FnMut(&[C], &C) -> bool,
    ) -> PlannerResult<PolicyQuery<C>> {
        let candidates = self.candidate_states(desired_transition_id, allow_branch_jumping);
        let mut best = self.best_cluster_match(&candidates, current_config, clustering_fn);
        if best.is_none() && desired_transition_id != 0 {
            if link_to_planned_parent {
                best = self.planned_source_state(desired_transition_id);
            }
            if best.is_none() {
                let every_state: Vec<i64> = (0..self.tree.len() as i64).collect();
                best = self.best_cluster_match(&every_state, current_config, clustering_fn);
            }
        }
        let best = best.ok_or_else(|| {
            PlannerError::ExternalFailure(
                "policy could not localize the current configuration".to_string(),
            )
        })?;
        Ok(self.action_for(best))
    }

    /// States the executor could be at after attempting a transition
    fn candidate_states(&self, desired_transition_id: u64, allow_branch_jumping: bool) -> Vec<i64> {
        if allow_branch_jumping || desired_transition_id == 0 {
            return (0..self.tree.len() as i64).collect();
        }
        let mut candidates = Vec::new();
        for index in 0..self.tree.len() as i64 {
            let node = self.tree.node(index);
            let state = node.state();
            let forward_match = state.transition_id() == desired_transition_id;
            let reverse_match = state.reverse_transition_id() == desired_transition_id;
            if forward_match || reverse_match {
                // either the action landed here, or it stalled at the
                // other end of the edge
                candidates.push(index);
                if node.parent_index() >= 0 {
                    candidates.push(node.parent_index());
                }
            }
        }
        candidates.sort_unstable();
        candidates.dedup();
        candidates
    }

    fn best_cluster_match(
        &self,
        candidates: &[i64],
        current_config: &C,
        clustering_fn: &mut dyn FnMut(&[C], &C) -> bool,
    ) -> Option<i64> {
        let mut best: Option<(f64, i64)> = None;
        for &index in candidates {
            let state = self.tree.node(index).state();
            let matched = match state.particles() {
                Some(particles) if !particles.is_empty() => {
                    clustering_fn(particles, current_config)
                }
                _ => clustering_fn(
                    std::slice::from_ref(state.expectation()),
                    current_config,
                ),
            };
            if matched {
                let distance = self.search.distances[index as usize];
                if best.map_or(true, |(best_distance, _)| distance < best_distance) {
                    best = Some((distance, index));
                }
            }
        }
        best.map(|(_, index)| index)
    }

    /// The state the attempted transition was planned from
    fn planned_source_state(&self, desired_transition_id: u64) -> Option<i64> {
        for index in 0..self.tree.len() as i64 {
            let node = self.tree.node(index);
            if node.state().transition_id() == desired_transition_id && node.parent_index() >= 0 {
                return Some(node.parent_index());
            }
            if node.state().reverse_transition_id() == desired_transition_id {
                return Some(index);
            }
        }
        None
    }

    fn action_for(&self, state_index: i64) -> PolicyQuery<C> {
        let next = self.search.previous_index[state_index as usize];
        let node = self.tree.node(state_index);
        if next == self.virtual_goal_index as i64 {
            // already in the goal cluster: settle by re-issuing the
            // arrival command until the goal check fires
            let state = node.state();
            return PolicyQuery {
                previous_state_idx: state_index,
                desired_transition_id: state.transition_id(),
                action: state.command().clone(),
                expected_result: state.expectation().clone(),
                is_reverse: false,
            };
        }
        if next == node.parent_index() {
            let parent = self.tree.node(next).state();
            return PolicyQuery {
                previous_state_idx: state_index,
                desired_transition_id: node.state().reverse_transition_id(),
                action: parent.expectation().clone(),
                expected_result: parent.expectation().clone(),
                is_reverse: true,
            };
        }
        let child = self.tree.node(next).state();
        PolicyQuery {
            previous_state_idx: state_index,
            desired_transition_id: child.transition_id(),
            action: child.command().clone(),
            expected_result: child.expectation().clone(),
            is_reverse: false,
        }
    }
}
