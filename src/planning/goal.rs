//! Goal events: branch blacklisting and goal-probability back-propagation
//!
//! When a new state qualifies as a goal, two things happen. First, the
//! branch that produced the solution is removed from nearest-neighbor
//! consideration so the planner stops rediscovering it; the branch root is
//! the first ancestor whose incoming transition could plausibly be retried
//! into a different outcome. Second, goal probabilities are propagated up
//! the ancestor chain, folding split siblings through the retry
//! arithmetic, and the root's value becomes the planner's total goal
//! probability.

use std::collections::HashMap;
use std::time::Instant;

use itertools::Itertools;

use crate::common::{
    ConfigSampler, OutcomeClustering, PlannerError, PlannerResult, RobotModel, Simulator,
    LOG_INFO, LOG_WARN,
};
use crate::planning::planner::BeliefPlanner;
use crate::planning::retry::{transition_goal_probability, SiblingOutcome};

impl<C, RM, SAMP, SIM, CLU> BeliefPlanner<C, RM, SAMP, SIM, CLU>
where
    C: Clone + Sync,
    RM: RobotModel<C> + Sync,
    SAMP: ConfigSampler<C>,
    SIM: Simulator<C>,
    CLU: OutcomeClustering<C>,
{
    /// Handle a freshly detected goal state: record the first-solution
    /// time, blacklist the goal branch, and refresh goal probabilities on
    /// every ancestor.
    pub(crate) fn goal_reached_callback(
        &mut self,
        new_goal_index: i64,
        start_time: Instant,
    ) -> PlannerResult<()> {
        if self.time_to_first_solution == 0.0 {
            self.time_to_first_solution = start_time.elapsed().as_secs_f64();
        }

        let mut current_index = new_goal_index;
        let mut goal_branch_root_index = -1;
        while current_index > 0 {
            if self.is_goal_branch_root(current_index) {
                goal_branch_root_index = current_index;
                break;
            }
            current_index = self.tree.node(current_index).parent_index();
        }
        self.blacklist_goal_branch(goal_branch_root_index);

        if self.tree.node(new_goal_index).state().goal_p() == 0.0 {
            return Err(PlannerError::InvariantViolation(
                "new goal state has zero goal probability".to_string(),
            ));
        }
        let mut update_index = self.tree.node(new_goal_index).parent_index();
        while update_index >= 0 {
            self.update_goal_reached_probability(update_index)?;
            update_index = self.tree.node(update_index).parent_index();
        }
        self.total_goal_reached_probability = self.tree.node(0).state().goal_p();
        self.log(
            &format!(
                "Updated total goal reached probability to {:.6}",
                self.total_goal_reached_probability
            ),
            LOG_INFO,
        );
        Ok(())
    }

    fn blacklist_goal_branch(&mut self, goal_branch_root_index: i64) {
        if goal_branch_root_index < 0 {
            return;
        }
        if goal_branch_root_index == 0 {
            self.log(
                "Blacklisting with goal branch root at the tree root is not possible",
                LOG_WARN,
            );
            return;
        }
        self.tree.disable_branch(goal_branch_root_index);
    }

    /// A state roots its goal branch when its incoming transition is
    /// low-probability, when it is a child of a still-unresolved split, or
    /// when its parent is the tree root.
    fn is_goal_branch_root(&self, index: i64) -> bool {
        let node = self.tree.node(index);
        let state = node.state();

        let has_low_probability_transition =
            state.effective_edge_p() < self.config.goal_probability_threshold;

        let mut is_child_of_unresolved_split = false;
        if state.split_id() > 0 {
            let parent = self.tree.node(node.parent_index());
            // A parent that reaches the goal with certainty has resolved
            // the split; so has one whose matching children are all
            // already blacklisted
            if parent.state().goal_p() < 1.0 {
                is_child_of_unresolved_split = parent.child_indices().iter().any(|&child| {
                    let sibling = self.tree.node(child).state();
                    sibling.transition_id() == state.transition_id() && sibling.use_for_nn()
                });
            }
        }

        let parent_is_root = node.parent_index() == 0;
        has_low_probability_transition || is_child_of_unresolved_split || parent_is_root
    }

    /// Recompute one node's goal probability from its children: group
    /// children by forward transition, score each group with the retry
    /// arithmetic, take the best group.
    fn update_goal_reached_probability(&mut self, index: i64) -> PlannerResult<()> {
        let groups: HashMap<u64, Vec<i64>> = self
            .tree
            .node(index)
            .child_indices()
            .iter()
            .map(|&child| (self.tree.node(child).state().transition_id(), child))
            .into_group_map();

        let mut max_transition_probability = 0.0;
        for children in groups.values() {
            let siblings: Vec<SiblingOutcome> = children
                .iter()
                .map(|&child| {
                    let sibling = self.tree.node(child).state();
                    SiblingOutcome {
                        raw_edge_p: sibling.raw_edge_p(),
                        effective_edge_p: sibling.effective_edge_p(),
                        reverse_edge_p: sibling.reverse_edge_p(),
                        goal_p: sibling.goal_p(),
                        independent: sibling.is_action_independent(),
                    }
                })
                .collect();
            let transition_probability =
                transition_goal_probability(&siblings, self.config.edge_attempt_count)?;
            if transition_probability > max_transition_probability {
                max_transition_probability = transition_probability;
            }
        }
        if !(0.0..=1.0).contains(&max_transition_probability) {
            return Err(PlannerError::InvariantViolation(format!(
                "max transition probability out of range [0, 1]: {}",
                max_transition_probability
            )));
        }
        self.tree
            .node_mut(index)
            .state_mut()
            .set_goal_p(max_transition_probability);
        Ok(())
    }
}
