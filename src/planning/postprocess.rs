//! Tree post-processing and pruning ahead of policy extraction
//!
//! Post-processing marks reverse-reachable siblings of goal branches with
//! negative goal probabilities. Pruning then copies the productive part of
//! the tree into a fresh arena: states on a goal path always survive,
//! reverse-reachable spur states survive when requested, everything else
//! is dropped. Both passes are idempotent and both leave the input tree
//! untouched.

use crate::common::PlannerResult;
use crate::planning::tree::PlannerTree;

/// Mark non-goal children of goal-reaching splits as reachable-by-reverse.
///
/// Runs in insertion order, which visits parents before children, so a
/// single ascending pass suffices. A state qualifies when its parent is on
/// a goal branch and a sibling born of the same transition reaches the
/// goal; its new goal probability is `-(parent_goal_p * reverse_edge_p)`,
/// the negative sign encoding "via reverse" for pruning and edge weights.
pub fn post_process_tree<C: Clone>(tree: &PlannerTree<C>) -> PlannerTree<C> {
    let mut processed = tree.clone();
    for index in 1..processed.len() as i64 {
        let (parent_index, goal_p, transition_id, state_id, reverse_edge_p) = {
            let node = processed.node(index);
            let state = node.state();
            (
                node.parent_index(),
                state.goal_p(),
                state.transition_id(),
                state.state_id(),
                state.reverse_edge_p(),
            )
        };
        // States on a goal branch already carry their probability
        if goal_p > 0.0 {
            continue;
        }
        let parent_goal_p = processed.node(parent_index).state().goal_p();
        if parent_goal_p <= 0.0 {
            continue;
        }
        let result_of_goal_reaching_split = processed
            .node(parent_index)
            .child_indices()
            .iter()
            .any(|&other_index| {
                let other = processed.node(other_index).state();
                other.state_id() != state_id
                    && other.transition_id() == transition_id
                    && other.goal_p() > 0.0
            });
        if result_of_goal_reaching_split {
            processed
                .node_mut(index)
                .state_mut()
                .set_goal_p(-(parent_goal_p * reverse_edge_p));
        }
    }
    processed
}

/// Copy the productive subtree into a new, linkage-validated arena
pub fn prune_tree<C: Clone>(
    tree: &PlannerTree<C>,
    include_spur_actions: bool,
) -> PlannerResult<PlannerTree<C>> {
    if tree.len() <= 1 {
        return Ok(tree.clone());
    }
    tree.validate_linkage()?;

    let mut intermediate = tree.clone();
    for index in 0..intermediate.len() as i64 {
        let goal_p = intermediate.node(index).state().goal_p();
        let keep = goal_p > 0.0 || (goal_p < 0.0 && include_spur_actions);
        if !keep {
            let node = intermediate.node_mut(index);
            node.set_parent_index(-1);
            node.clear_child_indices();
        }
    }

    let mut pruned = PlannerTree::new();
    let mut root = intermediate.node(0).clone();
    root.set_parent_index(-1);
    root.clear_child_indices();
    pruned.push_node(root);

    // depth-first copy of surviving branches, explicit stack
    let mut stack: Vec<(i64, i64)> = intermediate
        .node(0)
        .child_indices()
        .iter()
        .rev()
        .map(|&child| (child, 0))
        .collect();
    while let Some((raw_index, pruned_parent)) = stack.pop() {
        let raw_node = intermediate.node(raw_index);
        if raw_node.parent_index() < 0 {
            continue;
        }
        let mut copy = raw_node.clone();
        copy.set_parent_index(pruned_parent);
        copy.clear_child_indices();
        let raw_children: Vec<i64> = raw_node.child_indices().to_vec();
        let new_index = pruned.push_node(copy);
        pruned.node_mut(pruned_parent).add_child_index(new_index);
        for &child in raw_children.iter().rev() {
            stack.push((child, new_index));
        }
    }

    pruned.validate_linkage()?;
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::BeliefState;
    use crate::common::RobotModel;
    use nalgebra::DVector;

    struct LineRobot;

    impl RobotModel<f64> for LineRobot {
        fn distance(&self, a: &f64, b: &f64) -> f64 {
            (a - b).abs()
        }

        fn dimension_distances(&self, a: &f64, b: &f64) -> DVector<f64> {
            DVector::from_vec(vec![(a - b).abs()])
        }

        fn interpolate(&self, a: &f64, b: &f64, fraction: f64) -> f64 {
            a + (b - a) * fraction
        }

        fn average(&self, configs: &[f64]) -> f64 {
            configs.iter().sum::<f64>() / configs.len() as f64
        }
    }

    fn split_state(
        state_id: u64,
        config: f64,
        transition_id: u64,
        reverse: (u32, u32),
        goal_p: f64,
    ) -> BeliefState<f64> {
        let mut state = BeliefState::from_propagation(
            state_id,
            vec![config],
            2,
            1,
            reverse.0,
            reverse.1,
            1.0,
            config,
            transition_id,
            transition_id + 100,
            1,
            true,
            &LineRobot,
            1.0,
        );
        state.set_goal_p(goal_p);
        state
    }

    /// root (goal 0.8) with a goal-reaching split child and a failed sibling
    fn goal_split_tree(reverse: (u32, u32)) -> PlannerTree<f64> {
        let mut tree = PlannerTree::new();
        let mut root = BeliefState::from_config(0.0);
        root.set_goal_p(0.8);
        tree.push_root(root).unwrap();
        tree.add_child(0, split_state(1, 1.0, 7, (1, 1), 1.0))
            .unwrap();
        tree.add_child(0, split_state(2, 5.0, 7, reverse, 0.0))
            .unwrap();
        tree
    }

    #[test]
    fn test_post_process_marks_reverse_reachable_sibling() {
        let tree = goal_split_tree((2, 1));
        let processed = post_process_tree(&tree);
        // -(parent_goal_p * reverse_edge_p) = -(0.8 * 0.5)
        assert!((processed.node(2).state().goal_p() + 0.4).abs() < 1e-12);
        // the goal child is untouched
        assert!((processed.node(1).state().goal_p() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_post_process_is_idempotent() {
        let tree = goal_split_tree((2, 1));
        let once = post_process_tree(&tree);
        let twice = post_process_tree(&once);
        for index in 0..once.len() as i64 {
            assert_eq!(
                once.node(index).state().goal_p(),
                twice.node(index).state().goal_p()
            );
        }
    }

    #[test]
    fn test_prune_keeps_spur_states_when_requested() {
        let processed = post_process_tree(&goal_split_tree((2, 1)));
        let with_spurs = prune_tree(&processed, true).unwrap();
        assert_eq!(with_spurs.len(), 3);
        let without_spurs = prune_tree(&processed, false).unwrap();
        assert_eq!(without_spurs.len(), 2);
        for tree in [&with_spurs, &without_spurs] {
            tree.validate_linkage().unwrap();
            for index in 1..tree.len() as i64 {
                assert!(tree.node(index).state().goal_p().abs() > 0.0);
            }
        }
    }

    #[test]
    fn test_prune_drops_irreversible_sibling_entirely() {
        // reverse probability 0 leaves the sibling's goal probability at
        // -0.0, which never survives pruning
        let processed = post_process_tree(&goal_split_tree((2, 0)));
        let pruned = prune_tree(&processed, true).unwrap();
        assert_eq!(pruned.len(), 2);
    }

    #[test]
    fn test_prune_is_idempotent() {
        let processed = post_process_tree(&goal_split_tree((2, 1)));
        let once = prune_tree(&processed, true).unwrap();
        let twice = prune_tree(&once, true).unwrap();
        assert_eq!(once.len(), twice.len());
        for index in 0..once.len() as i64 {
            assert_eq!(
                once.node(index).parent_index(),
                twice.node(index).parent_index()
            );
            assert_eq!(
                once.node(index).state().state_id(),
                twice.node(index).state().state_id()
            );
        }
    }

    #[test]
    fn test_prune_rebuilds_dense_indices() {
        // root -> kept -> kept, plus a dropped sibling in between
        let mut tree = PlannerTree::new();
        let mut root = BeliefState::from_config(0.0);
        root.set_goal_p(0.9);
        tree.push_root(root).unwrap();
        let kept = tree
            .add_child(0, split_state(1, 1.0, 1, (1, 1), 0.9))
            .unwrap();
        tree.add_child(kept, split_state(2, 2.0, 2, (1, 1), 0.9))
            .unwrap();
        tree.add_child(0, split_state(3, -1.0, 3, (1, 1), 0.0))
            .unwrap();
        let pruned = prune_tree(&tree, true).unwrap();
        assert_eq!(pruned.len(), 3);
        assert_eq!(pruned.node(1).parent_index(), 0);
        assert_eq!(pruned.node(2).parent_index(), 1);
    }
}
