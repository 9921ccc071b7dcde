//! Feasibility- and variance-weighted nearest-neighbor search
//!
//! The distance between an existing tree state and a sampled target is the
//! robot-space expectation distance, normalized by step size and scaled by
//! two weights derived from the existing state: one grows as the state's
//! motion feasibility drops, the other as its belief variance grows. The
//! alpha parameters in [0, 1] control how strongly each weight biases the
//! search.
//!
//! The scan itself is a rayon parallel reduction over the whole tree,
//! skipping states whose `use_for_nn` bit has been blacklisted. Ties break
//! toward the earliest-inserted node.

use ordered_float::NotNan;
use rayon::prelude::*;

use crate::belief::BeliefState;
use crate::common::RobotModel;
use crate::planning::tree::PlannerTree;

/// Weighted state-to-state distance for NN queries
pub fn state_distance<C: Clone, RM: RobotModel<C>>(
    robot: &RM,
    from: &BeliefState<C>,
    to: &BeliefState<C>,
    step_size: f64,
    feasibility_alpha: f64,
    variance_alpha: f64,
) -> f64 {
    let expectation_distance =
        robot.distance(from.expectation(), to.expectation()) / step_size;
    let feasibility_weight =
        (1.0 - from.motion_p()) * feasibility_alpha + (1.0 - feasibility_alpha);
    let variance_weight =
        erf(from.variance_scalar()) * variance_alpha + (1.0 - variance_alpha);
    feasibility_weight * expectation_distance * variance_weight
}

/// Index of the closest NN-eligible tree node, or -1 if none is eligible
pub fn nearest_neighbor<C, RM>(
    tree: &PlannerTree<C>,
    target: &BeliefState<C>,
    robot: &RM,
    step_size: f64,
    feasibility_alpha: f64,
    variance_alpha: f64,
) -> i64
where
    C: Sync + Clone,
    RM: RobotModel<C> + Sync,
{
    let infinity = NotNan::new(f64::INFINITY).unwrap();
    tree.nodes()
        .par_iter()
        .enumerate()
        .filter(|(_, node)| node.state().use_for_nn())
        .map(|(index, node)| {
            let distance = state_distance(
                robot,
                node.state(),
                target,
                step_size,
                feasibility_alpha,
                variance_alpha,
            );
            (NotNan::new(distance).unwrap_or(infinity), index)
        })
        .min()
        .map(|(_, index)| index as i64)
        .unwrap_or(-1)
}

/// Error function approximation (Horner's method)
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn line_tree(values: &[f64]) -> PlannerTree<f64> {
        let mut tree = PlannerTree::new();
        tree.push_root(BeliefState::from_config(values[0])).unwrap();
        for &v in &values[1..] {
            tree.add_child(0, BeliefState::from_config(v)).unwrap();
        }
        tree
    }

    #[test]
    fn test_selects_closest_node() {
        let tree = line_tree(&[0.0, 2.0, 5.0]);
        let target = BeliefState::from_config(4.5);
        let idx = nearest_neighbor(&tree, &target, &LineRobot, 1.0, 0.0, 0.0);
        assert_eq!(idx, 2);
    }

    #[test]
    fn test_skips_blacklisted_nodes() {
        let mut tree = line_tree(&[0.0, 2.0, 5.0]);
        tree.node_mut(2).state_mut().disable_for_nn();
        let target = BeliefState::from_config(4.5);
        let idx = nearest_neighbor(&tree, &target, &LineRobot, 1.0, 0.0, 0.0);
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_all_blacklisted_returns_negative_one() {
        let mut tree = line_tree(&[0.0, 2.0]);
        tree.node_mut(0).state_mut().disable_for_nn();
        tree.node_mut(1).state_mut().disable_for_nn();
        let target = BeliefState::from_config(1.0);
        assert_eq!(nearest_neighbor(&tree, &target, &LineRobot, 1.0, 0.0, 0.0), -1);
    }

    #[test]
    fn test_tie_breaks_to_earliest_index() {
        let tree = line_tree(&[0.0, 2.0, 2.0]);
        let target = BeliefState::from_config(2.0);
        let idx = nearest_neighbor(&tree, &target, &LineRobot, 1.0, 0.0, 0.0);
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_feasibility_weight_penalizes_infeasible_states() {
        let robot = LineRobot;
        let target = BeliefState::from_config(1.0);
        let feasible = BeliefState::from_config(0.0);
        let mut infeasible = BeliefState::from_config(0.0);
        infeasible.set_effective_edge_p(0.2);

        let d_feasible = state_distance(&robot, &feasible, &target, 1.0, 0.5, 0.0);
        let d_infeasible = state_distance(&robot, &infeasible, &target, 1.0, 0.5, 0.0);
        assert!(d_infeasible > d_feasible);
    }

    #[test]
    fn test_erf_limits() {
        assert!(erf(0.0).abs() < 1e-7);
        assert!((erf(3.0) - 1.0).abs() < 1e-4);
        assert!((erf(-3.0) + 1.0).abs() < 1e-4);
    }
}
