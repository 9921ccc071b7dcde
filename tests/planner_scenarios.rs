//! End-to-end planning scenarios on the 1-D line world

mod common;

use std::time::Duration;

use belief_rrt::common::null_logging_fn;
use belief_rrt::planning::nearest_neighbor::nearest_neighbor;
use belief_rrt::{BeliefPlanner, BeliefState, PlannerConfig};

use common::{DeterministicLineSimulator, GapClustering, LineRobot, LineSampler, NoisyLineSimulator};

fn line_config() -> PlannerConfig {
    PlannerConfig {
        num_particles: 1,
        step_size: 1.0,
        goal_bias: 1.0,
        goal_distance_threshold: 0.1,
        goal_probability_threshold: 0.9,
        feasibility_alpha: 0.0,
        variance_alpha: 0.0,
        time_limit: Duration::from_secs(10),
        p_goal_termination_threshold: 1.0,
        ..PlannerConfig::default()
    }
}

fn deterministic_planner(
    config: PlannerConfig,
) -> BeliefPlanner<f64, LineRobot, LineSampler, DeterministicLineSimulator, GapClustering> {
    BeliefPlanner::new(
        config,
        LineRobot,
        LineSampler {
            min: -2.0,
            max: 8.0,
            goal: 5.0,
        },
        DeterministicLineSimulator::new(7),
        GapClustering { threshold: 0.5 },
        null_logging_fn(),
    )
}

#[test]
fn straight_line_plan_reaches_goal_with_certainty() {
    let mut planner = deterministic_planner(line_config());
    let outcome = planner.plan_goal_state(&0.0, &5.0).unwrap();

    assert_eq!(outcome.statistics["p_goal_reached"], 1.0);
    assert_eq!(outcome.statistics["total_states"], 6.0);
    assert!(outcome.statistics["time_to_first_solution"] > 0.0);
    assert_eq!(outcome.statistics["extracted_policy_size"], 6.0);

    let policy = outcome.policy.expect("threshold was reached");
    assert_eq!(policy.len(), 6);
    // the policy walks the chain toward the detected goal leaf
    for index in 0..5 {
        assert_eq!(policy.next_hop(index), index + 1);
    }
    assert_eq!(policy.next_hop(5), policy.virtual_goal_index() as i64);

    // motion feasibility stays a product of certain edges
    let tree = planner.tree();
    for index in 1..tree.len() as i64 {
        let node = tree.node(index);
        let parent = tree.node(node.parent_index());
        let expected = parent.state().motion_p() * node.state().effective_edge_p();
        assert!((node.state().motion_p() - expected).abs() < 1e-12);
    }
}

#[test]
fn goal_branch_is_blacklisted_after_first_solution() {
    let mut planner = deterministic_planner(line_config());
    planner.plan_goal_state(&0.0, &5.0).unwrap();

    let tree = planner.tree();
    assert!(tree.node(0).state().use_for_nn());
    for index in 1..tree.len() as i64 {
        assert!(
            !tree.node(index).state().use_for_nn(),
            "node {} should be blacklisted",
            index
        );
    }
    // a sample right on top of the solved branch must fall back to the root
    let target = BeliefState::from_config(4.9);
    let nearest = nearest_neighbor(tree, &target, &LineRobot, 1.0, 0.0, 0.0);
    assert_eq!(nearest, 0);
}

#[test]
fn zero_time_limit_returns_empty_policy() {
    let config = PlannerConfig {
        time_limit: Duration::ZERO,
        p_goal_termination_threshold: 0.0,
        ..line_config()
    };
    let mut planner = deterministic_planner(config);
    let outcome = planner.plan_goal_state(&0.0, &5.0).unwrap();

    assert!(outcome.policy.is_none());
    assert_eq!(outcome.statistics["p_goal_reached"], 0.0);
    assert_eq!(outcome.statistics["extracted_policy_size"], 0.0);
    assert_eq!(outcome.statistics["total_samples"], 0.0);
    // only the root was ever created
    assert_eq!(outcome.statistics["total_states"], 1.0);
}

#[test]
fn simulator_statistics_are_merged_into_the_report() {
    let mut planner = deterministic_planner(line_config());
    let outcome = planner.plan_goal_state(&0.0, &5.0).unwrap();
    assert!(outcome.statistics["forward_simulations"] >= 5.0);
    assert!(outcome.statistics["particles_simulated"] >= 5.0);
    assert!(outcome.statistics["particles_stored"] >= 5.0);
}

#[test]
fn noisy_line_still_finds_a_confident_policy() {
    let config = PlannerConfig {
        num_particles: 5,
        goal_distance_threshold: 0.5,
        goal_probability_threshold: 0.51,
        p_goal_termination_threshold: 0.95,
        ..line_config()
    };
    let mut planner = BeliefPlanner::new(
        config,
        LineRobot,
        LineSampler {
            min: -2.0,
            max: 8.0,
            goal: 5.0,
        },
        NoisyLineSimulator::new(11, 0.01),
        GapClustering { threshold: 0.5 },
        null_logging_fn(),
    );
    let outcome = planner.plan_goal_state(&0.0, &5.0).unwrap();
    assert!(outcome.statistics["p_goal_reached"] >= 0.95);
    let policy = outcome.policy.expect("noise is far below the cluster gap");
    assert!(policy.len() >= 6);
}
