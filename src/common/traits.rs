//! Capability traits defining the planner's view of the world
//!
//! The planner core never touches robot kinematics, collision checking,
//! physics, or clustering heuristics directly. Each of those lives behind
//! one of the traits below and is supplied by the caller.

use nalgebra::DVector;
use rand::RngCore;

use crate::common::types::{SimulationResult, Statistics};

/// Distance and interpolation over an opaque configuration type.
pub trait RobotModel<C> {
    /// Configuration-space distance, nonnegative
    fn distance(&self, a: &C, b: &C) -> f64;

    /// Per-dimension distances between two configurations, used for the
    /// space-independent variance of a particle set
    fn dimension_distances(&self, a: &C, b: &C) -> DVector<f64>;

    /// Interpolate from `a` toward `b`; `fraction` in [0, 1]
    fn interpolate(&self, a: &C, b: &C, fraction: f64) -> C;

    /// Mean configuration of a non-empty set
    fn average(&self, configs: &[C]) -> C;
}

/// Sources of target configurations for tree expansion.
///
/// Both samplers must return collision-free configurations; `sample_goal`
/// retries internally until it has one.
pub trait ConfigSampler<C> {
    fn sample(&mut self, rng: &mut dyn RngCore) -> C;
    fn sample_goal(&mut self, rng: &mut dyn RngCore) -> C;
}

/// The stochastic forward/reverse simulator.
///
/// The simulator owns the RNG so that the ordering of random draws is
/// deterministic for a fixed call sequence; the planner and samplers draw
/// through [`Simulator::rng`].
pub trait Simulator<C> {
    /// Propagate every particle toward `target`, one result per particle
    fn forward_simulate(
        &mut self,
        particles: &[C],
        target: &C,
        allow_contacts: bool,
    ) -> Vec<SimulationResult<C>>;

    /// Propagate every particle backwards toward `target` by undoing the
    /// last action
    fn reverse_simulate(
        &mut self,
        particles: &[C],
        target: &C,
        allow_contacts: bool,
    ) -> Vec<SimulationResult<C>>;

    /// Whether a configuration is in collision
    fn check_collision(&self, config: &C) -> bool;

    fn reset_statistics(&mut self);

    fn statistics(&self) -> Statistics;

    fn rng(&mut self) -> &mut dyn RngCore;
}

/// Partitions simulation outcomes into distinct result clusters.
pub trait OutcomeClustering<C> {
    /// Partition `results` into outcome groups; the returned index lists
    /// must cover every result exactly once
    fn cluster_particles(
        &mut self,
        parent_particles: &[C],
        results: &[SimulationResult<C>],
    ) -> Vec<Vec<usize>>;

    /// For each result, whether it belongs to the cluster described by
    /// `parent_particles`
    fn identify_cluster_members(
        &mut self,
        parent_particles: &[C],
        results: &[SimulationResult<C>],
    ) -> Vec<bool>;

    fn reset_statistics(&mut self);

    fn statistics(&self) -> Statistics;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnitLineRobot;

    impl RobotModel<f64> for UnitLineRobot {
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

    #[test]
    fn test_robot_model_trait() {
        let robot = UnitLineRobot;
        assert!((robot.distance(&0.0, &3.0) - 3.0).abs() < 1e-12);
        assert!((robot.interpolate(&0.0, &4.0, 0.25) - 1.0).abs() < 1e-12);
        assert!((robot.average(&[1.0, 2.0, 3.0]) - 2.0).abs() < 1e-12);
        assert_eq!(robot.dimension_distances(&0.0, &2.0).len(), 1);
    }
}
