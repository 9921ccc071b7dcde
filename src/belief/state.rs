//! Belief state: a discrete posterior over configurations
//!
//! A [`BeliefState`] is one node's worth of knowledge in the planner: the
//! particle set approximating where the robot might be, the control command
//! that produced it, and the edge/goal probability bookkeeping attached to
//! the incoming action.
//!
//! Probabilities are stored as `(attempted, reached)` particle counts where
//! they originate from counting, and as scalars where they are derived.
//! The motion feasibility of a state is represented as
//! `parent_motion_p * effective_edge_p`, so the product invariant over a
//! tree path holds exactly even after retry arithmetic rewrites the
//! effective edge probability.
//!
//! `goal_p` is signed: positive values are the probability of reaching the
//! goal by continuing forward from this state; negative values mean the
//! goal is reachable only by first reversing onto a goal branch, with
//! magnitude equal to that route's probability.

use nalgebra::DVector;
use rand::{Rng, RngCore};

use crate::common::RobotModel;

#[derive(Debug, Clone)]
pub struct BeliefState<C> {
    state_id: u64,
    command: C,
    expectation: C,
    particles: Option<Vec<C>>,
    attempt_count: u32,
    reached_count: u32,
    effective_edge_p: f64,
    reverse_attempt_count: u32,
    reverse_reached_count: u32,
    parent_motion_p: f64,
    goal_p: f64,
    variance: f64,
    space_independent_variances: DVector<f64>,
    transition_id: u64,
    reverse_transition_id: u64,
    split_id: u64,
    action_independent: bool,
    use_for_nn: bool,
}

impl<C: Clone> BeliefState<C> {
    /// State holding a single bare configuration: tree roots and sampled
    /// expansion targets. Edge probabilities default to certainty.
    pub fn from_config(config: C) -> Self {
        Self {
            state_id: 0,
            command: config.clone(),
            expectation: config,
            particles: None,
            attempt_count: 1,
            reached_count: 1,
            effective_edge_p: 1.0,
            reverse_attempt_count: 1,
            reverse_reached_count: 1,
            parent_motion_p: 1.0,
            goal_p: 0.0,
            variance: 0.0,
            space_independent_variances: DVector::zeros(0),
            transition_id: 0,
            reverse_transition_id: 0,
            split_id: 0,
            action_independent: true,
            use_for_nn: true,
        }
    }

    /// State built from one propagated outcome cluster.
    ///
    /// `effective_edge_p` starts at the raw quotient `reached / attempted`;
    /// split siblings have it rewritten afterwards by the retry arithmetic.
    #[allow(clippy::too_many_arguments)]
    pub fn from_propagation<RM: RobotModel<C>>(
        state_id: u64,
        particles: Vec<C>,
        attempt_count: u32,
        reached_count: u32,
        reverse_attempt_count: u32,
        reverse_reached_count: u32,
        parent_motion_p: f64,
        command: C,
        transition_id: u64,
        reverse_transition_id: u64,
        split_id: u64,
        action_independent: bool,
        robot: &RM,
        step_size: f64,
    ) -> Self {
        let expectation = robot.average(&particles);
        let raw_edge_p = reached_count as f64 / attempt_count as f64;
        let mut state = Self {
            state_id,
            command,
            expectation,
            particles: Some(particles),
            attempt_count,
            reached_count,
            effective_edge_p: raw_edge_p,
            reverse_attempt_count,
            reverse_reached_count,
            parent_motion_p,
            goal_p: 0.0,
            variance: 0.0,
            space_independent_variances: DVector::zeros(0),
            transition_id,
            reverse_transition_id,
            split_id,
            action_independent,
            use_for_nn: true,
        };
        state.update_statistics(robot, step_size);
        state
    }

    pub fn state_id(&self) -> u64 {
        self.state_id
    }

    pub fn command(&self) -> &C {
        &self.command
    }

    pub fn expectation(&self) -> &C {
        &self.expectation
    }

    pub fn particles(&self) -> Option<&[C]> {
        self.particles.as_deref()
    }

    pub fn has_particles(&self) -> bool {
        self.particles.as_ref().map_or(false, |p| !p.is_empty())
    }

    pub fn num_particles(&self) -> usize {
        self.particles.as_ref().map_or(0, |p| p.len())
    }

    /// Fraction of attempted particles that reached this state's cluster
    pub fn raw_edge_p(&self) -> f64 {
        if self.attempt_count == 0 {
            0.0
        } else {
            self.reached_count as f64 / self.attempt_count as f64
        }
    }

    /// Probability of eventually landing in this state under retries
    pub fn effective_edge_p(&self) -> f64 {
        self.effective_edge_p
    }

    pub fn set_effective_edge_p(&mut self, p: f64) {
        self.effective_edge_p = p;
    }

    /// Fraction of particles that returned to the parent cluster when the
    /// incoming action was reversed
    pub fn reverse_edge_p(&self) -> f64 {
        if self.reverse_attempt_count == 0 {
            0.0
        } else {
            self.reverse_reached_count as f64 / self.reverse_attempt_count as f64
        }
    }

    pub fn set_reverse_counts(&mut self, attempted: u32, reached: u32) {
        self.reverse_attempt_count = attempted;
        self.reverse_reached_count = reached;
    }

    /// Probability of motion feasibility from the root to this state
    pub fn motion_p(&self) -> f64 {
        self.parent_motion_p * self.effective_edge_p
    }

    /// Signed goal probability; see the module docs for the encoding
    pub fn goal_p(&self) -> f64 {
        self.goal_p
    }

    pub fn set_goal_p(&mut self, p: f64) {
        self.goal_p = p;
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }

    pub fn space_independent_variances(&self) -> &DVector<f64> {
        &self.space_independent_variances
    }

    /// L1 norm of the per-dimension space-independent variances
    pub fn variance_scalar(&self) -> f64 {
        self.space_independent_variances.lp_norm(1)
    }

    pub fn transition_id(&self) -> u64 {
        self.transition_id
    }

    pub fn reverse_transition_id(&self) -> u64 {
        self.reverse_transition_id
    }

    pub fn split_id(&self) -> u64 {
        self.split_id
    }

    pub fn is_action_independent(&self) -> bool {
        self.action_independent
    }

    pub fn use_for_nn(&self) -> bool {
        self.use_for_nn
    }

    pub fn disable_for_nn(&mut self) {
        self.use_for_nn = false;
    }

    /// Recompute expectation and variances from the particle set
    pub fn update_statistics<RM: RobotModel<C>>(&mut self, robot: &RM, step_size: f64) {
        let particles = match &self.particles {
            Some(p) if !p.is_empty() => p,
            _ => return,
        };
        let expectation = robot.average(particles);
        let n = particles.len() as f64;

        let mut variance = 0.0;
        let mut dimension_variances: Option<DVector<f64>> = None;
        for particle in particles {
            let distance = robot.distance(particle, &expectation);
            variance += distance * distance / n;
            let scaled = robot.dimension_distances(particle, &expectation) / step_size;
            let squared = scaled.component_mul(&scaled) / n;
            dimension_variances = Some(match dimension_variances {
                Some(acc) => acc + squared,
                None => squared,
            });
        }

        self.expectation = expectation;
        self.variance = variance;
        self.space_independent_variances =
            dimension_variances.unwrap_or_else(|| DVector::zeros(0));
    }

    /// The stored particle set, or `count` copies of the expectation for
    /// states that carry none
    pub fn collect_particles(&self, count: usize) -> Vec<C> {
        match &self.particles {
            Some(p) if !p.is_empty() => p.clone(),
            _ => vec![self.expectation.clone(); count],
        }
    }

    /// Uniform resampling with replacement up to `count` particles
    pub fn resample_particles(&self, count: usize, rng: &mut dyn RngCore) -> Vec<C> {
        let source = match &self.particles {
            Some(p) if !p.is_empty() => p.clone(),
            _ => return vec![self.expectation.clone(); count],
        };
        (0..count)
            .map(|_| source[rng.gen_range(0..source.len())].clone())
            .collect()
    }

    /// Compact description for logging
    pub fn summary(&self) -> String {
        format!(
            "state {} (transition {}, split {}): raw {:.4}, effective {:.4}, reverse {:.4}, motion {:.4}, goal {:.4}",
            self.state_id,
            self.transition_id,
            self.split_id,
            self.raw_edge_p(),
            self.effective_edge_p,
            self.reverse_edge_p(),
            self.motion_p(),
            self.goal_p
        )
    }
}
