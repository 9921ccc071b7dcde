//! The belief-space RRT planner
//!
//! Grows a tree of belief states by sampling targets, finding the nearest
//! eligible tree state, and propagating particle sets through the injected
//! stochastic simulator. Goal events trigger branch blacklisting and goal
//! probability back-propagation; planning ends on a wall-clock limit or
//! when the root's goal probability clears the termination threshold.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::belief::BeliefState;
use crate::common::{
    ConfigSampler, LoggingFn, OutcomeClustering, PlannerError, PlannerResult, RobotModel,
    Simulator, Statistics, LOG_DEBUG, LOG_INFO, LOG_TRACE, LOG_WARN,
};
use crate::planning::nearest_neighbor::nearest_neighbor;
use crate::planning::postprocess::{post_process_tree, prune_tree};
use crate::planning::tree::PlannerTree;
use crate::policy::ExecutionPolicy;

/// Tuning knobs for planning and policy extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Particles per propagated state; 0 lets the simulator decide by
    /// carrying whatever the parent holds
    pub num_particles: usize,
    /// Expansion step length in robot distance units
    pub step_size: f64,
    /// Probability of sampling a goal configuration instead of a free one
    pub goal_bias: f64,
    /// Distance under which a configuration counts as "at the goal"
    pub goal_distance_threshold: f64,
    /// Minimum start-to-goal probability for a state to count as a solution
    pub goal_probability_threshold: f64,
    /// Weight on motion feasibility in the NN distance, in [0, 1]
    pub feasibility_alpha: f64,
    /// Weight on belief variance in the NN distance, in [0, 1]
    pub variance_alpha: f64,
    /// Probability of continuing to use RRT-Connect once a solution exists
    pub connect_after_first_solution: f64,
    /// Retry attempts assumed per action when scoring split edges
    pub edge_attempt_count: u32,
    /// Consecutive identical policy queries tolerated during execution
    pub policy_action_attempt_count: u32,
    /// Whether contacting particles may join outcome clusters
    pub allow_contacts: bool,
    /// Whether reverse simulation is used to estimate reversibility
    pub include_reverse_actions: bool,
    /// Whether reverse-reachable spur states survive pruning
    pub include_spur_actions: bool,
    /// Wall-clock planning budget
    pub time_limit: Duration,
    /// Stop early once the root's goal probability reaches this; 0 disables
    pub p_goal_termination_threshold: f64,
    /// 0 silences everything below warnings
    pub debug_level: i32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            num_particles: 25,
            step_size: 1.0,
            goal_bias: 0.05,
            goal_distance_threshold: 0.1,
            goal_probability_threshold: 0.51,
            feasibility_alpha: 0.75,
            variance_alpha: 0.75,
            connect_after_first_solution: 0.5,
            edge_attempt_count: 10,
            policy_action_attempt_count: 10,
            allow_contacts: true,
            include_reverse_actions: true,
            include_spur_actions: true,
            time_limit: Duration::from_secs(60),
            p_goal_termination_threshold: 0.0,
            debug_level: 0,
        }
    }
}

/// What a call to one of the `plan_*` entry points produces
pub struct PlanOutcome<C> {
    /// The extracted policy, or `None` when the goal probability threshold
    /// was never reached
    pub policy: Option<ExecutionPolicy<C>>,
    pub statistics: Statistics,
}

/// How goal candidates are recognized during one plan
pub(crate) enum GoalMode<'a, C> {
    /// User-supplied probability over belief states
    Probability(&'a dyn Fn(&BeliefState<C>) -> f64),
    /// Fixed goal configuration; candidates must command exactly it
    FixedState(&'a C),
}

pub struct BeliefPlanner<C, RM, SAMP, SIM, CLU> {
    pub(crate) config: PlannerConfig,
    pub(crate) robot: RM,
    pub(crate) sampler: SAMP,
    pub(crate) simulator: SIM,
    pub(crate) clustering: CLU,
    pub(crate) logging: LoggingFn,
    pub(crate) tree: PlannerTree<C>,
    pub(crate) state_counter: u64,
    pub(crate) transition_counter: u64,
    pub(crate) split_counter: u64,
    pub(crate) particles_stored: u64,
    pub(crate) particles_simulated: u64,
    pub(crate) goal_candidates_evaluated: u64,
    pub(crate) total_goal_reached_probability: f64,
    pub(crate) time_to_first_solution: f64,
    pub(crate) elapsed_simulation_time: f64,
    pub(crate) elapsed_clustering_time: f64,
}

impl<C, RM, SAMP, SIM, CLU> BeliefPlanner<C, RM, SAMP, SIM, CLU>
where
    C: Clone + Sync,
    RM: RobotModel<C> + Sync,
    SAMP: ConfigSampler<C>,
    SIM: Simulator<C>,
    CLU: OutcomeClustering<C>,
{
    pub fn new(
        config: PlannerConfig,
        robot: RM,
        sampler: SAMP,
        simulator: SIM,
        clustering: CLU,
        logging: LoggingFn,
    ) -> Self {
        Self {
            config,
            robot,
            sampler,
            simulator,
            clustering,
            logging,
            tree: PlannerTree::new(),
            state_counter: 0,
            transition_counter: 0,
            split_counter: 0,
            particles_stored: 0,
            particles_simulated: 0,
            goal_candidates_evaluated: 0,
            total_goal_reached_probability: 0.0,
            time_to_first_solution: 0.0,
            elapsed_simulation_time: 0.0,
            elapsed_clustering_time: 0.0,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// The tree grown by the most recent plan
    pub fn tree(&self) -> &PlannerTree<C> {
        &self.tree
    }

    /// Goal probability of the root after the most recent plan
    pub fn total_goal_reached_probability(&self) -> f64 {
        self.total_goal_reached_probability
    }

    pub(crate) fn log(&self, message: &str, level: i32) {
        if level >= LOG_WARN || self.config.debug_level > 0 {
            (self.logging)(message, level);
        }
    }

    fn reset(&mut self) {
        self.tree = PlannerTree::new();
        self.state_counter = 0;
        self.transition_counter = 0;
        self.split_counter = 0;
        self.particles_stored = 0;
        self.particles_simulated = 0;
        self.goal_candidates_evaluated = 0;
        self.total_goal_reached_probability = 0.0;
        self.time_to_first_solution = 0.0;
        self.elapsed_simulation_time = 0.0;
        self.elapsed_clustering_time = 0.0;
    }

    /// Plan toward a goal region described by a probability function over
    /// belief states. Goal configurations come from the sampler.
    pub fn plan_goal_sampling<GF>(&mut self, start: &C, goal_fn: GF) -> PlannerResult<PlanOutcome<C>>
    where
        GF: Fn(&BeliefState<C>) -> f64,
    {
        self.plan_internal(start, GoalMode::Probability(&goal_fn))
    }

    /// Plan toward a fixed goal configuration; a state is a solution when
    /// enough of its particles land within `goal_distance_threshold`.
    pub fn plan_goal_state(&mut self, start: &C, goal: &C) -> PlannerResult<PlanOutcome<C>> {
        self.plan_internal(start, GoalMode::FixedState(goal))
    }

    fn plan_internal(&mut self, start: &C, mode: GoalMode<'_, C>) -> PlannerResult<PlanOutcome<C>> {
        let start_time = Instant::now();
        self.reset();
        self.simulator.reset_statistics();
        self.clustering.reset_statistics();
        self.tree.push_root(BeliefState::from_config(start.clone()))?;

        let mut total_samples = 0u64;
        let mut successful_samples = 0u64;
        let mut failed_samples = 0u64;
        let mut solutions_found = 0u64;

        while !self.termination_reached(start_time) {
            let target = self.sample_target(&mode);
            total_samples += 1;
            let nearest_index = nearest_neighbor(
                &self.tree,
                &target,
                &self.robot,
                self.config.step_size,
                self.config.feasibility_alpha,
                self.config.variance_alpha,
            );
            if nearest_index < 0 {
                failed_samples += 1;
                continue;
            }
            self.log(
                &format!("Selected node {} as nearest neighbor", nearest_index),
                LOG_TRACE,
            );
            let nearest = self.tree.node(nearest_index).state().clone();
            let propagated = match self.propagate_toward(&nearest, &target) {
                Ok(states) => states,
                Err(PlannerError::ExternalFailure(message)) => {
                    self.log(
                        &format!("Expansion abandoned: {}", message),
                        LOG_WARN,
                    );
                    failed_samples += 1;
                    continue;
                }
                Err(fatal) => return Err(fatal),
            };
            if propagated.is_empty() {
                failed_samples += 1;
                continue;
            }
            successful_samples += 1;

            let batch_base = self.tree.len() as i64;
            for (state, parent_offset) in propagated {
                let parent_index = if parent_offset < 0 {
                    nearest_index
                } else {
                    batch_base + parent_offset
                };
                let new_index = self.tree.add_child(parent_index, state)?;
                if self.evaluate_goal_candidate(new_index, &mode)? {
                    solutions_found += 1;
                    self.goal_reached_callback(new_index, start_time)?;
                }
            }
        }

        let planning_time = start_time.elapsed().as_secs_f64();
        self.log(
            &format!(
                "Planner terminated with goal reached probability {:.6}",
                self.total_goal_reached_probability
            ),
            LOG_INFO,
        );

        let mut statistics = Statistics::new();
        statistics.insert("p_goal_reached".into(), self.total_goal_reached_probability);
        statistics.insert("time_to_first_solution".into(), self.time_to_first_solution);
        statistics.insert("planning_time".into(), planning_time);
        statistics.insert("total_states".into(), self.tree.len() as f64);
        statistics.insert("total_samples".into(), total_samples as f64);
        statistics.insert("successful_samples".into(), successful_samples as f64);
        statistics.insert("failed_samples".into(), failed_samples as f64);
        statistics.insert("solutions_found".into(), solutions_found as f64);
        statistics.insert("particles_stored".into(), self.particles_stored as f64);
        statistics.insert("particles_simulated".into(), self.particles_simulated as f64);
        statistics.insert(
            "goal_candidates_evaluated".into(),
            self.goal_candidates_evaluated as f64,
        );
        statistics.insert(
            "elapsed_simulation_time".into(),
            self.elapsed_simulation_time,
        );
        statistics.insert(
            "elapsed_clustering_time".into(),
            self.elapsed_clustering_time,
        );
        statistics.extend(self.simulator.statistics());
        statistics.extend(self.clustering.statistics());

        if self.total_goal_reached_probability >= self.config.goal_probability_threshold {
            let virtual_goal = self.virtual_goal_config(&mode)?;
            let postprocessed = post_process_tree(&self.tree);
            let pruned = prune_tree(&postprocessed, self.config.include_spur_actions)?;
            self.log(
                &format!("Pruned planner tree to {} states", pruned.len()),
                LOG_DEBUG,
            );
            let policy = ExecutionPolicy::from_tree(
                &pruned,
                virtual_goal,
                self.config.goal_probability_threshold,
            )?;
            statistics.insert("extracted_policy_size".into(), policy.len() as f64);
            Ok(PlanOutcome {
                policy: Some(policy),
                statistics,
            })
        } else {
            statistics.insert("extracted_policy_size".into(), 0.0);
            Ok(PlanOutcome {
                policy: None,
                statistics,
            })
        }
    }

    fn termination_reached(&self, start_time: Instant) -> bool {
        if start_time.elapsed() >= self.config.time_limit {
            self.log("Terminating, reached time limit", LOG_TRACE);
            return true;
        }
        if self.config.p_goal_termination_threshold > 0.0 {
            let gap =
                self.config.p_goal_termination_threshold - self.total_goal_reached_probability;
            if gap <= 1e-10 {
                self.log("Terminating, reached p_goal_termination_threshold", LOG_TRACE);
                return true;
            }
        }
        false
    }

    fn sample_target(&mut self, mode: &GoalMode<'_, C>) -> BeliefState<C> {
        let draw: f64 = self.simulator.rng().gen();
        let config = if draw > self.config.goal_bias {
            self.log("Sampled free state", LOG_TRACE);
            self.sampler.sample(self.simulator.rng())
        } else {
            self.log("Sampled goal state", LOG_TRACE);
            match mode {
                GoalMode::Probability(_) => self.sampler.sample_goal(self.simulator.rng()),
                GoalMode::FixedState(goal) => (**goal).clone(),
            }
        };
        BeliefState::from_config(config)
    }

    /// Check a freshly appended state against the goal; on success mark it
    /// and report true so the caller can run the goal callback.
    fn evaluate_goal_candidate(
        &mut self,
        index: i64,
        mode: &GoalMode<'_, C>,
    ) -> PlannerResult<bool> {
        let (goal_probability, motion_p) = {
            let state = self.tree.node(index).state();
            match mode {
                GoalMode::Probability(goal_fn) => (goal_fn(state), state.motion_p()),
                GoalMode::FixedState(goal) => {
                    if self.robot.distance(state.command(), goal) > 0.0 {
                        return Ok(false);
                    }
                    (
                        self.goal_reached_probability(state, goal),
                        state.motion_p(),
                    )
                }
            }
        };
        if goal_probability <= 0.0 {
            return Ok(false);
        }
        self.goal_candidates_evaluated += 1;
        let start_to_goal_probability = goal_probability * motion_p;
        if start_to_goal_probability < self.config.goal_probability_threshold {
            return Ok(false);
        }
        let state = self.tree.node_mut(index).state_mut();
        state.set_goal_p(goal_probability);
        let summary = state.summary();
        self.log(
            &format!(
                "Goal reached with {} and probability(start->goal) {:.6}",
                summary, start_to_goal_probability
            ),
            LOG_INFO,
        );
        Ok(true)
    }

    /// Fraction of a state's particles within the goal distance threshold
    fn goal_reached_probability(&self, state: &BeliefState<C>, goal: &C) -> f64 {
        match state.particles() {
            Some(particles) if !particles.is_empty() => {
                let within = particles
                    .iter()
                    .filter(|p| self.robot.distance(p, goal) < self.config.goal_distance_threshold)
                    .count();
                within as f64 / particles.len() as f64
            }
            _ => {
                if self.robot.distance(state.expectation(), goal)
                    < self.config.goal_distance_threshold
                {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// A collision-free configuration anchoring the policy's virtual goal
    fn virtual_goal_config(&mut self, mode: &GoalMode<'_, C>) -> PlannerResult<C> {
        match mode {
            GoalMode::FixedState(goal) => Ok((**goal).clone()),
            GoalMode::Probability(_) => {
                for _ in 0..1000 {
                    let candidate = self.sampler.sample_goal(self.simulator.rng());
                    if !self.simulator.check_collision(&candidate) {
                        return Ok(candidate);
                    }
                }
                Err(PlannerError::ExternalFailure(
                    "goal sampler produced no collision-free configuration".to_string(),
                ))
            }
        }
    }
}
