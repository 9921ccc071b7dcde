//! Outcome propagation: simulate, cluster, and score new belief states
//!
//! One expansion pushes the nearest state's particle set through the
//! stochastic simulator toward a target, partitions the outcomes into
//! clusters, and turns each non-empty cluster into a child state. Clusters
//! born of a split (or containing contact outcomes) get their reversibility
//! measured by simulating the action backwards; split siblings then have
//! their effective edge probabilities folded through the retry arithmetic.

use std::time::Instant;

use rand::Rng;

use crate::belief::BeliefState;
use crate::common::{
    ConfigSampler, OutcomeClustering, PlannerError, PlannerResult, RobotModel, SimulationResult,
    Simulator, LOG_DEBUG, LOG_TRACE,
};
use crate::planning::planner::BeliefPlanner;
use crate::planning::retry::{effective_edge_probabilities, SiblingOutcome};

impl<C, RM, SAMP, SIM, CLU> BeliefPlanner<C, RM, SAMP, SIM, CLU>
where
    C: Clone + Sync,
    RM: RobotModel<C> + Sync,
    SAMP: ConfigSampler<C>,
    SIM: Simulator<C>,
    CLU: OutcomeClustering<C>,
{
    /// Expand from `nearest` toward `target`, returning new states paired
    /// with their local parent offset: -1 means the tree parent is
    /// `nearest`, k >= 0 means entry k of this same batch.
    pub(crate) fn propagate_toward(
        &mut self,
        nearest: &BeliefState<C>,
        target: &BeliefState<C>,
    ) -> PlannerResult<Vec<(BeliefState<C>, i64)>> {
        let solution_found =
            self.total_goal_reached_probability >= self.config.goal_probability_threshold;
        let use_extend = if solution_found {
            let draw: f64 = self.simulator.rng().gen();
            draw >= self.config.connect_after_first_solution
        } else {
            false
        };
        if use_extend {
            self.extend_toward(nearest, target)
        } else {
            self.connect_toward(nearest, target)
        }
    }

    /// RRT-Extend: one interpolated step toward the target
    fn extend_toward(
        &mut self,
        nearest: &BeliefState<C>,
        target: &BeliefState<C>,
    ) -> PlannerResult<Vec<(BeliefState<C>, i64)>> {
        let mut target_point = target.expectation().clone();
        let target_distance = self.robot.distance(nearest.expectation(), &target_point);
        if target_distance > self.config.step_size {
            let step_fraction = self.config.step_size / target_distance;
            target_point =
                self.robot
                    .interpolate(nearest.expectation(), &target_point, step_fraction);
            self.log(
                &format!(
                    "Forward simulating one step of fraction {:.4} toward target {:.4} away",
                    step_fraction, target_distance
                ),
                LOG_TRACE,
            );
        }
        let states = self.forward_simulate_states(nearest, &target_point)?;
        Ok(states.into_iter().map(|state| (state, -1)).collect())
    }

    /// RRT-Connect: keep stepping while every step yields exactly one
    /// outcome cluster; stop on a split, a dead end, or the target.
    fn connect_toward(
        &mut self,
        nearest: &BeliefState<C>,
        target: &BeliefState<C>,
    ) -> PlannerResult<Vec<(BeliefState<C>, i64)>> {
        let target_point = target.expectation().clone();
        let total_steps = ((self.robot.distance(nearest.expectation(), &target_point)
            / self.config.step_size)
            .ceil() as u32)
            .max(1);
        let mut propagated: Vec<(BeliefState<C>, i64)> = Vec::new();
        let mut parent_offset: i64 = -1;
        let mut current = nearest.clone();
        let mut steps = 0;
        let mut completed = false;
        while !completed && steps < total_steps {
            let mut current_target = target_point.clone();
            let target_distance = self.robot.distance(current.expectation(), &current_target);
            if target_distance > self.config.step_size {
                let step_fraction = self.config.step_size / target_distance;
                current_target =
                    self.robot
                        .interpolate(current.expectation(), &target_point, step_fraction);
            } else {
                completed = true;
            }
            let mut step_states = self.forward_simulate_states(nearest, &current_target)?;
            match step_states.len() {
                0 => completed = true,
                1 => {
                    let state = step_states.swap_remove(0);
                    current = state.clone();
                    propagated.push((state, parent_offset));
                    parent_offset += 1;
                    steps += 1;
                }
                _ => {
                    for state in step_states {
                        propagated.push((state, parent_offset));
                    }
                    completed = true;
                }
            }
        }
        Ok(propagated)
    }

    /// Simulate one action for every particle of `nearest` and build a
    /// child state per outcome cluster.
    pub(crate) fn forward_simulate_states(
        &mut self,
        nearest: &BeliefState<C>,
        target_config: &C,
    ) -> PlannerResult<Vec<BeliefState<C>>> {
        self.transition_counter += 1;
        let forward_transition_id = self.transition_counter;

        let (initial_particles, results) =
            self.simulate_particles(nearest, target_config, self.config.allow_contacts, false);
        if results.is_empty() {
            return Ok(Vec::new());
        }
        let clusters = self.cluster_outcomes(&initial_particles, &results)?;
        let is_split = clusters.len() > 1;
        if is_split {
            self.split_counter += 1;
        }
        let split_id = if is_split { self.split_counter } else { 0 };
        // Every outcome of one action shares the control the simulator
        // actually applied
        let control_target = results[0].actual_target.clone();
        let attempt_count = results.len() as u32;

        let mut states = Vec::new();
        for cluster in &clusters {
            if cluster.is_empty() {
                continue;
            }
            self.state_counter += 1;
            let reached_count = cluster.len() as u32;
            let did_contact = cluster.iter().any(|r| r.did_contact);
            let action_independent = cluster.iter().all(|r| r.outcome_independent);
            let particle_locations: Vec<C> =
                cluster.iter().map(|r| r.result_config.clone()).collect();
            self.particles_stored += particle_locations.len() as u64;
            // An untouched single-outcome motion is trivially reversible;
            // contact in a multi-particle batch or any split defers the
            // estimate to the reverse simulation below
            let (reverse_attempted, reverse_reached) =
                if (did_contact && results.len() > 1) || is_split {
                    (reached_count, 0)
                } else {
                    (reached_count, reached_count)
                };
            self.transition_counter += 1;
            let reverse_transition_id = self.transition_counter;
            states.push(BeliefState::from_propagation(
                self.state_counter,
                particle_locations,
                attempt_count,
                reached_count,
                reverse_attempted,
                reverse_reached,
                nearest.motion_p(),
                control_target.clone(),
                forward_transition_id,
                reverse_transition_id,
                split_id,
                action_independent,
                &self.robot,
                self.config.step_size,
            ));
        }

        let mut computed_reversibility = 0u32;
        for state in states.iter_mut() {
            if self.config.include_reverse_actions {
                if state.reverse_edge_p() < 1.0 {
                    let (attempted, reached) =
                        self.compute_reverse_edge_probability(nearest, state);
                    state.set_reverse_counts(attempted, reached);
                    computed_reversibility += 1;
                }
            } else {
                state.set_reverse_counts(state.num_particles() as u32, 0);
            }
        }
        self.log(
            &format!(
                "Forward simulation produced {} states, computed reversibility for {}",
                states.len(),
                computed_reversibility
            ),
            LOG_DEBUG,
        );

        if states.len() > 1 {
            let siblings: Vec<SiblingOutcome> = states
                .iter()
                .map(|state| SiblingOutcome {
                    raw_edge_p: state.raw_edge_p(),
                    effective_edge_p: state.effective_edge_p(),
                    reverse_edge_p: state.reverse_edge_p(),
                    goal_p: 0.0,
                    independent: state.is_action_independent(),
                })
                .collect();
            let effective =
                effective_edge_probabilities(&siblings, self.config.edge_attempt_count)?;
            for (state, p) in states.iter_mut().zip(effective) {
                state.set_effective_edge_p(p);
                self.log(
                    &format!(
                        "Effective edge probability {:.6} over {} attempts for {}",
                        p,
                        self.config.edge_attempt_count,
                        state.summary()
                    ),
                    LOG_TRACE,
                );
            }
        }
        Ok(states)
    }

    /// Source particles from `source` and push them through the simulator
    pub(crate) fn simulate_particles(
        &mut self,
        source: &BeliefState<C>,
        target: &C,
        allow_contacts: bool,
        reverse: bool,
    ) -> (Vec<C>, Vec<SimulationResult<C>>) {
        let initial_particles = if source.num_particles() == self.config.num_particles {
            source.collect_particles(self.config.num_particles)
        } else if self.config.num_particles == 0 {
            source.collect_particles(source.num_particles())
        } else {
            source.resample_particles(self.config.num_particles, self.simulator.rng())
        };
        let simulation_start = Instant::now();
        let results = if reverse {
            self.simulator
                .reverse_simulate(&initial_particles, target, allow_contacts)
        } else {
            self.simulator
                .forward_simulate(&initial_particles, target, allow_contacts)
        };
        self.elapsed_simulation_time += simulation_start.elapsed().as_secs_f64();
        self.particles_simulated += results.len() as u64;
        (initial_particles, results)
    }

    /// Convert the collaborator's index partition into result clusters,
    /// dropping contact outcomes unless contacts are allowed
    pub(crate) fn cluster_outcomes(
        &mut self,
        parent_particles: &[C],
        results: &[SimulationResult<C>],
    ) -> PlannerResult<Vec<Vec<SimulationResult<C>>>> {
        if results.is_empty() {
            return Ok(Vec::new());
        }
        if results.len() == 1 {
            return Ok(vec![results.to_vec()]);
        }
        let clustering_start = Instant::now();
        let index_clusters = self
            .clustering
            .cluster_particles(parent_particles, results);
        let mut covered = vec![false; results.len()];
        let mut clusters = Vec::with_capacity(index_clusters.len());
        for index_cluster in &index_clusters {
            let mut cluster = Vec::with_capacity(index_cluster.len());
            for &result_index in index_cluster {
                if result_index >= results.len() || covered[result_index] {
                    return Err(PlannerError::ExternalFailure(format!(
                        "clustering produced a malformed partition (index {})",
                        result_index
                    )));
                }
                covered[result_index] = true;
                let result = &results[result_index];
                if !result.did_contact || self.config.allow_contacts {
                    cluster.push(result.clone());
                }
            }
            clusters.push(cluster);
        }
        if covered.iter().any(|&c| !c) {
            return Err(PlannerError::ExternalFailure(
                "clustering did not cover every result".to_string(),
            ));
        }
        self.elapsed_clustering_time += clustering_start.elapsed().as_secs_f64();
        Ok(clusters)
    }

    /// Simulate the child's particles back toward the parent and count how
    /// many rejoin the parent's cluster
    pub(crate) fn compute_reverse_edge_probability(
        &mut self,
        parent: &BeliefState<C>,
        child: &BeliefState<C>,
    ) -> (u32, u32) {
        let (_, reverse_results) =
            self.simulate_particles(child, parent.expectation(), true, true);
        let membership = match parent.particles() {
            Some(particles) if !particles.is_empty() => self
                .clustering
                .identify_cluster_members(particles, &reverse_results),
            _ => {
                let parent_cluster = vec![parent.expectation().clone()];
                self.clustering
                    .identify_cluster_members(&parent_cluster, &reverse_results)
            }
        };
        let reached = membership.iter().filter(|&&m| m).count() as u32;
        (membership.len() as u32, reached)
    }
}
