//! Closed-loop policy execution
//!
//! One execution resets the mover, then repeatedly re-localizes the
//! current configuration against the policy, executes the returned
//! action, and checks the user goal. Success returns the number of steps
//! taken; failure (step/time limit, localization loss, or a stuck action)
//! returns the negated count.

use std::time::{Duration, Instant};

use crate::common::{
    ConfigSampler, OutcomeClustering, PlannerError, PlannerResult, RobotModel, SimulationResult,
    Simulator, Statistics, LOG_INFO, LOG_WARN,
};
use crate::planning::planner::BeliefPlanner;
use crate::policy::policy::ExecutionPolicy;

/// Moves the robot: `(current, action, expected_result, is_reverse,
/// is_reset)` to the trajectory actually driven
pub type MoveFn<'a, C> = dyn FnMut(&C, &C, &C, bool, bool) -> PlannerResult<Vec<C>> + 'a;

/// Run one closed-loop execution of a policy.
///
/// `termination_fn` is polled before every step; `clustering_fn` is the
/// runtime membership test used for re-localization. A localization loss
/// or an empty mover trajectory ends the attempt with a negative count; a
/// query repeating identically more than `action_attempt_count` times in
/// a row does the same.
#[allow(clippy::too_many_arguments)]
pub fn execute_policy<C: Clone>(
    policy: &ExecutionPolicy<C>,
    start: &C,
    allow_branch_jumping: bool,
    link_to_planned_parent: bool,
    action_attempt_count: u32,
    move_fn: &mut MoveFn<'_, C>,
    goal_check_fn: &dyn Fn(&C) -> bool,
    termination_fn: &mut dyn FnMut() -> bool,
    clustering_fn: &mut dyn FnMut(&[C], &C) -> bool,
) -> PlannerResult<(Vec<C>, i64)> {
    // reset the mover; the result is not part of the trajectory
    move_fn(start, start, start, false, true)?;

    let mut trajectory = vec![start.clone()];
    let mut current = start.clone();
    let mut desired_transition_id = 0u64;
    let mut steps: i64 = 0;
    let mut last_query: Option<(i64, u64)> = None;
    let mut repeat_count = 0u32;

    while !termination_fn() {
        steps += 1;
        let query = match policy.query_best_action(
            desired_transition_id,
            &current,
            allow_branch_jumping,
            link_to_planned_parent,
            clustering_fn,
        ) {
            Ok(query) => query,
            Err(PlannerError::ExternalFailure(message)) => {
                log::warn!("policy execution lost localization: {}", message);
                return Ok((trajectory, -steps));
            }
            Err(fatal) => return Err(fatal),
        };
        desired_transition_id = query.desired_transition_id;

        let signature = (query.previous_state_idx, desired_transition_id);
        if last_query == Some(signature) {
            repeat_count += 1;
            if repeat_count > action_attempt_count {
                log::warn!(
                    "policy action for state {} repeated {} times without progress",
                    query.previous_state_idx,
                    repeat_count
                );
                return Ok((trajectory, -steps));
            }
        } else {
            last_query = Some(signature);
            repeat_count = 1;
        }

        let moved = match move_fn(
            &current,
            &query.action,
            &query.expected_result,
            query.is_reverse,
            false,
        ) {
            Ok(moved) => moved,
            Err(PlannerError::ExternalFailure(message)) => {
                log::warn!("policy execution mover failed: {}", message);
                return Ok((trajectory, -steps));
            }
            Err(fatal) => return Err(fatal),
        };
        let result = match moved.last() {
            Some(result) => result.clone(),
            None => {
                log::warn!("policy execution mover returned an empty trajectory");
                return Ok((trajectory, -steps));
            }
        };
        trajectory.extend(moved);
        current = result;

        if goal_check_fn(&current) {
            return Ok((trajectory, steps));
        }
    }
    Ok((trajectory, -steps))
}

impl<C, RM, SAMP, SIM, CLU> BeliefPlanner<C, RM, SAMP, SIM, CLU>
where
    C: Clone + Sync,
    RM: RobotModel<C> + Sync,
    SAMP: ConfigSampler<C>,
    SIM: Simulator<C>,
    CLU: OutcomeClustering<C>,
{
    /// Execute a policy repeatedly inside the planner's own simulator,
    /// reporting per-execution step counts (negative = failed) and a
    /// `policy_success` statistic.
    #[allow(clippy::too_many_arguments)]
    pub fn simulate_policy_executions(
        &mut self,
        policy: &ExecutionPolicy<C>,
        start: &C,
        goal: &C,
        num_executions: u32,
        exec_step_limit: u32,
        allow_branch_jumping: bool,
        link_to_planned_parent: bool,
    ) -> PlannerResult<(Statistics, Vec<i64>)> {
        if num_executions == 0 {
            return Err(PlannerError::InvalidArgument(
                "num_executions must be positive".to_string(),
            ));
        }
        self.simulator.reset_statistics();
        let goal_distance_threshold = self.config.goal_distance_threshold;
        let action_attempt_count = self.config.policy_action_attempt_count;
        let debug_level = self.config.debug_level;
        let Self {
            robot,
            simulator,
            clustering,
            logging,
            ..
        } = self;
        let logging = &*logging;
        let emit = |message: &str, level: i32| {
            if level >= LOG_WARN || debug_level > 0 {
                (logging)(message, level);
            }
        };
        let goal_check =
            |config: &C| robot.distance(config, goal) <= goal_distance_threshold;
        let mut clustering_fn = |particles: &[C], config: &C| {
            let wrapped = [SimulationResult::new(
                config.clone(),
                config.clone(),
                false,
                false,
            )];
            clustering
                .identify_cluster_members(particles, &wrapped)
                .first()
                .copied()
                .unwrap_or(false)
        };
        let mut move_fn = |current: &C,
                           action: &C,
                           _expected: &C,
                           is_reverse: bool,
                           is_reset: bool|
         -> PlannerResult<Vec<C>> {
            if is_reset {
                return Ok(vec![current.clone()]);
            }
            let batch = [current.clone()];
            let results = if is_reverse {
                simulator.reverse_simulate(&batch, action, true)
            } else {
                simulator.forward_simulate(&batch, action, true)
            };
            if results.is_empty() {
                return Err(PlannerError::ExternalFailure(
                    "simulated policy step produced no trajectory".to_string(),
                ));
            }
            Ok(results.into_iter().map(|r| r.result_config).collect())
        };

        let mut step_counts = Vec::with_capacity(num_executions as usize);
        let mut reached_goal = 0u32;
        for execution in 0..num_executions {
            let mut exec_steps = 0u32;
            let mut termination = || {
                if exec_steps >= exec_step_limit {
                    true
                } else {
                    exec_steps += 1;
                    false
                }
            };
            let (_trajectory, steps) = execute_policy(
                policy,
                start,
                allow_branch_jumping,
                link_to_planned_parent,
                action_attempt_count,
                &mut move_fn,
                &goal_check,
                &mut termination,
                &mut clustering_fn,
            )?;
            if steps >= 0 {
                reached_goal += 1;
                emit(
                    &format!(
                        "Policy execution {} of {} reached the goal in {} steps",
                        execution + 1,
                        num_executions,
                        steps
                    ),
                    LOG_INFO,
                );
            } else {
                emit(
                    &format!(
                        "Policy execution {} of {} failed after {} steps",
                        execution + 1,
                        num_executions,
                        -steps
                    ),
                    LOG_WARN,
                );
            }
            step_counts.push(steps);
        }

        let mut statistics = Statistics::new();
        statistics.insert(
            "policy_success".into(),
            f64::from(reached_goal) / f64::from(num_executions),
        );
        statistics.extend(simulator.statistics());
        Ok((statistics, step_counts))
    }

    /// Execute a policy through an external mover (a real robot), bounded
    /// by wall-clock time per execution; zero means unbounded.
    #[allow(clippy::too_many_arguments)]
    pub fn execute_policy_runs(
        &mut self,
        policy: &ExecutionPolicy<C>,
        start: &C,
        goal_check_fn: &dyn Fn(&C) -> bool,
        move_fn: &mut MoveFn<'_, C>,
        num_executions: u32,
        exec_time_limit: Duration,
        allow_branch_jumping: bool,
        link_to_planned_parent: bool,
    ) -> PlannerResult<(Statistics, Vec<i64>)> {
        if num_executions == 0 {
            return Err(PlannerError::InvalidArgument(
                "num_executions must be positive".to_string(),
            ));
        }
        let action_attempt_count = self.config.policy_action_attempt_count;
        let debug_level = self.config.debug_level;
        let Self {
            clustering, logging, ..
        } = self;
        let logging = &*logging;
        let emit = |message: &str, level: i32| {
            if level >= LOG_WARN || debug_level > 0 {
                (logging)(message, level);
            }
        };
        let mut clustering_fn = |particles: &[C], config: &C| {
            let wrapped = [SimulationResult::new(
                config.clone(),
                config.clone(),
                false,
                false,
            )];
            clustering
                .identify_cluster_members(particles, &wrapped)
                .first()
                .copied()
                .unwrap_or(false)
        };

        let mut step_counts = Vec::with_capacity(num_executions as usize);
        let mut reached_goal = 0u32;
        for execution in 0..num_executions {
            let execution_start = Instant::now();
            let mut termination = || {
                !exec_time_limit.is_zero() && execution_start.elapsed() >= exec_time_limit
            };
            let (_trajectory, steps) = execute_policy(
                policy,
                start,
                allow_branch_jumping,
                link_to_planned_parent,
                action_attempt_count,
                move_fn,
                goal_check_fn,
                &mut termination,
                &mut clustering_fn,
            )?;
            if steps >= 0 {
                reached_goal += 1;
            }
            emit(
                &format!(
                    "Policy execution {} of {} finished with step count {} in {:.3}s",
                    execution + 1,
                    num_executions,
                    steps,
                    execution_start.elapsed().as_secs_f64()
                ),
                if steps >= 0 { LOG_INFO } else { LOG_WARN },
            );
            step_counts.push(steps);
        }

        let mut statistics = Statistics::new();
        statistics.insert(
            "policy_success".into(),
            f64::from(reached_goal) / f64::from(num_executions),
        );
        Ok((statistics, step_counts))
    }
}
