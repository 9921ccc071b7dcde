//! Common value types used throughout belief_rrt

use std::collections::BTreeMap;

/// Outcome of simulating a single particle toward a target.
///
/// `actual_target` is the control input the simulator actually applied,
/// which may differ from the requested target when the simulator projects
/// or truncates commands.
#[derive(Debug, Clone)]
pub struct SimulationResult<C> {
    /// Configuration the particle ended at
    pub result_config: C,
    /// Control target the simulator actually used
    pub actual_target: C,
    /// Whether the particle touched the environment during the motion
    pub did_contact: bool,
    /// Whether repeating the action would redraw this outcome independently
    pub outcome_independent: bool,
}

impl<C> SimulationResult<C> {
    pub fn new(result_config: C, actual_target: C, did_contact: bool, outcome_independent: bool) -> Self {
        Self {
            result_config,
            actual_target,
            did_contact,
            outcome_independent,
        }
    }
}

/// Named scalar statistics reported by the planner and its collaborators.
/// BTreeMap keeps reporting order deterministic.
pub type Statistics = BTreeMap<String, f64>;

/// Logging levels accepted by [`LoggingFn`]
pub const LOG_TRACE: i32 = 0;
pub const LOG_DEBUG: i32 = 1;
pub const LOG_INFO: i32 = 2;
pub const LOG_WARN: i32 = 3;

/// Injected logging sink: message plus level (0 = trace .. 3 = warn)
pub type LoggingFn = Box<dyn Fn(&str, i32)>;

/// A logging sink that drops everything
pub fn null_logging_fn() -> LoggingFn {
    Box::new(|_, _| {})
}

/// A logging sink that forwards to the `log` facade at the matching level
pub fn log_crate_logging_fn() -> LoggingFn {
    Box::new(|msg, level| match level {
        LOG_TRACE => log::trace!("{}", msg),
        LOG_DEBUG => log::debug!("{}", msg),
        LOG_INFO => log::info!("{}", msg),
        _ => log::warn!("{}", msg),
    })
}
