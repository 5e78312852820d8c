//! Global defaults used when creating reactions and analysis options
use crate::optimize::solvers::SolverKind;
use std::sync::{LazyLock, RwLock};

/// Crate wide configuration, read whenever a builder falls back to a default value
pub static CONFIGURATION: LazyLock<RwLock<Configuration>> =
    LazyLock::new(|| RwLock::new(Configuration::default()));

#[derive(Clone, Debug)]
pub struct Configuration {
    /// Default lower bound for new reactions
    pub lower_bound: f64,
    /// Default upper bound for new reactions
    pub upper_bound: f64,
    /// Tolerance used when comparing solver output
    pub tolerance: f64,
    /// Absolute values below this are reported as exactly zero flux
    pub zero_threshold: f64,
    /// Solver used for every linear program
    pub solver: SolverKind,
    /// Default number of worker threads
    pub processes: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            lower_bound: -1000.,
            upper_bound: 1000.,
            tolerance: 1e-07,
            zero_threshold: 1e-08,
            solver: SolverKind::default(),
            processes: 1,
        }
    }
}

/// Get a snapshot of the current configuration
///
/// A poisoned lock still holds a valid configuration, so it is read anyway.
pub fn current() -> Configuration {
    match CONFIGURATION.read() {
        Ok(config) => config.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Replace the solver used for every new problem
pub fn set_solver(solver: SolverKind) {
    match CONFIGURATION.write() {
        Ok(mut config) => config.solver = solver,
        Err(poisoned) => poisoned.into_inner().solver = solver,
    }
}

/// Replace the default number of worker threads
pub fn set_processes(processes: usize) {
    let processes = processes.max(1);
    match CONFIGURATION.write() {
        Ok(mut config) => config.processes = processes,
        Err(poisoned) => poisoned.into_inner().processes = processes,
    }
}
