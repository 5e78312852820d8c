//! Solver backends for linear problems
//!
//! Backends receive the problem one piece at a time through the [`Solver`] trait, stage it,
//! and only assemble their native representation when [`Solver::solve`] is called.
pub mod clarabel;
#[cfg(feature = "minilp")]
pub mod microlp;

use crate::optimize::constraint::ConstraintTerm;
use crate::optimize::objective::ObjectiveSense;
use crate::optimize::ProblemSolution;
use cfg_if::cfg_if;
use indexmap::IndexMap;
use thiserror::Error;

/// Which backend solves linear problems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    /// Use the Clarabel interior point solver
    Clarabel,
    /// Use the pure rust microlp simplex solver, requires the minilp feature to be enabled
    MicroLp,
}

impl Default for SolverKind {
    fn default() -> Self {
        cfg_if! {
            if #[cfg(feature = "minilp")] {
                SolverKind::MicroLp
            } else {
                SolverKind::Clarabel
            }
        }
    }
}

/// Create an empty solver of the requested kind
///
/// Asking for microlp when the minilp feature is disabled falls back to Clarabel.
pub fn new_solver(kind: SolverKind) -> Box<dyn Solver> {
    match kind {
        SolverKind::Clarabel => Box::new(clarabel::ClarabelSolver::default()),
        SolverKind::MicroLp => {
            cfg_if! {
                if #[cfg(feature = "minilp")] {
                    Box::new(microlp::MicroLpSolver::default())
                } else {
                    tracing::warn!("microlp requested but the minilp feature is disabled, using Clarabel");
                    Box::new(clarabel::ClarabelSolver::default())
                }
            }
        }
    }
}

/// Interface every solver backend implements
pub trait Solver: Send {
    /// Access to the staged problem
    fn staged(&mut self) -> &mut StagedProblem;

    /// Solve the staged problem
    fn solve(&mut self) -> Result<ProblemSolution, SolverError>;

    fn add_continuous_variable(
        &mut self,
        id: &str,
        lower_bound: f64,
        upper_bound: f64,
    ) -> Result<(), SolverError> {
        if lower_bound.is_nan() || upper_bound.is_nan() {
            return Err(SolverError::InvalidBounds(id.to_string()));
        }
        self.staged().variables.push((lower_bound, upper_bound));
        self.staged().objective.push(0.);
        Ok(())
    }

    fn add_equality_constraint(
        &mut self,
        id: &str,
        terms: &[ConstraintTerm],
        equals: f64,
    ) -> Result<(), SolverError> {
        let row = self.staged().row_from_terms(id, terms)?;
        self.staged().equalities.push((row, equals));
        Ok(())
    }

    fn add_inequality_constraint(
        &mut self,
        id: &str,
        terms: &[ConstraintTerm],
        lower_bound: f64,
        upper_bound: f64,
    ) -> Result<(), SolverError> {
        let row = self.staged().row_from_terms(id, terms)?;
        self.staged()
            .inequalities
            .push((row, lower_bound, upper_bound));
        Ok(())
    }

    fn add_linear_objective_term(
        &mut self,
        variable: usize,
        coefficient: f64,
    ) -> Result<(), SolverError> {
        let staged = self.staged();
        match staged.objective.get_mut(variable) {
            Some(coef) => {
                *coef += coefficient;
                Ok(())
            }
            None => Err(SolverError::UnknownVariable(variable)),
        }
    }

    fn set_objective_sense(&mut self, sense: ObjectiveSense) {
        self.staged().sense = sense;
    }
}

/// A linear problem collected by a backend before it is solved
///
/// Rows are stored with each variable appearing at most once.
#[derive(Debug, Clone, Default)]
pub struct StagedProblem {
    /// (lower bound, upper bound) of every variable, by index
    pub variables: Vec<(f64, f64)>,
    /// (row, right hand side)
    pub equalities: Vec<(Vec<(usize, f64)>, f64)>,
    /// (row, lower bound, upper bound)
    pub inequalities: Vec<(Vec<(usize, f64)>, f64, f64)>,
    /// Objective coefficient of every variable, by index
    pub objective: Vec<f64>,
    pub sense: ObjectiveSense,
}

impl StagedProblem {
    fn row_from_terms(
        &self,
        id: &str,
        terms: &[ConstraintTerm],
    ) -> Result<Vec<(usize, f64)>, SolverError> {
        let mut row: IndexMap<usize, f64> = IndexMap::with_capacity(terms.len());
        for term in terms {
            if term.variable >= self.variables.len() {
                return Err(SolverError::UnknownVariableInConstraint(id.to_string()));
            }
            *row.entry(term.variable).or_insert(0.) += term.coefficient;
        }
        Ok(row.into_iter().filter(|(_, coef)| *coef != 0.).collect())
    }
}

/// Errors raised by solver backends
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Variable {0} has NaN bounds")]
    InvalidBounds(String),
    #[error("Objective refers to variable index {0}, which has not been added")]
    UnknownVariable(usize),
    #[error("Constraint {0} refers to a variable which has not been added")]
    UnknownVariableInConstraint(String),
    #[error("Solver could not be set up: {0}")]
    Setup(String),
    #[error("Solver failed: {0}")]
    Backend(String),
}
