//! Module providing the Model struct for representing a metabolic model.

pub mod metabolite;
pub mod model;
pub mod reaction;

use crate::optimize::solvers::SolverError;
use thiserror::Error;

/// Errors when looking things up in, or changing, a [`model::Model`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("No reaction with id {0} in the model")]
    ReactionNotFound(String),
    #[error("No metabolite with id {0} in the model")]
    MetaboliteNotFound(String),
    #[error("A constraint with id {0} already exists in the model")]
    ConstraintAlreadyExists(String),
    #[error("Reaction {id} has invalid bounds: lower bound {lower} is above upper bound {upper}")]
    InvalidBounds { id: String, lower: f64, upper: f64 },
    #[error("Failed to build the optimization problem: {0}")]
    ProblemConstruction(String),
    #[error(transparent)]
    Solver(#[from] SolverError),
}
