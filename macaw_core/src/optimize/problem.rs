//! Provides struct representing an optimization problem
use crate::configuration;
use crate::optimize::constraint::{Constraint, ConstraintTerm};
use crate::optimize::objective::{Objective, ObjectiveSense};
use crate::optimize::solvers::{new_solver, Solver, SolverError, SolverKind};
use crate::optimize::variable::Variable;
use crate::optimize::ProblemSolution;
use indexmap::IndexMap;
use thiserror::Error;

/// A linear optimization problem
///
/// The problem only stores its definition; every call to [`Problem::solve`] hands the
/// definition to a fresh solver backend, so a single problem can be shared between threads
/// and solved with different objectives concurrently.
#[derive(Debug, Clone)]
pub struct Problem {
    /// Objective to optimize
    objective: Objective,
    /// Variables of the optimization problem
    variables: IndexMap<String, Variable>,
    /// Constraints of the optimization problem
    constraints: IndexMap<String, Constraint>,
    /// Backend used to solve the problem
    solver: SolverKind,
}

impl Problem {
    // region Creation Functions
    /// Create a new optimization problem, solved by the configured default solver
    pub fn new(objective_sense: ObjectiveSense) -> Self {
        Self {
            objective: Objective::new(objective_sense),
            variables: IndexMap::new(),
            constraints: IndexMap::new(),
            solver: configuration::current().solver,
        }
    }

    /// Create a new maximization problem
    pub fn new_maximization() -> Self {
        Self::new(ObjectiveSense::Maximize)
    }

    /// Create a new minimization problem
    pub fn new_minimization() -> Self {
        Self::new(ObjectiveSense::Minimize)
    }

    // endregion Creation Functions

    // region Accessors
    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// Index of the variable with id `variable_id`
    pub fn variable_index(&self, variable_id: &str) -> Option<usize> {
        self.variables.get_index_of(variable_id)
    }

    pub fn variable(&self, variable_id: &str) -> Option<&Variable> {
        self.variables.get(variable_id)
    }

    pub fn constraint(&self, constraint_id: &str) -> Option<&Constraint> {
        self.constraints.get(constraint_id)
    }
    // endregion Accessors

    // region Update Objective
    /// Update the objective sense of the problem
    pub fn update_objective_sense(&mut self, sense: ObjectiveSense) {
        self.objective.set_sense(sense);
    }

    /// Add a linear term to the objective
    pub fn add_new_linear_objective_term_by_id(
        &mut self,
        variable_id: &str,
        coefficient: f64,
    ) -> Result<(), ProblemError> {
        let index = self
            .variable_index(variable_id)
            .ok_or_else(|| ProblemError::NonExistentVariablesInObjective(variable_id.to_string()))?;
        self.objective.add_term(index, coefficient);
        Ok(())
    }

    // endregion Update Objective

    // region Adding Variables
    /// Add a variable to the optimization problem
    pub fn add_variable(&mut self, mut variable: Variable) -> Result<(), ProblemError> {
        if self.variables.contains_key(&variable.id) {
            return Err(ProblemError::VariableIdAlreadyExists(variable.id));
        }
        if variable.lower_bound > variable.upper_bound {
            return Err(ProblemError::InvalidVariableBounds(variable.id));
        }
        variable.index = self.variables.len();
        self.variables.insert(variable.id.clone(), variable);
        Ok(())
    }

    /// Create a new variable and add it to the optimization problem
    pub fn add_new_variable(
        &mut self,
        id: &str,
        lower_bound: f64,
        upper_bound: f64,
    ) -> Result<(), ProblemError> {
        self.add_variable(Variable {
            id: id.to_string(),
            lower_bound,
            upper_bound,
            index: 0,
        })
    }

    // endregion Adding Variables

    // region Adding Constraints
    /// Add a constraint to the problem
    pub fn add_constraint(&mut self, id: &str, constraint: Constraint) -> Result<(), ProblemError> {
        if self.constraints.contains_key(id) {
            return Err(ProblemError::ConstraintAlreadyExists(id.to_string()));
        }
        let (lower, upper) = constraint.bounds();
        if lower > upper {
            return Err(ProblemError::InvalidConstraintBounds(id.to_string()));
        }
        if constraint
            .terms()
            .iter()
            .any(|term| term.variable >= self.variables.len())
        {
            return Err(ProblemError::NonExistentVariablesInConstraint(id.to_string()));
        }
        self.constraints.insert(id.to_string(), constraint);
        Ok(())
    }

    /// Add an equality constraint, with variables given by their ids
    pub fn add_new_equality_constraint_by_id(
        &mut self,
        id: &str,
        variables: &[&str],
        coefficients: &[f64],
        equals: f64,
    ) -> Result<(), ProblemError> {
        let indices = self.indices_for(id, variables)?;
        self.add_constraint(id, Constraint::new_equality(&indices, coefficients, equals))
    }

    /// Add an inequality constraint, with variables given by their ids
    pub fn add_new_inequality_constraint_by_id(
        &mut self,
        id: &str,
        variables: &[&str],
        coefficients: &[f64],
        lower_bound: f64,
        upper_bound: f64,
    ) -> Result<(), ProblemError> {
        let indices = self.indices_for(id, variables)?;
        self.add_constraint(
            id,
            Constraint::new_inequality(&indices, coefficients, lower_bound, upper_bound),
        )
    }

    fn indices_for(&self, constraint_id: &str, variables: &[&str]) -> Result<Vec<usize>, ProblemError> {
        variables
            .iter()
            .map(|var| {
                self.variable_index(var).ok_or_else(|| {
                    ProblemError::NonExistentVariablesInConstraint(constraint_id.to_string())
                })
            })
            .collect()
    }
    // endregion Adding Constraints

    // region Solving
    /// Solve the problem with its own objective
    pub fn solve(&self) -> Result<ProblemSolution, SolverError> {
        self.solve_with_objective(&self.objective)
    }

    /// Solve the problem with a different objective, leaving the stored objective alone
    pub fn solve_with_objective(&self, objective: &Objective) -> Result<ProblemSolution, SolverError> {
        let mut solver = new_solver(self.solver);
        self.load_into(solver.as_mut(), objective)?;
        solver.solve()
    }

    fn load_into(&self, solver: &mut dyn Solver, objective: &Objective) -> Result<(), SolverError> {
        for variable in self.variables.values() {
            solver.add_continuous_variable(&variable.id, variable.lower_bound, variable.upper_bound)?;
        }
        for (id, constraint) in &self.constraints {
            match constraint {
                Constraint::Equality { terms, equals } => {
                    solver.add_equality_constraint(id, terms, *equals)?
                }
                Constraint::Inequality {
                    terms,
                    lower_bound,
                    upper_bound,
                } => solver.add_inequality_constraint(id, terms, *lower_bound, *upper_bound)?,
            }
        }
        for term in &objective.terms {
            solver.add_linear_objective_term(term.variable, term.coefficient)?;
        }
        solver.set_objective_sense(objective.sense);
        Ok(())
    }

    /// Value of the variable `variable_id` in a solution of this problem
    pub fn variable_value(&self, solution: &ProblemSolution, variable_id: &str) -> Option<f64> {
        let index = self.variable_index(variable_id)?;
        solution.variable_values.as_ref()?.get(index).copied()
    }
    // endregion Solving
}

/// Errors associated with building an optimization problem
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProblemError {
    /// Error when trying to add a variable with the same id as an existing variable
    #[error("Tried to add variable {0}, but a variable with that id already exists")]
    VariableIdAlreadyExists(String),
    /// Error when trying to add variable with invalid bounds
    #[error("Tried to give variable {0} a lower_bound > upper_bound")]
    InvalidVariableBounds(String),
    /// Error when trying to add a constraint with the same id as an existing constraint
    #[error("Tried to add constraint {0}, but a constraint with that id already exists")]
    ConstraintAlreadyExists(String),
    /// Error when trying to add a constraint with invalid bounds
    #[error("Tried to add constraint {0} with lower_bound > upper_bound")]
    InvalidConstraintBounds(String),
    /// Error when trying to add a constraint that contains variables not in the model
    #[error("Constraint {0} uses variables not in the problem")]
    NonExistentVariablesInConstraint(String),
    /// Error when trying to add an objective term which includes variables not in the model
    #[error("Tried adding an objective term with variable {0}, which is not in the problem")]
    NonExistentVariablesInObjective(String),
}
