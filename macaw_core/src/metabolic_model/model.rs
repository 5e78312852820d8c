//! This module provides the Model struct for representing an entire metabolic model
use crate::metabolic_model::metabolite::Metabolite;
use crate::metabolic_model::reaction::Reaction;
use crate::metabolic_model::ModelError;
use crate::optimize::constraint::Constraint;
use crate::optimize::objective::ObjectiveSense;
use crate::optimize::problem::Problem;
use crate::optimize::{OptimizationStatus, ProblemSolution};

use indexmap::IndexMap;
use nalgebra_sparse::coo::CooMatrix;
use nalgebra_sparse::csr::CsrMatrix;

/// Represents a Genome Scale Metabolic Model
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Model {
    /// Map of reaction ids to Reactions
    pub reactions: IndexMap<String, Reaction>,
    /// Map of metabolite ids to Metabolites
    pub metabolites: IndexMap<String, Metabolite>,
    /// Map of reaction ids to objective function coefficients
    pub objective: IndexMap<String, f64>,
    /// Whether the objective is maximized or minimized
    pub objective_sense: ObjectiveSense,
    /// Additional linear constraints on reaction fluxes, keyed by constraint id
    pub constraints: IndexMap<String, FluxConstraint>,
    /// Id associated with the Model
    pub id: Option<String>,
    /// Compartments in the model
    ///
    /// An IndexMap<String, String> of {short name: long name}
    pub compartments: Option<IndexMap<String, String>>,
    /// A version identifier for the Model, stored as a string
    pub version: Option<String>,
}

/// One of the two nonnegative variables a reaction flux is split into
#[derive(Clone, Debug, PartialEq)]
pub enum FluxVariable {
    Forward(String),
    Reverse(String),
}

impl FluxVariable {
    pub fn reaction_id(&self) -> &str {
        match self {
            FluxVariable::Forward(id) | FluxVariable::Reverse(id) => id,
        }
    }
}

/// A linear constraint over forward and reverse flux variables,
/// `lower_bound <= sum(coefficient * variable) <= upper_bound`
#[derive(Clone, Debug, PartialEq)]
pub struct FluxConstraint {
    pub terms: Vec<(FluxVariable, f64)>,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl FluxConstraint {
    /// Constrain a weighted sum of net fluxes (forward minus reverse)
    pub fn on_net_flux(weights: &IndexMap<String, f64>, lower_bound: f64, upper_bound: f64) -> Self {
        let terms = weights
            .iter()
            .flat_map(|(id, coef)| {
                [
                    (FluxVariable::Forward(id.clone()), *coef),
                    (FluxVariable::Reverse(id.clone()), -*coef),
                ]
            })
            .collect();
        FluxConstraint {
            terms,
            lower_bound,
            upper_bound,
        }
    }
}

impl Model {
    pub fn new_empty() -> Self {
        Model::default()
    }

    // region Building
    /// Add a reaction to the model
    ///
    /// Metabolites used by the reaction which are not yet part of the model are added with
    /// only an id. A reaction with the same id replaces the old one.
    ///
    /// # Examples
    /// ```rust
    /// use macaw_core::metabolic_model::model::Model;
    /// use macaw_core::metabolic_model::reaction::ReactionBuilder;
    /// let mut model = Model::new_empty();
    /// let new_reaction = ReactionBuilder::default().id("new_reaction").build().unwrap();
    /// model.add_reaction(new_reaction);
    /// assert!(model.reactions.contains_key("new_reaction"));
    /// ```
    pub fn add_reaction(&mut self, reaction: Reaction) {
        for met in reaction.metabolites.keys() {
            if !self.metabolites.contains_key(met) {
                self.metabolites.insert(met.clone(), Metabolite::new(met));
            }
        }
        self.reactions.insert(reaction.id.clone(), reaction);
    }

    /// Add a metabolite to the model, replacing any metabolite with the same id
    pub fn add_metabolite(&mut self, metabolite: Metabolite) {
        self.metabolites.insert(metabolite.id.clone(), metabolite);
    }

    /// Remove reactions from the model
    ///
    /// Objective coefficients of the removed reactions are dropped, as are their terms in
    /// any additional constraints. Constraints left without terms are removed. Ids not in the
    /// model are ignored.
    pub fn remove_reactions(&mut self, ids: &[&str]) {
        for id in ids {
            self.reactions.shift_remove(*id);
            self.objective.shift_remove(*id);
        }
        for constraint in self.constraints.values_mut() {
            constraint
                .terms
                .retain(|(var, _)| !ids.contains(&var.reaction_id()));
        }
        self.constraints
            .retain(|_, constraint| !constraint.terms.is_empty());
    }

    /// Add a named flux constraint
    pub fn add_constraint(&mut self, id: &str, constraint: FluxConstraint) -> Result<(), ModelError> {
        if self.constraints.contains_key(id) {
            return Err(ModelError::ConstraintAlreadyExists(id.to_string()));
        }
        self.constraints.insert(id.to_string(), constraint);
        Ok(())
    }
    // endregion Building

    // region Lookup
    pub fn get_reaction(&self, id: &str) -> Result<&Reaction, ModelError> {
        self.reactions
            .get(id)
            .ok_or_else(|| ModelError::ReactionNotFound(id.to_string()))
    }

    pub fn get_reaction_mut(&mut self, id: &str) -> Result<&mut Reaction, ModelError> {
        self.reactions
            .get_mut(id)
            .ok_or_else(|| ModelError::ReactionNotFound(id.to_string()))
    }

    pub fn get_metabolite(&self, id: &str) -> Result<&Metabolite, ModelError> {
        self.metabolites
            .get(id)
            .ok_or_else(|| ModelError::MetaboliteNotFound(id.to_string()))
    }

    /// Ids of the reactions each metabolite participates in, in model order
    ///
    /// Every metabolite of the model gets an entry, even if it is in no reactions.
    pub fn metabolite_reactions(&self) -> IndexMap<String, Vec<String>> {
        let mut map: IndexMap<String, Vec<String>> = self
            .metabolites
            .keys()
            .map(|id| (id.clone(), Vec::new()))
            .collect();
        for rxn in self.reactions.values() {
            for met in rxn.metabolites.keys() {
                map.entry(met.clone()).or_default().push(rxn.id.clone());
            }
        }
        map
    }

    /// Reactions which include the metabolite `metabolite_id`
    pub fn reactions_of(&self, metabolite_id: &str) -> Vec<&Reaction> {
        self.reactions
            .values()
            .filter(|rxn| rxn.metabolites.contains_key(metabolite_id))
            .collect()
    }

    /// Exchange, sink, and demand reactions
    pub fn boundary_reactions(&self) -> Vec<&Reaction> {
        self.reactions.values().filter(|rxn| rxn.is_boundary()).collect()
    }
    // endregion Lookup

    // region Objective
    /// Does any reaction have a non-zero objective coefficient
    pub fn has_objective(&self) -> bool {
        self.objective.values().any(|coef| *coef != 0.)
    }

    pub fn clear_objective(&mut self) {
        self.objective.clear();
    }

    pub fn set_objective(&mut self, objective: IndexMap<String, f64>, sense: ObjectiveSense) {
        self.objective = objective;
        self.objective_sense = sense;
    }
    // endregion Objective

    // region Optimization
    /// Stoichiometric matrix, rows follow the metabolite order and columns the reaction order
    pub fn stoichiometric_matrix(&self) -> Result<CsrMatrix<f64>, ModelError> {
        let mut coo = CooMatrix::new(self.metabolites.len(), self.reactions.len());
        for (col, rxn) in self.reactions.values().enumerate() {
            for (met, coef) in &rxn.metabolites {
                let row = self
                    .metabolites
                    .get_index_of(met)
                    .ok_or_else(|| ModelError::MetaboliteNotFound(met.clone()))?;
                coo.push(row, col, *coef);
            }
        }
        Ok(CsrMatrix::from(&coo))
    }

    /// Build the linear problem for this model
    ///
    /// Every reaction is split into a forward and a reverse variable (forward at index
    /// `2 * i`, reverse at `2 * i + 1` for the i-th reaction). Each metabolite with at least
    /// one reaction gets a steady state constraint, and every additional flux constraint is
    /// carried over.
    pub fn to_problem(&self) -> Result<Problem, ModelError> {
        let construction = |err: crate::optimize::problem::ProblemError| {
            ModelError::ProblemConstruction(err.to_string())
        };
        let mut problem = Problem::new(self.objective_sense);
        for rxn in self.reactions.values() {
            if rxn.lower_bound > rxn.upper_bound || rxn.lower_bound.is_nan() || rxn.upper_bound.is_nan() {
                return Err(ModelError::InvalidBounds {
                    id: rxn.id.clone(),
                    lower: rxn.lower_bound,
                    upper: rxn.upper_bound,
                });
            }
            problem
                .add_new_variable(
                    &rxn.get_forward_id(),
                    rxn.get_forward_lower_bound(),
                    rxn.get_forward_upper_bound(),
                )
                .map_err(construction)?;
            problem
                .add_new_variable(
                    &rxn.get_reverse_id(),
                    rxn.get_reverse_lower_bound(),
                    rxn.get_reverse_upper_bound(),
                )
                .map_err(construction)?;
        }

        let stoichiometry = self.stoichiometric_matrix()?;
        for (met_id, row) in self.metabolites.keys().zip(stoichiometry.row_iter()) {
            if row.nnz() == 0 {
                continue;
            }
            let mut variables = Vec::with_capacity(2 * row.nnz());
            let mut coefficients = Vec::with_capacity(2 * row.nnz());
            for (col, coef) in row.col_indices().iter().zip(row.values()) {
                variables.push(2 * col);
                coefficients.push(*coef);
                variables.push(2 * col + 1);
                coefficients.push(-coef);
            }
            problem
                .add_constraint(met_id, Constraint::new_equality(&variables, &coefficients, 0.))
                .map_err(construction)?;
        }

        for (id, constraint) in &self.constraints {
            let mut variables = Vec::with_capacity(constraint.terms.len());
            let mut coefficients = Vec::with_capacity(constraint.terms.len());
            for (var, coef) in &constraint.terms {
                let index = self
                    .reactions
                    .get_index_of(var.reaction_id())
                    .ok_or_else(|| ModelError::ReactionNotFound(var.reaction_id().to_string()))?;
                variables.push(match var {
                    FluxVariable::Forward(_) => 2 * index,
                    FluxVariable::Reverse(_) => 2 * index + 1,
                });
                coefficients.push(*coef);
            }
            let new_constraint = if constraint.lower_bound == constraint.upper_bound {
                Constraint::new_equality(&variables, &coefficients, constraint.lower_bound)
            } else {
                Constraint::new_inequality(
                    &variables,
                    &coefficients,
                    constraint.lower_bound,
                    constraint.upper_bound,
                )
            };
            problem.add_constraint(id, new_constraint).map_err(construction)?;
        }

        for (rxn_id, coef) in &self.objective {
            let rxn = self.get_reaction(rxn_id)?;
            problem
                .add_new_linear_objective_term_by_id(&rxn.get_forward_id(), *coef)
                .map_err(construction)?;
            problem
                .add_new_linear_objective_term_by_id(&rxn.get_reverse_id(), -*coef)
                .map_err(construction)?;
        }
        Ok(problem)
    }

    /// Optimize the model objective
    pub fn optimize(&self) -> Result<ProblemSolution, ModelError> {
        Ok(self.to_problem()?.solve()?)
    }

    /// Optimize the model objective and only report its value
    ///
    /// # Returns
    /// The optimal value, an infinity with the sign of the objective sense when the problem is
    /// unbounded, and NaN for every other status
    pub fn slim_optimize(&self) -> Result<f64, ModelError> {
        let solution = self.optimize()?;
        Ok(match (solution.status, solution.objective_value) {
            (OptimizationStatus::Unbounded, _) => match self.objective_sense {
                ObjectiveSense::Maximize => f64::INFINITY,
                ObjectiveSense::Minimize => f64::NEG_INFINITY,
            },
            (_, Some(value)) if solution.is_optimal() => value,
            _ => f64::NAN,
        })
    }

    /// Net flux through each reaction in a solution of [`Model::to_problem`]
    pub fn fluxes(&self, solution: &ProblemSolution) -> Option<IndexMap<String, f64>> {
        let values = solution.variable_values.as_ref()?;
        Some(
            self.reactions
                .keys()
                .enumerate()
                .map(|(i, id)| (id.clone(), values[2 * i] - values[2 * i + 1]))
                .collect(),
        )
    }
    // endregion Optimization
}
