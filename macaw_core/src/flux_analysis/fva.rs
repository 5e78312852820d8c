//! Flux variability analysis
//!
//! Finds the minimum and maximum flux through each target while the model objective stays at
//! (a fraction of) its optimum. Targets are either reaction ids or linear combinations of
//! reaction ids written like `"R1+R2"` or `"R1+-R2"`, where a leading `-` negates a term.
use std::time::Duration;

use crate::configuration;
use crate::metabolic_model::model::{FluxConstraint, FluxVariable, Model};
use crate::metabolic_model::ModelError;
use crate::optimize::objective::{Objective, ObjectiveSense};
use crate::optimize::problem::Problem;
use crate::optimize::solvers::SolverError;
use crate::optimize::OptimizationStatus;
use crate::parallel::{PoolError, RetryPolicy, TaskPool};
use crate::utils::snap_to_zero;
use derive_builder::Builder;
use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Id of the constraint holding the objective at its optimum
pub const OBJECTIVE_CONSTRAINT_ID: &str = "fva_old_objective_constraint";
/// Id of the constraint capping the total flux when a pFBA factor is given
pub const FLUX_SUM_CONSTRAINT_ID: &str = "fva_flux_sum_constraint";

/// Options for [`flux_variability_analysis`]
#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(default, setter(into))]
pub struct FvaOptions {
    /// Targets to analyze, None for every reaction in the model
    pub reaction_list: Option<Vec<String>>,
    /// Fraction of the optimal objective value the objective must reach
    pub fraction_of_optimum: f64,
    /// When set, the total flux is capped at this multiple of its minimum
    pub pfba_factor: Option<f64>,
    /// Timeout of a single linear program, grows with each retry
    pub timeout: Duration,
    /// Number of attempts before a target is reported as NaN
    pub max_attempts: usize,
    /// Number of worker threads
    pub threads: usize,
    /// Values with a smaller magnitude are reported as 0
    pub zero_threshold: f64,
}

impl Default for FvaOptions {
    fn default() -> Self {
        let config = configuration::current();
        FvaOptions {
            reaction_list: None,
            fraction_of_optimum: 1.0,
            pfba_factor: None,
            timeout: Duration::from_secs(300),
            max_attempts: 3,
            threads: config.processes,
            zero_threshold: config.zero_threshold,
        }
    }
}

/// Minimum and maximum flux through a target
///
/// NaN marks a bound which could not be determined (solver failure or every attempt timed
/// out), infinities mark unbounded directions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FluxRange {
    pub minimum: f64,
    pub maximum: f64,
}

impl FluxRange {
    /// Both bounds are exactly zero
    pub fn is_zero(&self) -> bool {
        self.minimum == 0. && self.maximum == 0.
    }

    /// Either bound could not be determined
    pub fn has_nan(&self) -> bool {
        self.minimum.is_nan() || self.maximum.is_nan()
    }
}

/// Result of flux variability analysis, keyed by target in request order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FvaResult {
    pub ranges: IndexMap<String, FluxRange>,
}

impl FvaResult {
    pub fn get(&self, target: &str) -> Option<&FluxRange> {
        self.ranges.get(target)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FluxRange)> {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FvaError {
    #[error("FVA target {target} refers to reaction {reaction}, which is not in the model")]
    UnknownTarget { target: String, reaction: String },
    #[error("Unable to optimize the model objective before FVA, status was {0:?}")]
    ObjectiveNotOptimal(OptimizationStatus),
    #[error("Unable to minimize the total flux for the pFBA constraint, status was {0:?}")]
    FluxSumNotOptimal(OptimizationStatus),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error("No flux range could be determined for any of the {targets} FVA targets, the model is probably infeasible")]
    AllTargetsUndetermined { targets: usize },
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// A weighted sum of reaction fluxes, with reactions referenced by their model index
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct LinearTarget {
    pub(crate) terms: Vec<(usize, f64)>,
}

impl LinearTarget {
    /// Parse a target like `"R1+-R2"` against the reactions of `model`
    ///
    /// A reaction named more than once keeps the sign of its last occurrence, with weight 1.
    pub(crate) fn parse(target: &str, model: &Model) -> Result<Self, FvaError> {
        let mut weights: IndexMap<usize, f64> = IndexMap::new();
        for part in target.split('+') {
            let (sign, id) = match part.strip_prefix('-') {
                Some(rest) => (-1., rest.trim_start_matches('-')),
                None => (1., part),
            };
            let index = model
                .reactions
                .get_index_of(id)
                .ok_or_else(|| FvaError::UnknownTarget {
                    target: target.to_string(),
                    reaction: id.to_string(),
                })?;
            weights.insert(index, sign);
        }
        Ok(LinearTarget {
            terms: weights.into_iter().collect(),
        })
    }

    /// Objective over the split flux variables of a problem built by [`Model::to_problem`]
    pub(crate) fn objective(&self, sense: ObjectiveSense) -> Objective {
        let mut objective = Objective::new(sense);
        for (index, coef) in &self.terms {
            objective.add_term(2 * index, *coef);
            objective.add_term(2 * index + 1, -coef);
        }
        objective
    }

    /// Optimize the target, mapping the solver status onto a flux value
    ///
    /// Unbounded targets give +/- infinity, any other non optimal status gives NaN.
    pub(crate) fn optimize(&self, problem: &Problem, sense: ObjectiveSense) -> Result<f64, SolverError> {
        let solution = problem.solve_with_objective(&self.objective(sense))?;
        Ok(match solution.status {
            OptimizationStatus::Optimal | OptimizationStatus::AlmostOptimal => {
                solution.objective_value.unwrap_or(f64::NAN)
            }
            OptimizationStatus::Unbounded => match sense {
                ObjectiveSense::Maximize => f64::INFINITY,
                ObjectiveSense::Minimize => f64::NEG_INFINITY,
            },
            _ => f64::NAN,
        })
    }

    /// Minimize then maximize the target in the calling thread
    pub(crate) fn range(&self, problem: &Problem, zero_threshold: f64) -> Result<FluxRange, SolverError> {
        let minimum = self.optimize(problem, ObjectiveSense::Minimize)?;
        let maximum = self.optimize(problem, ObjectiveSense::Maximize)?;
        Ok(FluxRange {
            minimum: snap_to_zero(minimum, zero_threshold),
            maximum: snap_to_zero(maximum, zero_threshold),
        })
    }
}

/// Shared state for FVA workers
struct FvaContext {
    problem: Problem,
    targets: Vec<LinearTarget>,
}

/// Hold the objective of `model` at `fraction` of its optimum and drop the objective
///
/// # Returns
/// The optimal objective value
pub(crate) fn fix_objective_floor(model: &mut Model, fraction: f64) -> Result<f64, FvaError> {
    let solution = model.optimize()?;
    let optimum = match (solution.is_optimal(), solution.objective_value) {
        (true, Some(value)) => value,
        _ => return Err(FvaError::ObjectiveNotOptimal(solution.status)),
    };
    // Loosened by the tolerance so solver round off cannot make the problem infeasible
    let tolerance = configuration::current().tolerance;
    let value = optimum * fraction;
    let (lower, upper) = match model.objective_sense {
        ObjectiveSense::Maximize => (value - tolerance, f64::INFINITY),
        ObjectiveSense::Minimize => (f64::NEG_INFINITY, value + tolerance),
    };
    let constraint = FluxConstraint::on_net_flux(&model.objective, lower, upper);
    model.add_constraint(OBJECTIVE_CONSTRAINT_ID, constraint)?;
    model.clear_objective();
    Ok(optimum)
}

/// Cap the total flux (sum of forward and reverse fluxes) at `factor` times its minimum
pub(crate) fn add_flux_sum_cap(model: &mut Model, factor: f64) -> Result<f64, FvaError> {
    let problem = model.to_problem()?;
    let mut objective = Objective::new(ObjectiveSense::Minimize);
    for variable in 0..problem.num_variables() {
        objective.add_term(variable, 1.);
    }
    let solution = problem.solve_with_objective(&objective)?;
    let minimum = match (solution.is_optimal(), solution.objective_value) {
        (true, Some(value)) => value,
        _ => return Err(FvaError::FluxSumNotOptimal(solution.status)),
    };
    let terms = model
        .reactions
        .keys()
        .flat_map(|id| {
            [
                (FluxVariable::Forward(id.clone()), 1.),
                (FluxVariable::Reverse(id.clone()), 1.),
            ]
        })
        .collect();
    let cap = factor * minimum + configuration::current().tolerance;
    model.add_constraint(
        FLUX_SUM_CONSTRAINT_ID,
        FluxConstraint {
            terms,
            lower_bound: 0.,
            upper_bound: cap,
        },
    )?;
    Ok(minimum)
}

/// Run flux variability analysis
///
/// The model itself is never modified; the objective constraint (and the pFBA constraint, if
/// requested) are added to a private copy. All minimizations run as one parallel batch,
/// followed by all maximizations.
///
/// # Parameters
/// - `model`: Model to analyze
/// - `options`: See [`FvaOptions`]
///
/// # Returns
/// A range for every target, in the requested order. Targets whose linear programs never
/// finished get NaN bounds.
///
/// # Errors
/// Unknown reaction ids are a hard error. So is every target ending up undetermined, whether
/// its linear programs failed, timed out, or were infeasible.
pub fn flux_variability_analysis(model: &Model, options: &FvaOptions) -> Result<FvaResult, FvaError> {
    let targets: Vec<String> = match &options.reaction_list {
        Some(list) => list.clone(),
        None => model.reactions.keys().cloned().collect(),
    };
    let parsed = targets
        .iter()
        .map(|target| LinearTarget::parse(target, model))
        .collect::<Result<Vec<_>, _>>()?;
    if targets.is_empty() {
        return Ok(FvaResult::default());
    }

    let mut working = model.clone();
    if working.has_objective() {
        let optimum = fix_objective_floor(&mut working, options.fraction_of_optimum)?;
        debug!(optimum, fraction = options.fraction_of_optimum, "fixed objective for FVA");
    }
    if let Some(factor) = options.pfba_factor {
        let minimum = add_flux_sum_cap(&mut working, factor)?;
        debug!(minimum, factor, "capped total flux for FVA");
    }
    working.clear_objective();

    let context = FvaContext {
        problem: working.to_problem()?,
        targets: parsed,
    };
    let pool = TaskPool::new(
        "fva",
        context,
        options.threads,
        |ctx: &FvaContext, (index, sense): &(usize, ObjectiveSense)| ctx.targets[*index].optimize(&ctx.problem, *sense),
    );
    let policy = RetryPolicy::new(options.timeout, options.max_attempts);
    info!(targets = targets.len(), threads = options.threads, "running FVA");

    let mut bounds = Vec::with_capacity(2);
    for sense in [ObjectiveSense::Minimize, ObjectiveSense::Maximize] {
        let items: Vec<(usize, ObjectiveSense)> = (0..targets.len()).map(|i| (i, sense)).collect();
        let values: Vec<f64> = pool
            .run_with_retry(&items, policy)?
            .into_iter()
            .zip(&targets)
            .map(|(result, target)| match result {
                Ok(value) => snap_to_zero(value, options.zero_threshold),
                Err(failure) => {
                    warn!(%target, %sense, %failure, "FVA target left undetermined");
                    f64::NAN
                }
            })
            .collect();
        bounds.push(values);
    }

    let ranges: IndexMap<String, FluxRange> = targets
        .into_iter()
        .zip(bounds[0].iter().zip(&bounds[1]))
        .map(|(target, (minimum, maximum))| {
            (
                target,
                FluxRange {
                    minimum: *minimum,
                    maximum: *maximum,
                },
            )
        })
        .collect();
    if ranges.values().all(FluxRange::has_nan) {
        return Err(FvaError::AllTargetsUndetermined {
            targets: ranges.len(),
        });
    }
    Ok(FvaResult { ranges })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metabolic_model::reaction::Reaction;

    /// EX_A: -> A (max 10), R1: A <=> B, EX_B: B ->, R_iso: C -> D (disconnected)
    fn chain_model() -> Model {
        let mut model = Model::new_empty();
        model.add_reaction(Reaction::new("EX_A", &[("A", 1.)], 0., 10.));
        model.add_reaction(Reaction::new("R1", &[("A", -1.), ("B", 1.)], -1000., 1000.));
        model.add_reaction(Reaction::new("EX_B", &[("B", -1.)], 0., 1000.));
        model.add_reaction(Reaction::new("R_iso", &[("C", -1.), ("D", 1.)], -1000., 1000.));
        model
    }

    fn single_thread() -> FvaOptions {
        FvaOptionsBuilder::default().threads(1usize).build().unwrap()
    }

    #[test]
    fn ranges_without_objective() {
        let model = chain_model();
        let result = flux_variability_analysis(&model, &single_thread()).unwrap();
        assert_eq!(result.len(), 4);
        let r1 = result.get("R1").unwrap();
        assert!((r1.minimum - 0.).abs() < 1e-6);
        assert!((r1.maximum - 10.).abs() < 1e-6);
        assert!(result.get("R_iso").unwrap().is_zero());
    }

    #[test]
    fn ranges_with_objective() {
        let mut model = chain_model();
        model.set_objective(IndexMap::from([("EX_B".to_string(), 1.)]), ObjectiveSense::Maximize);
        let result = flux_variability_analysis(&model, &single_thread()).unwrap();
        let r1 = result.get("R1").unwrap();
        assert!((r1.minimum - 10.).abs() < 1e-5);
        assert!((r1.maximum - 10.).abs() < 1e-5);

        let half = FvaOptionsBuilder::default()
            .fraction_of_optimum(0.5)
            .threads(2usize)
            .build()
            .unwrap();
        let result = flux_variability_analysis(&model, &half).unwrap();
        let r1 = result.get("R1").unwrap();
        assert!((r1.minimum - 5.).abs() < 1e-5);
        assert!((r1.maximum - 10.).abs() < 1e-5);
        // The caller's model is untouched
        assert!(model.constraints.is_empty());
        assert!(model.has_objective());
    }

    #[test]
    fn linear_combination_targets() {
        let model = chain_model();
        let options = FvaOptionsBuilder::default()
            .reaction_list(Some(vec!["EX_A+-R1".to_string(), "EX_A+R1".to_string()]))
            .threads(1usize)
            .build()
            .unwrap();
        let result = flux_variability_analysis(&model, &options).unwrap();
        // EX_A and R1 always carry the same flux
        assert!(result.get("EX_A+-R1").unwrap().is_zero());
        assert!((result.get("EX_A+R1").unwrap().maximum - 20.).abs() < 1e-6);
    }

    #[test]
    fn unknown_targets_are_errors() {
        let model = chain_model();
        let options = FvaOptionsBuilder::default()
            .reaction_list(Some(vec!["R1+nope".to_string()]))
            .build()
            .unwrap();
        assert_eq!(
            flux_variability_analysis(&model, &options),
            Err(FvaError::UnknownTarget {
                target: "R1+nope".to_string(),
                reaction: "nope".to_string()
            })
        );
    }

    #[test]
    fn unbounded_targets() {
        let mut model = Model::new_empty();
        model.add_reaction(Reaction::new(
            "L1",
            &[("X", -1.), ("Y", 1.)],
            f64::NEG_INFINITY,
            f64::INFINITY,
        ));
        model.add_reaction(Reaction::new(
            "L2",
            &[("Y", -1.), ("X", 1.)],
            f64::NEG_INFINITY,
            f64::INFINITY,
        ));
        let result = flux_variability_analysis(&model, &single_thread()).unwrap();
        let l1 = result.get("L1").unwrap();
        assert_eq!(l1.minimum, f64::NEG_INFINITY);
        assert_eq!(l1.maximum, f64::INFINITY);
    }

    #[test]
    fn pfba_factor_limits_loops() {
        let mut model = chain_model();
        // A loop that could otherwise carry 1000
        model.add_reaction(Reaction::new("L1", &[("A", -1.), ("E", 1.)], 0., 1000.));
        model.add_reaction(Reaction::new("L2", &[("E", -1.), ("A", 1.)], 0., 1000.));
        model.set_objective(IndexMap::from([("EX_B".to_string(), 1.)]), ObjectiveSense::Maximize);
        let options = FvaOptionsBuilder::default()
            .pfba_factor(Some(1.5))
            .reaction_list(Some(vec!["L1".to_string()]))
            .threads(1usize)
            .build()
            .unwrap();
        let result = flux_variability_analysis(&model, &options).unwrap();
        // Minimum total flux is 30, a cap of 45 leaves room for 7.5 through each loop step
        assert!((result.get("L1").unwrap().maximum - 7.5).abs() < 1e-4);
    }

    #[test]
    fn infeasible_model_is_an_error() {
        // R1 must run backwards, but nothing can consume A or supply B
        let mut model = Model::new_empty();
        model.add_reaction(Reaction::new("R1", &[("A", -1.), ("B", 1.)], -10., -5.));
        model.add_reaction(Reaction::new("R2", &[("B", -1.), ("C", 1.)], 0., 1000.));
        assert_eq!(
            flux_variability_analysis(&model, &single_thread()),
            Err(FvaError::AllTargetsUndetermined { targets: 2 })
        );
    }

    #[test]
    fn target_parsing() {
        let model = chain_model();
        let target = LinearTarget::parse("R1+-EX_A", &model).unwrap();
        assert_eq!(target.terms, vec![(1, 1.), (0, -1.)]);
        // Repeats do not add up, the last sign wins
        let target = LinearTarget::parse("R1+-EX_A+-R1", &model).unwrap();
        assert_eq!(target.terms, vec![(1, -1.), (0, -1.)]);
    }
}
