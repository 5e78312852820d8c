//! Random sampling of the steady state flux space
//!
//! Warm-up points are the optimal flux distributions found by minimizing and maximizing
//! every reaction. Because the feasible flux space is convex, any convex combination of
//! warm-up points is also feasible; samples are convex combinations with weights drawn
//! uniformly from the simplex (a flat Dirichlet distribution).
use std::time::Duration;

use crate::configuration;
use crate::flux_analysis::fva::LinearTarget;
use crate::metabolic_model::model::Model;
use crate::metabolic_model::ModelError;
use crate::optimize::objective::ObjectiveSense;
use crate::optimize::problem::Problem;
use crate::optimize::OptimizationStatus;
use crate::optimize::solvers::SolverError;
use crate::parallel::{PoolError, RetryPolicy, TaskPool};
use crate::utils::snap_to_zero;
use derive_builder::Builder;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info};

/// Options for [`sample`]
#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(default, setter(into))]
pub struct SamplingOptions {
    /// Number of samples to draw
    pub n_samples: usize,
    /// Seed for the random weights, so repeated runs give the same samples
    pub seed: u64,
    pub threads: usize,
    /// Timeout of a single warm-up linear program
    pub timeout: Duration,
    pub max_attempts: usize,
    /// Sampled fluxes with a smaller magnitude are reported as 0
    pub zero_threshold: f64,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        let config = configuration::current();
        SamplingOptions {
            n_samples: 1000,
            seed: 0,
            threads: config.processes,
            timeout: Duration::from_secs(300),
            max_attempts: 3,
            zero_threshold: config.zero_threshold,
        }
    }
}

/// Sampled fluxes, one row per sample and one column per reaction
#[derive(Clone, Debug, PartialEq)]
pub struct FluxSamples {
    pub reaction_ids: Vec<String>,
    pub fluxes: DMatrix<f64>,
}

impl FluxSamples {
    /// Sampled fluxes of one reaction
    pub fn column(&self, reaction_id: &str) -> Option<DVector<f64>> {
        let index = self.reaction_ids.iter().position(|id| id == reaction_id)?;
        Some(self.fluxes.column(index).into_owned())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplingError {
    #[error("No feasible warm-up point could be found, the model may be infeasible")]
    NoFeasiblePoints,
    #[error("The model has no reactions to sample")]
    NoReactions,
    #[error("The model has no feasible steady state")]
    Infeasible,
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

struct WarmupContext {
    problem: Problem,
    model: Model,
}

impl WarmupContext {
    /// Net flux vector at the optimum of one reaction, None if the solve was not optimal
    ///
    /// Infeasibility does not depend on the objective, so it is reported as a failure.
    fn point(&self, index: usize, sense: ObjectiveSense) -> Result<Option<Vec<f64>>, SamplingError> {
        let target = LinearTarget {
            terms: vec![(index, 1.)],
        };
        let solution = self
            .problem
            .solve_with_objective(&target.objective(sense))?;
        if solution.status == OptimizationStatus::Infeasible {
            return Err(SamplingError::Infeasible);
        }
        if !solution.is_optimal() {
            return Ok(None);
        }
        Ok(self
            .model
            .fluxes(&solution)
            .map(|fluxes| fluxes.into_values().collect()))
    }
}

/// Draw flux samples from the model
///
/// The model objective is ignored; every steady state flux distribution within the bounds
/// can be sampled.
pub fn sample(model: &Model, options: &SamplingOptions) -> Result<FluxSamples, SamplingError> {
    let n_reactions = model.reactions.len();
    if n_reactions == 0 {
        return Err(SamplingError::NoReactions);
    }
    let mut working = model.clone();
    working.clear_objective();
    let context = WarmupContext {
        problem: working.to_problem()?,
        model: working,
    };
    let pool = TaskPool::new(
        "warmup",
        context,
        options.threads,
        |ctx: &WarmupContext, (index, sense): &(usize, ObjectiveSense)| ctx.point(*index, *sense),
    );
    let items: Vec<(usize, ObjectiveSense)> = (0..n_reactions)
        .flat_map(|i| [(i, ObjectiveSense::Minimize), (i, ObjectiveSense::Maximize)])
        .collect();
    info!(reactions = n_reactions, samples = options.n_samples, "generating warm-up points");
    // Unbounded directions have no point, only finite ones can be combined
    let warmup: Vec<Vec<f64>> = pool
        .run_with_retry(&items, RetryPolicy::new(options.timeout, options.max_attempts))?
        .into_iter()
        .filter_map(|result| result.ok().flatten())
        .filter(|point| point.iter().all(|v| v.is_finite()))
        .collect();
    if warmup.is_empty() {
        return Err(SamplingError::NoFeasiblePoints);
    }
    debug!(points = warmup.len(), "warm-up complete");

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut fluxes = DMatrix::<f64>::zeros(options.n_samples, n_reactions);
    let mut weights = vec![0.; warmup.len()];
    for row in 0..options.n_samples {
        // -ln(U) is exponentially distributed, normalizing gives a flat Dirichlet draw
        for weight in weights.iter_mut() {
            let u: f64 = rng.random();
            *weight = -(1. - u).ln();
        }
        let total: f64 = weights.iter().sum();
        for (point, weight) in warmup.iter().zip(&weights) {
            let w = weight / total;
            for (col, value) in point.iter().enumerate() {
                fluxes[(row, col)] += w * value;
            }
        }
    }
    fluxes.apply(|v| *v = snap_to_zero(*v, options.zero_threshold));
    Ok(FluxSamples {
        reaction_ids: model.reactions.keys().cloned().collect(),
        fluxes,
    })
}

/// Pearson correlation between every pair of columns
///
/// Columns with zero variance have NaN correlation with everything, including themselves.
pub fn correlation_matrix(data: &DMatrix<f64>) -> DMatrix<f64> {
    let n_cols = data.ncols();
    let n_rows = data.nrows();
    if n_rows < 2 {
        return DMatrix::from_element(n_cols, n_cols, f64::NAN);
    }
    let mut centered = data.clone();
    for mut column in centered.column_iter_mut() {
        let mean = column.mean();
        column.add_scalar_mut(-mean);
    }
    let covariance = centered.transpose() * &centered;
    let deviations: Vec<f64> = (0..n_cols).map(|i| covariance[(i, i)].sqrt()).collect();
    DMatrix::from_fn(n_cols, n_cols, |i, j| {
        let denominator = deviations[i] * deviations[j];
        if denominator == 0. {
            f64::NAN
        } else {
            (covariance[(i, j)] / denominator).clamp(-1., 1.)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metabolic_model::reaction::Reaction;
    use crate::parallel::TaskFailure;

    fn options(n_samples: usize) -> SamplingOptions {
        SamplingOptionsBuilder::default()
            .n_samples(n_samples)
            .threads(2usize)
            .build()
            .unwrap()
    }

    /// EX_A: -> A, then A is split between R1 and R2, both exported
    fn branch_model() -> Model {
        let mut model = Model::new_empty();
        model.add_reaction(Reaction::new("EX_A", &[("A", 1.)], 0., 10.));
        model.add_reaction(Reaction::new("R1", &[("A", -1.), ("B", 1.)], 0., 1000.));
        model.add_reaction(Reaction::new("R2", &[("A", -1.), ("C", 1.)], 0., 1000.));
        model.add_reaction(Reaction::new("EX_B", &[("B", -1.)], 0., 1000.));
        model.add_reaction(Reaction::new("EX_C", &[("C", -1.)], 0., 1000.));
        model
    }

    #[test]
    fn samples_are_feasible() {
        let model = branch_model();
        let samples = sample(&model, &options(50)).unwrap();
        assert_eq!(samples.fluxes.nrows(), 50);
        assert_eq!(samples.fluxes.ncols(), 5);
        for row in samples.fluxes.row_iter() {
            // Steady state for A, B and C
            assert!((row[0] - row[1] - row[2]).abs() < 1e-6);
            assert!((row[1] - row[3]).abs() < 1e-6);
            assert!(row[0] <= 10. + 1e-6);
            assert!(row.iter().all(|v| *v >= -1e-9));
        }
    }

    #[test]
    fn sampling_is_reproducible() {
        let model = branch_model();
        let first = sample(&model, &options(20)).unwrap();
        let second = sample(&model, &options(20)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn correlations() {
        let data = DMatrix::from_row_slice(4, 3, &[
            1., 2., 5.,
            2., 4., 5.,
            3., 6., 5.,
            4., 8., 5.,
        ]);
        let corr = correlation_matrix(&data);
        assert!((corr[(0, 1)] - 1.).abs() < 1e-12);
        assert!((corr[(1, 0)] - 1.).abs() < 1e-12);
        assert!(corr[(0, 2)].is_nan());

        let anti = DMatrix::from_row_slice(3, 2, &[1., -1., 2., -2., 3., -3.]);
        assert!((correlation_matrix(&anti)[(0, 1)] + 1.).abs() < 1e-12);
    }

    #[test]
    fn empty_model() {
        assert_eq!(
            sample(&Model::new_empty(), &options(10)),
            Err(SamplingError::NoReactions)
        );
    }

    #[test]
    fn infeasible_model_is_a_systemic_failure() {
        let mut model = Model::new_empty();
        model.add_reaction(Reaction::new("R1", &[("A", -1.), ("B", 1.)], -10., -5.));
        model.add_reaction(Reaction::new("R2", &[("B", -1.), ("C", 1.)], 0., 1000.));
        match sample(&model, &options(10)) {
            Err(SamplingError::Pool(PoolError::SystemicFailure { label, items, last })) => {
                assert_eq!(label, "warmup");
                assert_eq!(items, 4);
                assert!(matches!(last, TaskFailure::Faulted { attempts: 3, .. }));
            }
            other => panic!("expected a systemic failure, got {other:?}"),
        }
    }
}
