//! Loop test
//!
//! With every exchange reaction closed, a reaction can only carry flux as part of an internal
//! loop (a type III extreme pathway), which is thermodynamically impossible. Flagged
//! reactions are then grouped into separate loops: reactions whose sampled fluxes are highly
//! correlated and which share a metabolite are connected by an edge.
use std::time::Duration;

use crate::audit::{tags, AuditError, Edge};
use crate::configuration;
use crate::flux_analysis::fva::{flux_variability_analysis, FvaError, FvaOptions};
use crate::flux_analysis::sampling::{correlation_matrix, sample, SamplingOptions};
use crate::metabolic_model::model::Model;
use derive_builder::Builder;
use indexmap::IndexMap;
use nalgebra::DMatrix;
use tracing::{debug, info, warn};

/// Name of the result column
pub const COLUMN: &str = "loop_test";

/// Options for [`loop_test`]
#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(default, setter(into))]
pub struct LoopTestOptions {
    /// Flux magnitudes below this count as zero
    pub zero_threshold: f64,
    /// Minimum absolute correlation between two loop reactions to connect them
    pub correlation_threshold: f64,
    /// Number of flux samples used for the correlations
    pub n_samples: usize,
    pub seed: u64,
    pub threads: usize,
    /// Timeout of a single linear program
    pub timeout: Duration,
    pub max_attempts: usize,
}

impl Default for LoopTestOptions {
    fn default() -> Self {
        let config = configuration::current();
        LoopTestOptions {
            zero_threshold: config.zero_threshold,
            correlation_threshold: 0.9,
            n_samples: 1000,
            seed: 0,
            threads: config.processes,
            timeout: Duration::from_secs(300),
            max_attempts: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopVerdict {
    Ok,
    InLoop,
    /// The flux range could not be determined
    Error,
}

impl LoopVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopVerdict::Ok => tags::OK,
            LoopVerdict::InLoop => tags::IN_LOOP,
            LoopVerdict::Error => tags::ERROR,
        }
    }
}

/// Result of [`loop_test`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoopReport {
    pub verdicts: IndexMap<String, LoopVerdict>,
    /// Pairs of correlated loop reactions sharing a metabolite
    pub edges: Vec<Edge>,
}

impl LoopReport {
    pub fn column(&self) -> IndexMap<String, String> {
        self.verdicts
            .iter()
            .map(|(id, verdict)| (id.clone(), verdict.as_str().to_string()))
            .collect()
    }
}

/// Copy of the model with every exchange closed, positive lower bounds removed, and no
/// objective
fn closed_model(model: &Model) -> Model {
    let mut closed = model.clone();
    closed.clear_objective();
    for rxn in closed.reactions.values_mut() {
        if rxn.is_boundary() {
            rxn.lower_bound = 0.;
            rxn.upper_bound = 0.;
        }
        // Usually maintenance reactions, which would make the closed model infeasible
        if rxn.lower_bound > 0. {
            rxn.lower_bound = 0.;
        }
    }
    closed
}

/// Find reactions which can carry flux in internal loops
///
/// # Parameters
/// - `model`: Model to test, left unchanged
/// - `options`: See [`LoopTestOptions`]
///
/// # Returns
/// A verdict for each reaction, and edges between correlated loop reactions
pub fn loop_test(model: &Model, options: &LoopTestOptions) -> Result<LoopReport, AuditError> {
    let mut closed = closed_model(model);
    let fva_options = FvaOptions {
        threads: options.threads,
        timeout: options.timeout,
        max_attempts: options.max_attempts,
        zero_threshold: options.zero_threshold,
        ..FvaOptions::default()
    };
    let fva = match flux_variability_analysis(&closed, &fva_options) {
        Ok(fva) => fva,
        Err(FvaError::AllTargetsUndetermined { targets }) => {
            return Err(AuditError::SystemicFailure {
                test: "loop",
                items: targets,
            })
        }
        Err(err) => return Err(err.into()),
    };
    let verdicts: IndexMap<String, LoopVerdict> = fva
        .iter()
        .map(|(id, range)| {
            let verdict = if range.has_nan() {
                LoopVerdict::Error
            } else if range.is_zero() {
                LoopVerdict::Ok
            } else {
                LoopVerdict::InLoop
            };
            (id.clone(), verdict)
        })
        .collect();
    let in_loop = verdicts.values().filter(|v| **v == LoopVerdict::InLoop).count();
    info!(in_loop, "loop test found reactions in internal loops");
    if in_loop == 0 {
        return Ok(LoopReport {
            verdicts,
            edges: Vec::new(),
        });
    }

    let outside: Vec<&str> = verdicts
        .iter()
        .filter(|(_, verdict)| **verdict != LoopVerdict::InLoop)
        .map(|(id, _)| id.as_str())
        .collect();
    closed.remove_reactions(&outside);
    let sampling_options = SamplingOptions {
        n_samples: options.n_samples,
        seed: options.seed,
        threads: options.threads,
        timeout: options.timeout,
        max_attempts: options.max_attempts,
        zero_threshold: options.zero_threshold,
    };
    let samples = sample(&closed, &sampling_options)?;

    // Only reactions with flux in every sample have meaningful correlations
    let always_active: Vec<usize> = (0..samples.fluxes.ncols())
        .filter(|col| samples.fluxes.column(*col).iter().all(|v| *v != 0.))
        .collect();
    let active = DMatrix::from_fn(samples.fluxes.nrows(), always_active.len(), |row, col| {
        samples.fluxes[(row, always_active[col])]
    });
    let correlations = correlation_matrix(&active);
    debug!(reactions = always_active.len(), "correlating sampled loop fluxes");

    let mut edges = Vec::new();
    for (i, &first) in always_active.iter().enumerate() {
        for (j, &second) in always_active.iter().enumerate().skip(i + 1) {
            // NaN correlations never pass
            if correlations[(i, j)].abs() <= options.correlation_threshold || correlations[(i, j)].is_nan() {
                continue;
            }
            let r1 = &closed.reactions[first];
            let r2 = &closed.reactions[second];
            if r1.metabolites.keys().any(|met| r2.metabolites.contains_key(met)) {
                edges.push(Edge::new(&r1.id, &r2.id));
            }
        }
    }
    if edges.is_empty() {
        warn!("no correlated pairs of loop reactions share a metabolite");
    }
    Ok(LoopReport { verdicts, edges })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metabolic_model::reaction::Reaction;

    /// A <=> B <=> C <=> A cycle, fed by EX_A, with a maintenance reaction A -> D
    fn cycle_model() -> Model {
        let mut model = Model::new_empty();
        model.add_reaction(Reaction::new("EX_A", &[("A", 1.)], -10., 10.));
        model.add_reaction(Reaction::new("R1", &[("A", -1.), ("B", 1.)], -1000., 1000.));
        model.add_reaction(Reaction::new("R2", &[("B", -1.), ("C", 1.)], -1000., 1000.));
        model.add_reaction(Reaction::new("R3", &[("C", -1.), ("A", 1.)], -1000., 1000.));
        model.add_reaction(Reaction::new("MAINT", &[("A", -1.), ("D", 1.)], 1., 1000.));
        model.add_reaction(Reaction::new("EX_D", &[("D", -1.)], 0., 1000.));
        model
    }

    fn options() -> LoopTestOptions {
        LoopTestOptionsBuilder::default()
            .n_samples(100usize)
            .threads(2usize)
            .build()
            .unwrap()
    }

    #[test]
    fn finds_internal_cycle() {
        let model = cycle_model();
        let report = loop_test(&model, &options()).unwrap();
        for id in ["R1", "R2", "R3"] {
            assert_eq!(report.verdicts[id], LoopVerdict::InLoop);
        }
        for id in ["EX_A", "MAINT", "EX_D"] {
            assert_eq!(report.verdicts[id], LoopVerdict::Ok);
        }
        assert_eq!(report.edges.len(), 3);
        assert!(report.edges.contains(&Edge::new("R1", "R2")));
        assert_eq!(report.column()["R1"], "in-loop");
        // The caller's model keeps its bounds
        assert_eq!(model.get_reaction("MAINT").unwrap().lower_bound, 1.);
    }

    #[test]
    fn linear_pathway_has_no_loops() {
        let mut model = Model::new_empty();
        model.add_reaction(Reaction::new("EX_A", &[("A", 1.)], -10., 10.));
        model.add_reaction(Reaction::new("R1", &[("A", -1.), ("B", 1.)], -1000., 1000.));
        model.add_reaction(Reaction::new("EX_B", &[("B", -1.)], -10., 10.));
        let report = loop_test(&model, &options()).unwrap();
        assert!(report.verdicts.values().all(|v| *v == LoopVerdict::Ok));
        assert!(report.edges.is_empty());
    }

    #[test]
    fn infeasible_model_fails_the_whole_test() {
        // R1 is forced backwards, so A piles up even with the exchanges closed
        let mut model = Model::new_empty();
        model.add_reaction(Reaction::new("R1", &[("A", -1.), ("B", 1.)], -10., -5.));
        model.add_reaction(Reaction::new("R2", &[("B", -1.), ("C", 1.)], 0., 1000.));
        assert_eq!(
            loop_test(&model, &options()),
            Err(AuditError::SystemicFailure {
                test: "loop",
                items: 2
            })
        );
    }
}
