//! Tests which flag reactions that are likely to be wrong
//!
//! Every test works on a private copy of the model and reports one verdict per reaction,
//! along with an edge list connecting the flagged reactions (and sometimes metabolites) so
//! related problems can be viewed together.
//!
//! - [`dead_end`]: metabolites which can only be produced or only be consumed
//! - [`duplicate`]: reactions which repeat another reaction
//! - [`diphosphate`]: reversible reactions which make or use diphosphate
//! - [`loops`]: reactions which can carry flux with every exchange closed
//! - [`dilution_test`]: reactions blocked once metabolites must be made from scratch
//! - [`results`]: merging the per-test verdicts and running everything at once
pub mod dead_end;
pub mod dilution_test;
pub mod diphosphate;
pub mod duplicate;
pub mod loops;
pub mod results;

use crate::dilution::DilutionError;
use crate::flux_analysis::fva::FvaError;
use crate::flux_analysis::sampling::SamplingError;
use crate::graphs::GraphError;
use crate::metabolic_model::model::Model;
use crate::metabolic_model::reaction::Reaction;
use crate::metabolic_model::ModelError;
use crate::parallel::PoolError;
use results::TableError;
use serde::Serialize;
use thiserror::Error;

/// Tags used in the result columns
pub mod tags {
    pub const OK: &str = "ok";
    pub const BAD: &str = "bad";
    pub const NOT_APPLICABLE: &str = "n/a";
    pub const ERROR: &str = "error";
    pub const ONLY_FORWARD: &str = "only-forward";
    pub const ONLY_BACKWARD: &str = "only-backward";
    pub const IN_LOOP: &str = "in-loop";
    pub const BLOCKED_BY_DILUTION: &str = "blocked-by-dilution";
    pub const UNBLOCKED_BY_DILUTION: &str = "unblocked-by-dilution";
    pub const ALWAYS_BLOCKED: &str = "always-blocked";
    pub const SHOULD_BE_IRREVERSIBLE: &str = "should-be-irreversible";
    pub const SHOULD_BE_FLIPPED: &str = "should-be-flipped-and-made-irreversible";
    /// Separator between ids in list-valued results
    pub const LIST_SEPARATOR: &str = ";";
}

/// Errors from running a test
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuditError {
    /// Arguments which can never work, whatever the model
    #[error("Invalid test configuration: {0}")]
    Configuration(String),
    /// An id given to a test is not part of the model
    #[error("{kind} {id} given to the {test} test is not in the model")]
    Lookup {
        test: &'static str,
        kind: &'static str,
        id: String,
    },
    /// Every work item of a test failed, so the model or the setup is broken
    #[error("All {items} work items of the {test} test failed, the model is probably infeasible")]
    SystemicFailure { test: &'static str, items: usize },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Fva(#[from] FvaError),
    #[error(transparent)]
    Dilution(#[from] DilutionError),
    #[error(transparent)]
    Sampling(#[from] SamplingError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// How reaction equations are written in result tables
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EquationStyle {
    /// Use metabolite names instead of ids
    pub use_names: bool,
    /// Add the compartment of each metabolite to its name
    pub add_suffixes: bool,
}

impl EquationStyle {
    pub fn equation(&self, model: &Model, reaction: &Reaction) -> String {
        reaction.build_equation(&model.metabolites, self.use_names, self.add_suffixes)
    }
}

/// A connection between two flagged nodes (reaction or metabolite ids)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: &str, target: &str) -> Self {
        Edge {
            source: source.to_string(),
            target: target.to_string(),
        }
    }
}

/// Make sure every id is a metabolite of the model
pub(crate) fn require_metabolites<S: AsRef<str>>(
    model: &Model,
    ids: &[S],
    test: &'static str,
) -> Result<(), AuditError> {
    match ids
        .iter()
        .find(|id| !model.metabolites.contains_key(id.as_ref()))
    {
        Some(missing) => Err(AuditError::Lookup {
            test,
            kind: "Metabolite",
            id: missing.as_ref().to_string(),
        }),
        None => Ok(()),
    }
}
