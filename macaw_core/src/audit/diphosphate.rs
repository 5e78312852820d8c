//! Diphosphate test
//!
//! Cells keep diphosphate hydrolysis running in one direction with very active
//! diphosphatases, so reversible reactions that make or use diphosphate let a model make
//! energy out of nothing. Reactions which also involve phosphate are skipped, they are
//! usually the diphosphatases (or antiporters) themselves.
use std::fmt;

use crate::audit::{require_metabolites, tags, AuditError};
use crate::metabolic_model::model::Model;
use crate::metabolic_model::reaction::Reaction;
use indexmap::IndexMap;
use tracing::{info, warn};

/// Name of the result column
pub const COLUMN: &str = "diphosphate_test";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiphosphateVerdict {
    Ok,
    /// Reversible reaction producing diphosphate
    ShouldBeIrreversible,
    /// Reversible reaction consuming diphosphate
    ShouldBeFlipped,
    /// No diphosphate or phosphate ids were given
    NotApplicable,
}

impl DiphosphateVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiphosphateVerdict::Ok => tags::OK,
            DiphosphateVerdict::ShouldBeIrreversible => tags::SHOULD_BE_IRREVERSIBLE,
            DiphosphateVerdict::ShouldBeFlipped => tags::SHOULD_BE_FLIPPED,
            DiphosphateVerdict::NotApplicable => tags::NOT_APPLICABLE,
        }
    }
}

impl fmt::Display for DiphosphateVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`diphosphate_test`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiphosphateReport {
    pub verdicts: IndexMap<String, DiphosphateVerdict>,
}

impl DiphosphateReport {
    pub fn column(&self) -> IndexMap<String, String> {
        self.verdicts
            .iter()
            .map(|(id, verdict)| (id.clone(), verdict.to_string()))
            .collect()
    }
}

fn classify(rxn: &Reaction, ppi_ids: &[String], pi_ids: &[String]) -> DiphosphateVerdict {
    let involves_pi = rxn.metabolites.keys().any(|met| pi_ids.contains(met));
    if rxn.is_boundary() || involves_pi || !rxn.is_reversible() {
        return DiphosphateVerdict::Ok;
    }
    let produces = rxn.products().any(|met| ppi_ids.iter().any(|ppi| ppi == met));
    let consumes = rxn.reactants().any(|met| ppi_ids.iter().any(|ppi| ppi == met));
    match (produces, consumes) {
        (true, false) => DiphosphateVerdict::ShouldBeIrreversible,
        (false, true) => DiphosphateVerdict::ShouldBeFlipped,
        // Diphosphate on both sides is transport
        _ => DiphosphateVerdict::Ok,
    }
}

/// Flag reversible reactions which make or use diphosphate
///
/// # Parameters
/// - `model`: Model to test
/// - `ppi_ids`: Ids of the metabolites representing diphosphate
/// - `pi_ids`: Ids of the metabolites representing phosphate
///
/// # Returns
/// A verdict for every reaction. When either id list is empty, every verdict is `n/a`.
///
/// # Errors
/// Ids which are not metabolites of the model.
pub fn diphosphate_test(
    model: &Model,
    ppi_ids: &[String],
    pi_ids: &[String],
) -> Result<DiphosphateReport, AuditError> {
    if ppi_ids.is_empty() || pi_ids.is_empty() {
        warn!("diphosphate test needs both diphosphate and phosphate ids, skipping it");
        return Ok(DiphosphateReport {
            verdicts: model
                .reactions
                .keys()
                .map(|id| (id.clone(), DiphosphateVerdict::NotApplicable))
                .collect(),
        });
    }
    require_metabolites(model, ppi_ids, "diphosphate")?;
    require_metabolites(model, pi_ids, "diphosphate")?;
    let verdicts: IndexMap<String, DiphosphateVerdict> = model
        .reactions
        .values()
        .map(|rxn| (rxn.id.clone(), classify(rxn, ppi_ids, pi_ids)))
        .collect();
    let flagged = verdicts
        .values()
        .filter(|v| !matches!(v, DiphosphateVerdict::Ok))
        .count();
    info!(flagged, "diphosphate test finished");
    Ok(DiphosphateReport { verdicts })
}
