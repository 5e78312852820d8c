//! Dilution test
//!
//! Growing cells dilute every metabolite, so a metabolite which can only be recycled (and
//! never made from scratch) cannot really carry flux. For each metabolite, a dilution
//! constraint is added to a copy of the model and the largest possible dilution flux is
//! found. Comparing that with the flux ranges before any constraint classifies each
//! metabolite and its reactions:
//!
//! | flux before | dilution flux | verdict                 |
//! |-------------|---------------|-------------------------|
//! | nonzero     | zero          | `blocked-by-dilution`   |
//! | zero        | nonzero       | `unblocked-by-dilution` |
//! | zero        | zero          | `always-blocked`        |
//! | nonzero     | nonzero       | `ok`                    |
//!
//! Reactions downstream of blocked metabolites are found with the dead-end search, seeded
//! with the blocked metabolites and reactions. Anything already explained by ordinary dead
//! ends is left out.
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::audit::dead_end::{dead_end_test, edit_dead_end_bounds, DeadEndReport, DeadEndSearch};
use crate::audit::{require_metabolites, tags, AuditError, Edge};
use crate::configuration;
use crate::dilution::{
    add_dilution_constraints, add_leakage_reactions, constrain_reversible_reactions,
    dilution_reaction_id, DilutionError, DilutionOptions,
};
use crate::flux_analysis::fva::{flux_variability_analysis, FvaOptions, FvaResult};
use crate::metabolic_model::model::Model;
use crate::optimize::objective::ObjectiveSense;
use crate::parallel::{RetryPolicy, TaskFailure, TaskPool};
use crate::utils::{join_ids, snap_to_zero};
use derive_builder::Builder;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

/// Name of the result column
pub const COLUMN: &str = "dilution_test";

/// Uptake bound given to exchange reactions of medium metabolites
const MEDIUM_UPTAKE: f64 = -1000.;

/// Options for [`dilution_test`]
#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(default, setter(into))]
pub struct DilutionTestOptions {
    /// Dead-end test results for the same model, computed when not given
    pub dead_end_results: Option<DeadEndReport>,
    /// Metabolites (ids or names) which may be taken up, None leaves exchange bounds alone
    pub medium: Option<Vec<String>>,
    /// Metabolites to test, None for all of them
    pub metabolites: Option<Vec<String>>,
    /// Flux magnitudes below this count as zero
    pub zero_threshold: f64,
    /// Timeout of a single linear program
    pub timeout: Duration,
    pub max_attempts: usize,
    pub threads: usize,
    /// Bound on the leakage reactions added between compartments
    pub leak_flux: f64,
    /// Ratio between the total flux through a metabolite and its dilution flux
    pub dil_factor: f64,
}

impl Default for DilutionTestOptions {
    fn default() -> Self {
        let config = configuration::current();
        DilutionTestOptions {
            dead_end_results: None,
            medium: None,
            metabolites: None,
            zero_threshold: config.zero_threshold,
            timeout: Duration::from_secs(1800),
            max_attempts: 3,
            threads: config.processes,
            leak_flux: 1.,
            dil_factor: 1000.,
        }
    }
}

/// Effect of one metabolite's dilution constraint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DilutionVerdict {
    Ok,
    BlockedByDilution,
    /// Only possible through the bound tightening done before testing, so a weak signal
    UnblockedByDilution,
    AlwaysBlocked,
    /// The maximum dilution flux could not be determined
    Error,
}

impl DilutionVerdict {
    fn classify(max_dilution: f64, blocked_before: bool) -> Self {
        if max_dilution.is_nan() {
            DilutionVerdict::Error
        } else if max_dilution == 0. && !blocked_before {
            DilutionVerdict::BlockedByDilution
        } else if max_dilution != 0. && blocked_before {
            DilutionVerdict::UnblockedByDilution
        } else if max_dilution == 0. {
            DilutionVerdict::AlwaysBlocked
        } else {
            DilutionVerdict::Ok
        }
    }

    /// Verdicts that may be caused by the tightening of reversible reactions rather than by
    /// the model itself
    pub fn is_low_confidence(&self) -> bool {
        matches!(self, DilutionVerdict::UnblockedByDilution)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DilutionVerdict::Ok => tags::OK,
            DilutionVerdict::BlockedByDilution => tags::BLOCKED_BY_DILUTION,
            DilutionVerdict::UnblockedByDilution => tags::UNBLOCKED_BY_DILUTION,
            DilutionVerdict::AlwaysBlocked => tags::ALWAYS_BLOCKED,
            DilutionVerdict::Error => tags::ERROR,
        }
    }
}

impl fmt::Display for DilutionVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`dilution_test`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DilutionTestReport {
    /// The dead-end results the test was based on
    pub dead_ends: DeadEndReport,
    /// Verdict for every tested metabolite
    pub metabolite_verdicts: IndexMap<String, DilutionVerdict>,
    /// Result for every reaction of the model: a verdict, the blocked metabolites of a
    /// reaction blocked by dilution, or `n/a` for reactions without tested metabolites
    pub results: IndexMap<String, String>,
    /// Edges from blocked metabolites to the reactions they block
    pub edges: Vec<Edge>,
    /// Number of metabolites blocked by their own dilution constraint
    pub directly_blocked: usize,
}

impl DilutionTestReport {
    pub fn column(&self) -> IndexMap<String, String> {
        self.results.clone()
    }
}

/// Shared state for the dilution workers
struct DilutionContext {
    model: Model,
    zero_threshold: f64,
    dil_factor: f64,
}

impl DilutionContext {
    /// Largest dilution flux of one metabolite once its dilution constraint is added
    fn max_dilution_flux(&self, metabolite: &str) -> Result<f64, DilutionError> {
        let options = DilutionOptions {
            metabolites: Some(vec![metabolite.to_string()]),
            leak_flux: 0.,
            dil_factor: self.dil_factor,
            preprocess: false,
            ..DilutionOptions::default()
        };
        let mut diluted = add_dilution_constraints(&self.model, &options)?;
        diluted.set_objective(
            IndexMap::from([(dilution_reaction_id(metabolite), 1.)]),
            ObjectiveSense::Maximize,
        );
        Ok(snap_to_zero(diluted.slim_optimize()?, self.zero_threshold))
    }
}

/// Open uptake of the medium metabolites and close every other uptake
fn restrict_to_medium(model: &mut Model, medium: &[String]) {
    let mut matched = 0;
    let Model {
        reactions,
        metabolites,
        ..
    } = model;
    for rxn in reactions.values_mut().filter(|rxn| rxn.is_boundary()) {
        let in_medium = rxn
            .metabolites
            .keys()
            .next()
            .and_then(|id| metabolites.get(id))
            .is_some_and(|met| medium.iter().any(|query| met.matches(query)));
        if in_medium {
            rxn.lower_bound = MEDIUM_UPTAKE;
            matched += 1;
        } else {
            rxn.lower_bound = 0.;
        }
    }
    info!(matched, "restricted uptake to the medium");
    if matched < medium.len() {
        warn!(
            missing = medium.len() - matched,
            "some medium metabolites have no exchange reaction in the model"
        );
    }
}

/// Find reactions which can only carry flux if metabolites are perfectly recycled
///
/// # Parameters
/// - `model`: Model to test, left unchanged
/// - `options`: See [`DilutionTestOptions`]
///
/// # Returns
/// A verdict for every tested metabolite and a result for every reaction
///
/// # Errors
/// Unknown metabolite ids, FVA failures, and every metabolite ending in an error
pub fn dilution_test(model: &Model, options: &DilutionTestOptions) -> Result<DilutionTestReport, AuditError> {
    let dead_ends = match &options.dead_end_results {
        Some(report) => report.clone(),
        None => {
            info!("no dead-end results given, running the dead-end test first");
            dead_end_test(model)
        }
    };
    let to_test: Vec<String> = match &options.metabolites {
        Some(list) => {
            require_metabolites(model, list, "dilution")?;
            list.clone()
        }
        None => model.metabolites.keys().cloned().collect(),
    };

    // Blocking known dead ends first keeps the dilution reactions from reviving them
    let mut working = edit_dead_end_bounds(model, &dead_ends)?;
    if let Some(medium) = &options.medium {
        restrict_to_medium(&mut working, medium);
    }
    working.clear_objective();

    let tested: HashSet<&str> = to_test.iter().map(String::as_str).collect();
    let fva_targets: Vec<String> = working
        .reactions
        .values()
        .filter(|rxn| rxn.metabolites.keys().any(|met| tested.contains(met.as_str())))
        .map(|rxn| rxn.id.clone())
        .collect();
    let fva_options = FvaOptions {
        reaction_list: Some(fva_targets),
        threads: options.threads,
        timeout: options.timeout,
        max_attempts: options.max_attempts,
        zero_threshold: options.zero_threshold,
        ..FvaOptions::default()
    };
    debug!("finding flux ranges without dilution constraints");
    let fva_before = flux_variability_analysis(&working, &fva_options)?;

    let (tightened, _) = constrain_reversible_reactions(
        &working,
        Some(&fva_before),
        &fva_options,
        options.zero_threshold,
    )?;
    let context = DilutionContext {
        model: add_leakage_reactions(&tightened, options.leak_flux),
        zero_threshold: options.zero_threshold,
        dil_factor: options.dil_factor,
    };
    let pool = TaskPool::new(
        "dilution",
        context,
        options.threads,
        |ctx: &DilutionContext, met: &String| ctx.max_dilution_flux(met),
    );
    info!(metabolites = to_test.len(), "testing dilution constraints");
    let max_fluxes = pool.run_with_retry(&to_test, RetryPolicy::new(options.timeout, options.max_attempts))?;

    let (metabolite_verdicts, per_reaction) = classify(model, &to_test, &max_fluxes, &fva_before);
    if !metabolite_verdicts.is_empty()
        && metabolite_verdicts
            .values()
            .all(|v| *v == DilutionVerdict::Error)
    {
        return Err(AuditError::SystemicFailure {
            test: "dilution",
            items: metabolite_verdicts.len(),
        });
    }
    let low_confidence = metabolite_verdicts
        .values()
        .filter(|v| v.is_low_confidence())
        .count();
    if low_confidence > 0 {
        warn!(
            metabolites = low_confidence,
            "some metabolites were unblocked by dilution, which usually comes from bound tightening"
        );
    }

    blocked_pathways(model, dead_ends, metabolite_verdicts, per_reaction)
}

/// Verdicts per metabolite, and per reaction before following blocked pathways
fn classify(
    model: &Model,
    to_test: &[String],
    max_fluxes: &[Result<f64, TaskFailure>],
    fva_before: &FvaResult,
) -> (IndexMap<String, DilutionVerdict>, IndexMap<String, Option<DilutionVerdict>>) {
    let blocked_before = |rxn_id: &str| fva_before.get(rxn_id).is_some_and(|range| range.is_zero());
    let mut metabolite_verdicts = IndexMap::with_capacity(to_test.len());
    let mut per_reaction: IndexMap<String, Option<DilutionVerdict>> =
        model.reactions.keys().map(|id| (id.clone(), None)).collect();
    for (met, max_flux) in to_test.iter().zip(max_fluxes) {
        let reactions = model.reactions_of(met);
        let all_blocked = reactions.iter().all(|rxn| blocked_before(&rxn.id));
        let verdict = match max_flux {
            Ok(value) => DilutionVerdict::classify(*value, all_blocked),
            Err(failure) => {
                warn!(metabolite = %met, %failure, "dilution constraint could not be tested");
                DilutionVerdict::Error
            }
        };
        metabolite_verdicts.insert(met.clone(), verdict);
        for rxn in reactions {
            let Some(slot) = per_reaction.get_mut(&rxn.id) else {
                continue;
            };
            // Once blocked by one metabolite, another metabolite cannot make it ok again
            if *slot == Some(DilutionVerdict::BlockedByDilution) {
                continue;
            }
            *slot = Some(if blocked_before(&rxn.id) {
                DilutionVerdict::AlwaysBlocked
            } else {
                verdict
            });
        }
    }
    (metabolite_verdicts, per_reaction)
}

/// Follow blocked metabolites through the network and build the final report
fn blocked_pathways(
    model: &Model,
    dead_ends: DeadEndReport,
    metabolite_verdicts: IndexMap<String, DilutionVerdict>,
    per_reaction: IndexMap<String, Option<DilutionVerdict>>,
) -> Result<DilutionTestReport, AuditError> {
    let blocked_mets: Vec<&str> = metabolite_verdicts
        .iter()
        .filter(|(_, v)| **v == DilutionVerdict::BlockedByDilution)
        .map(|(id, _)| id.as_str())
        .collect();
    let blocked_rxns: Vec<&str> = per_reaction
        .iter()
        .filter(|(_, v)| **v == Some(DilutionVerdict::BlockedByDilution))
        .map(|(id, _)| id.as_str())
        .collect();
    let mut search = DeadEndSearch::new(model);
    search.seed(&blocked_mets, &blocked_rxns)?;
    search.run();

    let dead_end_mets: HashSet<&str> = dead_ends.dead_metabolites.iter().map(String::as_str).collect();
    let chain_mets: HashSet<String> = search
        .dead_metabolite_ids()
        .into_iter()
        .filter(|met| !dead_end_mets.contains(met.as_str()))
        .collect();

    let mut results = IndexMap::with_capacity(model.reactions.len());
    let mut edges = Vec::new();
    let mut blocked_count = 0;
    for (index, rxn) in model.reactions.values().enumerate() {
        let explained_by_dead_end = rxn
            .metabolites
            .keys()
            .any(|met| dead_end_mets.contains(met.as_str()));
        let result = if search.is_dead_reaction(index) && !explained_by_dead_end {
            blocked_count += 1;
            let mets: Vec<&str> = rxn
                .metabolites
                .keys()
                .map(String::as_str)
                .filter(|met| chain_mets.contains(*met))
                .collect();
            edges.extend(mets.iter().map(|met| Edge::new(met, &rxn.id)));
            if mets.is_empty() {
                tags::BLOCKED_BY_DILUTION.to_string()
            } else {
                join_ids(&mets)
            }
        } else {
            match per_reaction.get(&rxn.id).copied().flatten() {
                Some(verdict) => verdict.to_string(),
                None => tags::NOT_APPLICABLE.to_string(),
            }
        };
        results.insert(rxn.id.clone(), result);
    }
    info!(
        metabolites = blocked_mets.len(),
        reactions = blocked_count,
        "dilution test finished"
    );
    Ok(DilutionTestReport {
        dead_ends,
        directly_blocked: blocked_mets.len(),
        metabolite_verdicts,
        results,
        edges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metabolic_model::reaction::Reaction;

    /// ∅ -> A, A + C -> B + D, B -> ∅, D -> C
    fn cycle_model() -> Model {
        let mut model = Model::new_empty();
        model.add_reaction(Reaction::new("EX_A", &[("A", 1.)], 0., 1000.));
        model.add_reaction(Reaction::new("R1", &[("A", -1.), ("C", -1.), ("B", 1.), ("D", 1.)], 0., 1000.));
        model.add_reaction(Reaction::new("EX_B", &[("B", -1.)], 0., 1000.));
        model.add_reaction(Reaction::new("R2", &[("D", -1.), ("C", 1.)], 0., 1000.));
        model
    }

    fn options() -> DilutionTestOptions {
        DilutionTestOptionsBuilder::default()
            .threads(2usize)
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap()
    }

    #[test]
    fn verdict_table() {
        assert_eq!(DilutionVerdict::classify(0., false), DilutionVerdict::BlockedByDilution);
        assert_eq!(DilutionVerdict::classify(2., true), DilutionVerdict::UnblockedByDilution);
        assert_eq!(DilutionVerdict::classify(0., true), DilutionVerdict::AlwaysBlocked);
        assert_eq!(DilutionVerdict::classify(2., false), DilutionVerdict::Ok);
        assert_eq!(DilutionVerdict::classify(f64::NAN, false), DilutionVerdict::Error);
        assert!(DilutionVerdict::UnblockedByDilution.is_low_confidence());
        assert!(!DilutionVerdict::BlockedByDilution.is_low_confidence());
    }

    #[test]
    fn recycled_cofactor_is_blocked() {
        let report = dilution_test(&cycle_model(), &options()).unwrap();
        assert_eq!(report.metabolite_verdicts["A"], DilutionVerdict::Ok);
        assert_eq!(report.metabolite_verdicts["B"], DilutionVerdict::Ok);
        assert_eq!(report.metabolite_verdicts["C"], DilutionVerdict::BlockedByDilution);
        assert_eq!(report.metabolite_verdicts["D"], DilutionVerdict::BlockedByDilution);
        assert_eq!(report.directly_blocked, 2);
        // Everything depends on the C/D cycle
        assert_eq!(report.results["R1"], "A;C;B;D");
        assert_eq!(report.results["R2"], "D;C");
        assert_eq!(report.results["EX_A"], "A");
        assert!(report.edges.contains(&Edge::new("C", "R2")));
    }

    #[test]
    fn only_selected_metabolites_are_tested() {
        let mut opts = options();
        opts.metabolites = Some(vec!["B".to_string()]);
        let report = dilution_test(&cycle_model(), &opts).unwrap();
        assert_eq!(report.metabolite_verdicts.len(), 1);
        assert_eq!(report.results["R1"], "ok");
        assert_eq!(report.results["R2"], "n/a");

        opts.metabolites = Some(vec!["nope".to_string()]);
        assert!(matches!(
            dilution_test(&cycle_model(), &opts),
            Err(AuditError::Lookup { .. })
        ));
    }

    #[test]
    fn dead_ends_are_not_reported_twice() {
        let mut model = cycle_model();
        // E is only ever produced
        model.add_reaction(Reaction::new("R3", &[("B", -1.), ("E", 1.)], 0., 1000.));
        let report = dilution_test(&model, &options()).unwrap();
        assert!(report.dead_ends.verdicts["R3"].is_dead());
        assert!(!report.results["R3"].contains('E'));
        assert!(!report.metabolite_verdicts.is_empty());
    }

    #[test]
    fn medium_restricts_uptake() {
        let mut model = cycle_model();
        model.get_reaction_mut("EX_A").unwrap().lower_bound = -1000.;
        model.get_reaction_mut("EX_B").unwrap().lower_bound = -1000.;
        restrict_to_medium(&mut model, &["A".to_string()]);
        assert_eq!(model.get_reaction("EX_A").unwrap().lower_bound, -1000.);
        assert_eq!(model.get_reaction("EX_B").unwrap().lower_bound, 0.);
    }
}
