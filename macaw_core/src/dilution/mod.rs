//! Dilution constraints
//!
//! A growing cell dilutes every metabolite it contains, so any metabolite that carries flux
//! must also be produced from something else to make up for that loss. This module adds
//! that requirement to a model:
//!
//! - a dilution reaction `"{met}_dilution"` draining each metabolite,
//! - a constraint `"{met}_dilution_constraint"` forcing the dilution flux to equal
//!   `1 / dil_factor` of the total flux through the metabolite's other reactions,
//! - optionally, small reversible leakage reactions `"{m1}--{m2}_leakage"` between copies of
//!   the same compound in different compartments, so antiport-only transport can still be
//!   sustained.
use std::collections::HashSet;

use crate::configuration;
use crate::flux_analysis::fva::{flux_variability_analysis, FvaError, FvaOptions, FvaResult};
use crate::metabolic_model::metabolite::Metabolite;
use crate::metabolic_model::model::{FluxConstraint, FluxVariable, Model};
use crate::metabolic_model::reaction::Reaction;
use crate::metabolic_model::ModelError;
use crate::utils::round_to;
use derive_builder::Builder;
use indexmap::IndexMap;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

const DILUTION_SUFFIX: &str = "_dilution";
const LEAKAGE_SUFFIX: &str = "_leakage";
const LEAKAGE_SEPARATOR: &str = "--";

/// Options for [`add_dilution_constraints`]
#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(default, setter(into))]
pub struct DilutionOptions {
    /// Metabolites to dilute, None for every metabolite except tRNAs and cytochromes
    pub metabolites: Option<Vec<String>>,
    /// Bound on leakage reactions, 0 adds none
    pub leak_flux: f64,
    /// Ratio between the total flux through a metabolite and its dilution flux,
    /// values <= 0 leave the model unchanged
    pub dil_factor: f64,
    /// Tighten the bounds of reversible reactions before adding constraints
    pub preprocess: bool,
    /// FVA results for the reversible reactions, computed when needed and not given
    pub fva_results: Option<FvaResult>,
    /// Options for the FVA run during preprocessing
    pub fva_options: FvaOptions,
    /// Flux magnitudes below this count as zero when tightening bounds
    pub zero_threshold: f64,
}

impl Default for DilutionOptions {
    fn default() -> Self {
        DilutionOptions {
            metabolites: None,
            leak_flux: 1.,
            dil_factor: 1000.,
            preprocess: true,
            fva_results: None,
            fva_options: FvaOptions::default(),
            zero_threshold: configuration::current().zero_threshold,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DilutionError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Fva(#[from] FvaError),
}

/// Does this reaction follow the dilution reaction naming convention
pub fn is_dilution_reaction(reaction: &Reaction) -> bool {
    reaction.id.ends_with(DILUTION_SUFFIX) && reaction.metabolites.len() == 1
}

/// Does this reaction follow the leakage reaction naming convention
pub fn is_leakage_reaction(reaction: &Reaction) -> bool {
    reaction.id.contains(LEAKAGE_SEPARATOR) && reaction.id.ends_with(LEAKAGE_SUFFIX)
}

/// Id of the dilution reaction of a metabolite
pub fn dilution_reaction_id(metabolite_id: &str) -> String {
    format!("{metabolite_id}{DILUTION_SUFFIX}")
}

/// Id of the dilution constraint of a metabolite
pub fn dilution_constraint_id(metabolite_id: &str) -> String {
    format!("{metabolite_id}{DILUTION_SUFFIX}_constraint")
}

/// Metabolites diluted when no explicit list is given
///
/// tRNAs and cytochromes are recycled rather than synthesized de novo, so they are skipped.
pub fn default_dilution_metabolites(model: &Model) -> Vec<String> {
    let excluded = ["trna", "cytochrome"];
    model
        .metabolites
        .values()
        .filter(|met| {
            let id = met.id.to_lowercase();
            let name = met.name.as_deref().unwrap_or("").to_lowercase();
            !excluded
                .iter()
                .any(|word| id.contains(word) || name.contains(word))
        })
        .map(|met| met.id.clone())
        .collect()
}

/// How the bounds of reversible reactions were tightened
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReversibleSummary {
    /// Reactions that can carry no flux, bounds set to 0
    pub blocked: Vec<String>,
    /// Reactions that only run forward, lower bound set to 0
    pub forward_only: Vec<String>,
    /// Reactions that only run backward, flipped and made irreversible
    pub flipped: Vec<String>,
    /// Reactions that run in both directions, bounds set to the rounded FVA range
    pub narrowed: Vec<String>,
}

/// Tighten the bounds of reversible, non-boundary reactions using their FVA ranges
///
/// Without this, a reversible reaction could "borrow" dilution flux by running in a
/// direction it can never actually sustain. Reactions without an FVA range are left alone.
///
/// # Parameters
/// - `model`: Model to tighten, a modified copy is returned
/// - `fva_results`: FVA ranges for the reversible reactions, None runs FVA with
///   `fva_options`
/// - `zero_threshold`: Magnitudes below this count as zero flux
pub fn constrain_reversible_reactions(
    model: &Model,
    fva_results: Option<&FvaResult>,
    fva_options: &FvaOptions,
    zero_threshold: f64,
) -> Result<(Model, ReversibleSummary), DilutionError> {
    let reversible: Vec<String> = model
        .reactions
        .values()
        .filter(|rxn| rxn.is_reversible() && !rxn.is_boundary())
        .map(|rxn| rxn.id.clone())
        .collect();
    let computed;
    let fva_results = match fva_results {
        Some(results) => results,
        None => {
            let mut options = fva_options.clone();
            options.reaction_list = Some(reversible.clone());
            computed = flux_variability_analysis(model, &options)?;
            &computed
        }
    };

    let mut tightened = model.clone();
    let mut summary = ReversibleSummary::default();
    for id in reversible {
        let Some(range) = fva_results.get(&id) else {
            continue;
        };
        // Undetermined bounds are treated as unbounded in that direction
        let minimum = if range.minimum.is_nan() { f64::NEG_INFINITY } else { range.minimum };
        let maximum = if range.maximum.is_nan() { f64::INFINITY } else { range.maximum };
        let rxn = tightened.get_reaction_mut(&id)?;
        if minimum.abs() < zero_threshold && maximum.abs() < zero_threshold {
            rxn.lower_bound = 0.;
            rxn.upper_bound = 0.;
            summary.blocked.push(id);
        } else if minimum >= -zero_threshold && maximum > zero_threshold {
            rxn.lower_bound = 0.;
            summary.forward_only.push(id);
        } else if minimum < -zero_threshold && maximum <= zero_threshold {
            rxn.flip();
            rxn.lower_bound = 0.;
            summary.flipped.push(id);
        } else {
            rxn.lower_bound = round_to(minimum, 3);
            rxn.upper_bound = round_to(maximum, 3);
            summary.narrowed.push(id);
        }
    }
    info!(
        blocked = summary.blocked.len(),
        forward_only = summary.forward_only.len(),
        flipped = summary.flipped.len(),
        narrowed = summary.narrowed.len(),
        "tightened reversible reactions"
    );
    Ok((tightened, summary))
}

/// Add an irreversible dilution reaction `met -> ` for each metabolite
///
/// Does nothing if the model already contains dilution reactions.
pub fn add_dilution_reactions(model: &Model, metabolites: &[String]) -> Result<Model, DilutionError> {
    if model.reactions.values().any(is_dilution_reaction) {
        debug!("model already has dilution reactions, returning it as is");
        return Ok(model.clone());
    }
    let mut diluted = model.clone();
    for met_id in metabolites {
        let met = model.get_metabolite(met_id)?;
        let mut rxn = Reaction::new(&dilution_reaction_id(met_id), &[(met_id, -1.)], 0., f64::INFINITY);
        rxn.name = Some(format!("{} Dilution", met.display_name()));
        diluted.add_reaction(rxn);
    }
    Ok(diluted)
}

/// Name of a metabolite without a trailing compartment label, e.g. `"ATP [c]"` -> `"ATP"`
fn strip_compartment(met: &Metabolite) -> String {
    let name = met.display_name();
    let Some(compartment) = met.compartment.as_deref().filter(|c| !c.is_empty()) else {
        return name.to_string();
    };
    let pattern = format!(r" ?[\(\[\{{]?{}[\)\]\}}]?$", regex::escape(compartment));
    match Regex::new(&pattern) {
        Ok(re) => re.replace(name, "").into_owned(),
        Err(_) => name.to_string(),
    }
}

/// Add reversible leakage reactions between copies of the same compound
///
/// Metabolites are copies of the same compound when their names match once compartment
/// labels are removed. A leakage reaction `m1 <=> m2` with bounds `+/- bound` is only added
/// for pairs that already share at least one reaction. Does nothing if the model already
/// has leakage reactions or `bound` is 0.
pub fn add_leakage_reactions(model: &Model, bound: f64) -> Model {
    if model.reactions.values().any(is_leakage_reaction) {
        debug!("model already has leakage reactions, returning it as is");
        return model.clone();
    }
    if bound == 0. {
        return model.clone();
    }
    let mut groups: IndexMap<String, Vec<&Metabolite>> = IndexMap::new();
    for met in model.metabolites.values() {
        groups.entry(strip_compartment(met)).or_default().push(met);
    }
    let met_reactions: IndexMap<String, HashSet<String>> = model
        .metabolite_reactions()
        .into_iter()
        .map(|(met, rxns)| (met, rxns.into_iter().collect()))
        .collect();

    let mut leaky = model.clone();
    let mut added = 0;
    for (name, mets) in groups.iter().filter(|(_, mets)| mets.len() > 1) {
        for (i, m1) in mets.iter().enumerate() {
            for m2 in &mets[i + 1..] {
                let shares_reaction = match (met_reactions.get(&m1.id), met_reactions.get(&m2.id)) {
                    (Some(r1), Some(r2)) => !r1.is_disjoint(r2),
                    _ => false,
                };
                if !shares_reaction {
                    continue;
                }
                let id = format!("{}{}{}{}", m1.id, LEAKAGE_SEPARATOR, m2.id, LEAKAGE_SUFFIX);
                let mut rxn = Reaction::new(&id, &[(&m1.id, -1.), (&m2.id, 1.)], -bound, bound);
                rxn.name = Some(format!("{name} Leakage"));
                leaky.add_reaction(rxn);
                added += 1;
            }
        }
    }
    info!(added, bound, "added leakage reactions");
    leaky
}

/// Build the dilution constraint for one metabolite
///
/// The sum of forward and reverse fluxes through every reaction of the metabolite, except
/// its dilution reaction, must equal `dil_factor` times the dilution flux.
pub fn make_dilution_constraint(
    model: &Model,
    metabolite_id: &str,
    dil_factor: f64,
) -> Result<FluxConstraint, DilutionError> {
    model.get_metabolite(metabolite_id)?;
    let dilution_id = dilution_reaction_id(metabolite_id);
    let mut terms = Vec::new();
    for rxn in model.reactions_of(metabolite_id) {
        if rxn.id == dilution_id {
            terms.push((FluxVariable::Forward(rxn.id.clone()), -dil_factor));
            terms.push((FluxVariable::Reverse(rxn.id.clone()), dil_factor));
        } else {
            terms.push((FluxVariable::Forward(rxn.id.clone()), 1.));
            terms.push((FluxVariable::Reverse(rxn.id.clone()), 1.));
        }
    }
    Ok(FluxConstraint {
        terms,
        lower_bound: 0.,
        upper_bound: 0.,
    })
}

/// Add dilution reactions, leakage reactions, and dilution constraints to a copy of the model
///
/// # Parameters
/// - `model`: Model to constrain, left unchanged
/// - `options`: See [`DilutionOptions`]
///
/// # Returns
/// The constrained copy. If the model already has dilution reactions, or `dil_factor` is not
/// positive, an unmodified copy is returned.
///
/// # Errors
/// Metabolite ids which are not in the model, and failures of the preprocessing FVA.
pub fn add_dilution_constraints(model: &Model, options: &DilutionOptions) -> Result<Model, DilutionError> {
    if options.dil_factor <= 0. {
        warn!(dil_factor = options.dil_factor, "dilution factor is not positive, model left unchanged");
        return Ok(model.clone());
    }
    if model.reactions.values().any(is_dilution_reaction) {
        debug!("model already has dilution reactions, returning it as is");
        return Ok(model.clone());
    }
    let metabolites = match &options.metabolites {
        Some(list) => list.clone(),
        None => default_dilution_metabolites(model),
    };
    for met in &metabolites {
        model.get_metabolite(met)?;
    }

    let mut constrained = if options.preprocess {
        constrain_reversible_reactions(
            model,
            options.fva_results.as_ref(),
            &options.fva_options,
            options.zero_threshold,
        )?
        .0
    } else {
        model.clone()
    };
    constrained = add_dilution_reactions(&constrained, &metabolites)?;
    constrained = add_leakage_reactions(&constrained, options.leak_flux);
    for met in &metabolites {
        let constraint = make_dilution_constraint(&constrained, met, options.dil_factor)?;
        constrained.add_constraint(&dilution_constraint_id(met), constraint)?;
    }
    debug!(metabolites = metabolites.len(), "added dilution constraints");
    Ok(constrained)
}
