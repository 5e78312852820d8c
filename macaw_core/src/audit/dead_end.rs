//! Dead-end test
//!
//! A metabolite is a dead end when it has fewer than two reactions that are not dead ends
//! themselves, or when all of its (live) reactions are irreversible and either all produce it
//! or all consume it. Every reaction of a dead-end metabolite is a dead end too, which can
//! make its other metabolites dead ends in turn.
//!
//! When exactly one reversible reaction remains next to irreversible reactions that all
//! produce (or all consume) a metabolite, that reaction can only run in one direction. It is
//! made irreversible in that direction instead of being declared dead.
//!
//! The search is a worklist over index-based records, so arbitrarily long dead-end chains
//! never recurse.
use std::fmt;

use crate::audit::tags;
use crate::audit::{AuditError, Edge};
use crate::metabolic_model::model::Model;
use crate::utils::join_ids;
use indexmap::IndexMap;
use tracing::info;

/// Name of the result column
pub const COLUMN: &str = "dead_end_test";

/// Dead-end status of one reaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeadEndVerdict {
    Ok,
    /// Reversible reaction that can only carry flux forwards
    OnlyForward,
    /// Reversible reaction that can only carry flux backwards
    OnlyBackward,
    /// The reaction can never carry steady state flux, because of these metabolites
    DeadEnd(Vec<String>),
}

impl DeadEndVerdict {
    pub fn is_dead(&self) -> bool {
        matches!(self, DeadEndVerdict::DeadEnd(_))
    }
}

impl fmt::Display for DeadEndVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadEndVerdict::Ok => write!(f, "{}", tags::OK),
            DeadEndVerdict::OnlyForward => write!(f, "{}", tags::ONLY_FORWARD),
            DeadEndVerdict::OnlyBackward => write!(f, "{}", tags::ONLY_BACKWARD),
            DeadEndVerdict::DeadEnd(mets) => write!(f, "{}", join_ids(mets)),
        }
    }
}

/// Result of [`dead_end_test`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeadEndReport {
    /// Verdict for every reaction, in model order
    pub verdicts: IndexMap<String, DeadEndVerdict>,
    /// Dead-end metabolites in the order they were found
    pub dead_metabolites: Vec<String>,
    /// Edges from each dead-end metabolite to the dead-end reactions it takes part in
    pub edges: Vec<Edge>,
}

impl DeadEndReport {
    /// Result column, keyed by reaction id
    pub fn column(&self) -> IndexMap<String, String> {
        self.verdicts
            .iter()
            .map(|(id, verdict)| (id.clone(), verdict.to_string()))
            .collect()
    }

    /// Ids of the reactions which can never carry flux
    pub fn dead_reactions(&self) -> impl Iterator<Item = &str> {
        self.verdicts
            .iter()
            .filter(|(_, verdict)| verdict.is_dead())
            .map(|(id, _)| id.as_str())
    }
}

/// Working copy of a reaction, metabolites referenced by index
#[derive(Clone, Debug)]
struct ReactionRecord {
    metabolites: Vec<(usize, f64)>,
    lower_bound: f64,
    upper_bound: f64,
}

impl ReactionRecord {
    fn is_reversible(&self) -> bool {
        self.lower_bound < 0.
    }

    fn coefficient(&self, metabolite: usize) -> f64 {
        self.metabolites
            .iter()
            .find(|(met, _)| *met == metabolite)
            .map(|(_, coef)| *coef)
            .unwrap_or(0.)
    }

    fn flip(&mut self) {
        for (_, coef) in self.metabolites.iter_mut() {
            *coef = -*coef;
        }
        let (lower, upper) = (self.lower_bound, self.upper_bound);
        self.lower_bound = -upper;
        self.upper_bound = -lower;
    }
}

/// State of a dead-end search over one model
///
/// The model itself is only read; bound changes happen on the internal records.
pub(crate) struct DeadEndSearch<'a> {
    model: &'a Model,
    reactions: Vec<ReactionRecord>,
    metabolite_reactions: Vec<Vec<usize>>,
    dead_reactions: Vec<bool>,
    dead_metabolites: Vec<bool>,
    found_order: Vec<usize>,
    forward_only: Vec<bool>,
    backward_only: Vec<bool>,
}

impl<'a> DeadEndSearch<'a> {
    pub(crate) fn new(model: &'a Model) -> Self {
        let mut metabolite_reactions = vec![Vec::new(); model.metabolites.len()];
        let reactions = model
            .reactions
            .values()
            .enumerate()
            .map(|(rxn_index, rxn)| {
                let metabolites = rxn
                    .metabolites
                    .iter()
                    .filter_map(|(met, coef)| {
                        let met_index = model.metabolites.get_index_of(met)?;
                        metabolite_reactions[met_index].push(rxn_index);
                        Some((met_index, *coef))
                    })
                    .collect();
                ReactionRecord {
                    metabolites,
                    lower_bound: rxn.lower_bound,
                    upper_bound: rxn.upper_bound,
                }
            })
            .collect::<Vec<_>>();
        let n_reactions = reactions.len();
        DeadEndSearch {
            model,
            reactions,
            metabolite_reactions,
            dead_reactions: vec![false; n_reactions],
            dead_metabolites: vec![false; model.metabolites.len()],
            found_order: Vec::new(),
            forward_only: vec![false; n_reactions],
            backward_only: vec![false; n_reactions],
        }
    }

    /// Mark metabolites and reactions as dead before searching
    pub(crate) fn seed<S: AsRef<str>>(&mut self, metabolites: &[S], reactions: &[S]) -> Result<(), AuditError> {
        for id in metabolites {
            let index = self
                .model
                .metabolites
                .get_index_of(id.as_ref())
                .ok_or_else(|| lookup("Metabolite", id.as_ref()))?;
            self.mark_metabolite(index);
        }
        for id in reactions {
            let index = self
                .model
                .reactions
                .get_index_of(id.as_ref())
                .ok_or_else(|| lookup("Reaction", id.as_ref()))?;
            self.dead_reactions[index] = true;
        }
        Ok(())
    }

    /// Examine every metabolite of the model, in model order
    pub(crate) fn run(&mut self) {
        let mut stack = Vec::new();
        for start in 0..self.dead_metabolites.len() {
            stack.push(start);
            while let Some(met) = stack.pop() {
                self.examine(met, &mut stack);
            }
        }
    }

    fn mark_metabolite(&mut self, met: usize) {
        if !self.dead_metabolites[met] {
            self.dead_metabolites[met] = true;
            self.found_order.push(met);
        }
    }

    /// Queue the live metabolites of a reaction, except `skip`, keeping their order
    fn queue_metabolites(&self, rxn: usize, skip: usize, stack: &mut Vec<usize>) {
        for (met, _) in self.reactions[rxn].metabolites.iter().rev() {
            if *met != skip && !self.dead_metabolites[*met] {
                stack.push(*met);
            }
        }
    }

    fn examine(&mut self, met: usize, stack: &mut Vec<usize>) {
        if self.dead_metabolites[met] {
            return;
        }
        let live: Vec<usize> = self.metabolite_reactions[met]
            .iter()
            .copied()
            .filter(|rxn| !self.dead_reactions[*rxn])
            .collect();

        if live.len() < 2 {
            self.mark_metabolite(met);
            if let Some(rxn) = live.first().copied() {
                self.dead_reactions[rxn] = true;
                self.queue_metabolites(rxn, met, stack);
            }
            return;
        }

        let (reversible, irreversible): (Vec<usize>, Vec<usize>) = live
            .iter()
            .copied()
            .partition(|rxn| self.reactions[*rxn].is_reversible());
        let all_produce = irreversible
            .iter()
            .all(|rxn| self.reactions[*rxn].coefficient(met) > 0.);
        let all_consume = irreversible
            .iter()
            .all(|rxn| self.reactions[*rxn].coefficient(met) < 0.);

        match reversible.as_slice() {
            [] if all_produce || all_consume => {
                self.mark_metabolite(met);
                for rxn in live.iter().rev() {
                    self.dead_reactions[*rxn] = true;
                    self.queue_metabolites(*rxn, met, stack);
                }
            }
            [rxn] if all_produce || all_consume => {
                let rxn = *rxn;
                // The reversible reaction has to consume the metabolite when everything
                // else produces it, and produce it when everything else consumes it
                let coefficient = self.reactions[rxn].coefficient(met);
                let runs_forward = if all_produce { coefficient < 0. } else { coefficient > 0. };
                let record = &mut self.reactions[rxn];
                if runs_forward {
                    record.lower_bound = 0.;
                    self.forward_only[rxn] = true;
                } else {
                    record.flip();
                    record.lower_bound = 0.;
                    self.backward_only[rxn] = true;
                }
                self.queue_metabolites(rxn, met, stack);
            }
            _ => {}
        }
    }

    pub(crate) fn is_dead_reaction(&self, index: usize) -> bool {
        self.dead_reactions[index]
    }

    /// Ids of the dead metabolites, in the order they were found
    pub(crate) fn dead_metabolite_ids(&self) -> Vec<String> {
        self.found_order
            .iter()
            .filter_map(|met| self.model.metabolites.get_index(*met))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub(crate) fn report(&self) -> DeadEndReport {
        let mut verdicts = IndexMap::with_capacity(self.reactions.len());
        let mut edges = Vec::new();
        for (index, id) in self.model.reactions.keys().enumerate() {
            let verdict = if self.dead_reactions[index] {
                let mets: Vec<String> = self.reactions[index]
                    .metabolites
                    .iter()
                    .filter(|(met, _)| self.dead_metabolites[*met])
                    .filter_map(|(met, _)| self.model.metabolites.get_index(*met))
                    .map(|(met_id, _)| met_id.clone())
                    .collect();
                edges.extend(mets.iter().map(|met_id| Edge::new(met_id, id)));
                DeadEndVerdict::DeadEnd(mets)
            } else if self.forward_only[index] {
                DeadEndVerdict::OnlyForward
            } else if self.backward_only[index] {
                DeadEndVerdict::OnlyBackward
            } else {
                DeadEndVerdict::Ok
            };
            verdicts.insert(id.clone(), verdict);
        }
        DeadEndReport {
            verdicts,
            dead_metabolites: self.dead_metabolite_ids(),
            edges,
        }
    }
}

fn lookup(kind: &'static str, id: &str) -> AuditError {
    AuditError::Lookup {
        test: "dead-end",
        kind,
        id: id.to_string(),
    }
}

/// Find dead-end metabolites and the reactions they block
///
/// The model is not changed.
pub fn dead_end_test(model: &Model) -> DeadEndReport {
    let mut search = DeadEndSearch::new(model);
    search.run();
    let report = search.report();
    let one_way = report
        .verdicts
        .values()
        .filter(|v| matches!(v, DeadEndVerdict::OnlyForward | DeadEndVerdict::OnlyBackward))
        .count();
    info!(
        dead_metabolites = report.dead_metabolites.len(),
        dead_reactions = report.dead_reactions().count(),
        one_way,
        "dead-end test finished"
    );
    report
}

/// Apply dead-end verdicts to a copy of the model
///
/// Dead reactions get both bounds set to 0. Reactions that can only run forwards get a lower
/// bound of 0, and reactions that can only run backwards are flipped so they run forwards.
pub fn edit_dead_end_bounds(model: &Model, report: &DeadEndReport) -> Result<Model, AuditError> {
    let mut edited = model.clone();
    for (id, verdict) in &report.verdicts {
        let rxn = edited
            .reactions
            .get_mut(id)
            .ok_or_else(|| lookup("Reaction", id))?;
        match verdict {
            DeadEndVerdict::Ok => {}
            DeadEndVerdict::OnlyForward => rxn.lower_bound = 0.,
            DeadEndVerdict::OnlyBackward => {
                rxn.upper_bound = 0.;
                rxn.flip();
            }
            DeadEndVerdict::DeadEnd(_) => {
                rxn.lower_bound = 0.;
                rxn.upper_bound = 0.;
            }
        }
    }
    Ok(edited)
}
