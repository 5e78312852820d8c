//! Duplicate test
//!
//! Reactions with the same set of metabolites are compared pairwise:
//!
//! - exact duplicates have the same coefficients, direction, and reversibility
//! - direction duplicates run the opposite way or differ in reversibility
//! - coefficient duplicates use different stoichiometric coefficients
//!
//! Given redox carrier pairs and proton ids, reactions which do the same thing with different
//! electron carriers (for example an NAD and an NADP version of one dehydrogenase) are
//! reported as redox duplicates.
use std::collections::{BTreeSet, HashSet};

use crate::audit::{require_metabolites, tags, AuditError, Edge};
use crate::metabolic_model::model::Model;
use crate::metabolic_model::reaction::Reaction;
use crate::utils::join_ids;
use indexmap::IndexMap;
use tracing::{info, warn};

pub const EXACT_COLUMN: &str = "duplicate_test_exact";
pub const DIRECTION_COLUMN: &str = "duplicate_test_directions";
pub const COEFFICIENT_COLUMN: &str = "duplicate_test_coefficients";
pub const REDOX_COLUMN: &str = "duplicate_test_redox";

/// Duplicate partners of every reaction, for each kind of duplicate
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DuplicateReport {
    pub exact: IndexMap<String, Vec<String>>,
    pub directions: IndexMap<String, Vec<String>>,
    pub coefficients: IndexMap<String, Vec<String>>,
    /// None when the redox check was skipped
    pub redox: Option<IndexMap<String, Vec<String>>>,
    pub edges: Vec<Edge>,
}

fn partner_column(partners: &IndexMap<String, Vec<String>>) -> IndexMap<String, String> {
    partners
        .iter()
        .map(|(id, list)| {
            let value = if list.is_empty() { tags::OK.to_string() } else { join_ids(list) };
            (id.clone(), value)
        })
        .collect()
}

impl DuplicateReport {
    /// The four result columns, in output order
    pub fn columns(&self) -> Vec<(&'static str, IndexMap<String, String>)> {
        let redox = match &self.redox {
            Some(partners) => partner_column(partners),
            None => self
                .exact
                .keys()
                .map(|id| (id.clone(), tags::NOT_APPLICABLE.to_string()))
                .collect(),
        };
        vec![
            (EXACT_COLUMN, partner_column(&self.exact)),
            (DIRECTION_COLUMN, partner_column(&self.directions)),
            (COEFFICIENT_COLUMN, partner_column(&self.coefficients)),
            (REDOX_COLUMN, redox),
        ]
    }

    /// Is the reaction any kind of duplicate
    pub fn is_duplicate(&self, reaction_id: &str) -> bool {
        let flagged = |partners: &IndexMap<String, Vec<String>>| {
            partners.get(reaction_id).is_some_and(|list| !list.is_empty())
        };
        flagged(&self.exact)
            || flagged(&self.directions)
            || flagged(&self.coefficients)
            || self.redox.as_ref().is_some_and(flagged)
    }
}

/// Partner lists indexed by reaction position
struct Partners(Vec<Vec<usize>>);

impl Partners {
    fn new(n: usize) -> Self {
        Partners(vec![Vec::new(); n])
    }

    fn link(&mut self, first: usize, second: usize) {
        self.0[first].push(second);
        self.0[second].push(first);
    }

    fn into_ids(self, model: &Model) -> IndexMap<String, Vec<String>> {
        model
            .reactions
            .keys()
            .zip(self.0)
            .map(|(id, mut partners)| {
                partners.sort_unstable();
                partners.dedup();
                let ids = partners
                    .into_iter()
                    .filter_map(|i| model.reactions.get_index(i))
                    .map(|(partner, _)| partner.clone())
                    .collect();
                (id.clone(), ids)
            })
            .collect()
    }
}

fn metabolite_key(rxn: &Reaction) -> BTreeSet<&str> {
    rxn.metabolites.keys().map(String::as_str).collect()
}

/// Validated redox carriers
struct RedoxCarriers<'a> {
    pairs: &'a [(String, String)],
    /// Every carrier and proton id
    all: HashSet<&'a str>,
}

impl<'a> RedoxCarriers<'a> {
    fn involves_pair(&self, rxn: &Reaction) -> bool {
        self.pairs.iter().any(|(oxidized, reduced)| {
            rxn.metabolites.contains_key(oxidized) && rxn.metabolites.contains_key(reduced)
        })
    }

    /// Metabolites of a reaction other than carriers and protons
    fn substrate_key<'r>(&self, rxn: &'r Reaction) -> BTreeSet<&'r str> {
        rxn.metabolites
            .keys()
            .map(String::as_str)
            .filter(|met| !self.all.contains(*met))
            .collect()
    }
}

fn redox_carriers<'a>(
    model: &Model,
    redox_pairs: &'a [(String, String)],
    proton_ids: &'a [String],
) -> Result<Option<RedoxCarriers<'a>>, AuditError> {
    if let Some((oxidized, _)) = redox_pairs.iter().find(|(oxidized, reduced)| oxidized == reduced) {
        return Err(AuditError::Configuration(format!(
            "redox pair ({oxidized}, {oxidized}) has the same oxidized and reduced form"
        )));
    }
    if redox_pairs.len() < 2 || proton_ids.is_empty() {
        warn!(
            "redox duplicates need at least two redox carrier pairs and one proton id, \
             only looking for other kinds of duplicates"
        );
        return Ok(None);
    }
    let flattened: Vec<&str> = redox_pairs
        .iter()
        .flat_map(|(oxidized, reduced)| [oxidized.as_str(), reduced.as_str()])
        .collect();
    require_metabolites(model, &flattened, "duplicate")?;
    require_metabolites(model, proton_ids, "duplicate")?;
    let all = flattened
        .into_iter()
        .chain(proton_ids.iter().map(String::as_str))
        .collect();
    Ok(Some(RedoxCarriers { pairs: redox_pairs, all }))
}

/// Find reactions which are potentially duplicates of each other
///
/// # Parameters
/// - `model`: Model to test
/// - `redox_pairs`: (oxidized, reduced) metabolite ids of redox carriers
/// - `proton_ids`: Ids of the metabolites representing protons
///
/// # Returns
/// Partner lists for each kind of duplicate. The redox check is skipped (and reported as
/// `n/a`) with fewer than two redox pairs or no proton ids.
///
/// # Errors
/// A pair with the same id twice, or ids which are not metabolites of the model.
pub fn duplicate_test(
    model: &Model,
    redox_pairs: &[(String, String)],
    proton_ids: &[String],
) -> Result<DuplicateReport, AuditError> {
    let carriers = redox_carriers(model, redox_pairs, proton_ids)?;
    let reactions: Vec<&Reaction> = model.reactions.values().collect();
    let n = reactions.len();
    let mut exact = Partners::new(n);
    let mut directions = Partners::new(n);
    let mut coefficients = Partners::new(n);
    let mut redox = Partners::new(n);
    let mut edges = Vec::new();

    // Only reactions with identical metabolite sets can be the first three kinds
    let mut groups: IndexMap<BTreeSet<&str>, Vec<usize>> = IndexMap::new();
    for (index, rxn) in reactions.iter().enumerate() {
        groups.entry(metabolite_key(rxn)).or_default().push(index);
    }
    for members in groups.values() {
        for (position, &i) in members.iter().enumerate() {
            for &j in &members[position + 1..] {
                let (r1, r2) = (reactions[i], reactions[j]);
                let same_coefficients = r1
                    .metabolites
                    .iter()
                    .all(|(met, coef)| r2.coefficient(met) == *coef);
                let opposite = r1.reactants().all(|met| r2.coefficient(met) > 0.);
                let same_reversibility = r1.is_reversible() == r2.is_reversible();
                if same_coefficients && !opposite && same_reversibility {
                    exact.link(i, j);
                    edges.push(Edge::new(&r1.id, &r2.id));
                }
                if !same_coefficients {
                    coefficients.link(i, j);
                    edges.push(Edge::new(&r1.id, &r2.id));
                }
                if opposite || !same_reversibility {
                    directions.link(i, j);
                    edges.push(Edge::new(&r1.id, &r2.id));
                }
            }
        }
    }

    if let Some(carriers) = &carriers {
        let mut redox_groups: IndexMap<BTreeSet<&str>, Vec<usize>> = IndexMap::new();
        for (index, rxn) in reactions.iter().enumerate() {
            if !carriers.involves_pair(rxn) {
                continue;
            }
            let key = carriers.substrate_key(rxn);
            // Reactions between carriers, or carrier transport, are fine
            if !key.is_empty() {
                redox_groups.entry(key).or_default().push(index);
            }
        }
        for members in redox_groups.values() {
            for (position, &i) in members.iter().enumerate() {
                for &j in &members[position + 1..] {
                    let (r1, r2) = (reactions[i], reactions[j]);
                    if metabolite_key(r1) != metabolite_key(r2) {
                        redox.link(i, j);
                        edges.push(Edge::new(&r1.id, &r2.id));
                    }
                }
            }
        }
    }

    let report = DuplicateReport {
        exact: exact.into_ids(model),
        directions: directions.into_ids(model),
        coefficients: coefficients.into_ids(model),
        redox: carriers.map(|_| redox.into_ids(model)),
        edges,
    };
    let flagged = model
        .reactions
        .keys()
        .filter(|id| report.is_duplicate(id))
        .count();
    info!(flagged, "duplicate test finished");
    Ok(report)
}
