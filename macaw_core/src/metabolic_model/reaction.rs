//! This module provides a struct for representing reactions
use crate::configuration;
use crate::metabolic_model::metabolite::Metabolite;
use crate::utils::hashing::hash_as_hex_string;
use derive_builder::Builder;
use indexmap::IndexMap;

/// Represents a reaction in the metabolic model
///
/// Negative stoichiometric coefficients mark reactants, positive ones mark products.
#[derive(Builder, Debug, Clone, PartialEq)]
#[builder(setter(into))]
pub struct Reaction {
    /// Used to identify the reaction
    pub id: String,
    /// Metabolite stoichiometry of the reaction
    #[builder(default = "IndexMap::new()")]
    pub metabolites: IndexMap<String, f64>,
    /// Human-readable reaction name
    #[builder(default = "None")]
    pub name: Option<String>,
    /// Gene reaction rule, kept as the raw string from the model file
    #[builder(default = "None")]
    pub gene_reaction_rule: Option<String>,
    /// Lower flux bound
    #[builder(default = "configuration::current().lower_bound")]
    pub lower_bound: f64,
    /// Upper flux bound
    #[builder(default = "configuration::current().upper_bound")]
    pub upper_bound: f64,
    /// Reaction subsystem
    #[builder(default = "None")]
    pub subsystem: Option<String>,
}

impl Reaction {
    /// Create a reaction from an id, stoichiometry, and bounds
    pub fn new(id: &str, metabolites: &[(&str, f64)], lower_bound: f64, upper_bound: f64) -> Self {
        Reaction {
            id: id.to_string(),
            metabolites: metabolites
                .iter()
                .map(|(met, coef)| (met.to_string(), *coef))
                .collect(),
            name: None,
            gene_reaction_rule: None,
            lower_bound,
            upper_bound,
            subsystem: None,
        }
    }

    /// Determine the id to be associated with the forward reaction in the optimization problem
    ///
    /// # Note:
    /// The forward id is "{reaction_id}_forward"
    pub fn get_forward_id(&self) -> String {
        forward_variable_id(&self.id)
    }

    /// Determine the id to be associated with the reverse reaction in the optimization problem
    ///
    /// # Note:
    /// The reverse id is "{reaction_id}_reverse_{hexidecimal hash of reaction_id}"
    pub fn get_reverse_id(&self) -> String {
        reverse_variable_id(&self.id)
    }

    /// Determine the upper bound of the variable associated with the forward reaction
    pub(crate) fn get_forward_upper_bound(&self) -> f64 {
        self.upper_bound.max(0.)
    }

    /// Determine the lower bound of the variable associated with the forward reaction
    pub(crate) fn get_forward_lower_bound(&self) -> f64 {
        self.lower_bound.max(0.)
    }

    /// Determine the upper bound of the variable associated with the reverse reaction
    pub(crate) fn get_reverse_upper_bound(&self) -> f64 {
        (-self.lower_bound).max(0.)
    }

    /// Determine the lower bound of the variable associated with the reverse reaction
    pub(crate) fn get_reverse_lower_bound(&self) -> f64 {
        (-self.upper_bound).max(0.)
    }

    /// A reaction is reversible when it is allowed to carry negative flux
    pub fn is_reversible(&self) -> bool {
        self.lower_bound < 0.
    }

    /// Boundary reactions (exchange, sink, demand) involve exactly one metabolite
    pub fn is_boundary(&self) -> bool {
        self.metabolites.len() == 1
    }

    /// Coefficient of `metabolite` in this reaction, 0 if it does not participate
    pub fn coefficient(&self, metabolite: &str) -> f64 {
        self.metabolites.get(metabolite).copied().unwrap_or(0.)
    }

    /// Ids of the metabolites consumed when the reaction carries positive flux
    pub fn reactants(&self) -> impl Iterator<Item = &str> {
        self.metabolites
            .iter()
            .filter(|(_, coef)| **coef < 0.)
            .map(|(id, _)| id.as_str())
    }

    /// Ids of the metabolites produced when the reaction carries positive flux
    pub fn products(&self) -> impl Iterator<Item = &str> {
        self.metabolites
            .iter()
            .filter(|(_, coef)| **coef > 0.)
            .map(|(id, _)| id.as_str())
    }

    /// Reverse the direction of the reaction in place
    ///
    /// Every coefficient is negated and the bounds become `(-upper, -lower)`, so the set of
    /// feasible fluxes is mirrored. Flipping twice restores the original reaction.
    pub fn flip(&mut self) {
        for coef in self.metabolites.values_mut() {
            *coef = -*coef;
        }
        let (lower, upper) = (self.lower_bound, self.upper_bound);
        self.lower_bound = -upper;
        self.upper_bound = -lower;
    }

    /// Arrow describing the allowed direction of flux
    fn arrow(&self) -> &'static str {
        if self.lower_bound < 0. && self.upper_bound > 0. {
            "<=>"
        } else if self.lower_bound < 0. {
            "<--"
        } else {
            "-->"
        }
    }

    /// Build a human-readable equation for the reaction
    ///
    /// # Parameters
    /// - `metabolites`: Metabolites of the model, used to look up names and compartments
    /// - `use_names`: Show metabolite names instead of ids (falls back to the id when a
    ///   metabolite has no name)
    /// - `add_suffixes`: When showing names, append the compartment in square brackets
    ///
    /// # Returns
    /// A string like `"2 A + B --> C"`, coefficients of 1 are omitted
    pub fn build_equation(
        &self,
        metabolites: &IndexMap<String, Metabolite>,
        use_names: bool,
        add_suffixes: bool,
    ) -> String {
        let describe = |id: &str, coef: f64| -> String {
            let label = match metabolites.get(id) {
                Some(met) if use_names => match (&met.compartment, add_suffixes) {
                    (Some(compartment), true) => {
                        format!("{} [{}]", met.display_name(), compartment)
                    }
                    _ => met.display_name().to_string(),
                },
                _ => id.to_string(),
            };
            let magnitude = coef.abs();
            if (magnitude - 1.).abs() < f64::EPSILON {
                label
            } else {
                format!("{magnitude} {label}")
            }
        };
        let reactants = self
            .metabolites
            .iter()
            .filter(|(_, coef)| **coef < 0.)
            .map(|(id, coef)| describe(id, *coef))
            .collect::<Vec<_>>()
            .join(" + ");
        let products = self
            .metabolites
            .iter()
            .filter(|(_, coef)| **coef > 0.)
            .map(|(id, coef)| describe(id, *coef))
            .collect::<Vec<_>>()
            .join(" + ");
        format!("{} {} {}", reactants, self.arrow(), products)
            .trim()
            .to_string()
    }
}

/// Id of the forward flux variable for the reaction with id `reaction_id`
pub(crate) fn forward_variable_id(reaction_id: &str) -> String {
    format!("{}_forward", reaction_id)
}

/// Id of the reverse flux variable for the reaction with id `reaction_id`
pub(crate) fn reverse_variable_id(reaction_id: &str) -> String {
    format!("{}_reverse_{}", reaction_id, hash_as_hex_string(reaction_id))
}
