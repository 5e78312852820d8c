//! Module providing JSON IO for Models, in the format written by COBRApy
use std::fs;
use std::path::Path;

use crate::metabolic_model::metabolite::Metabolite;
use crate::metabolic_model::model::Model;
use crate::metabolic_model::reaction::{ReactionBuilder, ReactionBuilderError};
use crate::optimize::objective::ObjectiveSense;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// region JSON Model
/// Represents a JSON serialized model, used for reading and writing models in json format
///
/// Fields which MACAW never uses (genes, notes, annotations) are ignored on read.
#[derive(Serialize, Deserialize)]
struct JsonModel {
    metabolites: Vec<JsonMetabolite>,
    reactions: Vec<JsonReaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compartments: Option<IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct JsonMetabolite {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    compartment: Option<String>,
    #[serde(default)]
    charge: Option<i32>,
    #[serde(default)]
    formula: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct JsonReaction {
    id: String,
    #[serde(default)]
    name: Option<String>,
    metabolites: IndexMap<String, f64>,
    lower_bound: f64,
    upper_bound: f64,
    #[serde(default)]
    gene_reaction_rule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    objective_coefficient: Option<f64>,
    #[serde(default)]
    subsystem: Option<String>,
}
// endregion JSON Model

// region Conversions
impl From<JsonMetabolite> for Metabolite {
    fn from(m: JsonMetabolite) -> Self {
        Self {
            id: m.id,
            name: m.name,
            compartment: m.compartment,
            charge: m.charge,
            formula: m.formula,
        }
    }
}

impl From<Metabolite> for JsonMetabolite {
    fn from(m: Metabolite) -> Self {
        Self {
            id: m.id,
            name: m.name,
            compartment: m.compartment,
            charge: m.charge,
            formula: m.formula,
        }
    }
}

impl Model {
    /// Read a model from a COBRApy style JSON file
    pub fn read_json<P: AsRef<Path>>(path: P) -> Result<Model, JsonError> {
        let path = path.as_ref();
        let model_str = fs::read_to_string(path)
            .map_err(|err| JsonError::UnableToRead(format!("{}: {}", path.display(), err)))?;
        let model = Model::from_json_str(&model_str)?;
        debug!(
            path = %path.display(),
            reactions = model.reactions.len(),
            metabolites = model.metabolites.len(),
            "read JSON model"
        );
        Ok(model)
    }

    /// Parse a model from a JSON string
    pub fn from_json_str(data: &str) -> Result<Model, JsonError> {
        let json_model = serde_json::from_str::<JsonModel>(data)
            .map_err(|err| JsonError::UnableToParse(err.to_string()))?;
        Model::from_json(json_model)
    }

    /// Write the model to a JSON file
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), JsonError> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    /// Serialize the model to a JSON string
    pub fn to_json_string(&self) -> Result<String, JsonError> {
        Ok(serde_json::to_string(&self.to_json())?)
    }

    fn from_json(json_model: JsonModel) -> Result<Self, JsonError> {
        let mut model = Model::new_empty();
        for met in json_model.metabolites {
            model.add_metabolite(Metabolite::from(met));
        }
        let mut objective: IndexMap<String, f64> = IndexMap::new();
        for rxn in json_model.reactions {
            if model.reactions.contains_key(&rxn.id) {
                return Err(JsonError::DuplicateReaction(rxn.id));
            }
            let rule = Some(rxn.gene_reaction_rule).filter(|rule| !rule.trim().is_empty());
            let new_reaction = ReactionBuilder::default()
                .id(rxn.id.clone())
                .metabolites(rxn.metabolites)
                .name(rxn.name)
                .gene_reaction_rule(rule)
                .lower_bound(rxn.lower_bound)
                .upper_bound(rxn.upper_bound)
                .subsystem(rxn.subsystem)
                .build()?;
            model.add_reaction(new_reaction);
            // Add the reaction to the objective function if desired
            if let Some(coef) = rxn.objective_coefficient.filter(|coef| *coef != 0.) {
                objective.insert(rxn.id, coef);
            }
        }
        model.set_objective(objective, ObjectiveSense::Maximize);
        model.id = json_model.id;
        model.compartments = json_model.compartments;
        model.version = json_model.version;
        Ok(model)
    }

    fn to_json(&self) -> JsonModel {
        let metabolites = self.metabolites.values().map(|m| m.clone().into()).collect();
        let reactions = self
            .reactions
            .values()
            .map(|r| JsonReaction {
                id: r.id.clone(),
                name: r.name.clone(),
                metabolites: r.metabolites.clone(),
                lower_bound: r.lower_bound,
                upper_bound: r.upper_bound,
                gene_reaction_rule: r.gene_reaction_rule.clone().unwrap_or_default(),
                objective_coefficient: self.objective.get(&r.id).copied(),
                subsystem: r.subsystem.clone(),
            })
            .collect();
        JsonModel {
            metabolites,
            reactions,
            id: self.id.clone(),
            compartments: self.compartments.clone(),
            version: self.version.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum JsonError {
    #[error("Unable to read file due to {0}")]
    UnableToRead(String),
    #[error("Unable to parse json due to {0}")]
    UnableToParse(String),
    #[error("Reaction {0} appears more than once in the model file")]
    DuplicateReaction(String),
    #[error("Unable to build reaction")]
    UnableToBuildReaction(#[from] ReactionBuilderError),
    #[error("Serde json error")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("Unable to write to file")]
    UnableToWrite(#[from] std::io::Error),
}
// endregion Conversions

#[cfg(test)]
mod json_tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn json_metabolite() {
        let data = r#"{
"id":"ppi_c",
"name":"Diphosphate",
"compartment":"c",
"charge":-3,
"formula":"HO7P2",
"annotation":{"kegg.compound":["C00013"]}
}"#;
        let met: JsonMetabolite = serde_json::from_str(data).unwrap();
        assert_eq!(met.id, "ppi_c");
        assert_eq!(met.name.as_deref(), Some("Diphosphate"));
        assert_eq!(met.compartment.as_deref(), Some("c"));
        assert_eq!(met.charge, Some(-3));
        assert_eq!(met.formula.as_deref(), Some("HO7P2"));
    }

    #[test]
    fn json_reaction() {
        let data = r#"{
"id":"PPA",
"name":"Inorganic diphosphatase",
"metabolites":{"h2o_c":-1.0,"ppi_c":-1.0,"h_c":1.0,"pi_c":2.0},
"lower_bound":0.0,
"upper_bound":1000.0,
"gene_reaction_rule":"b4226",
"subsystem":"Inorganic Ion Transport and Metabolism",
"notes":{"original_bigg_ids":["PPA"]}
}"#;
        let reaction: JsonReaction = serde_json::from_str(data).unwrap();
        assert_eq!(reaction.id, "PPA");
        assert_eq!(reaction.metabolites.len(), 4);
        assert_eq!(reaction.metabolites["pi_c"], 2.0);
        assert_eq!(reaction.lower_bound, 0.0);
        assert_eq!(reaction.upper_bound, 1000.0);
        assert_eq!(reaction.gene_reaction_rule, "b4226");
        assert!(reaction.objective_coefficient.is_none());
    }

    #[test]
    fn json_model() {
        let data_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("test_data")
            .join("test_models")
            .join("toy_dilution.json");
        let model = Model::read_json(data_path).unwrap();
        assert_eq!(model.id.as_deref(), Some("toy_dilution"));
        assert_eq!(model.reactions.len(), 4);
        assert_eq!(model.metabolites.len(), 4);
        assert_eq!(model.get_metabolite("A").unwrap().name.as_deref(), Some("Metabolite A"));
        assert!(!model.has_objective());
        let r1 = model.get_reaction("R1").unwrap();
        assert_eq!(r1.lower_bound, 0.);
        assert_eq!(r1.gene_reaction_rule.as_deref(), Some("g1"));
        assert_eq!(r1.coefficient("B"), 1.);
    }

    #[test]
    fn objective_and_round_trip() {
        let data = r#"{
"metabolites":[{"id":"A"}],
"reactions":[
{"id":"EX_A","metabolites":{"A":-1.0},"lower_bound":-10.0,"upper_bound":1000.0,"objective_coefficient":1.0},
{"id":"DM_A","metabolites":{"A":-1.0},"lower_bound":0.0,"upper_bound":1000.0,"gene_reaction_rule":"g1"}
]
}"#;
        let model = Model::from_json_str(data).unwrap();
        assert_eq!(model.objective.get("EX_A"), Some(&1.));
        assert_eq!(
            model.get_reaction("DM_A").unwrap().gene_reaction_rule.as_deref(),
            Some("g1")
        );
        assert!(model.get_reaction("EX_A").unwrap().gene_reaction_rule.is_none());

        let reread = Model::from_json_str(&model.to_json_string().unwrap()).unwrap();
        assert_eq!(reread.reactions, model.reactions);
        assert_eq!(reread.objective, model.objective);
    }

    #[test]
    fn bad_json_is_an_error() {
        assert!(matches!(
            Model::from_json_str("{\"reactions\": 5}"),
            Err(JsonError::UnableToParse(_))
        ));
        assert!(matches!(
            Model::read_json("/definitely/not/a/model.json"),
            Err(JsonError::UnableToRead(_))
        ));
    }
}
