//! Merging per-test results into one table, and running every test on a model
use std::collections::HashSet;
use std::time::Duration;

use crate::audit::dead_end::{self, dead_end_test, DeadEndReport};
use crate::audit::dilution_test::{self, dilution_test, DilutionTestOptions, DilutionTestReport};
use crate::audit::diphosphate::{self, diphosphate_test, DiphosphateReport};
use crate::audit::duplicate::{self, duplicate_test, DuplicateReport};
use crate::audit::loops::{self, loop_test, LoopReport, LoopTestOptions};
use crate::audit::{tags, AuditError, EquationStyle};
use crate::configuration;
use crate::graphs::{make_pathway_graph, pathway_betweenness, reaction_betweenness, GraphError, Pathways};
use crate::metabolic_model::model::Model;
use derive_builder::Builder;
use indexmap::IndexMap;
use thiserror::Error;
use tracing::{info, warn};

/// Name of the merged duplicate column in simplified tables
pub const DUPLICATE_COLUMN: &str = "duplicate_test";
pub const PATHWAY_COLUMN: &str = "pathway";
pub const REACTION_BETWEENNESS_COLUMN: &str = "reaction_betweenness";
pub const PATHWAY_BETWEENNESS_COLUMN: &str = "pathway_betweenness";

const DUPLICATE_COLUMNS: [&str; 4] = [
    duplicate::EXACT_COLUMN,
    duplicate::DIRECTION_COLUMN,
    duplicate::COEFFICIENT_COLUMN,
    duplicate::REDOX_COLUMN,
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("Column {column} has no result for reaction {id}")]
    MissingReaction { column: String, id: String },
    #[error("Column {column} has a result for {id}, which is not a reaction of the model")]
    UnknownReaction { column: String, id: String },
    #[error("Column {0} is already in the table")]
    DuplicateColumn(String),
    #[error("Tables being merged cover different reactions")]
    MismatchedReactions,
}

/// Test results with one row per reaction
///
/// Rows keep the order of the model's reactions. Every column has exactly one value for
/// every row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestResults {
    equations: IndexMap<String, String>,
    columns: IndexMap<String, IndexMap<String, String>>,
}

impl TestResults {
    /// Table with a row (and its equation) for every reaction of the model, but no columns
    pub fn new(model: &Model, style: EquationStyle) -> Self {
        TestResults {
            equations: model
                .reactions
                .values()
                .map(|rxn| (rxn.id.clone(), style.equation(model, rxn)))
                .collect(),
            columns: IndexMap::new(),
        }
    }

    /// Table holding a single column
    pub fn from_column(
        model: &Model,
        style: EquationStyle,
        name: &str,
        values: IndexMap<String, String>,
    ) -> Result<Self, TableError> {
        let mut table = TestResults::new(model, style);
        table.add_column(name, values)?;
        Ok(table)
    }

    /// Add a column, which must have a value for exactly the reactions of the table
    ///
    /// Values are stored in row order, whatever order they were given in.
    pub fn add_column(&mut self, name: &str, mut values: IndexMap<String, String>) -> Result<(), TableError> {
        if self.columns.contains_key(name) {
            return Err(TableError::DuplicateColumn(name.to_string()));
        }
        let mut ordered = IndexMap::with_capacity(self.equations.len());
        for id in self.equations.keys() {
            let value = values.shift_remove(id).ok_or_else(|| TableError::MissingReaction {
                column: name.to_string(),
                id: id.clone(),
            })?;
            ordered.insert(id.clone(), value);
        }
        if let Some((id, _)) = values.into_iter().next() {
            return Err(TableError::UnknownReaction {
                column: name.to_string(),
                id,
            });
        }
        self.columns.insert(name.to_string(), ordered);
        Ok(())
    }

    /// Move every column of `other` into this table
    pub fn merge(&mut self, other: TestResults) -> Result<(), TableError> {
        let same_rows = self.equations.len() == other.equations.len()
            && other.equations.keys().all(|id| self.equations.contains_key(id));
        if !same_rows {
            return Err(TableError::MismatchedReactions);
        }
        for (name, values) in other.columns {
            self.add_column(&name, values)?;
        }
        Ok(())
    }

    pub fn reaction_ids(&self) -> impl Iterator<Item = &str> {
        self.equations.keys().map(String::as_str)
    }

    pub fn equation(&self, reaction_id: &str) -> Option<&str> {
        self.equations.get(reaction_id).map(String::as_str)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn column(&self, name: &str) -> Option<&IndexMap<String, String>> {
        self.columns.get(name)
    }

    pub fn get(&self, reaction_id: &str, column: &str) -> Option<&str> {
        self.columns
            .get(column)
            .and_then(|values| values.get(reaction_id))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.equations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equations.is_empty()
    }

    /// Does the table have exactly one row for every reaction of the model
    pub fn is_complete(&self, model: &Model) -> bool {
        self.equations.len() == model.reactions.len()
            && model.reactions.keys().all(|id| self.equations.contains_key(id))
            && self
                .columns
                .values()
                .all(|values| values.len() == self.equations.len())
    }

    /// Collapse every test column to `ok` or `bad`
    ///
    /// Verdicts which are not errors in the model (reversible reactions which only run one
    /// way, reactions blocked with or without dilution) count as ok. The four duplicate
    /// columns are merged into a single `duplicate_test` column. Columns which are not test
    /// results are kept unchanged.
    pub fn simplify(&self) -> TestResults {
        let mut columns = IndexMap::with_capacity(self.columns.len());
        for (name, values) in &self.columns {
            let simplified = match name.as_str() {
                dead_end::COLUMN => collapse(values, |v| v == tags::OK || v.starts_with("only")),
                dilution_test::COLUMN => collapse(values, |v| {
                    v == tags::OK || v == tags::NOT_APPLICABLE || v.starts_with("always")
                }),
                diphosphate::COLUMN if values.values().all(|v| v == tags::NOT_APPLICABLE) => values.clone(),
                diphosphate::COLUMN => collapse(values, |v| !v.starts_with("should")),
                loops::COLUMN => collapse(values, |v| v == tags::OK),
                name if DUPLICATE_COLUMNS.contains(&name) => {
                    if !columns.contains_key(DUPLICATE_COLUMN) {
                        columns.insert(DUPLICATE_COLUMN.to_string(), self.merged_duplicates());
                    }
                    continue;
                }
                _ => values.clone(),
            };
            columns.insert(name.clone(), simplified);
        }
        TestResults {
            equations: self.equations.clone(),
            columns,
        }
    }

    fn merged_duplicates(&self) -> IndexMap<String, String> {
        self.equations
            .keys()
            .map(|id| {
                let flagged = DUPLICATE_COLUMNS.iter().any(|column| {
                    self.get(id, column)
                        .is_some_and(|v| v != tags::OK && v != tags::NOT_APPLICABLE)
                });
                (id.clone(), verdict(!flagged))
            })
            .collect()
    }

    /// Reactions which are `bad` in at least one test of a simplified table
    pub fn flagged_reactions(&self) -> Vec<&str> {
        self.equations
            .keys()
            .filter(|id| {
                self.columns
                    .values()
                    .any(|values| values.get(*id).is_some_and(|v| v == tags::BAD))
            })
            .map(String::as_str)
            .collect()
    }

    /// Rows as `(reaction id, equation, values in column order)`
    pub fn rows(&self) -> impl Iterator<Item = (&str, &str, Vec<&str>)> {
        self.equations.iter().map(|(id, equation)| {
            let values = self
                .columns
                .values()
                .map(|values| values.get(id).map(String::as_str).unwrap_or_default())
                .collect();
            (id.as_str(), equation.as_str(), values)
        })
    }
}

fn verdict(ok: bool) -> String {
    let tag = if ok { tags::OK } else { tags::BAD };
    tag.to_string()
}

fn collapse(values: &IndexMap<String, String>, is_ok: impl Fn(&str) -> bool) -> IndexMap<String, String> {
    values
        .iter()
        .map(|(id, value)| (id.clone(), verdict(is_ok(value))))
        .collect()
}

/// Options for [`run_all_tests`]
#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(default, setter(into))]
pub struct AuditOptions {
    /// Pairs of oxidized/reduced metabolite ids for the redox duplicate check
    pub redox_pairs: Vec<(String, String)>,
    pub proton_ids: Vec<String>,
    /// Diphosphate metabolite ids
    pub ppi_ids: Vec<String>,
    /// Phosphate metabolite ids
    pub pi_ids: Vec<String>,
    /// Metabolites available for uptake in the dilution test
    pub medium: Option<Vec<String>>,
    pub style: EquationStyle,
    pub threads: usize,
    /// Timeout for each linear program of the loop test
    pub loop_timeout: Duration,
    /// Timeout for each linear program of the dilution test
    pub dilution_timeout: Duration,
    pub max_attempts: usize,
    pub zero_threshold: f64,
    pub correlation_threshold: f64,
    /// Flux samples drawn to group loop reactions
    pub n_samples: usize,
    pub seed: u64,
    pub run_duplicate_test: bool,
    pub run_diphosphate_test: bool,
    pub run_loop_test: bool,
    pub run_dilution_test: bool,
    /// Metabolites in more reactions than this are left out of pathways
    pub pathway_degree_cutoff: usize,
    /// Rank reactions by betweenness, slow for large models
    pub compute_betweenness: bool,
}

impl Default for AuditOptions {
    fn default() -> Self {
        let config = configuration::current();
        AuditOptions {
            redox_pairs: Vec::new(),
            proton_ids: Vec::new(),
            ppi_ids: Vec::new(),
            pi_ids: Vec::new(),
            medium: None,
            style: EquationStyle::default(),
            threads: config.processes,
            loop_timeout: Duration::from_secs(300),
            dilution_timeout: Duration::from_secs(1800),
            max_attempts: 3,
            zero_threshold: config.zero_threshold,
            correlation_threshold: 0.9,
            n_samples: 1000,
            seed: 0,
            run_duplicate_test: true,
            run_diphosphate_test: true,
            run_loop_test: true,
            run_dilution_test: true,
            pathway_degree_cutoff: 10,
            compute_betweenness: false,
        }
    }
}

/// Everything [`run_all_tests`] found
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuditReport {
    /// Full results, one column per test plus the pathway (and betweenness) columns
    pub table: TestResults,
    pub dead_ends: DeadEndReport,
    pub duplicates: Option<DuplicateReport>,
    pub diphosphate: Option<DiphosphateReport>,
    pub loops: Option<LoopReport>,
    pub dilution: Option<DilutionTestReport>,
    pub pathways: Pathways,
    pub reaction_betweenness: Option<IndexMap<String, f64>>,
}

impl AuditReport {
    pub fn simplified(&self) -> TestResults {
        self.table.simplify()
    }
}

/// Ids of reactions to leave out of pathways (ok in every test) and of metabolites in more
/// than `degree_cutoff` reactions
fn pathway_exclusions(model: &Model, simplified: &TestResults, degree_cutoff: usize) -> HashSet<String> {
    let flagged: HashSet<&str> = simplified.flagged_reactions().into_iter().collect();
    let mut exclude: HashSet<String> = model
        .reactions
        .keys()
        .filter(|id| !flagged.contains(id.as_str()))
        .cloned()
        .collect();
    exclude.extend(
        model
            .metabolite_reactions()
            .into_iter()
            .filter(|(_, reactions)| reactions.len() > degree_cutoff)
            .map(|(met, _)| met),
    );
    exclude
}

/// Run every selected test on the model and merge the results
///
/// The dead-end test always runs, its results are reused by the dilution test. Flagged
/// reactions are then grouped into pathways.
///
/// # Errors
/// Any test failing as a whole. Failures of single reactions or metabolites are reported in
/// the table instead.
pub fn run_all_tests(model: &Model, options: &AuditOptions) -> Result<AuditReport, AuditError> {
    let style = options.style;
    let mut table = TestResults::new(model, style);

    let duplicates = if options.run_duplicate_test {
        let report = duplicate_test(model, &options.redox_pairs, &options.proton_ids)?;
        for (name, column) in report.columns() {
            table.add_column(name, column)?;
        }
        Some(report)
    } else {
        None
    };

    let dead_ends = dead_end_test(model);
    table.add_column(dead_end::COLUMN, dead_ends.column())?;

    let diphosphate = if options.run_diphosphate_test {
        let report = diphosphate_test(model, &options.ppi_ids, &options.pi_ids)?;
        table.add_column(diphosphate::COLUMN, report.column())?;
        Some(report)
    } else {
        None
    };

    let loops = if options.run_loop_test {
        let loop_options = LoopTestOptions {
            zero_threshold: options.zero_threshold,
            correlation_threshold: options.correlation_threshold,
            n_samples: options.n_samples,
            seed: options.seed,
            threads: options.threads,
            timeout: options.loop_timeout,
            max_attempts: options.max_attempts,
        };
        let report = loop_test(model, &loop_options)?;
        table.add_column(loops::COLUMN, report.column())?;
        Some(report)
    } else {
        None
    };

    let dilution = if options.run_dilution_test {
        let dilution_options = DilutionTestOptions {
            dead_end_results: Some(dead_ends.clone()),
            medium: options.medium.clone(),
            zero_threshold: options.zero_threshold,
            timeout: options.dilution_timeout,
            max_attempts: options.max_attempts,
            threads: options.threads,
            ..DilutionTestOptions::default()
        };
        let report = dilution_test(model, &dilution_options)?;
        table.add_column(dilution_test::COLUMN, report.column())?;
        Some(report)
    } else {
        None
    };

    let simplified = table.simplify();
    let exclude = pathway_exclusions(model, &simplified, options.pathway_degree_cutoff);
    let pathways = match make_pathway_graph(model, &exclude, style) {
        Ok(pathways) => pathways,
        Err(GraphError::NoPathways) => {
            warn!("no flagged reactions could be connected into pathways");
            Pathways::unassigned(model)
        }
        Err(err) => return Err(err.into()),
    };
    table.add_column(
        PATHWAY_COLUMN,
        pathways
            .membership
            .iter()
            .map(|(id, pathway)| (id.clone(), pathway.to_string()))
            .collect(),
    )?;

    let reaction_betweenness = if options.compute_betweenness {
        let betweenness = reaction_betweenness(model, options.threads)?;
        let per_pathway = pathway_betweenness(&pathways.membership, &betweenness);
        table.add_column(
            REACTION_BETWEENNESS_COLUMN,
            betweenness.iter().map(|(id, value)| (id.clone(), value.to_string())).collect(),
        )?;
        table.add_column(
            PATHWAY_BETWEENNESS_COLUMN,
            pathways
                .membership
                .iter()
                .map(|(id, pathway)| {
                    let value = per_pathway.get(pathway).copied().unwrap_or(0.);
                    (id.clone(), value.to_string())
                })
                .collect(),
        )?;
        Some(betweenness)
    } else {
        None
    };

    info!(
        reactions = table.len(),
        flagged = simplified.flagged_reactions().len(),
        pathways = pathways.count(),
        "finished testing model"
    );
    Ok(AuditReport {
        table,
        dead_ends,
        duplicates,
        diphosphate,
        loops,
        dilution,
        pathways,
        reaction_betweenness,
    })
}
