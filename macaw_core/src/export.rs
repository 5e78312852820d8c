//! Writing test results and edge lists as CSV files
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::audit::results::{AuditReport, TestResults};
use crate::audit::Edge;
use crate::graphs::PathwayEdge;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Unable to create output directory {0}")]
    UnableToCreateDirectory(String),
    #[error("Unable to write csv")]
    Csv(#[from] csv::Error),
    #[error("Unable to write to file")]
    UnableToWrite(#[from] std::io::Error),
}

/// Write a results table, one row per reaction
///
/// The first two columns are `reaction_id` and `reaction_equation`, followed by the table's
/// columns in order.
pub fn write_results<W: Write>(writer: W, table: &TestResults) -> Result<(), ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut header = vec!["reaction_id", "reaction_equation"];
    header.extend(table.column_names());
    csv_writer.write_record(&header)?;
    for (id, equation, values) in table.rows() {
        let mut record = Vec::with_capacity(values.len() + 2);
        record.push(id);
        record.push(equation);
        record.extend(values);
        csv_writer.write_record(&record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Write serializable rows (edges) with a header taken from their field names
pub fn write_records<W: Write, S: Serialize>(writer: W, records: &[S]) -> Result<(), ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for record in records {
        csv_writer.serialize(record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

fn write_file<F>(path: PathBuf, write: F) -> Result<PathBuf, ExportError>
where
    F: FnOnce(fs::File) -> Result<(), ExportError>,
{
    let file = fs::File::create(&path)?;
    write(file)?;
    debug!(path = %path.display(), "wrote csv");
    Ok(path)
}

/// Write everything in an audit report into `directory`, file names starting with `prefix`
///
/// Writes the full and simplified result tables, the edge list of every test which ran, and
/// the pathway edge list.
///
/// # Returns
/// Paths of the written files
pub fn write_report(directory: &Path, prefix: &str, report: &AuditReport) -> Result<Vec<PathBuf>, ExportError> {
    fs::create_dir_all(directory)
        .map_err(|err| ExportError::UnableToCreateDirectory(format!("{}: {}", directory.display(), err)))?;
    let path = |suffix: &str| directory.join(format!("{prefix}_{suffix}.csv"));

    let mut written = vec![
        write_file(path("test_results"), |file| write_results(file, &report.table))?,
        write_file(path("simplified_test_results"), |file| {
            write_results(file, &report.simplified())
        })?,
        write_file(path("dead_end_edges"), |file| write_records(file, &report.dead_ends.edges))?,
    ];
    let optional_edges: [(&str, Option<&Vec<Edge>>); 3] = [
        ("duplicate_edges", report.duplicates.as_ref().map(|r| &r.edges)),
        ("loop_edges", report.loops.as_ref().map(|r| &r.edges)),
        ("dilution_edges", report.dilution.as_ref().map(|r| &r.edges)),
    ];
    for (name, edges) in optional_edges {
        if let Some(edges) = edges {
            written.push(write_file(path(name), |file| write_records(file, edges))?);
        }
    }
    let pathway_edges: &[PathwayEdge] = &report.pathways.edges;
    written.push(write_file(path("pathway_edges"), |file| {
        write_records(file, pathway_edges)
    })?);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::EquationStyle;
    use crate::metabolic_model::model::Model;
    use crate::metabolic_model::reaction::Reaction;
    use indexmap::IndexMap;

    #[test]
    fn results_table_csv() {
        let mut model = Model::new_empty();
        model.add_reaction(Reaction::new("R1", &[("a", -1.), ("b", 1.)], 0., 1000.));
        model.add_reaction(Reaction::new("R2", &[("b", -1.)], 0., 1000.));
        let values: IndexMap<String, String> = [("R1", "ok"), ("R2", "a;b")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let table = TestResults::from_column(&model, EquationStyle::default(), "dead_end_test", values).unwrap();

        let mut buffer = Vec::new();
        write_results(&mut buffer, &table).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "reaction_id,reaction_equation,dead_end_test");
        assert!(lines[1].starts_with("R1,"));
        assert!(lines[2].ends_with(",a;b"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn edge_csv() {
        let edges = vec![Edge::new("a", "R1"), Edge::new("b", "R2")];
        let mut buffer = Vec::new();
        write_records(&mut buffer, &edges).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "source,target\na,R1\nb,R2\n");
    }
}
