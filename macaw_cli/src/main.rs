//! Command line interface for running every MACAW test on one or more models
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use macaw_core::audit::results::{run_all_tests, AuditOptions};
use macaw_core::audit::EquationStyle;
use macaw_core::configuration;
use macaw_core::export::write_report;
use macaw_core::metabolic_model::model::Model;
use macaw_core::optimize::solvers::SolverKind;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "macaw")]
#[command(version)]
#[command(about = "Find likely errors in genome-scale metabolic models", long_about = None)]
struct Cli {
    /// COBRApy style JSON model files
    #[arg(value_name = "MODEL", required = true)]
    models: Vec<PathBuf>,

    /// Number of worker threads for the flux based tests
    #[arg(short, long)]
    threads: usize,

    /// Linear program solver
    #[arg(long, value_enum, default_value_t = SolverArg::Microlp)]
    solver: SolverArg,

    /// Directory for the result files
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Oxidized and reduced forms of a redox carrier, as `oxidized,reduced`
    #[arg(long = "redox-pair", value_name = "OX,RED", value_parser = parse_pair)]
    redox_pairs: Vec<(String, String)>,

    /// Proton metabolite ids
    #[arg(long = "proton", value_delimiter = ',')]
    protons: Vec<String>,

    /// Diphosphate metabolite ids
    #[arg(long = "ppi", value_delimiter = ',')]
    ppi: Vec<String>,

    /// Phosphate metabolite ids
    #[arg(long = "pi", value_delimiter = ',')]
    pi: Vec<String>,

    /// Metabolite ids or names which may be taken up during the dilution test
    #[arg(long, value_delimiter = ',')]
    medium: Option<Vec<String>>,

    /// Write equations with metabolite names instead of ids
    #[arg(long)]
    use_names: bool,

    /// Add compartments to metabolite names in equations
    #[arg(long)]
    add_suffixes: bool,

    #[arg(long)]
    skip_duplicate_test: bool,

    #[arg(long)]
    skip_diphosphate_test: bool,

    #[arg(long)]
    skip_loop_test: bool,

    #[arg(long)]
    skip_dilution_test: bool,

    /// Rank reactions and pathways by betweenness centrality
    #[arg(long)]
    betweenness: bool,

    /// Metabolites in more reactions than this are left out of pathways
    #[arg(long, default_value_t = 10)]
    degree_cutoff: usize,

    /// Number of flux samples used to group loop reactions
    #[arg(long, default_value_t = 1000)]
    samples: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Increase logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SolverArg {
    Clarabel,
    Microlp,
}

impl From<SolverArg> for SolverKind {
    fn from(arg: SolverArg) -> Self {
        match arg {
            SolverArg::Clarabel => SolverKind::Clarabel,
            SolverArg::Microlp => SolverKind::MicroLp,
        }
    }
}

fn parse_pair(value: &str) -> Result<(String, String), String> {
    match value.split_once(',') {
        Some((ox, red)) if !ox.is_empty() && !red.is_empty() => Ok((ox.to_string(), red.to_string())),
        _ => Err(format!("expected `oxidized,reduced`, got `{value}`")),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("macaw_core={level},macaw={level}")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Keep only the ids which are metabolites of the model
fn present(model: &Model, ids: &[String], what: &str) -> Vec<String> {
    let (kept, missing): (Vec<String>, Vec<String>) = ids
        .iter()
        .cloned()
        .partition(|id| model.metabolites.contains_key(id));
    if !missing.is_empty() {
        warn!(?missing, "{what} ids are not in the model, ignoring them");
    }
    kept
}

impl Cli {
    fn options_for(&self, model: &Model) -> AuditOptions {
        let redox_pairs = self
            .redox_pairs
            .iter()
            .filter(|(ox, red)| {
                let found = model.metabolites.contains_key(ox) && model.metabolites.contains_key(red);
                if !found {
                    warn!(oxidized = %ox, reduced = %red, "redox pair is not in the model, ignoring it");
                }
                found
            })
            .cloned()
            .collect();
        AuditOptions {
            redox_pairs,
            proton_ids: present(model, &self.protons, "proton"),
            ppi_ids: present(model, &self.ppi, "diphosphate"),
            pi_ids: present(model, &self.pi, "phosphate"),
            medium: self.medium.clone(),
            style: EquationStyle {
                use_names: self.use_names,
                add_suffixes: self.add_suffixes,
            },
            threads: self.threads,
            n_samples: self.samples,
            seed: self.seed,
            run_duplicate_test: !self.skip_duplicate_test,
            run_diphosphate_test: !self.skip_diphosphate_test,
            run_loop_test: !self.skip_loop_test,
            run_dilution_test: !self.skip_dilution_test,
            pathway_degree_cutoff: self.degree_cutoff,
            compute_betweenness: self.betweenness,
            ..AuditOptions::default()
        }
    }

    fn audit(&self, path: &Path) -> Result<()> {
        let model = Model::read_json(path).with_context(|| format!("reading {}", path.display()))?;
        let options = self.options_for(&model);
        let report = run_all_tests(&model, &options).with_context(|| format!("testing {}", path.display()))?;
        let prefix = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        let written = write_report(&self.output_dir, &prefix, &report)
            .with_context(|| format!("writing results for {}", path.display()))?;
        info!(model = %path.display(), files = written.len(), "wrote results");
        Ok(())
    }
}

fn run(cli: &Cli) -> Result<()> {
    if cli.threads == 0 {
        bail!("--threads must be at least 1");
    }
    configuration::set_processes(cli.threads);
    configuration::set_solver(cli.solver.into());
    let mut failed = 0;
    // One bad model should not stop the rest of the batch
    for path in &cli.models {
        if let Err(err) = cli.audit(path) {
            error!("{err:#}");
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} models could not be tested", cli.models.len());
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_arguments() {
        let cli = Cli::try_parse_from([
            "macaw",
            "model.json",
            "--threads",
            "4",
            "--redox-pair",
            "nad_c,nadh_c",
            "--redox-pair",
            "nadp_c,nadph_c",
            "--ppi",
            "ppi_c,ppi_m",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.threads, 4);
        assert_eq!(cli.redox_pairs[1], ("nadp_c".to_string(), "nadph_c".to_string()));
        assert_eq!(cli.ppi, vec!["ppi_c", "ppi_m"]);
        assert_eq!(cli.verbose, 2);
        assert!(cli.medium.is_none());
        assert_eq!(cli.solver, SolverArg::Microlp);
    }

    #[test]
    fn choosing_a_solver() {
        let cli = Cli::try_parse_from(["macaw", "model.json", "-t", "1", "--solver", "clarabel"]).unwrap();
        assert_eq!(SolverKind::from(cli.solver), SolverKind::Clarabel);
        assert!(Cli::try_parse_from(["macaw", "model.json", "-t", "1", "--solver", "gurobi"]).is_err());
    }

    #[test]
    fn threads_are_required() {
        assert!(Cli::try_parse_from(["macaw", "model.json"]).is_err());
        assert!(parse_pair("nad_c").is_err());
        assert!(parse_pair(",nadh_c").is_err());
    }
}
