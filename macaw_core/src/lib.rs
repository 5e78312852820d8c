//! Core rust implementation of MACAW (Metabolic Accuracy Check and Analysis Workflow), a crate
//! for finding errors in genome-scale metabolic models.
//!
//! Each test in [`audit`] flags reactions that are likely to be wrong in a different way (dead
//! ends, duplicates, diphosphate reversibility, thermodynamically infeasible loops, and
//! dilution-blocked metabolites), and [`audit::results`] merges the per-test results into a single
//! table with one row per reaction.

pub mod audit;
pub mod configuration;
pub mod dilution;
pub mod export;
pub mod flux_analysis;
pub mod graphs;
pub mod io;
pub mod metabolic_model;
pub mod optimize;
pub mod parallel;
mod utils;
