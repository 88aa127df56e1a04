//! Result summaries for finished calculations
//!
//! Produces the `run_summary` record returned by every recipe.

mod run_summary;

pub use run_summary::{summarize_run, RunResults, RunSummary, RUN_SUMMARY_SCHEMA_ID, RUN_SUMMARY_SCHEMA_VERSION};
