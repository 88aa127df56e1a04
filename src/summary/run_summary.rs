//! Run summary for a single calculation

use calc_config::ConfigMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::atoms::Atoms;

/// Schema version for run summaries
pub const RUN_SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for run summaries
pub const RUN_SUMMARY_SCHEMA_ID: &str = "calc-recipes/run_summary@1";

/// Calculated properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunResults {
    /// Total energy in eV
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,

    /// Forces in eV/Å
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forces: Option<Vec<[f64; 3]>>,
}

/// Summary of one calculation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// When the summary was created
    pub created_at: DateTime<Utc>,

    /// Hill formula of the final structure
    pub formula: String,

    /// Number of atoms
    pub nsites: usize,

    /// Total charge and spin multiplicity, for molecular codes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_and_multiplicity: Option<(i32, u32)>,

    /// Structure before the calculation
    pub input_atoms: Atoms,

    /// Structure after the calculation
    pub atoms: Atoms,

    /// Calculator parameters used
    pub parameters: ConfigMap,

    /// Calculated properties
    pub results: RunResults,

    /// Directory holding the calculation outputs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir_name: Option<PathBuf>,

    /// Caller-supplied fields (e.g. `name`)
    #[serde(flatten)]
    pub additional_fields: Map<String, Value>,
}

impl RunSummary {
    /// Look up a caller-supplied field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.additional_fields.get(key)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write to file
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        fs::write(path, json)
    }
}

/// Summarize a finished calculation.
///
/// Results and parameters are lifted out of `final_atoms`; both structures
/// are stored without attached results.
pub fn summarize_run(
    final_atoms: &Atoms,
    input_atoms: &Atoms,
    charge_and_multiplicity: Option<(i32, u32)>,
    additional_fields: Option<&Map<String, Value>>,
) -> RunSummary {
    let calc = final_atoms.results.as_ref();

    let mut atoms = final_atoms.clone();
    atoms.results = None;
    let mut input = input_atoms.clone();
    input.results = None;

    RunSummary {
        schema_version: RUN_SUMMARY_SCHEMA_VERSION,
        schema_id: RUN_SUMMARY_SCHEMA_ID.to_string(),
        created_at: Utc::now(),
        formula: atoms.formula(),
        nsites: atoms.len(),
        charge_and_multiplicity,
        input_atoms: input,
        atoms,
        parameters: calc.map(|c| c.parameters.clone()).unwrap_or_default(),
        results: RunResults {
            energy: calc.and_then(|c| c.energy),
            forces: calc.and_then(|c| c.forces.clone()),
        },
        dir_name: calc.and_then(|c| c.dir_name.clone()),
        additional_fields: additional_fields.cloned().unwrap_or_default(),
    }
}
